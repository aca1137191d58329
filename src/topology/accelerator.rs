use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Accelerator generations slices can be built from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcceleratorType {
    #[serde(rename = "tpu-v7x")]
    TpuV7x,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported accelerator type '{0}'")]
pub struct UnsupportedAccelerator(pub String);

impl AcceleratorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceleratorType::TpuV7x => "tpu-v7x",
        }
    }
}

impl fmt::Display for AcceleratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcceleratorType {
    type Err = UnsupportedAccelerator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tpu-v7x" => Ok(AcceleratorType::TpuV7x),
            other => Err(UnsupportedAccelerator(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_supported() {
        assert_eq!("tpu-v7x".parse::<AcceleratorType>(), Ok(AcceleratorType::TpuV7x));
    }

    #[test]
    fn test_parse_unsupported() {
        let err = "tpu-v5p-slice".parse::<AcceleratorType>().unwrap_err();
        assert_eq!(err.to_string(), "unsupported accelerator type 'tpu-v5p-slice'");
    }

    #[test]
    fn test_serde_uses_label_value() {
        let json = serde_json::to_string(&AcceleratorType::TpuV7x).unwrap();
        assert_eq!(json, "\"tpu-v7x\"");
    }
}
