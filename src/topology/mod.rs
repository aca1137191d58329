//! Topology grammar - parses and classifies requested slice shapes
//!
//! A shape is written as three dimensions joined by `x`, e.g. `4x4x8`.
//! Shapes fall into two classes:
//!
//! - **Subslice**: one of a small fixed set of sub-cube geometries
//!   (`2x2x1`, `2x2x2`, `2x2x4`, `2x4x4`), partitioned out of a single cube.
//! - **Superslice**: one or more whole cubes. Every dimension must be a
//!   non-zero multiple of 4, non-decreasing left to right, and within the
//!   per-axis maxima `16x24x24`.
//!
//! Anything else is invalid.

mod accelerator;

pub use accelerator::{AcceleratorType, UnsupportedAccelerator};

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels;

/// Chips in one physical cube
pub const CHIPS_PER_CUBE: u32 = 64;

/// Granularity every superslice dimension must be a multiple of
pub const CUBE_EDGE: u32 = 4;

/// Per-axis upper bounds for superslice shapes
pub const MAX_DIMS: [u32; 3] = [16, 24, 24];

/// Shapes carved out of a single cube
pub const SUBSLICE_SHAPES: [[u32; 3]; 4] = [[2, 2, 1], [2, 2, 2], [2, 2, 4], [2, 4, 4]];

/// Errors produced while parsing a topology string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("invalid topology '{shape}': {reason}")]
    InvalidTopology { shape: String, reason: String },
}

impl TopologyError {
    fn invalid(shape: &str, reason: impl Into<String>) -> Self {
        TopologyError::InvalidTopology {
            shape: shape.to_string(),
            reason: reason.into(),
        }
    }
}

/// Size class of a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TopologyClass {
    /// One or more whole cubes
    Superslice,
    /// A fixed sub-cube geometry
    Subslice,
    /// Failed validation
    Invalid,
}

impl fmt::Display for TopologyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyClass::Superslice => write!(f, "Superslice"),
            TopologyClass::Subslice => write!(f, "Subslice"),
            TopologyClass::Invalid => write!(f, "Invalid"),
        }
    }
}

/// A parsed, valid topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topology {
    pub dims: [u32; 3],
    pub class: TopologyClass,
}

impl Topology {
    /// Total chips covered by the shape
    pub fn chips(&self) -> u32 {
        self.dims.iter().product()
    }

    /// Number of isolation units the shape occupies.
    ///
    /// A superslice spans `chips / 64` cubes; a subslice is a single
    /// partition of one cube.
    pub fn cubes(&self) -> u32 {
        match self.class {
            TopologyClass::Superslice => self.chips() / CHIPS_PER_CUBE,
            _ => 1,
        }
    }

    /// Chips that each isolation unit must have in use
    pub fn unit_chips(&self) -> u32 {
        match self.class {
            TopologyClass::Superslice => CHIPS_PER_CUBE,
            _ => self.chips(),
        }
    }

    pub fn is_superslice(&self) -> bool {
        self.class == TopologyClass::Superslice
    }

    /// Node label whose value identifies one fine-level placement unit.
    ///
    /// Superslices are placed per sub-block; subslices per partition of the
    /// exact shape. The admission webhook and the assignment mapper both go
    /// through here.
    pub fn slice_level_label(&self) -> String {
        match self.class {
            TopologyClass::Superslice => labels::SUB_BLOCK_LABEL.to_string(),
            _ => labels::partition_id_label(&self.to_string()),
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.dims[0], self.dims[1], self.dims[2])
    }
}

impl std::str::FromStr for Topology {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_topology(s)
    }
}

fn dimension_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]+$").expect("static pattern"))
}

/// Parse and validate a topology string
pub fn parse_topology(shape: &str) -> Result<Topology, TopologyError> {
    let tokens: Vec<&str> = shape.split('x').collect();
    if tokens.len() != 3 {
        return Err(TopologyError::invalid(
            shape,
            format!("expected 3 dimensions, found {}", tokens.len()),
        ));
    }

    let mut dims = [0u32; 3];
    for (i, token) in tokens.iter().enumerate() {
        if !dimension_pattern().is_match(token) {
            return Err(TopologyError::invalid(
                shape,
                format!("dimension {} ('{}') is not an integer", i, token),
            ));
        }
        dims[i] = token.parse().map_err(|_| {
            TopologyError::invalid(shape, format!("dimension {} ('{}') is out of range", i, token))
        })?;
    }

    if SUBSLICE_SHAPES.contains(&dims) {
        return Ok(Topology {
            dims,
            class: TopologyClass::Subslice,
        });
    }

    validate_superslice(shape, dims)?;
    Ok(Topology {
        dims,
        class: TopologyClass::Superslice,
    })
}

fn validate_superslice(shape: &str, dims: [u32; 3]) -> Result<(), TopologyError> {
    if dims.contains(&0) {
        return Err(TopologyError::invalid(shape, "dimensions must be non-zero"));
    }
    if let Some(d) = dims.iter().find(|d| *d % CUBE_EDGE != 0) {
        return Err(TopologyError::invalid(
            shape,
            format!("dimension {} is not a multiple of {}", d, CUBE_EDGE),
        ));
    }
    if dims.windows(2).any(|w| w[0] > w[1]) {
        return Err(TopologyError::invalid(
            shape,
            "dimensions must be non-decreasing",
        ));
    }
    for (axis, (d, max)) in dims.iter().zip(MAX_DIMS.iter()).enumerate() {
        if d > max {
            return Err(TopologyError::invalid(
                shape,
                format!("dimension {} exceeds the axis {} maximum of {}", d, axis, max),
            ));
        }
    }
    Ok(())
}

/// Three-part view of [`parse_topology`]: dimensions, class and error.
///
/// The class is `Invalid` exactly when an error is returned; callers should
/// branch on the class, not on the error message.
pub fn classify(shape: &str) -> ([u32; 3], TopologyClass, Option<TopologyError>) {
    match parse_topology(shape) {
        Ok(t) => (t.dims, t.class, None),
        Err(e) => ([0; 3], TopologyClass::Invalid, Some(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_superslice_shapes() {
        for (shape, dims) in [
            ("4x4x4", [4, 4, 4]),
            ("4x4x8", [4, 4, 8]),
            ("4x4x12", [4, 4, 12]),
            ("16x24x24", [16, 24, 24]),
        ] {
            let topo = parse_topology(shape).unwrap();
            assert_eq!(topo.dims, dims, "{}", shape);
            assert_eq!(topo.class, TopologyClass::Superslice, "{}", shape);
        }
    }

    #[test]
    fn test_subslice_shapes() {
        for shape in ["2x2x1", "2x2x2", "2x2x4", "2x4x4"] {
            let (_, class, err) = classify(shape);
            assert_eq!(class, TopologyClass::Subslice, "{}", shape);
            assert!(err.is_none());
        }
    }

    #[test]
    fn test_invalid_shapes() {
        for shape in [
            "4x4", "4x4x4x4", "4x4xa", "3x4x4", "8x4x4", "20x24x24", "0x4x4", "4x4x4x", "4x4x",
            "", "x4x4", "+4x4x4",
        ] {
            let (dims, class, err) = classify(shape);
            assert_eq!(class, TopologyClass::Invalid, "{}", shape);
            assert_eq!(dims, [0; 3]);
            assert!(
                matches!(err, Some(TopologyError::InvalidTopology { .. })),
                "{}",
                shape
            );
        }
    }

    #[test]
    fn test_subslice_match_is_ordered() {
        // 1x2x2 is a permutation of 2x2x1 but not an allowed geometry
        assert!(parse_topology("1x2x2").is_err());
        assert!(parse_topology("4x4x2").is_err());
    }

    #[test]
    fn test_error_messages_name_the_rule() {
        let msg = |s: &str| parse_topology(s).unwrap_err().to_string();
        assert!(msg("4x4").contains("expected 3 dimensions"));
        assert!(msg("4x4xa").contains("not an integer"));
        assert!(msg("0x4x4").contains("non-zero"));
        assert!(msg("3x4x4").contains("multiple of 4"));
        assert!(msg("8x4x4").contains("non-decreasing"));
        assert!(msg("20x24x24").contains("maximum"));
    }

    #[test]
    fn test_cube_arithmetic() {
        let topo = parse_topology("4x4x12").unwrap();
        assert_eq!(topo.chips(), 192);
        assert_eq!(topo.cubes(), 3);
        assert_eq!(topo.unit_chips(), 64);

        let sub = parse_topology("2x2x4").unwrap();
        assert_eq!(sub.chips(), 16);
        assert_eq!(sub.cubes(), 1);
        assert_eq!(sub.unit_chips(), 16);
    }

    #[test]
    fn test_slice_level_label() {
        let superslice = parse_topology("4x4x8").unwrap();
        assert_eq!(superslice.slice_level_label(), labels::SUB_BLOCK_LABEL);

        let subslice = parse_topology("2x2x1").unwrap();
        assert_eq!(
            subslice.slice_level_label(),
            "cloud.google.com/gke-tpu-partition-2x2x1-id"
        );
    }

    #[test]
    fn test_display_round_trips() {
        let topo: Topology = "4x8x16".parse().unwrap();
        assert_eq!(topo.to_string(), "4x8x16");
    }
}
