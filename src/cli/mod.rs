//! CLI module for tpuslice
//!
//! Subcommands:
//! - `tpuslice serve` - Run the control plane (API, webhook, controller)
//! - `tpuslice topology` - Parse and classify a topology string
//! - `tpuslice slice-name` - Compute the name of a replica's slice
//! - `tpuslice state` - Derive the state of a Slice manifest
//! - `tpuslice validate` - Run the admission webhook on a job manifest offline
//! - `tpuslice get` - List resources from a running control plane
//! - `tpuslice status` - Show control plane status

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "tpuslice")]
#[command(about = "Provision TPU slices for admitted training jobs")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.tpuslice/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control plane server and slice controller
    Serve(ServeArgs),

    /// Parse a topology string and show its class and sizes
    Topology {
        /// Shape such as 4x4x8 or 2x2x1
        shape: String,
    },

    /// Compute the slice name for one job replica
    #[command(name = "slice-name")]
    SliceName {
        namespace: String,
        job: String,
        replicated_job: String,
        index: u32,
    },

    /// Derive the lifecycle state of a Slice manifest
    State(StateArgs),

    /// Default and validate a job manifest as the webhook would
    Validate {
        /// Path to the job manifest (JSON or YAML)
        file: PathBuf,
    },

    /// Get/list resources from the control plane
    Get(GetArgs),

    /// Show control plane status
    Status {
        #[arg(long, env = "TPUSLICE_SERVER")]
        server: Option<String>,
    },
}

/// Arguments for the serve command; flags override the config file
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Bind address for the server
    #[arg(long)]
    pub bind_addr: Option<String>,

    /// Port to listen on (default: 8181)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Admission check name to answer for
    #[arg(long)]
    pub check_name: Option<String>,

    /// Concurrent reconcile workers
    #[arg(long)]
    pub workers: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct StateArgs {
    /// Path to the Slice manifest (JSON or YAML)
    pub file: PathBuf,

    /// Override the staleness timeout in seconds
    #[arg(long)]
    pub staleness_timeout_secs: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Resource type to list
    #[command(subcommand)]
    pub resource: GetResource,

    /// Control plane URL (default: derived from the config file)
    #[arg(long, env = "TPUSLICE_SERVER", global = true)]
    pub server: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum GetResource {
    /// List slices with their derived state
    #[command(name = "slices", visible_alias = "slice")]
    Slices,

    /// List workloads and their admission check state
    #[command(name = "workloads", visible_alias = "workload", visible_alias = "wl")]
    Workloads,

    /// List nodes with their topology labels
    #[command(name = "nodes", visible_alias = "node")]
    Nodes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve() {
        let cli = Cli::parse_from(["tpuslice", "serve", "--port", "9000", "--workers", "2"]);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.port, Some(9000));
                assert_eq!(args.workers, Some(2));
                assert!(args.bind_addr.is_none());
            }
            _ => panic!("Expected Serve command"),
        }
    }

    #[test]
    fn test_parse_slice_name() {
        let cli = Cli::parse_from(["tpuslice", "slice-name", "ns", "train", "workers", "3"]);
        match cli.command {
            Commands::SliceName {
                namespace, index, ..
            } => {
                assert_eq!(namespace, "ns");
                assert_eq!(index, 3);
            }
            _ => panic!("Expected SliceName command"),
        }
    }

    #[test]
    fn test_parse_get_alias() {
        let cli = Cli::parse_from(["tpuslice", "get", "wl", "--server", "http://cp:8181"]);
        match cli.command {
            Commands::Get(args) => {
                assert!(matches!(args.resource, GetResource::Workloads));
                assert_eq!(args.server.as_deref(), Some("http://cp:8181"));
            }
            _ => panic!("Expected Get command"),
        }
    }

    #[test]
    fn test_parse_state() {
        let cli = Cli::parse_from([
            "tpuslice",
            "state",
            "slice.yaml",
            "--staleness-timeout-secs",
            "60",
        ]);
        match cli.command {
            Commands::State(args) => {
                assert_eq!(args.file, PathBuf::from("slice.yaml"));
                assert_eq!(args.staleness_timeout_secs, Some(60));
            }
            _ => panic!("Expected State command"),
        }
    }

    #[test]
    fn test_verbose_global() {
        let cli = Cli::parse_from(["tpuslice", "-vvv", "topology", "4x4x4"]);
        assert_eq!(cli.verbose, 3);
    }
}
