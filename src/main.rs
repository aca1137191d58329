use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use tpuslice::cli::{
    apply_serve_overrides, describe_topology, format_node_list, format_slice_list,
    format_status, format_topology, format_validation, format_workload_list, serve, slice_state,
    validate_job, Cli, Commands, ControlPlaneClient, GetResource,
};
use tpuslice::config::load_config;
use tpuslice::slice::slice_name;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref()).context("failed to load config")?;

    match cli.command {
        Commands::Serve(args) => {
            let config = apply_serve_overrides(config, &args)?;
            serve(config).await?;
        }
        Commands::Topology { shape } => {
            print!("{}", format_topology(&describe_topology(&shape)?));
        }
        Commands::SliceName {
            namespace,
            job,
            replicated_job,
            index,
        } => {
            println!("{}", slice_name(&namespace, &job, &replicated_job, index));
        }
        Commands::State(args) => {
            let timeout = args
                .staleness_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.staleness_timeout());
            let (slice, state) = slice_state(&args.file, timeout)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            println!("{}\t{}", slice.metadata.name, state);
        }
        Commands::Validate { file } => {
            let result = validate_job(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            print!("{}", format_validation(&result));
            if !result.valid {
                process::exit(2);
            }
        }
        Commands::Get(args) => {
            let client = ControlPlaneClient::from_config(args.server.as_deref(), &config);
            let output = match args.resource {
                GetResource::Slices => format_slice_list(&client.list_slices().await?),
                GetResource::Workloads => format_workload_list(
                    &client.list_workloads().await?,
                    &config.admission_check_name,
                ),
                GetResource::Nodes => format_node_list(&client.list_nodes().await?),
            };
            print!("{}", output);
        }
        Commands::Status { server } => {
            let client = ControlPlaneClient::from_config(server.as_deref(), &config);
            print!("{}", format_status(&client.status().await?));
        }
    }
    Ok(())
}
