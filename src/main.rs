//! GpuFleet CLI - check the state of GPU servers
//!
//! Prints free GPUs (or a full listing) for every server, once or in a loop.

use clap::Parser;
use gpufleet::config::{load_affinity_config, load_server_list, CliArgs, MonitorConfig};
use gpufleet::error::{FleetError, Result};
use gpufleet::exec::{ShellRunner, Target};
use gpufleet::report::FleetReporter;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_logging(args.verbose);

    // Handle result
    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,gpufleet={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: CliArgs) -> Result<()> {
    let config = MonitorConfig::from_cli(&args)?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_fleet(config))
}

async fn run_fleet(config: MonitorConfig) -> Result<()> {
    let servers = resolve_servers(&config)?;
    let targets = config.targets(&servers);

    let mut reporter = FleetReporter::new(Arc::new(ShellRunner::new()), config.report.clone())
        .with_parallelism(config.parallelism);

    if config.taskset {
        match load_affinity_config(&config.taskset_file) {
            Ok(affinity) => reporter = reporter.with_affinity(affinity),
            Err(e) => tracing::error!("{}; CPU pinning disabled", e),
        }
    }

    if !config.daemon {
        print_pass(&reporter, &targets).await;
        return Ok(());
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt, exiting");
                break;
            }
            _ = async {
                println!("=== {} ===", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
                print_pass(&reporter, &targets).await;
                tokio::time::sleep(config.interval).await;
            } => {}
        }
    }

    Ok(())
}

fn resolve_servers(config: &MonitorConfig) -> Result<Vec<String>> {
    let servers = if config.servers.is_empty() {
        load_server_list(&config.server_file)?
    } else {
        config.servers.clone()
    };

    if servers.is_empty() {
        return Err(FleetError::NoServers);
    }
    Ok(servers)
}

async fn print_pass(reporter: &FleetReporter, targets: &[Target]) {
    for report in reporter.run_pass(targets).await {
        println!("{}", report);
    }
}
