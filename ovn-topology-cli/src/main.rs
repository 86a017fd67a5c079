use std::time::Duration;
use anyhow::{anyhow, Context};
use clap::Parser;
use nix::unistd::Uid;
use tracing_subscriber::prelude::*;
use tracing::level_filters::LevelFilter;
use ovn_topology_lib::orchestration::SubprocessRunner;
use ovn_topology_lib::orchestration::orchestrator::TopologyOrchestrator;
use ovn_topology_lib::parse_config;
use ovn_topology_schemas::cli_models::Opts;


#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() {
    std::process::exit(match run_app().await {
        Ok(_) => 0,
        Err(err) => {
            tracing::error!("ERROR: {}", err);
            err.chain().skip(1).for_each(|cause| tracing::error!("because: {}", cause));
            1
        }
    });
}

fn log_level(s: &str) -> anyhow::Result<LevelFilter> {
    match s.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::ERROR),
        "warn" => Ok(LevelFilter::WARN),
        "info" => Ok(LevelFilter::INFO),
        "debug" => Ok(LevelFilter::DEBUG),
        "trace" => Ok(LevelFilter::TRACE),
        _ => Err(anyhow!("Unknown Log LevelFilter {}", s)),
    }
}

/// The CLI arguments are processed, the topology file is loaded and validated, then the chosen
/// command is run over the selected projects. Any error ends the run with a non-zero exit code.
pub async fn run_app() -> anyhow::Result<()> {
    // Invoke cli option parsing
    let opts: Opts = Opts::parse();
    let mut e = None;
    // Determine and set log level
    let level = match &opts.verbosity {
        None => LevelFilter::INFO,
        Some(x) => match log_level(x) {
            Ok(l) => l,
            Err(err) => {
                e = Some(err);
                LevelFilter::INFO
            }
        },
    };

    let stdout_log = tracing_subscriber::fmt::layer();
    tracing_subscriber::registry()
        .with(stdout_log.with_filter(level))
        .init();
    e.map(|e| tracing::warn!("{}", e));

    let topology = parse_config(&opts.input, opts.project.as_deref()).await?;
    if !topology.settings.use_sudo && !Uid::effective().is_root() {
        tracing::warn!("use_sudo is disabled and not running as root, host commands will likely fail");
    }

    let runner = SubprocessRunner::from_settings(&topology.settings);
    let orchestrator = TopologyOrchestrator::new(&runner, topology)?;
    let report = orchestrator
        .run_with_deadline(&opts.sub_command, opts.deadline_secs.map(Duration::from_secs))
        .await
        .with_context(|| format!("running {}", opts.sub_command.name()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!("{} finished for {} projects", opts.sub_command.name(), report.projects.len());
    Ok(())
}
