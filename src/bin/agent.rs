use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use tracing::{info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    actors::{SchedulerHandle, SchedulerSettings},
    channels::build_channels,
    collectors::default_collectors,
    config::read_config_file,
    monitors::MonitoringCycle,
    report::generate_report,
    storage::open_store,
};

#[derive(Debug, Clone, Parser)]
#[command(name = "vigil-agent", about = "Host health monitoring agent")]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run a single cycle and print its report as JSON
    Once,
    /// Print the health report for a recent period as JSON
    Report {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
}

fn init(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter =
        filter::Targets::new().with_targets(vec![("vigil", level), ("vigil_agent", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)
        .with_context(|| format!("failed to load config from {}", args.file))?;
    let store = open_store(&config.storage)
        .await
        .context("failed to open metrics store")?;

    let health = store.health_check().await?;
    if !health.healthy {
        warn!("storage unhealthy: {}", health.message);
    }
    info!("{}", store.get_stats().await?);

    if let Some(Command::Report { hours }) = args.command {
        let report = generate_report(store.as_ref(), hours, Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        store.close().await?;
        return Ok(());
    }

    let collectors = default_collectors(&config);
    let channels = build_channels(&config.channels);
    info!(
        "monitoring {} every {:?} with {} collectors and {} channels",
        config.host,
        config.interval,
        collectors.len(),
        channels.len()
    );

    let settings = SchedulerSettings::from_config(&config);
    let cycle = Arc::new(MonitoringCycle::new(
        Arc::new(config),
        collectors,
        store.clone(),
        channels,
    ));

    if let Some(Command::Once) = args.command {
        let result = cycle.run_cycle().await;
        store.close().await?;
        let report = result.context("monitoring cycle failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let handle = SchedulerHandle::spawn(cycle, settings);
    wait_for_shutdown()
        .await
        .context("failed to listen for shutdown signals")?;
    info!("shutdown requested");
    handle.shutdown().await?;

    Ok(())
}
