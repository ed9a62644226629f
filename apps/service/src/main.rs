mod config;
mod journal;
mod lock;
mod monitoring;
mod orchestrator;
mod report;
mod state;
mod validation;

use std::future::Future;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use logger::LevelFilter;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::monitoring::checker::{PingProber, ProbeMethod, Prober, TcpProber};
use crate::monitoring::scheduler::local_now;
use crate::orchestrator::{CycleCoordinator, CycleError};
use crate::state::{JsonFileStore, StateStore};

/// Exit status when another cycle holds the run lock
const EXIT_BUSY: u8 = 75;

/// Gateway and reference-host reachability monitor
#[derive(Parser, Debug)]
#[command(name = "netwatch", version, about)]
struct Cli {
    /// Configuration file (created with defaults when missing)
    #[arg(short, long, env = "NETWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// More output; repeat for trace level
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Run one monitoring cycle and exit
    Run,
    /// Run cycles every interval until interrupted
    Watch,
    /// Validate and print the configuration
    Check,
    /// Print the persisted monitor state
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("netwatch: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = match cli.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    if let Err(e) = logger::init_with_error_log(level, &config.base_dir) {
        eprintln!("netwatch: logging unavailable: {e}");
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Check => {
            print!("{config}");
            ExitCode::SUCCESS
        }
        Commands::Status => print_status(&config),
        Commands::Run => match build_coordinator(&config) {
            Some(coordinator) => run_once(&coordinator, shutdown_signal()).await,
            None => ExitCode::FAILURE,
        },
        Commands::Watch => match build_coordinator(&config) {
            Some(coordinator) => watch_loop(&coordinator, config.cycle_interval()).await,
            None => ExitCode::FAILURE,
        },
    }
}

fn build_coordinator(config: &Config) -> Option<CycleCoordinator> {
    let prober: Arc<dyn Prober> = match config.probe_method {
        ProbeMethod::Icmp => Arc::new(PingProber::new()),
        ProbeMethod::Tcp => Arc::new(TcpProber::new(config.tcp_port)),
    };
    let notifier = match report::build_notifier(&config.notifier) {
        Ok(notifier) => notifier,
        Err(e) => {
            error!("Failed to set up notifier: {}", e);
            return None;
        }
    };
    let store = Arc::new(JsonFileStore::new(config.state_path()));

    match CycleCoordinator::from_config(config, prober, store, notifier) {
        Ok(coordinator) => {
            if coordinator.targets().is_empty() {
                warn!("No valid hosts configured, nothing will be probed");
            }
            Some(coordinator.with_run_lock(config.lock_path(), config.cycle_interval() * 10))
        }
        Err(e) => {
            error!("Invalid configuration: {}", e);
            None
        }
    }
}

async fn run_once(coordinator: &CycleCoordinator, shutdown: impl Future<Output = ()>) -> ExitCode {
    match coordinator.run_cycle_until(local_now(), shutdown).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(CycleError::Busy(path)) => {
            warn!("Skipping cycle, lock {} is held", path.display());
            ExitCode::from(EXIT_BUSY)
        }
        Err(CycleError::Cancelled) => ExitCode::FAILURE,
        Err(e) => {
            error!("Cycle failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn watch_loop(coordinator: &CycleCoordinator, every: Duration) -> ExitCode {
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    let stopped = |mut rx: watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!("Watching every {:?}, Ctrl-C to stop", every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stopped(stop_rx.clone()) => break,
        }

        match coordinator.run_cycle_until(local_now(), stopped(stop_rx.clone())).await {
            Ok(_) | Err(CycleError::Busy(_)) => {}
            Err(CycleError::Cancelled) => break,
            Err(e) => error!("Cycle failed: {}", e),
        }
    }

    info!("Stopped");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_status(config: &Config) -> ExitCode {
    let store = JsonFileStore::new(config.state_path());
    let snapshot = match store.load() {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            println!("No state recorded yet at {}", store.path().display());
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    println!("State: {}", store.path().display());
    println!("Hosts:");
    for (name, host) in &snapshot.hosts {
        let latency = host.last_latency_ms.map_or_else(|| "-".to_string(), |ms| format!("{ms:.1}ms"));
        println!(
            "  {name}: {} ({} failures, {}m down today, latency {latency})",
            host.status,
            host.consecutive_failures,
            host.daily_down_seconds / 60
        );
    }

    match (snapshot.isp_outage.active, snapshot.isp_outage.started_at) {
        (true, Some(since)) => println!("ISP outage: active since {}", since.format("%Y-%m-%d %H:%M")),
        (true, None) => println!("ISP outage: active"),
        (false, _) => println!("ISP outage: none"),
    }

    match snapshot.daily_summary.last_report_date {
        Some(date) => println!(
            "Last daily report: {} ({})",
            date,
            if snapshot.daily_summary.last_report_posted { "posted" } else { "pending" }
        ),
        None => println!("Last daily report: never"),
    }
    println!("Queued messages: {}", snapshot.outbox.len());

    ExitCode::SUCCESS
}
