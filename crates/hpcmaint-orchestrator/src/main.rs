//! hpcmaint — automated OCI + Slurm maintenance orchestrator
//!
//! ```bash
//! # One full pass
//! hpcmaint run
//!
//! # Periodic loop (15m interval by default)
//! hpcmaint loop --dry-run
//!
//! # Discover, drain and schedule only
//! hpcmaint stage
//!
//! # Reconcile events already past SCHEDULED
//! hpcmaint catchup --host GPU-332
//! ```

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hpcmaint_core::{HealthChecker, MaintError};
use hpcmaint_orchestrator::context::PassContext;
use hpcmaint_orchestrator::health::{AlwaysPass, HttpProbe};
use hpcmaint_orchestrator::inventory::MgmtCli;
use hpcmaint_orchestrator::machine::PassMode;
use hpcmaint_orchestrator::oci::OciCli;
use hpcmaint_orchestrator::report::JsonOut;
use hpcmaint_orchestrator::slurm::SlurmCli;
use hpcmaint_orchestrator::{discovery, drain, finalize, health, maintenance, orchestrator, report};
use hpcmaint_orchestrator::{AuditSink, OrchestratorConfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hpcmaint")]
#[command(about = "Automated OCI + Slurm maintenance orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full maintenance workflow once
    Run {
        /// Do not make changes; show what would be done
        #[arg(long, short = 'n')]
        dry_run: bool,
    },
    /// Run the periodic maintenance loop
    Loop {
        /// Do not make changes; show what would be done each iteration
        #[arg(long, short = 'n')]
        dry_run: bool,
    },
    /// Discover -> drain -> schedule; skips health/finalize
    Stage {
        #[arg(long, short = 'n')]
        dry_run: bool,
    },
    /// Reconcile events already past SCHEDULED (no drain/schedule)
    Catchup {
        /// Limit to a specific hostname
        #[arg(long)]
        host: Option<String>,
        #[arg(long, short = 'n')]
        dry_run: bool,
    },
    /// Preview the job set; read-only
    Discover {
        /// Output JSON to stdout (no FILE) or write to FILE
        #[arg(long, num_args = 0..=1, default_missing_value = "-", value_name = "FILE")]
        json: Option<String>,
        /// Also list events rejected by the filters
        #[arg(long)]
        all: bool,
    },
    /// Show all instance maintenance events; read-only
    Report {
        /// Include CANCELED events
        #[arg(long)]
        include_canceled: bool,
        /// Exclude events in the given state (repeatable)
        #[arg(short = 'x', long = "exclude", value_name = "STATE")]
        exclude: Vec<String>,
        #[arg(long, num_args = 0..=1, default_missing_value = "-", value_name = "FILE")]
        json: Option<String>,
    },
    /// Run the drain phase for one host
    Drain { hostname: String },
    /// Run the maintenance-polling phase for one host
    Maintenance { hostname: String },
    /// Run the health phase for one host
    Health { hostname: String },
    /// Run the finalize phase for one host
    Finalize { hostname: String },
}

fn json_out(arg: Option<String>) -> Option<JsonOut> {
    arg.map(|value| JsonOut {
        to: (value != "-").then(|| value.into()),
    })
}

fn init_tracing(cfg: &OrchestratorConfig) {
    let filter =
        EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer();
    let file = cfg.log_file.as_ref().and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(std::sync::Mutex::new(file)),
            ),
            Err(e) => {
                eprintln!("could not open log file {}: {e}", path.display());
                None
            }
        }
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
}

/// Build the production context: OCI CLI, Slurm CLI, management inventory,
/// and the configured health checker.
fn build_context(
    cfg: OrchestratorConfig,
    cancel: watch::Receiver<bool>,
    dry_run: bool,
) -> Result<PassContext, MaintError> {
    let audit = Arc::new(AuditSink::open(&cfg.events_log_file)?);
    let health: Arc<dyn HealthChecker> = match &cfg.health_check_url {
        Some(template) => Arc::new(HttpProbe::new(template.clone(), cfg.call_timeout)?),
        None => Arc::new(AlwaysPass),
    };
    Ok(PassContext {
        cloud: Arc::new(OciCli::new(
            cfg.tenancy_ocid.clone(),
            cfg.region.clone(),
            cfg.call_timeout,
        )),
        wlm: Arc::new(SlurmCli::new(cfg.call_timeout)),
        inventory: Arc::new(MgmtCli::new(cfg.inventory_cmd.clone(), cfg.call_timeout)),
        health,
        audit,
        scheduled: Arc::new(AtomicU32::new(0)),
        cancel,
        dry_run,
        cfg: Arc::new(cfg),
    })
}

/// Find the job for one hostname, looking at SCHEDULED events first and
/// already-running ones second.
async fn find_job(
    ctx: &PassContext,
    hostname: &str,
) -> Result<Option<hpcmaint_core::Job>, MaintError> {
    for mode in [discovery::DiscoveryMode::Standard, discovery::DiscoveryMode::Catchup] {
        let discovered = discovery::discover(ctx, mode, Some(hostname)).await?;
        if let Some(job) = discovered.jobs.into_iter().next() {
            return Ok(Some(job));
        }
    }
    Ok(None)
}

/// The single-phase subcommands.
#[derive(Debug, Clone, Copy)]
enum Phase {
    Drain,
    Maintenance,
    Health,
    Finalize,
}

async fn run_single_phase(ctx: &PassContext, hostname: &str, phase: Phase) -> i32 {
    let job = match find_job(ctx, hostname).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            eprintln!("No maintenance job/event found for hostname '{hostname}'.");
            return 1;
        }
        Err(e) => {
            error!(error = %e, "discovery failed");
            return 2;
        }
    };

    let result = match phase {
        Phase::Drain => drain::execute(ctx, &job).await,
        Phase::Maintenance => maintenance::wait_complete(ctx, &job).await.map(|_| ()),
        Phase::Health => health::execute(ctx, &job.hostname).await.map(|report| {
            info!(host = %job.hostname, passed = report.passed(), "health verdict");
        }),
        Phase::Finalize => finalize::execute(ctx, &job, None).await.map(|_| ()),
    };
    match result {
        Ok(()) => 0,
        Err(e) => {
            error!(host = %hostname, kind = e.kind(), error = %e, "phase failed");
            2
        }
    }
}

async fn run_app() -> i32 {
    let cli = Cli::parse();

    let cfg = match OrchestratorConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };
    init_tracing(&cfg);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown().await;
        warn!("shutdown requested, finishing in-flight work");
        let _ = cancel_tx.send(true);
    });

    let dry_run = matches!(
        &cli.command,
        Commands::Run { dry_run: true }
            | Commands::Loop { dry_run: true }
            | Commands::Stage { dry_run: true }
            | Commands::Catchup { dry_run: true, .. }
    );
    let ctx = match build_context(cfg, cancel_rx, dry_run) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return 1;
        }
    };

    let result: Result<i32, MaintError> = match cli.command {
        Commands::Run { .. } => orchestrator::run_pass(&ctx, PassMode::Full, None)
            .await
            .map(|summary| {
                report::print_outcomes(&summary);
                summary.exit_code()
            }),
        Commands::Loop { .. } => orchestrator::run_loop(&ctx, PassMode::Full).await,
        Commands::Stage { .. } => orchestrator::run_pass(&ctx, PassMode::Stage, None)
            .await
            .map(|summary| {
                report::print_outcomes(&summary);
                summary.exit_code()
            }),
        Commands::Catchup { host, .. } => {
            orchestrator::run_pass(&ctx, PassMode::Catchup, host.as_deref())
                .await
                .map(|summary| {
                    report::print_outcomes(&summary);
                    summary.exit_code()
                })
        }
        Commands::Discover { json, all } => report::run_discover(&ctx, json_out(json), all)
            .await
            .map(|()| 0),
        Commands::Report {
            include_canceled,
            exclude,
            json,
        } => report::run_report(&ctx, include_canceled, &exclude, json_out(json))
            .await
            .map(|()| 0),
        Commands::Drain { hostname } => {
            return run_single_phase(&ctx, &hostname, Phase::Drain).await;
        }
        Commands::Maintenance { hostname } => {
            return run_single_phase(&ctx, &hostname, Phase::Maintenance).await;
        }
        Commands::Health { hostname } => {
            return run_single_phase(&ctx, &hostname, Phase::Health).await;
        }
        Commands::Finalize { hostname } => {
            return run_single_phase(&ctx, &hostname, Phase::Finalize).await;
        }
    };

    match result {
        Ok(code) => code,
        Err(e @ MaintError::Config(_)) => {
            eprintln!("configuration error: {e}");
            1
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "pass failed");
            2
        }
    }
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut term = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(term) => term,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() {
    let code = run_app().await;
    std::process::exit(code);
}
