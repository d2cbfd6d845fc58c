use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use venmo_ledger::{
    Config, CsvLedger, FilterCriteria, GmailSource, LedgerBackend, LedgerSink, ProcessedIdStore,
    ReconciliationLoop, RunMode, SqliteLedger,
};

/// Venmo payment notifications → ledger
#[derive(Parser, Debug)]
#[command(name = "venmo-ledger", version)]
struct Cli {
    /// Run a single cycle and exit instead of polling
    #[arg(long)]
    once: bool,
}

// LOG_LEVEL first, RUST_LOG second; unparseable directives fall back to info
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    dotenv::dotenv().ok();
    let config = Config::from_env().context("Invalid configuration")?;
    init_tracing(&config);

    info!(version = venmo_ledger::VERSION, "Venmo ledger starting");
    info!(
        ledger = %config.ledger_path.display(),
        label = %config.label,
        poll_seconds = config.poll_interval.as_secs(),
        "Config loaded"
    );

    let store = ProcessedIdStore::new(&config.processed_ids_path);
    store.ensure_parent_dir()?;

    let token = config.require_access_token()?;
    let source = GmailSource::new(&config.api_base, token);
    info!("Checking inbox credentials...");
    let labels = source.check_access().await.context("Inbox authentication failed")?;
    info!(labels, "Authentication successful");

    let mode = if cli.once { RunMode::Once } else { RunMode::Continuous };

    match config.ledger_backend {
        LedgerBackend::Csv => {
            let ledger = CsvLedger::new(&config.ledger_path);
            run(&config, source, ledger, store, mode).await
        }
        LedgerBackend::Sqlite => {
            let ledger = SqliteLedger::open(&config.ledger_path).with_context(|| {
                format!("Failed to open ledger {}", config.ledger_path.display())
            })?;
            run(&config, source, ledger, store, mode).await
        }
    }
}

async fn run<L: LedgerSink>(
    config: &Config,
    source: GmailSource,
    ledger: L,
    store: ProcessedIdStore,
    mode: RunMode,
) -> Result<()> {
    let filter = FilterCriteria::new(&config.label, &config.sender);
    let mut reconciler =
        ReconciliationLoop::new(source, ledger, store, filter, config.poll_interval)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if mode == RunMode::Continuous {
        info!(
            seconds = config.poll_interval.as_secs(),
            "Starting continuous polling (Ctrl+C to stop)"
        );
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Could not listen for Ctrl+C");
                // Dropping the sender would read as a shutdown request
                std::future::pending::<()>().await;
            }
            info!("Interrupt received, finishing current cycle");
            let _ = shutdown_tx.send(true);
        });
    }

    let summary = reconciler.run(mode, shutdown_rx).await?;
    if summary.ledger_failures > 0 {
        anyhow::bail!(
            "{} ledger write(s) failed; {} payment(s) written to {}",
            summary.ledger_failures,
            summary.payments_written,
            config.ledger_path.display()
        );
    }

    info!(
        cycles = summary.cycles,
        failed = summary.failed_cycles,
        written = summary.payments_written,
        "Complete!"
    );

    Ok(())
}
