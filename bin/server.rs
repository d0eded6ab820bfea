// Dues Ledger - Web Server
// JSON API + daily reminder scheduler sharing one ledger

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use dues_ledger::api::{router, AppState};
use dues_ledger::{
    lock, shared, AppConfig, Clock, CommandService, FanOut, FsAttachmentStore, LedgerStore, LogNotifier,
    Notifier, RateProvider, ReminderFeed, ReminderScheduler, SystemClock,
};

/// How many delivered reminders /api/reminders keeps
const FEED_CAPACITY: usize = 50;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    println!("🌐 Dues Ledger - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config_path = std::env::var("DUES_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("dues.json"));
    let config = AppConfig::load(Some(&config_path))?;

    // Open ledger
    let port = config.open_port()?;
    let (store, report) = LedgerStore::open(port, config.ledger_config())
        .with_context(|| format!("Failed to open ledger at {}", config.data_path.display()))?;
    if !report.is_clean() {
        warn!(
            quarantined_links = report.quarantined_links.len(),
            duplicate_members = report.duplicate_members.len(),
            quarantined_rows = report.quarantined_rows,
            "ledger loaded with quarantined entries"
        );
    }
    println!("✓ Ledger opened: {} ({})", config.data_path.display(), config.storage);

    let ledger = shared(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let rate = config.rate_provider();
    let rates: Arc<dyn RateProvider> = Arc::new(config.rate_chain(&rate));
    let feed = ReminderFeed::new(FEED_CAPACITY);

    // Reminder scheduler
    let sinks: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier), Arc::new(feed.clone())];
    let notifier: Arc<dyn Notifier> = Arc::new(FanOut(sinks));
    let scheduler = ReminderScheduler::new(ledger.clone(), rates.clone(), config.pricing(), notifier);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(clock.clone(), config.tick_interval(), shutdown_rx));
    println!("✓ Reminder scheduler running every {}s", config.tick_interval_secs);

    // Build router
    let commands = CommandService::new(
        ledger.clone(),
        clock,
        rates,
        Arc::new(FsAttachmentStore::new(&config.attachments_dir)),
        config.pricing(),
    );
    let app = router(AppState { commands, feed, rate });

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    println!("\n🚀 Server running on http://{}", config.bind_addr);
    println!("   API: http://{}/api/status", config.bind_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop the scheduler between evaluations, then write the final state
    if shutdown_tx.send(true).is_err() {
        warn!("scheduler already stopped");
    }
    if let Err(e) = scheduler_task.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }

    lock(&ledger).flush().context("Final save failed")?;
    println!("👋 Ledger saved, bye");

    Ok(())
}
