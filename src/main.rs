use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use dues_ledger::export::{export_to_path, ledger_rows, status_rows, to_csv_string};
use dues_ledger::{
    lock, shared, Actor, AppConfig, Clock, CommandService, FixedClock, FsAttachmentStore, LedgerStore,
    LogNotifier, PeriodId, RateProvider, ReminderScheduler, SqliteStore, StorageKind, SystemClock,
};

#[derive(Parser)]
#[command(name = "dues-ledger")]
#[command(about = "Monthly dues ledger for a shared subscription", version)]
struct Cli {
    /// Config file (JSON); DUES_* environment variables override it
    #[arg(long, short, global = true, default_value = "dues.json")]
    config: PathBuf,

    /// Pretend today is this date (YYYY-MM-DD)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Payment status of every member for the active period
    Status,
    /// Payment history of one member
    History { id: String },
    /// Register a payment for the active period
    Pay {
        id: String,
        /// Display name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
        /// File to store as payment proof
        #[arg(long)]
        proof: Option<PathBuf>,
    },
    /// Undo a payment for the active period
    Unpay { id: String },
    /// Enroll a member as pending for the active period
    Add { id: String, name: String },
    /// Remove a member, its links and its auto-pay flag
    Remove { id: String },
    /// Bill a secondary account under a primary one
    Link { primary: String, secondary: String },
    /// Change the day of the month payments are due
    SetDueDay { day: u32 },
    /// Enable (or disable with --off) auto-pay for a member
    AutoPay {
        id: String,
        #[arg(long)]
        off: bool,
    },
    /// Mark a member paid (active period unless --period is given)
    MarkPaid {
        id: String,
        #[arg(long)]
        period: Option<PeriodId>,
    },
    /// Price breakdown and payment instructions
    Price,
    /// Run one reminder evaluation now
    Tick,
    /// Export the ledger (or one period) as CSV
    Export {
        #[arg(long)]
        period: Option<PeriodId>,
        /// Output file; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Audit trail for a member (sqlite storage only)
    Audit { id: String },
}

/// The local operator owns the data files, so CLI admin commands run as admin
fn operator() -> Actor {
    Actor::admin("cli", "operator")
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        eprintln!("❌ {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load(Some(&cli.config))?;

    let clock: Arc<dyn Clock> = match cli.today {
        Some(date) => Arc::new(FixedClock::new(date)),
        None => Arc::new(SystemClock),
    };

    let port = config.open_port()?;
    let (store, report) = LedgerStore::open(port, config.ledger_config())
        .with_context(|| format!("Failed to open ledger at {}", config.data_path.display()))?;
    if !report.is_clean() {
        println!(
            "⚠️  Ledger loaded with {} quarantined link(s), {} duplicate member(s) and {} skipped payment row(s)",
            report.quarantined_links.len(),
            report.duplicate_members.len(),
            report.quarantined_rows
        );
    }

    let rates: Arc<dyn RateProvider> = Arc::new(config.rate_chain(&config.rate_provider()));
    let service = CommandService::new(
        shared(store),
        clock.clone(),
        rates.clone(),
        Arc::new(FsAttachmentStore::new(&config.attachments_dir)),
        config.pricing(),
    );

    match cli.command {
        Commands::Status => {
            println!("📋 {}", service.query_status());
        }
        Commands::History { id } => {
            println!("📜 {}", service.query_history(&id)?);
        }
        Commands::Pay { id, name, proof } => {
            let actor = Actor::member(id.clone(), name.unwrap_or(id));
            if let Some(path) = proof {
                let blob = std::fs::read(&path)
                    .with_context(|| format!("Failed to read proof {}", path.display()))?;
                println!("📎 {}", service.submit_proof(&actor, &blob)?);
            }
            println!("✅ {}", service.register_payment(&actor)?);
        }
        Commands::Unpay { id } => {
            let actor = Actor::member(id.clone(), id);
            println!("↩️  {}", service.unregister_payment(&actor)?);
        }
        Commands::Add { id, name } => {
            println!("➕ {}", service.add_member(&id, &name)?);
        }
        Commands::Remove { id } => {
            println!("🗑️  {}", service.remove_member(&operator(), &id)?);
        }
        Commands::Link { primary, secondary } => {
            println!("🔗 {}", service.link_accounts(&operator(), &primary, &secondary)?);
        }
        Commands::SetDueDay { day } => {
            println!("📅 {}", service.set_due_day(&operator(), day)?);
        }
        Commands::AutoPay { id, off } => {
            println!("🔁 {}", service.set_auto_pay(&operator(), &id, !off)?);
        }
        Commands::MarkPaid { id, period } => {
            println!("✅ {}", service.mark_paid_admin(&operator(), &id, period)?);
        }
        Commands::Price => {
            println!("💵 {}", service.show_price());
        }
        Commands::Tick => {
            let mut scheduler = ReminderScheduler::new(
                service.ledger().clone(),
                rates,
                config.pricing(),
                Arc::new(LogNotifier),
            );
            let tick = scheduler.tick(clock.today());

            println!("⏰ Reminder check for {}", tick.today);
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            println!("✓ Active period: {} ({} day(s) until due)", tick.period, tick.days_until_due);
            println!("✓ State: {:?}", tick.state);
            if !tick.auto_paid.is_empty() {
                println!("✓ Auto-paid: {}", tick.auto_paid.join(", "));
            }
            match tick.reminder {
                Some(reminder) if reminder.everyone_paid() => println!("🎉 Everyone has paid"),
                Some(reminder) => println!("🔔 Reminder sent, {} pending", reminder.pending.len()),
                None => println!("💤 No reminder due"),
            }
        }
        Commands::Export { period, out } => {
            let rows = {
                let store = lock(service.ledger());
                match period {
                    Some(p) => status_rows(store.ledger(), p),
                    None => ledger_rows(store.ledger()),
                }
            };
            match out {
                Some(path) => {
                    let written = export_to_path(&path, &rows)?;
                    println!("📤 Exported {} row(s) to {}", written, path.display());
                }
                None => print!("{}", to_csv_string(&rows)?),
            }
        }
        Commands::Audit { id } => {
            if config.storage != StorageKind::Sqlite {
                println!("ℹ️  The audit trail is kept only with sqlite storage (current: {})", config.storage);
                return Ok(());
            }
            let member_id = lock(service.ledger()).ledger().resolve(&id);
            let audit = SqliteStore::open(&config.data_path)?;
            let events = audit.events_for(&member_id)?;

            println!("🔍 Audit trail for {} ({} event(s))", member_id, events.len());
            println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
            for event in events {
                println!(
                    "{}  {:<24} by {:<12} {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.event_type,
                    event.actor,
                    event.data
                );
            }
        }
    }

    Ok(())
}
