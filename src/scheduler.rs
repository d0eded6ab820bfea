// ⏰ Reminder Scheduler - daily evaluation of "is the due date close?"
//
// Each tick:
//   1. reload the ledger from the store (absorb out-of-process edits)
//   2. mark auto-pay members paid for the active period
//   3. compute days until the due date
//        2 days → two-day warning
//        0 days → due today
//        other  → idle
//   4. deliver the reminder (pending members + price breakdown)
//
// Failures in steps 1, 2 and 4 are logged and suppressed; the next tick
// starts fresh. A missed tick is never replayed.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::ledger::MemberStatus;
use crate::period::{days_until_due, resolve_period, PeriodId};
use crate::rates::{PriceInfo, PricingConfig, RateProvider};
use crate::store::{lock, SharedLedger};

pub const TWO_DAY_WARNING: i64 = 2;
pub const DUE_TODAY: i64 = 0;

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReminderState {
    Idle,
    Due2Days,
    DueToday,
    /// Reminder for the current (period, delta) has been delivered
    Fired,
}

/// Pure transition: which state does `today` call for?
pub fn evaluate(today: NaiveDate, due_day: u32) -> ReminderState {
    match days_until_due(today, due_day) {
        TWO_DAY_WARNING => ReminderState::Due2Days,
        DUE_TODAY => ReminderState::DueToday,
        _ => ReminderState::Idle,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderKind {
    TwoDaysLeft,
    DueToday,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reminder {
    pub period: PeriodId,
    pub due_date: NaiveDate,
    pub kind: ReminderKind,
    pub pending: Vec<MemberStatus>,
    pub price: PriceInfo,
}

impl Reminder {
    pub fn everyone_paid(&self) -> bool {
        self.pending.is_empty()
    }
}

// ============================================================================
// NOTIFIERS
// ============================================================================

pub trait Notifier: Send + Sync {
    fn notify(&self, reminder: &Reminder) -> anyhow::Result<()>;
}

/// Writes reminders to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
        let pending: Vec<&str> = reminder
            .pending
            .iter()
            .map(|m| m.display_name.as_str())
            .collect();
        info!(
            period = %reminder.period,
            due = %reminder.due_date,
            kind = ?reminder.kind,
            pending = ?pending,
            "payment reminder"
        );
        Ok(())
    }
}

/// Keeps the most recent reminders so a chat/web layer can pick them up
#[derive(Debug, Clone)]
pub struct ReminderFeed {
    inner: Arc<Mutex<VecDeque<Reminder>>>,
    capacity: usize,
}

impl ReminderFeed {
    pub fn new(capacity: usize) -> Self {
        ReminderFeed {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity: capacity.max(1),
        }
    }

    /// Newest last
    pub fn recent(&self) -> Vec<Reminder> {
        match self.inner.lock() {
            Ok(queue) => queue.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl Notifier for ReminderFeed {
    fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
        let mut queue = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("reminder feed lock poisoned"))?;
        if queue.len() == self.capacity {
            queue.pop_front();
        }
        queue.push_back(reminder.clone());
        Ok(())
    }
}

/// Fan a reminder out to several notifiers; fails if any of them fails
pub struct FanOut(pub Vec<Arc<dyn Notifier>>);

impl Notifier for FanOut {
    fn notify(&self, reminder: &Reminder) -> anyhow::Result<()> {
        let mut failures = Vec::new();
        for notifier in &self.0 {
            if let Err(e) = notifier.notify(reminder) {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(failures.join("; ")))
        }
    }
}

// ============================================================================
// SCHEDULER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub today: NaiveDate,
    pub period: PeriodId,
    pub days_until_due: i64,
    pub state: ReminderState,
    pub auto_paid: Vec<String>,
    pub reminder: Option<Reminder>,
}

pub struct ReminderScheduler {
    ledger: SharedLedger,
    rates: Arc<dyn RateProvider>,
    pricing: PricingConfig,
    notifier: Arc<dyn Notifier>,
    state: ReminderState,
    last_fired: Option<(PeriodId, i64)>,
}

impl ReminderScheduler {
    pub fn new(
        ledger: SharedLedger,
        rates: Arc<dyn RateProvider>,
        pricing: PricingConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        ReminderScheduler {
            ledger,
            rates,
            pricing,
            notifier,
            state: ReminderState::Idle,
            last_fired: None,
        }
    }

    pub fn state(&self) -> ReminderState {
        self.state
    }

    /// One evaluation for `today`
    pub fn tick(&mut self, today: NaiveDate) -> TickReport {
        // Ledger work under the exclusion boundary; rate lookup and delivery
        // happen after the lock is released.
        let (period, due_day, auto_paid, pending) = {
            let mut store = lock(&self.ledger);

            if let Err(e) = store.reload() {
                warn!(error = %e, "reload before tick failed, using in-memory ledger");
            }

            let due_day = store.due_day();
            let period = resolve_period(today, due_day);

            let auto_paid = match store.apply_auto_pay(period) {
                Ok(marked) => marked,
                Err(e) => {
                    warn!(error = %e, %period, "auto-pay not applied this tick");
                    Vec::new()
                }
            };

            (period, due_day, auto_paid, store.pending_for(period))
        };

        let delta = days_until_due(today, due_day);
        let evaluated = evaluate(today, due_day);
        debug!(%today, %period, delta, state = ?evaluated, "reminder tick");

        let kind = match evaluated {
            ReminderState::Due2Days => ReminderKind::TwoDaysLeft,
            ReminderState::DueToday => ReminderKind::DueToday,
            _ => {
                self.state = ReminderState::Idle;
                return self.report(today, period, delta, auto_paid, None);
            }
        };

        if self.last_fired == Some((period, delta)) {
            self.state = ReminderState::Fired;
            return self.report(today, period, delta, auto_paid, None);
        }

        let reminder = Reminder {
            period,
            due_date: period.due_date(due_day),
            kind,
            pending,
            price: PriceInfo::lookup(self.rates.as_ref(), &self.pricing),
        };

        match self.notifier.notify(&reminder) {
            Ok(()) => {
                info!(%period, kind = ?kind, pending = reminder.pending.len(), "reminder delivered");
                self.state = ReminderState::Fired;
                self.last_fired = Some((period, delta));
                self.report(today, period, delta, auto_paid, Some(reminder))
            }
            Err(e) => {
                warn!(error = %e, %period, "reminder delivery failed");
                self.state = evaluated;
                self.report(today, period, delta, auto_paid, None)
            }
        }
    }

    fn report(
        &self,
        today: NaiveDate,
        period: PeriodId,
        days_until_due: i64,
        auto_paid: Vec<String>,
        reminder: Option<Reminder>,
    ) -> TickReport {
        TickReport {
            today,
            period,
            days_until_due,
            state: self.state,
            auto_paid,
            reminder,
        }
    }

    /// Tick every `every` until `shutdown` flips to true (or its sender drops).
    ///
    /// Cancellation is only observed between evaluations, never inside one.
    pub async fn run(mut self, clock: Arc<dyn Clock>, every: Duration, mut shutdown: watch::Receiver<bool>) -> Self {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(every_secs = every.as_secs(), "reminder scheduler started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    self.tick(clock.today());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("reminder scheduler stopped");
        self
    }
}

// ============================================================================
// TESTS
// ============================================================================
