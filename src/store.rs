// 🔒 Ledger Store - write-through wrapper around the ledger aggregate
//
// Every mutation follows the same path:
//   1. clone the current ledger
//   2. apply the change in memory
//   3. save the full snapshot through the persistence port
//   4. on save failure restore the clone and report PersistenceError
//
// No change survives in memory unless it reached the durable medium. A change
// that leaves the ledger untouched skips the save.

use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{LedgerError, LedgerResult, PersistenceError};
use crate::ledger::{Enrollment, Ledger, LedgerConfig, LoadReport, MemberStatus, PaymentChange, RemovedMember};
use crate::links::LinkOutcome;
use crate::period::PeriodId;
use crate::persistence::{LedgerEvent, PersistencePort};

/// The single exclusion boundary shared by command handlers and the scheduler
pub type SharedLedger = Arc<Mutex<LedgerStore>>;

pub fn shared(store: LedgerStore) -> SharedLedger {
    Arc::new(Mutex::new(store))
}

/// Lock the shared ledger, recovering the guard if a holder panicked.
///
/// A panic cannot leave a half-applied change: mutations run on a clone-backed
/// commit and are restored on failure.
pub fn lock(shared: &SharedLedger) -> MutexGuard<'_, LedgerStore> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct LedgerStore {
    ledger: Ledger,
    port: Box<dyn PersistencePort>,
}

impl LedgerStore {
    /// Load from the port, or start empty with `initial` config if nothing
    /// was saved yet
    pub fn open(mut port: Box<dyn PersistencePort>, initial: LedgerConfig) -> LedgerResult<(Self, LoadReport)> {
        let (ledger, mut report) = match port.load()? {
            Some(snapshot) => Ledger::from_snapshot(snapshot)?,
            None => {
                info!(store = %port.describe(), "no saved ledger, starting empty");
                (Ledger::new(initial), LoadReport::default())
            }
        };
        report.quarantined_rows = port.quarantined_rows();

        info!(
            store = %port.describe(),
            members = ledger.member_count(),
            due_day = ledger.due_day(),
            "ledger opened"
        );

        Ok((LedgerStore { ledger, port }, report))
    }

    /// Read-only view of the current ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn due_day(&self) -> u32 {
        self.ledger.due_day()
    }

    pub fn describe(&self) -> String {
        self.port.describe()
    }

    // ------------------------------------------------------------------------
    // Commit machinery
    // ------------------------------------------------------------------------

    /// Apply `change`, persist if it reports a modification, roll back on any
    /// failure. `change` returns (value, modified, optional audit event).
    fn commit<T, F>(&mut self, change: F) -> LedgerResult<T>
    where
        F: FnOnce(&mut Ledger) -> LedgerResult<(T, bool, Option<LedgerEvent>)>,
    {
        let before = self.ledger.clone();

        let (value, modified, event) = match change(&mut self.ledger) {
            Ok(out) => out,
            Err(e) => {
                self.ledger = before;
                return Err(e);
            }
        };

        if !modified {
            return Ok(value);
        }

        if let Err(e) = self.port.save(&self.ledger.to_snapshot()) {
            warn!(store = %self.port.describe(), error = %e, "save failed, change rolled back");
            self.ledger = before;
            return Err(LedgerError::Persistence(e));
        }

        if let Some(event) = event {
            info!(event = %event.event_type, entity = %event.entity_id, actor = %event.actor, "ledger committed");
            if let Err(e) = self.port.record_event(&event) {
                warn!(error = %e, "audit event not recorded");
            }
        }

        Ok(value)
    }

    /// Save the current state as-is (used at shutdown)
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        self.port.save(&self.ledger.to_snapshot())
    }

    /// Replace the in-memory ledger with what the port holds now, absorbing
    /// out-of-process edits. On failure the current ledger is kept.
    pub fn reload(&mut self) -> LedgerResult<LoadReport> {
        match self.port.load()? {
            Some(snapshot) => {
                let (ledger, mut report) = Ledger::from_snapshot(snapshot)?;
                report.quarantined_rows = self.port.quarantined_rows();
                self.ledger = ledger;
                Ok(report)
            }
            None => Ok(LoadReport::default()),
        }
    }

    // ------------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------------

    pub fn register_payment(&mut self, id: &str, display_name: &str, period: PeriodId) -> LedgerResult<PaymentChange> {
        self.commit(|ledger| {
            let change = ledger.register_payment(id, display_name, period);
            let event = LedgerEvent::new(
                "payment_registered",
                &change.member_id,
                json!({ "period": period, "created": change.created, "via": id }),
                id,
            );
            let modified = change.changed();
            Ok((change, modified, Some(event)))
        })
    }

    pub fn unregister_payment(&mut self, id: &str, period: PeriodId) -> LedgerResult<bool> {
        self.commit(|ledger| {
            let flipped = ledger.unregister_payment(id, period)?;
            let event = LedgerEvent::new(
                "payment_unregistered",
                &ledger.resolve(id),
                json!({ "period": period }),
                id,
            );
            Ok((flipped, flipped, Some(event)))
        })
    }

    pub fn register_initial(&mut self, id: &str, display_name: &str, period: PeriodId) -> LedgerResult<Enrollment> {
        self.commit(|ledger| {
            let enrollment = ledger.register_initial(id, display_name, period);
            let event = LedgerEvent::new(
                "member_enrolled",
                &enrollment.member_id,
                json!({ "period": period, "created": enrollment.created }),
                id,
            );
            let modified = enrollment.changed();
            Ok((enrollment, modified, Some(event)))
        })
    }

    /// Enroll a whole roster with a single write
    pub fn enroll_roster(&mut self, roster: &[(String, String)], period: PeriodId) -> LedgerResult<Vec<Enrollment>> {
        self.commit(|ledger| {
            let enrollments: Vec<Enrollment> = roster
                .iter()
                .map(|(id, name)| ledger.register_initial(id, name, period))
                .collect();
            let created: Vec<&str> = enrollments
                .iter()
                .filter(|e| e.created)
                .map(|e| e.member_id.as_str())
                .collect();
            let event = LedgerEvent::new(
                "roster_synced",
                "roster",
                json!({ "period": period, "created": created, "size": roster.len() }),
                "system",
            );
            let modified = enrollments.iter().any(Enrollment::changed);
            Ok((enrollments, modified, Some(event)))
        })
    }

    /// Admin override: mark `target` paid for `period`
    pub fn mark_paid_admin(&mut self, actor: &str, target: &str, period: PeriodId) -> LedgerResult<PaymentChange> {
        self.commit(|ledger| {
            let change = ledger.register_payment(target, "", period);
            let event = LedgerEvent::new(
                "payment_marked_by_admin",
                &change.member_id,
                json!({ "period": period, "created": change.created }),
                actor,
            );
            let modified = change.changed();
            Ok((change, modified, Some(event)))
        })
    }

    /// Auto-pay sweep for `period`; returns the ids newly marked paid
    pub fn apply_auto_pay(&mut self, period: PeriodId) -> LedgerResult<Vec<String>> {
        self.commit(|ledger| {
            let marked = ledger.apply_auto_pay(period);
            let event = LedgerEvent::new(
                "auto_pay_applied",
                "auto_pay",
                json!({ "period": period, "marked": marked }),
                "scheduler",
            );
            let modified = !marked.is_empty();
            Ok((marked, modified, Some(event)))
        })
    }

    // ------------------------------------------------------------------------
    // Membership, links, config
    // ------------------------------------------------------------------------

    pub fn remove(&mut self, actor: &str, id: &str) -> LedgerResult<RemovedMember> {
        self.commit(|ledger| {
            let removed = ledger.remove(id)?;
            let event = LedgerEvent::new(
                "member_removed",
                &removed.member.id,
                json!({ "detached_links": removed.detached_links }),
                actor,
            );
            Ok((removed, true, Some(event)))
        })
    }

    pub fn link(&mut self, actor: &str, secondary: &str, primary: &str) -> LedgerResult<LinkOutcome> {
        self.commit(|ledger| {
            let outcome = ledger.link(secondary, primary)?;
            let event = LedgerEvent::new(
                "account_linked",
                &ledger.resolve(secondary),
                json!({ "secondary": secondary }),
                actor,
            );
            Ok((outcome, outcome == LinkOutcome::Linked, Some(event)))
        })
    }

    /// Returns the previous due day
    pub fn set_due_day(&mut self, actor: &str, day: u32) -> LedgerResult<u32> {
        self.commit(|ledger| {
            let previous = ledger.set_due_day(day)?;
            let event = LedgerEvent::new(
                "due_day_changed",
                "config",
                json!({ "from": previous, "to": day }),
                actor,
            );
            Ok((previous, previous != day, Some(event)))
        })
    }

    pub fn set_auto_pay(&mut self, actor: &str, id: &str, enabled: bool) -> LedgerResult<bool> {
        self.commit(|ledger| {
            let changed = ledger.set_auto_pay(id, enabled)?;
            let event = LedgerEvent::new(
                "auto_pay_changed",
                &ledger.resolve(id),
                json!({ "enabled": enabled }),
                actor,
            );
            Ok((changed, changed, Some(event)))
        })
    }

    // ------------------------------------------------------------------------
    // Reads (never create members)
    // ------------------------------------------------------------------------

    pub fn status_for(&self, period: PeriodId) -> Vec<MemberStatus> {
        self.ledger.status_for(period)
    }

    pub fn pending_for(&self, period: PeriodId) -> Vec<MemberStatus> {
        self.ledger.pending_for(period)
    }

    pub fn history_for(&self, id: &str) -> LedgerResult<Vec<(PeriodId, bool)>> {
        self.ledger.history_for(id)
    }

    pub fn has_paid(&self, id: &str, period: PeriodId) -> bool {
        self.ledger.has_paid(id, period)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::LedgerSnapshot;
    use crate::persistence::MemoryStore;

    fn period(s: &str) -> PeriodId {
        s.parse().unwrap()
    }

    fn open_memory() -> (LedgerStore, MemoryStore) {
        let backing = MemoryStore::new();
        let (store, _) = LedgerStore::open(Box::new(backing.clone()), LedgerConfig::default()).unwrap();
        (store, backing)
    }

    #[test]
    fn test_every_mutation_is_saved() {
        let (mut store, backing) = open_memory();
        store.register_payment("1", "alice", period("2025-02")).unwrap();

        let saved = backing.snapshot().unwrap();
        assert_eq!(saved.members.len(), 1);
        assert!(saved.members[0].has_paid(period("2025-02")));
        assert_eq!(backing.events().len(), 1);
        assert_eq!(backing.events()[0].event_type, "payment_registered");
    }

    #[test]
    fn test_failed_save_rolls_back() {
        let (mut store, backing) = open_memory();
        let p = period("2025-02");
        store.register_initial("1", "alice", p).unwrap();

        backing.set_fail_saves(true);
        let err = store.register_payment("1", "alice", p).unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));
        assert!(!store.has_paid("1", p));

        let err = store.register_payment("2", "bob", p).unwrap_err();
        assert!(matches!(err, LedgerError::Persistence(_)));
        assert!(store.ledger().member("2").is_none());

        backing.set_fail_saves(false);
        store.register_payment("1", "alice", p).unwrap();
        assert!(store.has_paid("1", p));
    }

    #[test]
    fn test_no_op_skips_save() {
        let (mut store, backing) = open_memory();
        let p = period("2025-02");
        store.register_initial("1", "alice", p).unwrap();
        assert_eq!(backing.save_count(), 1);

        store.register_initial("1", "alice", p).unwrap();
        assert_eq!(backing.save_count(), 1);
    }

    #[test]
    fn test_rejected_validation_never_saves() {
        let (mut store, backing) = open_memory();
        assert!(store.set_due_day("admin", 0).is_err());
        assert_eq!(backing.save_count(), 0);
        assert_eq!(store.due_day(), 10);
    }

    #[test]
    fn test_failed_set_due_day_save_keeps_old_value() {
        let (mut store, backing) = open_memory();
        backing.set_fail_saves(true);
        assert!(store.set_due_day("admin", 20).is_err());
        assert_eq!(store.due_day(), 10);
    }

    #[test]
    fn test_enroll_roster_single_write() {
        let (mut store, backing) = open_memory();
        let roster = vec![
            ("1".to_string(), "alice".to_string()),
            ("2".to_string(), "bob".to_string()),
            ("3".to_string(), "carol".to_string()),
        ];

        let enrollments = store.enroll_roster(&roster, period("2025-02")).unwrap();
        assert_eq!(enrollments.len(), 3);
        assert!(enrollments.iter().all(|e| e.created));
        assert_eq!(backing.save_count(), 1);
        assert_eq!(store.pending_for(period("2025-02")).len(), 3);
    }

    #[test]
    fn test_reload_absorbs_external_edits() {
        let (mut store, backing) = open_memory();
        store.register_initial("1", "alice", period("2025-02")).unwrap();

        let mut edited = backing.snapshot().unwrap();
        edited.members[0].mark(period("2025-02"), true);
        backing.overwrite(edited);

        store.reload().unwrap();
        assert!(store.has_paid("1", period("2025-02")));
    }

    #[test]
    fn test_reload_failure_keeps_current_ledger() {
        let (mut store, backing) = open_memory();
        store.register_payment("1", "alice", period("2025-02")).unwrap();

        backing.set_fail_loads(true);
        assert!(store.reload().is_err());
        assert!(store.has_paid("1", period("2025-02")));
    }

    #[test]
    fn test_open_loads_existing_snapshot() {
        let snapshot = LedgerSnapshot {
            config: LedgerConfig { due_day: 3 },
            ..Default::default()
        };
        let backing = MemoryStore::with_snapshot(snapshot);
        let (store, report) = LedgerStore::open(Box::new(backing), LedgerConfig::default()).unwrap();
        assert!(report.is_clean());
        assert_eq!(store.due_day(), 3);
    }

    #[test]
    fn test_link_is_persisted_and_routes_writes() {
        let (mut store, backing) = open_memory();
        store.register_initial("P", "main", period("2025-02")).unwrap();
        assert_eq!(store.link("admin", "S", "P").unwrap(), LinkOutcome::Linked);
        assert_eq!(backing.snapshot().unwrap().links.get("S").map(String::as_str), Some("P"));

        let saves = backing.save_count();
        assert_eq!(store.link("admin", "S", "P").unwrap(), LinkOutcome::Unchanged);
        assert_eq!(backing.save_count(), saves);

        store.register_payment("S", "alt", period("2025-02")).unwrap();
        assert!(store.has_paid("P", period("2025-02")));
        assert_eq!(store.ledger().member_count(), 1);
    }

    #[test]
    fn test_rename_on_repeat_payment_survives_reload() {
        let (mut store, backing) = open_memory();
        let p = period("2025-02");
        store.register_payment("1", "alice", p).unwrap();
        let saves = backing.save_count();

        let change = store.register_payment("1", "alice_renamed", p).unwrap();
        assert!(change.renamed);
        assert_eq!(backing.save_count(), saves + 1);

        store.reload().unwrap();
        assert_eq!(store.ledger().member("1").unwrap().display_name, "alice_renamed");
    }

    #[test]
    fn test_link_moves_auto_pay_and_persists_it() {
        let (mut store, backing) = open_memory();
        let p = period("2025-02");
        store.register_initial("A", "alt", p).unwrap();
        store.register_initial("P", "main", p).unwrap();
        store.set_auto_pay("admin", "A", true).unwrap();
        store.link("admin", "A", "P").unwrap();

        assert_eq!(backing.snapshot().unwrap().auto_pay, vec!["P".to_string()]);

        store.reload().unwrap();
        assert_eq!(store.apply_auto_pay(p).unwrap(), vec!["P".to_string()]);
        assert!(store.has_paid("P", p));
    }

    #[test]
    fn test_clean_medium_reports_no_skipped_rows() {
        let (mut store, _) = open_memory();
        store.register_initial("1", "alice", period("2025-02")).unwrap();
        let report = store.reload().unwrap();
        assert_eq!(report.quarantined_rows, 0);
        assert!(report.is_clean());
    }
}
