// 📒 Ledger - aggregate root for members, account links, auto-pay and config
//
// Every caller-supplied id is resolved through the link graph before it
// touches a member, so writes made from a secondary account land on the
// primary's record. History already recorded under an id stays where it is.
//
// This type is purely in-memory. Durability (write-through + rollback) is the
// job of `LedgerStore`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::entities::Member;
use crate::error::{LedgerError, LedgerResult, PersistenceError};
use crate::links::{AccountLinkGraph, LinkOutcome};
use crate::period::PeriodId;

pub const DEFAULT_DUE_DAY: u32 = 10;

// ============================================================================
// CONFIG
// ============================================================================

/// Process-wide ledger settings, persisted alongside the members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_due_day")]
    pub due_day: u32,
}

fn default_due_day() -> u32 {
    DEFAULT_DUE_DAY
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            due_day: DEFAULT_DUE_DAY,
        }
    }
}

impl LedgerConfig {
    pub fn validate_due_day(day: u32) -> LedgerResult<u32> {
        if (1..=31).contains(&day) {
            Ok(day)
        } else {
            Err(LedgerError::InvalidDueDay(day))
        }
    }
}

// ============================================================================
// SNAPSHOT (persisted layout)
// ============================================================================

/// The four logical relations, loaded and saved as one unit.
///
/// Every field defaults, so snapshots written before a field existed still load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub members: Vec<Member>,

    #[serde(default)]
    pub config: LedgerConfig,

    #[serde(default)]
    pub auto_pay: Vec<String>,

    /// secondary → primary
    #[serde(default)]
    pub links: BTreeMap<String, String>,
}

/// What had to be dropped while turning a snapshot into a ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub quarantined_links: Vec<(String, String)>,
    pub duplicate_members: Vec<String>,
    /// Stored payment rows the medium skipped while reading
    pub quarantined_rows: usize,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.quarantined_links.is_empty() && self.duplicate_members.is_empty() && self.quarantined_rows == 0
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberStatus {
    pub member_id: String,
    pub display_name: String,
    pub paid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentChange {
    /// Billing identity the write landed on
    pub member_id: String,
    pub period: PeriodId,
    /// Member did not exist before this call
    pub created: bool,
    pub previous: Option<bool>,
    /// Display name was refreshed on an existing record
    pub renamed: bool,
}

impl PaymentChange {
    pub fn changed(&self) -> bool {
        self.created || self.renamed || self.previous != Some(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrollment {
    pub member_id: String,
    pub period: PeriodId,
    pub created: bool,
    /// A pending entry was written for the period
    pub enrolled: bool,
    pub renamed: bool,
}

impl Enrollment {
    pub fn changed(&self) -> bool {
        self.created || self.enrolled || self.renamed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedMember {
    pub member: Member,
    pub detached_links: Vec<String>,
    pub was_auto_pay: bool,
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    members: BTreeMap<String, Member>,
    links: AccountLinkGraph,
    auto_pay: BTreeSet<String>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Ledger {
            config,
            ..Default::default()
        }
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    pub fn due_day(&self) -> u32 {
        self.config.due_day
    }

    pub fn links(&self) -> &AccountLinkGraph {
        &self.links
    }

    pub fn auto_pay(&self) -> &BTreeSet<String> {
        &self.auto_pay
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Billing identity for any account id
    pub fn resolve(&self, id: &str) -> String {
        self.links.resolve(id).to_string()
    }

    /// Member record behind `id` after alias resolution
    pub fn member(&self, id: &str) -> Option<&Member> {
        self.members.get(self.links.resolve(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.member(id).is_some()
    }

    /// Get-or-create on an already-resolved id. Returns (member, created).
    fn get_or_create(&mut self, member_id: &str, display_name: &str) -> (&mut Member, bool) {
        let created = !self.members.contains_key(member_id);
        let member = self
            .members
            .entry(member_id.to_string())
            .or_insert_with(|| {
                let name = if display_name.is_empty() {
                    member_id
                } else {
                    display_name
                };
                Member::new(member_id, name)
            });
        (member, created)
    }

    // ------------------------------------------------------------------------
    // Payments
    // ------------------------------------------------------------------------

    /// Mark `period` paid for the billing identity behind `id`
    pub fn register_payment(&mut self, id: &str, display_name: &str, period: PeriodId) -> PaymentChange {
        let member_id = self.resolve(id);
        // Only the account that owns the record renames it
        let own_account = member_id == id;
        let (member, created) = self.get_or_create(&member_id, display_name);
        let renamed = !created && own_account && member.refresh_name(display_name);
        let previous = member.mark(period, true);

        PaymentChange {
            member_id,
            period,
            created,
            previous,
            renamed,
        }
    }

    /// Flip a recorded payment back to pending.
    ///
    /// Ok(true): entry was paid and is now pending. Ok(false): entry was
    /// already pending. NotFound: no member, or no entry for the period.
    pub fn unregister_payment(&mut self, id: &str, period: PeriodId) -> LedgerResult<bool> {
        let member_id = self.resolve(id);
        let member = self
            .members
            .get_mut(&member_id)
            .ok_or_else(|| LedgerError::member_not_found(&member_id))?;

        match member.entry(period) {
            None => Err(LedgerError::period_not_found(&member_id, period)),
            Some(false) => Ok(false),
            Some(true) => {
                member.mark(period, false);
                Ok(true)
            }
        }
    }

    /// Idempotent enrollment: creates the member if needed and writes a
    /// pending entry only when the period has none.
    pub fn register_initial(&mut self, id: &str, display_name: &str, period: PeriodId) -> Enrollment {
        let member_id = self.resolve(id);
        let own_account = member_id == id;
        let (member, created) = self.get_or_create(&member_id, display_name);
        let renamed = !created && own_account && member.refresh_name(display_name);
        let enrolled = member.enroll(period);

        Enrollment {
            member_id,
            period,
            created,
            enrolled,
            renamed,
        }
    }

    /// Mark every auto-pay identity paid for `period`; returns the billing
    /// identities that changed. Flags are resolved through the link graph, so
    /// a flag left on a secondary still bills its primary once.
    pub fn apply_auto_pay(&mut self, period: PeriodId) -> Vec<String> {
        let ids: BTreeSet<String> = self.auto_pay.iter().map(|id| self.resolve(id)).collect();
        let mut marked = Vec::new();

        for id in ids {
            let (member, _) = self.get_or_create(&id, &id);
            if member.mark(period, true) != Some(true) {
                marked.push(id);
            }
        }

        marked
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn has_paid(&self, id: &str, period: PeriodId) -> bool {
        self.member(id).map(|m| m.has_paid(period)).unwrap_or(false)
    }

    /// Snapshot of every billing identity for `period`.
    ///
    /// Members whose id has since become a secondary account keep their old
    /// history but are no longer billed, so they are left out.
    pub fn status_for(&self, period: PeriodId) -> Vec<MemberStatus> {
        self.members
            .values()
            .filter(|m| !self.links.is_secondary(&m.id))
            .map(|m| MemberStatus {
                member_id: m.id.clone(),
                display_name: m.display_name.clone(),
                paid: m.has_paid(period),
            })
            .collect()
    }

    pub fn pending_for(&self, period: PeriodId) -> Vec<MemberStatus> {
        self.status_for(period)
            .into_iter()
            .filter(|s| !s.paid)
            .collect()
    }

    /// Ascending by period
    pub fn history_for(&self, id: &str) -> LedgerResult<Vec<(PeriodId, bool)>> {
        self.member(id)
            .map(Member::history)
            .ok_or_else(|| LedgerError::member_not_found(&self.resolve(id)))
    }

    // ------------------------------------------------------------------------
    // Membership, links, config
    // ------------------------------------------------------------------------

    /// Delete the billing identity behind `id`, its inbound links and its
    /// auto-pay flag
    pub fn remove(&mut self, id: &str) -> LedgerResult<RemovedMember> {
        let member_id = self.resolve(id);
        let member = self
            .members
            .remove(&member_id)
            .ok_or_else(|| LedgerError::member_not_found(&member_id))?;

        let detached_links = self.links.remove_primary(&member_id);
        let was_auto_pay = self.auto_pay.remove(&member_id);

        Ok(RemovedMember {
            member,
            detached_links,
            was_auto_pay,
        })
    }

    /// Link `secondary` under `primary`. An auto-pay flag on the secondary
    /// moves to the billing identity it now resolves to.
    pub fn link(&mut self, secondary: &str, primary: &str) -> LedgerResult<LinkOutcome> {
        let outcome = self.links.link(secondary, primary)?;
        if outcome == LinkOutcome::Linked && self.auto_pay.remove(secondary) {
            let billed = self.resolve(secondary);
            debug!(%secondary, primary = %billed, "auto-pay flag moved to primary");
            self.auto_pay.insert(billed);
        }
        Ok(outcome)
    }

    /// Returns the previous due day. Out-of-range values leave config untouched.
    pub fn set_due_day(&mut self, day: u32) -> LedgerResult<u32> {
        let day = LedgerConfig::validate_due_day(day)?;
        let previous = self.config.due_day;
        self.config.due_day = day;
        Ok(previous)
    }

    /// Toggle auto-pay for an existing billing identity; returns true if it changed
    pub fn set_auto_pay(&mut self, id: &str, enabled: bool) -> LedgerResult<bool> {
        let member_id = self.resolve(id);
        if !self.members.contains_key(&member_id) {
            return Err(LedgerError::member_not_found(&member_id));
        }

        Ok(if enabled {
            self.auto_pay.insert(member_id)
        } else {
            self.auto_pay.remove(&member_id)
        })
    }

    pub fn is_auto_pay(&self, id: &str) -> bool {
        self.auto_pay.contains(self.links.resolve(id))
    }

    // ------------------------------------------------------------------------
    // Snapshot conversion
    // ------------------------------------------------------------------------

    pub fn to_snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            members: self.members.values().cloned().collect(),
            config: self.config,
            auto_pay: self.auto_pay.iter().cloned().collect(),
            links: self
                .links
                .edges()
                .map(|(s, p)| (s.to_string(), p.to_string()))
                .collect(),
        }
    }

    /// Validate and load a snapshot.
    ///
    /// An out-of-range due day rejects the whole snapshot; link edges that
    /// break the one-level forest and duplicate member rows are dropped and
    /// reported.
    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<(Ledger, LoadReport), PersistenceError> {
        if LedgerConfig::validate_due_day(snapshot.config.due_day).is_err() {
            return Err(PersistenceError::malformed(format!(
                "due_day {} outside 1..=31",
                snapshot.config.due_day
            )));
        }

        let mut report = LoadReport::default();
        let mut members = BTreeMap::new();
        for member in snapshot.members {
            if members.contains_key(&member.id) {
                warn!(member_id = %member.id, "duplicate member row dropped");
                report.duplicate_members.push(member.id.clone());
                continue;
            }
            members.insert(member.id.clone(), member);
        }

        let (links, rejected) = AccountLinkGraph::from_edges(snapshot.links);
        for (secondary, primary) in &rejected {
            warn!(%secondary, %primary, "account link quarantined on load");
        }
        report.quarantined_links = rejected;

        let ledger = Ledger {
            members,
            links,
            auto_pay: snapshot.auto_pay.into_iter().collect(),
            config: snapshot.config,
        };

        Ok((ledger, report))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn period(s: &str) -> PeriodId {
        s.parse().unwrap()
    }

    #[test]
    fn test_register_payment_creates_member() {
        let mut ledger = Ledger::default();
        let change = ledger.register_payment("1001", "alice", period("2025-02"));

        assert!(change.created);
        assert_eq!(change.previous, None);
        assert!(ledger.has_paid("1001", period("2025-02")));
        assert!(!ledger.has_paid("1001", period("2025-01")));
    }

    #[test]
    fn test_register_initial_is_idempotent() {
        let mut ledger = Ledger::default();
        let p = period("2025-02");

        let first = ledger.register_initial("1001", "alice", p);
        assert!(first.created && first.enrolled);

        ledger.register_payment("1001", "alice", p);
        let second = ledger.register_initial("1001", "alice", p);
        assert!(!second.changed());
        assert!(ledger.has_paid("1001", p));
    }

    #[test]
    fn test_unregister_then_register_round_trip() {
        let mut ledger = Ledger::default();
        let p = period("2025-02");
        ledger.register_payment("1001", "alice", p);

        assert!(ledger.unregister_payment("1001", p).unwrap());
        assert!(!ledger.has_paid("1001", p));
        assert!(!ledger.unregister_payment("1001", p).unwrap());

        ledger.register_payment("1001", "alice", p);
        assert!(ledger.has_paid("1001", p));
    }

    #[test]
    fn test_unregister_reports_missing_records() {
        let mut ledger = Ledger::default();
        let err = ledger.unregister_payment("ghost", period("2025-02")).unwrap_err();
        assert!(err.is_not_found());

        ledger.register_payment("1001", "alice", period("2025-01"));
        let err = ledger.unregister_payment("1001", period("2025-02")).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::NotFound { period: Some(_), .. }
        ));
    }

    #[test]
    fn test_status_defaults_to_pending() {
        let mut ledger = Ledger::default();
        ledger.register_payment("1", "alice", period("2025-01"));
        ledger.register_initial("2", "bob", period("2025-02"));

        let status = ledger.status_for(period("2025-02"));
        assert_eq!(status.len(), 2);
        assert!(status.iter().all(|s| !s.paid));

        let pending = ledger.pending_for(period("2025-01"));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].display_name, "bob");
    }

    #[test]
    fn test_payment_through_secondary_lands_on_primary() {
        let mut ledger = Ledger::default();
        ledger.register_initial("P", "primary", period("2025-02"));
        ledger.link("S", "P").unwrap();

        let change = ledger.register_payment("S", "alt-name", period("2025-02"));
        assert_eq!(change.member_id, "P");
        assert!(!change.created);
        assert!(ledger.has_paid("P", period("2025-02")));
        assert!(ledger.members.get("S").is_none());
        // secondary account does not rename the primary
        assert_eq!(ledger.member("P").unwrap().display_name, "primary");
    }

    #[test]
    fn test_linked_member_history_is_kept_but_not_billed() {
        let mut ledger = Ledger::default();
        ledger.register_payment("S", "old", period("2025-01"));
        ledger.register_initial("P", "main", period("2025-01"));
        ledger.link("S", "P").unwrap();

        let status = ledger.status_for(period("2025-01"));
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].member_id, "P");

        // S's own history stays under S
        assert!(ledger.members.get("S").unwrap().has_paid(period("2025-01")));
        // but lookups through S resolve to P
        assert!(!ledger.has_paid("S", period("2025-01")));
    }

    #[test]
    fn test_history_sorted_ascending() {
        let mut ledger = Ledger::default();
        ledger.register_payment("1", "a", period("2025-03"));
        ledger.register_initial("1", "a", period("2024-12"));
        ledger.register_payment("1", "a", period("2025-01"));

        let history = ledger.history_for("1").unwrap();
        let periods: Vec<String> = history.iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(periods, vec!["2024-12", "2025-01", "2025-03"]);
        assert!(ledger.history_for("nobody").unwrap_err().is_not_found());
    }

    #[test]
    fn test_remove_drops_links_and_auto_pay() {
        let mut ledger = Ledger::default();
        ledger.register_initial("P", "main", period("2025-01"));
        ledger.link("S", "P").unwrap();
        ledger.set_auto_pay("P", true).unwrap();

        let removed = ledger.remove("P").unwrap();
        assert_eq!(removed.detached_links, vec!["S"]);
        assert!(removed.was_auto_pay);
        assert!(!ledger.contains("P"));
        assert_eq!(ledger.resolve("S"), "S");
        assert!(ledger.auto_pay().is_empty());

        assert!(ledger.remove("P").unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_due_day_validates() {
        let mut ledger = Ledger::default();
        assert!(matches!(ledger.set_due_day(0), Err(LedgerError::InvalidDueDay(0))));
        assert!(matches!(ledger.set_due_day(32), Err(LedgerError::InvalidDueDay(32))));
        assert_eq!(ledger.due_day(), DEFAULT_DUE_DAY);

        assert_eq!(ledger.set_due_day(31).unwrap(), DEFAULT_DUE_DAY);
        assert_eq!(ledger.due_day(), 31);
    }

    #[test]
    fn test_auto_pay_marks_only_flagged_members() {
        let mut ledger = Ledger::default();
        let p = period("2025-02");
        ledger.register_initial("A", "auto", p);
        ledger.register_initial("B", "manual", p);
        ledger.set_auto_pay("A", true).unwrap();

        assert_eq!(ledger.apply_auto_pay(p), vec!["A"]);
        assert!(ledger.has_paid("A", p));
        assert_eq!(ledger.member("B").unwrap().entry(p), Some(false));

        // second application changes nothing
        assert!(ledger.apply_auto_pay(p).is_empty());
        assert!(ledger.set_auto_pay("ghost", true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_auto_pay_follows_account_into_primary() {
        let mut ledger = Ledger::default();
        let p = period("2025-02");
        ledger.register_initial("A", "alt", p);
        ledger.register_initial("P", "main", p);
        ledger.set_auto_pay("A", true).unwrap();

        ledger.link("A", "P").unwrap();
        assert!(ledger.auto_pay().contains("P"));
        assert!(!ledger.auto_pay().contains("A"));
        assert!(ledger.is_auto_pay("A"));

        assert_eq!(ledger.apply_auto_pay(p), vec!["P"]);
        assert!(ledger.has_paid("P", p));
        assert_eq!(ledger.member("P").unwrap().entry(p), Some(true));
    }

    #[test]
    fn test_auto_pay_flag_on_secondary_bills_primary_once() {
        // Snapshot written before flags moved on link: both accounts flagged
        let snapshot = LedgerSnapshot {
            members: vec![Member::new("A", "alt"), Member::new("P", "main")],
            auto_pay: vec!["A".to_string(), "P".to_string()],
            links: BTreeMap::from([("A".to_string(), "P".to_string())]),
            ..Default::default()
        };
        let (mut ledger, report) = Ledger::from_snapshot(snapshot).unwrap();
        assert!(report.is_clean());

        let p = period("2025-03");
        assert_eq!(ledger.apply_auto_pay(p), vec!["P"]);
        assert!(ledger.has_paid("A", p));
        assert_eq!(ledger.member("A").map(|m| m.id.as_str()), Some("P"));
    }

    #[test]
    fn test_repeat_payment_with_new_name_counts_as_change() {
        let mut ledger = Ledger::default();
        let p = period("2025-02");
        assert!(ledger.register_payment("A", "alice", p).changed());

        let change = ledger.register_payment("A", "alice_renamed", p);
        assert!(change.renamed);
        assert!(change.changed());

        let change = ledger.register_payment("A", "alice_renamed", p);
        assert!(!change.renamed);
        assert!(!change.changed());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut ledger = Ledger::default();
        ledger.register_payment("1", "alice", period("2025-01"));
        ledger.register_initial("2", "bob", period("2025-01"));
        ledger.link("3", "1").unwrap();
        ledger.set_auto_pay("2", true).unwrap();
        ledger.set_due_day(5).unwrap();

        let (restored, report) = Ledger::from_snapshot(ledger.to_snapshot()).unwrap();
        assert!(report.is_clean());
        assert_eq!(restored, ledger);
    }

    #[test]
    fn test_old_snapshot_without_newer_fields_loads() {
        let json = r#"{"members":[{"id":"1","display_name":"alice","payments":{"2025-01":true}}]}"#;
        let snapshot: LedgerSnapshot = serde_json::from_str(json).unwrap();
        let (ledger, _) = Ledger::from_snapshot(snapshot).unwrap();

        assert_eq!(ledger.due_day(), DEFAULT_DUE_DAY);
        assert!(ledger.auto_pay().is_empty());
        assert!(ledger.links().is_empty());
        assert!(ledger.has_paid("1", period("2025-01")));
    }

    #[test]
    fn test_snapshot_with_bad_due_day_rejected() {
        let snapshot = LedgerSnapshot {
            config: LedgerConfig { due_day: 40 },
            ..Default::default()
        };
        assert!(Ledger::from_snapshot(snapshot).is_err());
    }
}
