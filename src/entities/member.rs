// 👤 Member Entity - one billing identity and its payment record per period
//
// "Identity persists, values change": the id never changes, the display name
// is refreshed on every registration, and the payment map grows one entry per
// period the member was enrolled in or paid for.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::period::PeriodId;

// ============================================================================
// MEMBER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Billing identity (opaque chat account id)
    pub id: String,

    /// Last known display name
    pub display_name: String,

    /// Period → paid. Absent key means unknown/pending, never an error.
    #[serde(default)]
    pub payments: BTreeMap<PeriodId, bool>,
}

impl Member {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Member {
            id: id.into(),
            display_name: display_name.into(),
            payments: BTreeMap::new(),
        }
    }

    /// True only for an explicit `true` entry
    pub fn has_paid(&self, period: PeriodId) -> bool {
        self.payments.get(&period).copied().unwrap_or(false)
    }

    /// Raw entry: None = never enrolled for that period
    pub fn entry(&self, period: PeriodId) -> Option<bool> {
        self.payments.get(&period).copied()
    }

    /// Set the entry for `period`, returning the previous value
    pub fn mark(&mut self, period: PeriodId, paid: bool) -> Option<bool> {
        self.payments.insert(period, paid)
    }

    /// Enroll as pending unless the period already has an entry.
    /// Returns true when a new entry was written.
    pub fn enroll(&mut self, period: PeriodId) -> bool {
        if self.payments.contains_key(&period) {
            return false;
        }
        self.payments.insert(period, false);
        true
    }

    /// Payment history, ascending by period
    pub fn history(&self) -> Vec<(PeriodId, bool)> {
        self.payments.iter().map(|(p, paid)| (*p, *paid)).collect()
    }

    pub fn paid_count(&self) -> usize {
        self.payments.values().filter(|paid| **paid).count()
    }

    /// Rename if a non-empty, different name is supplied
    pub fn refresh_name(&mut self, display_name: &str) -> bool {
        if display_name.is_empty() || self.display_name == display_name {
            return false;
        }
        self.display_name = display_name.to_string();
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================
