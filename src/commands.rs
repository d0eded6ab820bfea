// 💬 Commands - the operations a chat front-end delivers to the ledger
//
// Every command resolves the active period from the clock and the configured
// due day, runs against the shared ledger under its lock, and returns a
// structured `Outcome`. The chat layer decides how to render it; `Display`
// gives a plain-text default with no markup.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::attachments::{AttachmentStore, ProofReceipt};
use crate::clock::Clock;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::MemberStatus;
use crate::links::LinkOutcome;
use crate::period::{resolve_period, PeriodId};
use crate::rates::{PriceInfo, PricingConfig, RateProvider};
use crate::store::{lock, SharedLedger};

// ============================================================================
// INPUT TYPES
// ============================================================================

/// Who issued the command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl Actor {
    pub fn member(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Actor {
            id: id.into(),
            display_name: display_name.into(),
            is_admin: false,
        }
    }

    pub fn admin(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Actor {
            is_admin: true,
            ..Actor::member(id, display_name)
        }
    }

    fn require_admin(&self, action: &str) -> LedgerResult<()> {
        if self.is_admin {
            Ok(())
        } else {
            Err(LedgerError::unauthorized(&self.id, action))
        }
    }
}

/// One entry of the chat community's member list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_bot: bool,
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    PaymentRegistered {
        member_id: String,
        display_name: String,
        period: PeriodId,
        already_paid: bool,
        proof_attached: bool,
    },
    PaymentUnregistered {
        display_name: String,
        period: PeriodId,
        /// false when the entry was already pending
        changed: bool,
    },
    Status {
        period: PeriodId,
        due_date: NaiveDate,
        members: Vec<MemberStatus>,
    },
    History {
        member_id: String,
        display_name: String,
        entries: Vec<(PeriodId, bool)>,
    },
    DueDayChanged {
        from: u32,
        to: u32,
    },
    AccountsLinked {
        secondary: String,
        primary: String,
        already_linked: bool,
    },
    MemberAdded {
        member_id: String,
        display_name: String,
        period: PeriodId,
        created: bool,
    },
    MemberRemoved {
        member_id: String,
        display_name: String,
        detached_links: Vec<String>,
    },
    MarkedPaid {
        member_id: String,
        display_name: String,
        period: PeriodId,
        by: String,
    },
    AutoPayChanged {
        member_id: String,
        enabled: bool,
        changed: bool,
    },
    Price {
        price: PriceInfo,
        due_date: NaiveDate,
        instructions: Option<String>,
    },
    RosterSynced {
        period: PeriodId,
        total: usize,
        created: usize,
    },
    ProofStored(ProofReceipt),
}

fn paid_label(paid: bool) -> &'static str {
    if paid {
        "paid"
    } else {
        "pending"
    }
}

fn write_price(f: &mut fmt::Formatter<'_>, price: &PriceInfo) -> fmt::Result {
    match price {
        PriceInfo::Available(b) => write!(
            f,
            "The ${:.2} subscription is {} {:.2}; split by {}, each pays {} {:.2}.",
            b.subscription_usd, b.currency, b.total_local, b.split_count, b.currency, b.per_person
        ),
        PriceInfo::Unavailable { .. } => {
            write!(f, "The exchange rate is unavailable right now, so no price can be shown.")
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::PaymentRegistered {
                display_name,
                period,
                already_paid,
                proof_attached,
                ..
            } => {
                if *already_paid {
                    write!(f, "Payment for {period} was already registered for {display_name}.")?;
                } else {
                    write!(f, "Payment registered for {display_name} ({period}).")?;
                }
                if *proof_attached {
                    write!(f, " Proof of payment received.")?;
                }
                Ok(())
            }
            Outcome::PaymentUnregistered {
                display_name,
                period,
                changed,
            } => {
                if *changed {
                    write!(f, "{display_name}, your payment for {period} was removed.")
                } else {
                    write!(f, "{display_name}, your {period} entry was already pending.")
                }
            }
            Outcome::Status {
                period,
                due_date,
                members,
            } => {
                writeln!(f, "Payment status for {period} (due {}):", due_date.format("%d/%m/%Y"))?;
                if members.is_empty() {
                    return write!(f, "No members registered.");
                }
                for m in members {
                    writeln!(f, "- {}: {}", m.display_name, paid_label(m.paid))?;
                }
                Ok(())
            }
            Outcome::History {
                display_name,
                entries,
                ..
            } => {
                if entries.is_empty() {
                    return write!(f, "{display_name} has no payments recorded.");
                }
                writeln!(f, "Payment history for {display_name}:")?;
                for (period, paid) in entries {
                    writeln!(f, "- {period}: {}", paid_label(*paid))?;
                }
                Ok(())
            }
            Outcome::DueDayChanged { to, .. } => {
                write!(f, "Payment day updated to day {to} of the month.")
            }
            Outcome::AccountsLinked {
                secondary,
                primary,
                already_linked,
            } => {
                if *already_linked {
                    write!(f, "{secondary} was already linked to {primary}.")
                } else {
                    write!(f, "{secondary} is now billed under {primary}.")
                }
            }
            Outcome::MemberAdded {
                member_id,
                display_name,
                created,
                ..
            } => {
                if *created {
                    write!(f, "Member {display_name} ({member_id}) added to the payment list.")
                } else {
                    write!(f, "Member {display_name} ({member_id}) is already on the payment list.")
                }
            }
            Outcome::MemberRemoved {
                member_id,
                display_name,
                detached_links,
            } => {
                write!(f, "Member {display_name} ({member_id}) removed.")?;
                if !detached_links.is_empty() {
                    write!(f, " Unlinked: {}.", detached_links.join(", "))?;
                }
                Ok(())
            }
            Outcome::MarkedPaid {
                display_name,
                period,
                by,
                ..
            } => write!(f, "{display_name} marked as paid for {period} by {by}."),
            Outcome::AutoPayChanged {
                member_id,
                enabled,
                changed,
            } => match (enabled, changed) {
                (true, true) => write!(f, "Auto-pay enabled for {member_id}."),
                (false, true) => write!(f, "Auto-pay disabled for {member_id}."),
                (true, false) => write!(f, "Auto-pay was already enabled for {member_id}."),
                (false, false) => write!(f, "Auto-pay was already disabled for {member_id}."),
            },
            Outcome::Price {
                price,
                due_date,
                instructions,
            } => {
                write_price(f, price)?;
                write!(f, " Due date: {}.", due_date.format("%d/%m/%Y"))?;
                if let Some(instructions) = instructions {
                    write!(f, " Pay to: {instructions}.")?;
                }
                Ok(())
            }
            Outcome::RosterSynced {
                period,
                total,
                created,
            } => write!(f, "Roster synced for {period}: {total} members, {created} new."),
            Outcome::ProofStored(receipt) => write!(
                f,
                "Proof received ({} bytes). Register your payment to attach it.",
                receipt.size
            ),
        }
    }
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct CommandService {
    ledger: SharedLedger,
    clock: Arc<dyn Clock>,
    rates: Arc<dyn RateProvider>,
    attachments: Arc<dyn AttachmentStore>,
    pricing: PricingConfig,
}

impl CommandService {
    pub fn new(
        ledger: SharedLedger,
        clock: Arc<dyn Clock>,
        rates: Arc<dyn RateProvider>,
        attachments: Arc<dyn AttachmentStore>,
        pricing: PricingConfig,
    ) -> Self {
        CommandService {
            ledger,
            clock,
            rates,
            attachments,
            pricing,
        }
    }

    pub fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    /// Active period and its due date, as of the service clock
    pub fn active_period(&self) -> (PeriodId, NaiveDate) {
        let due_day = lock(&self.ledger).due_day();
        let period = resolve_period(self.clock.today(), due_day);
        (period, period.due_date(due_day))
    }

    pub fn register_payment(&self, actor: &Actor) -> LedgerResult<Outcome> {
        let mut store = lock(&self.ledger);
        let period = resolve_period(self.clock.today(), store.due_day());

        let change = store.register_payment(&actor.id, &actor.display_name, period)?;
        let display_name = store
            .ledger()
            .member(&change.member_id)
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| actor.display_name.clone());
        drop(store);

        let proof_attached = self.attachments.take_pending(&actor.id);
        info!(member = %change.member_id, %period, proof_attached, "payment registered");

        Ok(Outcome::PaymentRegistered {
            member_id: change.member_id,
            display_name,
            period,
            already_paid: change.previous == Some(true),
            proof_attached,
        })
    }

    pub fn unregister_payment(&self, actor: &Actor) -> LedgerResult<Outcome> {
        let mut store = lock(&self.ledger);
        let period = resolve_period(self.clock.today(), store.due_day());
        let changed = store.unregister_payment(&actor.id, period)?;

        Ok(Outcome::PaymentUnregistered {
            display_name: actor.display_name.clone(),
            period,
            changed,
        })
    }

    pub fn query_status(&self) -> Outcome {
        let store = lock(&self.ledger);
        let due_day = store.due_day();
        let period = resolve_period(self.clock.today(), due_day);

        Outcome::Status {
            period,
            due_date: period.due_date(due_day),
            members: store.status_for(period),
        }
    }

    pub fn query_history(&self, target_id: &str) -> LedgerResult<Outcome> {
        let store = lock(&self.ledger);
        let entries = store.history_for(target_id)?;
        let member = store
            .ledger()
            .member(target_id)
            .ok_or_else(|| LedgerError::member_not_found(target_id))?;

        Ok(Outcome::History {
            member_id: member.id.clone(),
            display_name: member.display_name.clone(),
            entries,
        })
    }

    pub fn set_due_day(&self, actor: &Actor, day: u32) -> LedgerResult<Outcome> {
        actor.require_admin("change the payment day")?;
        let from = lock(&self.ledger).set_due_day(&actor.id, day)?;
        Ok(Outcome::DueDayChanged { from, to: day })
    }

    pub fn link_accounts(&self, actor: &Actor, primary_id: &str, secondary_id: &str) -> LedgerResult<Outcome> {
        actor.require_admin("link accounts")?;
        let mut store = lock(&self.ledger);
        let outcome = store.link(&actor.id, secondary_id, primary_id)?;

        Ok(Outcome::AccountsLinked {
            secondary: secondary_id.to_string(),
            primary: store.ledger().resolve(secondary_id),
            already_linked: outcome == LinkOutcome::Unchanged,
        })
    }

    /// Enroll `id` as pending for the active period
    pub fn add_member(&self, id: &str, display_name: &str) -> LedgerResult<Outcome> {
        let mut store = lock(&self.ledger);
        let period = resolve_period(self.clock.today(), store.due_day());
        let enrollment = store.register_initial(id, display_name, period)?;

        Ok(Outcome::MemberAdded {
            member_id: enrollment.member_id,
            display_name: display_name.to_string(),
            period,
            created: enrollment.created,
        })
    }

    pub fn remove_member(&self, actor: &Actor, id: &str) -> LedgerResult<Outcome> {
        actor.require_admin("remove members")?;
        let removed = lock(&self.ledger).remove(&actor.id, id)?;

        Ok(Outcome::MemberRemoved {
            member_id: removed.member.id,
            display_name: removed.member.display_name,
            detached_links: removed.detached_links,
        })
    }

    /// Mark `target_id` paid for `period` (defaults to the active period)
    pub fn mark_paid_admin(&self, actor: &Actor, target_id: &str, period: Option<PeriodId>) -> LedgerResult<Outcome> {
        actor.require_admin("mark payments")?;
        let mut store = lock(&self.ledger);
        let period = period.unwrap_or_else(|| resolve_period(self.clock.today(), store.due_day()));

        let change = store.mark_paid_admin(&actor.id, target_id, period)?;
        let display_name = store
            .ledger()
            .member(&change.member_id)
            .map(|m| m.display_name.clone())
            .unwrap_or_else(|| change.member_id.clone());

        Ok(Outcome::MarkedPaid {
            member_id: change.member_id,
            display_name,
            period,
            by: actor.display_name.clone(),
        })
    }

    pub fn set_auto_pay(&self, actor: &Actor, target_id: &str, enabled: bool) -> LedgerResult<Outcome> {
        actor.require_admin("change auto-pay")?;
        let mut store = lock(&self.ledger);
        let changed = store.set_auto_pay(&actor.id, target_id, enabled)?;

        Ok(Outcome::AutoPayChanged {
            member_id: store.ledger().resolve(target_id),
            enabled,
            changed,
        })
    }

    /// Price breakdown for the active period; never fails, degrades instead
    pub fn show_price(&self) -> Outcome {
        let (_, due_date) = self.active_period();

        Outcome::Price {
            price: PriceInfo::lookup(self.rates.as_ref(), &self.pricing),
            due_date,
            instructions: self.pricing.payment_instructions.clone(),
        }
    }

    /// Enroll every human in the roster as pending for the active period
    pub fn sync_roster(&self, roster: &[RosterEntry]) -> LedgerResult<Outcome> {
        let humans: Vec<(String, String)> = roster
            .iter()
            .filter(|e| !e.is_bot)
            .map(|e| (e.id.clone(), e.display_name.clone()))
            .collect();

        let mut store = lock(&self.ledger);
        let period = resolve_period(self.clock.today(), store.due_day());
        let enrollments = store.enroll_roster(&humans, period)?;

        Ok(Outcome::RosterSynced {
            period,
            total: enrollments.len(),
            created: enrollments.iter().filter(|e| e.created).count(),
        })
    }

    pub fn submit_proof(&self, actor: &Actor, blob: &[u8]) -> LedgerResult<Outcome> {
        let receipt = self.attachments.store_proof(&actor.id, blob)?;
        Ok(Outcome::ProofStored(receipt))
    }
}

// ============================================================================
// TESTS
// ============================================================================
