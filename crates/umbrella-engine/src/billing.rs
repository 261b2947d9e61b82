//! Billing batch
//!
//! Run by the premium collector once per epoch. Each holder is charged at
//! most one cycle's premium for their pre-deactivation cover, reward points
//! first. A holder who runs out of funds is force-deactivated instead of
//! failing the batch. Collected premiums reach the pool in one transfer
//! after the whole batch has been charged. A holder whose premium cannot
//! be computed is reported as failed and left untouched; the rest of the
//! batch still commits.
//!
//! Charging the same holder twice in one epoch is not detected across
//! batches; within a batch duplicates are rejected.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use umbrella_common::{Amount, ArithmeticError, CoverEvent, HolderId, Result, UmbrellaError};

use crate::account::ChargeOutcome;
use crate::capacity::CapacityReservation;
use crate::collaborators::Role;
use crate::cooldown::NOT_STARTED;
use crate::engine::{CoverEngine, RecordGuard};

/// What happened to one holder in a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeStatus {
    /// Charged in full
    Charged { amount: Amount },
    /// Funds exhausted; policy force-deactivated
    Partial { due: Amount, charged: Amount },
    /// No billable cover
    Skipped,
    /// Premium arithmetic overflowed; the holder was not charged
    Failed,
}

/// Outcome of a committed batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingReport {
    /// Per-holder status, in request order
    pub entries: Vec<(HolderId, ChargeStatus)>,
    /// Balance-drawn premium moved to the pool
    pub total_collected: Amount,
    /// Holders force-deactivated by this batch
    pub deactivated: Vec<HolderId>,
    pub charged_at: u64,
}

impl BillingReport {
    pub fn status_of(&self, holder: &HolderId) -> Option<ChargeStatus> {
        self.entries
            .iter()
            .find(|(h, _)| h == holder)
            .map(|(_, status)| *status)
    }
}

impl CoverEngine {
    /// Charge one epoch's premiums
    ///
    /// `holders[i]` owes `premiums[i]`, capped at the premium for one charge
    /// cycle of their pre-deactivation cover.
    #[instrument(skip_all, fields(batch = holders.len()))]
    pub async fn charge_premiums(
        &self,
        caller: &HolderId,
        holders: &[HolderId],
        premiums: &[Amount],
    ) -> Result<BillingReport> {
        self.require_role(caller, Role::PremiumCollector)?;
        if holders.len() != premiums.len() {
            return Err(UmbrellaError::Validation(format!(
                "{} holders but {} premiums",
                holders.len(),
                premiums.len()
            )));
        }
        let mut seen = HashSet::with_capacity(holders.len());
        if let Some(dup) = holders.iter().find(|h| !seen.insert(**h)) {
            return Err(UmbrellaError::Validation(format!(
                "holder {} appears twice in one batch",
                dup.short()
            )));
        }

        let _gate = self.gate.read().await;
        let params = self.params();
        let now = self.now();

        // Lock in ascending id order
        let mut ordered: Vec<HolderId> = holders.to_vec();
        ordered.sort();
        let mut guards: HashMap<HolderId, RecordGuard> = HashMap::with_capacity(ordered.len());
        for holder in ordered {
            if let Some(handle) = self.existing(&holder) {
                guards.insert(holder, handle.lock_owned().await);
            }
        }

        let mut staged = Vec::with_capacity(guards.len());
        let mut reservations: Vec<CapacityReservation> = Vec::new();
        let mut events = Vec::new();
        let mut report = BillingReport::default();
        let mut total: Amount = 0;
        let mut charged_count = 0u64;
        let mut forced = 0u64;

        for (holder, premium) in holders.iter().zip(premiums) {
            let Some(guard) = guards.get(holder) else {
                report.entries.push((*holder, ChargeStatus::Skipped));
                continue;
            };
            let mut record = (**guard).clone();
            let billable_cover = record.pre_deactivate_cover();
            if billable_cover == 0 {
                debug!(holder = %holder.short(), "No billable cover, skipping");
                report.entries.push((*holder, ChargeStatus::Skipped));
                continue;
            }

            let use_points = params.points_usable(&record.account);
            let charge = params
                .calculator
                .min_required_balance(billable_cover)
                .and_then(|cap| record.account.charge_epoch((*premium).min(cap), use_points))
                .and_then(|outcome| {
                    total
                        .checked_add(outcome.from_balance())
                        .map(|next| (outcome, next))
                        .ok_or(ArithmeticError::Overflow)
                });
            let outcome = match charge {
                Ok((outcome, next_total)) => {
                    total = next_total;
                    outcome
                }
                Err(err) => {
                    warn!(holder = %holder.short(), error = %err, "Charge failed, holder left untouched");
                    report.entries.push((*holder, ChargeStatus::Failed));
                    continue;
                }
            };
            charged_count += 1;

            match outcome {
                ChargeOutcome::Full { .. } => {
                    events.push(CoverEvent::PremiumCharged {
                        holder: *holder,
                        amount: outcome.charged(),
                    });
                    report.entries.push((
                        *holder,
                        ChargeStatus::Charged {
                            amount: outcome.charged(),
                        },
                    ));
                }
                ChargeOutcome::Partial { due, .. } => {
                    let charged = outcome.charged();
                    warn!(
                        holder = %holder.short(),
                        due,
                        charged,
                        "Funds exhausted, forcing deactivation"
                    );
                    events.push(CoverEvent::PremiumPartiallyCharged {
                        holder: *holder,
                        due,
                        charged,
                    });

                    let current = record.active_cover();
                    reservations.push(self.capacity.reserve(&params.strategy, current, 0, None)?);

                    let mut policy_id = None;
                    if let Some(policy) = record.live_policy_mut() {
                        if policy.is_active() {
                            policy_id = Some(policy.id);
                        }
                        policy.cover_limit = 0;
                        policy.pre_deactivate_cover_limit = 0;
                    }
                    if let Some(policy_id) = policy_id {
                        forced += 1;
                        events.push(CoverEvent::PolicyDeactivated {
                            policy_id,
                            holder: *holder,
                        });
                    }
                    if record.account.cooldown_start == NOT_STARTED {
                        record.account.start_cooldown(now);
                        events.push(CoverEvent::CooldownStarted {
                            holder: *holder,
                            started_at: record.account.cooldown_start,
                        });
                    }

                    report.deactivated.push(*holder);
                    report
                        .entries
                        .push((*holder, ChargeStatus::Partial { due, charged }));
                }
            }
            staged.push((*holder, record));
        }

        if total > 0 {
            self.collaborators.funds.transfer_to_pool(total).await?;
        }

        // Commit
        for (holder, record) in staged {
            if let Some(guard) = guards.get_mut(&holder) {
                **guard = record;
            }
        }
        for reservation in reservations {
            reservation.commit();
        }
        self.latest_charged_at.store(now, std::sync::atomic::Ordering::SeqCst);
        self.metrics.premium_charged.inc_by(charged_count);
        self.metrics
            .partial_charges
            .inc_by(report.deactivated.len() as u64);
        self.metrics.policies_deactivated.inc_by(forced);
        self.refresh_cover_gauge(&params.strategy);

        events.push(CoverEvent::PremiumsCollected {
            holders: charged_count as usize,
            total,
        });
        self.publish(events);

        report.total_collected = total;
        report.charged_at = now;
        info!(
            charged = charged_count,
            deactivated = report.deactivated.len(),
            total,
            "Premiums collected"
        );
        Ok(report)
    }
}
