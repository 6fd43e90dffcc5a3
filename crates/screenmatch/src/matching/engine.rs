use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MatchingConfig;

use super::domain::{
    Allocation, AllocationId, AllocationOutcome, DemandEntry, ExecutionRecord, MatchTrigger,
    MatchingStats, PatientId, ScreeningTypeId, WaitlistEntry, WaitlistEntryId,
};
use super::ledger::{LedgerError, MatchLedger};
use super::sweeper::{ExpirySweeper, SweepReport};

/// Consecutive store failures tolerated within one screening-type partition
/// before the remainder of that partition is abandoned.
const MAX_CONSECUTIVE_STORE_FAILURES: u32 = 3;

/// Orchestrates matching cycles over the ledger: pairs pending waitlist
/// entries against active campaign budgets, sweeps expired allocations, and
/// appends an execution record per run, all under the run lease.
pub struct MatchingEngine<L> {
    ledger: Arc<L>,
    sweeper: ExpirySweeper<L>,
    config: MatchingConfig,
}

/// Error raised by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("a matching cycle is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Default)]
struct PartitionOutcome {
    matched: u32,
    errors: Vec<String>,
}

impl<L> MatchingEngine<L>
where
    L: MatchLedger,
{
    pub fn new(ledger: Arc<L>, config: MatchingConfig) -> Self {
        Self {
            sweeper: ExpirySweeper::new(ledger.clone()),
            ledger,
            config,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Run one matching cycle. Rejected immediately with
    /// [`EngineError::AlreadyRunning`] when another holder owns the run
    /// lease; it never queues behind a running cycle.
    pub fn run_cycle(&self, trigger: MatchTrigger) -> Result<ExecutionRecord, EngineError> {
        self.run_cycle_at(trigger, Utc::now())
    }

    /// Deterministic entry point taking the cycle's clock reading.
    pub fn run_cycle_at(
        &self,
        trigger: MatchTrigger,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, EngineError> {
        // Each run takes the lease under its own holder id, so a second
        // trigger through this same engine is rejected like any other
        // contender while the lease is live.
        let holder = Uuid::new_v4().to_string();
        let acquired = self
            .ledger
            .acquire_run_lease(&holder, now, self.config.lease_ttl)?;
        if !acquired {
            return Err(EngineError::AlreadyRunning);
        }

        info!(trigger = %trigger.describe(), "matching cycle started");
        let mut matched_count = 0u32;
        let mut errors: Vec<String> = Vec::new();

        match self.ledger.screening_types_with_pending() {
            Ok(screening_types) => {
                for screening_type in screening_types {
                    let outcome = self.match_partition(&screening_type, now);
                    matched_count += outcome.matched;
                    errors.extend(outcome.errors);
                }
            }
            Err(err) => {
                warn!(%err, "could not load screening-type partitions");
                errors.push(format!("loading partitions: {err}"));
            }
        }

        let sweep = self.sweeper.sweep(now);
        if sweep.failures > 0 {
            errors.push(format!("{} expiry reversions failed", sweep.failures));
        }

        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            triggered_by: trigger,
            started_at: now,
            finished_at: Utc::now(),
            matched_count,
            expired_count: sweep.reverted,
            error_summary: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        };

        // Best effort: a recorder failure must not fail the cycle.
        if let Err(err) = self.ledger.append_execution(record.clone()) {
            warn!(%err, "failed to append execution record");
        }
        if let Err(err) = self.ledger.release_run_lease(&holder) {
            warn!(%err, "failed to release run lease");
        }

        info!(
            matched = record.matched_count,
            expired = record.expired_count,
            "matching cycle finished"
        );
        Ok(record)
    }

    /// Match one screening type's queue, oldest entry first, against its
    /// eligible campaigns, largest remaining budget first.
    fn match_partition(
        &self,
        screening_type: &ScreeningTypeId,
        now: DateTime<Utc>,
    ) -> PartitionOutcome {
        let mut outcome = PartitionOutcome::default();

        let entries = match self.ledger.list_pending(Some(screening_type)) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(screening_type = %screening_type.0, %err, "could not load pending entries");
                outcome
                    .errors
                    .push(format!("partition {}: {err}", screening_type.0));
                return outcome;
            }
        };
        let mut campaigns = match self.ledger.eligible_campaigns(screening_type) {
            Ok(campaigns) => campaigns,
            Err(err) => {
                warn!(screening_type = %screening_type.0, %err, "could not load eligible campaigns");
                outcome
                    .errors
                    .push(format!("partition {}: {err}", screening_type.0));
                return outcome;
            }
        };

        let cost = self.config.cost_for(screening_type);
        let mut consecutive_failures = 0u32;

        for entry in entries {
            // First eligible campaign that can cover the full cost; partial
            // funding of a single screening is never permitted.
            let Some(slot) = campaigns
                .iter()
                .position(|campaign| campaign.remaining_budget >= cost)
            else {
                continue;
            };

            let allocation = Allocation::pending_claim(
                entry.id.clone(),
                campaigns[slot].id.clone(),
                cost,
                now,
                now + self.config.claim_ttl,
            );
            match self.ledger.commit_pairing(allocation) {
                Ok(allocation) => {
                    consecutive_failures = 0;
                    outcome.matched += 1;
                    debug!(
                        entry = %entry.id.0,
                        campaign = %allocation.campaign_id.0,
                        cost,
                        "paired waitlist entry with campaign"
                    );
                    let campaign = &mut campaigns[slot];
                    campaign.remaining_budget -= cost;
                    if campaign.remaining_budget == 0 {
                        campaigns.remove(slot);
                    }
                }
                // Stale reference: the entry was matched, withdrawn, or the
                // campaign mutated since the snapshot. Skip the pairing.
                Err(err @ (LedgerError::AlreadyMatched | LedgerError::NotFound)) => {
                    consecutive_failures = 0;
                    debug!(entry = %entry.id.0, %err, "skipping stale pairing");
                }
                Err(LedgerError::InsufficientBudget) => {
                    consecutive_failures = 0;
                    campaigns.remove(slot);
                }
                Err(LedgerError::Unavailable(message)) => {
                    consecutive_failures += 1;
                    warn!(entry = %entry.id.0, %message, "store failure during pairing");
                    outcome
                        .errors
                        .push(format!("pairing {}: {message}", entry.id.0));
                    if consecutive_failures >= MAX_CONSECUTIVE_STORE_FAILURES {
                        outcome.errors.push(format!(
                            "partition {} aborted after {consecutive_failures} consecutive store failures",
                            screening_type.0
                        ));
                        break;
                    }
                }
                Err(err) => {
                    consecutive_failures = 0;
                    warn!(entry = %entry.id.0, %err, "pairing rejected");
                    outcome.errors.push(format!("pairing {}: {err}", entry.id.0));
                }
            }
        }

        outcome
    }

    /// Revert every allocation past its claim deadline; see
    /// [`ExpirySweeper::sweep`]. Usable independently of a matching cycle.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweeper.sweep(now)
    }

    /// Put a patient on the waitlist for a screening type. At most one live
    /// entry per (patient, screening type) is permitted.
    pub fn join_waitlist(
        &self,
        patient_id: PatientId,
        screening_type_id: ScreeningTypeId,
    ) -> Result<WaitlistEntry, EngineError> {
        self.join_waitlist_at(patient_id, screening_type_id, Utc::now())
    }

    pub fn join_waitlist_at(
        &self,
        patient_id: PatientId,
        screening_type_id: ScreeningTypeId,
        now: DateTime<Utc>,
    ) -> Result<WaitlistEntry, EngineError> {
        let entry = WaitlistEntry::join(patient_id, screening_type_id, now);
        Ok(self.ledger.insert_entry(entry)?)
    }

    /// Look up one waitlist entry together with its live allocation, if any.
    /// This is the patient-facing status read.
    pub fn waitlist_status(
        &self,
        entry_id: &WaitlistEntryId,
    ) -> Result<(WaitlistEntry, Option<Allocation>), EngineError> {
        let entry = self
            .ledger
            .fetch_entry(entry_id)?
            .ok_or(LedgerError::NotFound)?;
        let allocation = self.ledger.live_allocation_for(entry_id)?;
        Ok((entry, allocation))
    }

    /// Withdraw a waitlist entry. A live pending-claim allocation is
    /// cancelled first, releasing its funds; withdrawal after a claim is
    /// refused.
    pub fn withdraw(&self, entry_id: &WaitlistEntryId) -> Result<(), EngineError> {
        self.ledger
            .fetch_entry(entry_id)?
            .ok_or(LedgerError::NotFound)?;
        if let Some(allocation) = self.ledger.live_allocation_for(entry_id)? {
            if allocation.outcome == AllocationOutcome::Claimed {
                return Err(EngineError::Ledger(LedgerError::Conflict));
            }
            self.ledger
                .revert_allocation(&allocation.id, AllocationOutcome::Cancelled)?;
        }
        Ok(self.ledger.remove_entry(entry_id)?)
    }

    /// Mark an allocation claimed; called by the booking collaborator when
    /// the patient uses the allocation before its deadline.
    pub fn claim(&self, allocation_id: &AllocationId) -> Result<Allocation, EngineError> {
        self.claim_at(allocation_id, Utc::now())
    }

    pub fn claim_at(
        &self,
        allocation_id: &AllocationId,
        now: DateTime<Utc>,
    ) -> Result<Allocation, EngineError> {
        Ok(self.ledger.mark_claimed(allocation_id, now)?)
    }

    /// Administrative cancellation of a pending-claim allocation; releases
    /// funds and the queue slot exactly as an expiry does.
    pub fn cancel(&self, allocation_id: &AllocationId) -> Result<Allocation, EngineError> {
        Ok(self
            .ledger
            .revert_allocation(allocation_id, AllocationOutcome::Cancelled)?)
    }

    pub fn stats(&self) -> Result<MatchingStats, EngineError> {
        Ok(self.ledger.stats(Utc::now())?)
    }

    /// Pending demand per screening type, highest demand first.
    pub fn demand_summary(&self) -> Result<Vec<DemandEntry>, EngineError> {
        Ok(self.ledger.pending_demand()?)
    }

    /// Most recent execution records, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<ExecutionRecord>, EngineError> {
        Ok(self.ledger.recent_executions(limit)?)
    }
}
