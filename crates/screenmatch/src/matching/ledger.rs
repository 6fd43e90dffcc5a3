use chrono::{DateTime, Duration, Utc};

use super::domain::{
    Allocation, AllocationId, AllocationOutcome, Campaign, CampaignId, DemandEntry,
    ExecutionRecord, MatchingStats, ScreeningTypeId, WaitlistEntry, WaitlistEntryId,
};

/// Transactional data-store boundary for the matching engine.
///
/// A single trait because the composite mutations (`commit_pairing`,
/// `revert_allocation`, `mark_claimed`) each span the waitlist, campaign, and
/// allocation tables and must commit as one atomic unit. Implementations back
/// this with a transactional store; the in-memory implementation in
/// [`super::memory`] holds all tables behind one lock.
pub trait MatchLedger: Send + Sync {
    // Waitlist ledger.

    /// Insert a new entry, rejecting a duplicate live (pending or matched)
    /// entry for the same (patient, screening type) pair with
    /// [`LedgerError::Conflict`].
    fn insert_entry(&self, entry: WaitlistEntry) -> Result<WaitlistEntry, LedgerError>;
    fn fetch_entry(&self, id: &WaitlistEntryId) -> Result<Option<WaitlistEntry>, LedgerError>;
    /// Delete an entry on patient withdrawal.
    fn remove_entry(&self, id: &WaitlistEntryId) -> Result<(), LedgerError>;
    /// Pending entries, oldest `joined_at` first, entry id as tie-break.
    fn list_pending(
        &self,
        screening_type: Option<&ScreeningTypeId>,
    ) -> Result<Vec<WaitlistEntry>, LedgerError>;
    /// Screening types that currently have at least one pending entry.
    fn screening_types_with_pending(&self) -> Result<Vec<ScreeningTypeId>, LedgerError>;

    // Campaign pool.

    fn insert_campaign(&self, campaign: Campaign) -> Result<Campaign, LedgerError>;
    fn fetch_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, LedgerError>;
    /// Active campaigns funding the screening type, largest remaining budget
    /// first, oldest `created_at` as tie-break.
    fn eligible_campaigns(
        &self,
        screening_type: &ScreeningTypeId,
    ) -> Result<Vec<Campaign>, LedgerError>;

    // Allocation ledger.

    /// Commit one pairing atomically: compare-and-set the entry from pending
    /// to matched, debit the campaign by `allocation.cost` (marking it
    /// depleted at zero), and insert the pending-claim allocation. Nothing is
    /// written unless every step succeeds.
    fn commit_pairing(&self, allocation: Allocation) -> Result<Allocation, LedgerError>;
    fn fetch_allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, LedgerError>;
    /// The at-most-one live allocation bound to a waitlist entry.
    fn live_allocation_for(
        &self,
        entry_id: &WaitlistEntryId,
    ) -> Result<Option<Allocation>, LedgerError>;
    /// Compare-and-set pending-claim to claimed, refused once the claim
    /// deadline has passed.
    fn mark_claimed(
        &self,
        id: &AllocationId,
        now: DateTime<Utc>,
    ) -> Result<Allocation, LedgerError>;
    /// Atomically finalize a pending-claim allocation as expired or
    /// cancelled, return the entry to pending with its original `joined_at`,
    /// and credit the campaign back by the original debit.
    fn revert_allocation(
        &self,
        id: &AllocationId,
        outcome: AllocationOutcome,
    ) -> Result<Allocation, LedgerError>;
    /// Pending-claim allocations whose deadline lies strictly before `now`.
    fn expired_allocations(&self, now: DateTime<Utc>) -> Result<Vec<Allocation>, LedgerError>;

    // Execution log.

    fn append_execution(&self, record: ExecutionRecord) -> Result<(), LedgerError>;
    /// Most recent execution records, newest first.
    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, LedgerError>;

    // Run lease.

    /// Try to take the cycle lease. Returns `false` without blocking when
    /// another holder owns an unexpired lease; a stale lease is reclaimed.
    fn acquire_run_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, LedgerError>;
    fn release_run_lease(&self, holder: &str) -> Result<(), LedgerError>;

    // Dashboard reads.

    fn stats(&self, now: DateTime<Utc>) -> Result<MatchingStats, LedgerError>;
    /// Pending demand per screening type, highest demand first.
    fn pending_demand(&self) -> Result<Vec<DemandEntry>, LedgerError>;
}

/// Error enumeration for ledger failures.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("waitlist entry is no longer pending")]
    AlreadyMatched,
    #[error("campaign budget cannot cover the screening cost")]
    InsufficientBudget,
    #[error("invalid allocation transition: {0}")]
    InvalidTransition(String),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}
