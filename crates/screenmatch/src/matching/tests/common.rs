use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::MatchingConfig;
use crate::matching::domain::{
    Allocation, AllocationId, AllocationOutcome, Campaign, CampaignId, CampaignStatus,
    DemandEntry, DonorId, ExecutionRecord, MatchingStats, PatientId, ScreeningTypeId,
    WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};
use crate::matching::engine::MatchingEngine;
use crate::matching::ledger::{LedgerError, MatchLedger};
use crate::matching::memory::InMemoryLedger;

pub(super) const COST: u32 = 200;

/// Fixed anchor so queue ordering and deadlines are deterministic.
pub(super) fn ts(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub(super) fn screening(name: &str) -> ScreeningTypeId {
    ScreeningTypeId(name.to_string())
}

pub(super) fn config() -> MatchingConfig {
    MatchingConfig {
        default_screening_cost: COST,
        ..MatchingConfig::default()
    }
}

pub(super) fn build_engine() -> (MatchingEngine<InMemoryLedger>, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = MatchingEngine::new(ledger.clone(), config());
    (engine, ledger)
}

pub(super) fn seed_entry(
    ledger: &InMemoryLedger,
    patient: &str,
    screening_type: &ScreeningTypeId,
    joined_at: DateTime<Utc>,
) -> WaitlistEntry {
    let entry = WaitlistEntry {
        id: WaitlistEntryId::generate(),
        patient_id: PatientId(patient.to_string()),
        screening_type_id: screening_type.clone(),
        status: WaitlistStatus::Pending,
        joined_at,
        claimed_at: None,
    };
    ledger.insert_entry(entry).expect("entry seeds")
}

pub(super) fn seed_campaign(
    ledger: &InMemoryLedger,
    title: &str,
    budget: u32,
    screening_types: &[&ScreeningTypeId],
    created_at: DateTime<Utc>,
) -> Campaign {
    let campaign = Campaign {
        id: CampaignId::generate(),
        donor_id: DonorId(format!("donor-{title}")),
        title: title.to_string(),
        funded_screenings: screening_types.iter().map(|st| (*st).clone()).collect(),
        status: CampaignStatus::Active,
        remaining_budget: budget,
        created_at,
    };
    ledger.insert_campaign(campaign).expect("campaign seeds")
}

pub(super) fn campaign_budget(ledger: &InMemoryLedger, id: &CampaignId) -> u32 {
    ledger
        .fetch_campaign(id)
        .expect("campaign fetch")
        .expect("campaign present")
        .remaining_budget
}

pub(super) fn entry_status(ledger: &InMemoryLedger, id: &WaitlistEntryId) -> WaitlistStatus {
    ledger
        .fetch_entry(id)
        .expect("entry fetch")
        .expect("entry present")
        .status
}

pub(super) fn live_allocation(ledger: &InMemoryLedger, entry: &WaitlistEntryId) -> Allocation {
    ledger
        .live_allocation_for(entry)
        .expect("allocation fetch")
        .expect("live allocation present")
}

/// Ledger wrapper that parks the first pairing commit on a pair of barriers,
/// holding a cycle mid-flight so another trigger can race it.
pub(super) struct GatedLedger {
    inner: InMemoryLedger,
    entered: Barrier,
    release: Barrier,
    gated: AtomicU32,
}

impl GatedLedger {
    pub(super) fn new() -> Self {
        Self {
            inner: InMemoryLedger::new(),
            entered: Barrier::new(2),
            release: Barrier::new(2),
            gated: AtomicU32::new(1),
        }
    }

    pub(super) fn inner(&self) -> &InMemoryLedger {
        &self.inner
    }

    /// Blocks until a pairing commit has entered the gate.
    pub(super) fn wait_until_pairing(&self) {
        self.entered.wait();
    }

    /// Lets the parked pairing commit proceed.
    pub(super) fn release_pairing(&self) {
        self.release.wait();
    }
}

impl MatchLedger for GatedLedger {
    fn insert_entry(&self, entry: WaitlistEntry) -> Result<WaitlistEntry, LedgerError> {
        self.inner.insert_entry(entry)
    }

    fn fetch_entry(&self, id: &WaitlistEntryId) -> Result<Option<WaitlistEntry>, LedgerError> {
        self.inner.fetch_entry(id)
    }

    fn remove_entry(&self, id: &WaitlistEntryId) -> Result<(), LedgerError> {
        self.inner.remove_entry(id)
    }

    fn list_pending(
        &self,
        screening_type: Option<&ScreeningTypeId>,
    ) -> Result<Vec<WaitlistEntry>, LedgerError> {
        self.inner.list_pending(screening_type)
    }

    fn screening_types_with_pending(&self) -> Result<Vec<ScreeningTypeId>, LedgerError> {
        self.inner.screening_types_with_pending()
    }

    fn insert_campaign(&self, campaign: Campaign) -> Result<Campaign, LedgerError> {
        self.inner.insert_campaign(campaign)
    }

    fn fetch_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, LedgerError> {
        self.inner.fetch_campaign(id)
    }

    fn eligible_campaigns(
        &self,
        screening_type: &ScreeningTypeId,
    ) -> Result<Vec<Campaign>, LedgerError> {
        self.inner.eligible_campaigns(screening_type)
    }

    fn commit_pairing(&self, allocation: Allocation) -> Result<Allocation, LedgerError> {
        if self.gated.swap(0, Ordering::SeqCst) == 1 {
            self.entered.wait();
            self.release.wait();
        }
        self.inner.commit_pairing(allocation)
    }

    fn fetch_allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, LedgerError> {
        self.inner.fetch_allocation(id)
    }

    fn live_allocation_for(
        &self,
        entry_id: &WaitlistEntryId,
    ) -> Result<Option<Allocation>, LedgerError> {
        self.inner.live_allocation_for(entry_id)
    }

    fn mark_claimed(
        &self,
        id: &AllocationId,
        now: DateTime<Utc>,
    ) -> Result<Allocation, LedgerError> {
        self.inner.mark_claimed(id, now)
    }

    fn revert_allocation(
        &self,
        id: &AllocationId,
        outcome: AllocationOutcome,
    ) -> Result<Allocation, LedgerError> {
        self.inner.revert_allocation(id, outcome)
    }

    fn expired_allocations(&self, now: DateTime<Utc>) -> Result<Vec<Allocation>, LedgerError> {
        self.inner.expired_allocations(now)
    }

    fn append_execution(&self, record: ExecutionRecord) -> Result<(), LedgerError> {
        self.inner.append_execution(record)
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, LedgerError> {
        self.inner.recent_executions(limit)
    }

    fn acquire_run_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, LedgerError> {
        self.inner.acquire_run_lease(holder, now, ttl)
    }

    fn release_run_lease(&self, holder: &str) -> Result<(), LedgerError> {
        self.inner.release_run_lease(holder)
    }

    fn stats(&self, now: DateTime<Utc>) -> Result<MatchingStats, LedgerError> {
        self.inner.stats(now)
    }

    fn pending_demand(&self) -> Result<Vec<DemandEntry>, LedgerError> {
        self.inner.pending_demand()
    }
}

/// Ledger wrapper that fails the next N pairing commits with a transient
/// store error, for exercising the skip-and-abort failure policy.
pub(super) struct FlakyLedger {
    inner: InMemoryLedger,
    failing_commits: AtomicU32,
}

impl FlakyLedger {
    pub(super) fn failing(commits: u32) -> Self {
        Self {
            inner: InMemoryLedger::new(),
            failing_commits: AtomicU32::new(commits),
        }
    }

    pub(super) fn inner(&self) -> &InMemoryLedger {
        &self.inner
    }
}

impl MatchLedger for FlakyLedger {
    fn insert_entry(&self, entry: WaitlistEntry) -> Result<WaitlistEntry, LedgerError> {
        self.inner.insert_entry(entry)
    }

    fn fetch_entry(&self, id: &WaitlistEntryId) -> Result<Option<WaitlistEntry>, LedgerError> {
        self.inner.fetch_entry(id)
    }

    fn remove_entry(&self, id: &WaitlistEntryId) -> Result<(), LedgerError> {
        self.inner.remove_entry(id)
    }

    fn list_pending(
        &self,
        screening_type: Option<&ScreeningTypeId>,
    ) -> Result<Vec<WaitlistEntry>, LedgerError> {
        self.inner.list_pending(screening_type)
    }

    fn screening_types_with_pending(&self) -> Result<Vec<ScreeningTypeId>, LedgerError> {
        self.inner.screening_types_with_pending()
    }

    fn insert_campaign(&self, campaign: Campaign) -> Result<Campaign, LedgerError> {
        self.inner.insert_campaign(campaign)
    }

    fn fetch_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, LedgerError> {
        self.inner.fetch_campaign(id)
    }

    fn eligible_campaigns(
        &self,
        screening_type: &ScreeningTypeId,
    ) -> Result<Vec<Campaign>, LedgerError> {
        self.inner.eligible_campaigns(screening_type)
    }

    fn commit_pairing(&self, allocation: Allocation) -> Result<Allocation, LedgerError> {
        let remaining = self.failing_commits.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_commits.store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::Unavailable("injected failure".to_string()));
        }
        self.inner.commit_pairing(allocation)
    }

    fn fetch_allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, LedgerError> {
        self.inner.fetch_allocation(id)
    }

    fn live_allocation_for(
        &self,
        entry_id: &WaitlistEntryId,
    ) -> Result<Option<Allocation>, LedgerError> {
        self.inner.live_allocation_for(entry_id)
    }

    fn mark_claimed(
        &self,
        id: &AllocationId,
        now: DateTime<Utc>,
    ) -> Result<Allocation, LedgerError> {
        self.inner.mark_claimed(id, now)
    }

    fn revert_allocation(
        &self,
        id: &AllocationId,
        outcome: AllocationOutcome,
    ) -> Result<Allocation, LedgerError> {
        self.inner.revert_allocation(id, outcome)
    }

    fn expired_allocations(&self, now: DateTime<Utc>) -> Result<Vec<Allocation>, LedgerError> {
        self.inner.expired_allocations(now)
    }

    fn append_execution(&self, record: ExecutionRecord) -> Result<(), LedgerError> {
        self.inner.append_execution(record)
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, LedgerError> {
        self.inner.recent_executions(limit)
    }

    fn acquire_run_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, LedgerError> {
        self.inner.acquire_run_lease(holder, now, ttl)
    }

    fn release_run_lease(&self, holder: &str) -> Result<(), LedgerError> {
        self.inner.release_run_lease(holder)
    }

    fn stats(&self, now: DateTime<Utc>) -> Result<MatchingStats, LedgerError> {
        self.inner.stats(now)
    }

    fn pending_demand(&self) -> Result<Vec<DemandEntry>, LedgerError> {
        self.inner.pending_demand()
    }
}
