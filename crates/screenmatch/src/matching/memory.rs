use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};

use super::domain::{
    Allocation, AllocationId, AllocationOutcome, Campaign, CampaignId, CampaignStatus,
    DemandEntry, ExecutionRecord, MatchingStats, ScreeningTypeId, WaitlistEntry, WaitlistEntryId,
    WaitlistStatus,
};
use super::ledger::{LedgerError, MatchLedger};

#[derive(Debug, Clone)]
struct RunLease {
    holder: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct LedgerInner {
    entries: BTreeMap<WaitlistEntryId, WaitlistEntry>,
    campaigns: BTreeMap<CampaignId, Campaign>,
    allocations: BTreeMap<AllocationId, Allocation>,
    executions: Vec<ExecutionRecord>,
    lease: Option<RunLease>,
}

/// Single-process [`MatchLedger`] keeping every table behind one mutex, so
/// each trait call commits as one atomic unit. Serves the bundled service and
/// the test suites; multi-instance deployments substitute a transactional
/// backend implementing the same trait.
#[derive(Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>, LedgerError> {
        self.inner
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger mutex poisoned".to_string()))
    }
}

impl MatchLedger for InMemoryLedger {
    fn insert_entry(&self, entry: WaitlistEntry) -> Result<WaitlistEntry, LedgerError> {
        let mut inner = self.lock()?;
        let duplicate = inner.entries.values().any(|existing| {
            existing.patient_id == entry.patient_id
                && existing.screening_type_id == entry.screening_type_id
        });
        if duplicate {
            return Err(LedgerError::Conflict);
        }
        inner.entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    fn fetch_entry(&self, id: &WaitlistEntryId) -> Result<Option<WaitlistEntry>, LedgerError> {
        Ok(self.lock()?.entries.get(id).cloned())
    }

    fn remove_entry(&self, id: &WaitlistEntryId) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        inner
            .entries
            .remove(id)
            .map(|_| ())
            .ok_or(LedgerError::NotFound)
    }

    fn list_pending(
        &self,
        screening_type: Option<&ScreeningTypeId>,
    ) -> Result<Vec<WaitlistEntry>, LedgerError> {
        let inner = self.lock()?;
        let mut pending: Vec<WaitlistEntry> = inner
            .entries
            .values()
            .filter(|entry| entry.status == WaitlistStatus::Pending)
            .filter(|entry| {
                screening_type.map_or(true, |wanted| &entry.screening_type_id == wanted)
            })
            .cloned()
            .collect();
        pending.sort_by(|a, b| (a.joined_at, &a.id).cmp(&(b.joined_at, &b.id)));
        Ok(pending)
    }

    fn screening_types_with_pending(&self) -> Result<Vec<ScreeningTypeId>, LedgerError> {
        let inner = self.lock()?;
        let mut types: Vec<ScreeningTypeId> = inner
            .entries
            .values()
            .filter(|entry| entry.status == WaitlistStatus::Pending)
            .map(|entry| entry.screening_type_id.clone())
            .collect();
        types.sort();
        types.dedup();
        Ok(types)
    }

    fn insert_campaign(&self, campaign: Campaign) -> Result<Campaign, LedgerError> {
        let mut inner = self.lock()?;
        if inner.campaigns.contains_key(&campaign.id) {
            return Err(LedgerError::Conflict);
        }
        inner.campaigns.insert(campaign.id.clone(), campaign.clone());
        Ok(campaign)
    }

    fn fetch_campaign(&self, id: &CampaignId) -> Result<Option<Campaign>, LedgerError> {
        Ok(self.lock()?.campaigns.get(id).cloned())
    }

    fn eligible_campaigns(
        &self,
        screening_type: &ScreeningTypeId,
    ) -> Result<Vec<Campaign>, LedgerError> {
        let inner = self.lock()?;
        let mut eligible: Vec<Campaign> = inner
            .campaigns
            .values()
            .filter(|campaign| campaign.status == CampaignStatus::Active)
            .filter(|campaign| campaign.funds(screening_type))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            (Reverse(a.remaining_budget), a.created_at, &a.id)
                .cmp(&(Reverse(b.remaining_budget), b.created_at, &b.id))
        });
        Ok(eligible)
    }

    fn commit_pairing(&self, allocation: Allocation) -> Result<Allocation, LedgerError> {
        let mut inner = self.lock()?;

        let entry = inner
            .entries
            .get(&allocation.waitlist_entry_id)
            .ok_or(LedgerError::NotFound)?;
        if entry.status != WaitlistStatus::Pending {
            return Err(LedgerError::AlreadyMatched);
        }
        let live = inner.allocations.values().any(|existing| {
            existing.waitlist_entry_id == allocation.waitlist_entry_id
                && existing.outcome.is_live()
        });
        if live {
            return Err(LedgerError::AlreadyMatched);
        }

        let campaign = inner
            .campaigns
            .get(&allocation.campaign_id)
            .ok_or(LedgerError::NotFound)?;
        if campaign.status != CampaignStatus::Active {
            return Err(LedgerError::InsufficientBudget);
        }
        let remaining = campaign
            .remaining_budget
            .checked_sub(allocation.cost)
            .ok_or(LedgerError::InsufficientBudget)?;

        // All checks passed; apply the three writes together.
        let campaign = inner
            .campaigns
            .get_mut(&allocation.campaign_id)
            .ok_or(LedgerError::NotFound)?;
        campaign.remaining_budget = remaining;
        if remaining == 0 {
            campaign.status = CampaignStatus::Depleted;
        }
        let entry = inner
            .entries
            .get_mut(&allocation.waitlist_entry_id)
            .ok_or(LedgerError::NotFound)?;
        entry.status = WaitlistStatus::Matched;
        entry.claimed_at = Some(allocation.created_at);

        inner
            .allocations
            .insert(allocation.id.clone(), allocation.clone());
        Ok(allocation)
    }

    fn fetch_allocation(&self, id: &AllocationId) -> Result<Option<Allocation>, LedgerError> {
        Ok(self.lock()?.allocations.get(id).cloned())
    }

    fn live_allocation_for(
        &self,
        entry_id: &WaitlistEntryId,
    ) -> Result<Option<Allocation>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner
            .allocations
            .values()
            .find(|allocation| {
                &allocation.waitlist_entry_id == entry_id && allocation.outcome.is_live()
            })
            .cloned())
    }

    fn mark_claimed(
        &self,
        id: &AllocationId,
        now: DateTime<Utc>,
    ) -> Result<Allocation, LedgerError> {
        let mut inner = self.lock()?;
        let allocation = inner.allocations.get_mut(id).ok_or(LedgerError::NotFound)?;
        if allocation.outcome != AllocationOutcome::PendingClaim {
            return Err(LedgerError::InvalidTransition(format!(
                "cannot claim a {} allocation",
                allocation.outcome.label()
            )));
        }
        if now > allocation.claim_deadline {
            return Err(LedgerError::InvalidTransition(
                "claim deadline has passed".to_string(),
            ));
        }
        allocation.outcome = AllocationOutcome::Claimed;
        allocation.claimed_at = Some(now);
        Ok(allocation.clone())
    }

    fn revert_allocation(
        &self,
        id: &AllocationId,
        outcome: AllocationOutcome,
    ) -> Result<Allocation, LedgerError> {
        if !matches!(
            outcome,
            AllocationOutcome::Expired | AllocationOutcome::Cancelled
        ) {
            return Err(LedgerError::InvalidTransition(format!(
                "{} is not a reversal outcome",
                outcome.label()
            )));
        }

        let mut inner = self.lock()?;
        let allocation = inner.allocations.get(id).ok_or(LedgerError::NotFound)?;
        if allocation.outcome != AllocationOutcome::PendingClaim {
            return Err(LedgerError::InvalidTransition(format!(
                "cannot revert a {} allocation",
                allocation.outcome.label()
            )));
        }
        let entry_id = allocation.waitlist_entry_id.clone();
        let campaign_id = allocation.campaign_id.clone();
        let cost = allocation.cost;

        if let Some(entry) = inner.entries.get_mut(&entry_id) {
            entry.status = WaitlistStatus::Pending;
            entry.claimed_at = None;
        }
        if let Some(campaign) = inner.campaigns.get_mut(&campaign_id) {
            campaign.remaining_budget += cost;
            if campaign.status == CampaignStatus::Depleted && campaign.remaining_budget > 0 {
                campaign.status = CampaignStatus::Active;
            }
        }
        let allocation = inner
            .allocations
            .get_mut(id)
            .ok_or(LedgerError::NotFound)?;
        allocation.outcome = outcome;
        Ok(allocation.clone())
    }

    fn expired_allocations(&self, now: DateTime<Utc>) -> Result<Vec<Allocation>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner
            .allocations
            .values()
            .filter(|allocation| {
                allocation.outcome == AllocationOutcome::PendingClaim
                    && allocation.claim_deadline < now
            })
            .cloned()
            .collect())
    }

    fn append_execution(&self, record: ExecutionRecord) -> Result<(), LedgerError> {
        self.lock()?.executions.push(record);
        Ok(())
    }

    fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, LedgerError> {
        let inner = self.lock()?;
        Ok(inner.executions.iter().rev().take(limit).cloned().collect())
    }

    fn acquire_run_lease(
        &self,
        holder: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, LedgerError> {
        let mut inner = self.lock()?;
        if let Some(lease) = &inner.lease {
            if lease.holder != holder && lease.expires_at > now {
                return Ok(false);
            }
        }
        inner.lease = Some(RunLease {
            holder: holder.to_string(),
            expires_at: now + ttl,
        });
        Ok(true)
    }

    fn release_run_lease(&self, holder: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock()?;
        if inner
            .lease
            .as_ref()
            .is_some_and(|lease| lease.holder == holder)
        {
            inner.lease = None;
        }
        Ok(())
    }

    fn stats(&self, now: DateTime<Utc>) -> Result<MatchingStats, LedgerError> {
        let inner = self.lock()?;
        let day_ago = now - Duration::hours(24);
        let pending = inner
            .entries
            .values()
            .filter(|entry| entry.status == WaitlistStatus::Pending)
            .count() as u64;
        let matched = inner
            .entries
            .values()
            .filter(|entry| entry.status == WaitlistStatus::Matched)
            .count() as u64;
        let matched_last_24h = inner
            .entries
            .values()
            .filter(|entry| entry.status == WaitlistStatus::Matched)
            .filter(|entry| entry.claimed_at.is_some_and(|at| at >= day_ago))
            .count() as u64;
        let campaigns_total = inner.campaigns.len() as u64;
        let campaigns_active = inner
            .campaigns
            .values()
            .filter(|campaign| campaign.status == CampaignStatus::Active)
            .count() as u64;
        Ok(MatchingStats {
            pending,
            matched,
            matched_last_24h,
            campaigns_total,
            campaigns_active,
        })
    }

    fn pending_demand(&self) -> Result<Vec<DemandEntry>, LedgerError> {
        let inner = self.lock()?;
        let mut counts: BTreeMap<ScreeningTypeId, u64> = BTreeMap::new();
        for entry in inner.entries.values() {
            if entry.status == WaitlistStatus::Pending {
                *counts.entry(entry.screening_type_id.clone()).or_default() += 1;
            }
        }
        let mut demand: Vec<DemandEntry> = counts
            .into_iter()
            .map(|(screening_type_id, pending)| DemandEntry {
                screening_type_id,
                pending,
            })
            .collect();
        demand.sort_by(|a, b| {
            (Reverse(a.pending), &a.screening_type_id)
                .cmp(&(Reverse(b.pending), &b.screening_type_id))
        });
        Ok(demand)
    }
}
