use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier wrapper for a patient account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatientId(pub String);

/// Identifier wrapper for a screening type (mammography, colonoscopy, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScreeningTypeId(pub String);

/// Identifier wrapper for a donor account.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DonorId(pub String);

/// Identifier wrapper for a waitlist entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WaitlistEntryId(pub String);

impl WaitlistEntryId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Identifier wrapper for a donation campaign.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Identifier wrapper for an allocation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AllocationId(pub String);

impl AllocationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Status of a patient's standing request for a subsidized screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitlistStatus {
    Pending,
    Matched,
}

impl WaitlistStatus {
    pub const fn label(self) -> &'static str {
        match self {
            WaitlistStatus::Pending => "pending",
            WaitlistStatus::Matched => "matched",
        }
    }
}

/// One patient's demand for one screening type.
///
/// At most one entry per (patient, screening type) may be live (pending or
/// matched) at a time; the ledger rejects duplicate inserts. `claimed_at` is
/// set when an allocation is created for the entry and cleared again when that
/// allocation is reverted, while `joined_at` is never touched after creation
/// so the entry keeps its place in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    pub id: WaitlistEntryId,
    pub patient_id: PatientId,
    pub screening_type_id: ScreeningTypeId,
    pub status: WaitlistStatus,
    pub joined_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
}

impl WaitlistEntry {
    pub fn join(
        patient_id: PatientId,
        screening_type_id: ScreeningTypeId,
        joined_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WaitlistEntryId::generate(),
            patient_id,
            screening_type_id,
            status: WaitlistStatus::Pending,
            joined_at,
            claimed_at: None,
        }
    }
}

/// Lifecycle status of a donation campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Depleted,
    Closed,
}

impl CampaignStatus {
    pub const fn label(self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Depleted => "depleted",
            CampaignStatus::Closed => "closed",
        }
    }
}

/// A donor-funded pool of money earmarked for a fixed set of screening types.
///
/// Budgets are minor currency units held as `u32`, so a negative balance is
/// unrepresentable. A campaign flips to [`CampaignStatus::Depleted`] the
/// moment its budget reaches zero and back to [`CampaignStatus::Active`] if a
/// reverted allocation credits funds back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub donor_id: DonorId,
    pub title: String,
    pub funded_screenings: Vec<ScreeningTypeId>,
    pub status: CampaignStatus,
    pub remaining_budget: u32,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn funds(&self, screening_type: &ScreeningTypeId) -> bool {
        self.funded_screenings.contains(screening_type)
    }
}

/// Outcome of an allocation's claim window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationOutcome {
    PendingClaim,
    Claimed,
    Expired,
    Cancelled,
}

impl AllocationOutcome {
    pub const fn label(self) -> &'static str {
        match self {
            AllocationOutcome::PendingClaim => "pending_claim",
            AllocationOutcome::Claimed => "claimed",
            AllocationOutcome::Expired => "expired",
            AllocationOutcome::Cancelled => "cancelled",
        }
    }

    /// A live allocation still binds its waitlist entry and campaign funds.
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            AllocationOutcome::PendingClaim | AllocationOutcome::Claimed
        )
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, AllocationOutcome::PendingClaim)
    }
}

/// The binding of one waitlist entry to one campaign's funds.
///
/// `cost` records the exact debit taken from the campaign so an expiry or
/// cancellation can credit back precisely the original amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub waitlist_entry_id: WaitlistEntryId,
    pub campaign_id: CampaignId,
    pub cost: u32,
    pub created_at: DateTime<Utc>,
    pub claim_deadline: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub outcome: AllocationOutcome,
}

impl Allocation {
    pub fn pending_claim(
        waitlist_entry_id: WaitlistEntryId,
        campaign_id: CampaignId,
        cost: u32,
        created_at: DateTime<Utc>,
        claim_deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AllocationId::generate(),
            waitlist_entry_id,
            campaign_id,
            cost,
            created_at,
            claim_deadline,
            claimed_at: None,
            outcome: AllocationOutcome::PendingClaim,
        }
    }
}

/// Source of a matching-cycle trigger, carried for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchTrigger {
    Scheduled,
    Manual { admin_id: String },
}

impl MatchTrigger {
    pub fn describe(&self) -> String {
        match self {
            MatchTrigger::Scheduled => "scheduled".to_string(),
            MatchTrigger::Manual { admin_id } => format!("manual:{admin_id}"),
        }
    }
}

/// Append-only audit row describing one matching run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub triggered_by: MatchTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub matched_count: u32,
    pub expired_count: u32,
    pub error_summary: Option<String>,
}

/// Dashboard snapshot of waitlist and campaign volumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingStats {
    pub pending: u64,
    pub matched: u64,
    pub matched_last_24h: u64,
    pub campaigns_total: u64,
    pub campaigns_active: u64,
}

/// Pending demand for one screening type, for the public waitlist browse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemandEntry {
    pub screening_type_id: ScreeningTypeId,
    pub pending: u64,
}
