//! Waitlist matching: ledgers, the matching engine, the expiry sweeper, and
//! the collaborator-facing router.

pub mod domain;
pub mod engine;
pub mod ledger;
pub mod memory;
pub mod router;
pub mod sweeper;

#[cfg(test)]
mod tests;

pub use domain::{
    Allocation, AllocationId, AllocationOutcome, Campaign, CampaignId, CampaignStatus,
    DemandEntry, DonorId, ExecutionRecord, MatchTrigger, MatchingStats, PatientId,
    ScreeningTypeId, WaitlistEntry, WaitlistEntryId, WaitlistStatus,
};
pub use engine::{EngineError, MatchingEngine};
pub use ledger::{LedgerError, MatchLedger};
pub use memory::InMemoryLedger;
pub use router::matching_router;
pub use sweeper::{ExpirySweeper, SweepReport};
