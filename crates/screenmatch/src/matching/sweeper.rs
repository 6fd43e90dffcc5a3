use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;

use super::domain::AllocationOutcome;
use super::ledger::{LedgerError, MatchLedger};

/// Companion pass reverting pending-claim allocations whose deadline has
/// passed. Each reversion is its own atomic ledger call, so the sweeper is
/// re-entrant and safe to run alongside a matching cycle: allocations the
/// cycle is creating always carry future deadlines.
pub struct ExpirySweeper<L> {
    ledger: Arc<L>,
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub reverted: u32,
    pub failures: u32,
}

impl<L> ExpirySweeper<L>
where
    L: MatchLedger,
{
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// Revert every allocation past its claim deadline as of `now`, releasing
    /// the entry back to pending and crediting the campaign. A failure on one
    /// allocation is logged and skipped; the pass continues.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let expired = match self.ledger.expired_allocations(now) {
            Ok(expired) => expired,
            Err(err) => {
                warn!(%err, "expiry sweep could not load expired allocations");
                return SweepReport {
                    reverted: 0,
                    failures: 1,
                };
            }
        };

        let mut report = SweepReport::default();
        for allocation in expired {
            match self
                .ledger
                .revert_allocation(&allocation.id, AllocationOutcome::Expired)
            {
                Ok(_) => report.reverted += 1,
                // Claimed or reverted by a concurrent actor between the scan
                // and this reversion; nothing to release.
                Err(LedgerError::InvalidTransition(_)) | Err(LedgerError::NotFound) => {}
                Err(err) => {
                    warn!(allocation = %allocation.id.0, %err, "expiry reversion failed");
                    report.failures += 1;
                }
            }
        }
        report
    }
}
