use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use screenmatch::config::MatchingConfig;
use screenmatch::matching::{InMemoryLedger, MatchingEngine};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Build the matching engine over the bundled single-process ledger. A
/// deployment backed by a transactional store swaps the ledger here.
pub(crate) fn build_engine(
    config: MatchingConfig,
) -> (Arc<MatchingEngine<InMemoryLedger>>, Arc<InMemoryLedger>) {
    let ledger = Arc::new(InMemoryLedger::new());
    let engine = Arc::new(MatchingEngine::new(ledger.clone(), config));
    (engine, ledger)
}
