use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{AllocationId, MatchTrigger, PatientId, ScreeningTypeId, WaitlistEntryId};
use super::engine::{EngineError, MatchingEngine};
use super::ledger::{LedgerError, MatchLedger};

const DEFAULT_RUN_HISTORY: usize = 20;

/// Router builder exposing the collaborator-facing matching endpoints.
pub fn matching_router<L>(engine: Arc<MatchingEngine<L>>) -> Router
where
    L: MatchLedger + 'static,
{
    Router::new()
        .route("/api/v1/matching/run", post(run_cycle_handler::<L>))
        .route("/api/v1/matching/stats", get(stats_handler::<L>))
        .route("/api/v1/matching/runs", get(runs_handler::<L>))
        .route("/api/v1/waitlist", post(join_handler::<L>))
        .route("/api/v1/waitlist/demand", get(demand_handler::<L>))
        .route(
            "/api/v1/waitlist/:entry_id",
            get(entry_status_handler::<L>).delete(withdraw_handler::<L>),
        )
        .route(
            "/api/v1/allocations/:allocation_id/claim",
            post(claim_handler::<L>),
        )
        .route(
            "/api/v1/allocations/:allocation_id/cancel",
            post(cancel_handler::<L>),
        )
        .with_state(engine)
}

#[derive(Debug, Deserialize)]
pub(crate) struct JoinWaitlistRequest {
    pub(crate) patient_id: String,
    pub(crate) screening_type_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunHistoryQuery {
    pub(crate) limit: Option<usize>,
}

fn engine_error_response(error: EngineError) -> Response {
    let status = match &error {
        EngineError::AlreadyRunning => StatusCode::CONFLICT,
        EngineError::Ledger(ledger) => match ledger {
            LedgerError::NotFound => StatusCode::NOT_FOUND,
            LedgerError::Conflict
            | LedgerError::AlreadyMatched
            | LedgerError::InsufficientBudget => StatusCode::CONFLICT,
            LedgerError::InvalidTransition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LedgerError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        },
    };
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

pub(crate) async fn run_cycle_handler<L>(
    State(engine): State<Arc<MatchingEngine<L>>>,
    Json(trigger): Json<MatchTrigger>,
) -> Response
where
    L: MatchLedger + 'static,
{
    match engine.run_cycle(trigger) {
        Ok(record) => (StatusCode::OK, Json(record)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn stats_handler<L>(State(engine): State<Arc<MatchingEngine<L>>>) -> Response
where
    L: MatchLedger + 'static,
{
    match engine.stats() {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn runs_handler<L>(
    State(engine): State<Arc<MatchingEngine<L>>>,
    Query(query): Query<RunHistoryQuery>,
) -> Response
where
    L: MatchLedger + 'static,
{
    let limit = query.limit.unwrap_or(DEFAULT_RUN_HISTORY);
    match engine.recent_runs(limit) {
        Ok(records) => (StatusCode::OK, Json(records)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn demand_handler<L>(State(engine): State<Arc<MatchingEngine<L>>>) -> Response
where
    L: MatchLedger + 'static,
{
    match engine.demand_summary() {
        Ok(demand) => (StatusCode::OK, Json(demand)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn join_handler<L>(
    State(engine): State<Arc<MatchingEngine<L>>>,
    Json(request): Json<JoinWaitlistRequest>,
) -> Response
where
    L: MatchLedger + 'static,
{
    let patient = PatientId(request.patient_id);
    let screening_type = ScreeningTypeId(request.screening_type_id);
    match engine.join_waitlist(patient, screening_type) {
        Ok(entry) => (StatusCode::CREATED, Json(entry)).into_response(),
        Err(EngineError::Ledger(LedgerError::Conflict)) => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "already in waitlist for this screening type" })),
        )
            .into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn entry_status_handler<L>(
    State(engine): State<Arc<MatchingEngine<L>>>,
    Path(entry_id): Path<String>,
) -> Response
where
    L: MatchLedger + 'static,
{
    match engine.waitlist_status(&WaitlistEntryId(entry_id)) {
        Ok((entry, allocation)) => (
            StatusCode::OK,
            Json(json!({ "entry": entry, "allocation": allocation })),
        )
            .into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn withdraw_handler<L>(
    State(engine): State<Arc<MatchingEngine<L>>>,
    Path(entry_id): Path<String>,
) -> Response
where
    L: MatchLedger + 'static,
{
    let entry_id = WaitlistEntryId(entry_id);
    match engine.withdraw(&entry_id) {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "entry_id": entry_id.0, "status": "withdrawn" })),
        )
            .into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn claim_handler<L>(
    State(engine): State<Arc<MatchingEngine<L>>>,
    Path(allocation_id): Path<String>,
) -> Response
where
    L: MatchLedger + 'static,
{
    match engine.claim(&AllocationId(allocation_id)) {
        Ok(allocation) => (StatusCode::OK, Json(allocation)).into_response(),
        Err(error) => engine_error_response(error),
    }
}

pub(crate) async fn cancel_handler<L>(
    State(engine): State<Arc<MatchingEngine<L>>>,
    Path(allocation_id): Path<String>,
) -> Response
where
    L: MatchLedger + 'static,
{
    match engine.cancel(&AllocationId(allocation_id)) {
        Ok(allocation) => (StatusCode::OK, Json(allocation)).into_response(),
        Err(error) => engine_error_response(error),
    }
}
