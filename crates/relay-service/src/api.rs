//! REST API Endpoints
//!
//! Relayer health, cursor status and per-period records.

use crate::state::{AppState, PeriodRecord, StatusCounts};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Run the API server
pub async fn run_server(listen: String, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(address = %listen, "API server listening");

    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/periods", get(list_periods))
        .route("/periods/{period}", get(get_period))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Relayer condition reported by `/health`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Condition {
    Healthy,
    /// More than one period behind the beacon head
    Lagging,
    /// Submission stopped on a fatal error
    Halted,
}

#[derive(Serialize)]
struct HealthResponse {
    condition: Condition,
    next_period: u64,
    periods_behind: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    halt_reason: Option<String>,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let halt_reason = state.halted();
    let condition = match (&halt_reason, state.is_healthy()) {
        (Some(_), _) => Condition::Halted,
        (None, true) => Condition::Healthy,
        (None, false) => Condition::Lagging,
    };
    let status_code = match condition {
        Condition::Healthy => StatusCode::OK,
        Condition::Lagging | Condition::Halted => StatusCode::SERVICE_UNAVAILABLE,
    };

    (
        status_code,
        Json(HealthResponse {
            condition,
            next_period: state.next_period(),
            periods_behind: state.periods_behind(),
            halt_reason,
        }),
    )
}

#[derive(Serialize)]
struct StatusResponse {
    next_period: u64,
    head_slot: u64,
    head_period: u64,
    periods_behind: u64,
    uptime_secs: u64,
    periods: StatusCounts,
    last_error: Option<String>,
    halted: Option<String>,
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        next_period: state.next_period(),
        head_slot: state.head_slot(),
        head_period: state.head_period(),
        periods_behind: state.periods_behind(),
        uptime_secs: state.uptime_secs(),
        periods: state.status_counts(),
        last_error: state.last_error(),
        halted: state.halted(),
    })
}

/// Tracked periods in ascending order
async fn list_periods(State(state): State<AppState>) -> Json<Vec<PeriodRecord>> {
    Json(state.all_periods())
}

async fn get_period(
    State(state): State<AppState>,
    Path(period): Path<u64>,
) -> Result<Json<PeriodRecord>, StatusCode> {
    state.get_period(period).map(Json).ok_or(StatusCode::NOT_FOUND)
}
