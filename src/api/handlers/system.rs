use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info, warn};

use crate::api::{state::AppState, types::*};
use crate::dispatch::RoundOutcome;
use crate::error::RooftopError;

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db = match &state.db_pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "up".to_string(),
            Err(e) => {
                warn!("Health check database ping failed: {}", e);
                "down".to_string()
            }
        },
        None => "memory".to_string(),
    };

    let stats = state.monitor.get_stats().await;
    let status = if db == "down" { "degraded" } else { "ok" };

    let code = if status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            db,
            uptime_secs: state.uptime_seconds(),
            sweeps: stats.sweeps,
            last_sweep: stats.last_sweep,
        }),
    )
}

/// POST /api/internal/properties/:property_id/dispatch
///
/// Entry point for the listings service: start dispatch for a newly
/// published property. Safe to call more than once.
pub async fn dispatch_property(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
) -> (StatusCode, Json<DispatchResponse>) {
    run_dispatch(&state, &property_id).await
}

pub(crate) async fn run_dispatch(
    state: &AppState,
    property_id: &str,
) -> (StatusCode, Json<DispatchResponse>) {
    match state.dispatcher.dispatch_property(property_id).await {
        Ok(RoundOutcome::OffersCreated { round, agent_ids }) => {
            info!(property_id, round, ?agent_ids, "Dispatch round opened");
            (
                StatusCode::OK,
                Json(DispatchResponse {
                    success: true,
                    outcome: format!("round {} opened", round),
                    error: None,
                }),
            )
        }
        Ok(RoundOutcome::AlreadyOpen) => (
            StatusCode::OK,
            Json(DispatchResponse {
                success: true,
                outcome: "already_open".to_string(),
                error: None,
            }),
        ),
        Ok(RoundOutcome::Exhausted) => (
            StatusCode::OK,
            Json(DispatchResponse {
                success: false,
                outcome: "exhausted".to_string(),
                error: Some("No eligible agents remain for this property".to_string()),
            }),
        ),
        Err(RooftopError::InvalidState { found, .. }) => (
            StatusCode::CONFLICT,
            Json(DispatchResponse {
                success: false,
                outcome: found.clone(),
                error: Some(format!("Property is not dispatchable (status {})", found)),
            }),
        ),
        Err(e) => {
            error!(property_id, "Dispatch failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DispatchResponse {
                    success: false,
                    outcome: "error".to_string(),
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
