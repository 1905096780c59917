use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::{error, info};

use crate::api::{state::AppState, types::*};
use crate::domain::AssignmentStatus;

#[derive(Debug, serde::Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// GET /api/admin/assignments/exhausted
pub async fn get_exhausted_assignments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<AssignmentListResponse>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(100);

    let records = state
        .assignments
        .list_by_status(AssignmentStatus::Exhausted, limit)
        .await
        .map_err(|e| {
            error!("Failed to list exhausted assignments: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    let assignments: Vec<AssignmentSummary> =
        records.into_iter().map(AssignmentSummary::from).collect();
    let total = assignments.len();
    Ok(Json(AssignmentListResponse { assignments, total }))
}

/// GET /api/admin/assignments/flagged
pub async fn get_flagged_assignments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<AssignmentListResponse>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(100);

    let records = state.assignments.list_flagged(limit).await.map_err(|e| {
        error!("Failed to list flagged assignments: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;

    let assignments: Vec<AssignmentSummary> =
        records.into_iter().map(AssignmentSummary::from).collect();
    let total = assignments.len();
    Ok(Json(AssignmentListResponse { assignments, total }))
}

/// POST /api/admin/assignments/:property_id/reopen
///
/// Operator action: put an EXHAUSTED property back into dispatch with a
/// cleared exclusion set, then open round 1 again.
pub async fn reopen_assignment(
    State(state): State<AppState>,
    Path(property_id): Path<String>,
) -> (StatusCode, Json<DispatchResponse>) {
    match state.assignments.reopen_exhausted(&property_id).await {
        Ok(true) => {
            info!(property_id, "Assignment reopened by operator");
        }
        Ok(false) => {
            return (
                StatusCode::CONFLICT,
                Json(DispatchResponse {
                    success: false,
                    outcome: "not_exhausted".to_string(),
                    error: Some("Only EXHAUSTED assignments can be reopened".to_string()),
                }),
            );
        }
        Err(e) => {
            error!(property_id, "Reopen failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(DispatchResponse {
                    success: false,
                    outcome: "error".to_string(),
                    error: Some(e.to_string()),
                }),
            );
        }
    }

    super::system::run_dispatch(&state, &property_id).await
}
