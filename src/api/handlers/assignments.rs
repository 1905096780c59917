use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use crate::api::{state::AppState, types::*};
use crate::error::RooftopError;

const AGENT_HEADER: &str = "x-agent-id";

fn agent_id_from_headers(headers: &HeaderMap) -> Result<String, (StatusCode, Json<ActionResponse>)> {
    headers
        .get(AGENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            Json(ActionResponse::err("Missing X-Agent-Id header")),
        ))
}

/// GET /api/agent/assignments/pending
pub async fn get_pending_assignments(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PendingAssignmentsResponse>, (StatusCode, Json<ActionResponse>)> {
    let agent_id = agent_id_from_headers(&headers)?;

    let offers = state.offers.pending_for_agent(&agent_id).await.map_err(|e| {
        error!("Failed to list pending assignments: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ActionResponse::err("Internal error")),
        )
    })?;

    let now = Utc::now();
    let mut assignments = Vec::with_capacity(offers.len());
    for offer in offers {
        // Overdue offers are dead even before the sweep settles them; don't
        // show cards the agent can no longer act on.
        if offer.is_overdue(now) {
            continue;
        }

        let property = state
            .directory
            .summary(&offer.property_id)
            .await
            .unwrap_or_else(|_| {
                crate::domain::PropertySummary::placeholder(&offer.property_id)
            });

        assignments.push(PendingAssignment {
            offer_id: offer.offer_id,
            round: offer.round,
            expires_at: offer.expires_at,
            seconds_remaining: offer.seconds_remaining(now),
            property,
        });
    }

    let total = assignments.len();
    Ok(Json(PendingAssignmentsResponse { assignments, total }))
}

/// POST /api/agent/assignments/:offer_id/accept
pub async fn accept_assignment(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<ActionResponse>) {
    let agent_id = match agent_id_from_headers(&headers) {
        Ok(id) => id,
        Err(e) => return e,
    };

    match state.coordinator.accept(offer_id, &agent_id).await {
        Ok(()) => (StatusCode::OK, Json(ActionResponse::ok())),
        Err(e) => action_error(e),
    }
}

/// POST /api/agent/assignments/:offer_id/reject
pub async fn reject_assignment(
    State(state): State<AppState>,
    Path(offer_id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<RejectRequest>>,
) -> (StatusCode, Json<ActionResponse>) {
    let agent_id = match agent_id_from_headers(&headers) {
        Ok(id) => id,
        Err(e) => return e,
    };

    let reason = body.and_then(|Json(req)| req.reason);

    match state
        .coordinator
        .reject(offer_id, &agent_id, reason.as_deref())
        .await
    {
        Ok(()) => (StatusCode::OK, Json(ActionResponse::ok())),
        Err(e) => action_error(e),
    }
}

fn action_error(e: RooftopError) -> (StatusCode, Json<ActionResponse>) {
    match e {
        RooftopError::AlreadyResolved { .. } => (
            StatusCode::CONFLICT,
            Json(ActionResponse::err(
                "This assignment is no longer available",
            )),
        ),
        RooftopError::OfferNotFound { .. } | RooftopError::AssignmentNotFound { .. } => (
            StatusCode::NOT_FOUND,
            Json(ActionResponse::err("Assignment not found")),
        ),
        RooftopError::InvalidState { .. } => {
            error!("Precondition violation on assignment action: {}", e);
            (
                StatusCode::CONFLICT,
                Json(ActionResponse::err(e.to_string())),
            )
        }
        other => {
            error!("Assignment action failed: {}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ActionResponse::err("Internal error")),
            )
        }
    }
}
