use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::PropertySummary;

// ============================================================================
// Agent-facing assignment types
// ============================================================================

/// One pending-assignment card for the agent UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAssignment {
    pub offer_id: Uuid,
    pub round: i32,
    pub expires_at: DateTime<Utc>,
    pub seconds_remaining: i64,
    pub property: PropertySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAssignmentsResponse {
    pub assignments: Vec<PendingAssignment>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================================
// Admin types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentSummary {
    pub property_id: String,
    pub status: String,
    pub current_round: i32,
    pub assigned_agent_id: Option<String>,
    pub excluded_agent_ids: Vec<String>,
    pub flagged_at: Option<DateTime<Utc>>,
    pub flag_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<crate::domain::AssignmentRecord> for AssignmentSummary {
    fn from(record: crate::domain::AssignmentRecord) -> Self {
        Self {
            property_id: record.property_id,
            status: record.status.to_string(),
            current_round: record.current_round,
            assigned_agent_id: record.assigned_agent_id,
            excluded_agent_ids: record.excluded_agent_ids,
            flagged_at: record.flagged_at,
            flag_reason: record.flag_reason,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentListResponse {
    pub assignments: Vec<AssignmentSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Health check types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub db: String,
    pub uptime_secs: i64,
    pub sweeps: u64,
    pub last_sweep: Option<DateTime<Utc>>,
}
