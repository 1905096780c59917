use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Assignment state machine states
///
/// UNASSIGNED -> OFFERING -> {ASSIGNED, EXHAUSTED}. OFFERING may cycle
/// through many rounds before settling. ASSIGNED and EXHAUSTED are terminal;
/// reopening an EXHAUSTED property is an operator action, not a dispatcher
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssignmentStatus {
    /// Entered dispatch, no round started yet
    Unassigned,
    /// At least one round open or between rounds
    Offering,
    /// Exactly one agent holds the property
    Assigned,
    /// No eligible agents remain; needs manual handling
    Exhausted,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Unassigned => "UNASSIGNED",
            AssignmentStatus::Offering => "OFFERING",
            AssignmentStatus::Assigned => "ASSIGNED",
            AssignmentStatus::Exhausted => "EXHAUSTED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: AssignmentStatus) -> bool {
        use AssignmentStatus::*;

        match (self, target) {
            (Unassigned, Offering) => true,
            (Unassigned, Exhausted) => true, // round 1 found nobody
            (Offering, Offering) => true,    // next round
            (Offering, Assigned) => true,
            (Offering, Exhausted) => true,

            // Operator reopen, outside the dispatcher's own transitions
            (Exhausted, Unassigned) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Assigned | AssignmentStatus::Exhausted)
    }

    /// Can a new round be started from this state?
    pub fn can_dispatch(&self) -> bool {
        matches!(self, AssignmentStatus::Unassigned | AssignmentStatus::Offering)
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AssignmentStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "UNASSIGNED" => Ok(AssignmentStatus::Unassigned),
            "OFFERING" => Ok(AssignmentStatus::Offering),
            "ASSIGNED" => Ok(AssignmentStatus::Assigned),
            "EXHAUSTED" => Ok(AssignmentStatus::Exhausted),
            _ => Err(format!("Unknown assignment status: {}", s)),
        }
    }
}

/// One property under active dispatch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub property_id: String,
    pub status: AssignmentStatus,
    pub current_round: i32,
    pub assigned_agent_id: Option<String>,
    /// Agents already offered this property (rejected or expired); never
    /// re-offered for this property.
    pub excluded_agent_ids: Vec<String>,
    /// Set when candidate selection retries were exhausted and an operator
    /// needs to look at this property.
    pub flagged_at: Option<DateTime<Utc>>,
    pub flag_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssignmentRecord {
    pub fn new(property_id: &str) -> Self {
        let now = Utc::now();
        Self {
            property_id: property_id.to_string(),
            status: AssignmentStatus::Unassigned,
            current_round: 0,
            assigned_agent_id: None,
            excluded_agent_ids: Vec::new(),
            flagged_at: None,
            flag_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_excluded(&self, agent_id: &str) -> bool {
        self.excluded_agent_ids.iter().any(|a| a == agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use AssignmentStatus::*;

        assert!(Unassigned.can_transition_to(Offering));
        assert!(Unassigned.can_transition_to(Exhausted));
        assert!(Offering.can_transition_to(Offering));
        assert!(Offering.can_transition_to(Assigned));
        assert!(Offering.can_transition_to(Exhausted));
        assert!(Exhausted.can_transition_to(Unassigned));

        // Terminal apart from operator reopen
        assert!(!Assigned.can_transition_to(Offering));
        assert!(!Assigned.can_transition_to(Unassigned));
        assert!(!Exhausted.can_transition_to(Offering));
        assert!(!Offering.can_transition_to(Unassigned));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            AssignmentStatus::try_from("OFFERING").unwrap(),
            AssignmentStatus::Offering
        );
        assert_eq!(
            AssignmentStatus::try_from("exhausted").unwrap(),
            AssignmentStatus::Exhausted
        );
        assert!(AssignmentStatus::try_from("OPEN").is_err());
    }

    #[test]
    fn test_can_dispatch() {
        assert!(AssignmentStatus::Unassigned.can_dispatch());
        assert!(AssignmentStatus::Offering.can_dispatch());
        assert!(!AssignmentStatus::Assigned.can_dispatch());
        assert!(!AssignmentStatus::Exhausted.can_dispatch());
    }

    #[test]
    fn test_exclusion_lookup() {
        let mut record = AssignmentRecord::new("prop-1");
        assert!(!record.is_excluded("agent-a"));
        record.excluded_agent_ids.push("agent-a".to_string());
        assert!(record.is_excluded("agent-a"));
        assert!(!record.is_excluded("agent-b"));
    }
}
