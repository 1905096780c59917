use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Offer lifecycle states
///
/// PENDING is the only live state; everything else is terminal and
/// append-only. A terminal offer never changes status again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferStatus {
    /// Offered to the agent, waiting for accept/reject before the deadline
    Pending,
    /// Agent accepted and won the assignment race
    Accepted,
    /// Agent explicitly declined
    Rejected,
    /// Deadline passed without a response
    Expired,
    /// Invalidated because a different offer for the same property won
    Superseded,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "PENDING",
            OfferStatus::Accepted => "ACCEPTED",
            OfferStatus::Rejected => "REJECTED",
            OfferStatus::Expired => "EXPIRED",
            OfferStatus::Superseded => "SUPERSEDED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: OfferStatus) -> bool {
        use OfferStatus::*;

        match (self, target) {
            (Pending, Accepted) => true,
            (Pending, Rejected) => true,
            (Pending, Expired) => true,
            (Pending, Superseded) => true,

            // Acceptance rollback: the offer CAS won but the assignment CAS
            // lost to another offer, so the provisional accept is demoted.
            (Accepted, Superseded) => true,

            // Terminal states never change again
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OfferStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(OfferStatus::Pending),
            "ACCEPTED" => Ok(OfferStatus::Accepted),
            "REJECTED" => Ok(OfferStatus::Rejected),
            "EXPIRED" => Ok(OfferStatus::Expired),
            "SUPERSEDED" => Ok(OfferStatus::Superseded),
            _ => Err(format!("Unknown offer status: {}", s)),
        }
    }
}

/// A single timed proposal of one property to one agent within one round
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub offer_id: Uuid,
    pub property_id: String,
    pub agent_id: String,
    pub round: i32,
    pub status: OfferStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

impl Offer {
    pub fn new(
        property_id: &str,
        agent_id: &str,
        round: i32,
        ttl: chrono::Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            offer_id: Uuid::new_v4(),
            property_id: property_id.to_string(),
            agent_id: agent_id.to_string(),
            round,
            status: OfferStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            responded_at: None,
            rejection_reason: None,
        }
    }

    /// Expiry is a derived fact, not only a scheduled one: an offer past its
    /// deadline is overdue even if the sweep has not settled the row yet.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == OfferStatus::Pending && now > self.expires_at
    }

    pub fn seconds_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use OfferStatus::*;

        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Rejected));
        assert!(Pending.can_transition_to(Expired));
        assert!(Pending.can_transition_to(Superseded));
        assert!(Accepted.can_transition_to(Superseded));

        // Terminal statuses are frozen
        assert!(!Rejected.can_transition_to(Pending));
        assert!(!Expired.can_transition_to(Accepted));
        assert!(!Superseded.can_transition_to(Pending));
        assert!(!Accepted.can_transition_to(Rejected));
    }

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            OfferStatus::try_from("PENDING").unwrap(),
            OfferStatus::Pending
        );
        assert_eq!(
            OfferStatus::try_from("superseded").unwrap(),
            OfferStatus::Superseded
        );
        assert!(OfferStatus::try_from("GRANTED").is_err());
    }

    #[test]
    fn test_overdue_is_derived() {
        let mut offer = Offer::new("prop-1", "agent-a", 1, chrono::Duration::minutes(5));
        let now = Utc::now();

        assert!(!offer.is_overdue(now));
        assert!(offer.is_overdue(now + chrono::Duration::minutes(6)));

        // A terminal offer is never overdue, no matter the clock
        offer.status = OfferStatus::Rejected;
        assert!(!offer.is_overdue(now + chrono::Duration::minutes(6)));
    }

    #[test]
    fn test_seconds_remaining_clamps_at_zero() {
        let offer = Offer::new("prop-1", "agent-a", 1, chrono::Duration::minutes(5));
        let later = Utc::now() + chrono::Duration::minutes(10);
        assert_eq!(offer.seconds_remaining(later), 0);
    }
}
