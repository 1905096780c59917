//! Durable stores for offers and assignment records
//!
//! All mutation goes through conditional (compare-and-swap) writes keyed by
//! the current status, never unconditional overwrites. Nothing in process
//! memory is authoritative: every scheduler and coordinator decision is
//! re-derivable from these stores, so multiple dispatcher instances can run
//! against the same database without leader election.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{AssignmentRecord, AssignmentStatus, Offer, OfferStatus};
use crate::error::Result;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Durable record of every offer, one row per property x agent x round.
#[async_trait]
pub trait OfferStore: Send + Sync {
    /// Persist a batch of new PENDING offers (one round's fan-out).
    async fn insert_offers(&self, offers: &[Offer]) -> Result<()>;

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>>;

    /// CAS: PENDING -> `target`. Returns true if this caller won the
    /// transition, false if the offer was no longer PENDING.
    async fn resolve_pending(
        &self,
        offer_id: Uuid,
        target: OfferStatus,
        rejection_reason: Option<&str>,
    ) -> Result<bool>;

    /// Rollback of a provisional accept that lost the assignment race:
    /// ACCEPTED -> SUPERSEDED. The only permitted write to a terminal row.
    async fn demote_accepted(&self, offer_id: Uuid) -> Result<bool>;

    /// Supersede every PENDING offer for the property except `winner`.
    /// Returns the offers that were transitioned.
    async fn supersede_open_offers(
        &self,
        property_id: &str,
        winner: Uuid,
    ) -> Result<Vec<Offer>>;

    /// PENDING offers for one agent, soonest deadline first.
    async fn pending_for_agent(&self, agent_id: &str) -> Result<Vec<Offer>>;

    /// PENDING offers for one property across all rounds.
    async fn pending_for_property(&self, property_id: &str) -> Result<Vec<Offer>>;

    /// Every offer in `(property_id, round)`. "Round closed" is derived:
    /// all returned offers are non-PENDING.
    async fn offers_for_round(&self, property_id: &str, round: i32) -> Result<Vec<Offer>>;

    /// PENDING offers whose deadline has passed. This query is the durable
    /// delayed-work schedule: the sweep re-derives deadlines from here on
    /// every tick, so a process restart loses nothing.
    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Offer>>;
}

/// Durable record of one current dispatch state per property.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Create the UNASSIGNED record if the property is not under dispatch
    /// yet; returns the current record either way.
    async fn create_if_absent(&self, property_id: &str) -> Result<AssignmentRecord>;

    async fn get(&self, property_id: &str) -> Result<Option<AssignmentRecord>>;

    /// CAS: {UNASSIGNED, OFFERING} with `current_round == expected_round`
    /// -> OFFERING with `current_round = expected_round + 1`. Returns false
    /// when another dispatcher instance advanced the round first.
    async fn begin_round(&self, property_id: &str, expected_round: i32) -> Result<bool>;

    /// CAS: OFFERING with no assigned agent -> ASSIGNED with `agent_id`.
    /// This is the write that decides the at-most-one-winner race.
    async fn try_assign(&self, property_id: &str, agent_id: &str) -> Result<bool>;

    /// CAS: {UNASSIGNED, OFFERING} -> EXHAUSTED.
    async fn mark_exhausted(&self, property_id: &str) -> Result<bool>;

    /// Add an agent to the never-offer-again set for this property.
    async fn add_exclusion(&self, property_id: &str, agent_id: &str) -> Result<()>;

    /// Mark the assignment for manual operator attention (selector outage,
    /// not "no candidates").
    async fn flag_for_attention(&self, property_id: &str, reason: &str) -> Result<()>;

    /// Operator action: CAS EXHAUSTED -> UNASSIGNED, clearing exclusions so
    /// the next dispatch starts from a clean pool.
    async fn reopen_exhausted(&self, property_id: &str) -> Result<bool>;

    async fn list_by_status(
        &self,
        status: AssignmentStatus,
        limit: i64,
    ) -> Result<Vec<AssignmentRecord>>;

    async fn list_flagged(&self, limit: i64) -> Result<Vec<AssignmentRecord>>;
}
