//! Accept/Reject resolution
//!
//! The single path by which an agent's response reaches durable state, and
//! the only place accept races are resolved. Correctness rests on two
//! conditional writes: the offer CAS (PENDING -> ACCEPTED) and the
//! assignment CAS (OFFERING -> ASSIGNED). Winning the first but losing the
//! second means another offer for the same property was accepted first; the
//! provisional accept is rolled back to SUPERSEDED so the store never shows
//! an ACCEPTED offer disagreeing with the assignment record.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::RoundDispatcher;
use crate::domain::{Offer, OfferStatus};
use crate::error::{Result, RooftopError};
use crate::store::{AssignmentStore, OfferStore};

pub struct AcceptanceCoordinator {
    offers: Arc<dyn OfferStore>,
    assignments: Arc<dyn AssignmentStore>,
    dispatcher: Arc<RoundDispatcher>,
}

impl AcceptanceCoordinator {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        assignments: Arc<dyn AssignmentStore>,
        dispatcher: Arc<RoundDispatcher>,
    ) -> Self {
        Self {
            offers,
            assignments,
            dispatcher,
        }
    }

    /// Agent accepts an offer. Exactly one accept per property can succeed;
    /// every other caller observes `AlreadyResolved`.
    pub async fn accept(&self, offer_id: Uuid, agent_id: &str) -> Result<()> {
        let offer = self.load_own_offer(offer_id, agent_id).await?;

        if offer.status.is_terminal() {
            return Err(already_resolved(&offer));
        }

        // Derived expiry: past-deadline offers are dead even if the sweep
        // has not settled the row yet.
        if offer.is_overdue(Utc::now()) {
            self.settle_overdue(&offer).await?;
            return Err(RooftopError::AlreadyResolved {
                offer_id,
                status: OfferStatus::Expired.to_string(),
            });
        }

        if !self
            .offers
            .resolve_pending(offer_id, OfferStatus::Accepted, None)
            .await?
        {
            let current = self.load_own_offer(offer_id, agent_id).await?;
            return Err(already_resolved(&current));
        }

        // The assignment CAS is the actual winner election: two accepts on
        // different offers of the same property both pass the offer CAS,
        // but only one lands this write.
        if !self
            .assignments
            .try_assign(&offer.property_id, agent_id)
            .await?
        {
            if !self.offers.demote_accepted(offer_id).await? {
                warn!(
                    %offer_id,
                    "Accept rollback found offer no longer ACCEPTED"
                );
            }
            debug!(
                %offer_id,
                property_id = %offer.property_id,
                "Lost assignment race, offer superseded"
            );
            return Err(RooftopError::AlreadyResolved {
                offer_id,
                status: OfferStatus::Superseded.to_string(),
            });
        }

        // Winner: actively invalidate every other open offer so no agent
        // can later see a grant for a dead offer.
        let superseded = self
            .offers
            .supersede_open_offers(&offer.property_id, offer_id)
            .await?;

        info!(
            %offer_id,
            property_id = %offer.property_id,
            agent_id,
            round = offer.round,
            superseded = superseded.len(),
            "Offer accepted, property assigned"
        );

        Ok(())
    }

    /// Agent declines an offer. Closing the last open offer of the round
    /// escalates to the next candidate pool.
    pub async fn reject(
        &self,
        offer_id: Uuid,
        agent_id: &str,
        reason: Option<&str>,
    ) -> Result<()> {
        let offer = self.load_own_offer(offer_id, agent_id).await?;

        if offer.status.is_terminal() {
            return Err(already_resolved(&offer));
        }

        if offer.is_overdue(Utc::now()) {
            self.settle_overdue(&offer).await?;
            return Err(RooftopError::AlreadyResolved {
                offer_id,
                status: OfferStatus::Expired.to_string(),
            });
        }

        if !self
            .offers
            .resolve_pending(offer_id, OfferStatus::Rejected, reason)
            .await?
        {
            let current = self.load_own_offer(offer_id, agent_id).await?;
            return Err(already_resolved(&current));
        }

        self.assignments
            .add_exclusion(&offer.property_id, agent_id)
            .await?;

        info!(
            %offer_id,
            property_id = %offer.property_id,
            agent_id,
            round = offer.round,
            reason = reason.unwrap_or("-"),
            "Offer rejected"
        );

        self.dispatcher
            .escalate_if_round_closed(&offer.property_id)
            .await?;

        Ok(())
    }

    async fn load_own_offer(&self, offer_id: Uuid, agent_id: &str) -> Result<Offer> {
        let offer = self
            .offers
            .get_offer(offer_id)
            .await?
            .ok_or(RooftopError::OfferNotFound { offer_id })?;

        // An offer belonging to someone else is indistinguishable from a
        // missing one as far as the caller is concerned.
        if offer.agent_id != agent_id {
            return Err(RooftopError::OfferNotFound { offer_id });
        }

        Ok(offer)
    }

    /// Settle a past-deadline offer the sweep has not reached yet, using
    /// the same transitions the monitor would apply.
    async fn settle_overdue(&self, offer: &Offer) -> Result<()> {
        if self
            .offers
            .resolve_pending(offer.offer_id, OfferStatus::Expired, None)
            .await?
        {
            self.assignments
                .add_exclusion(&offer.property_id, &offer.agent_id)
                .await?;
            self.dispatcher
                .escalate_if_round_closed(&offer.property_id)
                .await?;
        }
        Ok(())
    }
}

fn already_resolved(offer: &Offer) -> RooftopError {
    RooftopError::AlreadyResolved {
        offer_id: offer.offer_id,
        status: offer.status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::domain::AssignmentStatus;
    use crate::notify::LogNotifier;
    use crate::selector::PoolSelector;
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        dispatcher: Arc<RoundDispatcher>,
        coordinator: AcceptanceCoordinator,
    }

    fn harness(pool: Vec<&str>, candidates_per_round: usize) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let config = DispatchConfig {
            candidates_per_round,
            selector_backoff_ms: 1,
            ..DispatchConfig::default()
        };
        let dispatcher = Arc::new(RoundDispatcher::new(
            store.clone(),
            store.clone(),
            Arc::new(PoolSelector::new(
                pool.into_iter().map(String::from).collect(),
            )),
            Arc::new(LogNotifier),
            config,
        ));
        let coordinator =
            AcceptanceCoordinator::new(store.clone(), store.clone(), dispatcher.clone());
        Harness {
            store,
            dispatcher,
            coordinator,
        }
    }

    async fn open_round(h: &Harness, property_id: &str) -> Vec<Offer> {
        h.dispatcher.dispatch_property(property_id).await.unwrap();
        let mut offers = h.store.pending_for_property(property_id).await.unwrap();
        offers.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        offers
    }

    #[tokio::test]
    async fn test_accept_assigns_property() {
        let h = harness(vec!["agent-a"], 1);
        let offers = open_round(&h, "prop-1").await;

        h.coordinator
            .accept(offers[0].offer_id, "agent-a")
            .await
            .unwrap();

        let record = AssignmentStore::get(h.store.as_ref(), "prop-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AssignmentStatus::Assigned);
        assert_eq!(record.assigned_agent_id.as_deref(), Some("agent-a"));

        let stored = h.store.offer_snapshot(offers[0].offer_id).await.unwrap();
        assert_eq!(stored.status, OfferStatus::Accepted);
    }

    #[tokio::test]
    async fn test_duplicate_accept_is_already_resolved() {
        let h = harness(vec!["agent-a"], 1);
        let offers = open_round(&h, "prop-1").await;

        h.coordinator
            .accept(offers[0].offer_id, "agent-a")
            .await
            .unwrap();
        let err = h
            .coordinator
            .accept(offers[0].offer_id, "agent-a")
            .await
            .unwrap_err();
        assert!(err.is_already_resolved());
    }

    #[tokio::test]
    async fn test_accept_for_wrong_agent_is_not_found() {
        let h = harness(vec!["agent-a"], 1);
        let offers = open_round(&h, "prop-1").await;

        let err = h
            .coordinator
            .accept(offers[0].offer_id, "agent-b")
            .await
            .unwrap_err();
        assert!(matches!(err, RooftopError::OfferNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_offer_is_not_found() {
        let h = harness(vec!["agent-a"], 1);
        open_round(&h, "prop-1").await;

        let err = h
            .coordinator
            .accept(Uuid::new_v4(), "agent-a")
            .await
            .unwrap_err();
        assert!(matches!(err, RooftopError::OfferNotFound { .. }));
    }

    #[tokio::test]
    async fn test_reject_escalates_to_next_round() {
        let h = harness(vec!["agent-a", "agent-b"], 1);
        let offers = open_round(&h, "prop-1").await;
        assert_eq!(offers[0].agent_id, "agent-a");

        h.coordinator
            .reject(offers[0].offer_id, "agent-a", Some("too far out"))
            .await
            .unwrap();

        let record = AssignmentStore::get(h.store.as_ref(), "prop-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AssignmentStatus::Offering);
        assert_eq!(record.current_round, 2);
        assert!(record.is_excluded("agent-a"));

        let pending = h.store.pending_for_property("prop-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].agent_id, "agent-b");
        assert_eq!(pending[0].round, 2);

        let rejected = h.store.offer_snapshot(offers[0].offer_id).await.unwrap();
        assert_eq!(rejected.status, OfferStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("too far out"));
    }

    #[tokio::test]
    async fn test_rejecting_everyone_exhausts() {
        let h = harness(vec!["agent-a", "agent-b"], 1);

        let offers = open_round(&h, "prop-1").await;
        h.coordinator
            .reject(offers[0].offer_id, "agent-a", None)
            .await
            .unwrap();

        let pending = h.store.pending_for_property("prop-1").await.unwrap();
        h.coordinator
            .reject(pending[0].offer_id, "agent-b", None)
            .await
            .unwrap();

        let record = AssignmentStore::get(h.store.as_ref(), "prop-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AssignmentStatus::Exhausted);
        assert!(record.assigned_agent_id.is_none());
    }

    #[tokio::test]
    async fn test_parallel_accept_race_has_one_winner() {
        let h = harness(vec!["agent-a", "agent-b"], 2);
        let offers = open_round(&h, "prop-1").await;
        assert_eq!(offers.len(), 2);

        let first = h.coordinator.accept(offers[0].offer_id, "agent-a").await;
        let second = h.coordinator.accept(offers[1].offer_id, "agent-b").await;

        assert!(first.is_ok());
        assert!(second.unwrap_err().is_already_resolved());

        let record = AssignmentStore::get(h.store.as_ref(), "prop-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.assigned_agent_id.as_deref(), Some("agent-a"));

        // The loser's offer ends SUPERSEDED, never ACCEPTED
        let loser = h.store.offer_snapshot(offers[1].offer_id).await.unwrap();
        assert_eq!(loser.status, OfferStatus::Superseded);
    }

    #[tokio::test]
    async fn test_concurrent_accepts_exactly_one_success() {
        let h = harness(vec!["agent-a", "agent-b"], 2);
        let offers = open_round(&h, "prop-1").await;

        let coordinator = Arc::new(harness_coordinator(&h));
        let a = {
            let c = coordinator.clone();
            let id = offers[0].offer_id;
            tokio::spawn(async move { c.accept(id, "agent-a").await })
        };
        let b = {
            let c = coordinator.clone();
            let id = offers[1].offer_id;
            tokio::spawn(async move { c.accept(id, "agent-b").await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let losses = results
            .iter()
            .filter(|r| matches!(r, Err(e) if e.is_already_resolved()))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(losses, 1);

        let record = AssignmentStore::get(h.store.as_ref(), "prop-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.status, AssignmentStatus::Assigned);
        assert!(record.assigned_agent_id.is_some());
    }

    #[tokio::test]
    async fn test_overdue_accept_is_treated_as_expired() {
        let h = harness(vec!["agent-a", "agent-b"], 1);
        let offers = open_round(&h, "prop-1").await;

        // Push the deadline into the past without running the sweep
        force_expiry(&h.store, offers[0].offer_id).await;

        let err = h
            .coordinator
            .accept(offers[0].offer_id, "agent-a")
            .await
            .unwrap_err();
        assert!(err.is_already_resolved());

        let stored = h.store.offer_snapshot(offers[0].offer_id).await.unwrap();
        assert_eq!(stored.status, OfferStatus::Expired);

        // The dead round escalated to the next candidate
        let pending = h.store.pending_for_property("prop-1").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].agent_id, "agent-b");
    }

    fn harness_coordinator(h: &Harness) -> AcceptanceCoordinator {
        AcceptanceCoordinator::new(h.store.clone(), h.store.clone(), h.dispatcher.clone())
    }

    async fn force_expiry(store: &Arc<MemoryStore>, offer_id: Uuid) {
        store
            .rewind_deadline(offer_id, chrono::Duration::minutes(10))
            .await;
    }
}
