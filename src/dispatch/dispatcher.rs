//! Round orchestration
//!
//! One round = one fan-out of offers to the next candidate pool. The
//! dispatcher is invoked at property submission and again whenever a round
//! closes without an acceptance.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::domain::{AssignmentRecord, Offer};
use crate::error::{Result, RooftopError};
use crate::notify::{Notifier, OfferNotification};
use crate::selector::CandidateSelector;
use crate::store::{AssignmentStore, OfferStore};

/// Outcome of a round-start attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// New round opened with these offers
    OffersCreated { round: i32, agent_ids: Vec<String> },
    /// A round is already open (or another instance opened one first); no-op
    AlreadyOpen,
    /// No eligible agents remain; assignment is now EXHAUSTED
    Exhausted,
}

pub struct RoundDispatcher {
    offers: Arc<dyn OfferStore>,
    assignments: Arc<dyn AssignmentStore>,
    selector: Arc<dyn CandidateSelector>,
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
}

impl RoundDispatcher {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        assignments: Arc<dyn AssignmentStore>,
        selector: Arc<dyn CandidateSelector>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            offers,
            assignments,
            selector,
            notifier,
            config,
        }
    }

    /// Entry point for property submission (or manual re-queue): put the
    /// property under dispatch and open round 1.
    pub async fn dispatch_property(&self, property_id: &str) -> Result<RoundOutcome> {
        let record = self.assignments.create_if_absent(property_id).await?;
        if record.status.is_terminal() {
            return Err(RooftopError::InvalidState {
                entity: format!("assignment {}", property_id),
                expected: "UNASSIGNED or OFFERING".to_string(),
                found: record.status.to_string(),
            });
        }
        self.start_round(property_id).await
    }

    /// Start the next round for a property.
    ///
    /// Preconditions: assignment is UNASSIGNED, or OFFERING with every
    /// offer of the current round closed. Invoking this twice for the same
    /// property+round (retry, or reject and expiry racing to close the same
    /// round) is safe: the open-round check and the round-number CAS make
    /// the duplicate a no-op instead of a double dispatch.
    pub async fn start_round(&self, property_id: &str) -> Result<RoundOutcome> {
        let record = self
            .assignments
            .get(property_id)
            .await?
            .ok_or_else(|| RooftopError::AssignmentNotFound {
                property_id: property_id.to_string(),
            })?;

        if !record.status.can_dispatch() {
            return Err(RooftopError::InvalidState {
                entity: format!("assignment {}", property_id),
                expected: "UNASSIGNED or OFFERING".to_string(),
                found: record.status.to_string(),
            });
        }

        let open = self.offers.pending_for_property(property_id).await?;
        if !open.is_empty() {
            debug!(
                property_id,
                open = open.len(),
                "Round already open, skipping dispatch"
            );
            return Ok(RoundOutcome::AlreadyOpen);
        }

        let candidates = self.select_with_retry(&record).await?;

        if candidates.is_empty() {
            if self.assignments.mark_exhausted(property_id).await? {
                warn!(
                    property_id,
                    rounds = record.current_round,
                    "No eligible agents remain, assignment exhausted"
                );
            }
            return Ok(RoundOutcome::Exhausted);
        }

        // The round-number CAS decides which dispatcher instance opens the
        // round; losing it means someone else already advanced.
        if !self
            .assignments
            .begin_round(property_id, record.current_round)
            .await?
        {
            debug!(property_id, "Lost round-start race, skipping dispatch");
            return Ok(RoundOutcome::AlreadyOpen);
        }

        let round = record.current_round + 1;
        let offers: Vec<Offer> = candidates
            .iter()
            .map(|agent_id| Offer::new(property_id, agent_id, round, self.config.offer_ttl()))
            .collect();

        self.offers.insert_offers(&offers).await?;

        info!(
            property_id,
            round,
            candidates = ?candidates,
            ttl_secs = self.config.offer_ttl_secs,
            "Round opened"
        );

        for offer in &offers {
            let notifier = self.notifier.clone();
            let notification = OfferNotification {
                agent_id: offer.agent_id.clone(),
                property_id: offer.property_id.clone(),
                offer_id: offer.offer_id,
                round: offer.round,
                expires_at: offer.expires_at,
            };
            // Fire-and-forget: delivery failure never fails offer creation
            tokio::spawn(async move {
                notifier.notify(notification).await;
            });
        }

        Ok(RoundOutcome::OffersCreated {
            round,
            agent_ids: candidates,
        })
    }

    /// Escalation trigger shared by the rejection and expiry paths: start
    /// the next round if the property is still open and every offer has
    /// settled. Benign races (another instance escalated first, or an
    /// accept landed meanwhile) resolve to a no-op.
    pub async fn escalate_if_round_closed(&self, property_id: &str) -> Result<bool> {
        let Some(record) = self.assignments.get(property_id).await? else {
            return Ok(false);
        };

        if !record.status.can_dispatch() {
            return Ok(false);
        }

        let open = self.offers.pending_for_property(property_id).await?;
        if !open.is_empty() {
            return Ok(false);
        }

        match self.start_round(property_id).await {
            Ok(RoundOutcome::OffersCreated { round, .. }) => {
                info!(property_id, round, "Escalated to next round");
                Ok(true)
            }
            Ok(RoundOutcome::Exhausted) => Ok(true),
            Ok(RoundOutcome::AlreadyOpen) => Ok(false),
            // An accept can land between the status check and the round
            // start; that is the race resolving in the winner's favor.
            Err(RooftopError::InvalidState { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Candidate selection with bounded retry. A selector outage must never
    /// look like an empty pool: after the retries run out the assignment is
    /// flagged for an operator instead of being marked EXHAUSTED.
    async fn select_with_retry(&self, record: &AssignmentRecord) -> Result<Vec<String>> {
        let mut attempt = 0u32;
        loop {
            match self
                .selector
                .select(
                    &record.property_id,
                    &record.excluded_agent_ids,
                    self.config.candidates_per_round,
                )
                .await
            {
                Ok(candidates) => return Ok(candidates),
                Err(e) if attempt < self.config.selector_max_retries => {
                    attempt += 1;
                    let backoff = self.backoff_with_jitter(attempt);
                    warn!(
                        property_id = %record.property_id,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Candidate selection failed, retrying: {}", e
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    let reason = e.to_string();
                    error!(
                        property_id = %record.property_id,
                        attempts = attempt + 1,
                        "Candidate selection retries exhausted, flagging for operator: {}",
                        reason
                    );
                    self.assignments
                        .flag_for_attention(&record.property_id, &reason)
                        .await?;
                    return Err(RooftopError::CandidateSelectionExhausted {
                        attempts: attempt + 1,
                        reason,
                    });
                }
            }
        }
    }

    fn backoff_with_jitter(&self, attempt: u32) -> std::time::Duration {
        use rand::Rng;

        let base = self.config.selector_backoff_ms.saturating_mul(1 << (attempt - 1).min(6));
        let jitter = rand::thread_rng().gen_range(0..=self.config.selector_backoff_ms);
        std::time::Duration::from_millis(base + jitter)
    }
}
