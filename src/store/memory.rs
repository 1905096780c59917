use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{AssignmentRecord, AssignmentStatus, Offer, OfferStatus};
use crate::error::{Result, RooftopError};
use crate::store::{AssignmentStore, OfferStore};

/// In-memory store for dry-run mode and tests.
///
/// One mutex per table: every conditional update runs check-and-write under
/// the lock, which gives the same per-entity linearizability the Postgres
/// adapter gets from conditional UPDATEs.
#[derive(Default)]
pub struct MemoryStore {
    offers: Mutex<HashMap<Uuid, Offer>>,
    assignments: Mutex<HashMap<String, AssignmentRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: snapshot a single offer.
    pub async fn offer_snapshot(&self, offer_id: Uuid) -> Option<Offer> {
        self.offers.lock().await.get(&offer_id).cloned()
    }

    /// Test helper: pull an offer's deadline into the past without waiting
    /// for wall-clock time.
    pub async fn rewind_deadline(&self, offer_id: Uuid, by: chrono::Duration) {
        if let Some(offer) = self.offers.lock().await.get_mut(&offer_id) {
            offer.created_at = offer.created_at - by;
            offer.expires_at = offer.expires_at - by;
        }
    }
}

#[async_trait]
impl OfferStore for MemoryStore {
    async fn insert_offers(&self, offers: &[Offer]) -> Result<()> {
        let mut table = self.offers.lock().await;
        for offer in offers {
            table.insert(offer.offer_id, offer.clone());
        }
        Ok(())
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>> {
        Ok(self.offers.lock().await.get(&offer_id).cloned())
    }

    async fn resolve_pending(
        &self,
        offer_id: Uuid,
        target: OfferStatus,
        rejection_reason: Option<&str>,
    ) -> Result<bool> {
        let mut table = self.offers.lock().await;
        match table.get_mut(&offer_id) {
            Some(offer) if offer.status == OfferStatus::Pending => {
                offer.status = target;
                offer.responded_at = Some(Utc::now());
                offer.rejection_reason = rejection_reason.map(|r| r.to_string());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RooftopError::OfferNotFound { offer_id }),
        }
    }

    async fn demote_accepted(&self, offer_id: Uuid) -> Result<bool> {
        let mut table = self.offers.lock().await;
        match table.get_mut(&offer_id) {
            Some(offer) if offer.status == OfferStatus::Accepted => {
                offer.status = OfferStatus::Superseded;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RooftopError::OfferNotFound { offer_id }),
        }
    }

    async fn supersede_open_offers(
        &self,
        property_id: &str,
        winner: Uuid,
    ) -> Result<Vec<Offer>> {
        let mut table = self.offers.lock().await;
        let mut changed = Vec::new();
        for offer in table.values_mut() {
            if offer.property_id == property_id
                && offer.status == OfferStatus::Pending
                && offer.offer_id != winner
            {
                offer.status = OfferStatus::Superseded;
                offer.responded_at = Some(Utc::now());
                changed.push(offer.clone());
            }
        }
        Ok(changed)
    }

    async fn pending_for_agent(&self, agent_id: &str) -> Result<Vec<Offer>> {
        let table = self.offers.lock().await;
        let mut out: Vec<Offer> = table
            .values()
            .filter(|o| o.agent_id == agent_id && o.status == OfferStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.expires_at);
        Ok(out)
    }

    async fn pending_for_property(&self, property_id: &str) -> Result<Vec<Offer>> {
        let table = self.offers.lock().await;
        let mut out: Vec<Offer> = table
            .values()
            .filter(|o| o.property_id == property_id && o.status == OfferStatus::Pending)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.created_at);
        Ok(out)
    }

    async fn offers_for_round(&self, property_id: &str, round: i32) -> Result<Vec<Offer>> {
        let table = self.offers.lock().await;
        let mut out: Vec<Offer> = table
            .values()
            .filter(|o| o.property_id == property_id && o.round == round)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.created_at);
        Ok(out)
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Offer>> {
        let table = self.offers.lock().await;
        let mut out: Vec<Offer> = table
            .values()
            .filter(|o| o.status == OfferStatus::Pending && o.expires_at <= now)
            .cloned()
            .collect();
        out.sort_by_key(|o| o.expires_at);
        out.truncate(limit as usize);
        Ok(out)
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn create_if_absent(&self, property_id: &str) -> Result<AssignmentRecord> {
        let mut table = self.assignments.lock().await;
        let record = table
            .entry(property_id.to_string())
            .or_insert_with(|| AssignmentRecord::new(property_id));
        Ok(record.clone())
    }

    async fn get(&self, property_id: &str) -> Result<Option<AssignmentRecord>> {
        Ok(self.assignments.lock().await.get(property_id).cloned())
    }

    async fn begin_round(&self, property_id: &str, expected_round: i32) -> Result<bool> {
        let mut table = self.assignments.lock().await;
        match table.get_mut(property_id) {
            Some(record)
                if record.status.can_dispatch() && record.current_round == expected_round =>
            {
                record.status = AssignmentStatus::Offering;
                record.current_round += 1;
                record.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RooftopError::AssignmentNotFound {
                property_id: property_id.to_string(),
            }),
        }
    }

    async fn try_assign(&self, property_id: &str, agent_id: &str) -> Result<bool> {
        let mut table = self.assignments.lock().await;
        match table.get_mut(property_id) {
            Some(record)
                if record.status == AssignmentStatus::Offering
                    && record.assigned_agent_id.is_none() =>
            {
                record.status = AssignmentStatus::Assigned;
                record.assigned_agent_id = Some(agent_id.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RooftopError::AssignmentNotFound {
                property_id: property_id.to_string(),
            }),
        }
    }

    async fn mark_exhausted(&self, property_id: &str) -> Result<bool> {
        let mut table = self.assignments.lock().await;
        match table.get_mut(property_id) {
            Some(record) if record.status.can_dispatch() => {
                record.status = AssignmentStatus::Exhausted;
                record.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RooftopError::AssignmentNotFound {
                property_id: property_id.to_string(),
            }),
        }
    }

    async fn add_exclusion(&self, property_id: &str, agent_id: &str) -> Result<()> {
        let mut table = self.assignments.lock().await;
        if let Some(record) = table.get_mut(property_id) {
            if !record.is_excluded(agent_id) {
                record.excluded_agent_ids.push(agent_id.to_string());
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn flag_for_attention(&self, property_id: &str, reason: &str) -> Result<()> {
        let mut table = self.assignments.lock().await;
        if let Some(record) = table.get_mut(property_id) {
            record.flagged_at = Some(Utc::now());
            record.flag_reason = Some(reason.to_string());
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reopen_exhausted(&self, property_id: &str) -> Result<bool> {
        let mut table = self.assignments.lock().await;
        match table.get_mut(property_id) {
            Some(record) if record.status == AssignmentStatus::Exhausted => {
                record.status = AssignmentStatus::Unassigned;
                record.current_round = 0;
                record.excluded_agent_ids.clear();
                record.flagged_at = None;
                record.flag_reason = None;
                record.updated_at = Utc::now();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RooftopError::AssignmentNotFound {
                property_id: property_id.to_string(),
            }),
        }
    }

    async fn list_by_status(
        &self,
        status: AssignmentStatus,
        limit: i64,
    ) -> Result<Vec<AssignmentRecord>> {
        let table = self.assignments.lock().await;
        let mut out: Vec<AssignmentRecord> = table
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        out.truncate(limit as usize);
        Ok(out)
    }

    async fn list_flagged(&self, limit: i64) -> Result<Vec<AssignmentRecord>> {
        let table = self.assignments.lock().await;
        let mut out: Vec<AssignmentRecord> = table
            .values()
            .filter(|r| r.flagged_at.is_some())
            .cloned()
            .collect();
        out.sort_by(|a, b| b.flagged_at.cmp(&a.flagged_at));
        out.truncate(limit as usize);
        Ok(out)
    }
}
