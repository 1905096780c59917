//! Candidate selection
//!
//! The matching heuristic (district, workload, rating) lives behind one
//! stable contract so it can evolve independently of the dispatch engine.
//! Selection is side-effect free and deterministic given the same inputs
//! modulo agent-pool changes.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

use crate::error::{Result, RooftopError};

/// Ordered candidate lookup for one property.
#[async_trait]
pub trait CandidateSelector: Send + Sync {
    /// Returns up to `max_candidates` eligible agent IDs for the property,
    /// best match first, never including anyone in `excluded`. An empty
    /// list means no eligible agents remain — the signal that drives
    /// EXHAUSTED. Backend failures must surface as errors, never as an
    /// empty list.
    async fn select(
        &self,
        property_id: &str,
        excluded: &[String],
        max_candidates: usize,
    ) -> Result<Vec<String>>;
}

/// Fixed ordered pool. Used by dry-run mode and tests.
pub struct PoolSelector {
    pool: Vec<String>,
}

impl PoolSelector {
    pub fn new(pool: Vec<String>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateSelector for PoolSelector {
    async fn select(
        &self,
        _property_id: &str,
        excluded: &[String],
        max_candidates: usize,
    ) -> Result<Vec<String>> {
        Ok(self
            .pool
            .iter()
            .filter(|a| !excluded.contains(a))
            .take(max_candidates)
            .cloned()
            .collect())
    }
}

/// Postgres-backed selector: active agents in the property's district,
/// least-loaded first, rating as tiebreaker. Workload counts only live
/// work (PENDING offers and held assignments).
pub struct DistrictSelector {
    pool: PgPool,
}

impl DistrictSelector {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandidateSelector for DistrictSelector {
    async fn select(
        &self,
        property_id: &str,
        excluded: &[String],
        max_candidates: usize,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT a.agent_id
            FROM agent_directory a
            JOIN property_directory p ON p.district = a.district
            WHERE p.property_id = $1
              AND a.active
              AND a.agent_id != ALL($2)
            ORDER BY
                (SELECT COUNT(*) FROM offers o
                 WHERE o.agent_id = a.agent_id AND o.status = 'PENDING')
                + (SELECT COUNT(*) FROM assignments s
                   WHERE s.assigned_agent_id = a.agent_id AND s.status = 'ASSIGNED') ASC,
                a.rating DESC,
                a.agent_id ASC
            LIMIT $3
            "#,
        )
        .bind(property_id)
        .bind(excluded)
        .bind(max_candidates as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RooftopError::CandidateSelection(e.to_string()))?;

        let candidates: Vec<String> = rows.iter().map(|r| r.get("agent_id")).collect();
        debug!(
            property_id,
            excluded = excluded.len(),
            found = candidates.len(),
            "Candidate selection complete"
        );
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_selector_filters_excluded() {
        let selector = PoolSelector::new(vec![
            "agent-a".to_string(),
            "agent-b".to_string(),
            "agent-c".to_string(),
        ]);

        let picked = selector
            .select("prop-1", &["agent-a".to_string()], 2)
            .await
            .unwrap();
        assert_eq!(picked, vec!["agent-b".to_string(), "agent-c".to_string()]);
    }

    #[tokio::test]
    async fn test_pool_selector_empty_when_all_excluded() {
        let selector = PoolSelector::new(vec!["agent-a".to_string()]);

        let picked = selector
            .select("prop-1", &["agent-a".to_string()], 5)
            .await
            .unwrap();
        assert!(picked.is_empty());
    }

    #[tokio::test]
    async fn test_pool_selector_respects_max() {
        let selector = PoolSelector::new(vec![
            "agent-a".to_string(),
            "agent-b".to_string(),
            "agent-c".to_string(),
        ]);

        let picked = selector.select("prop-1", &[], 1).await.unwrap();
        assert_eq!(picked, vec!["agent-a".to_string()]);
    }
}
