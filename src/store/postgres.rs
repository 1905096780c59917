use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{AssignmentRecord, AssignmentStatus, Offer, OfferStatus};
use crate::error::{Result, RooftopError};
use crate::store::{AssignmentStore, OfferStore};

/// PostgreSQL storage adapter backing both the offer store and the
/// assignment state store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_offer(row: &PgRow) -> Result<Offer> {
        let status_str: String = row.get("status");
        let status = OfferStatus::try_from(status_str.as_str())
            .map_err(RooftopError::Internal)?;

        Ok(Offer {
            offer_id: row.get("offer_id"),
            property_id: row.get("property_id"),
            agent_id: row.get("agent_id"),
            round: row.get("round"),
            status,
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
            responded_at: row.get("responded_at"),
            rejection_reason: row.get("rejection_reason"),
        })
    }

    fn map_assignment(row: &PgRow) -> Result<AssignmentRecord> {
        let status_str: String = row.get("status");
        let status = AssignmentStatus::try_from(status_str.as_str())
            .map_err(RooftopError::Internal)?;

        Ok(AssignmentRecord {
            property_id: row.get("property_id"),
            status,
            current_round: row.get("current_round"),
            assigned_agent_id: row.get("assigned_agent_id"),
            excluded_agent_ids: row.get("excluded_agent_ids"),
            flagged_at: row.get("flagged_at"),
            flag_reason: row.get("flag_reason"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const OFFER_COLUMNS: &str = "offer_id, property_id, agent_id, round, status, \
                             created_at, expires_at, responded_at, rejection_reason";

const ASSIGNMENT_COLUMNS: &str = "property_id, status, current_round, assigned_agent_id, \
                                  excluded_agent_ids, flagged_at, flag_reason, \
                                  created_at, updated_at";

#[async_trait]
impl OfferStore for PostgresStore {
    #[instrument(skip(self, offers), fields(count = offers.len()))]
    async fn insert_offers(&self, offers: &[Offer]) -> Result<()> {
        if offers.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for offer in offers {
            sqlx::query(
                r#"
                INSERT INTO offers (
                    offer_id, property_id, agent_id, round, status, created_at, expires_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(offer.offer_id)
            .bind(&offer.property_id)
            .bind(&offer.agent_id)
            .bind(offer.round)
            .bind(offer.status.as_str())
            .bind(offer.created_at)
            .bind(offer.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Inserted {} offers", offers.len());
        Ok(())
    }

    async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM offers WHERE offer_id = $1",
            OFFER_COLUMNS
        ))
        .bind(offer_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_offer).transpose()
    }

    #[instrument(skip(self))]
    async fn resolve_pending(
        &self,
        offer_id: Uuid,
        target: OfferStatus,
        rejection_reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE offers
            SET status = $2, responded_at = NOW(), rejection_reason = $3
            WHERE offer_id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(offer_id)
        .bind(target.as_str())
        .bind(rejection_reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.rows_affected() == 1),
            // The single-winner unique index can reject a racing accept
            // before this row's status check does; that is a lost CAS, not
            // a fault.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self))]
    async fn demote_accepted(&self, offer_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE offers
            SET status = 'SUPERSEDED'
            WHERE offer_id = $1 AND status = 'ACCEPTED'
            "#,
        )
        .bind(offer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn supersede_open_offers(
        &self,
        property_id: &str,
        winner: Uuid,
    ) -> Result<Vec<Offer>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE offers
            SET status = 'SUPERSEDED', responded_at = NOW()
            WHERE property_id = $1 AND status = 'PENDING' AND offer_id != $2
            RETURNING {}
            "#,
            OFFER_COLUMNS
        ))
        .bind(property_id)
        .bind(winner)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_offer).collect()
    }

    async fn pending_for_agent(&self, agent_id: &str) -> Result<Vec<Offer>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM offers
            WHERE agent_id = $1 AND status = 'PENDING'
            ORDER BY expires_at ASC
            "#,
            OFFER_COLUMNS
        ))
        .bind(agent_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_offer).collect()
    }

    async fn pending_for_property(&self, property_id: &str) -> Result<Vec<Offer>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM offers
            WHERE property_id = $1 AND status = 'PENDING'
            ORDER BY created_at ASC
            "#,
            OFFER_COLUMNS
        ))
        .bind(property_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_offer).collect()
    }

    async fn offers_for_round(&self, property_id: &str, round: i32) -> Result<Vec<Offer>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM offers
            WHERE property_id = $1 AND round = $2
            ORDER BY created_at ASC
            "#,
            OFFER_COLUMNS
        ))
        .bind(property_id)
        .bind(round)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_offer).collect()
    }

    async fn due_pending(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Offer>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM offers
            WHERE status = 'PENDING' AND expires_at <= $1
            ORDER BY expires_at ASC
            LIMIT $2
            "#,
            OFFER_COLUMNS
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_offer).collect()
    }
}

#[async_trait]
impl AssignmentStore for PostgresStore {
    #[instrument(skip(self))]
    async fn create_if_absent(&self, property_id: &str) -> Result<AssignmentRecord> {
        sqlx::query(
            r#"
            INSERT INTO assignments (property_id, status, current_round, excluded_agent_ids)
            VALUES ($1, 'UNASSIGNED', 0, '{}')
            ON CONFLICT (property_id) DO NOTHING
            "#,
        )
        .bind(property_id)
        .execute(&self.pool)
        .await?;

        self.get(property_id)
            .await?
            .ok_or_else(|| RooftopError::AssignmentNotFound {
                property_id: property_id.to_string(),
            })
    }

    async fn get(&self, property_id: &str) -> Result<Option<AssignmentRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM assignments WHERE property_id = $1",
            ASSIGNMENT_COLUMNS
        ))
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::map_assignment).transpose()
    }

    #[instrument(skip(self))]
    async fn begin_round(&self, property_id: &str, expected_round: i32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE assignments
            SET status = 'OFFERING', current_round = current_round + 1, updated_at = NOW()
            WHERE property_id = $1
              AND status IN ('UNASSIGNED', 'OFFERING')
              AND current_round = $2
            "#,
        )
        .bind(property_id)
        .bind(expected_round)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn try_assign(&self, property_id: &str, agent_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE assignments
            SET status = 'ASSIGNED', assigned_agent_id = $2, updated_at = NOW()
            WHERE property_id = $1
              AND status = 'OFFERING'
              AND assigned_agent_id IS NULL
            "#,
        )
        .bind(property_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn mark_exhausted(&self, property_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE assignments
            SET status = 'EXHAUSTED', updated_at = NOW()
            WHERE property_id = $1 AND status IN ('UNASSIGNED', 'OFFERING')
            "#,
        )
        .bind(property_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_exclusion(&self, property_id: &str, agent_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE assignments
            SET excluded_agent_ids = array_append(excluded_agent_ids, $2), updated_at = NOW()
            WHERE property_id = $1 AND NOT ($2 = ANY(excluded_agent_ids))
            "#,
        )
        .bind(property_id)
        .bind(agent_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn flag_for_attention(&self, property_id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE assignments
            SET flagged_at = NOW(), flag_reason = $2, updated_at = NOW()
            WHERE property_id = $1
            "#,
        )
        .bind(property_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn reopen_exhausted(&self, property_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE assignments
            SET status = 'UNASSIGNED', current_round = 0, excluded_agent_ids = '{}',
                flagged_at = NULL, flag_reason = NULL, updated_at = NOW()
            WHERE property_id = $1 AND status = 'EXHAUSTED'
            "#,
        )
        .bind(property_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        status: AssignmentStatus,
        limit: i64,
    ) -> Result<Vec<AssignmentRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM assignments
            WHERE status = $1
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_assignment).collect()
    }

    async fn list_flagged(&self, limit: i64) -> Result<Vec<AssignmentRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM assignments
            WHERE flagged_at IS NOT NULL
            ORDER BY flagged_at DESC
            LIMIT $1
            "#,
            ASSIGNMENT_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_assignment).collect()
    }
}
