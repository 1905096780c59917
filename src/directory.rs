//! Property directory lookups
//!
//! A read model synced from the listings service. Lookups are best-effort:
//! a missing row degrades to a placeholder summary rather than failing the
//! pending-assignments endpoint.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;

use crate::domain::PropertySummary;
use crate::error::Result;

#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    async fn summary(&self, property_id: &str) -> Result<PropertySummary>;
}

/// Postgres-backed directory reading the synced `property_directory` table.
pub struct PgPropertyDirectory {
    pool: PgPool,
}

impl PgPropertyDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PropertyDirectory for PgPropertyDirectory {
    async fn summary(&self, property_id: &str) -> Result<PropertySummary> {
        let row = sqlx::query(
            r#"
            SELECT property_id, title, zipcode, district
            FROM property_directory
            WHERE property_id = $1
            "#,
        )
        .bind(property_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(r) => PropertySummary {
                property_id: r.get("property_id"),
                title: r.get("title"),
                zipcode: r.get("zipcode"),
                district: r.get("district"),
            },
            None => PropertySummary::placeholder(property_id),
        })
    }
}

/// Fixed directory for dry-run mode and tests.
#[derive(Default)]
pub struct StaticPropertyDirectory {
    entries: HashMap<String, PropertySummary>,
}

impl StaticPropertyDirectory {
    pub fn new(entries: Vec<PropertySummary>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|s| (s.property_id.clone(), s))
                .collect(),
        }
    }
}

#[async_trait]
impl PropertyDirectory for StaticPropertyDirectory {
    async fn summary(&self, property_id: &str) -> Result<PropertySummary> {
        Ok(self
            .entries
            .get(property_id)
            .cloned()
            .unwrap_or_else(|| PropertySummary::placeholder(property_id)))
    }
}
