use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use std::sync::Arc;

use crate::dispatch::{AcceptanceCoordinator, RoundDispatcher, TimeoutMonitor};
use crate::directory::PropertyDirectory;
use crate::store::{AssignmentStore, OfferStore};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub offers: Arc<dyn OfferStore>,
    pub assignments: Arc<dyn AssignmentStore>,
    pub coordinator: Arc<AcceptanceCoordinator>,
    pub dispatcher: Arc<RoundDispatcher>,
    pub monitor: Arc<TimeoutMonitor>,
    pub directory: Arc<dyn PropertyDirectory>,

    /// Database pool for health checks; None in dry-run mode
    pub db_pool: Option<PgPool>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        assignments: Arc<dyn AssignmentStore>,
        coordinator: Arc<AcceptanceCoordinator>,
        dispatcher: Arc<RoundDispatcher>,
        monitor: Arc<TimeoutMonitor>,
        directory: Arc<dyn PropertyDirectory>,
        db_pool: Option<PgPool>,
    ) -> Self {
        Self {
            offers,
            assignments,
            coordinator,
            dispatcher,
            monitor,
            directory,
            db_pool,
            start_time: Utc::now(),
        }
    }

    /// Get system uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}
