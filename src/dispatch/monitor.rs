//! Expiry sweep
//!
//! Guarantees that every PENDING offer receives its expiry transition at or
//! after the deadline, exactly once. The schedule is durable by
//! construction: each pass re-derives due work from persisted `expires_at`
//! fields, so a process crash loses no deadlines and a restart needs no
//! recovery step beyond the next sweep. Double firing is impossible because
//! the expiry write is a CAS on PENDING.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::dispatch::RoundDispatcher;
use crate::domain::OfferStatus;
use crate::error::Result;
use crate::store::{AssignmentStore, OfferStore};

/// Sweep statistics
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub sweeps: u64,
    pub offers_expired: u64,
    pub escalations: u64,
    pub errors: u64,
    pub last_sweep: Option<DateTime<Utc>>,
}

pub struct TimeoutMonitor {
    offers: Arc<dyn OfferStore>,
    assignments: Arc<dyn AssignmentStore>,
    dispatcher: Arc<RoundDispatcher>,
    config: DispatchConfig,
    running: Arc<AtomicBool>,
    stats: Arc<RwLock<SweepStats>>,
}

impl TimeoutMonitor {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        assignments: Arc<dyn AssignmentStore>,
        dispatcher: Arc<RoundDispatcher>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            offers,
            assignments,
            dispatcher,
            config,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(SweepStats::default())),
        }
    }

    pub async fn get_stats(&self) -> SweepStats {
        self.stats.read().await.clone()
    }

    /// Start the sweep loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Timeout monitor already running");
            return;
        }

        info!(
            interval_secs = self.config.sweep_interval_secs,
            batch = self.config.sweep_batch_size,
            "Starting timeout monitor"
        );

        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                monitor.config.sweep_interval_secs,
            ));

            while monitor.running.load(Ordering::SeqCst) {
                interval.tick().await;

                if let Err(e) = monitor.run_sweep().await {
                    error!("Expiry sweep failed: {}", e);
                    let mut stats = monitor.stats.write().await;
                    stats.errors += 1;
                }
            }

            info!("Timeout monitor stopped");
        });
    }

    /// Stop the sweep loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Timeout monitor stop requested");
    }

    /// Run a single sweep pass. Public so startup recovery and tests can
    /// drive it directly.
    pub async fn run_sweep(&self) -> Result<()> {
        let now = Utc::now();
        let due = self
            .offers
            .due_pending(now, self.config.sweep_batch_size)
            .await?;

        if due.is_empty() {
            debug!("No due offers");
            let mut stats = self.stats.write().await;
            stats.sweeps += 1;
            stats.last_sweep = Some(now);
            return Ok(());
        }

        debug!("Expiring {} due offers", due.len());

        let mut expired = 0u64;
        let mut escalations = 0u64;
        let mut errors = 0u64;

        for offer in due {
            // CAS guard: a concurrent accept/reject makes this a no-op
            match self
                .offers
                .resolve_pending(offer.offer_id, OfferStatus::Expired, None)
                .await
            {
                Ok(true) => {
                    expired += 1;
                    info!(
                        offer_id = %offer.offer_id,
                        property_id = %offer.property_id,
                        agent_id = %offer.agent_id,
                        round = offer.round,
                        "Offer expired"
                    );

                    if let Err(e) = self
                        .assignments
                        .add_exclusion(&offer.property_id, &offer.agent_id)
                        .await
                    {
                        warn!(
                            property_id = %offer.property_id,
                            "Failed to record exclusion after expiry: {}", e
                        );
                        errors += 1;
                    }

                    // Escalation (and its notification fan-out) runs on the
                    // dispatcher's own async path; the sweep loop never
                    // waits on delivery.
                    let dispatcher = self.dispatcher.clone();
                    let property_id = offer.property_id.clone();
                    tokio::spawn(async move {
                        match dispatcher.escalate_if_round_closed(&property_id).await {
                            Ok(true) => {}
                            Ok(false) => {}
                            Err(e) => {
                                error!(property_id, "Escalation after expiry failed: {}", e)
                            }
                        }
                    });
                    escalations += 1;
                }
                Ok(false) => {
                    debug!(
                        offer_id = %offer.offer_id,
                        "Offer resolved concurrently, expiry skipped"
                    );
                }
                Err(e) => {
                    warn!(offer_id = %offer.offer_id, "Expiry write failed: {}", e);
                    errors += 1;
                }
            }
        }

        {
            let mut stats = self.stats.write().await;
            stats.sweeps += 1;
            stats.offers_expired += expired;
            stats.escalations += escalations;
            stats.errors += errors;
            stats.last_sweep = Some(now);
        }

        debug!(
            expired,
            escalations, errors, "Sweep pass complete"
        );

        Ok(())
    }

    /// Escalations are spawned; tests (and a drain-on-shutdown path) can
    /// wait for the store to quiesce instead of sleeping blindly.
    pub async fn run_sweep_and_settle(&self) -> Result<()> {
        self.run_sweep().await?;
        // Spawned escalations touch only the store; yielding lets them run
        // to completion on the current-thread test runtime.
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
