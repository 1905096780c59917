//! Dispatch engine: round orchestration, accept/reject arbitration, and the
//! expiry sweep.

pub mod coordinator;
pub mod dispatcher;
pub mod monitor;

pub use coordinator::AcceptanceCoordinator;
pub use dispatcher::{RoundDispatcher, RoundOutcome};
pub use monitor::{SweepStats, TimeoutMonitor};

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::notify::Notifier;
use crate::selector::CandidateSelector;
use crate::store::{AssignmentStore, OfferStore};

/// Wired-up engine: one dispatcher, one coordinator, one monitor, all
/// sharing the same stores. Multiple engines may point at the same database
/// concurrently; coordination happens entirely through conditional writes.
pub struct DispatchEngine {
    pub dispatcher: Arc<RoundDispatcher>,
    pub coordinator: Arc<AcceptanceCoordinator>,
    pub monitor: Arc<TimeoutMonitor>,
}

impl DispatchEngine {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        assignments: Arc<dyn AssignmentStore>,
        selector: Arc<dyn CandidateSelector>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> Self {
        let dispatcher = Arc::new(RoundDispatcher::new(
            offers.clone(),
            assignments.clone(),
            selector,
            notifier,
            config.clone(),
        ));
        let coordinator = Arc::new(AcceptanceCoordinator::new(
            offers.clone(),
            assignments.clone(),
            dispatcher.clone(),
        ));
        let monitor = Arc::new(TimeoutMonitor::new(
            offers,
            assignments,
            dispatcher.clone(),
            config,
        ));

        Self {
            dispatcher,
            coordinator,
            monitor,
        }
    }
}
