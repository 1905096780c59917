pub mod api;
pub mod config;
pub mod coordination;
pub mod directory;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod logging;
pub mod notify;
pub mod selector;
pub mod store;

pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownConfig, ShutdownSignal};
pub use dispatch::{
    AcceptanceCoordinator, DispatchEngine, RoundDispatcher, RoundOutcome, TimeoutMonitor,
};
pub use domain::{AssignmentRecord, AssignmentStatus, Offer, OfferStatus, PropertySummary};
pub use error::{Result, RooftopError};
pub use store::{AssignmentStore, MemoryStore, OfferStore, PostgresStore};
