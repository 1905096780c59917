use thiserror::Error;

/// Main error type for the dispatch engine
#[derive(Error, Debug)]
pub enum RooftopError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Lookup errors
    #[error("Offer not found: {offer_id}")]
    OfferNotFound { offer_id: uuid::Uuid },

    #[error("Assignment not found for property: {property_id}")]
    AssignmentNotFound { property_id: String },

    // Precondition violations (caller/integration bugs, rejected loudly)
    #[error("Invalid state for {entity}: expected {expected}, found {found}")]
    InvalidState {
        entity: String,
        expected: String,
        found: String,
    },

    /// Expected race outcome: the offer was already accepted, rejected,
    /// expired, or superseded by the time this call reached the store.
    /// Surfaced to the agent UI as "no longer available", not as a failure.
    #[error("Offer {offer_id} already resolved ({status})")]
    AlreadyResolved {
        offer_id: uuid::Uuid,
        status: String,
    },

    // Candidate selection dependency failures (transient, retried with backoff)
    #[error("Candidate selection failed: {0}")]
    CandidateSelection(String),

    #[error("Candidate selection retries exhausted after {attempts} attempts: {reason}")]
    CandidateSelectionExhausted { attempts: u32, reason: String },

    // Notification delivery is best-effort; logged, never propagated upward
    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl RooftopError {
    /// Is this the benign lost-a-race outcome rather than a system fault?
    pub fn is_already_resolved(&self) -> bool {
        matches!(self, RooftopError::AlreadyResolved { .. })
    }
}

/// Result type alias for RooftopError
pub type Result<T> = std::result::Result<T, RooftopError>;
