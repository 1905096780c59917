//! Graceful Shutdown Handler
//!
//! Coordinated shutdown with proper sequencing: stop taking new dispatch
//! work, let in-flight accept/reject resolutions finish, stop the timeout
//! sweep, then flush and close the database.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - reduce timeouts
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Total timeout for graceful shutdown (default: 60s)
    pub total_timeout_secs: u64,
    /// Time to wait for in-flight resolutions to complete (default: 15s)
    pub resolution_drain_timeout_secs: u64,
    /// Time to wait for database flush (default: 10s)
    pub database_flush_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: 60,
            resolution_drain_timeout_secs: 15,
            database_flush_timeout_secs: 10,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Stopping new dispatch intake
    StoppingIntake,
    /// Draining in-flight accept/reject resolutions
    DrainingResolutions,
    /// Stopping the timeout sweep loop
    StoppingSweep,
    /// Flushing database
    FlushingDatabase,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingIntake => write!(f, "stopping_intake"),
            ShutdownPhase::DrainingResolutions => write!(f, "draining_resolutions"),
            ShutdownPhase::StoppingSweep => write!(f, "stopping_sweep"),
            ShutdownPhase::FlushingDatabase => write!(f, "flushing_database"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    phase: Arc<watch::Sender<ShutdownPhase>>,
    phase_rx: watch::Receiver<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
    completion_tx: mpsc::Sender<()>,
    completion_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase_tx, phase_rx) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);
        let (completion_tx, completion_rx) = mpsc::channel(1);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            phase: Arc::new(phase_tx),
            phase_rx,
            signal_tx,
            completion_tx,
            completion_rx: Arc::new(tokio::sync::Mutex::new(completion_rx)),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Get current shutdown phase
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!(
                "Shutdown already requested, ignoring duplicate signal: {}",
                signal
            );
            return;
        }

        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        let _ = self.phase.send(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Execute graceful shutdown sequence
    ///
    /// 1. Stop accepting dispatch triggers and agent responses
    /// 2. Wait for in-flight resolutions to settle in the store
    /// 3. Stop the timeout sweep loop
    /// 4. Flush remaining database writes
    ///
    /// Open offers survive shutdown: their deadlines are persisted and the
    /// sweep settles anything that expired while the process was down.
    pub async fn execute<F1, F2, F3, F4>(
        &self,
        stop_intake: F1,
        drain_resolutions: F2,
        stop_sweep: F3,
        flush_database: F4,
    ) -> Result<(), ShutdownError>
    where
        F1: FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
        F2: FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = bool> + Send>>,
        F3: FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>,
        F4: FnOnce() -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<(), String>> + Send>,
        >,
    {
        let start = std::time::Instant::now();
        let total_timeout = Duration::from_secs(self.config.total_timeout_secs);

        info!(
            "Starting graceful shutdown (timeout: {}s)",
            self.config.total_timeout_secs
        );

        // Phase 1: Stop intake
        self.set_phase(ShutdownPhase::StoppingIntake);
        stop_intake().await;
        debug!("Dispatch intake stopped");

        // Phase 2: Drain in-flight resolutions
        self.set_phase(ShutdownPhase::DrainingResolutions);
        let drain_timeout = Duration::from_secs(self.config.resolution_drain_timeout_secs);

        match tokio::time::timeout(drain_timeout, drain_resolutions()).await {
            Ok(drained) => {
                if drained {
                    info!("All in-flight resolutions drained");
                } else {
                    warn!("Some resolutions may not have settled during drain");
                }
            }
            Err(_) => {
                warn!(
                    "Resolution drain timeout after {}s, proceeding anyway",
                    self.config.resolution_drain_timeout_secs
                );
            }
        }

        // Check total timeout
        if start.elapsed() > total_timeout {
            error!("Total shutdown timeout exceeded");
            self.set_phase(ShutdownPhase::Complete);
            return Err(ShutdownError::Timeout);
        }

        // Phase 3: Stop the sweep
        self.set_phase(ShutdownPhase::StoppingSweep);
        stop_sweep().await;
        debug!("Timeout sweep stopped");

        // Phase 4: Flush database
        self.set_phase(ShutdownPhase::FlushingDatabase);
        let db_timeout = Duration::from_secs(self.config.database_flush_timeout_secs);

        match tokio::time::timeout(db_timeout, flush_database()).await {
            Ok(Ok(())) => debug!("Database flushed successfully"),
            Ok(Err(e)) => warn!("Database flush error: {}", e),
            Err(_) => warn!(
                "Database flush timeout after {}s",
                self.config.database_flush_timeout_secs
            ),
        }

        self.set_phase(ShutdownPhase::Complete);

        let elapsed = start.elapsed();
        info!("Graceful shutdown completed in {:?}", elapsed);

        let _ = self.completion_tx.send(()).await;

        Ok(())
    }

    /// Wait for shutdown to complete
    pub async fn wait_for_completion(&self) {
        let mut rx = self.completion_rx.lock().await;
        let _ = rx.recv().await;
    }
}

/// Shutdown errors
#[derive(Debug, Clone)]
pub enum ShutdownError {
    /// Shutdown timed out
    Timeout,
    /// Component failed during shutdown
    ComponentFailed(String),
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout => write!(f, "shutdown timed out"),
            ShutdownError::ComponentFailed(c) => {
                write!(f, "component {} failed during shutdown", c)
            }
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Helper to install OS signal handlers
pub async fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let shutdown_sigterm = shutdown.clone();
        let shutdown_sigint = shutdown.clone();
        let shutdown_sigquit = shutdown.clone();

        // Handle SIGTERM
        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
            stream.recv().await;
            info!("Received SIGTERM");
            shutdown_sigterm.request_shutdown(ShutdownSignal::Graceful);
        });

        // Handle SIGINT (Ctrl+C)
        tokio::spawn(async move {
            let mut stream =
                signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");
            stream.recv().await;
            info!("Received SIGINT");
            shutdown_sigint.request_shutdown(ShutdownSignal::Graceful);
        });

        // Handle SIGQUIT (Ctrl+\)
        tokio::spawn(async move {
            let mut stream = signal(SignalKind::quit()).expect("Failed to install SIGQUIT handler");
            stream.recv().await;
            warn!("Received SIGQUIT - urgent shutdown");
            shutdown_sigquit.request_shutdown(ShutdownSignal::Urgent);
        });
    }

    #[cfg(windows)]
    {
        let shutdown_ctrl_c = shutdown.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
            info!("Received Ctrl+C");
            shutdown_ctrl_c.request_shutdown(ShutdownSignal::Graceful);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_phase_display() {
        assert_eq!(ShutdownPhase::Running.to_string(), "running");
        assert_eq!(
            ShutdownPhase::DrainingResolutions.to_string(),
            "draining_resolutions"
        );
        assert_eq!(ShutdownPhase::Complete.to_string(), "complete");
    }

    #[tokio::test]
    async fn test_shutdown_request() {
        let shutdown = GracefulShutdown::with_defaults();

        assert!(!shutdown.is_shutdown_requested());
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Running);

        shutdown.request_shutdown(ShutdownSignal::Graceful);
        assert!(shutdown.is_shutdown_requested());

        // Duplicate request should be ignored
        shutdown.request_shutdown(ShutdownSignal::Urgent);
        assert!(shutdown.is_shutdown_requested());
    }

    #[tokio::test]
    async fn test_execute_runs_all_phases() {
        let shutdown = GracefulShutdown::new(ShutdownConfig {
            total_timeout_secs: 5,
            resolution_drain_timeout_secs: 1,
            database_flush_timeout_secs: 1,
        });

        let result = shutdown
            .execute(
                || Box::pin(async {}),
                || Box::pin(async { true }),
                || Box::pin(async {}),
                || Box::pin(async { Ok(()) }),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }
}
