use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use rooftop::api::{create_router, AppState};
use rooftop::config::AppConfig;
use rooftop::coordination::{install_signal_handlers, GracefulShutdown};
use rooftop::directory::{PgPropertyDirectory, PropertyDirectory, StaticPropertyDirectory};
use rooftop::dispatch::{DispatchEngine, RoundOutcome};
use rooftop::error::{Result, RooftopError};
use rooftop::logging::{init_logging, init_logging_simple};
use rooftop::selector::{CandidateSelector, DistrictSelector, PoolSelector};
use rooftop::store::{AssignmentStore, MemoryStore, OfferStore, PostgresStore};

#[derive(Parser)]
#[command(name = "rooftop", about = "Property-to-agent assignment dispatch engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "ROOFTOP_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server with the dispatch engine and expiry sweep (default)
    Serve,
    /// Start dispatch for a single property, then exit
    Dispatch {
        /// Property to dispatch
        property_id: String,
    },
    /// Run database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            init_logging(&config.logging);
            run_serve(config).await
        }
        Commands::Dispatch { property_id } => {
            init_logging_simple();
            run_dispatch_once(config, &property_id).await
        }
        Commands::Migrate => {
            init_logging_simple();
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
            info!("Migrations applied");
            Ok(())
        }
    }
}

struct Wiring {
    engine: DispatchEngine,
    offers: Arc<dyn OfferStore>,
    assignments: Arc<dyn AssignmentStore>,
    directory: Arc<dyn PropertyDirectory>,
    db_pool: Option<sqlx::PgPool>,
}

async fn build_wiring(config: &AppConfig) -> Result<Wiring> {
    let notifier = rooftop::notify::from_config(&config.notification);

    if config.dry_run.enabled {
        info!(
            agents = config.dry_run.agent_pool.len(),
            "Dry-run mode: in-memory store with a fixed agent pool"
        );
        let store = Arc::new(MemoryStore::new());
        let offers: Arc<dyn OfferStore> = store.clone();
        let assignments: Arc<dyn AssignmentStore> = store;
        let selector: Arc<dyn CandidateSelector> =
            Arc::new(PoolSelector::new(config.dry_run.agent_pool.clone()));
        let directory: Arc<dyn PropertyDirectory> = Arc::new(StaticPropertyDirectory::default());

        let engine = DispatchEngine::new(
            offers.clone(),
            assignments.clone(),
            selector,
            notifier,
            config.dispatch.clone(),
        );

        return Ok(Wiring {
            engine,
            offers,
            assignments,
            directory,
            db_pool: None,
        });
    }

    let store = PostgresStore::new(&config.database.url, config.database.max_connections).await?;
    store.migrate().await?;
    let pool = store.pool().clone();

    let store = Arc::new(store);
    let offers: Arc<dyn OfferStore> = store.clone();
    let assignments: Arc<dyn AssignmentStore> = store;
    let selector: Arc<dyn CandidateSelector> = Arc::new(DistrictSelector::new(pool.clone()));
    let directory: Arc<dyn PropertyDirectory> = Arc::new(PgPropertyDirectory::new(pool.clone()));

    let engine = DispatchEngine::new(
        offers.clone(),
        assignments.clone(),
        selector,
        notifier,
        config.dispatch.clone(),
    );

    Ok(Wiring {
        engine,
        offers,
        assignments,
        directory,
        db_pool: Some(pool),
    })
}

async fn run_serve(config: AppConfig) -> Result<()> {
    let wiring = build_wiring(&config).await?;
    let engine = wiring.engine;

    engine.monitor.start();

    let state = AppState::new(
        wiring.offers,
        wiring.assignments,
        engine.coordinator.clone(),
        engine.dispatcher.clone(),
        engine.monitor.clone(),
        wiring.directory,
        wiring.db_pool.clone(),
    );

    let shutdown = Arc::new(GracefulShutdown::with_defaults());
    install_signal_handlers(shutdown.clone()).await;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(RooftopError::Io)?;
    info!("API server listening on {}", addr);

    let app = create_router(state);
    let mut signal_rx = shutdown.subscribe();

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = signal_rx.recv().await;
        })
        .await
        .map_err(RooftopError::Io)?;

    info!("API server stopped, running shutdown sequence");

    let monitor = engine.monitor.clone();
    let db_pool = wiring.db_pool.clone();
    let result = shutdown
        .execute(
            || Box::pin(async {}),
            // Open offers keep their persisted deadlines; the sweep picks
            // them back up on the next start, so there is nothing to drain
            // beyond in-flight request handlers, which axum already waited
            // for.
            || Box::pin(async { true }),
            move || {
                Box::pin(async move {
                    monitor.stop();
                })
            },
            move || {
                Box::pin(async move {
                    if let Some(pool) = db_pool {
                        pool.close().await;
                    }
                    Ok(())
                })
            },
        )
        .await;

    if let Err(e) = result {
        error!("Shutdown sequence incomplete: {}", e);
    }

    Ok(())
}

async fn run_dispatch_once(config: AppConfig, property_id: &str) -> Result<()> {
    let wiring = build_wiring(&config).await?;

    match wiring.engine.dispatcher.dispatch_property(property_id).await? {
        RoundOutcome::OffersCreated { round, agent_ids } => {
            info!(property_id, round, ?agent_ids, "Dispatch round opened");
            println!("round {} opened: {}", round, agent_ids.join(", "));
        }
        RoundOutcome::AlreadyOpen => {
            println!("a round is already open for {}", property_id);
        }
        RoundOutcome::Exhausted => {
            println!("no eligible agents remain for {}", property_id);
        }
    }

    if let Some(pool) = wiring.db_pool {
        pool.close().await;
    }

    Ok(())
}
