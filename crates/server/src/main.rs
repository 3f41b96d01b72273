use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use f2f_core::{
    load_config, validate_config, JobOrchestrator, JobStore, OrchestratorDeps, Planner,
    ProcessInvoker, Prober, RecipeBook, RecipeValidator, Registry, SqliteJobStore, ToolInvoker,
};
use f2f_server::api::create_router;
use f2f_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("F2F_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("F2F_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);
    info!("Workspace: {:?}", config.orchestrator.workspace_dir);

    // Capability registry
    let registry = if config.registry.builtin {
        Registry::with_builtins().context("Failed to register built-in capabilities")?
    } else {
        Registry::new()
    };
    if let Some(dir) = &config.registry.descriptor_dir {
        if let Err(e) = registry.load_descriptors(dir) {
            warn!("Failed to load capability descriptors from {:?}: {}", dir, e);
        }
    }
    let registry = Arc::new(registry);
    info!("Capability registry initialized ({} capabilities)", registry.len());

    // Probe the host once before accepting requests
    let prober = Arc::new(Prober::with_system_resolver(
        Arc::clone(&registry),
        config.prober.clone(),
    ));
    let snapshot = prober.probe().await;
    info!(
        "Initial probe: {}/{} capabilities available, {} tools found",
        snapshot.available_count(),
        registry.len(),
        snapshot.report.available_tools()
    );

    // Planner and recipes
    let planner = Arc::new(Planner::new(Arc::clone(&registry), config.planner.clone()));
    let validator = Arc::new(RecipeValidator::new(
        Arc::clone(&registry),
        Arc::clone(&planner),
    ));
    let recipes = Arc::new(RecipeBook::new(validator));

    // Job store
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    // Orchestrator
    let invoker: Arc<dyn ToolInvoker> = Arc::new(ProcessInvoker::new());
    let orchestrator = JobOrchestrator::new(
        config.orchestrator.clone(),
        OrchestratorDeps {
            registry: Arc::clone(&registry),
            prober: Arc::clone(&prober),
            planner: Arc::clone(&planner),
            recipes: Arc::clone(&recipes),
            store,
            invoker,
        },
    );
    orchestrator
        .start()
        .await
        .context("Failed to start job orchestrator")?;
    info!("Job orchestrator started");

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        registry,
        prober,
        planner,
        recipes,
        orchestrator.clone(),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Unfinished jobs stay persisted and resume on the next start
    info!("Stopping orchestrator...");
    orchestrator.stop().await;
    info!("Server shut down");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
