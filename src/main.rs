use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lead_scout_api::config::Config;
use lead_scout_api::db::Database;
use lead_scout_api::dedupe::DuplicateGate;
use lead_scout_api::gatherers::{LeadSink, MatchJudge, PageExtractor, SearchGatherer};
use lead_scout_api::handlers::{self, AppState};
use lead_scout_api::lead_store::PgLeadStore;
use lead_scout_api::orchestrator::{BatchOrchestrator, OrchestratorSettings};
use lead_scout_api::pipeline::{PipelineSettings, VerificationPipeline};
use lead_scout_api::services::{LlmJudgeService, PageExtractorService, SerperSearchService};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and schema bootstrap.
/// - External collaborator clients (search API, LLM judge, extractor).
/// - The duplicate gate, pipeline, and batch orchestrator.
/// - HTTP routes and middleware (CORS, Rate Limiting).
///
/// It then starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lead_scout_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; missing credentials fail here, not mid-batch
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Lead sink + schema bootstrap
    let store = Arc::new(PgLeadStore::new(db.pool.clone()));
    store
        .ensure_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Schema bootstrap failed: {}", e))?;
    let sink: Arc<dyn LeadSink> = store;
    tracing::info!("Lead store ready");

    // External collaborators
    let search: Arc<dyn SearchGatherer> = Arc::new(SerperSearchService::new(&config));
    let judge: Arc<dyn MatchJudge> = Arc::new(LlmJudgeService::new(&config));
    let extractor: Arc<dyn PageExtractor> = Arc::new(PageExtractorService::new(&config));
    tracing::info!("✓ Gatherer clients initialized: {}", config.serper_base_url);

    // Duplicate gate over the sink, with the configured staleness window
    let gate = Arc::new(DuplicateGate::new(
        sink.clone(),
        Duration::from_secs(config.dedupe_ttl_secs),
    ));
    tracing::info!(
        "Duplicate gate initialized ({}s staleness window)",
        config.dedupe_ttl_secs
    );

    // Pipeline + orchestrator
    let pipeline = Arc::new(VerificationPipeline::new(
        search,
        extractor,
        judge,
        PipelineSettings::from_config(&config),
    ));
    let orchestrator = Arc::new(BatchOrchestrator::new(
        gate.clone(),
        pipeline,
        sink.clone(),
        OrchestratorSettings::from_config(&config),
    ));

    // Build application state
    let app_state = Arc::new(AppState {
        db: db.pool.clone(),
        config: config.clone(),
        gate,
        sink,
        orchestrator,
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .unwrap(),
    );

    // Build protected routes with security layers
    let protected_routes = Router::new()
        .route("/api/v1/companies/verify", post(handlers::verify_company))
        .route("/api/v1/companies/batch", post(handlers::verify_batch))
        .route("/api/v1/leads/offset", get(handlers::lead_offset))
        .route("/api/v1/dedupe/refresh", post(handlers::refresh_dedupe))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 2MB max payload (batches are small)
                .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024))
                // Rate limiting: 10 req/sec per IP, burst of 20
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Build final app with health check (bypasses rate limiting)
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
