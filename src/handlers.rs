use crate::config::Config;
use crate::dedupe::DuplicateGate;
use crate::errors::AppError;
use crate::gatherers::LeadSink;
use crate::models::{BatchReport, BatchRequest, CompanyIdentity, VerifyRequest};
use crate::orchestrator::BatchOrchestrator;
use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

/// Largest candidate list accepted on the batch route.
const MAX_BATCH_SIZE: usize = 100;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub db: PgPool,
    /// Application configuration.
    pub config: Config,
    /// Process-wide duplicate gate.
    pub gate: Arc<DuplicateGate>,
    /// Lead sink (Postgres-backed in production).
    pub sink: Arc<dyn LeadSink>,
    /// Sequential batch orchestrator over gate, pipeline, and sink.
    pub orchestrator: Arc<BatchOrchestrator>,
}

/// Health check endpoint.
///
/// Returns the service status, version, and health information.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "lead-scout-api",
            "version": "0.1.0"
        })),
    )
}

/// POST /api/v1/companies/verify
///
/// Run the full verification pipeline for a single candidate. Duplicates
/// are skipped without running the pipeline and reported as such.
pub async fn verify_company(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    tracing::info!(
        "POST /companies/verify - name: {}, location: {}",
        request.name,
        request.location
    );

    validate_request(&request)?;

    let report = state
        .orchestrator
        .process(vec![CompanyIdentity::from(request)])
        .await;

    if report.counters.duplicates_skipped > 0 {
        return Ok(Json(json!({
            "status": "duplicate",
            "counters": report.counters,
        })));
    }

    let result = report.results.first().cloned().ok_or_else(|| {
        AppError::InternalError("Batch produced no result for the candidate".to_string())
    })?;

    Ok(Json(json!({
        "status": if result.accepted { "accepted" } else { "rejected" },
        "result": result,
        "counters": report.counters,
    })))
}

/// POST /api/v1/companies/batch
///
/// Sequentially verify an ordered candidate list and report the batch
/// counters alongside the per-candidate results.
pub async fn verify_batch(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchReport>, AppError> {
    tracing::info!("POST /companies/batch - {} candidate(s)", request.companies.len());

    if request.companies.is_empty() {
        return Err(AppError::BadRequest("companies must not be empty".to_string()));
    }
    if request.companies.len() > MAX_BATCH_SIZE {
        return Err(AppError::BadRequest(format!(
            "companies is limited to {} entries per batch",
            MAX_BATCH_SIZE
        )));
    }
    for company in &request.companies {
        validate_request(company)?;
    }

    let candidates: Vec<CompanyIdentity> = request
        .companies
        .into_iter()
        .map(CompanyIdentity::from)
        .collect();

    let report = state.orchestrator.process(candidates).await;
    Ok(Json(report))
}

/// GET /api/v1/leads/offset
///
/// Count of persisted leads, i.e. the offset an external candidate feed
/// should resume from.
pub async fn lead_offset(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let offset = state.sink.next_unprocessed_offset().await?;
    Ok(Json(json!({ "offset": offset })))
}

/// POST /api/v1/dedupe/refresh
///
/// Drop the duplicate index's refresh stamp so the next check rebuilds
/// from the sink.
pub async fn refresh_dedupe(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.gate.invalidate().await;
    let indexed = state.gate.known_count().await;
    Ok(Json(json!({
        "status": "invalidated",
        "indexed_before_refresh": indexed,
    })))
}

fn validate_request(request: &VerifyRequest) -> Result<(), AppError> {
    if request.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".to_string()));
    }
    if request.location.trim().is_empty() {
        return Err(AppError::BadRequest("location must not be empty".to_string()));
    }
    Ok(())
}
