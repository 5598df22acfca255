//! Postgres-backed lead sink.
//!
//! Append-only: accepted leads are inserted once and never updated. The
//! full table doubles as the external truth the duplicate index is rebuilt
//! from, so `list_all_leads` returns every row, oldest first. All calls go
//! through the sink circuit breaker; with the database down they fail fast
//! instead of queueing behind pipeline runs.

use crate::circuit_breaker::{create_sink_circuit_breaker, SinkCircuitBreaker};
use crate::errors::AppError;
use crate::gatherers::LeadSink;
use crate::models::LeadRecord;
use async_trait::async_trait;
use failsafe::futures::CircuitBreaker;
use sqlx::PgPool;

pub struct PgLeadStore {
    pool: PgPool,
    breaker: SinkCircuitBreaker,
}

impl PgLeadStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            breaker: create_sink_circuit_breaker(),
        }
    }

    /// Create the leads table and its fingerprint index if missing.
    /// Runs once at startup, before any traffic.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS leads (
                id UUID PRIMARY KEY,
                company_name TEXT NOT NULL,
                location TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                phone TEXT,
                email TEXT,
                website TEXT,
                address TEXT,
                confidence INT NOT NULL,
                phone_confidence INT NOT NULL,
                source_urls TEXT[] NOT NULL DEFAULT '{}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS leads_fingerprint_idx ON leads (fingerprint)")
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(())
    }
}

fn map_breaker_error(err: failsafe::Error<sqlx::Error>) -> AppError {
    match err {
        failsafe::Error::Inner(e) => AppError::DatabaseError(e),
        failsafe::Error::Rejected => {
            AppError::SinkUnavailable("sink circuit open, failing fast".to_string())
        }
    }
}

#[async_trait]
impl LeadSink for PgLeadStore {
    async fn append_lead(&self, record: &LeadRecord) -> Result<(), AppError> {
        self.breaker
            .call(
                sqlx::query(
                    r#"
                    INSERT INTO leads (
                        id, company_name, location, fingerprint,
                        phone, email, website, address,
                        confidence, phone_confidence, source_urls, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    "#,
                )
                .bind(record.id)
                .bind(&record.company_name)
                .bind(&record.location)
                .bind(&record.fingerprint)
                .bind(&record.phone)
                .bind(&record.email)
                .bind(&record.website)
                .bind(&record.address)
                .bind(record.confidence)
                .bind(record.phone_confidence)
                .bind(&record.source_urls)
                .bind(record.created_at)
                .execute(&self.pool),
            )
            .await
            .map_err(map_breaker_error)?;

        tracing::info!(
            "✓ Lead saved: {} ({}) confidence={}",
            record.company_name,
            record.location,
            record.confidence
        );
        Ok(())
    }

    async fn list_all_leads(&self) -> Result<Vec<LeadRecord>, AppError> {
        let leads = self
            .breaker
            .call(
                sqlx::query_as::<_, LeadRecord>(
                    r#"
                    SELECT id, company_name, location, fingerprint,
                           phone, email, website, address,
                           confidence, phone_confidence, source_urls, created_at
                    FROM leads
                    ORDER BY created_at ASC
                    "#,
                )
                .fetch_all(&self.pool),
            )
            .await
            .map_err(map_breaker_error)?;

        Ok(leads)
    }

    async fn next_unprocessed_offset(&self) -> Result<i64, AppError> {
        let count = self
            .breaker
            .call(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM leads").fetch_one(&self.pool))
            .await
            .map_err(map_breaker_error)?;

        Ok(count)
    }
}
