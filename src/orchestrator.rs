//! Sequential batch processing over the duplicate gate, pipeline, and sink.
//!
//! Candidates run one at a time on purpose: the upstream search resources
//! are treated as exclusively owned for the duration of one candidate's
//! run, so there is no fan-out here, only a fixed inter-candidate delay to
//! respect upstream rate limits. The counters are the externally
//! observable contract of a batch run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::Config;
use crate::dedupe::{find_internal_duplicates, DuplicateGate};
use crate::fingerprint::fingerprint;
use crate::gatherers::LeadSink;
use crate::models::{
    BatchCounters, BatchReport, CompanyIdentity, EvidenceBundle, LeadRecord, RejectionReason,
    VerificationResult,
};
use crate::pipeline::VerificationPipeline;
use crate::scoring;

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Save gate: only results at or above this confidence are persisted.
    pub save_threshold: u8,
    /// Hard wall-clock ceiling per candidate.
    pub candidate_timeout: Duration,
    /// Fixed delay between candidates.
    pub batch_delay: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            save_threshold: config.save_threshold,
            candidate_timeout: Duration::from_secs(config.candidate_timeout_secs),
            batch_delay: Duration::from_millis(config.batch_delay_ms),
        }
    }
}

pub struct BatchOrchestrator {
    gate: Arc<DuplicateGate>,
    pipeline: Arc<VerificationPipeline>,
    sink: Arc<dyn LeadSink>,
    settings: OrchestratorSettings,
}

impl BatchOrchestrator {
    pub fn new(
        gate: Arc<DuplicateGate>,
        pipeline: Arc<VerificationPipeline>,
        sink: Arc<dyn LeadSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            gate,
            pipeline,
            sink,
            settings,
        }
    }

    /// Process an ordered candidate list: duplicate gate first, pipeline
    /// per survivor, save gate on acceptance. No per-candidate failure is
    /// fatal to the batch.
    pub async fn process(&self, candidates: Vec<CompanyIdentity>) -> BatchReport {
        let mut counters = BatchCounters::default();
        let mut results = Vec::new();

        let internal = find_internal_duplicates(&candidates);
        if !internal.is_empty() {
            tracing::info!(
                "Batch carries {} internal duplicate(s): {:?}",
                internal.len(),
                internal
            );
        }

        let filtered = self.gate.filter_new(&candidates).await;
        if let Some(e) = &filtered.refresh_error {
            // Fail-open: unknown candidates run anyway, but the refresh
            // failure is counted and logged, never swallowed.
            counters.errors += 1;
            tracing::warn!("⚠️  Duplicate index refresh failed, processing all candidates: {}", e);
        }
        counters.duplicates_skipped = (candidates.len() - filtered.fresh.len()) as u32;

        let total = filtered.fresh.len();
        tracing::info!(
            "Batch start: {} candidate(s), {} skipped as duplicates",
            total,
            counters.duplicates_skipped
        );

        for (index, identity) in filtered.fresh.iter().enumerate() {
            counters.processed += 1;

            let result = match timeout(
                self.settings.candidate_timeout,
                self.pipeline.verify(identity),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    tracing::error!(
                        "⏱️  Candidate exceeded wall-clock ceiling: {}",
                        identity.name
                    );
                    timed_out_result(identity)
                }
            };

            if result.accepted {
                counters.verified += 1;

                if result.confidence >= self.settings.save_threshold {
                    // Admission happens before the sink write returns, so a
                    // concurrent check inside this process already sees the
                    // key while the append is in flight.
                    self.gate.admit(identity).await;

                    let record = build_lead(identity, &result);
                    match self.sink.append_lead(&record).await {
                        Ok(()) => counters.saved += 1,
                        Err(e) => {
                            // Fail-loud: an accepted lead that could not be
                            // persisted is an error, not a silent drop.
                            counters.errors += 1;
                            tracing::error!(
                                "✗ Lead persistence failed for {}: {}",
                                identity.name,
                                e
                            );
                        }
                    }
                } else {
                    tracing::info!(
                        "Verified below save gate ({} < {}), not persisted: {}",
                        result.confidence,
                        self.settings.save_threshold,
                        identity.name
                    );
                }
            }

            results.push(result);

            if index + 1 < total && !self.settings.batch_delay.is_zero() {
                tokio::time::sleep(self.settings.batch_delay).await;
            }
        }

        tracing::info!(
            "Batch done: processed={} verified={} saved={} duplicates={} errors={}",
            counters.processed,
            counters.verified,
            counters.saved,
            counters.duplicates_skipped,
            counters.errors
        );

        BatchReport { counters, results }
    }
}

/// Terminal result for a candidate cut off by the wall-clock ceiling. The
/// duplicate gate is untouched: nothing was admitted, nothing persisted.
fn timed_out_result(identity: &CompanyIdentity) -> VerificationResult {
    VerificationResult {
        identity: identity.clone(),
        evidence: EvidenceBundle::default(),
        confidence: 0,
        accepted: false,
        rejection_reason: Some(RejectionReason::FatalError),
        source_urls: Vec::new(),
    }
}

/// Materialize an accepted result as a lead row.
fn build_lead(identity: &CompanyIdentity, result: &VerificationResult) -> LeadRecord {
    LeadRecord {
        id: Uuid::new_v4(),
        company_name: identity.name.clone(),
        location: identity.location.clone(),
        fingerprint: fingerprint(identity),
        phone: result.evidence.phone_candidate.clone(),
        email: result.evidence.email_candidate.clone(),
        website: result.evidence.website_candidate.clone(),
        address: result.evidence.address_candidate.clone(),
        confidence: result.confidence as i32,
        phone_confidence: scoring::phone_confidence(&result.evidence) as i32,
        source_urls: result.source_urls.clone(),
        created_at: Utc::now(),
    }
}
