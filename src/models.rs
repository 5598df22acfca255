use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============ Candidate Identity ============

/// A candidate company to verify, exactly as supplied by the caller.
///
/// The raw name/location pair is kept verbatim on results and persisted
/// leads; duplicate detection works on the normalized fingerprint instead
/// (see `fingerprint::fingerprint`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyIdentity {
    /// Company name as written in the source data (may carry a corporate
    /// form like 株式会社 or "Co., Ltd.").
    pub name: String,
    /// Free-form location, typically a prefecture/city string.
    pub location: String,
}

impl CompanyIdentity {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }
}

// ============ Gatherer Results ============

/// One organic web search result returned by a search gatherer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl SearchHit {
    /// Title and snippet joined, the text block that mention counting and
    /// relevance judgments run against.
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.snippet)
    }

    /// Host of the result URL, lowercased, without a leading "www.".
    /// Returns `None` for unparseable URLs.
    pub fn domain(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?.to_lowercase();
        Some(host.strip_prefix("www.").unwrap_or(&host).to_string())
    }
}

/// Structured contact fields pulled out of a single fetched page.
///
/// Produced by the page-extraction collaborator; the pipeline only
/// interprets the fields, it never parses pages itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    /// Extractor's own confidence in the fields above, 0-100.
    pub confidence: u8,
}

impl ExtractedContact {
    /// True when the extraction yielded at least one reachable contact
    /// channel (phone or email). Website/address alone do not count.
    pub fn has_contact(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.is_empty())
            || self.email.as_deref().is_some_and(|e| !e.is_empty())
    }
}

// ============ Evidence ============

/// Raw signals accumulated for one candidate during one pipeline run.
///
/// Owned exclusively by that run; never shared across candidates. The
/// pipeline writes it, the scorer reads it, nothing else touches it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub phone_candidate: Option<String>,
    pub email_candidate: Option<String>,
    pub website_candidate: Option<String>,
    pub address_candidate: Option<String>,
    /// Distinct URLs that contributed evidence, in first-seen order.
    pub source_urls: Vec<String>,
    /// An active hiring signal was confirmed for the company.
    pub job_posting_confirmed: bool,
    /// Contact was extracted from a page judged to be the company's own.
    pub official_site_confirmed: bool,
    /// Extracted phone parses as a valid number for the configured region.
    pub phone_format_valid: bool,
    /// Reverse phone search co-mentioned the company name.
    pub phone_company_associated: bool,
    /// A recognized business-listing site carried the company.
    pub business_listing_found: bool,
}

impl EvidenceBundle {
    /// Record a contributing source URL, keeping first-seen order and
    /// dropping exact repeats.
    pub fn record_source(&mut self, url: &str) {
        if url.is_empty() {
            return;
        }
        if !self.source_urls.iter().any(|u| u == url) {
            self.source_urls.push(url.to_string());
        }
    }

    /// Number of distinct hosts among the source URLs. Two pages on the
    /// same host corroborate once, not twice.
    pub fn distinct_source_domains(&self) -> usize {
        let mut domains: Vec<String> = Vec::new();
        for raw in &self.source_urls {
            let hit = SearchHit {
                title: String::new(),
                url: raw.clone(),
                snippet: String::new(),
            };
            if let Some(domain) = hit.domain() {
                if !domains.contains(&domain) {
                    domains.push(domain);
                }
            }
        }
        domains.len()
    }

    /// True when at least one contact channel (phone or email) was found.
    pub fn has_contact(&self) -> bool {
        self.phone_candidate.as_deref().is_some_and(|p| !p.is_empty())
            || self.email_candidate.as_deref().is_some_and(|e| !e.is_empty())
    }
}

// ============ Verification Outcome ============

/// Why a candidate was rejected, recorded on the terminal result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// No active hiring signal; candidate filtered before contact search.
    NoHiringSignal,
    /// Every extraction source was exhausted without a usable contact.
    ContactExtractionFailed,
    /// Contacts were extracted but the phone cross-check never passed.
    PhoneCheckFailed,
    /// Evidence was collected but scored below the acceptance threshold.
    ConfidenceBelowThreshold,
    /// The run was cut off by a fatal error or wall-clock ceiling.
    FatalError,
}

/// Upper bound on source URLs carried by a finalized result.
pub const MAX_RESULT_SOURCE_URLS: usize = 5;

/// Terminal, immutable outcome of one pipeline run for one candidate.
///
/// Always produced, whatever happens inside the pipeline: success, phase
/// exhaustion, and caught gatherer faults all finalize into one of these.
/// Written once to the sink if `accepted` and the orchestrator's save gate
/// passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub identity: CompanyIdentity,
    pub evidence: EvidenceBundle,
    /// Company-level confidence, 0-100 (see `scoring::company_confidence`).
    pub confidence: u8,
    pub accepted: bool,
    pub rejection_reason: Option<RejectionReason>,
    /// Deduped evidence URLs, bounded to `MAX_RESULT_SOURCE_URLS`.
    pub source_urls: Vec<String>,
}

// ============ Persisted Leads ============

/// One row in the append-only `leads` table.
///
/// Also the unit the duplicate index is rebuilt from: a refresh keys the
/// full lead set by fingerprint.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: Uuid,
    pub company_name: String,
    pub location: String,
    /// Normalized identity key, see `fingerprint::fingerprint`.
    pub fingerprint: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    /// Company-level confidence at acceptance time.
    pub confidence: i32,
    /// Phone-evidence sub-score (5-factor table), 0 when no phone.
    pub phone_confidence: i32,
    pub source_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

// ============ Batch Processing ============

/// Running counters for one batch run. These are the externally observable
/// contract of the orchestrator and are asserted by tests as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    /// Candidates taken off the input list (after duplicate filtering).
    pub processed: u32,
    /// Candidates the pipeline accepted.
    pub verified: u32,
    /// Accepted candidates that passed the save gate and were persisted.
    pub saved: u32,
    /// Candidates dropped by the duplicate gate before the pipeline ran.
    pub duplicates_skipped: u32,
    /// Persistence failures and other per-candidate errors.
    pub errors: u32,
}

/// Outcome of one batch run: counters plus the per-candidate results in
/// input order (duplicate-skipped candidates carry no result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub counters: BatchCounters,
    pub results: Vec<VerificationResult>,
}

// ============ API Payloads ============

/// Body of `POST /api/v1/companies/verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    pub name: String,
    pub location: String,
}

/// Body of `POST /api/v1/companies/batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub companies: Vec<VerifyRequest>,
}

impl From<VerifyRequest> for CompanyIdentity {
    fn from(req: VerifyRequest) -> Self {
        CompanyIdentity::new(req.name, req.location)
    }
}
