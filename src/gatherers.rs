// Trait abstractions for the verification pipeline's collaborators.
//
// SearchGatherer/PageExtractor: evidence gathering behind uniform traits.
// MatchJudge: bounded yes/no oracles the pipeline consults at decision
//   points; any implementation works as long as it is deterministic enough
//   to stub.
// LeadSink: append-only lead store, also the source of truth the duplicate
//   index is rebuilt from.
//
// These enable deterministic testing with scripted in-memory stubs:
// no network, no database. `cargo test` in seconds.

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{ExtractedContact, LeadRecord, SearchHit};

/// Options forwarded to a search gatherer call.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum number of organic results requested.
    pub count: u8,
    /// Country/language hint, e.g. "jp".
    pub locale: String,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            count: 5,
            locale: "jp".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// SearchGatherer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SearchGatherer: Send + Sync {
    /// Run a web search query.
    ///
    /// An empty result list means "no evidence", not an error; `Err` is
    /// reserved for transport-level failures, which callers recover from
    /// locally by treating the step as evidence-free.
    async fn search(&self, query: &str, options: &SearchOptions)
        -> Result<Vec<SearchHit>, AppError>;
}

// ---------------------------------------------------------------------------
// PageExtractor
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Fetch a page and pull out structured contact fields for the named
    /// company. The pipeline only interprets the returned fields and
    /// confidence; extraction mechanics live entirely behind this trait.
    async fn fetch_and_extract(
        &self,
        url: &str,
        expected_name: &str,
    ) -> Result<ExtractedContact, AppError>;
}

// ---------------------------------------------------------------------------
// MatchJudge
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MatchJudge: Send + Sync {
    /// Does this text actually refer to the named company?
    async fn is_match(&self, text: &str, expected_name: &str) -> Result<bool, AppError>;

    /// Does this search result (title + URL) look like the company's own
    /// site, as opposed to a portal or directory page about it?
    async fn is_official_site(
        &self,
        link_text: &str,
        expected_name: &str,
    ) -> Result<bool, AppError>;
}

// ---------------------------------------------------------------------------
// LeadSink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LeadSink: Send + Sync {
    /// Append one accepted lead. Never updates in place.
    async fn append_lead(&self, record: &LeadRecord) -> Result<(), AppError>;

    /// Full current lead set; the duplicate gate keys this by fingerprint
    /// on every refresh.
    async fn list_all_leads(&self) -> Result<Vec<LeadRecord>, AppError>;

    /// Count of persisted records, i.e. the offset the next batch of
    /// candidates should start from.
    async fn next_unprocessed_offset(&self) -> Result<i64, AppError>;
}
