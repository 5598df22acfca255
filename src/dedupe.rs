//! Process-wide duplicate gate over normalized company fingerprints.
//!
//! One owned component, explicit refresh and invalidation, documented
//! staleness window, never an implicit global. The index has two layers:
//!
//! - `known`: fingerprints of every lead currently in the sink, rebuilt with
//!   replace-all semantics when the index is older than the TTL.
//! - `admitted`: fingerprints admitted by this process (acceptances and
//!   provisional batch inserts). Survives refreshes, so an admitted key
//!   answers "duplicate" even if a refresh races ahead of the sink write.
//!
//! A failed refresh leaves the previous index and timestamp untouched and is
//! reported alongside the answer; the caller's policy is fail-open (treat
//! unknown as not-duplicate) rather than silently dropping a candidate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::fingerprint::fingerprint;
use crate::gatherers::LeadSink;
use crate::models::CompanyIdentity;

/// Default staleness window before the index is rebuilt from the sink.
pub const DEFAULT_INDEX_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Default)]
struct IndexState {
    /// Sink-derived fingerprints; replaced wholesale on refresh.
    known: HashSet<String>,
    /// Locally admitted fingerprints; refresh never clears these.
    admitted: HashSet<String>,
    /// Time of the last successful refresh. `None` until the first one.
    refreshed_at: Option<Instant>,
}

/// Answer of a single duplicate check.
#[derive(Debug)]
pub struct DuplicateCheck {
    pub duplicate: bool,
    /// Set when the backing refresh failed and the answer came from the
    /// (possibly stale) previous index. Surfaced, never swallowed.
    pub refresh_error: Option<AppError>,
}

/// Outcome of batch filtering: first occurrences in input order.
#[derive(Debug)]
pub struct FilteredBatch {
    pub fresh: Vec<CompanyIdentity>,
    pub refresh_error: Option<AppError>,
}

/// One repeated key within a batch, for audit output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InternalDuplicate {
    /// Position of the repeat in the input list.
    pub index: usize,
    /// Position of the first occurrence of the same fingerprint.
    pub first_index: usize,
    pub fingerprint: String,
}

pub struct DuplicateGate {
    sink: Arc<dyn LeadSink>,
    ttl: Duration,
    state: RwLock<IndexState>,
}

impl DuplicateGate {
    pub fn new(sink: Arc<dyn LeadSink>, ttl: Duration) -> Self {
        Self {
            sink,
            ttl,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Has this identity been processed before?
    ///
    /// Answers from memory when the index is fresh; otherwise refreshes from
    /// the sink first. A refresh failure is returned next to the answer and
    /// the answer falls back to the previous index (fail-open).
    pub async fn is_duplicate(&self, identity: &CompanyIdentity) -> DuplicateCheck {
        let key = fingerprint(identity);

        let refresh_error = self.ensure_fresh().await;

        let state = self.state.read().await;
        DuplicateCheck {
            duplicate: state.admitted.contains(&key) || state.known.contains(&key),
            refresh_error,
        }
    }

    /// Mark an identity as now-known. Idempotent; takes effect before the
    /// caller's sink write returns, closing the re-admission window inside
    /// this process.
    pub async fn admit(&self, identity: &CompanyIdentity) {
        let key = fingerprint(identity);
        let mut state = self.state.write().await;
        state.admitted.insert(key);
    }

    /// Keep only identities not yet known, guarding against repeats within
    /// the batch itself: the first occurrence of a key passes (input order),
    /// later occurrences drop. Every passed identity is provisionally
    /// admitted so a concurrent or subsequent call cannot re-admit it before
    /// external confirmation.
    pub async fn filter_new(&self, identities: &[CompanyIdentity]) -> FilteredBatch {
        let refresh_error = self.ensure_fresh().await;

        let mut state = self.state.write().await;
        let mut fresh = Vec::new();
        for identity in identities {
            let key = fingerprint(identity);
            if state.admitted.contains(&key) || state.known.contains(&key) {
                continue;
            }
            state.admitted.insert(key);
            fresh.push(identity.clone());
        }

        FilteredBatch {
            fresh,
            refresh_error,
        }
    }

    /// Drop the refresh stamp so the next check rebuilds from the sink.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.refreshed_at = None;
    }

    /// Number of fingerprints currently indexed (diagnostics).
    pub async fn known_count(&self) -> usize {
        let state = self.state.read().await;
        state.known.union(&state.admitted).count()
    }

    /// Refresh the sink-derived index if it is missing or expired.
    ///
    /// Replace-all: clear, pull the full lead set, key by fingerprint,
    /// stamp. Runs under the write lock, so no reader observes a partially
    /// rebuilt index. On failure the previous index and stamp stay as they
    /// were and the error is handed back.
    async fn ensure_fresh(&self) -> Option<AppError> {
        {
            let state = self.state.read().await;
            if is_fresh(&state, self.ttl) {
                return None;
            }
        }

        let mut state = self.state.write().await;
        // Re-check: another task may have refreshed while we waited.
        if is_fresh(&state, self.ttl) {
            return None;
        }

        match self.sink.list_all_leads().await {
            Ok(leads) => {
                state.known.clear();
                for lead in &leads {
                    state.known.insert(fingerprint(&CompanyIdentity::new(
                        lead.company_name.clone(),
                        lead.location.clone(),
                    )));
                }
                state.refreshed_at = Some(Instant::now());
                tracing::debug!("Duplicate index refreshed: {} known leads", leads.len());
                None
            }
            Err(e) => {
                tracing::warn!("⚠️  Duplicate index refresh failed, keeping stale index: {}", e);
                Some(e)
            }
        }
    }
}

fn is_fresh(state: &IndexState, ttl: Duration) -> bool {
    state
        .refreshed_at
        .map(|at| at.elapsed() < ttl)
        .unwrap_or(false)
}

/// Diagnostic pass over a batch: every repeated fingerprint with the index
/// of its first occurrence. Used for audit output, not filtering.
pub fn find_internal_duplicates(identities: &[CompanyIdentity]) -> Vec<InternalDuplicate> {
    let mut first_seen: HashMap<String, usize> = HashMap::new();
    let mut duplicates = Vec::new();

    for (index, identity) in identities.iter().enumerate() {
        let key = fingerprint(identity);
        match first_seen.get(&key) {
            Some(&first_index) => duplicates.push(InternalDuplicate {
                index,
                first_index,
                fingerprint: key,
            }),
            None => {
                first_seen.insert(key, index);
            }
        }
    }

    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatherers::LeadSink;
    use crate::models::LeadRecord;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use uuid::Uuid;

    struct StubSink {
        leads: std::sync::Mutex<Vec<LeadRecord>>,
        fail_listing: AtomicBool,
        list_calls: AtomicUsize,
    }

    impl StubSink {
        fn empty() -> Self {
            Self {
                leads: std::sync::Mutex::new(Vec::new()),
                fail_listing: AtomicBool::new(false),
                list_calls: AtomicUsize::new(0),
            }
        }

        fn with_lead(name: &str, location: &str) -> Self {
            let sink = Self::empty();
            sink.leads.lock().unwrap().push(lead(name, location));
            sink
        }
    }

    fn lead(name: &str, location: &str) -> LeadRecord {
        LeadRecord {
            id: Uuid::new_v4(),
            company_name: name.to_string(),
            location: location.to_string(),
            fingerprint: fingerprint(&CompanyIdentity::new(name, location)),
            phone: None,
            email: None,
            website: None,
            address: None,
            confidence: 80,
            phone_confidence: 0,
            source_urls: vec![],
            created_at: Utc::now(),
        }
    }

    #[async_trait]
    impl LeadSink for StubSink {
        async fn append_lead(&self, record: &LeadRecord) -> Result<(), AppError> {
            self.leads.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn list_all_leads(&self) -> Result<Vec<LeadRecord>, AppError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(AppError::SinkUnavailable("listing failed".to_string()));
            }
            Ok(self.leads.lock().unwrap().clone())
        }

        async fn next_unprocessed_offset(&self) -> Result<i64, AppError> {
            Ok(self.leads.lock().unwrap().len() as i64)
        }
    }

    fn gate_with(sink: StubSink, ttl: Duration) -> (DuplicateGate, Arc<StubSink>) {
        let sink = Arc::new(sink);
        (DuplicateGate::new(sink.clone(), ttl), sink)
    }

    #[tokio::test]
    async fn admit_makes_identity_duplicate() {
        let (gate, _) = gate_with(StubSink::empty(), DEFAULT_INDEX_TTL);
        let identity = CompanyIdentity::new("株式会社山田製作所", "東京都");

        assert!(!gate.is_duplicate(&identity).await.duplicate);
        gate.admit(&identity).await;
        assert!(gate.is_duplicate(&identity).await.duplicate);
    }

    #[tokio::test]
    async fn admitted_key_survives_every_refresh() {
        // TTL of zero forces a replace-all refresh on every check; the
        // sink never heard of the identity, but the local admission must
        // still answer "duplicate".
        let (gate, _) = gate_with(StubSink::empty(), Duration::from_secs(0));
        let identity = CompanyIdentity::new("Acme Inc.", "Osaka");

        gate.admit(&identity).await;
        assert!(gate.is_duplicate(&identity).await.duplicate);
        assert!(gate.is_duplicate(&identity).await.duplicate);
    }

    #[tokio::test]
    async fn normalized_spelling_variants_hit_the_same_key() {
        let (gate, _) = gate_with(StubSink::empty(), DEFAULT_INDEX_TTL);

        gate.admit(&CompanyIdentity::new("株式会社山田製作所", "東京都")).await;
        let variant = CompanyIdentity::new("山田製作所", "東京");
        assert!(gate.is_duplicate(&variant).await.duplicate);
    }

    #[tokio::test]
    async fn refresh_pulls_known_leads_from_sink() {
        let (gate, _) = gate_with(
            StubSink::with_lead("Acme Inc.", "Osaka City"),
            DEFAULT_INDEX_TTL,
        );

        let check = gate.is_duplicate(&CompanyIdentity::new("acme", "osaka")).await;
        assert!(check.duplicate);
        assert!(check.refresh_error.is_none());
    }

    #[tokio::test]
    async fn fresh_index_answers_from_memory() {
        let (gate, sink) = gate_with(StubSink::empty(), DEFAULT_INDEX_TTL);
        let identity = CompanyIdentity::new("Acme", "Osaka");

        gate.is_duplicate(&identity).await;
        gate.is_duplicate(&identity).await;
        gate.is_duplicate(&identity).await;

        assert_eq!(sink.list_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refresh_failure_fails_open_and_surfaces_error() {
        let sink = StubSink::empty();
        sink.fail_listing.store(true, Ordering::SeqCst);
        let (gate, _) = gate_with(sink, DEFAULT_INDEX_TTL);

        let check = gate.is_duplicate(&CompanyIdentity::new("Acme", "Osaka")).await;
        assert!(!check.duplicate);
        assert!(check.refresh_error.is_some());
    }

    #[tokio::test]
    async fn refresh_failure_keeps_previous_index() {
        let (gate, sink) = gate_with(
            StubSink::with_lead("Acme Inc.", "Osaka"),
            Duration::from_secs(0),
        );
        let identity = CompanyIdentity::new("Acme", "Osaka");

        // First check populates from the sink.
        assert!(gate.is_duplicate(&identity).await.duplicate);

        // Sink goes down; the stale index still answers.
        sink.fail_listing.store(true, Ordering::SeqCst);
        let check = gate.is_duplicate(&identity).await;
        assert!(check.duplicate);
        assert!(check.refresh_error.is_some());
    }

    #[tokio::test]
    async fn invalidate_forces_a_refresh() {
        let (gate, sink) = gate_with(StubSink::empty(), DEFAULT_INDEX_TTL);
        let identity = CompanyIdentity::new("Acme", "Osaka");

        gate.is_duplicate(&identity).await;
        assert_eq!(sink.list_calls.load(Ordering::SeqCst), 1);

        // Lead appears in the sink out of band; a plain check is served
        // from memory, an invalidated one sees it.
        sink.append_lead(&lead("Acme", "Osaka")).await.unwrap();
        assert!(!gate.is_duplicate(&identity).await.duplicate);

        gate.invalidate().await;
        assert!(gate.is_duplicate(&identity).await.duplicate);
    }

    #[tokio::test]
    async fn filter_new_drops_intra_batch_repeats_in_order() {
        let (gate, _) = gate_with(StubSink::empty(), DEFAULT_INDEX_TTL);

        let a1 = CompanyIdentity::new("株式会社山田製作所", "東京都");
        let a2 = CompanyIdentity::new("山田製作所", "東京");
        let b = CompanyIdentity::new("Globex", "Nagoya");

        let batch = gate.filter_new(&[a1.clone(), a2, b.clone()]).await;
        assert_eq!(batch.fresh, vec![a1, b]);
    }

    #[tokio::test]
    async fn filter_new_provisionally_admits_survivors() {
        let (gate, _) = gate_with(StubSink::empty(), DEFAULT_INDEX_TTL);
        let identity = CompanyIdentity::new("Acme", "Osaka");

        gate.filter_new(&[identity.clone()]).await;

        // A second batch with the same identity finds nothing new.
        let second = gate.filter_new(&[identity.clone()]).await;
        assert!(second.fresh.is_empty());
        assert!(gate.is_duplicate(&identity).await.duplicate);
    }

    #[tokio::test]
    async fn filter_new_drops_sink_known_leads() {
        let (gate, _) = gate_with(
            StubSink::with_lead("Acme Inc.", "Osaka"),
            DEFAULT_INDEX_TTL,
        );

        let batch = gate
            .filter_new(&[
                CompanyIdentity::new("acme", "osaka"),
                CompanyIdentity::new("Globex", "Nagoya"),
            ])
            .await;
        assert_eq!(batch.fresh.len(), 1);
        assert_eq!(batch.fresh[0].name, "Globex");
    }

    #[test]
    fn internal_duplicates_report_first_occurrence() {
        let batch = [
            CompanyIdentity::new("株式会社山田製作所", "東京都"),
            CompanyIdentity::new("Globex", "Nagoya"),
            CompanyIdentity::new("山田製作所", "東京"),
            CompanyIdentity::new("globex", "nagoya"),
        ];

        let duplicates = find_internal_duplicates(&batch);
        assert_eq!(duplicates.len(), 2);
        assert_eq!(duplicates[0].index, 2);
        assert_eq!(duplicates[0].first_index, 0);
        assert_eq!(duplicates[1].index, 3);
        assert_eq!(duplicates[1].first_index, 1);
    }

    #[test]
    fn internal_duplicates_empty_for_distinct_batch() {
        let batch = [
            CompanyIdentity::new("Acme", "Osaka"),
            CompanyIdentity::new("Globex", "Nagoya"),
        ];
        assert!(find_internal_duplicates(&batch).is_empty());
    }
}
