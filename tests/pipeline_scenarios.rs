/// End-to-end pipeline and orchestrator scenarios over deterministic
/// in-memory stubs of the gatherer, extractor, judge, and sink traits.
/// No network, no database: the control flow of the state machine is the
/// thing under test.
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lead_scout_api::dedupe::DuplicateGate;
use lead_scout_api::errors::AppError;
use lead_scout_api::gatherers::{
    LeadSink, MatchJudge, PageExtractor, SearchGatherer, SearchOptions,
};
use lead_scout_api::models::{
    CompanyIdentity, ExtractedContact, LeadRecord, RejectionReason, SearchHit,
};
use lead_scout_api::orchestrator::{BatchOrchestrator, OrchestratorSettings};
use lead_scout_api::pipeline::{PipelineSettings, VerificationPipeline};

// ---------------------------------------------------------------------------
// Stubs
// ---------------------------------------------------------------------------

/// Scripted search gatherer: the first route whose needle appears in the
/// query answers; everything else returns no results.
#[derive(Default)]
struct StubSearch {
    routes: Vec<(String, Vec<SearchHit>)>,
    calls: Mutex<Vec<String>>,
}

impl StubSearch {
    fn route(mut self, needle: &str, hits: Vec<SearchHit>) -> Self {
        self.routes.push((needle.to_string(), hits));
        self
    }

    fn queries(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchGatherer for StubSearch {
    async fn search(
        &self,
        query: &str,
        _options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, AppError> {
        self.calls.lock().unwrap().push(query.to_string());
        for (needle, hits) in &self.routes {
            if query.contains(needle.as_str()) {
                return Ok(hits.clone());
            }
        }
        Ok(Vec::new())
    }
}

/// Scripted extractor keyed by URL substring.
#[derive(Default)]
struct StubExtractor {
    routes: Vec<(String, ExtractedContact)>,
    calls: Mutex<Vec<String>>,
}

impl StubExtractor {
    fn route(mut self, needle: &str, contact: ExtractedContact) -> Self {
        self.routes.push((needle.to_string(), contact));
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PageExtractor for StubExtractor {
    async fn fetch_and_extract(
        &self,
        url: &str,
        _expected_name: &str,
    ) -> Result<ExtractedContact, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        for (needle, contact) in &self.routes {
            if url.contains(needle.as_str()) {
                return Ok(contact.clone());
            }
        }
        Ok(ExtractedContact::default())
    }
}

/// Judge with fixed answers: `is_match` returns a constant, a link is
/// official when it contains one of the configured needles.
#[derive(Default)]
struct StubJudge {
    match_answer: bool,
    official_needles: Vec<String>,
    calls: Mutex<usize>,
}

impl StubJudge {
    fn official(mut self, needle: &str) -> Self {
        self.official_needles.push(needle.to_string());
        self
    }

    fn matching(mut self) -> Self {
        self.match_answer = true;
        self
    }

    fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl MatchJudge for StubJudge {
    async fn is_match(&self, _text: &str, _expected_name: &str) -> Result<bool, AppError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self.match_answer)
    }

    async fn is_official_site(
        &self,
        link_text: &str,
        _expected_name: &str,
    ) -> Result<bool, AppError> {
        *self.calls.lock().unwrap() += 1;
        Ok(self
            .official_needles
            .iter()
            .any(|needle| link_text.contains(needle.as_str())))
    }
}

/// In-memory sink with switchable failure modes.
#[derive(Default)]
struct StubSink {
    leads: Mutex<Vec<LeadRecord>>,
    fail_append: AtomicBool,
    fail_listing: AtomicBool,
}

impl StubSink {
    fn saved(&self) -> Vec<LeadRecord> {
        self.leads.lock().unwrap().clone()
    }
}

#[async_trait]
impl LeadSink for StubSink {
    async fn append_lead(&self, record: &LeadRecord) -> Result<(), AppError> {
        if self.fail_append.load(Ordering::SeqCst) {
            return Err(AppError::SinkUnavailable("append failed".to_string()));
        }
        self.leads.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn list_all_leads(&self) -> Result<Vec<LeadRecord>, AppError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(AppError::SinkUnavailable("listing failed".to_string()));
        }
        Ok(self.leads.lock().unwrap().clone())
    }

    async fn next_unprocessed_offset(&self) -> Result<i64, AppError> {
        Ok(self.leads.lock().unwrap().len() as i64)
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn hit(title: &str, url: &str, snippet: &str) -> SearchHit {
    SearchHit {
        title: title.to_string(),
        url: url.to_string(),
        snippet: snippet.to_string(),
    }
}

fn candidate() -> CompanyIdentity {
    CompanyIdentity::new("株式会社山田製作所", "東京都")
}

/// A job-board result mentioning the cleaned company name three times,
/// which is what the hiring-signal phase requires.
fn job_board_hits() -> Vec<SearchHit> {
    vec![hit(
        "山田製作所の求人 | Indeed",
        "https://jp.indeed.com/cmp/yamada-seisakusho",
        "山田製作所の採用情報。山田製作所は東京の金属加工メーカーです。",
    )]
}

fn settings(accept_threshold: u8) -> PipelineSettings {
    PipelineSettings {
        accept_threshold,
        settle_delay: Duration::ZERO,
        gatherer_timeout: Duration::from_secs(5),
        search_count: 5,
        search_locale: "jp".to_string(),
        phone_region: phonenumber::country::Id::JP,
    }
}

struct Harness {
    search: Arc<StubSearch>,
    extractor: Arc<StubExtractor>,
    judge: Arc<StubJudge>,
    pipeline: VerificationPipeline,
}

fn harness(search: StubSearch, extractor: StubExtractor, judge: StubJudge) -> Harness {
    let search = Arc::new(search);
    let extractor = Arc::new(extractor);
    let judge = Arc::new(judge);
    let pipeline = VerificationPipeline::new(
        search.clone(),
        extractor.clone(),
        judge.clone(),
        settings(60),
    );
    Harness {
        search,
        extractor,
        judge,
        pipeline,
    }
}

// ---------------------------------------------------------------------------
// Pipeline scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_hiring_signal_rejects_before_spending_gatherer_budget() {
    let h = harness(StubSearch::default(), StubExtractor::default(), StubJudge::default());

    let result = h.pipeline.verify(&candidate()).await;

    assert!(!result.accepted);
    assert_eq!(result.rejection_reason, Some(RejectionReason::NoHiringSignal));
    assert_eq!(result.confidence, 0);

    // All five job-signal templates ran, and nothing else did.
    assert_eq!(h.search.queries().len(), 5);
    assert_eq!(h.extractor.call_count(), 0);
    assert_eq!(h.judge.call_count(), 0);
}

#[tokio::test]
async fn email_only_contact_from_direct_search_auto_passes_phone_check() {
    // No official-page hits; direct template #2 (email-seeking) finds a
    // page with an email and no phone. Nothing to cross-verify, so the
    // phone check passes by absence.
    let search = StubSearch::default()
        .route("求人", job_board_hits())
        .route(
            "メールアドレス",
            vec![hit(
                "山田製作所 お問い合わせ",
                "https://yamada-seisakusho.co.jp/contact",
                "メールでのお問い合わせ",
            )],
        );
    let extractor = StubExtractor::default().route(
        "yamada-seisakusho.co.jp",
        ExtractedContact {
            email: Some("info@yamada-seisakusho.co.jp".to_string()),
            confidence: 85,
            ..Default::default()
        },
    );
    let judge = StubJudge::default().official("yamada-seisakusho.co.jp");

    let h = harness(search, extractor, judge);
    let result = h.pipeline.verify(&candidate()).await;

    assert!(result.accepted, "confidence {} should accept", result.confidence);
    assert_eq!(result.rejection_reason, None);
    assert_eq!(
        result.evidence.email_candidate.as_deref(),
        Some("info@yamada-seisakusho.co.jp")
    );
    assert_eq!(result.evidence.phone_candidate, None);
    assert!(!result.evidence.phone_company_associated);
    assert!(result.evidence.official_site_confirmed);
    assert!(result.evidence.job_posting_confirmed);
    // 40 existence + 20 official + 10 contact + 5 multi-source
    assert_eq!(result.confidence, 75);
    assert!(result.source_urls.len() <= 5);
}

#[tokio::test]
async fn hiring_signal_confirms_via_raw_mentions_and_judge() {
    // No recognized job board in the results; three raw mentions of the
    // cleaned name plus the relevance judge confirm the signal instead.
    let search = StubSearch::default()
        .route(
            "求人",
            vec![hit(
                "山田製作所 採用情報",
                "https://blog.example.com/yamada-hiring",
                "山田製作所が募集中。山田製作所の仕事紹介ページ。",
            )],
        )
        .route(
            "メールアドレス",
            vec![hit(
                "山田製作所 連絡先",
                "https://yamada-seisakusho.co.jp/contact",
                "お問い合わせ",
            )],
        );
    let extractor = StubExtractor::default().route(
        "yamada-seisakusho.co.jp",
        ExtractedContact {
            email: Some("info@yamada-seisakusho.co.jp".to_string()),
            confidence: 85,
            ..Default::default()
        },
    );
    let judge = StubJudge::default()
        .matching()
        .official("yamada-seisakusho.co.jp");

    let h = harness(search, extractor, judge);
    let result = h.pipeline.verify(&candidate()).await;

    assert!(result.accepted);
    assert!(result.evidence.job_posting_confirmed);
    assert!(h.judge.call_count() >= 1);
}

#[tokio::test]
async fn failed_phone_cross_check_falls_back_to_next_result_in_same_step() {
    // Direct template #1 (phone-seeking) returns two results. The first
    // result's phone cannot be tied to the company; the pipeline must move
    // to result #2 of the same template rather than rejecting outright.
    let search = StubSearch::default()
        .route("求人", job_board_hits())
        .route(
            "電話番号",
            vec![
                hit(
                    "電話帳エントリ",
                    "https://directory-a.example.com/listing/1",
                    "03-1111-2222",
                ),
                hit(
                    "山田製作所 会社情報",
                    "https://profile-b.example.org/yamada",
                    "連絡先情報",
                ),
            ],
        )
        // Reverse search on the first phone: results never name the company.
        .route(
            "0311112222",
            vec![hit("別会社のページ", "https://other.example.net/", "株式会社別会社")],
        )
        // Reverse search on the second phone co-mentions the company.
        .route(
            "0312345678",
            vec![hit(
                "山田製作所 - 企業情報",
                "https://registry.example.jp/yamada",
                "山田製作所 TEL 03-1234-5678",
            )],
        );
    let extractor = StubExtractor::default()
        .route(
            "directory-a.example.com",
            ExtractedContact {
                phone: Some("03-1111-2222".to_string()),
                confidence: 60,
                ..Default::default()
            },
        )
        .route(
            "profile-b.example.org",
            ExtractedContact {
                phone: Some("03-1234-5678".to_string()),
                email: Some("sales@yamada-seisakusho.co.jp".to_string()),
                confidence: 70,
                ..Default::default()
            },
        );

    let h = harness(search, extractor, StubJudge::default());
    let result = h.pipeline.verify(&candidate()).await;

    assert!(result.accepted);
    // The surviving contact is the second result's, normalized to E.164.
    assert_eq!(result.evidence.phone_candidate.as_deref(), Some("+81312345678"));
    assert!(result.evidence.phone_format_valid);
    assert!(result.evidence.phone_company_associated);
    assert_eq!(h.extractor.call_count(), 2);
}

#[tokio::test]
async fn official_page_contact_short_circuits_direct_search() {
    let search = StubSearch::default()
        .route("求人", job_board_hits())
        .route(
            "プライバシーポリシー",
            vec![hit(
                "プライバシーポリシー | 山田製作所",
                "https://yamada-seisakusho.co.jp/privacy",
                "株式会社山田製作所のプライバシーポリシー",
            )],
        )
        .route(
            "0312345678",
            vec![hit(
                "山田製作所",
                "https://registry.example.jp/yamada",
                "山田製作所 03-1234-5678",
            )],
        );
    let extractor = StubExtractor::default().route(
        "yamada-seisakusho.co.jp",
        ExtractedContact {
            phone: Some("03-1234-5678".to_string()),
            email: Some("info@yamada-seisakusho.co.jp".to_string()),
            website: Some("https://yamada-seisakusho.co.jp".to_string()),
            confidence: 90,
            ..Default::default()
        },
    );
    let judge = StubJudge::default().official("yamada-seisakusho.co.jp");

    let h = harness(search, extractor, judge);
    let result = h.pipeline.verify(&candidate()).await;

    assert!(result.accepted);
    assert!(result.evidence.official_site_confirmed);
    // 40 + 20 + 25 + 10 + 5: every company-table signal fired.
    assert_eq!(result.confidence, 100);
    // Phase 3 never ran: no direct-search template was queried.
    assert!(h.search.queries().iter().all(|q| !q.contains("電話番号")));
}

#[tokio::test]
async fn exhausted_templates_without_contact_reject_as_extraction_failed() {
    // Hiring signal confirms, but every contact-hunting query comes back
    // empty. Exactly five direct templates are attempted, then terminal.
    let search = StubSearch::default().route("求人", job_board_hits());

    let h = harness(search, StubExtractor::default(), StubJudge::default());
    let result = h.pipeline.verify(&candidate()).await;

    assert!(!result.accepted);
    assert_eq!(
        result.rejection_reason,
        Some(RejectionReason::ContactExtractionFailed)
    );
    assert!(result.evidence.job_posting_confirmed);

    // 1 job query (early exit) + 3 official + 5 direct templates.
    assert_eq!(h.search.queries().len(), 9);
}

#[tokio::test]
async fn phone_check_never_passing_rejects_with_phone_reason() {
    // The only extractable contact carries a phone the reverse search
    // cannot associate; with every source exhausted the rejection reason
    // must say so.
    let search = StubSearch::default()
        .route("求人", job_board_hits())
        .route(
            "電話番号",
            vec![hit(
                "電話帳エントリ",
                "https://directory-a.example.com/listing/1",
                "03-1111-2222",
            )],
        )
        .route(
            "0311112222",
            vec![hit("別会社", "https://other.example.net/", "株式会社別会社")],
        );
    let extractor = StubExtractor::default().route(
        "directory-a.example.com",
        ExtractedContact {
            phone: Some("03-1111-2222".to_string()),
            confidence: 60,
            ..Default::default()
        },
    );

    let h = harness(search, extractor, StubJudge::default());
    let result = h.pipeline.verify(&candidate()).await;

    assert!(!result.accepted);
    assert_eq!(result.rejection_reason, Some(RejectionReason::PhoneCheckFailed));
}

#[tokio::test]
async fn gatherer_fault_is_contained_as_empty_evidence() {
    /// Gatherer that always fails at the transport level.
    struct FailingSearch;

    #[async_trait]
    impl SearchGatherer for FailingSearch {
        async fn search(
            &self,
            _query: &str,
            _options: &SearchOptions,
        ) -> Result<Vec<SearchHit>, AppError> {
            Err(AppError::GathererUnavailable("boom".to_string()))
        }
    }

    let pipeline = VerificationPipeline::new(
        Arc::new(FailingSearch),
        Arc::new(StubExtractor::default()),
        Arc::new(StubJudge::default()),
        settings(60),
    );

    // The pipeline never raises; the faults collapse into a rejection.
    let result = pipeline.verify(&candidate()).await;
    assert!(!result.accepted);
    assert_eq!(result.rejection_reason, Some(RejectionReason::NoHiringSignal));
}

// ---------------------------------------------------------------------------
// Orchestrator scenarios
// ---------------------------------------------------------------------------

struct BatchHarness {
    sink: Arc<StubSink>,
    gate: Arc<DuplicateGate>,
    orchestrator: BatchOrchestrator,
}

fn batch_harness(
    search: StubSearch,
    extractor: StubExtractor,
    judge: StubJudge,
    save_threshold: u8,
) -> BatchHarness {
    let sink = Arc::new(StubSink::default());
    let gate = Arc::new(DuplicateGate::new(sink.clone(), Duration::from_secs(1800)));
    let pipeline = Arc::new(VerificationPipeline::new(
        Arc::new(search),
        Arc::new(extractor),
        Arc::new(judge),
        settings(60),
    ));
    let orchestrator = BatchOrchestrator::new(
        gate.clone(),
        pipeline,
        sink.clone(),
        OrchestratorSettings {
            save_threshold,
            candidate_timeout: Duration::from_secs(5),
            batch_delay: Duration::ZERO,
        },
    );
    BatchHarness {
        sink,
        gate,
        orchestrator,
    }
}

/// Routes that take the fixture candidate all the way to confidence 75
/// (hiring signal, official email page, no phone).
fn accepting_routes() -> (StubSearch, StubExtractor, StubJudge) {
    let search = StubSearch::default()
        .route("求人", job_board_hits())
        .route(
            "プライバシーポリシー",
            vec![hit(
                "プライバシーポリシー | 山田製作所",
                "https://yamada-seisakusho.co.jp/privacy",
                "株式会社山田製作所",
            )],
        );
    let extractor = StubExtractor::default().route(
        "yamada-seisakusho.co.jp",
        ExtractedContact {
            email: Some("info@yamada-seisakusho.co.jp".to_string()),
            confidence: 85,
            ..Default::default()
        },
    );
    let judge = StubJudge::default().official("yamada-seisakusho.co.jp");
    (search, extractor, judge)
}

#[tokio::test]
async fn batch_counters_track_duplicates_and_saves() {
    let (search, extractor, judge) = accepting_routes();
    let h = batch_harness(search, extractor, judge, 70);

    let a1 = candidate();
    // Same fingerprint as a1: corporate form and admin suffix stripped.
    let a2 = CompanyIdentity::new("山田製作所", "東京");
    let b = CompanyIdentity::new("Globex", "Nagoya");

    let report = h.orchestrator.process(vec![a1.clone(), a2, b]).await;

    assert_eq!(report.counters.duplicates_skipped, 1);
    assert_eq!(report.counters.processed, 2);
    assert_eq!(report.counters.verified, 1);
    assert_eq!(report.counters.saved, 1);
    assert_eq!(report.counters.errors, 0);

    // Results are in input order: the accepted A, then the rejected B.
    assert_eq!(report.results.len(), 2);
    assert!(report.results[0].accepted);
    assert!(!report.results[1].accepted);

    let saved = h.sink.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].company_name, "株式会社山田製作所");
    assert_eq!(saved[0].confidence, 75);
    assert_eq!(saved[0].email.as_deref(), Some("info@yamada-seisakusho.co.jp"));

    // The admitted key holds for any spelling variant.
    assert!(h.gate.is_duplicate(&a1).await.duplicate);
    assert!(
        h.gate
            .is_duplicate(&CompanyIdentity::new("山田 製作所", "東京"))
            .await
            .duplicate
    );
}

#[tokio::test]
async fn rerunning_a_batch_admits_each_lead_at_most_once() {
    let (search, extractor, judge) = accepting_routes();
    let h = batch_harness(search, extractor, judge, 70);

    let first = h.orchestrator.process(vec![candidate()]).await;
    assert_eq!(first.counters.saved, 1);

    // Second invocation inside the same process: the gate answers from
    // the admitted set, nothing is reprocessed or re-persisted.
    let second = h.orchestrator.process(vec![candidate()]).await;
    assert_eq!(second.counters.duplicates_skipped, 1);
    assert_eq!(second.counters.processed, 0);
    assert_eq!(second.counters.saved, 0);
    assert_eq!(h.sink.saved().len(), 1);
}

#[tokio::test]
async fn verified_below_save_gate_is_not_persisted() {
    let (search, extractor, judge) = accepting_routes();
    // Raise the save gate above the scenario's confidence of 75.
    let h = batch_harness(search, extractor, judge, 80);

    let report = h.orchestrator.process(vec![candidate()]).await;

    assert_eq!(report.counters.verified, 1);
    assert_eq!(report.counters.saved, 0);
    assert!(h.sink.saved().is_empty());
}

#[tokio::test]
async fn persistence_failure_is_loud_and_counted() {
    let (search, extractor, judge) = accepting_routes();
    let h = batch_harness(search, extractor, judge, 70);
    h.sink.fail_append.store(true, Ordering::SeqCst);

    let report = h.orchestrator.process(vec![candidate()]).await;

    assert_eq!(report.counters.verified, 1);
    assert_eq!(report.counters.saved, 0);
    assert_eq!(report.counters.errors, 1);
    // The identity was admitted before the failed write; within this
    // process it will not be re-admitted.
    assert!(h.gate.is_duplicate(&candidate()).await.duplicate);
}

#[tokio::test]
async fn sink_refresh_failure_fails_open_and_is_counted() {
    let (search, extractor, judge) = accepting_routes();
    let h = batch_harness(search, extractor, judge, 70);
    h.sink.fail_listing.store(true, Ordering::SeqCst);

    let report = h.orchestrator.process(vec![candidate()]).await;

    // The candidate still ran (fail-open) and the refresh error surfaced
    // in the error counter instead of being swallowed.
    assert_eq!(report.counters.processed, 1);
    assert_eq!(report.counters.duplicates_skipped, 0);
    assert!(report.counters.errors >= 1);
    assert_eq!(report.counters.verified, 1);
}

#[tokio::test]
async fn wall_clock_ceiling_surfaces_as_fatal_rejection() {
    /// Search stub slow enough to trip a tight candidate ceiling.
    struct SlowSearch;

    #[async_trait]
    impl SearchGatherer for SlowSearch {
        async fn search(
            &self,
            _query: &str,
            _options: &SearchOptions,
        ) -> Result<Vec<SearchHit>, AppError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Vec::new())
        }
    }

    let sink = Arc::new(StubSink::default());
    let gate = Arc::new(DuplicateGate::new(sink.clone(), Duration::from_secs(1800)));
    let pipeline = Arc::new(VerificationPipeline::new(
        Arc::new(SlowSearch),
        Arc::new(StubExtractor::default()),
        Arc::new(StubJudge::default()),
        settings(60),
    ));
    let orchestrator = BatchOrchestrator::new(
        gate.clone(),
        pipeline,
        sink.clone(),
        OrchestratorSettings {
            save_threshold: 70,
            candidate_timeout: Duration::from_millis(50),
            batch_delay: Duration::ZERO,
        },
    );

    let report = orchestrator.process(vec![candidate()]).await;

    assert_eq!(report.counters.processed, 1);
    assert_eq!(report.counters.verified, 0);
    assert_eq!(report.results.len(), 1);
    assert_eq!(
        report.results[0].rejection_reason,
        Some(RejectionReason::FatalError)
    );
    assert_eq!(report.counters.saved, 0);
    assert!(sink.saved().is_empty());
    // The gate is not left half-updated: the batch filter's provisional
    // admission stands and answers consistently.
    assert!(gate.is_duplicate(&candidate()).await.duplicate);
}
