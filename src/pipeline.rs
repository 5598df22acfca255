//! The phased verification state machine.
//!
//! One candidate at a time moves through a fixed order of phases, each with
//! an early-exit-on-success and a fallback-on-failure policy:
//!
//! 1. Hiring-signal check: cheap-first filter; failure is terminal.
//! 2. Official-page lookup: judge result links, extract from the ones that
//!    look like the company's own site.
//! 3. Direct-search fallback: five fixed query templates, up to three
//!    results each, only when phase 2 came up empty.
//! 4. Phone cross-check: reverse search on the bare number; failure sends
//!    control back to whichever phase produced the candidate.
//!
//! Every gatherer call is timeout-bounded and followed by a fixed settle
//! delay; any gatherer fault is caught here, logged, and treated as a
//! failed step. The pipeline always finalizes into a `VerificationResult`,
//! it never raises.

use std::sync::Arc;
use std::time::Duration;

use phonenumber::country::Id as CountryId;
use tokio::time::timeout;

use crate::config::Config;
use crate::contacts;
use crate::errors::AppError;
use crate::fingerprint::{clean_company_name, LEGAL_ENTITY_MARKERS, LEGAL_ENTITY_WORDS};
use crate::gatherers::{MatchJudge, PageExtractor, SearchGatherer, SearchOptions};
use crate::models::{
    CompanyIdentity, EvidenceBundle, ExtractedContact, RejectionReason, SearchHit,
    VerificationResult, MAX_RESULT_SOURCE_URLS,
};
use crate::scoring;

// ============ Query Templates ============

/// Hiring-signal queries, tried in order until one confirms the signal.
const JOB_SIGNAL_QUERIES: [&str; 5] = [
    "\"{name}\" {location} 求人",
    "\"{name}\" {location} 採用",
    "\"{name}\" {location} 求人 募集",
    "\"{name}\" 求人情報",
    "\"{name}\" 採用情報",
];

/// Queries aimed at the company's own policy/terms/about pages.
const OFFICIAL_PAGE_QUERIES: [&str; 3] = [
    "\"{name}\" プライバシーポリシー",
    "\"{name}\" 利用規約",
    "\"{name}\" 会社概要 公式",
];

/// Fallback templates, in fixed order: phone-seeking, email-seeking,
/// contact-page-seeking, company-overview-seeking, contact-info-seeking.
/// Each is tried exactly once.
const DIRECT_SEARCH_QUERIES: [&str; 5] = [
    "\"{name}\" {location} 電話番号",
    "\"{name}\" {location} メールアドレス",
    "\"{name}\" お問い合わせ",
    "\"{name}\" 会社概要",
    "\"{name}\" 連絡先",
];

/// Recognized job-listing hosts (suffix match on the result domain).
const JOB_BOARD_DOMAINS: [&str; 8] = [
    "indeed.com",
    "rikunabi.com",
    "mynavi.jp",
    "doda.jp",
    "en-japan.com",
    "townwork.net",
    "hatarako.net",
    "linkedin.com",
];

/// Recognized business-listing hosts.
const BUSINESS_LISTING_DOMAINS: [&str; 6] = [
    "itp.ne.jp",
    "mapion.co.jp",
    "navitime.co.jp",
    "ekiten.jp",
    "baseconnect.in",
    "houjin.jp",
];

/// Company-name mentions required to call a hiring signal confirmed.
/// A tunable heuristic, not a principled constant.
const MIN_NAME_MENTIONS: usize = 3;

/// Official-page candidates judged per query.
const MAX_OFFICIAL_CANDIDATES: usize = 5;

/// Results visited per direct-search template.
const MAX_RESULTS_PER_TEMPLATE: usize = 3;

// ============ Settings ============

/// Knobs of one pipeline instance, resolved once from config.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Accept threshold on the company-verification score.
    pub accept_threshold: u8,
    /// Fixed wait after every gatherer call.
    pub settle_delay: Duration,
    /// Ceiling on a single gatherer call.
    pub gatherer_timeout: Duration,
    /// Organic results requested per search.
    pub search_count: u8,
    pub search_locale: String,
    pub phone_region: CountryId,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            accept_threshold: config.accept_threshold,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            gatherer_timeout: Duration::from_secs(config.gatherer_timeout_secs),
            search_count: config.search_result_count,
            search_locale: config.search_locale.clone(),
            phone_region: config.phone_region_id(),
        }
    }
}

// ============ Pipeline ============

/// Outcome of the contact-hunting phases (2 and 3).
struct ContactHunt {
    found: bool,
    /// At least one extraction succeeded but was thrown away by the phone
    /// cross-check. Decides between the two rejection reasons.
    phone_failed: bool,
}

enum ContactOutcome {
    Applied,
    PhoneRejected,
}

pub struct VerificationPipeline {
    search: Arc<dyn SearchGatherer>,
    extractor: Arc<dyn PageExtractor>,
    judge: Arc<dyn MatchJudge>,
    settings: PipelineSettings,
}

impl VerificationPipeline {
    pub fn new(
        search: Arc<dyn SearchGatherer>,
        extractor: Arc<dyn PageExtractor>,
        judge: Arc<dyn MatchJudge>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            search,
            extractor,
            judge,
            settings,
        }
    }

    /// Run the full state machine for one candidate.
    ///
    /// Always returns a terminal result; gatherer faults are logged as data
    /// on the way and never escape.
    pub async fn verify(&self, identity: &CompanyIdentity) -> VerificationResult {
        tracing::info!("🔍 Verifying: {} ({})", identity.name, identity.location);
        let mut evidence = EvidenceBundle::default();

        // Phase 1: cheap-first filter. No hiring signal means no gatherer
        // budget is spent on the remaining phases.
        if !self.check_job_signal(identity, &mut evidence).await {
            tracing::info!("❌ No hiring signal: {}", identity.name);
            return self.finalize(identity, evidence, Some(RejectionReason::NoHiringSignal));
        }
        evidence.job_posting_confirmed = true;
        tracing::info!("✓ Hiring signal confirmed: {}", identity.name);

        // Phase 2, with phase 3 only when it comes up empty.
        let mut hunt = self.lookup_official_contact(identity, &mut evidence).await;
        if !hunt.found {
            tracing::info!("Official pages yielded nothing, falling back to direct search");
            let fallback = self.direct_search_fallback(identity, &mut evidence).await;
            hunt = ContactHunt {
                found: fallback.found,
                phone_failed: hunt.phone_failed || fallback.phone_failed,
            };
        }

        if !hunt.found {
            let reason = if hunt.phone_failed {
                RejectionReason::PhoneCheckFailed
            } else {
                RejectionReason::ContactExtractionFailed
            };
            tracing::info!("❌ Contact hunt exhausted for {}: {:?}", identity.name, reason);
            return self.finalize(identity, evidence, Some(reason));
        }

        self.finalize(identity, evidence, None)
    }

    // ------------------------------------------------------------------
    // Phase 1: hiring signal
    // ------------------------------------------------------------------

    /// Confirm the candidate has an active hiring signal. Positive evidence
    /// is company-name-specific, never a generic locality match: either a
    /// recognized job-board link with the name mentioned at least
    /// `MIN_NAME_MENTIONS` times and fewer foreign-entity mentions, or the
    /// raw mention threshold combined with the relevance judge.
    async fn check_job_signal(
        &self,
        identity: &CompanyIdentity,
        evidence: &mut EvidenceBundle,
    ) -> bool {
        let cleaned = clean_company_name(&identity.name);
        let mut aggregated = String::new();

        for template in JOB_SIGNAL_QUERIES.iter() {
            let query = render_query(template, identity);
            let hits = self.search_step(&query).await;
            if hits.is_empty() {
                continue;
            }

            for hit in &hits {
                aggregated.push_str(&hit.text());
                aggregated.push('\n');
            }
            let own_mentions = count_mentions(&aggregated, &cleaned);

            // (a) job-board link with name-specific corroboration
            if let Some(board_hit) = hits.iter().find(|h| is_job_board(h)) {
                let foreign = count_foreign_entity_markers(&aggregated, &cleaned);
                if own_mentions >= MIN_NAME_MENTIONS && foreign < own_mentions {
                    tracing::debug!(
                        "Job board hit: {} (mentions={} foreign={})",
                        board_hit.url,
                        own_mentions,
                        foreign
                    );
                    evidence.record_source(&board_hit.url);
                    return true;
                }
            }

            // (b) raw mention threshold plus the relevance judge
            if own_mentions >= MIN_NAME_MENTIONS {
                match self.judge.is_match(&aggregated, &identity.name).await {
                    Ok(true) => {
                        if let Some(first) = hits.first() {
                            evidence.record_source(&first.url);
                        }
                        return true;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!("⚠️  Relevance judge failed, treating as no match: {}", e);
                    }
                }
            }
        }

        false
    }

    // ------------------------------------------------------------------
    // Phase 2: official pages
    // ------------------------------------------------------------------

    async fn lookup_official_contact(
        &self,
        identity: &CompanyIdentity,
        evidence: &mut EvidenceBundle,
    ) -> ContactHunt {
        let mut phone_failed = false;

        for template in OFFICIAL_PAGE_QUERIES.iter() {
            let query = render_query(template, identity);
            let hits = self.search_step(&query).await;

            for hit in hits.iter().take(MAX_OFFICIAL_CANDIDATES) {
                if is_business_listing(hit) {
                    evidence.business_listing_found = true;
                    evidence.record_source(&hit.url);
                }

                let link_text = format!("{} {}", hit.title, hit.url);
                let official = match self.judge.is_official_site(&link_text, &identity.name).await
                {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        tracing::warn!("⚠️  Official-site judge failed for {}: {}", hit.url, e);
                        false
                    }
                };
                if !official {
                    continue;
                }

                let Some(contact) = self.extract_step(&hit.url, identity).await else {
                    continue;
                };
                if !contact.has_contact() {
                    continue;
                }

                match self
                    .apply_contact(identity, evidence, &contact, &hit.url, true)
                    .await
                {
                    ContactOutcome::Applied => {
                        return ContactHunt {
                            found: true,
                            phone_failed,
                        }
                    }
                    // Cross-check failure: retry the next candidate source.
                    ContactOutcome::PhoneRejected => phone_failed = true,
                }
            }
        }

        ContactHunt {
            found: false,
            phone_failed,
        }
    }

    // ------------------------------------------------------------------
    // Phase 3: direct search fallback
    // ------------------------------------------------------------------

    async fn direct_search_fallback(
        &self,
        identity: &CompanyIdentity,
        evidence: &mut EvidenceBundle,
    ) -> ContactHunt {
        let mut phone_failed = false;

        for template in DIRECT_SEARCH_QUERIES.iter() {
            let query = render_query(template, identity);
            let hits = self.search_step(&query).await;

            for hit in hits.iter().take(MAX_RESULTS_PER_TEMPLATE) {
                if is_business_listing(hit) {
                    evidence.business_listing_found = true;
                    evidence.record_source(&hit.url);
                }

                let Some(contact) = self.extract_step(&hit.url, identity).await else {
                    continue;
                };
                if !contact.has_contact() {
                    continue;
                }

                // The fallback does not require an official page, but when
                // the contact happens to come from one the evidence is
                // upgraded accordingly.
                let link_text = format!("{} {}", hit.title, hit.url);
                let official = self
                    .judge
                    .is_official_site(&link_text, &identity.name)
                    .await
                    .unwrap_or(false);

                match self
                    .apply_contact(identity, evidence, &contact, &hit.url, official)
                    .await
                {
                    ContactOutcome::Applied => {
                        return ContactHunt {
                            found: true,
                            phone_failed,
                        }
                    }
                    // Keep walking the template loop.
                    ContactOutcome::PhoneRejected => phone_failed = true,
                }
            }
        }

        ContactHunt {
            found: false,
            phone_failed,
        }
    }

    // ------------------------------------------------------------------
    // Phase 4: phone cross-check
    // ------------------------------------------------------------------

    /// Gate an extracted contact on its phone number. No phone means there
    /// is nothing to cross-verify and the contact passes; a phone that the
    /// reverse search cannot tie to the company rejects the whole contact,
    /// email and all.
    async fn apply_contact(
        &self,
        identity: &CompanyIdentity,
        evidence: &mut EvidenceBundle,
        contact: &ExtractedContact,
        source_url: &str,
        official: bool,
    ) -> ContactOutcome {
        let mut phone_format_valid = false;
        let mut phone_candidate = None;

        if let Some(phone) = contact.phone.as_deref().filter(|p| !p.is_empty()) {
            let (valid, normalized) = contacts::validate_phone(phone, self.settings.phone_region);
            phone_format_valid = valid;
            phone_candidate = Some(if valid { normalized } else { phone.to_string() });

            if !self.cross_check_phone(identity, phone, evidence).await {
                tracing::info!(
                    "❌ Phone cross-check failed for {} ({}), trying next source",
                    identity.name,
                    phone
                );
                return ContactOutcome::PhoneRejected;
            }
            evidence.phone_company_associated = true;
        }

        evidence.phone_candidate = phone_candidate;
        evidence.phone_format_valid = phone_format_valid;
        evidence.email_candidate = contact.email.clone().filter(|e| !e.is_empty());
        evidence.address_candidate = contact.address.clone().filter(|a| !a.is_empty());
        evidence.website_candidate = contact
            .website
            .clone()
            .filter(|w| !w.is_empty())
            .or_else(|| official.then(|| site_origin(source_url)).flatten());
        if official {
            evidence.official_site_confirmed = true;
        }
        evidence.record_source(source_url);

        tracing::info!(
            "✓ Contact applied for {}: phone={:?} email={:?} official={}",
            identity.name,
            evidence.phone_candidate,
            evidence.email_candidate,
            official
        );
        ContactOutcome::Applied
    }

    /// Reverse search on the bare digits; passes when the company name
    /// co-occurs in the results (direct mention, or the judge says so).
    async fn cross_check_phone(
        &self,
        identity: &CompanyIdentity,
        phone: &str,
        evidence: &mut EvidenceBundle,
    ) -> bool {
        let digits = contacts::phone_digits(phone);
        if digits.is_empty() {
            return false;
        }

        let hits = self.search_step(&digits).await;
        if hits.is_empty() {
            return false;
        }

        let cleaned = clean_company_name(&identity.name);
        let mut aggregated = String::new();
        for hit in &hits {
            aggregated.push_str(&hit.text());
            aggregated.push('\n');
        }

        let associated = if count_mentions(&aggregated, &cleaned) >= 1 {
            true
        } else {
            self.judge
                .is_match(&aggregated, &identity.name)
                .await
                .unwrap_or(false)
        };

        if associated {
            // The corroborating result is evidence in its own right.
            if let Some(hit) = hits
                .iter()
                .find(|h| count_mentions(&h.text(), &cleaned) >= 1)
                .or_else(|| hits.first())
            {
                evidence.record_source(&hit.url);
            }
        }
        associated
    }

    // ------------------------------------------------------------------
    // Step plumbing
    // ------------------------------------------------------------------

    /// One search call: timeout-bounded, faults collapse to "no evidence",
    /// fixed settle delay afterwards.
    async fn search_step(&self, query: &str) -> Vec<SearchHit> {
        let options = SearchOptions {
            count: self.settings.search_count,
            locale: self.settings.search_locale.clone(),
        };

        let hits = match timeout(
            self.settings.gatherer_timeout,
            self.search.search(query, &options),
        )
        .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                tracing::warn!("⚠️  Search failed for '{}': {}", query, e);
                Vec::new()
            }
            Err(_) => {
                tracing::warn!("⚠️  Search timed out for '{}'", query);
                Vec::new()
            }
        };

        self.settle().await;
        hits
    }

    /// One extraction call, same fault policy as `search_step`.
    async fn extract_step(
        &self,
        url: &str,
        identity: &CompanyIdentity,
    ) -> Option<ExtractedContact> {
        let outcome = match timeout(
            self.settings.gatherer_timeout,
            self.extractor.fetch_and_extract(url, &identity.name),
        )
        .await
        {
            Ok(Ok(contact)) => Some(contact),
            Ok(Err(e)) => {
                self.log_extraction_failure(url, &e);
                None
            }
            Err(_) => {
                tracing::warn!("⚠️  Extraction timed out for {}", url);
                None
            }
        };

        self.settle().await;
        outcome
    }

    fn log_extraction_failure(&self, url: &str, error: &AppError) {
        match error {
            AppError::ExtractionParseFailure(msg) => {
                tracing::warn!("⚠️  Extraction unparseable for {}: {}", url, msg)
            }
            other => tracing::warn!("⚠️  Extraction failed for {}: {}", url, other),
        }
    }

    /// Fixed wait after a gatherer call, letting the upstream settle.
    /// A fixed delay policy on purpose, not adaptive.
    async fn settle(&self) {
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
    }

    fn finalize(
        &self,
        identity: &CompanyIdentity,
        evidence: EvidenceBundle,
        rejection: Option<RejectionReason>,
    ) -> VerificationResult {
        let confidence = scoring::company_confidence(&evidence);
        let (accepted, rejection_reason) = match rejection {
            Some(reason) => (false, Some(reason)),
            None if confidence >= self.settings.accept_threshold => (true, None),
            None => (false, Some(RejectionReason::ConfidenceBelowThreshold)),
        };

        let mut source_urls = evidence.source_urls.clone();
        source_urls.truncate(MAX_RESULT_SOURCE_URLS);

        tracing::info!(
            "{} {} ({}): confidence={} reason={:?}",
            if accepted { "✅" } else { "❌" },
            identity.name,
            identity.location,
            confidence,
            rejection_reason
        );

        VerificationResult {
            identity: identity.clone(),
            evidence,
            confidence,
            accepted,
            rejection_reason,
            source_urls,
        }
    }
}

// ============ Helpers ============

fn render_query(template: &str, identity: &CompanyIdentity) -> String {
    template
        .replace("{name}", &identity.name)
        .replace("{location}", &identity.location)
}

/// Case-insensitive, non-overlapping occurrence count.
fn count_mentions(text: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    text.to_lowercase().matches(needle).count()
}

/// Corporate-form markers appearing in text segments that do not mention
/// the candidate itself, the stand-in for "competitor-name mentions".
fn count_foreign_entity_markers(text: &str, cleaned_name: &str) -> usize {
    let lowered = text.to_lowercase();
    lowered
        .split(['。', '\n', '.', '!', '?'])
        .filter(|segment| !segment.contains(cleaned_name))
        .map(|segment| {
            let japanese: usize = LEGAL_ENTITY_MARKERS
                .iter()
                .map(|marker| segment.matches(*marker).count())
                .sum();
            let romanized = segment
                .split_whitespace()
                .filter(|token| {
                    let trimmed = token.trim_matches(|c: char| !c.is_alphanumeric());
                    LEGAL_ENTITY_WORDS.contains(&trimmed)
                })
                .count();
            japanese + romanized
        })
        .sum()
}

fn domain_matches(hit: &SearchHit, domains: &[&str]) -> bool {
    let Some(domain) = hit.domain() else {
        return false;
    };
    domains
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

fn is_job_board(hit: &SearchHit) -> bool {
    domain_matches(hit, &JOB_BOARD_DOMAINS)
}

fn is_business_listing(hit: &SearchHit) -> bool {
    domain_matches(hit, &BUSINESS_LISTING_DOMAINS)
}

/// Scheme + host of a URL, used as the default website candidate when the
/// contact came from the company's own page.
fn site_origin(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{}", parsed.scheme(), host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(title: &str, url: &str, snippet: &str) -> SearchHit {
        SearchHit {
            title: title.to_string(),
            url: url.to_string(),
            snippet: snippet.to_string(),
        }
    }

    #[test]
    fn query_templates_substitute_both_fields() {
        let identity = CompanyIdentity::new("山田製作所", "東京");
        assert_eq!(
            render_query("\"{name}\" {location} 求人", &identity),
            "\"山田製作所\" 東京 求人"
        );
    }

    #[test]
    fn mention_counting_is_case_insensitive() {
        assert_eq!(count_mentions("Acme acme ACME", "acme"), 3);
        assert_eq!(count_mentions("山田製作所の求人。山田製作所", "山田製作所"), 2);
        assert_eq!(count_mentions("anything", ""), 0);
    }

    #[test]
    fn foreign_markers_skip_segments_naming_the_candidate() {
        let text = "株式会社山田製作所の求人。株式会社鈴木工業も募集中。";
        // The first segment names the candidate; only the second counts.
        assert_eq!(count_foreign_entity_markers(text, "山田製作所"), 1);
    }

    #[test]
    fn foreign_markers_count_romanized_forms() {
        let text = "Acme is hiring\nGlobex Inc. is also hiring";
        assert_eq!(count_foreign_entity_markers(text, "acme"), 1);
    }

    #[test]
    fn job_board_domains_match_with_subdomains() {
        assert!(is_job_board(&hit("求人", "https://jp.indeed.com/viewjob?jk=1", "")));
        assert!(is_job_board(&hit("求人", "https://www.rikunabi.com/company/1", "")));
        assert!(!is_job_board(&hit("会社", "https://example.co.jp/", "")));
    }

    #[test]
    fn business_listing_domains_match() {
        assert!(is_business_listing(&hit("電話帳", "https://itp.ne.jp/info/1", "")));
        assert!(!is_business_listing(&hit("会社", "https://example.co.jp/", "")));
    }

    #[test]
    fn site_origin_keeps_scheme_and_host() {
        assert_eq!(
            site_origin("https://example.co.jp/company/about"),
            Some("https://example.co.jp".to_string())
        );
        assert_eq!(site_origin("not a url"), None);
    }
}
