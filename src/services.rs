use crate::cache_validator::ValidatedCacheEntry;
use crate::config::Config;
use crate::contacts;
use crate::errors::AppError;
use crate::gatherers::{MatchJudge, PageExtractor, SearchGatherer, SearchOptions};
use crate::models::{ExtractedContact, SearchHit};
use async_trait::async_trait;
use moka::future::Cache;
use phonenumber::country::Id as CountryId;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

// ============ Serper Web Search ============

/// Search gatherer backed by the Serper Google Search API.
///
/// Raw responses are cached for a short TTL behind checksum validation, so
/// repeated pipeline queries (job-signal templates fire similar queries for
/// neighboring candidates) do not burn API quota.
pub struct SerperSearchService {
    client: Client,
    base_url: String,
    api_key: String,
    response_cache: Cache<String, String>,
}

impl SerperSearchService {
    pub fn new(config: &Config) -> Self {
        // 10 minute TTL: long enough to cover one batch, short enough to
        // see newly indexed pages on the next run.
        let response_cache = Cache::builder()
            .time_to_live(Duration::from_secs(600))
            .max_capacity(10_000)
            .build();

        Self {
            client: Client::new(),
            base_url: config.serper_base_url.clone(),
            api_key: config.serper_api_key.clone(),
            response_cache,
        }
    }

    async fn fetch_raw(&self, query: &str, options: &SearchOptions) -> Result<String, AppError> {
        let url = format!("{}/search", self.base_url);

        tracing::debug!("Searching: {} (count={})", query, options.count);

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&json!({
                "q": query,
                "num": options.count,
                "gl": options.locale,
                "hl": options.locale,
            }))
            .send()
            .await
            .map_err(|e| AppError::GathererUnavailable(format!("Search request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("Search API returned error {}: {}", status, error_text);
            return Err(AppError::GathererUnavailable(format!(
                "Search API returned status {}: {}",
                status, error_text
            )));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::GathererUnavailable(format!("Search response read failed: {}", e)))
    }

    /// Parse organic results out of a raw response body. A missing or empty
    /// `organic` array is "no evidence", not an error.
    fn parse_hits(raw: &str) -> Result<Vec<SearchHit>, AppError> {
        let value: Value = serde_json::from_str(raw).map_err(|e| {
            AppError::ExtractionParseFailure(format!("Search response not JSON: {}", e))
        })?;

        let Some(organic) = value.get("organic").and_then(|v| v.as_array()) else {
            return Ok(Vec::new());
        };

        let hits = organic
            .iter()
            .filter_map(|item| {
                let url = item.get("link").and_then(|v| v.as_str())?;
                Some(SearchHit {
                    title: item
                        .get("title")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                    url: url.to_string(),
                    snippet: item
                        .get("snippet")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                })
            })
            .collect();

        Ok(hits)
    }
}

#[async_trait]
impl SearchGatherer for SerperSearchService {
    async fn search(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, AppError> {
        let cache_key = format!("{}|{}|{}", query, options.count, options.locale);

        if let Some(cached) = self.response_cache.get(&cache_key).await {
            if let Some(raw) = ValidatedCacheEntry::deserialize_and_validate(&cached) {
                tracing::debug!("Search cache hit: {}", query);
                return Self::parse_hits(&raw);
            }
            // Corrupted entry: fall through to a live fetch.
            self.response_cache.invalidate(&cache_key).await;
        }

        let raw = self.fetch_raw(query, options).await?;
        self.response_cache
            .insert(cache_key, ValidatedCacheEntry::new(raw.clone()).serialize())
            .await;

        Self::parse_hits(&raw)
    }
}

// ============ LLM Judge ============

/// Relevance/match judge backed by an OpenAI-compatible chat API.
///
/// Every question is bounded: one short prompt, one YES/NO (or small JSON)
/// answer, temperature zero. The pipeline's control flow never depends on
/// anything richer than the parsed verdict.
pub struct LlmJudgeService {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmJudgeService {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.llm_base_url.clone(),
            api_key: config.llm_api_key.clone(),
            model: config.llm_model.clone(),
        }
    }

    /// One chat completion round-trip, returning the assistant text.
    pub async fn chat(&self, system: &str, user: &str) -> Result<String, AppError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&json!({
                "model": self.model,
                "temperature": 0.0,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }))
            .send()
            .await
            .map_err(|e| AppError::GathererUnavailable(format!("LLM request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("LLM API returned error {}: {}", status, error_text);
            return Err(AppError::GathererUnavailable(format!(
                "LLM API returned status {}: {}",
                status, error_text
            )));
        }

        let body: Value = response.json().await.map_err(|e| {
            AppError::ExtractionParseFailure(format!("LLM response not JSON: {}", e))
        })?;

        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                AppError::ExtractionParseFailure("LLM response missing content".to_string())
            })
    }

    fn verdict_is_yes(verdict: &str) -> bool {
        verdict.trim().to_uppercase().starts_with("YES")
    }
}

#[async_trait]
impl MatchJudge for LlmJudgeService {
    async fn is_match(&self, text: &str, expected_name: &str) -> Result<bool, AppError> {
        let system = "You judge whether search-result text refers to a specific company. \
                      Answer with exactly YES or NO.";
        let user = format!(
            "Company: {}\n\nText:\n{}\n\nDoes this text refer to that company?",
            expected_name, text
        );

        let verdict = self.chat(system, &user).await?;
        Ok(Self::verdict_is_yes(&verdict))
    }

    async fn is_official_site(
        &self,
        link_text: &str,
        expected_name: &str,
    ) -> Result<bool, AppError> {
        let system = "You judge whether a search result points at a company's own website \
                      (not a portal, directory, or job board). Consider the name match and \
                      the domain. Answer with exactly YES or NO.";
        let user = format!(
            "Company: {}\n\nSearch result (title and URL):\n{}\n\nIs this the company's own site?",
            expected_name, link_text
        );

        let verdict = self.chat(system, &user).await?;
        Ok(Self::verdict_is_yes(&verdict))
    }
}

// ============ Page Extraction ============

const EXTRACTION_SYSTEM_PROMPT: &str = "You extract contact information for a named company \
from page text. Reply with strict JSON only, no prose, using exactly these keys: \
{\"phone\": string|null, \"email\": string|null, \"website\": string|null, \
\"address\": string|null, \"confidence\": number}. \
confidence is 0-100: how sure you are the fields belong to the named company. \
Use null for anything not present for that company.";

/// Page length cap handed to the extraction prompt.
const MAX_PAGE_TEXT_CHARS: usize = 6000;

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Fetches a page and asks the LLM for structured contact fields, with a
/// regex fallback when the structured answer is malformed.
pub struct PageExtractorService {
    client: Client,
    llm: LlmJudgeService,
    phone_region: CountryId,
}

impl PageExtractorService {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.gatherer_timeout_secs))
            .user_agent("lead-scout-api/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            llm: LlmJudgeService::new(config),
            phone_region: config.phone_region_id(),
        }
    }

    async fn fetch_page_text(&self, url: &str) -> Result<String, AppError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            AppError::GathererUnavailable(format!("Page fetch failed for {}: {}", url, e))
        })?;

        if !response.status().is_success() {
            return Err(AppError::GathererUnavailable(format!(
                "Page fetch for {} returned status {}",
                url,
                response.status()
            )));
        }

        let html = response.text().await.map_err(|e| {
            AppError::GathererUnavailable(format!("Page read failed for {}: {}", url, e))
        })?;

        Ok(strip_html(&html))
    }

    /// Regex fallback used when the structured extraction is unusable:
    /// scan the page text directly for a phone and an email. Confidence is
    /// pinned low; the scorer treats it as weak evidence.
    fn fallback_extract(&self, text: &str) -> ExtractedContact {
        ExtractedContact {
            phone: contacts::scan_for_phone(text, self.phone_region),
            email: contacts::scan_for_email(text),
            website: None,
            address: None,
            confidence: 40,
        }
    }
}

#[async_trait]
impl PageExtractor for PageExtractorService {
    async fn fetch_and_extract(
        &self,
        url: &str,
        expected_name: &str,
    ) -> Result<ExtractedContact, AppError> {
        let text = self.fetch_page_text(url).await?;
        let page: String = text.chars().take(MAX_PAGE_TEXT_CHARS).collect();

        let user = format!("Company: {}\n\nPage text:\n{}", expected_name, page);
        let raw = match self.llm.chat(EXTRACTION_SYSTEM_PROMPT, &user).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("⚠️  LLM extraction failed for {}, using regex fallback: {}", url, e);
                return Ok(self.fallback_extract(&page));
            }
        };

        let extraction: RawExtraction = match parse_json_block(&raw) {
            Some(parsed) => parsed,
            None => {
                tracing::warn!(
                    "⚠️  Malformed extraction response for {}, using regex fallback",
                    url
                );
                return Ok(self.fallback_extract(&page));
            }
        };

        // Screen the extracted channels before handing them to the
        // pipeline: placeholder emails drop out here.
        let email = extraction
            .email
            .filter(|e| !e.is_empty() && contacts::is_valid_email(e));
        let phone = extraction.phone.filter(|p| !p.is_empty());

        Ok(ExtractedContact {
            phone,
            email,
            website: extraction.website.filter(|w| !w.is_empty()),
            address: extraction.address.filter(|a| !a.is_empty()),
            confidence: extraction
                .confidence
                .map(|c| c.clamp(0.0, 100.0) as u8)
                .unwrap_or(0),
        })
    }
}

/// Pull the first JSON object out of an LLM answer, tolerating code fences
/// and prose around it.
fn parse_json_block<T: serde::de::DeserializeOwned>(raw: &str) -> Option<T> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

/// Reduce an HTML document to visible text: script/style blocks dropped,
/// tags removed, whitespace collapsed.
fn strip_html(html: &str) -> String {
    let script_regex = Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap();
    let tag_regex = Regex::new(r"<[^>]+>").unwrap();
    let whitespace_regex = Regex::new(r"\s+").unwrap();

    let without_blocks = script_regex.replace_all(html, " ");
    let without_tags = tag_regex.replace_all(&without_blocks, " ");
    whitespace_regex
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}
