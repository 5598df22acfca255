use serde::Deserialize;

use crate::scoring::{COMPANY_ACCEPT_THRESHOLD, HIGH_QUALITY_THRESHOLD};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub serper_api_key: String,
    pub serper_base_url: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    /// Country/language hint forwarded to search calls ("jp", "us", ...).
    pub search_locale: String,
    /// Default dialing region for phone validation ("JP", "BR", ...).
    pub phone_region: String,
    /// Pipeline accept threshold on the company-verification score.
    pub accept_threshold: u8,
    /// Orchestrator save gate on the same score.
    pub save_threshold: u8,
    /// Staleness window of the duplicate index, seconds.
    pub dedupe_ttl_secs: u64,
    /// Fixed settle delay after every gatherer call, milliseconds.
    pub settle_delay_ms: u64,
    /// Ceiling on a single gatherer call, seconds.
    pub gatherer_timeout_secs: u64,
    /// Hard wall-clock ceiling for one candidate's pipeline run, seconds.
    pub candidate_timeout_secs: u64,
    /// Fixed delay between candidates in a batch, milliseconds.
    pub batch_delay_ms: u64,
    /// Organic results requested per search call.
    pub search_result_count: u8,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            serper_api_key: std::env::var("SERPER_API_KEY")
                .map_err(|_| anyhow::anyhow!("SERPER_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("SERPER_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            serper_base_url: std::env::var("SERPER_BASE_URL")
                .unwrap_or_else(|_| "https://google.serper.dev".to_string()),
            llm_api_key: std::env::var("LLM_API_KEY")
                .map_err(|_| anyhow::anyhow!("LLM_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("LLM_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            llm_base_url: {
                let url = std::env::var("LLM_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com".to_string());
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    anyhow::bail!("LLM_BASE_URL must start with http:// or https://");
                }
                url
            },
            llm_model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            search_locale: std::env::var("SEARCH_LOCALE").unwrap_or_else(|_| "jp".to_string()),
            phone_region: {
                let region = std::env::var("PHONE_REGION").unwrap_or_else(|_| "JP".to_string());
                if region.parse::<phonenumber::country::Id>().is_err() {
                    anyhow::bail!("PHONE_REGION must be an ISO 3166-1 alpha-2 country code");
                }
                region
            },
            accept_threshold: std::env::var("ACCEPT_THRESHOLD")
                .unwrap_or_else(|_| COMPANY_ACCEPT_THRESHOLD.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("ACCEPT_THRESHOLD must be a number 0-100"))?,
            save_threshold: std::env::var("SAVE_THRESHOLD")
                .unwrap_or_else(|_| HIGH_QUALITY_THRESHOLD.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SAVE_THRESHOLD must be a number 0-100"))?,
            dedupe_ttl_secs: std::env::var("DEDUPE_TTL_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("DEDUPE_TTL_SECS must be a number"))?,
            settle_delay_ms: std::env::var("SETTLE_DELAY_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SETTLE_DELAY_MS must be a number"))?,
            gatherer_timeout_secs: std::env::var("GATHERER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("GATHERER_TIMEOUT_SECS must be a number"))?,
            candidate_timeout_secs: std::env::var("CANDIDATE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "180".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("CANDIDATE_TIMEOUT_SECS must be a number"))?,
            batch_delay_ms: std::env::var("BATCH_DELAY_MS")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("BATCH_DELAY_MS must be a number"))?,
            search_result_count: std::env::var("SEARCH_RESULT_COUNT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("SEARCH_RESULT_COUNT must be a number 1-20"))?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("Serper base URL: {}", config.serper_base_url);
        tracing::debug!("LLM base URL: {} ({})", config.llm_base_url, config.llm_model);
        tracing::debug!(
            "Thresholds: accept={} save={}",
            config.accept_threshold,
            config.save_threshold
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Parsed dialing region; falls back to JP if the stored code is
    /// somehow invalid (from_env validates it up front).
    pub fn phone_region_id(&self) -> phonenumber::country::Id {
        self.phone_region
            .parse()
            .unwrap_or(phonenumber::country::Id::JP)
    }
}
