//! Gateway configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Default cache TTL for quick-mode results, in seconds.
const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
/// Default per-client requests per minute.
const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 10;
/// Default end-to-end workflow deadline in seconds.
const DEFAULT_WORKFLOW_DEADLINE_SECS: u64 = 30;
/// Default per-retrieval-call deadline in seconds.
const DEFAULT_RETRIEVAL_DEADLINE_SECS: u64 = 30;
/// Default synthesis max tokens.
const DEFAULT_SYNTHESIS_MAX_TOKENS: u32 = 2048;
/// Default classification max tokens.
const DEFAULT_CLASSIFY_MAX_TOKENS: u32 = 512;
/// Default bind address for the HTTP server.
const DEFAULT_BIND: &str = "127.0.0.1:8080";
/// Default language of the consulting user.
const DEFAULT_USER_LANGUAGE: &str = "cs";

/// Per-request pipeline mode.
///
/// `Quick` results are cacheable; `Deep` bypasses the cache in both
/// directions and is otherwise identical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Cacheable pipeline (default).
    #[default]
    Quick,
    /// Cache-bypassing pipeline.
    Deep,
}

impl Mode {
    /// Returns the wire representation of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Deep => "deep",
        }
    }
}

/// Keyword sets for the deterministic routing fallback.
///
/// Small closed sets of lower-cased tokens; matching is case-insensitive,
/// whole-token, and diacritic-insensitive. Priority between the sets is
/// fixed: drug beats research beats guideline.
#[derive(Debug, Clone)]
pub struct KeywordSets {
    /// Tokens routing to the drug agent.
    pub drug: Vec<String>,
    /// Tokens routing to the literature agent.
    pub research: Vec<String>,
    /// Tokens routing to the guideline agent.
    pub guideline: Vec<String>,
}

impl Default for KeywordSets {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| (*w).to_string()).collect();
        Self {
            drug: owned(&[
                "lek",
                "leky",
                "lecivo",
                "pripravek",
                "kontraindikace",
                "davkovani",
                "interakce",
                "nezadouci",
                "ucinky",
                "uhrada",
                "sukl",
            ]),
            research: owned(&[
                "studie",
                "vyzkum",
                "publikace",
                "literatura",
                "metaanalyza",
                "randomizovana",
                "pubmed",
                "clanek",
                "evidence",
            ]),
            guideline: owned(&[
                "doporucene",
                "doporuceni",
                "postupy",
                "guidelines",
                "protokol",
                "standard",
                "esc",
            ]),
        }
    }
}

/// Configuration for the consultation gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Chat provider name (e.g., "openai").
    pub provider: String,
    /// API key for the chat provider.
    pub api_key: String,
    /// Optional base URL override (for proxies or compatible APIs).
    pub base_url: Option<String>,
    /// Model identifier passed to the chat provider.
    pub model_name: Option<String>,
    /// Generation temperature for synthesis. Classification always runs at 0.
    pub temperature: f32,
    /// Default pipeline mode when the request omits one.
    pub mode: Mode,
    /// Time-to-live for cached quick-mode results.
    pub cache_ttl: Duration,
    /// Per-client-address requests per minute.
    pub rate_limit_per_minute: u32,
    /// End-to-end deadline covering classify, dispatch, and synthesize.
    pub workflow_deadline: Duration,
    /// Deadline for a single retrieval call.
    pub retrieval_deadline: Duration,
    /// Allowed CORS origins; empty means wildcard.
    pub cors_origins: Vec<String>,
    /// Socket address the HTTP server binds to.
    pub bind: String,
    /// JSON-RPC endpoint of the pharmaceutical registry, if configured.
    pub drug_endpoint: Option<String>,
    /// REST endpoint of the biomedical literature service, if configured.
    pub literature_endpoint: Option<String>,
    /// Path to the guideline corpus database, if configured.
    pub guideline_db: Option<PathBuf>,
    /// Maximum tokens for synthesis responses.
    pub synthesis_max_tokens: u32,
    /// Maximum tokens for classification responses.
    pub classify_max_tokens: u32,
    /// Language of the consulting user (ISO 639-1).
    pub user_language: String,
    /// Keyword sets for the routing fallback.
    pub keywords: KeywordSets,
    /// Preferred-term substitutions applied to final answers.
    ///
    /// Each pair is `(find, replace)`; substitution is plain text and never
    /// touches citation tokens.
    pub terminology: Vec<(String, String)>,
    /// Directory containing prompt template files.
    ///
    /// When set, system prompts are loaded from markdown files in this
    /// directory, falling back to compiled-in defaults for missing files.
    pub prompt_dir: Option<PathBuf>,
}

impl GatewayConfig {
    /// Creates a new builder for `GatewayConfig`.
    #[must_use]
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ApiKeyMissing`] if no API key is found.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::builder().from_env().build()
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigBuilder {
    provider: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    model_name: Option<String>,
    temperature: Option<f32>,
    mode: Option<Mode>,
    cache_ttl: Option<Duration>,
    rate_limit_per_minute: Option<u32>,
    workflow_deadline: Option<Duration>,
    retrieval_deadline: Option<Duration>,
    cors_origins: Option<Vec<String>>,
    bind: Option<String>,
    drug_endpoint: Option<String>,
    literature_endpoint: Option<String>,
    guideline_db: Option<PathBuf>,
    synthesis_max_tokens: Option<u32>,
    classify_max_tokens: Option<u32>,
    user_language: Option<String>,
    keywords: Option<KeywordSets>,
    terminology: Option<Vec<(String, String)>>,
    prompt_dir: Option<PathBuf>,
}

impl GatewayConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    #[allow(clippy::cognitive_complexity)]
    pub fn from_env(mut self) -> Self {
        if self.provider.is_none() {
            self.provider = std::env::var("KONSILIUM_PROVIDER").ok();
        }
        if self.api_key.is_none() {
            self.api_key = std::env::var("KONSILIUM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
        }
        if self.base_url.is_none() {
            self.base_url = std::env::var("KONSILIUM_BASE_URL")
                .or_else(|_| std::env::var("OPENAI_BASE_URL"))
                .ok();
        }
        if self.model_name.is_none() {
            self.model_name = std::env::var("KONSILIUM_MODEL").ok();
        }
        if self.cache_ttl.is_none() {
            self.cache_ttl = std::env::var("KONSILIUM_CACHE_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        if self.rate_limit_per_minute.is_none() {
            self.rate_limit_per_minute = std::env::var("KONSILIUM_RATE_LIMIT_PER_MINUTE")
                .ok()
                .and_then(|v| v.parse().ok());
        }
        if self.workflow_deadline.is_none() {
            self.workflow_deadline = std::env::var("KONSILIUM_WORKFLOW_DEADLINE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        if self.retrieval_deadline.is_none() {
            self.retrieval_deadline = std::env::var("KONSILIUM_RETRIEVAL_DEADLINE_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs);
        }
        if self.cors_origins.is_none() {
            self.cors_origins = std::env::var("KONSILIUM_CORS_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect());
        }
        if self.bind.is_none() {
            self.bind = std::env::var("KONSILIUM_BIND").ok();
        }
        if self.drug_endpoint.is_none() {
            self.drug_endpoint = std::env::var("KONSILIUM_DRUG_ENDPOINT").ok();
        }
        if self.literature_endpoint.is_none() {
            self.literature_endpoint = std::env::var("KONSILIUM_LITERATURE_ENDPOINT").ok();
        }
        if self.guideline_db.is_none() {
            self.guideline_db = std::env::var("KONSILIUM_GUIDELINE_DB")
                .ok()
                .map(PathBuf::from);
        }
        if self.user_language.is_none() {
            self.user_language = std::env::var("KONSILIUM_USER_LANGUAGE").ok();
        }
        if self.prompt_dir.is_none() {
            self.prompt_dir = std::env::var("KONSILIUM_PROMPT_DIR").ok().map(PathBuf::from);
        }
        self
    }

    /// Sets the chat provider name.
    #[must_use]
    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Sets the API key.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the base URL override.
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the model identifier.
    #[must_use]
    pub fn model_name(mut self, model: impl Into<String>) -> Self {
        self.model_name = Some(model.into());
        self
    }

    /// Sets the synthesis temperature.
    #[must_use]
    pub const fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Sets the default pipeline mode.
    #[must_use]
    pub const fn mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the cache TTL.
    #[must_use]
    pub const fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the per-client rate limit.
    #[must_use]
    pub const fn rate_limit_per_minute(mut self, n: u32) -> Self {
        self.rate_limit_per_minute = Some(n);
        self
    }

    /// Sets the workflow deadline.
    #[must_use]
    pub const fn workflow_deadline(mut self, d: Duration) -> Self {
        self.workflow_deadline = Some(d);
        self
    }

    /// Sets the per-retrieval-call deadline.
    #[must_use]
    pub const fn retrieval_deadline(mut self, d: Duration) -> Self {
        self.retrieval_deadline = Some(d);
        self
    }

    /// Sets the allowed CORS origins.
    #[must_use]
    pub fn cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Sets the bind address.
    #[must_use]
    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.bind = Some(bind.into());
        self
    }

    /// Sets the drug registry JSON-RPC endpoint.
    #[must_use]
    pub fn drug_endpoint(mut self, url: impl Into<String>) -> Self {
        self.drug_endpoint = Some(url.into());
        self
    }

    /// Sets the literature REST endpoint.
    #[must_use]
    pub fn literature_endpoint(mut self, url: impl Into<String>) -> Self {
        self.literature_endpoint = Some(url.into());
        self
    }

    /// Sets the guideline corpus database path.
    #[must_use]
    pub fn guideline_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.guideline_db = Some(path.into());
        self
    }

    /// Sets the synthesis max tokens.
    #[must_use]
    pub const fn synthesis_max_tokens(mut self, n: u32) -> Self {
        self.synthesis_max_tokens = Some(n);
        self
    }

    /// Sets the classification max tokens.
    #[must_use]
    pub const fn classify_max_tokens(mut self, n: u32) -> Self {
        self.classify_max_tokens = Some(n);
        self
    }

    /// Sets the user language (ISO 639-1).
    #[must_use]
    pub fn user_language(mut self, lang: impl Into<String>) -> Self {
        self.user_language = Some(lang.into());
        self
    }

    /// Sets the keyword sets for the routing fallback.
    #[must_use]
    pub fn keywords(mut self, keywords: KeywordSets) -> Self {
        self.keywords = Some(keywords);
        self
    }

    /// Sets the preferred-term substitution table.
    #[must_use]
    pub fn terminology(mut self, table: Vec<(String, String)>) -> Self {
        self.terminology = Some(table);
        self
    }

    /// Sets the prompt template directory.
    #[must_use]
    pub fn prompt_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.prompt_dir = Some(dir.into());
        self
    }

    /// Builds the [`GatewayConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ApiKeyMissing`] if no API key was set.
    pub fn build(self) -> Result<GatewayConfig, ChatError> {
        let api_key = self.api_key.ok_or(ChatError::ApiKeyMissing)?;

        Ok(GatewayConfig {
            provider: self.provider.unwrap_or_else(|| "openai".to_string()),
            api_key,
            base_url: self.base_url,
            model_name: self.model_name,
            temperature: self.temperature.unwrap_or(0.0),
            mode: self.mode.unwrap_or_default(),
            cache_ttl: self
                .cache_ttl
                .unwrap_or(Duration::from_secs(DEFAULT_CACHE_TTL_SECS)),
            rate_limit_per_minute: self
                .rate_limit_per_minute
                .unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE),
            workflow_deadline: self
                .workflow_deadline
                .unwrap_or(Duration::from_secs(DEFAULT_WORKFLOW_DEADLINE_SECS)),
            retrieval_deadline: self
                .retrieval_deadline
                .unwrap_or(Duration::from_secs(DEFAULT_RETRIEVAL_DEADLINE_SECS)),
            cors_origins: self.cors_origins.unwrap_or_default(),
            bind: self.bind.unwrap_or_else(|| DEFAULT_BIND.to_string()),
            drug_endpoint: self.drug_endpoint,
            literature_endpoint: self.literature_endpoint,
            guideline_db: self.guideline_db,
            synthesis_max_tokens: self
                .synthesis_max_tokens
                .unwrap_or(DEFAULT_SYNTHESIS_MAX_TOKENS),
            classify_max_tokens: self
                .classify_max_tokens
                .unwrap_or(DEFAULT_CLASSIFY_MAX_TOKENS),
            user_language: self
                .user_language
                .unwrap_or_else(|| DEFAULT_USER_LANGUAGE.to_string()),
            keywords: self.keywords.unwrap_or_default(),
            terminology: self.terminology.unwrap_or_default(),
            prompt_dir: self.prompt_dir,
        })
    }
}
