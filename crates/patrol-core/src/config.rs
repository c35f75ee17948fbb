use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PatrolError;

/// Top-level configuration loaded from `.byte-patrol.toml`.
///
/// Supports layered resolution: CLI flags > env vars > config file > defaults.
///
/// # Examples
///
/// ```
/// use patrol_core::PatrolConfig;
///
/// let config = PatrolConfig::default();
/// assert_eq!(config.review.mention, "@byte-patrol");
/// assert_eq!(config.server.port, 8000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatrolConfig {
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Review behavior settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// GitHub App credentials and API location.
    #[serde(default)]
    pub github: GitHubConfig,
    /// Webhook server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl PatrolConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Io`] if the file cannot be read, or
    /// [`PatrolError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use patrol_core::PatrolConfig;
    /// use std::path::Path;
    ///
    /// let config = PatrolConfig::from_file(Path::new(".byte-patrol.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, PatrolError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::PatrolConfig;
    ///
    /// let toml = r#"
    /// [review]
    /// max_diff_bytes = 20000
    /// "#;
    /// let config = PatrolConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.review.max_diff_bytes, 20000);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, PatrolError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset. Unparseable numbers are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::PatrolConfig;
    ///
    /// let mut config = PatrolConfig::default();
    /// config.apply_env_with(|key| match key {
    ///     "MODEL_NAME" => Some("openai/gpt-4o-mini".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.llm.model, "openai/gpt-4o-mini");
    /// ```
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("OPENROUTER_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = get("OPENROUTER_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = get("MODEL_NAME") {
            self.llm.model = model;
        }
        if let Some(id) = get("GITHUB_APP_ID").and_then(|v| v.trim().parse().ok()) {
            self.github.app_id = Some(id);
        }
        if let Some(path) = get("GITHUB_PRIVATE_KEY_PATH") {
            self.github.private_key_path = Some(PathBuf::from(path));
        }
        if let Some(secret) = get("GITHUB_WEBHOOK_SECRET") {
            self.github.webhook_secret = Some(secret);
        }
        if let Some(token) = get("GITHUB_TOKEN").or_else(|| get("GH_TOKEN")) {
            self.github.token = Some(token);
        }
        if let Some(host) = get("BYTE_PATROL_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("BYTE_PATROL_PORT").and_then(|v| v.trim().parse().ok()) {
            self.server.port = port;
        }
    }
}

/// LLM provider configuration.
///
/// Any OpenAI-compatible `chat/completions` endpoint works; OpenRouter is the default.
///
/// # Examples
///
/// ```
/// use patrol_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "google/gemini-2.0-flash-001");
/// assert_eq!(config.timeout_secs, 30);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Base URL; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Maximum tokens in the response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry, doubled on each further retry.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for a single backoff delay.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    8000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// What to do with flags the command parser does not recognize.
///
/// # Examples
///
/// ```
/// use patrol_core::UnknownFlagPolicy;
///
/// assert_eq!(UnknownFlagPolicy::default(), UnknownFlagPolicy::Ignore);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownFlagPolicy {
    /// Skip the flag and its value.
    #[default]
    Ignore,
    /// Fail the command with a usage reply.
    Reject,
}

/// Review behavior configuration.
///
/// # Examples
///
/// ```
/// use patrol_core::ReviewConfig;
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.max_diff_bytes, 60_000);
/// assert_eq!(config.max_diff_lines, 1_500);
/// assert_eq!(config.max_comment_chars, 65_536);
/// assert_eq!(config.default_areas, vec!["code quality", "best practices"]);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Token that addresses the bot in a comment.
    #[serde(default = "default_mention")]
    pub mention: String,
    /// Areas used when the command has no `--areas`.
    #[serde(default = "default_areas")]
    pub default_areas: Vec<String>,
    /// Style used when the command has no `--style`.
    #[serde(default = "default_style")]
    pub default_style: String,
    /// Handling of unrecognized command flags.
    #[serde(default)]
    pub unknown_flags: UnknownFlagPolicy,
    /// Byte ceiling for the diff embedded in the prompt.
    #[serde(default = "default_max_diff_bytes")]
    pub max_diff_bytes: usize,
    /// Line ceiling for the diff embedded in the prompt.
    #[serde(default = "default_max_diff_lines")]
    pub max_diff_lines: usize,
    /// Platform limit for a single comment body, in characters.
    #[serde(default = "default_max_comment_chars")]
    pub max_comment_chars: usize,
    /// Additional glob patterns to skip before sending to the LLM.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
    /// Additional file extensions to skip before sending to the LLM.
    #[serde(default)]
    pub skip_extensions: Vec<String>,
    /// Extensions reviewed by the pre-commit hook.
    #[serde(default = "default_file_types")]
    pub file_types: Vec<String>,
    /// Ratings at or below this value fail `bp review` and `bp hook`.
    #[serde(default)]
    pub severity_threshold: u8,
    /// Repositories (`owner/repo`) reviewed automatically on PR open/update.
    #[serde(default)]
    pub auto_review_repos: Vec<String>,
    /// React with 👀 to the triggering comment before reviewing.
    #[serde(default = "default_acknowledge")]
    pub acknowledge: bool,
}

fn default_mention() -> String {
    "@byte-patrol".into()
}

fn default_areas() -> Vec<String> {
    vec!["code quality".into(), "best practices".into()]
}

fn default_style() -> String {
    "concise".into()
}

fn default_max_diff_bytes() -> usize {
    60_000
}

fn default_max_diff_lines() -> usize {
    1_500
}

fn default_max_comment_chars() -> usize {
    65_536
}

fn default_file_types() -> Vec<String> {
    vec!["py".into()]
}

fn default_acknowledge() -> bool {
    true
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            mention: default_mention(),
            default_areas: default_areas(),
            default_style: default_style(),
            unknown_flags: UnknownFlagPolicy::default(),
            max_diff_bytes: default_max_diff_bytes(),
            max_diff_lines: default_max_diff_lines(),
            max_comment_chars: default_max_comment_chars(),
            skip_patterns: Vec::new(),
            skip_extensions: Vec::new(),
            file_types: default_file_types(),
            severity_threshold: 0,
            auto_review_repos: Vec::new(),
            acknowledge: default_acknowledge(),
        }
    }
}

/// GitHub App configuration.
///
/// Either `app_id` + `private_key_path` (App installation auth) or `token`
/// (personal token, CLI use) must be present to talk to GitHub.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Numeric GitHub App id.
    pub app_id: Option<u64>,
    /// PEM file with the App's RSA private key.
    pub private_key_path: Option<PathBuf>,
    /// Secret used to sign webhook deliveries.
    pub webhook_secret: Option<String>,
    /// REST API root.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Personal access token, used instead of App auth when set.
    pub token: Option<String>,
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            app_id: None,
            private_key_path: None,
            webhook_secret: None,
            api_url: default_api_url(),
            token: None,
        }
    }
}

/// Webhook server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Route receiving GitHub deliveries.
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_webhook_path() -> String {
    "/webhooks/github".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            webhook_path: default_webhook_path(),
        }
    }
}
