use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Errors that can occur across Byte Patrol.
///
/// Each variant wraps a specific error domain. Library crates use this type
/// directly; the binary crate converts to `miette` diagnostics at the boundary.
///
/// # Examples
///
/// ```
/// use patrol_core::PatrolError;
///
/// let err = PatrolError::Config("missing API key".into());
/// assert!(err.to_string().contains("missing API key"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum PatrolError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Diff or payload parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Malformed `@byte-patrol` command in a comment.
    #[error(transparent)]
    #[diagnostic(help("usage: @byte-patrol review [--areas \"a, b\"] [--style \"...\"] [files...]"))]
    Command(#[from] CommandError),

    /// LLM or source-control provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Webhook signature missing or invalid.
    #[error("signature error: {0}")]
    Signature(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl PatrolError {
    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, PatrolError::Provider(e) if e.is_transient())
    }
}

/// A comment mentioned the bot but the command could not be understood.
///
/// These are user errors: they are answered with a usage comment and never
/// abort the process.
///
/// # Examples
///
/// ```
/// use patrol_core::CommandError;
///
/// let err = CommandError::UnknownVerb("reveiw".into());
/// assert_eq!(err.to_string(), "unknown command 'reveiw'");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The text does not contain the mention token.
    #[error("comment does not mention the bot")]
    MissingMention,

    /// The mention is not followed by a verb.
    #[error("missing command after mention")]
    MissingVerb,

    /// The word after the mention is not a known verb.
    #[error("unknown command '{0}'")]
    UnknownVerb(String),

    /// A quoted value was opened but never closed.
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    /// A flag that takes a value was the last token.
    #[error("flag '{0}' requires a value")]
    MissingValue(String),

    /// A flag that is not understood, when unknown flags are rejected.
    #[error("unknown flag '{0}'")]
    UnknownFlag(String),

    /// `--areas` was given but contained no usable entries.
    #[error("--areas must name at least one area")]
    EmptyAreas,
}

/// Which external system produced a [`ProviderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// The chat-completions endpoint.
    Llm,
    /// GitHub (or another source-control host).
    SourceControl,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Llm => write!(f, "LLM"),
            ProviderKind::SourceControl => write!(f, "source control"),
        }
    }
}

/// Failure class of a provider call, used to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The call did not complete within the configured timeout.
    Timeout,
    /// Connection-level failure.
    Network,
    /// HTTP 5xx.
    Server(u16),
    /// HTTP 429 without quota exhaustion.
    RateLimited,
    /// HTTP 401/403.
    Auth,
    /// Credits or quota used up.
    QuotaExhausted,
    /// Any other 4xx.
    Rejected(u16),
    /// The provider answered with something we could not interpret.
    InvalidResponse,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Timeout => write!(f, "timeout"),
            ErrorClass::Network => write!(f, "network"),
            ErrorClass::Server(s) => write!(f, "server error {s}"),
            ErrorClass::RateLimited => write!(f, "rate limited"),
            ErrorClass::Auth => write!(f, "authentication"),
            ErrorClass::QuotaExhausted => write!(f, "quota exhausted"),
            ErrorClass::Rejected(s) => write!(f, "rejected {s}"),
            ErrorClass::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// Error returned by the LLM provider or the source-control host.
///
/// # Examples
///
/// ```
/// use patrol_core::{ErrorClass, ProviderError, ProviderKind};
///
/// let err = ProviderError::from_status(ProviderKind::Llm, 503, "overloaded");
/// assert_eq!(err.class, ErrorClass::Server(503));
/// assert!(err.is_transient());
///
/// let err = ProviderError::from_status(ProviderKind::Llm, 401, "bad key");
/// assert!(!err.is_transient());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error ({class}): {message}")]
pub struct ProviderError {
    /// The system that failed.
    pub kind: ProviderKind,
    /// Failure classification.
    pub class: ErrorClass,
    /// Human-readable detail, usually the response body.
    pub message: String,
    /// Server-suggested wait before retrying.
    pub retry_after: Option<Duration>,
}

impl ProviderError {
    /// Create an error with an explicit class.
    pub fn new(kind: ProviderKind, class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            kind,
            class,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify an unsuccessful HTTP response.
    ///
    /// A 429 whose body mentions quota is treated as exhausted quota rather
    /// than a rate limit, since waiting will not help.
    pub fn from_status(kind: ProviderKind, status: u16, body: &str) -> Self {
        let class = match status {
            401 | 403 => ErrorClass::Auth,
            402 => ErrorClass::QuotaExhausted,
            408 => ErrorClass::Timeout,
            429 if body.to_lowercase().contains("quota") => ErrorClass::QuotaExhausted,
            429 => ErrorClass::RateLimited,
            500..=599 => ErrorClass::Server(status),
            _ => ErrorClass::Rejected(status),
        };
        Self::new(kind, class, body.trim().to_string())
    }

    /// Attach a `Retry-After` hint.
    pub fn with_retry_after(mut self, wait: Option<Duration>) -> Self {
        self.retry_after = wait;
        self
    }

    /// Whether the failure class is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.class,
            ErrorClass::Timeout
                | ErrorClass::Network
                | ErrorClass::Server(_)
                | ErrorClass::RateLimited
        )
    }
}
