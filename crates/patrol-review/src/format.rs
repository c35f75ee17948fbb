//! Markdown rendering of review, error, and usage comments.

use chrono::Utc;
use patrol_core::{
    CommandError, ErrorClass, PrIdentifier, ProviderError, ProviderKind, ReviewConfig,
    ReviewFeedback, ReviewResult,
};

use crate::command::usage;
use crate::prompt::parse_feedback;
use crate::request::ReviewRequest;

const TRUNCATION_MARKER: &str = "\n\n_... comment truncated to fit the GitHub size limit._\n";

/// The model's answer, structured when it returned usable JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewBody {
    /// Parsed issues, rating, and suggestion.
    Structured(ReviewFeedback),
    /// Anything else, used verbatim.
    FreeText(String),
}

impl ReviewBody {
    /// Interpret a raw model reply.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_review::format::ReviewBody;
    ///
    /// let body = ReviewBody::from_reply(r#"{"issues": [], "rating": 9}"#);
    /// assert_eq!(body.rating(), Some(9));
    ///
    /// let body = ReviewBody::from_reply("Looks good.");
    /// assert_eq!(body.rating(), None);
    /// ```
    pub fn from_reply(reply: &str) -> Self {
        match parse_feedback(reply) {
            Some(feedback) => ReviewBody::Structured(feedback),
            None => ReviewBody::FreeText(reply.trim().to_string()),
        }
    }

    /// Rating, when structured.
    pub fn rating(&self) -> Option<u8> {
        match self {
            ReviewBody::Structured(feedback) => Some(feedback.rating),
            ReviewBody::FreeText(_) => None,
        }
    }
}

/// Traffic-light emoji for a 1..=10 rating.
///
/// # Examples
///
/// ```
/// use patrol_review::format::rating_emoji;
///
/// assert_eq!(rating_emoji(8), "🟢");
/// assert_eq!(rating_emoji(5), "🟡");
/// assert_eq!(rating_emoji(4), "🔴");
/// ```
pub fn rating_emoji(rating: u8) -> &'static str {
    match rating {
        8..=u8::MAX => "🟢",
        5..=7 => "🟡",
        _ => "🔴",
    }
}

/// Cut `body` to at most `max_chars` characters, ending with a marker when cut.
///
/// Always splits on a char boundary.
///
/// # Examples
///
/// ```
/// use patrol_review::format::truncate_comment;
///
/// assert_eq!(truncate_comment("short", 100), "short");
/// let cut = truncate_comment(&"é".repeat(500), 120);
/// assert!(cut.chars().count() <= 120);
/// assert!(cut.contains("comment truncated"));
/// ```
pub fn truncate_comment(body: &str, max_chars: usize) -> String {
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let marker_chars = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_chars {
        return take_chars(body, max_chars).to_string();
    }
    let mut out = take_chars(body, max_chars - marker_chars).to_string();
    out.push_str(TRUNCATION_MARKER);
    out
}

fn take_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Renders every comment the bot posts.
///
/// # Examples
///
/// ```
/// use patrol_core::ReviewConfig;
/// use patrol_review::format::CommentFormatter;
///
/// let formatter = CommentFormatter::from_config(&ReviewConfig::default());
/// assert!(formatter.help().contains("@byte-patrol review"));
/// ```
#[derive(Debug, Clone)]
pub struct CommentFormatter {
    max_chars: usize,
    mention: String,
}

impl CommentFormatter {
    /// Create a formatter with a size limit and the bot mention for usage text.
    pub fn new(max_chars: usize, mention: impl Into<String>) -> Self {
        Self {
            max_chars,
            mention: mention.into(),
        }
    }

    /// Create a formatter from the `[review]` configuration section.
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self::new(config.max_comment_chars, config.mention.clone())
    }

    /// Render the review comment for a completed request.
    pub fn review(&self, request: &ReviewRequest, body: &ReviewBody, model: &str) -> ReviewResult {
        let mut out = String::new();
        out.push_str(&format!("## 🔍 Byte Patrol review{}\n\n", target_suffix(request.pr())));

        match body {
            ReviewBody::Structured(feedback) => {
                out.push_str(&format!(
                    "**Rating:** {} {}/10\n\n",
                    rating_emoji(feedback.rating),
                    feedback.rating
                ));
                out.push_str("### Issues\n\n");
                if feedback.issues.is_empty() {
                    out.push_str("No significant issues found.\n\n");
                } else {
                    for (i, issue) in feedback.issues.iter().enumerate() {
                        out.push_str(&format!("{}. {}\n", i + 1, issue));
                    }
                    out.push('\n');
                }
                if !feedback.suggestion.is_empty() {
                    out.push_str("### Suggestions\n\n");
                    out.push_str(&feedback.suggestion);
                    out.push_str("\n\n");
                }
            }
            ReviewBody::FreeText(text) => {
                out.push_str(text);
                out.push_str("\n\n");
            }
        }

        let command = request.command();
        out.push_str(&format!(
            "**Areas:** {} | **Style:** {}\n\n",
            command.areas_label(),
            command.style
        ));

        if let Some(truncation) = request.truncation() {
            out.push_str(&format!(
                "> ⚠️ The {truncation}; the review covers only the part shown.\n\n"
            ));
        }

        if !request.skipped().is_empty() {
            out.push_str(&format!(
                "<details><summary>Skipped {} file(s)</summary>\n\n",
                request.skipped().len()
            ));
            for skipped in request.skipped() {
                out.push_str(&format!("- `{skipped}`\n"));
            }
            out.push_str("\n</details>\n\n");
        }

        out.push_str(&format!("---\n<sub>Reviewed by Byte Patrol using `{model}`</sub>\n"));

        ReviewResult {
            body: truncate_comment(&out, self.max_chars),
            created_at: Utc::now(),
            model: model.to_string(),
            rating: body.rating(),
        }
    }

    /// Comment explaining why a review could not be produced.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::{ProviderError, ProviderKind, ReviewConfig};
    /// use patrol_review::format::CommentFormatter;
    ///
    /// let formatter = CommentFormatter::from_config(&ReviewConfig::default());
    /// let err = ProviderError::from_status(ProviderKind::Llm, 402, "Insufficient credits");
    /// let body = formatter.provider_error(None, &err);
    /// assert!(body.contains("quota"));
    /// assert!(body.contains("Insufficient credits"));
    /// ```
    pub fn provider_error(&self, pr: Option<&PrIdentifier>, err: &ProviderError) -> String {
        let service = match err.kind {
            ProviderKind::Llm => "The language model provider",
            ProviderKind::SourceControl => "GitHub",
        };
        let explanation = match err.class {
            ErrorClass::Auth => format!("{service} rejected the configured credentials."),
            ErrorClass::QuotaExhausted => {
                format!("{service} reports that the quota or credits are exhausted.")
            }
            ErrorClass::Timeout
            | ErrorClass::Network
            | ErrorClass::Server(_)
            | ErrorClass::RateLimited => format!(
                "{service} did not respond successfully after several attempts. \
                 Please try again later."
            ),
            ErrorClass::Rejected(_) => format!("{service} rejected the request."),
            ErrorClass::InvalidResponse => {
                format!("{service} returned a response that could not be read.")
            }
        };

        let detail = take_chars(&err.to_string(), 1_000).to_string();
        let body = format!(
            "## ⚠️ Byte Patrol could not complete the review{}\n\n\
             {explanation}\n\n\
             <details><summary>Details</summary>\n\n\
             ```\n{detail}\n```\n\
             </details>\n",
            target_suffix(pr)
        );
        truncate_comment(&body, self.max_chars)
    }

    /// Comment for a command that could not be parsed.
    pub fn usage_error(&self, err: &CommandError) -> String {
        let body = format!(
            "**Could not understand the command:** {err}\n\n{}",
            usage(&self.mention)
        );
        truncate_comment(&body, self.max_chars)
    }

    /// Comment answering `help`.
    pub fn help(&self) -> String {
        truncate_comment(&usage(&self.mention), self.max_chars)
    }

    /// Comment for a pull request with nothing left to review.
    pub fn nothing_to_review(&self, pr: Option<&PrIdentifier>) -> String {
        format!(
            "## 🔍 Byte Patrol review{}\n\n\
             No reviewable changes found. Deleted files, lock files, generated, \
             vendored and minified code are skipped.\n",
            target_suffix(pr)
        )
    }
}

fn target_suffix(pr: Option<&PrIdentifier>) -> String {
    pr.map(|pr| format!(" for {pr}")).unwrap_or_default()
}
