use patrol_core::ReviewFeedback;
use tracing::warn;

use crate::request::ReviewRequest;

const SYSTEM_PROMPT: &str = "\
You are Byte Patrol, an experienced code reviewer commenting on a pull request. \
You review only the code changes you are shown.

Rules:
- Focus on the review areas you are given
- Only report issues you can point to in the diff
- Do not speculate about code you cannot see
- Order issues from most to least important
- Keep each issue to one or two sentences and name the file it concerns

Respond with a single JSON object and nothing else:
{
  \"issues\": [\"Description of an issue\", \"...\"],
  \"rating\": 1-10,
  \"suggestion\": \"Specific, actionable suggestion addressing the issues, with a short example where useful\"
}

The rating is the overall quality of the changes, 10 being excellent. \
If you find no issues, return an empty issues list.";

/// Build the system prompt for the review model.
///
/// # Examples
///
/// ```
/// use patrol_review::prompt::build_system_prompt;
///
/// let prompt = build_system_prompt();
/// assert!(prompt.contains("Byte Patrol"));
/// assert!(prompt.contains("\"rating\""));
/// ```
pub fn build_system_prompt() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Build the user prompt for a review request.
///
/// Carries the requested areas and style, the pull request, a truncation
/// note when the diff was cut, and the fenced diff itself.
pub fn build_review_prompt(request: &ReviewRequest) -> String {
    let command = request.command();
    let mut prompt = format!(
        "Review the following code changes in terms of: {}.\nWriting style: {}\n",
        command.areas_label(),
        command.style.instruction()
    );

    match request.pr() {
        Some(pr) => prompt.push_str(&format!("Pull request: {pr}\n")),
        None => prompt.push_str("Source: local files\n"),
    }

    if !command.files.is_empty() {
        prompt.push_str(&format!(
            "The author asked to review only: {}\n",
            command.files.join(", ")
        ));
    }

    if let Some(truncation) = request.truncation() {
        prompt.push_str(&format!(
            "Note: the {truncation}. Do not comment on code that is not shown.\n"
        ));
    }

    let diff = request.diff_text();
    let fence = fence_for(diff);
    prompt.push_str(&format!("\n{fence}diff\n{diff}{fence}\n"));
    prompt
}

/// A backtick fence longer than any backtick run inside `body`.
fn fence_for(body: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in body.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

/// Parse the model's reply into structured feedback.
///
/// Tolerates Markdown fences and prose around the JSON: a fenced block is
/// tried first, then the whole text, then the first `{ ... }` span. Ratings
/// are clamped to 1..=10. Returns `None` when no usable JSON is found, in
/// which case the caller falls back to the free text.
///
/// # Examples
///
/// ```
/// use patrol_review::prompt::parse_feedback;
///
/// let reply = "Here you go:\n```json\n{\"issues\": [\"x\"], \"rating\": 12}\n```";
/// let feedback = parse_feedback(reply).unwrap();
/// assert_eq!(feedback.issues, vec!["x"]);
/// assert_eq!(feedback.rating, 10);
///
/// assert!(parse_feedback("Looks fine to me.").is_none());
/// ```
pub fn parse_feedback(response: &str) -> Option<ReviewFeedback> {
    let candidates = [
        fenced_block(response),
        Some(response.trim()),
        brace_span(response),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Some(feedback) = parse_candidate(candidate) {
            return Some(feedback);
        }
    }
    warn!(chars = response.len(), "model reply is not structured JSON, using free text");
    None
}

#[derive(serde::Deserialize)]
struct RawFeedback {
    #[serde(default)]
    issues: Vec<serde_json::Value>,
    rating: serde_json::Value,
    #[serde(default)]
    suggestion: Option<serde_json::Value>,
}

fn parse_candidate(text: &str) -> Option<ReviewFeedback> {
    let raw: RawFeedback = serde_json::from_str(text).ok()?;

    let rating = match &raw.rating {
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::String(s) => s.trim().split('/').next()?.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !rating.is_finite() {
        return None;
    }
    let rating = rating.round().clamp(1.0, 10.0) as u8;

    let issues = raw
        .issues
        .into_iter()
        .filter_map(|issue| match issue {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let suggestion = match raw.suggestion {
        Some(serde_json::Value::String(s)) => s.trim().to_string(),
        Some(serde_json::Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    Some(ReviewFeedback {
        issues,
        rating,
        suggestion,
    })
}

/// Body of the first fenced code block, with any language tag removed.
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// From the first `{` to the last `}`.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_contains_key_instructions() {
        let prompt = build_system_prompt();
        assert!(prompt.contains("issues"));
        assert!(prompt.contains("suggestion"));
        assert!(prompt.contains("JSON"));
    }

    #[test]
    fn parse_plain_json() {
        let fb = parse_feedback(r#"{"issues": ["Missing docstring"], "rating": 6, "suggestion": "Add one"}"#)
            .unwrap();
        assert_eq!(fb.issues, vec!["Missing docstring"]);
        assert_eq!(fb.rating, 6);
        assert_eq!(fb.suggestion, "Add one");
    }

    #[test]
    fn parse_fenced_without_language() {
        let fb = parse_feedback("```\n{\"issues\": [], \"rating\": 9}\n```").unwrap();
        assert!(fb.issues.is_empty());
        assert_eq!(fb.rating, 9);
        assert_eq!(fb.suggestion, "");
    }

    #[test]
    fn parse_json_surrounded_by_prose() {
        let reply = "Sure! {\"issues\": [\"a\"], \"rating\": \"7/10\"} Hope this helps.";
        let fb = parse_feedback(reply).unwrap();
        assert_eq!(fb.rating, 7);
    }

    #[test]
    fn rating_is_clamped() {
        assert_eq!(parse_feedback(r#"{"rating": 0}"#).unwrap().rating, 1);
        assert_eq!(parse_feedback(r#"{"rating": 42}"#).unwrap().rating, 10);
        assert_eq!(parse_feedback(r#"{"rating": 7.6}"#).unwrap().rating, 8);
    }

    #[test]
    fn non_finite_rating_is_not_structured() {
        assert!(parse_feedback(r#"{"issues": [], "rating": "NaN"}"#).is_none());
        assert!(parse_feedback(r#"{"issues": [], "rating": "inf/10"}"#).is_none());
        assert!(parse_feedback(r#"{"issues": [], "rating": "-infinity"}"#).is_none());
    }

    #[test]
    fn non_string_issues_are_kept_as_text() {
        let fb = parse_feedback(r#"{"issues": ["", {"line": 3}, null], "rating": 5}"#).unwrap();
        assert_eq!(fb.issues, vec![r#"{"line":3}"#]);
    }

    #[test]
    fn missing_rating_is_not_structured() {
        assert!(parse_feedback(r#"{"issues": ["x"]}"#).is_none());
        assert!(parse_feedback("no json here").is_none());
        assert!(parse_feedback("} backwards {").is_none());
    }

    #[test]
    fn fence_grows_past_backticks_in_diff() {
        assert_eq!(fence_for("+x = 1\n"), "```");
        assert_eq!(fence_for("+```python\n"), "````");
    }
}
