//! Event routing: a delivery in, a decision out.
//!
//! [`route_event`] performs no I/O, so every routing rule is unit tested
//! without a server or a GitHub account.

use patrol_core::{CommandError, PatrolConfig, PatrolError, PrIdentifier, ReviewCommand};
use patrol_review::command::{contains_mention, parse_command, CommandSettings, ParsedCommand};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::events::{IssueCommentEvent, PingEvent, PullRequestEvent};

/// Pull request actions that trigger an automatic review.
const AUTO_REVIEW_ACTIONS: &[&str] = &["opened", "synchronize", "reopened"];

/// Routing rules derived from configuration.
#[derive(Debug, Clone)]
pub struct RouteSettings {
    /// Command parser settings, including the mention token.
    pub command: CommandSettings,
    /// `owner/repo` names reviewed on every push, compared case-insensitively.
    pub auto_review_repos: Vec<String>,
    /// Logins whose comments are never commands, such as the account a
    /// personal token posts as. Compared case-insensitively.
    pub ignored_authors: Vec<String>,
}

impl RouteSettings {
    pub fn from_config(config: &PatrolConfig) -> Self {
        Self {
            command: CommandSettings::from_config(&config.review),
            auto_review_repos: config.review.auto_review_repos.clone(),
            ignored_authors: Vec::new(),
        }
    }

    /// Also ignore comments written by `login`.
    pub fn ignore_author(mut self, login: impl Into<String>) -> Self {
        self.ignored_authors.push(login.into());
        self
    }

    fn ignores_author(&self, login: &str) -> bool {
        self.ignored_authors
            .iter()
            .any(|author| author.eq_ignore_ascii_case(login))
    }

    fn auto_reviews(&self, full_name: &str) -> bool {
        self.auto_review_repos
            .iter()
            .any(|repo| repo.eq_ignore_ascii_case(full_name))
    }
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self::from_config(&PatrolConfig::default())
    }
}

/// What a job should do once it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Review the pull request.
    Review(ReviewCommand),
    /// Post the usage text.
    Help,
    /// Explain why the command was rejected.
    UsageError(CommandError),
}

/// Work accepted from a delivery, run after the response is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub pr: PrIdentifier,
    /// GitHub App installation that sent the delivery.
    pub installation_id: Option<u64>,
    /// Comment to acknowledge, absent for automatic reviews.
    pub comment_id: Option<u64>,
    pub kind: JobKind,
}

/// Routing decision for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Answer a `ping`.
    Pong { hook_id: Option<u64> },
    /// Accept and run a job.
    Job(Job),
    /// Acknowledge without side effects.
    Ignored(String),
}

impl Dispatch {
    fn ignored(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        debug!(%reason, "delivery ignored");
        Dispatch::Ignored(reason)
    }
}

/// Decide what to do with a delivery of type `event` carrying `body`.
///
/// # Errors
///
/// Returns [`PatrolError::Serialization`] when the body of a handled event
/// is not the expected JSON.
///
/// # Examples
///
/// ```
/// use patrol_webhook::dispatch::{route_event, Dispatch, RouteSettings};
///
/// let settings = RouteSettings::default();
/// let decision = route_event("star", b"{}", &settings).unwrap();
/// assert!(matches!(decision, Dispatch::Ignored(_)));
/// ```
pub fn route_event(
    event: &str,
    body: &[u8],
    settings: &RouteSettings,
) -> Result<Dispatch, PatrolError> {
    match event {
        "ping" => {
            let ping: PingEvent = decode(body)?;
            Ok(Dispatch::Pong {
                hook_id: ping.hook_id,
            })
        }
        "issue_comment" => Ok(route_comment(decode(body)?, settings)),
        "pull_request" => Ok(route_pull_request(decode(body)?, settings)),
        other => Ok(Dispatch::ignored(format!("event '{other}' is not handled"))),
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, PatrolError> {
    Ok(serde_json::from_slice(body)?)
}

fn route_comment(event: IssueCommentEvent, settings: &RouteSettings) -> Dispatch {
    if event.action != "created" {
        return Dispatch::ignored(format!("comment action '{}'", event.action));
    }
    if event.issue.pull_request.is_none() {
        return Dispatch::ignored("comment is not on a pull request");
    }
    if event.comment.user.is_bot() {
        return Dispatch::ignored(format!("comment by bot '{}'", event.comment.user.login));
    }
    if settings.ignores_author(&event.comment.user.login) {
        return Dispatch::ignored(format!(
            "comment by ignored author '{}'",
            event.comment.user.login
        ));
    }
    if event.issue.state.as_deref() == Some("closed") {
        return Dispatch::ignored("pull request is closed");
    }
    let body = event.comment.body.as_deref().unwrap_or_default();
    if !contains_mention(body, &settings.command.mention) {
        return Dispatch::ignored("comment does not mention the bot");
    }

    let kind = match parse_command(body, &settings.command) {
        Ok(ParsedCommand::Review(command)) => JobKind::Review(command),
        Ok(ParsedCommand::Help) => JobKind::Help,
        Err(CommandError::MissingMention) => {
            return Dispatch::ignored("mention only appears in quoted text");
        }
        Err(err) => JobKind::UsageError(err),
    };

    Dispatch::Job(Job {
        pr: event.repository.pull_request(event.issue.number),
        installation_id: event.installation.map(|i| i.id),
        comment_id: Some(event.comment.id),
        kind,
    })
}

fn route_pull_request(event: PullRequestEvent, settings: &RouteSettings) -> Dispatch {
    if !AUTO_REVIEW_ACTIONS.contains(&event.action.as_str()) {
        return Dispatch::ignored(format!("pull request action '{}'", event.action));
    }
    if !settings.auto_reviews(&event.repository.full_name) {
        return Dispatch::ignored(format!(
            "automatic review is off for {}",
            event.repository.full_name
        ));
    }
    if event.pull_request.draft {
        return Dispatch::ignored("draft pull request");
    }

    let command = ReviewCommand::with_defaults(
        &settings.command.default_areas,
        settings.command.default_style.clone(),
    );
    Dispatch::Job(Job {
        pr: event.repository.pull_request(event.pull_request.number),
        installation_id: event.installation.map(|i| i.id),
        comment_id: None,
        kind: JobKind::Review(command),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use patrol_core::ReviewStyle;
    use patrol_review::format::CommentFormatter;
    use serde_json::json;

    fn comment(action: &str, body: &str, user_type: &str, on_pr: bool) -> Vec<u8> {
        comment_by("octocat", action, body, user_type, on_pr)
    }

    fn comment_by(login: &str, action: &str, body: &str, user_type: &str, on_pr: bool) -> Vec<u8> {
        let mut issue = json!({"number": 12, "state": "open"});
        if on_pr {
            issue["pull_request"] = json!({"url": "https://api.github.com/repos/octo/app/pulls/12"});
        }
        json!({
            "action": action,
            "issue": issue,
            "comment": {
                "id": 555,
                "body": body,
                "user": {"login": login, "type": user_type}
            },
            "repository": {
                "name": "app",
                "full_name": "octo/app",
                "owner": {"login": "octo", "type": "Organization"}
            },
            "installation": {"id": 42}
        })
        .to_string()
        .into_bytes()
    }

    fn pull_request(action: &str, draft: bool) -> Vec<u8> {
        json!({
            "action": action,
            "number": 3,
            "pull_request": {"number": 3, "draft": draft},
            "repository": {
                "name": "app",
                "full_name": "octo/app",
                "owner": {"login": "octo"}
            }
        })
        .to_string()
        .into_bytes()
    }

    fn job(dispatch: Dispatch) -> Job {
        match dispatch {
            Dispatch::Job(job) => job,
            other => panic!("expected a job, got {other:?}"),
        }
    }

    #[test]
    fn ping_answers_with_hook_id() {
        let body = br#"{"zen": "Keep it logically awesome.", "hook_id": 17}"#;
        let dispatch = route_event("ping", body, &RouteSettings::default()).unwrap();
        assert_eq!(dispatch, Dispatch::Pong { hook_id: Some(17) });
    }

    #[test]
    fn review_comment_becomes_job() {
        let body = comment(
            "created",
            "@byte-patrol review --areas security --style brief",
            "User",
            true,
        );
        let job = job(route_event("issue_comment", &body, &RouteSettings::default()).unwrap());
        assert_eq!(job.pr.to_string(), "octo/app#12");
        assert_eq!(job.installation_id, Some(42));
        assert_eq!(job.comment_id, Some(555));
        let JobKind::Review(command) = job.kind else {
            panic!("expected review");
        };
        assert!(command.areas.contains("security"));
        assert_eq!(command.style, ReviewStyle::Brief);
    }

    #[test]
    fn help_comment_becomes_help_job() {
        let body = comment("created", "@byte-patrol help", "User", true);
        let job = job(route_event("issue_comment", &body, &RouteSettings::default()).unwrap());
        assert_eq!(job.kind, JobKind::Help);
    }

    #[test]
    fn malformed_command_becomes_usage_job() {
        let body = comment("created", "@byte-patrol review --areas \"oops", "User", true);
        let job = job(route_event("issue_comment", &body, &RouteSettings::default()).unwrap());
        assert_eq!(
            job.kind,
            JobKind::UsageError(CommandError::UnterminatedQuote('"'))
        );
    }

    #[test]
    fn ignores_edits_issues_bots_and_chatter() {
        let settings = RouteSettings::default();
        let cases = [
            comment("edited", "@byte-patrol review", "User", true),
            comment("created", "@byte-patrol review", "User", false),
            comment("created", "@byte-patrol review", "Bot", true),
            comment("created", "looks good to me", "User", true),
            comment("created", "> @byte-patrol review\nthanks", "User", true),
        ];
        for body in cases {
            let dispatch = route_event("issue_comment", &body, &settings).unwrap();
            assert!(matches!(dispatch, Dispatch::Ignored(_)), "{dispatch:?}");
        }
    }

    #[test]
    fn own_help_and_usage_comments_do_not_trigger() {
        let settings = RouteSettings::default();
        let formatter = CommentFormatter::new(65_536, &settings.command.mention);
        let replies = [
            formatter.help(),
            formatter.usage_error(&CommandError::MissingVerb),
            formatter.usage_error(&CommandError::UnknownFlag("--verbose".into())),
        ];
        for reply in replies {
            let body = comment("created", &reply, "User", true);
            let dispatch = route_event("issue_comment", &body, &settings).unwrap();
            assert!(matches!(dispatch, Dispatch::Ignored(_)), "{dispatch:?}");
        }
    }

    #[test]
    fn ignored_author_is_skipped_case_insensitively() {
        let settings = RouteSettings::default().ignore_author("Patrol-Bot");
        let own = comment_by("patrol-bot", "created", "@byte-patrol review", "User", true);
        let dispatch = route_event("issue_comment", &own, &settings).unwrap();
        assert!(matches!(dispatch, Dispatch::Ignored(reason) if reason.contains("ignored author")));

        let other = comment("created", "@byte-patrol review", "User", true);
        assert!(matches!(
            route_event("issue_comment", &other, &settings).unwrap(),
            Dispatch::Job(_)
        ));
    }

    #[test]
    fn unknown_events_are_ignored() {
        let dispatch = route_event("push", b"not even json", &RouteSettings::default()).unwrap();
        assert!(matches!(dispatch, Dispatch::Ignored(reason) if reason.contains("push")));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let err = route_event("issue_comment", b"{\"action\":", &RouteSettings::default())
            .unwrap_err();
        assert!(matches!(err, PatrolError::Serialization(_)));
    }

    #[test]
    fn pull_request_needs_opt_in() {
        let body = pull_request("opened", false);
        let dispatch = route_event("pull_request", &body, &RouteSettings::default()).unwrap();
        assert!(matches!(dispatch, Dispatch::Ignored(_)));

        let settings = RouteSettings {
            auto_review_repos: vec!["Octo/App".into()],
            ..RouteSettings::default()
        };
        let job = job(route_event("pull_request", &body, &settings).unwrap());
        assert_eq!(job.pr.to_string(), "octo/app#3");
        assert_eq!(job.comment_id, None);
        let JobKind::Review(command) = job.kind else {
            panic!("expected review");
        };
        assert!(!command.explicit_areas);
        assert!(command.areas.contains("code quality"));
    }

    #[test]
    fn pull_request_skips_closed_and_drafts() {
        let settings = RouteSettings {
            auto_review_repos: vec!["octo/app".into()],
            ..RouteSettings::default()
        };
        for body in [pull_request("closed", false), pull_request("opened", true)] {
            let dispatch = route_event("pull_request", &body, &settings).unwrap();
            assert!(matches!(dispatch, Dispatch::Ignored(_)));
        }
    }
}
