//! GitHub webhook payloads, reduced to the fields routing needs.

use patrol_core::PrIdentifier;
use serde::Deserialize;

/// Account that authored a comment or owns a repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub login: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Account {
    /// Whether the account is an App or other automation.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_webhook::events::Account;
    ///
    /// let bot = Account { login: "byte-patrol[bot]".into(), kind: "Bot".into() };
    /// assert!(bot.is_bot());
    /// let human = Account { login: "octocat".into(), kind: "User".into() };
    /// assert!(!human.is_bot());
    /// ```
    pub fn is_bot(&self) -> bool {
        self.kind.eq_ignore_ascii_case("bot") || self.login.ends_with("[bot]")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: Account,
}

impl Repository {
    /// Identifier of pull request `number` in this repository.
    pub fn pull_request(&self, number: u64) -> PrIdentifier {
        PrIdentifier::new(self.owner.login.clone(), self.name.clone(), number)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Installation {
    pub id: u64,
}

/// The issue a comment was left on. Pull requests are issues that carry a
/// `pull_request` object.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Comment {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    pub user: Account,
}

/// `issue_comment` delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCommentEvent {
    pub action: String,
    pub issue: Issue,
    pub comment: Comment,
    pub repository: Repository,
    #[serde(default)]
    pub installation: Option<Installation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub draft: bool,
}

/// `pull_request` delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub pull_request: PullRequest,
    pub repository: Repository,
    #[serde(default)]
    pub installation: Option<Installation>,
}

/// `ping` delivery, sent once when the hook is created.
#[derive(Debug, Clone, Deserialize)]
pub struct PingEvent {
    #[serde(default)]
    pub zen: Option<String>,
    #[serde(default)]
    pub hook_id: Option<u64>,
}
