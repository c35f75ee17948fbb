use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use patrol_core::{
    ErrorClass, GitHubConfig, PatrolError, PrIdentifier, ProviderError, ProviderKind,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::llm::parse_retry_after;

const USER_AGENT: &str = concat!("byte-patrol/", env!("CARGO_PKG_VERSION"));

/// Operations the review pipeline needs from the source-control host.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// Unified diff of the pull request.
    async fn fetch_diff(&self, pr: &PrIdentifier) -> Result<String, PatrolError>;

    /// Whether the pull request is still open.
    async fn is_open(&self, pr: &PrIdentifier) -> Result<bool, PatrolError>;

    /// Post a top-level comment on the pull request conversation.
    async fn post_comment(&self, pr: &PrIdentifier, body: &str) -> Result<(), PatrolError>;

    /// Add a reaction (e.g. `eyes`) to an issue comment.
    async fn react_to_comment(
        &self,
        pr: &PrIdentifier,
        comment_id: u64,
        reaction: &str,
    ) -> Result<(), PatrolError>;
}

/// GitHub pull request client backed by octocrab and reqwest.
///
/// Authenticates with a bearer token: a personal access token, or an
/// installation token minted by [`GitHubApp`].
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    token: String,
    api_url: String,
}

impl GitHubClient {
    /// Create a client for an explicit token against `api_url`.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Config`] if the clients cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use patrol_review::github::GitHubClient;
    ///
    /// let client = GitHubClient::with_token("ghp_xxxx", "https://api.github.com").unwrap();
    /// ```
    pub fn with_token(token: impl Into<String>, api_url: &str) -> Result<Self, PatrolError> {
        let token = token.into();
        let api_url = api_url.trim_end_matches('/').to_string();

        let octocrab = octocrab::Octocrab::builder()
            .base_uri(api_url.as_str())
            .map_err(|e| PatrolError::Config(format!("invalid GitHub API URL: {e}")))?
            .personal_token(token.clone())
            .build()
            .map_err(|e| PatrolError::Config(format!("failed to create GitHub client: {e}")))?;

        let http = build_http()?;

        Ok(Self {
            octocrab,
            http,
            token,
            api_url,
        })
    }

    /// Create a client from `[github]` configuration using its personal token.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Config`] if no token is configured.
    pub fn from_config(config: &GitHubConfig) -> Result<Self, PatrolError> {
        let token = config.token.as_deref().ok_or_else(|| {
            PatrolError::Config(
                "no GitHub token. Set GITHUB_TOKEN or configure a GitHub App".into(),
            )
        })?;
        Self::with_token(token, &config.api_url)
    }

    /// Login of the account the token acts as.
    ///
    /// # Errors
    ///
    /// Returns a source control [`ProviderError`] if `GET /user` fails or
    /// its body carries no login.
    pub async fn authenticated_login(&self) -> Result<String, PatrolError> {
        let user: serde_json::Value = self
            .octocrab
            .get("/user", None::<&()>)
            .await
            .map_err(octocrab_error)?;
        login_of(&user).ok_or_else(|| {
            ProviderError::new(
                ProviderKind::SourceControl,
                ErrorClass::InvalidResponse,
                "GET /user returned no login",
            )
            .into()
        })
    }
}

fn login_of(user: &serde_json::Value) -> Option<String> {
    user.get("login")
        .and_then(|l| l.as_str())
        .filter(|l| !l.is_empty())
        .map(str::to_string)
}

fn build_http() -> Result<reqwest::Client, PatrolError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|e| PatrolError::Config(format!("failed to create HTTP client: {e}")))
}

fn transport_error(e: reqwest::Error) -> PatrolError {
    let class = if e.is_timeout() {
        ErrorClass::Timeout
    } else {
        ErrorClass::Network
    };
    ProviderError::new(ProviderKind::SourceControl, class, e.to_string()).into()
}

fn octocrab_error(e: octocrab::Error) -> PatrolError {
    match e {
        octocrab::Error::GitHub { source, .. } => ProviderError::from_status(
            ProviderKind::SourceControl,
            source.status_code.as_u16(),
            &source.message,
        )
        .into(),
        other => {
            ProviderError::new(ProviderKind::SourceControl, ErrorClass::Network, other.to_string())
                .into()
        }
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, PatrolError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(
        ProviderError::from_status(ProviderKind::SourceControl, status.as_u16(), &body)
            .with_retry_after(retry_after)
            .into(),
    )
}

#[async_trait]
impl PullRequestHost for GitHubClient {
    #[instrument(skip_all, fields(pr = %pr))]
    async fn fetch_diff(&self, pr: &PrIdentifier) -> Result<String, PatrolError> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.api_url, pr.owner, pr.repo, pr.number
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github.v3.diff")
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(transport_error)?;

        let diff = error_for_status(response)
            .await?
            .text()
            .await
            .map_err(transport_error)?;
        debug!(bytes = diff.len(), "fetched pull request diff");
        Ok(diff)
    }

    #[instrument(skip_all, fields(pr = %pr))]
    async fn is_open(&self, pr: &PrIdentifier) -> Result<bool, PatrolError> {
        let route = format!("/repos/{}/{}/pulls/{}", pr.owner, pr.repo, pr.number);
        let body: serde_json::Value = self
            .octocrab
            .get(route, None::<&()>)
            .await
            .map_err(octocrab_error)?;
        Ok(body.get("state").and_then(|s| s.as_str()) == Some("open"))
    }

    #[instrument(skip_all, fields(pr = %pr, chars = body.len()))]
    async fn post_comment(&self, pr: &PrIdentifier, body: &str) -> Result<(), PatrolError> {
        self.octocrab
            .issues(&pr.owner, &pr.repo)
            .create_comment(pr.number, body)
            .await
            .map_err(octocrab_error)?;
        Ok(())
    }

    #[instrument(skip_all, fields(pr = %pr))]
    async fn react_to_comment(
        &self,
        pr: &PrIdentifier,
        comment_id: u64,
        reaction: &str,
    ) -> Result<(), PatrolError> {
        let route = format!(
            "/repos/{}/{}/issues/comments/{comment_id}/reactions",
            pr.owner, pr.repo
        );
        let body = serde_json::json!({ "content": reaction });
        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(&body))
            .await
            .map_err(octocrab_error)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct InstallationToken {
    token: String,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
}

/// GitHub App credentials, used to mint installation tokens.
pub struct GitHubApp {
    app_id: u64,
    key: jsonwebtoken::EncodingKey,
    api_url: String,
    http: reqwest::Client,
}

impl GitHubApp {
    /// Create an App from its id and an RSA private key in PEM form.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Config`] if the key is not a valid RSA PEM key.
    pub fn new(app_id: u64, private_key_pem: &[u8], api_url: &str) -> Result<Self, PatrolError> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem)
            .map_err(|e| PatrolError::Config(format!("invalid GitHub App private key: {e}")))?;
        Ok(Self {
            app_id,
            key,
            api_url: api_url.trim_end_matches('/').to_string(),
            http: build_http()?,
        })
    }

    /// Load App credentials from `[github]` configuration.
    ///
    /// Returns `Ok(None)` when no App is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the App is half-configured or the key is unreadable.
    pub fn from_config(config: &GitHubConfig) -> Result<Option<Self>, PatrolError> {
        match (config.app_id, config.private_key_path.as_deref()) {
            (None, None) => Ok(None),
            (Some(app_id), Some(path)) => {
                let pem = read_key(path)?;
                Self::new(app_id, &pem, &config.api_url).map(Some)
            }
            _ => Err(PatrolError::Config(
                "GITHUB_APP_ID and GITHUB_PRIVATE_KEY_PATH must be set together".into(),
            )),
        }
    }

    /// Signed RS256 JWT identifying the App, valid for nine minutes.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Config`] if signing fails.
    pub fn jwt(&self) -> Result<String, PatrolError> {
        let now = chrono::Utc::now().timestamp();
        let claims = AppClaims {
            // Backdated to tolerate clock drift.
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.to_string(),
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
            &claims,
            &self.key,
        )
        .map_err(|e| PatrolError::Config(format!("failed to sign GitHub App JWT: {e}")))
    }

    /// Exchange the App JWT for an installation access token.
    ///
    /// # Errors
    ///
    /// Returns a source-control [`ProviderError`] on API failure.
    #[instrument(skip(self))]
    pub async fn installation_token(&self, installation_id: u64) -> Result<String, PatrolError> {
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_url
        );
        let response = self
            .http
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(self.jwt()?)
            .send()
            .await
            .map_err(transport_error)?;
        let token: InstallationToken = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::new(
                    ProviderKind::SourceControl,
                    ErrorClass::InvalidResponse,
                    format!("unexpected installation token response: {e}"),
                )
            })?;
        Ok(token.token)
    }

    /// Look up the installation that covers a repository.
    ///
    /// # Errors
    ///
    /// Returns a source-control [`ProviderError`] if the App is not installed.
    #[instrument(skip(self))]
    pub async fn installation_for_repo(&self, owner: &str, repo: &str) -> Result<u64, PatrolError> {
        let url = format!("{}/repos/{owner}/{repo}/installation", self.api_url);
        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .bearer_auth(self.jwt()?)
            .send()
            .await
            .map_err(transport_error)?;
        let installation: Installation = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| {
                ProviderError::new(
                    ProviderKind::SourceControl,
                    ErrorClass::InvalidResponse,
                    format!("unexpected installation response: {e}"),
                )
            })?;
        Ok(installation.id)
    }

    /// A [`GitHubClient`] acting as the given installation.
    ///
    /// # Errors
    ///
    /// Returns an error if the token exchange fails.
    pub async fn client_for_installation(
        &self,
        installation_id: u64,
    ) -> Result<GitHubClient, PatrolError> {
        let token = self.installation_token(installation_id).await?;
        GitHubClient::with_token(token, &self.api_url)
    }
}

fn read_key(path: &Path) -> Result<Vec<u8>, PatrolError> {
    if !path.exists() {
        return Err(PatrolError::FileNotFound(path.to_path_buf()));
    }
    Ok(std::fs::read(path)?)
}
