//! HTTP surface: axum router, shared state and the job runner.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use patrol_core::{PatrolConfig, PatrolError};
use patrol_review::github::{GitHubApp, GitHubClient, PullRequestHost};
use patrol_review::pipeline::{ReviewJob, ReviewOutcome, ReviewPipeline};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, field, info, instrument, warn};

use crate::dispatch::{route_event, Dispatch, Job, JobKind, RouteSettings};
use crate::signature::{verify_signature, SIGNATURE_HEADER};

const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";

/// Executes accepted jobs. Called on a detached task after the delivery
/// has been answered, so implementations report failures themselves.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: Job);

    /// Logins the runner posts as. Their comments are never routed.
    fn own_logins(&self) -> Vec<String> {
        Vec::new()
    }
}

/// State shared by every request. Read-only after startup.
#[derive(Clone)]
pub struct AppState {
    runner: Arc<dyn JobRunner>,
    routes: Arc<RouteSettings>,
    secret: Option<Arc<str>>,
}

impl AppState {
    /// Create state; `secret` of `None` disables signature checks.
    pub fn new(
        runner: Arc<dyn JobRunner>,
        routes: RouteSettings,
        secret: Option<String>,
    ) -> Self {
        Self {
            runner,
            routes: Arc::new(routes),
            secret: secret.filter(|s| !s.is_empty()).map(Arc::from),
        }
    }
}

/// Build the router serving `webhook_path` and `/health`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use async_trait::async_trait;
/// use patrol_webhook::dispatch::{Job, RouteSettings};
/// use patrol_webhook::server::{router, AppState, JobRunner};
///
/// struct Noop;
///
/// #[async_trait]
/// impl JobRunner for Noop {
///     async fn run(&self, _job: Job) {}
/// }
///
/// let state = AppState::new(Arc::new(Noop), RouteSettings::default(), None);
/// let _app = router(state, "/webhooks/github");
/// ```
pub fn router(state: AppState, webhook_path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(webhook_path, post(webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn message(status: StatusCode, text: impl Into<String>) -> Response {
    (status, Json(json!({ "message": text.into() }))).into_response()
}

#[instrument(skip_all, fields(event = field::Empty, delivery = field::Empty))]
async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let span = tracing::Span::current();
    if let Some(delivery) = header(DELIVERY_HEADER) {
        span.record("delivery", delivery);
    }

    if let Some(secret) = &state.secret {
        if let Err(e) = verify_signature(secret, &body, header(SIGNATURE_HEADER)) {
            warn!(error = %e, "rejected delivery");
            return message(StatusCode::UNAUTHORIZED, "invalid signature");
        }
    }

    let Some(event) = header(EVENT_HEADER) else {
        return message(StatusCode::BAD_REQUEST, "missing X-GitHub-Event header");
    };
    span.record("event", event);

    match route_event(event, &body, &state.routes) {
        Ok(Dispatch::Pong { hook_id }) => {
            info!(?hook_id, "ping received");
            (
                StatusCode::OK,
                Json(json!({ "message": "pong", "hook_id": hook_id })),
            )
                .into_response()
        }
        Ok(Dispatch::Job(job)) => {
            info!(pr = %job.pr, "job accepted");
            let runner = Arc::clone(&state.runner);
            tokio::spawn(async move { runner.run(job).await });
            message(StatusCode::ACCEPTED, "accepted")
        }
        Ok(Dispatch::Ignored(reason)) => message(StatusCode::OK, format!("ignored: {reason}")),
        Err(e) => {
            warn!(error = %e, "malformed payload");
            message(StatusCode::BAD_REQUEST, format!("malformed payload: {e}"))
        }
    }
}

/// How the runner authenticates against GitHub.
enum Credentials {
    App(GitHubApp),
    Token(String),
}

/// [`JobRunner`] that talks to GitHub and runs the review pipeline.
pub struct GitHubJobRunner {
    pipeline: ReviewPipeline,
    credentials: Credentials,
    api_url: String,
    own_login: Option<String>,
}

impl GitHubJobRunner {
    /// Pick credentials from configuration, preferring App auth.
    ///
    /// # Errors
    ///
    /// Returns [`PatrolError::Config`] when neither App credentials nor a
    /// token are configured, or the App key cannot be loaded.
    pub fn from_config(
        pipeline: ReviewPipeline,
        config: &PatrolConfig,
    ) -> Result<Self, PatrolError> {
        let app = GitHubApp::from_config(&config.github)?;
        let credentials = match (app, &config.github.token) {
            (Some(app), _) => Credentials::App(app),
            (None, Some(token)) => {
                warn!("no GitHub App configured, acting with a personal token");
                Credentials::Token(token.clone())
            }
            (None, None) => {
                return Err(PatrolError::Config(
                    "set GITHUB_APP_ID and GITHUB_PRIVATE_KEY_PATH, or GITHUB_TOKEN, to serve webhooks"
                        .into(),
                ));
            }
        };
        Ok(Self {
            pipeline,
            credentials,
            api_url: config.github.api_url.clone(),
            own_login: None,
        })
    }

    /// Like [`GitHubJobRunner::from_config`], then look up the login a
    /// personal token posts as so its own comments are not routed.
    ///
    /// App comments come from a bot account and are filtered by type, so
    /// only token mode makes the `GET /user` call. A failed lookup is logged
    /// and leaves the runner without a known login.
    ///
    /// # Errors
    ///
    /// Same as [`GitHubJobRunner::from_config`].
    pub async fn connect(
        pipeline: ReviewPipeline,
        config: &PatrolConfig,
    ) -> Result<Self, PatrolError> {
        let mut runner = Self::from_config(pipeline, config)?;
        if let Credentials::Token(token) = &runner.credentials {
            let client = GitHubClient::with_token(token.clone(), &runner.api_url)?;
            match client.authenticated_login().await {
                Ok(login) => {
                    info!(%login, "token comments will not be routed");
                    runner.own_login = Some(login);
                }
                Err(e) => warn!(error = %e, "could not resolve the token's login"),
            }
        }
        Ok(runner)
    }

    async fn host_for(&self, job: &Job) -> Result<GitHubClient, PatrolError> {
        match &self.credentials {
            Credentials::Token(token) => GitHubClient::with_token(token.clone(), &self.api_url),
            Credentials::App(app) => {
                let installation = match job.installation_id {
                    Some(id) => id,
                    None => app.installation_for_repo(&job.pr.owner, &job.pr.repo).await?,
                };
                app.client_for_installation(installation).await
            }
        }
    }

    async fn execute(&self, job: Job) -> Result<(), PatrolError> {
        let host = self.host_for(&job).await?;
        let host: &dyn PullRequestHost = &host;
        match job.kind {
            JobKind::Review(command) => {
                let review = ReviewJob {
                    pr: job.pr,
                    command,
                    comment_id: job.comment_id,
                };
                match self.pipeline.run(host, &review).await? {
                    ReviewOutcome::Posted(result) => {
                        info!(pr = %review.pr, rating = ?result.rating, "review posted");
                    }
                    ReviewOutcome::NothingToReview => {
                        debug!(pr = %review.pr, "nothing to review");
                    }
                    ReviewOutcome::Discarded => {
                        info!(pr = %review.pr, "pull request closed, review discarded");
                    }
                    ReviewOutcome::Failed(e) => {
                        warn!(pr = %review.pr, error = %e, "review failed");
                    }
                }
            }
            JobKind::Help => self.pipeline.reply_help(host, &job.pr).await?,
            JobKind::UsageError(err) => {
                self.pipeline.reply_usage_error(host, &job.pr, &err).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobRunner for GitHubJobRunner {
    #[instrument(skip_all, fields(pr = %job.pr))]
    async fn run(&self, job: Job) {
        if let Err(e) = self.execute(job).await {
            error!(error = %e, "job failed");
        }
    }

    fn own_logins(&self) -> Vec<String> {
        self.own_login.iter().cloned().collect()
    }
}

/// Routing rules from configuration plus the runner's own logins.
pub fn route_settings(config: &PatrolConfig, runner: &dyn JobRunner) -> RouteSettings {
    runner
        .own_logins()
        .into_iter()
        .fold(RouteSettings::from_config(config), RouteSettings::ignore_author)
}

/// Bind to the configured address and serve until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the address is invalid or cannot be bound.
pub async fn serve(config: &PatrolConfig, runner: Arc<dyn JobRunner>) -> Result<(), PatrolError> {
    let secret = config.github.webhook_secret.clone();
    if secret.as_deref().map_or(true, str::is_empty) {
        warn!("GITHUB_WEBHOOK_SECRET is not set, webhook signatures will not be verified");
    }

    let routes = route_settings(config, runner.as_ref());
    let state = AppState::new(runner, routes, secret);
    let app = router(state, &config.server.webhook_path);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            PatrolError::Config(format!(
                "invalid listen address {}:{}: {e}",
                config.server.host, config.server.port
            ))
        })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, path = %config.server.webhook_path, "listening for webhooks");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl-C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
