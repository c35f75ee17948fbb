use patrol_core::{
    CommandError, DiffContext, ErrorClass, PatrolConfig, PatrolError, PrIdentifier,
    ProviderError, ProviderKind, ReviewCommand, ReviewResult,
};
use patrol_difflens::parser::parse_unified_diff;
use tracing::{info, instrument, warn};

use crate::format::{CommentFormatter, ReviewBody};
use crate::github::PullRequestHost;
use crate::llm::LlmGateway;
use crate::request::{RequestBuilder, ReviewRequest};
use crate::retry::RetryPolicy;

/// Reaction used to acknowledge a triggering comment.
pub const ACK_REACTION: &str = "eyes";

/// One review to perform on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewJob {
    /// Target pull request.
    pub pr: PrIdentifier,
    /// Parsed command, or the defaults for automatic reviews.
    pub command: ReviewCommand,
    /// Comment that triggered the review, acknowledged with a reaction.
    pub comment_id: Option<u64>,
}

/// A review the model answered, before anything is posted.
#[derive(Debug, Clone)]
pub struct CompletedReview {
    /// The bounded request that was sent.
    pub request: ReviewRequest,
    /// The model's answer.
    pub body: ReviewBody,
    /// Rendered comment.
    pub result: ReviewResult,
}

/// How a pull request review ended.
#[derive(Debug, Clone)]
pub enum ReviewOutcome {
    /// The review comment was posted.
    Posted(ReviewResult),
    /// Nothing reviewable remained; a notice was posted.
    NothingToReview,
    /// The pull request closed while the model was working.
    Discarded,
    /// A provider failed; an error comment was posted.
    Failed(ProviderError),
}

/// Review orchestrator: diff in, exactly one comment out.
pub struct ReviewPipeline {
    gateway: LlmGateway,
    builder: RequestBuilder,
    formatter: CommentFormatter,
    host_retry: RetryPolicy,
    acknowledge: bool,
}

impl ReviewPipeline {
    /// Assemble a pipeline from its parts.
    pub fn new(
        gateway: LlmGateway,
        builder: RequestBuilder,
        formatter: CommentFormatter,
        host_retry: RetryPolicy,
        acknowledge: bool,
    ) -> Self {
        Self {
            gateway,
            builder,
            formatter,
            host_retry,
            acknowledge,
        }
    }

    /// Assemble a pipeline from configuration around an existing gateway.
    pub fn from_config(gateway: LlmGateway, config: &PatrolConfig) -> Self {
        Self::new(
            gateway,
            RequestBuilder::from_config(&config.review),
            CommentFormatter::from_config(&config.review),
            RetryPolicy::from_config(&config.llm),
            config.review.acknowledge,
        )
    }

    /// The formatter used for every comment.
    pub fn formatter(&self) -> &CommentFormatter {
        &self.formatter
    }

    /// Model identifier of the gateway.
    pub fn model(&self) -> &str {
        self.gateway.model()
    }

    /// Build the request and ask the model, without touching any host.
    ///
    /// Returns `Ok(None)` when nothing in `context` is reviewable.
    ///
    /// # Errors
    ///
    /// Returns the gateway's [`ProviderError`] once retries are exhausted.
    pub async fn review_context(
        &self,
        command: ReviewCommand,
        context: DiffContext,
        pr: Option<PrIdentifier>,
    ) -> Result<Option<CompletedReview>, ProviderError> {
        let Some(request) = self.builder.build(command, context, pr) else {
            return Ok(None);
        };
        let reply = self.gateway.complete(&request.messages()).await?;
        let body = ReviewBody::from_reply(&reply);
        let result = self.formatter.review(&request, &body, self.gateway.model());
        Ok(Some(CompletedReview {
            request,
            body,
            result,
        }))
    }

    /// Review a pull request and post exactly one comment about it.
    ///
    /// Provider failures and unreadable diffs are reported on the pull
    /// request and returned as [`ReviewOutcome::Failed`] rather than as errors.
    ///
    /// # Errors
    ///
    /// Returns an error when a comment cannot be posted.
    #[instrument(skip_all, fields(pr = %job.pr))]
    pub async fn run(
        &self,
        host: &dyn PullRequestHost,
        job: &ReviewJob,
    ) -> Result<ReviewOutcome, PatrolError> {
        let pr = &job.pr;

        if self.acknowledge {
            if let Some(comment_id) = job.comment_id {
                if let Err(e) = host.react_to_comment(pr, comment_id, ACK_REACTION).await {
                    warn!(error = %e, "could not acknowledge comment");
                }
            }
        }

        let diff = match self
            .host_retry
            .run("fetch diff", move || host.fetch_diff(pr))
            .await
        {
            Ok(diff) => diff,
            Err(PatrolError::Provider(e)) => return self.report_failure(host, pr, e).await,
            Err(e) => return Err(e),
        };
        let context = match parse_unified_diff(&diff) {
            Ok(context) => context,
            Err(e) => {
                let error = ProviderError::new(
                    ProviderKind::SourceControl,
                    ErrorClass::InvalidResponse,
                    format!("could not parse the pull request diff: {e}"),
                );
                return self.report_failure(host, pr, error).await;
            }
        };

        let completed = match self
            .review_context(job.command.clone(), context, Some(pr.clone()))
            .await
        {
            Ok(Some(completed)) => completed,
            Ok(None) => {
                info!("no reviewable changes");
                host.post_comment(pr, &self.formatter.nothing_to_review(Some(pr)))
                    .await?;
                return Ok(ReviewOutcome::NothingToReview);
            }
            Err(e) => return self.report_failure(host, pr, e).await,
        };

        match host.is_open(pr).await {
            Ok(false) => {
                info!("pull request closed during review, discarding result");
                return Ok(ReviewOutcome::Discarded);
            }
            Ok(true) => {}
            Err(e) => warn!(error = %e, "could not check pull request state, posting anyway"),
        }

        host.post_comment(pr, &completed.result.body).await?;
        info!(rating = ?completed.result.rating, "review posted");
        Ok(ReviewOutcome::Posted(completed.result))
    }

    /// Answer `help` with the usage text.
    ///
    /// # Errors
    ///
    /// Returns an error if the comment cannot be posted.
    pub async fn reply_help(
        &self,
        host: &dyn PullRequestHost,
        pr: &PrIdentifier,
    ) -> Result<(), PatrolError> {
        host.post_comment(pr, &self.formatter.help()).await
    }

    /// Explain a malformed command.
    ///
    /// # Errors
    ///
    /// Returns an error if the comment cannot be posted.
    pub async fn reply_usage_error(
        &self,
        host: &dyn PullRequestHost,
        pr: &PrIdentifier,
        error: &CommandError,
    ) -> Result<(), PatrolError> {
        host.post_comment(pr, &self.formatter.usage_error(error)).await
    }

    async fn report_failure(
        &self,
        host: &dyn PullRequestHost,
        pr: &PrIdentifier,
        error: ProviderError,
    ) -> Result<ReviewOutcome, PatrolError> {
        warn!(error = %error, "review failed");
        host.post_comment(pr, &self.formatter.provider_error(Some(pr), &error))
            .await?;
        Ok(ReviewOutcome::Failed(error))
    }
}
