//! Building a bounded review request from a command and a diff.
//!
//! The builder narrows the diff to reviewable files, then renders it greedily
//! in file and hunk order until the byte or line budget is reached. The result
//! never exceeds the budget and depends only on its inputs.

use patrol_core::{DiffContext, FileChange, PrIdentifier, ReviewCommand, ReviewConfig, Truncation};
use patrol_difflens::filter::{DiffFilter, SkippedFile};
use tracing::{debug, warn};

use crate::llm::ChatMessage;
use crate::prompt::{build_review_prompt, build_system_prompt};

/// Size ceiling for the rendered diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffBudget {
    /// Maximum rendered bytes.
    pub max_bytes: usize,
    /// Maximum rendered lines.
    pub max_lines: usize,
}

impl DiffBudget {
    /// Read the ceiling from the `[review]` configuration section.
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            max_bytes: config.max_diff_bytes,
            max_lines: config.max_diff_lines,
        }
    }
}

impl Default for DiffBudget {
    fn default() -> Self {
        Self::from_config(&ReviewConfig::default())
    }
}

/// Everything the model is asked about for one triggering comment.
///
/// Built once by [`RequestBuilder::build`] and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequest {
    command: ReviewCommand,
    context: DiffContext,
    pr: Option<PrIdentifier>,
    truncation: Option<Truncation>,
    diff_text: String,
    skipped: Vec<String>,
}

impl ReviewRequest {
    /// The command, with language areas added for the reviewed paths.
    pub fn command(&self) -> &ReviewCommand {
        &self.command
    }

    /// The filtered diff the text was rendered from.
    pub fn context(&self) -> &DiffContext {
        &self.context
    }

    /// The pull request under review, `None` for local files.
    pub fn pr(&self) -> Option<&PrIdentifier> {
        self.pr.as_ref()
    }

    /// What was left out to stay within budget.
    pub fn truncation(&self) -> Option<&Truncation> {
        self.truncation.as_ref()
    }

    /// The rendered, bounded diff.
    pub fn diff_text(&self) -> &str {
        &self.diff_text
    }

    /// Paths dropped by the noise filter, with the reason.
    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    /// System and user messages for the chat call.
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(build_system_prompt()),
            ChatMessage::user(build_review_prompt(self)),
        ]
    }
}

/// Turns commands and diffs into [`ReviewRequest`]s.
///
/// # Examples
///
/// ```
/// use patrol_core::{DiffContext, FileChange, ReviewCommand, ReviewStyle};
/// use patrol_review::request::RequestBuilder;
///
/// let builder = RequestBuilder::default();
/// let command = ReviewCommand::with_defaults(&[], ReviewStyle::Concise);
/// let context = DiffContext::new(vec![FileChange::from_source("app.py", "x = 1\n")]);
///
/// let request = builder.build(command, context, None).unwrap();
/// assert!(request.diff_text().contains("+x = 1"));
/// assert!(request.command().areas.contains("python"));
/// assert!(request.truncation().is_none());
/// ```
pub struct RequestBuilder {
    budget: DiffBudget,
    filter: DiffFilter,
}

impl RequestBuilder {
    /// Create a builder with an explicit budget and filter.
    pub fn new(budget: DiffBudget, filter: DiffFilter) -> Self {
        Self { budget, filter }
    }

    /// Create a builder from the `[review]` configuration section.
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self::new(DiffBudget::from_config(config), DiffFilter::from_config(config))
    }

    /// Build the request, or `None` when no reviewable change remains or
    /// the budget leaves no room for a single changed line.
    pub fn build(
        &self,
        mut command: ReviewCommand,
        context: DiffContext,
        pr: Option<PrIdentifier>,
    ) -> Option<ReviewRequest> {
        let context = restrict_to_files(context, &command.files);
        let filtered = self.filter.filter(context);
        let files: Vec<FileChange> = filtered
            .kept
            .files
            .into_iter()
            .filter(|f| !f.hunks.is_empty())
            .collect();

        if files.is_empty() {
            debug!(skipped = filtered.skipped.len(), "no reviewable changes");
            return None;
        }

        let context = DiffContext::new(files);
        command.extend_for_paths(context.paths());

        let (diff_text, truncation) = render_bounded(&context, self.budget);
        if let Some(t) = &truncation {
            debug!(
                original_bytes = t.original_bytes,
                omitted_files = t.omitted_files,
                omitted_hunks = t.omitted_hunks,
                "diff truncated to budget"
            );
        }
        if diff_text.is_empty() {
            warn!(
                max_bytes = self.budget.max_bytes,
                max_lines = self.budget.max_lines,
                "diff budget too small for a single changed line"
            );
            return None;
        }

        Some(ReviewRequest {
            command,
            context,
            pr,
            truncation,
            diff_text,
            skipped: filtered.skipped.iter().map(describe_skip).collect(),
        })
    }
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new(DiffBudget::default(), DiffFilter::default_filter())
    }
}

fn describe_skip(skipped: &SkippedFile) -> String {
    format!("{} ({})", skipped.path, skipped.reason)
}

/// Keep only files the command names, by exact path, trailing path
/// components, or directory prefix. An empty list keeps everything.
fn restrict_to_files(context: DiffContext, wanted: &[String]) -> DiffContext {
    if wanted.is_empty() {
        return context;
    }
    let matches = |path: &str| {
        wanted.iter().any(|w| {
            let w = w.trim_start_matches("./");
            let dir = w.trim_end_matches('/');
            path == w
                || path.ends_with(&format!("/{w}"))
                || (!dir.is_empty() && path.starts_with(&format!("{dir}/")))
        })
    };
    DiffContext::new(
        context
            .files
            .into_iter()
            .filter(|f| matches(&f.path))
            .collect(),
    )
}

fn file_header(file: &FileChange) -> String {
    format!("--- a/{p}\n+++ b/{p}\n", p = file.path)
}

fn hunk_lines(content: &str) -> impl Iterator<Item = String> + '_ {
    content.lines().map(|line| format!("{line}\n"))
}

fn render_full(context: &DiffContext) -> String {
    let mut out = String::new();
    for file in &context.files {
        out.push_str(&file_header(file));
        for hunk in &file.hunks {
            out.push_str(&hunk.header());
            out.push('\n');
            out.extend(hunk_lines(&hunk.content));
        }
    }
    out
}

/// Rendered text that tracks its own line count.
struct Budgeted {
    text: String,
    lines: usize,
    budget: DiffBudget,
}

impl Budgeted {
    fn fits(&self, extra: &str) -> bool {
        self.text.len() + extra.len() <= self.budget.max_bytes
            && self.lines + extra.matches('\n').count() <= self.budget.max_lines
    }

    fn push(&mut self, extra: &str) {
        self.lines += extra.matches('\n').count();
        self.text.push_str(extra);
    }
}

/// Render greedily within `budget`, cutting at most one hunk mid-way.
fn render_bounded(context: &DiffContext, budget: DiffBudget) -> (String, Option<Truncation>) {
    let mut out = Budgeted {
        text: String::new(),
        lines: 0,
        budget,
    };
    let mut truncated = false;
    let mut partial_hunk = false;
    let mut omitted_files = 0;
    let mut omitted_hunks = 0;

    for file in &context.files {
        if truncated {
            omitted_files += 1;
            omitted_hunks += file.hunks.len();
            continue;
        }

        let mut started = false;
        for hunk in &file.hunks {
            if truncated {
                omitted_hunks += 1;
                continue;
            }

            let mut head = if started {
                String::new()
            } else {
                file_header(file)
            };
            head.push_str(&hunk.header());
            head.push('\n');

            let body: String = hunk_lines(&hunk.content).collect();
            if out.fits(&format!("{head}{body}")) {
                out.push(&head);
                out.push(&body);
                started = true;
                continue;
            }

            truncated = true;
            let mut partial = head;
            let mut kept_lines = 0;
            for line in hunk_lines(&hunk.content) {
                if !out.fits(&format!("{partial}{line}")) {
                    break;
                }
                partial.push_str(&line);
                kept_lines += 1;
            }
            if kept_lines > 0 {
                out.push(&partial);
                partial_hunk = true;
                started = true;
            } else {
                omitted_hunks += 1;
            }
        }

        if truncated && !started {
            omitted_files += 1;
        }
    }

    if !truncated {
        return (out.text, None);
    }

    let full = render_full(context);
    let truncation = Truncation {
        omitted_files,
        omitted_hunks,
        partial_hunk,
        original_bytes: full.len(),
        original_lines: full.matches('\n').count(),
        limit_bytes: budget.max_bytes,
        limit_lines: budget.max_lines,
    };
    (out.text, Some(truncation))
}
