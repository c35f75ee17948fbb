use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PatrolError;

/// How the review text should read.
///
/// Known names are matched case-insensitively; anything else is kept as a
/// free-text instruction.
///
/// # Examples
///
/// ```
/// use patrol_core::ReviewStyle;
///
/// assert_eq!(ReviewStyle::parse("Detailed"), ReviewStyle::Detailed);
/// assert_eq!(
///     ReviewStyle::parse("like a pirate"),
///     ReviewStyle::Custom("like a pirate".into())
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStyle {
    /// Short, only the most important points.
    #[default]
    Concise,
    /// Thorough, with explanations and examples.
    Detailed,
    /// A handful of bullet points.
    Brief,
    /// Caller-provided instruction.
    Custom(String),
}

impl ReviewStyle {
    /// Parse a style name, falling back to [`ReviewStyle::Custom`].
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_lowercase().as_str() {
            "" | "concise" => ReviewStyle::Concise,
            "detailed" | "verbose" => ReviewStyle::Detailed,
            "brief" | "short" => ReviewStyle::Brief,
            _ => ReviewStyle::Custom(trimmed.to_string()),
        }
    }

    /// Writing instruction placed in the prompt.
    pub fn instruction(&self) -> &str {
        match self {
            ReviewStyle::Concise => "Be concise and focus only on the most important aspects.",
            ReviewStyle::Detailed => {
                "Be thorough: explain each issue, why it matters, and show a concrete fix."
            }
            ReviewStyle::Brief => "Keep it brief: at most five short bullet points.",
            ReviewStyle::Custom(text) => text,
        }
    }
}

impl fmt::Display for ReviewStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStyle::Concise => write!(f, "concise"),
            ReviewStyle::Detailed => write!(f, "detailed"),
            ReviewStyle::Brief => write!(f, "brief"),
            ReviewStyle::Custom(text) => write!(f, "{text}"),
        }
    }
}

/// A parsed `review` command.
///
/// `areas` is never empty: construction falls back to defaults.
///
/// # Examples
///
/// ```
/// use patrol_core::{ReviewCommand, ReviewStyle};
///
/// let cmd = ReviewCommand::with_defaults(&["Security".into()], ReviewStyle::Concise);
/// assert!(cmd.areas.contains("security"));
/// assert!(!cmd.explicit_areas);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCommand {
    /// Normalized review areas, ordered.
    pub areas: BTreeSet<String>,
    /// Requested writing style.
    pub style: ReviewStyle,
    /// Files to restrict the review to; empty means all changed files.
    pub files: Vec<String>,
    /// Whether the user named the areas (as opposed to defaults).
    pub explicit_areas: bool,
}

/// Used when configuration supplies no usable default areas.
const FALLBACK_AREA: &str = "code quality";

impl ReviewCommand {
    /// Build a command from configured defaults.
    pub fn with_defaults(default_areas: &[String], style: ReviewStyle) -> Self {
        let mut areas: BTreeSet<String> = default_areas
            .iter()
            .filter_map(|a| Self::normalize_area(a))
            .collect();
        if areas.is_empty() {
            areas.insert(FALLBACK_AREA.to_string());
        }
        Self {
            areas,
            style,
            files: Vec::new(),
            explicit_areas: false,
        }
    }

    /// Trim and lower-case an area name; `None` when nothing is left.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::ReviewCommand;
    ///
    /// assert_eq!(ReviewCommand::normalize_area("  Error Handling "), Some("error handling".into()));
    /// assert_eq!(ReviewCommand::normalize_area("   "), None);
    /// ```
    pub fn normalize_area(raw: &str) -> Option<String> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            None
        } else {
            Some(collapsed.to_lowercase())
        }
    }

    /// Add language-specific areas for the given paths.
    ///
    /// Has no effect when the user named the areas explicitly.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::{ReviewCommand, ReviewStyle};
    ///
    /// let mut cmd = ReviewCommand::with_defaults(&[], ReviewStyle::Concise);
    /// cmd.extend_for_paths(["app/models.py"]);
    /// assert!(cmd.areas.contains("python"));
    /// assert!(cmd.areas.contains("documentation"));
    /// ```
    pub fn extend_for_paths<'a, I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.explicit_areas {
            return;
        }
        for path in paths {
            let ext = path
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_lowercase())
                .unwrap_or_default();
            let extra: &[&str] = match ext.as_str() {
                "py" => &["python", "documentation", "variable naming"],
                "js" | "ts" | "jsx" | "tsx" => &["javascript", "typescript"],
                "html" | "css" => &["web", "ui"],
                "rs" => &["rust", "ownership"],
                _ => &[],
            };
            self.areas.extend(extra.iter().map(|a| a.to_string()));
        }
    }

    /// Areas joined for display and prompts.
    pub fn areas_label(&self) -> String {
        self.areas.iter().cloned().collect::<Vec<_>>().join(", ")
    }
}

/// A pull request on a hosted repository.
///
/// # Examples
///
/// ```
/// use patrol_core::PrIdentifier;
///
/// let pr: PrIdentifier = "octocat/hello-world#42".parse().unwrap();
/// assert_eq!(pr.owner, "octocat");
/// assert_eq!(pr.repo, "hello-world");
/// assert_eq!(pr.number, 42);
/// assert_eq!(pr.to_string(), "octocat/hello-world#42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrIdentifier {
    /// Repository owner (user or organization).
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl PrIdentifier {
    /// Create an identifier from parts.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }

    /// `owner/repo` without the number.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

impl fmt::Display for PrIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

impl FromStr for PrIdentifier {
    type Err = PatrolError;

    fn from_str(pr_ref: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            PatrolError::Config(format!(
                "invalid PR reference '{pr_ref}', expected owner/repo#number"
            ))
        };
        let (owner_repo, number_str) = pr_ref.split_once('#').ok_or_else(invalid)?;
        let (owner, repo) = owner_repo.split_once('/').ok_or_else(invalid)?;
        if owner.is_empty() || repo.is_empty() {
            return Err(invalid());
        }
        let number: u64 = number_str
            .parse()
            .map_err(|_| PatrolError::Config(format!("invalid PR number: {number_str}")))?;
        Ok(Self::new(owner, repo, number))
    }
}

/// A `start,count` line range from a hunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    /// First line (1-based; 0 for empty ranges).
    pub start: u32,
    /// Number of lines.
    pub count: u32,
}

impl LineRange {
    /// Create a range.
    pub fn new(start: u32, count: u32) -> Self {
        Self { start, count }
    }
}

/// A single hunk of a file change.
///
/// # Examples
///
/// ```
/// use patrol_core::{Hunk, LineRange};
///
/// let hunk = Hunk {
///     old_range: LineRange::new(1, 3),
///     new_range: LineRange::new(1, 4),
///     content: " a\n+b\n c\n d\n".into(),
/// };
/// assert_eq!(hunk.header(), "@@ -1,3 +1,4 @@");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hunk {
    /// Range in the old version.
    pub old_range: LineRange,
    /// Range in the new version.
    pub new_range: LineRange,
    /// Raw `+`/`-`/` ` lines, each newline-terminated.
    pub content: String,
}

impl Hunk {
    /// Unified-diff header line for this hunk.
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_range.start, self.old_range.count, self.new_range.start, self.new_range.count
        )
    }
}

/// Status of a changed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Newly created.
    Added,
    /// Changed in place.
    Modified,
    /// Deleted.
    Removed,
    /// Moved, possibly with changes.
    Renamed,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileStatus::Added => write!(f, "added"),
            FileStatus::Modified => write!(f, "modified"),
            FileStatus::Removed => write!(f, "removed"),
            FileStatus::Renamed => write!(f, "renamed"),
        }
    }
}

/// All hunks for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Path in the new version (old path for removed files).
    pub path: String,
    /// How the file changed.
    pub status: FileStatus,
    /// Hunks in diff order.
    pub hunks: Vec<Hunk>,
}

impl FileChange {
    /// Represent a whole source file as a newly added file.
    ///
    /// Used for local reviews where there is no diff.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::{FileChange, FileStatus};
    ///
    /// let change = FileChange::from_source("main.py", "import os\nprint(os.name)\n");
    /// assert_eq!(change.status, FileStatus::Added);
    /// assert_eq!(change.hunks[0].new_range.count, 2);
    /// assert_eq!(change.hunks[0].content, "+import os\n+print(os.name)\n");
    /// ```
    pub fn from_source(path: impl Into<String>, source: &str) -> Self {
        let mut content = String::with_capacity(source.len() + source.len() / 20);
        let mut count = 0u32;
        for line in source.lines() {
            content.push('+');
            content.push_str(line);
            content.push('\n');
            count += 1;
        }
        let hunks = if count == 0 {
            Vec::new()
        } else {
            vec![Hunk {
                old_range: LineRange::new(0, 0),
                new_range: LineRange::new(1, count),
                content,
            }]
        };
        Self {
            path: path.into(),
            status: FileStatus::Added,
            hunks,
        }
    }
}

/// Ordered file changes of a pull request or local review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffContext {
    /// Changed files in diff order.
    pub files: Vec<FileChange>,
}

impl DiffContext {
    /// Wrap a list of changes.
    pub fn new(files: Vec<FileChange>) -> Self {
        Self { files }
    }

    /// Whether there is nothing to review.
    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|f| f.hunks.is_empty())
    }

    /// Total hunk count across files.
    pub fn total_hunks(&self) -> usize {
        self.files.iter().map(|f| f.hunks.len()).sum()
    }

    /// Changed paths in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.path.as_str())
    }
}

/// Record of what the request builder left out to stay within budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Truncation {
    /// Files with no hunk included at all.
    pub omitted_files: usize,
    /// Hunks dropped entirely.
    pub omitted_hunks: usize,
    /// Whether one hunk was cut mid-way.
    pub partial_hunk: bool,
    /// Size of the full rendered diff.
    pub original_bytes: usize,
    /// Lines of the full rendered diff.
    pub original_lines: usize,
    /// Byte ceiling that applied.
    pub limit_bytes: usize,
    /// Line ceiling that applied.
    pub limit_lines: usize,
}

impl fmt::Display for Truncation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "diff truncated from {} bytes / {} lines to fit {} bytes / {} lines",
            self.original_bytes, self.original_lines, self.limit_bytes, self.limit_lines
        )?;
        if self.omitted_files > 0 || self.omitted_hunks > 0 {
            write!(
                f,
                " ({} files and {} hunks omitted)",
                self.omitted_files, self.omitted_hunks
            )?;
        }
        Ok(())
    }
}

/// Structured review returned by the model.
///
/// # Examples
///
/// ```
/// use patrol_core::ReviewFeedback;
///
/// let fb = ReviewFeedback { issues: vec![], rating: 7, suggestion: String::new() };
/// assert!(fb.passed(6));
/// assert!(!fb.passed(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewFeedback {
    /// Issues identified, most important first.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Overall quality rating, 1 to 10.
    pub rating: u8,
    /// Actionable improvement suggestion.
    #[serde(default)]
    pub suggestion: String,
}

impl ReviewFeedback {
    /// Whether the rating clears the threshold (strictly greater).
    pub fn passed(&self, threshold: u8) -> bool {
        self.rating > threshold
    }
}

/// The comment produced for one review request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResult {
    /// Markdown body, already within the platform size limit.
    pub body: String,
    /// When the result was produced.
    pub created_at: DateTime<Utc>,
    /// Model that produced the review.
    pub model: String,
    /// Rating, when the model returned structured output.
    pub rating: Option<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_parse_known_and_custom() {
        assert_eq!(ReviewStyle::parse("concise"), ReviewStyle::Concise);
        assert_eq!(ReviewStyle::parse("  BRIEF "), ReviewStyle::Brief);
        assert_eq!(ReviewStyle::parse(""), ReviewStyle::Concise);
        assert_eq!(
            ReviewStyle::parse(" Be very detailed "),
            ReviewStyle::Custom("Be very detailed".into())
        );
        assert_eq!(
            ReviewStyle::Custom("x y".into()).instruction(),
            "x y"
        );
    }

    #[test]
    fn defaults_never_empty() {
        let cmd = ReviewCommand::with_defaults(&["  ".into()], ReviewStyle::Concise);
        assert_eq!(cmd.areas.len(), 1);
        assert!(cmd.areas.contains("code quality"));
    }

    #[test]
    fn explicit_areas_not_extended() {
        let mut cmd = ReviewCommand::with_defaults(&["security".into()], ReviewStyle::Concise);
        cmd.explicit_areas = true;
        cmd.extend_for_paths(["web/index.html", "src/lib.rs"]);
        assert_eq!(cmd.areas_label(), "security");
    }

    #[test]
    fn extend_for_paths_by_extension() {
        let mut cmd = ReviewCommand::with_defaults(&[], ReviewStyle::Concise);
        cmd.extend_for_paths(["web/index.HTML", "src/lib.rs", "Makefile"]);
        assert!(cmd.areas.contains("web"));
        assert!(cmd.areas.contains("ui"));
        assert!(cmd.areas.contains("rust"));
        assert!(!cmd.areas.contains("python"));
    }

    #[test]
    fn pr_identifier_rejects_bad_input() {
        assert!("owner/repo".parse::<PrIdentifier>().is_err());
        assert!("repo#123".parse::<PrIdentifier>().is_err());
        assert!("owner/repo#abc".parse::<PrIdentifier>().is_err());
        assert!("/repo#1".parse::<PrIdentifier>().is_err());
    }

    #[test]
    fn from_source_empty_file_has_no_hunks() {
        let change = FileChange::from_source("empty.py", "");
        assert!(change.hunks.is_empty());
        assert!(DiffContext::new(vec![change]).is_empty());
    }

    #[test]
    fn truncation_note_mentions_limits() {
        let t = Truncation {
            omitted_files: 2,
            omitted_hunks: 5,
            partial_hunk: true,
            original_bytes: 100_000,
            original_lines: 3_000,
            limit_bytes: 60_000,
            limit_lines: 1_500,
        };
        let text = t.to_string();
        assert!(text.contains("100000 bytes"));
        assert!(text.contains("60000 bytes"));
        assert!(text.contains("2 files and 5 hunks omitted"));
    }
}
