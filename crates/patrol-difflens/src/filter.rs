//! Pre-LLM file filtering to eliminate noise at the source.
//!
//! Filters out deleted files, lock files, generated code, vendored
//! dependencies, minified files, and files matching custom patterns before
//! they reach the LLM, saving prompt budget for code a reviewer cares about.

use std::path::Path;

use patrol_core::{DiffContext, FileChange, FileStatus, ReviewConfig};
use tracing::debug;

/// Files and patterns to skip before sending to the LLM.
///
/// # Examples
///
/// ```
/// use patrol_difflens::filter::DiffFilter;
///
/// let filter = DiffFilter::default_filter();
/// assert!(filter.should_skip("poetry.lock"));
/// assert!(!filter.should_skip("src/main.py"));
/// ```
pub struct DiffFilter {
    skip_patterns: Vec<glob::Pattern>,
    skip_extensions: Vec<String>,
}

impl DiffFilter {
    /// Create a filter with only the built-in rules.
    pub fn default_filter() -> Self {
        Self {
            skip_patterns: Vec::new(),
            skip_extensions: Vec::new(),
        }
    }

    /// Create a filter from review configuration.
    ///
    /// Invalid glob patterns are ignored.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::ReviewConfig;
    /// use patrol_difflens::filter::DiffFilter;
    ///
    /// let config = ReviewConfig {
    ///     skip_patterns: vec!["migrations/**".into()],
    ///     ..ReviewConfig::default()
    /// };
    /// let filter = DiffFilter::from_config(&config);
    /// assert!(filter.should_skip("migrations/0001_initial.py"));
    /// ```
    pub fn from_config(config: &ReviewConfig) -> Self {
        let skip_patterns = config
            .skip_patterns
            .iter()
            .filter_map(|pat| match glob::Pattern::new(pat) {
                Ok(p) => Some(p),
                Err(e) => {
                    debug!(pattern = %pat, error = %e, "ignoring invalid skip pattern");
                    None
                }
            })
            .collect();

        Self {
            skip_patterns,
            skip_extensions: config.skip_extensions.clone(),
        }
    }

    /// Check if a single file path should be skipped by name alone.
    pub fn should_skip(&self, path: &str) -> bool {
        self.check_skip(path, "").is_some()
    }

    /// Split a diff into reviewable files and skipped ones, preserving order.
    ///
    /// # Examples
    ///
    /// ```
    /// use patrol_core::{DiffContext, FileChange};
    /// use patrol_difflens::filter::DiffFilter;
    ///
    /// let context = DiffContext::new(vec![
    ///     FileChange::from_source("src/app.py", "x = 1\n"),
    ///     FileChange::from_source("Cargo.lock", "version = 3\n"),
    /// ]);
    /// let result = DiffFilter::default_filter().filter(context);
    /// assert_eq!(result.kept.files.len(), 1);
    /// assert_eq!(result.skipped.len(), 1);
    /// ```
    pub fn filter(&self, context: DiffContext) -> FilterResult {
        let mut kept = Vec::new();
        let mut skipped = Vec::new();

        for file in context.files {
            let reason = if file.status == FileStatus::Removed {
                Some(SkipReason::Removed)
            } else {
                self.check_skip(&file.path, &collect_hunk_content(&file))
            };

            match reason {
                Some(reason) => {
                    debug!(path = %file.path, %reason, "skipping file");
                    skipped.push(SkippedFile {
                        path: file.path,
                        reason,
                    });
                }
                None => kept.push(file),
            }
        }

        FilterResult {
            kept: DiffContext::new(kept),
            skipped,
        }
    }

    fn check_skip(&self, path_str: &str, content: &str) -> Option<SkipReason> {
        let path = Path::new(path_str);
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_lock_file(&file_name) {
            return Some(SkipReason::LockFile);
        }

        if is_vendored(path_str) {
            return Some(SkipReason::VendoredCode);
        }

        if is_minified(&file_name, content) {
            return Some(SkipReason::MinifiedFile);
        }

        if is_generated_by_name(&file_name) || is_generated_by_content(content) {
            return Some(SkipReason::GeneratedFile);
        }

        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if let Some(skip_ext) = self.skip_extensions.iter().find(|s| s.as_str() == ext) {
                return Some(SkipReason::PatternMatch(format!("*.{skip_ext}")));
            }
        }

        self.skip_patterns
            .iter()
            .find(|pat| pat.matches(path_str))
            .map(|pat| SkipReason::PatternMatch(pat.to_string()))
    }
}

fn collect_hunk_content(file: &FileChange) -> String {
    let mut content = String::new();
    for hunk in &file.hunks {
        content.push_str(&hunk.content);
    }
    content
}

/// Result of filtering a diff.
pub struct FilterResult {
    /// Files that passed the filter, in original order.
    pub kept: DiffContext,
    /// Files that were skipped with reasons.
    pub skipped: Vec<SkippedFile>,
}

/// A file that was skipped during filtering.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    /// Path of the skipped file.
    pub path: String,
    /// Why the file was skipped.
    pub reason: SkipReason,
}

/// Reason a file was skipped.
///
/// # Examples
///
/// ```
/// use patrol_difflens::filter::SkipReason;
///
/// assert_eq!(SkipReason::LockFile.to_string(), "lock file");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The file was deleted; there is nothing left to review.
    Removed,
    /// Package manager lock file.
    LockFile,
    /// Auto-generated code.
    GeneratedFile,
    /// Third-party vendored code.
    VendoredCode,
    /// Minified or bundled file.
    MinifiedFile,
    /// Matched a custom skip pattern or extension.
    PatternMatch(String),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Removed => write!(f, "removed"),
            SkipReason::LockFile => write!(f, "lock file"),
            SkipReason::GeneratedFile => write!(f, "generated file"),
            SkipReason::VendoredCode => write!(f, "vendored code"),
            SkipReason::MinifiedFile => write!(f, "minified file"),
            SkipReason::PatternMatch(pat) => write!(f, "pattern: {pat}"),
        }
    }
}

const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "Cargo.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Pipfile.lock",
    "uv.lock",
    "Gemfile.lock",
    "composer.lock",
    "go.sum",
];

fn is_lock_file(file_name: &str) -> bool {
    LOCK_FILES.contains(&file_name)
}

fn is_vendored(path: &str) -> bool {
    path.split('/').any(|part| {
        matches!(
            part,
            "vendor" | "third_party" | "node_modules" | ".venv" | "site-packages"
        )
    })
}

fn is_minified(file_name: &str, content: &str) -> bool {
    if file_name.ends_with(".min.js") || file_name.ends_with(".min.css") {
        return true;
    }
    // Any line longer than 500 chars suggests a bundle.
    content.lines().any(|line| line.len() > 500)
}

fn is_generated_by_name(file_name: &str) -> bool {
    file_name.contains(".generated.")
        || file_name.ends_with("_pb2.py")
        || file_name.ends_with(".g.dart")
        || file_name.ends_with(".pb.go")
        || file_name.ends_with(".pb.rs")
}

fn is_generated_by_content(content: &str) -> bool {
    content.lines().take(5).any(|line| {
        let text = line.get(1..).unwrap_or("");
        text.contains("// Code generated")
            || text.contains("# AUTO-GENERATED")
            || text.contains("# Generated by the protocol buffer compiler")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_unified_diff;

    fn make_diff(path: &str, content: &str) -> DiffContext {
        let diff = format!(
            "diff --git a/{path} b/{path}\n\
             --- a/{path}\n\
             +++ b/{path}\n\
             @@ -1,1 +1,2 @@\n \
             context\n\
             {content}\n"
        );
        parse_unified_diff(&diff).unwrap()
    }

    #[test]
    fn lock_files_skipped() {
        let filter = DiffFilter::default_filter();
        for name in LOCK_FILES {
            let result = filter.filter(make_diff(name, "+new line"));
            assert!(result.kept.files.is_empty(), "expected {name} to be skipped");
            assert_eq!(result.skipped.len(), 1);
            assert_eq!(result.skipped[0].reason, SkipReason::LockFile);
        }
    }

    #[test]
    fn generated_files_skipped_by_name() {
        let filter = DiffFilter::default_filter();
        for name in &["api.generated.ts", "service_pb2.py", "proto.pb.go"] {
            let result = filter.filter(make_diff(name, "+new line"));
            assert!(result.kept.files.is_empty(), "expected {name} to be skipped");
            assert_eq!(result.skipped[0].reason, SkipReason::GeneratedFile);
        }
    }

    #[test]
    fn generated_files_skipped_by_header() {
        let filter = DiffFilter::default_filter();
        let result = filter.filter(make_diff("gen.go", "+// Code generated by protoc. DO NOT EDIT."));
        assert!(result.kept.files.is_empty());
        assert_eq!(result.skipped[0].reason, SkipReason::GeneratedFile);
    }

    #[test]
    fn minified_files_skipped() {
        let filter = DiffFilter::default_filter();

        let result = filter.filter(make_diff("app.min.js", "+var x=1;"));
        assert_eq!(result.skipped[0].reason, SkipReason::MinifiedFile);

        let long_line = format!("+{}", "x".repeat(501));
        let result = filter.filter(make_diff("bundle.js", &long_line));
        assert_eq!(result.skipped[0].reason, SkipReason::MinifiedFile);
    }

    #[test]
    fn vendored_code_skipped() {
        let filter = DiffFilter::default_filter();
        for path in &["vendor/lib.go", "third_party/dep.py", "node_modules/pkg/index.js"] {
            let result = filter.filter(make_diff(path, "+line"));
            assert!(result.kept.files.is_empty(), "expected {path} to be skipped");
            assert_eq!(result.skipped[0].reason, SkipReason::VendoredCode);
        }
    }

    #[test]
    fn removed_files_skipped() {
        let diff = "\
diff --git a/old.py b/old.py
deleted file mode 100644
--- a/old.py
+++ /dev/null
@@ -1 +0,0 @@
-x = 1
";
        let result = DiffFilter::default_filter().filter(parse_unified_diff(diff).unwrap());
        assert!(result.kept.files.is_empty());
        assert_eq!(result.skipped[0].reason, SkipReason::Removed);
        assert_eq!(result.skipped[0].path, "old.py");
    }

    #[test]
    fn normal_source_files_kept() {
        let filter = DiffFilter::default_filter();
        let result = filter.filter(make_diff("src/main.py", "+x = 1"));
        assert_eq!(result.kept.files.len(), 1);
        assert!(result.skipped.is_empty());
    }

    #[test]
    fn custom_patterns_and_extensions_from_config() {
        let config = ReviewConfig {
            skip_patterns: vec!["tests/fixtures/**".into(), "[".into()],
            skip_extensions: vec!["snap".into()],
            ..ReviewConfig::default()
        };
        let filter = DiffFilter::from_config(&config);

        let result = filter.filter(make_diff("tests/fixtures/data.py", "+x"));
        assert!(matches!(result.skipped[0].reason, SkipReason::PatternMatch(_)));

        let result = filter.filter(make_diff("component.test.snap", "+snapshot"));
        assert_eq!(
            result.skipped[0].reason,
            SkipReason::PatternMatch("*.snap".into())
        );

        let result = filter.filter(make_diff("src/auth.py", "+real code"));
        assert_eq!(result.kept.files.len(), 1);
    }

    #[test]
    fn order_preserved() {
        let context = DiffContext::new(vec![
            FileChange::from_source("b.py", "b\n"),
            FileChange::from_source("yarn.lock", "x\n"),
            FileChange::from_source("a.py", "a\n"),
        ]);
        let result = DiffFilter::default_filter().filter(context);
        let paths: Vec<&str> = result.kept.paths().collect();
        assert_eq!(paths, vec!["b.py", "a.py"]);
    }
}
