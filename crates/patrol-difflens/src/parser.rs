use patrol_core::{DiffContext, FileChange, FileStatus, Hunk, LineRange, PatrolError};

/// Per-file state while scanning a diff.
#[derive(Default)]
struct PendingFile {
    old_path: String,
    new_path: String,
    hunks: Vec<Hunk>,
    is_new_file: bool,
    is_deleted_file: bool,
    is_rename: bool,
    is_binary: bool,
}

impl PendingFile {
    fn from_git_header(rest: &str) -> Self {
        let mut file = PendingFile::default();
        // `a/<old> b/<new>`; paths with spaces make the split ambiguous, so
        // take the last ` b/` and let `---`/`+++` lines correct it later.
        if let Some(idx) = rest.rfind(" b/") {
            file.old_path = parse_path(&rest[..idx]);
            file.new_path = parse_path(&rest[idx + 1..]);
        }
        file
    }

    fn finish(self) -> Option<FileChange> {
        if self.is_binary {
            return None;
        }
        let status = if self.is_new_file {
            FileStatus::Added
        } else if self.is_deleted_file {
            FileStatus::Removed
        } else if self.is_rename {
            FileStatus::Renamed
        } else {
            FileStatus::Modified
        };
        let path = if status == FileStatus::Removed {
            self.old_path
        } else {
            self.new_path
        };
        Some(FileChange {
            path,
            status,
            hunks: self.hunks,
        })
    }
}

/// Parse a unified diff string (as produced by `git diff` or the GitHub
/// `application/vnd.github.v3.diff` media type) into a [`DiffContext`].
///
/// Handles new, deleted, and renamed files. Binary files are skipped.
/// File and hunk order follow the input.
///
/// # Errors
///
/// Returns [`PatrolError::Parse`] if a hunk header is malformed.
///
/// # Examples
///
/// ```
/// use patrol_difflens::parser::parse_unified_diff;
///
/// let diff = [
///     "diff --git a/hello.py b/hello.py",
///     "--- a/hello.py",
///     "+++ b/hello.py",
///     "@@ -1,2 +1,3 @@",
///     " def main():",
///     "+    print(\"hello\")",
///     "     pass",
/// ]
/// .join("\n");
/// let context = parse_unified_diff(&diff).unwrap();
/// assert_eq!(context.files.len(), 1);
/// assert_eq!(context.files[0].path, "hello.py");
/// assert_eq!(context.files[0].hunks[0].content.lines().count(), 3);
/// ```
pub fn parse_unified_diff(input: &str) -> Result<DiffContext, PatrolError> {
    let mut files: Vec<FileChange> = Vec::new();
    let mut current: Option<PendingFile> = None;
    let mut current_hunk: Option<Hunk> = None;
    // Lines still expected in the open hunk, from its header counts.
    let mut remaining_old = 0u32;
    let mut remaining_new = 0u32;

    for line in input.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            flush_hunk(&mut current, &mut current_hunk);
            if let Some(file) = current.take().and_then(PendingFile::finish) {
                files.push(file);
            }
            current = Some(PendingFile::from_git_header(rest));
            continue;
        }

        // Plain patches lack the `diff --git` line; a `---` header outside a
        // hunk starts a new file.
        if line.starts_with("--- ") && current_hunk.is_none() {
            let starts_new = match &current {
                None => true,
                Some(file) => !file.hunks.is_empty(),
            };
            if starts_new {
                if let Some(file) = current.take().and_then(PendingFile::finish) {
                    files.push(file);
                }
                current = Some(PendingFile::default());
            }
        }

        let Some(file) = current.as_mut() else {
            continue;
        };

        if line.starts_with("Binary files ") && line.ends_with(" differ") {
            file.is_binary = true;
            continue;
        }

        if line.starts_with("new file mode") {
            file.is_new_file = true;
            continue;
        }

        if line.starts_with("deleted file mode") {
            file.is_deleted_file = true;
            continue;
        }

        if let Some(path) = line.strip_prefix("rename from ") {
            file.is_rename = true;
            file.old_path = path.to_string();
            continue;
        }

        if let Some(path) = line.strip_prefix("rename to ") {
            file.is_rename = true;
            file.new_path = path.to_string();
            continue;
        }

        if line.starts_with("index ")
            || line.starts_with("similarity index")
            || line.starts_with("old mode")
            || line.starts_with("new mode")
        {
            continue;
        }

        if current_hunk.is_none() {
            if let Some(path) = line.strip_prefix("--- ") {
                let path = parse_path(path);
                if path == "/dev/null" {
                    file.is_new_file = true;
                } else {
                    file.old_path = path;
                }
                continue;
            }

            if let Some(path) = line.strip_prefix("+++ ") {
                let path = parse_path(path);
                if path == "/dev/null" {
                    file.is_deleted_file = true;
                } else {
                    file.new_path = path;
                }
                continue;
            }
        }

        if line.starts_with("@@ ") {
            flush_hunk(&mut current, &mut current_hunk);
            let (old_range, new_range) = parse_hunk_header(line)?;
            remaining_old = old_range.count;
            remaining_new = new_range.count;
            current_hunk = Some(Hunk {
                old_range,
                new_range,
                content: String::new(),
            });
            continue;
        }

        if line == "\\ No newline at end of file" {
            continue;
        }

        if let Some(hunk) = current_hunk.as_mut() {
            if let Some(rest) = line.strip_prefix('+') {
                remaining_new = remaining_new.saturating_sub(1);
                hunk.content.push('+');
                hunk.content.push_str(rest);
                hunk.content.push('\n');
            } else if let Some(rest) = line.strip_prefix('-') {
                remaining_old = remaining_old.saturating_sub(1);
                hunk.content.push('-');
                hunk.content.push_str(rest);
                hunk.content.push('\n');
            } else if line.starts_with(' ') || line.is_empty() {
                // Some tools strip the single space of empty context lines.
                remaining_old = remaining_old.saturating_sub(1);
                remaining_new = remaining_new.saturating_sub(1);
                hunk.content.push(' ');
                hunk.content.push_str(line.get(1..).unwrap_or(""));
                hunk.content.push('\n');
            } else {
                flush_hunk(&mut current, &mut current_hunk);
                continue;
            }
            if remaining_old == 0 && remaining_new == 0 {
                flush_hunk(&mut current, &mut current_hunk);
            }
        }
    }

    flush_hunk(&mut current, &mut current_hunk);
    if let Some(file) = current.take().and_then(PendingFile::finish) {
        files.push(file);
    }

    Ok(DiffContext::new(files))
}

fn flush_hunk(current: &mut Option<PendingFile>, hunk: &mut Option<Hunk>) {
    if let Some(h) = hunk.take() {
        if let Some(file) = current.as_mut() {
            file.hunks.push(h);
        }
    }
}

fn parse_path(raw: &str) -> String {
    // Some tools append a tab and timestamp after the path.
    let raw = raw.split('\t').next().unwrap_or(raw);
    let normalized = raw.trim().trim_matches('"');

    if normalized == "/dev/null" {
        return normalized.to_string();
    }

    normalized
        .strip_prefix("a/")
        .or_else(|| normalized.strip_prefix("b/"))
        .unwrap_or(normalized)
        .to_string()
}

fn parse_hunk_header(line: &str) -> Result<(LineRange, LineRange), PatrolError> {
    let inner = line
        .strip_prefix("@@ ")
        .and_then(|s| {
            let end = s.find(" @@")?;
            Some(&s[..end])
        })
        .ok_or_else(|| PatrolError::Parse(format!("invalid hunk header: {line}")))?;

    let Some((old, new)) = inner.split_once(' ') else {
        return Err(PatrolError::Parse(format!("invalid hunk header: {line}")));
    };

    let old = old
        .strip_prefix('-')
        .ok_or_else(|| PatrolError::Parse(format!("invalid old range in hunk: {line}")))?;
    let new = new
        .strip_prefix('+')
        .ok_or_else(|| PatrolError::Parse(format!("invalid new range in hunk: {line}")))?;

    Ok((parse_range(old, line)?, parse_range(new, line)?))
}

fn parse_range(range: &str, context: &str) -> Result<LineRange, PatrolError> {
    let number = |s: &str| {
        s.parse::<u32>()
            .map_err(|_| PatrolError::Parse(format!("invalid range in: {context}")))
    };
    match range.split_once(',') {
        Some((start, count)) => Ok(LineRange::new(number(start)?, number(count)?)),
        None => Ok(LineRange::new(number(range)?, 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_diff_returns_empty_context() {
        let context = parse_unified_diff("").unwrap();
        assert!(context.files.is_empty());
        assert!(context.is_empty());
    }

    #[test]
    fn single_file_single_hunk() {
        let diff = "\
diff --git a/src/app.py b/src/app.py
index abc1234..def5678 100644
--- a/src/app.py
+++ b/src/app.py
@@ -1,3 +1,4 @@
 def main():
+    print(\"hello\")
     x = 1
     return x
";
        let context = parse_unified_diff(diff).unwrap();
        assert_eq!(context.files.len(), 1);
        let file = &context.files[0];
        assert_eq!(file.path, "src/app.py");
        assert_eq!(file.status, FileStatus::Modified);
        assert_eq!(file.hunks.len(), 1);
        assert_eq!(file.hunks[0].old_range, LineRange::new(1, 3));
        assert_eq!(file.hunks[0].new_range, LineRange::new(1, 4));
        assert!(file.hunks[0].content.contains("+    print"));
    }

    #[test]
    fn multiple_files_keep_order() {
        let diff = "\
diff --git a/b.py b/b.py
--- a/b.py
+++ b/b.py
@@ -1 +1,2 @@
 line1
+line2
diff --git a/a.py b/a.py
--- a/a.py
+++ b/a.py
@@ -1,3 +1,4 @@
 x
+y
@@ -10,3 +11,4 @@
 z
+w
";
        let context = parse_unified_diff(diff).unwrap();
        let paths: Vec<&str> = context.paths().collect();
        assert_eq!(paths, vec!["b.py", "a.py"]);
        assert_eq!(context.files[1].hunks.len(), 2);
        assert_eq!(context.files[1].hunks[1].old_range.start, 10);
        assert_eq!(context.total_hunks(), 3);
    }

    #[test]
    fn new_file() {
        let diff = "\
diff --git a/new.py b/new.py
new file mode 100644
--- /dev/null
+++ b/new.py
@@ -0,0 +1,2 @@
+def hello():
+    pass
";
        let context = parse_unified_diff(diff).unwrap();
        assert_eq!(context.files[0].status, FileStatus::Added);
        assert_eq!(context.files[0].path, "new.py");
        assert_eq!(context.files[0].hunks[0].old_range, LineRange::new(0, 0));
    }

    #[test]
    fn deleted_file_uses_old_path() {
        let diff = "\
diff --git a/old.py b/old.py
deleted file mode 100644
--- a/old.py
+++ /dev/null
@@ -1,2 +0,0 @@
-def goodbye():
-    pass
";
        let context = parse_unified_diff(diff).unwrap();
        assert_eq!(context.files[0].status, FileStatus::Removed);
        assert_eq!(context.files[0].path, "old.py");
    }

    #[test]
    fn pure_rename_has_no_hunks() {
        let diff = "\
diff --git a/old_name.py b/new_name.py
similarity index 100%
rename from old_name.py
rename to new_name.py
";
        let context = parse_unified_diff(diff).unwrap();
        assert_eq!(context.files.len(), 1);
        assert_eq!(context.files[0].status, FileStatus::Renamed);
        assert_eq!(context.files[0].path, "new_name.py");
        assert!(context.files[0].hunks.is_empty());
    }

    #[test]
    fn binary_files_skipped() {
        let diff = "\
diff --git a/logo.png b/logo.png
Binary files a/logo.png and b/logo.png differ
diff --git a/code.py b/code.py
--- a/code.py
+++ b/code.py
@@ -1 +1,2 @@
 line1
+line2
";
        let context = parse_unified_diff(diff).unwrap();
        assert_eq!(context.files.len(), 1);
        assert_eq!(context.files[0].path, "code.py");
    }

    #[test]
    fn no_newline_marker_dropped() {
        let diff = "\
diff --git a/f.py b/f.py
--- a/f.py
+++ b/f.py
@@ -1 +1 @@
-old
\\ No newline at end of file
+new
\\ No newline at end of file
";
        let context = parse_unified_diff(diff).unwrap();
        let content = &context.files[0].hunks[0].content;
        assert!(!content.contains("No newline"));
        assert_eq!(content, "-old\n+new\n");
    }

    #[test]
    fn removed_line_starting_with_dashes_is_content() {
        let diff = "\
diff --git a/notes.md b/notes.md
--- a/notes.md
+++ b/notes.md
@@ -1,2 +1,1 @@
--- a heading rule
 text
";
        let context = parse_unified_diff(diff).unwrap();
        assert_eq!(context.files.len(), 1);
        assert_eq!(context.files[0].path, "notes.md");
        assert!(context.files[0].hunks[0].content.starts_with("--- a heading rule\n"));
    }

    #[test]
    fn malformed_hunk_header_is_error() {
        let diff = "\
--- a/x.py
+++ b/x.py
@@ -a,b +c,d @@
+x
";
        let err = parse_unified_diff(diff).unwrap_err();
        assert!(matches!(err, PatrolError::Parse(_)));
    }

    #[test]
    fn parse_path_handles_quotes_and_timestamps() {
        assert_eq!(parse_path("\"a/src/my file.py\""), "src/my file.py");
        assert_eq!(parse_path("b/src/x.py\t2024-01-01 00:00:00"), "src/x.py");
    }

    #[test]
    fn plain_patch_with_several_files() {
        let diff = "\
--- a/one.py
+++ b/one.py
@@ -1 +1,2 @@
 a
+b
--- a/two.py
+++ b/two.py
@@ -1 +1,2 @@
 c
+d
";
        let context = parse_unified_diff(diff).unwrap();
        let paths: Vec<&str> = context.paths().collect();
        assert_eq!(paths, vec!["one.py", "two.py"]);
    }

    #[test]
    fn pull_request_fixture() {
        let diff = include_str!("../tests/fixtures/pull_request.diff");
        let context = parse_unified_diff(diff).unwrap();
        assert_eq!(context.files.len(), 3);
        for file in &context.files {
            assert!(!file.hunks.is_empty());
        }
    }
}
