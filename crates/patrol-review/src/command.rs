//! Parsing of `@byte-patrol` commands found in pull request comments.

use patrol_core::{CommandError, ReviewCommand, ReviewConfig, ReviewStyle, UnknownFlagPolicy};
use tracing::debug;

/// Settings the parser needs from configuration.
///
/// # Examples
///
/// ```
/// use patrol_core::ReviewConfig;
/// use patrol_review::command::CommandSettings;
///
/// let settings = CommandSettings::from_config(&ReviewConfig::default());
/// assert_eq!(settings.mention, "@byte-patrol");
/// ```
#[derive(Debug, Clone)]
pub struct CommandSettings {
    /// Token that addresses the bot, e.g. `@byte-patrol`.
    pub mention: String,
    /// Areas used when the command names none.
    pub default_areas: Vec<String>,
    /// Style used when the command names none.
    pub default_style: ReviewStyle,
    /// What to do with flags the parser does not know.
    pub unknown_flags: UnknownFlagPolicy,
}

impl CommandSettings {
    /// Derive parser settings from the `[review]` configuration section.
    pub fn from_config(config: &ReviewConfig) -> Self {
        Self {
            mention: config.mention.clone(),
            default_areas: config.default_areas.clone(),
            default_style: ReviewStyle::parse(&config.default_style),
            unknown_flags: config.unknown_flags,
        }
    }
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self::from_config(&ReviewConfig::default())
    }
}

/// A successfully parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    /// Review the pull request.
    Review(ReviewCommand),
    /// Reply with usage information.
    Help,
}

/// Whether `text` addresses the bot at all.
///
/// Cheap pre-check used before full parsing. Matching is case-insensitive
/// and requires the mention to stand alone as a word.
///
/// # Examples
///
/// ```
/// use patrol_review::command::contains_mention;
///
/// assert!(contains_mention("LGTM. @Byte-Patrol review", "@byte-patrol"));
/// assert!(!contains_mention("email me at me@byte-patrol.dev", "@byte-patrol"));
/// assert!(!contains_mention("nothing to see", "@byte-patrol"));
/// ```
pub fn contains_mention(text: &str, mention: &str) -> bool {
    find_command_line(text, mention).is_some()
}

/// Parse the command following the mention in a comment.
///
/// Only the remainder of the line holding the first mention is parsed.
/// Block-quoted lines (`> ...`) are skipped so quoting an earlier command in
/// a reply does not trigger a second review. Mentions inside fenced code
/// blocks or inline code spans are skipped too, so the usage text the bot
/// posts never reads as a command.
///
/// # Errors
///
/// Returns a [`CommandError`] describing what is wrong with the command.
/// Parsing never panics, whatever the input.
///
/// # Examples
///
/// ```
/// use patrol_review::command::{parse_command, CommandSettings, ParsedCommand};
///
/// let settings = CommandSettings::default();
/// let parsed = parse_command(
///     r#"@byte-patrol review --areas "security, Error Handling" --style detailed"#,
///     &settings,
/// )
/// .unwrap();
/// let ParsedCommand::Review(cmd) = parsed else { panic!("expected review") };
/// assert!(cmd.areas.contains("security"));
/// assert!(cmd.areas.contains("error handling"));
/// assert_eq!(cmd.style.to_string(), "detailed");
/// ```
pub fn parse_command(
    text: &str,
    settings: &CommandSettings,
) -> Result<ParsedCommand, CommandError> {
    let rest = find_command_line(text, &settings.mention).ok_or(CommandError::MissingMention)?;
    let tokens = tokenize(rest)?;
    let mut tokens = tokens.into_iter().peekable();

    let verb = tokens.next().ok_or(CommandError::MissingVerb)?;
    match verb.to_lowercase().as_str() {
        "review" => {}
        "help" => return Ok(ParsedCommand::Help),
        _ => return Err(CommandError::UnknownVerb(verb)),
    }

    let mut areas = Vec::new();
    let mut saw_areas = false;
    let mut style = None;
    let mut files = Vec::new();

    while let Some(token) = tokens.next() {
        if !is_flag(&token) {
            files.push(token);
            continue;
        }

        let (name, inline) = match token.split_once('=') {
            Some((name, value)) => (name.to_string(), Some(value.to_string())),
            None => (token, None),
        };

        match name.as_str() {
            "--areas" | "-a" => {
                let value = take_value(&name, inline, &mut tokens)?;
                saw_areas = true;
                areas.extend(value.split(',').filter_map(ReviewCommand::normalize_area));
            }
            "--style" | "-s" => {
                let value = take_value(&name, inline, &mut tokens)?;
                style = Some(ReviewStyle::parse(&value));
            }
            _ => match settings.unknown_flags {
                UnknownFlagPolicy::Reject => return Err(CommandError::UnknownFlag(name)),
                UnknownFlagPolicy::Ignore => {
                    debug!(flag = %name, "ignoring unknown flag");
                    if inline.is_none() && tokens.peek().is_some_and(|next| !is_flag(next)) {
                        tokens.next();
                    }
                }
            },
        }
    }

    if saw_areas && areas.is_empty() {
        return Err(CommandError::EmptyAreas);
    }

    let style = style.unwrap_or_else(|| settings.default_style.clone());
    let mut command = if saw_areas {
        ReviewCommand {
            areas: areas.into_iter().collect(),
            style,
            files: Vec::new(),
            explicit_areas: true,
        }
    } else {
        ReviewCommand::with_defaults(&settings.default_areas, style)
    };
    command.files = files;

    Ok(ParsedCommand::Review(command))
}

/// Help text posted for `help` and for malformed commands.
///
/// # Examples
///
/// ```
/// use patrol_review::command::usage;
///
/// let text = usage("@byte-patrol");
/// assert!(text.contains("@byte-patrol review"));
/// assert!(text.contains("--areas"));
/// ```
pub fn usage(mention: &str) -> String {
    format!(
        "**Byte Patrol usage**\n\
         \n\
         ```\n\
         {mention} review [--areas \"area1, area2\"] [--style \"style\"] [files...]\n\
         {mention} help\n\
         ```\n\
         \n\
         - `--areas`, `-a`: comma-separated review areas; may be repeated. \
         Defaults to code quality and best practices.\n\
         - `--style`, `-s`: `concise`, `detailed`, `brief`, or free-text instructions.\n\
         - `files`: only review these paths of the pull request.\n\
         \n\
         Example: `{mention} review --areas \"security, error handling\" --style detailed`\n"
    )
}

fn is_flag(token: &str) -> bool {
    token.len() > 1 && token.starts_with('-')
}

fn take_value<I>(
    flag: &str,
    inline: Option<String>,
    tokens: &mut std::iter::Peekable<I>,
) -> Result<String, CommandError>
where
    I: Iterator<Item = String>,
{
    if let Some(value) = inline {
        return Ok(value);
    }
    match tokens.peek() {
        Some(next) if !is_flag(next) => Ok(tokens.next().unwrap_or_default()),
        _ => Err(CommandError::MissingValue(flag.to_string())),
    }
}

/// Text after the first standalone mention, up to the end of its line.
///
/// Quoted lines, fenced code blocks and inline code spans never count.
fn find_command_line<'a>(text: &'a str, mention: &str) -> Option<&'a str> {
    if mention.is_empty() {
        return None;
    }
    let mut fence: Option<&str> = None;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(open) = fence {
            if trimmed.starts_with(open) {
                fence = None;
            }
            continue;
        }
        if let Some(marker) = ["```", "~~~"].into_iter().find(|m| trimmed.starts_with(m)) {
            fence = Some(marker);
            continue;
        }
        if trimmed.starts_with('>') {
            continue;
        }
        if let Some(end) = find_mention(line, mention) {
            return Some(line[end..].trim_end_matches('\r'));
        }
    }
    None
}

/// Byte offset just past the first word-bounded, case-insensitive match
/// outside inline code.
fn find_mention(line: &str, mention: &str) -> Option<usize> {
    let needle = mention.as_bytes();
    let bytes = line.as_bytes();

    for (start, _) in line.char_indices() {
        let end = start + needle.len();
        if end > bytes.len() {
            break;
        }
        if !bytes[start..end].eq_ignore_ascii_case(needle) {
            continue;
        }
        let before_ok = line[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !is_word_char(c));
        let after_ok = line
            .get(end..)
            .and_then(|s| s.chars().next())
            .map_or(true, |c| !is_word_char(c));
        let in_code = line[..start].matches('`').count() % 2 == 1;
        if before_ok && after_ok && !in_code && line.is_char_boundary(end) {
            return Some(end);
        }
    }
    None
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Split on whitespace, honoring single and double quotes.
///
/// Inside double quotes a backslash escapes `"` and `\`; elsewhere it is
/// literal. Quotes may appear mid-token, so `--areas="a, b"` is one token.
fn tokenize(input: &str) -> Result<Vec<String>, CommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.peek() {
                            Some(&next) if next == '"' || next == '\\' => {
                                current.push(next);
                                chars.next();
                            }
                            _ => current.push('\\'),
                        },
                        Some(other) => current.push(other),
                        None => return Err(CommandError::UnterminatedQuote('"')),
                    }
                }
            }
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(other) => current.push(other),
                        None => return Err(CommandError::UnterminatedQuote('\'')),
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(text: &str) -> ReviewCommand {
        match parse_command(text, &CommandSettings::default()) {
            Ok(ParsedCommand::Review(cmd)) => cmd,
            other => panic!("expected review command, got {other:?}"),
        }
    }

    fn areas(cmd: &ReviewCommand) -> Vec<&str> {
        cmd.areas.iter().map(String::as_str).collect()
    }

    #[test]
    fn bare_review_uses_defaults() {
        let cmd = review("@byte-patrol review");
        assert_eq!(areas(&cmd), vec!["best practices", "code quality"]);
        assert_eq!(cmd.style, ReviewStyle::Concise);
        assert!(!cmd.explicit_areas);
        assert!(cmd.files.is_empty());
    }

    #[test]
    fn areas_and_style_in_both_forms() {
        let cmd = review(r#"@byte-patrol review --areas "security, error handling" --style "detailed""#);
        assert_eq!(areas(&cmd), vec!["error handling", "security"]);
        assert_eq!(cmd.style, ReviewStyle::Detailed);
        assert!(cmd.explicit_areas);

        let cmd = review(r#"@byte-patrol review --areas="Security,  Performance" -s=brief"#);
        assert_eq!(areas(&cmd), vec!["performance", "security"]);
        assert_eq!(cmd.style, ReviewStyle::Brief);
    }

    #[test]
    fn repeated_areas_accumulate_and_last_style_wins() {
        let cmd = review("@byte-patrol review -a security --areas tests,security -s brief -s detailed");
        assert_eq!(areas(&cmd), vec!["security", "tests"]);
        assert_eq!(cmd.style, ReviewStyle::Detailed);
    }

    #[test]
    fn free_text_style_is_custom() {
        let cmd = review(r#"@byte-patrol review --style 'like a pirate'"#);
        assert_eq!(cmd.style, ReviewStyle::Custom("like a pirate".into()));
    }

    #[test]
    fn positional_arguments_are_files() {
        let cmd = review("@byte-patrol review app/models.py app/views.py --style brief");
        assert_eq!(cmd.files, vec!["app/models.py", "app/views.py"]);
    }

    #[test]
    fn mention_anywhere_and_case_insensitive() {
        let cmd = review("Thanks for the fix!\nCould you take a look, @Byte-Patrol REVIEW --areas tests\nmore text");
        assert_eq!(areas(&cmd), vec!["tests"]);
        assert!(cmd.files.is_empty(), "only the mention line is parsed");
    }

    #[test]
    fn quoted_reply_is_skipped() {
        let text = "> @byte-patrol review\nthanks";
        assert!(!contains_mention(text, "@byte-patrol"));
        assert_eq!(
            parse_command(text, &CommandSettings::default()),
            Err(CommandError::MissingMention)
        );
    }

    #[test]
    fn code_blocks_and_spans_are_skipped() {
        let fenced = "Try this:\n```\n@byte-patrol review --areas x\n```\nthanks";
        assert!(!contains_mention(fenced, "@byte-patrol"));
        let tilde = "~~~text\n@byte-patrol help\n~~~";
        assert!(!contains_mention(tilde, "@byte-patrol"));
        assert!(!contains_mention("Run `@byte-patrol review` later", "@byte-patrol"));
        assert!(!contains_mention(&usage("@byte-patrol"), "@byte-patrol"));

        let after = "```\nsnippet\n```\n@byte-patrol review --areas tests";
        assert_eq!(areas(&review(after)), vec!["tests"]);
        assert!(contains_mention("`code` then @byte-patrol review", "@byte-patrol"));
    }

    #[test]
    fn mention_requires_word_boundary() {
        assert!(!contains_mention("@byte-patrolling review", "@byte-patrol"));
        assert!(!contains_mention("x@byte-patrol review", "@byte-patrol"));
        assert!(contains_mention("(@byte-patrol review)", "@byte-patrol"));
        assert!(contains_mention("@byte-patrol, review please", "@byte-patrol"));
    }

    #[test]
    fn help_verb() {
        assert_eq!(
            parse_command("@byte-patrol help me", &CommandSettings::default()),
            Ok(ParsedCommand::Help)
        );
    }

    #[test]
    fn malformed_commands_are_errors() {
        let settings = CommandSettings::default();
        let cases = [
            ("@byte-patrol", CommandError::MissingVerb),
            ("@byte-patrol reveiw", CommandError::UnknownVerb("reveiw".into())),
            (r#"@byte-patrol review --areas "security"#, CommandError::UnterminatedQuote('"')),
            ("@byte-patrol review --style 'brief", CommandError::UnterminatedQuote('\'')),
            ("@byte-patrol review --areas", CommandError::MissingValue("--areas".into())),
            ("@byte-patrol review --areas --style brief", CommandError::MissingValue("--areas".into())),
            ("@byte-patrol review --areas ' , '", CommandError::EmptyAreas),
        ];
        for (text, expected) in cases {
            assert_eq!(parse_command(text, &settings), Err(expected), "input: {text}");
        }
    }

    #[test]
    fn unknown_flags_follow_policy() {
        let text = "@byte-patrol review --depth 3 app.py";
        let cmd = review(text);
        assert_eq!(cmd.files, vec!["app.py"]);

        let strict = CommandSettings {
            unknown_flags: UnknownFlagPolicy::Reject,
            ..CommandSettings::default()
        };
        assert_eq!(
            parse_command(text, &strict),
            Err(CommandError::UnknownFlag("--depth".into()))
        );
    }

    #[test]
    fn escapes_inside_double_quotes() {
        let tokens = tokenize(r#"a "b \"c\" \\ \n" 'd\e'"#).unwrap();
        assert_eq!(tokens, vec!["a", r#"b "c" \ \n"#, r"d\e"]);
    }

    #[test]
    fn empty_quotes_make_an_empty_token() {
        assert_eq!(tokenize(r#"--style """#).unwrap(), vec!["--style", ""]);
    }

    #[test]
    fn hostile_input_never_panics() {
        let settings = CommandSettings::default();
        let inputs = [
            "",
            "@",
            "@byte-patrolé review",
            "é@byte-patrol review",
            "@byte-patrol review --=x",
            "@byte-patrol review -",
            "@byte-patrol review \"\\",
            "@byte-patrol review '\u{0}'",
            "@BYTE-PATROL\u{2003}review",
        ];
        for input in inputs {
            let _ = parse_command(input, &settings);
            let _ = contains_mention(input, &settings.mention);
        }
    }
}
