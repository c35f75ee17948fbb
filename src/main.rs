use std::collections::BTreeSet;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use miette::{Context, IntoDiagnostic, Result};
use tracing_subscriber::EnvFilter;

use patrol_core::{
    CommandError, DiffContext, FileChange, PatrolConfig, PatrolError, PrIdentifier,
    ReviewCommand, ReviewConfig, ReviewStyle,
};
use patrol_review::format::{rating_emoji, ReviewBody};
use patrol_review::github::{GitHubClient, PullRequestHost};
use patrol_review::llm::{LlmClient, LlmGateway};
use patrol_review::pipeline::{ReviewJob, ReviewOutcome, ReviewPipeline};
use patrol_webhook::GitHubJobRunner;

const CONFIG_FILE: &str = ".byte-patrol.toml";

#[derive(Parser)]
#[command(
    name = "bp",
    version,
    about = "Byte Patrol: LLM code review for pull requests and local files",
    long_about = "Byte Patrol reviews code with a language model.\n\n\
                   As a GitHub App it answers `@byte-patrol review` comments on pull\n\
                   requests with exactly one review comment. Locally it reviews files\n\
                   and can gate commits through a pre-commit hook.\n\n\
                   Examples:\n  \
                     bp review app.py utils.py             Review files with the default areas\n  \
                     bp review app.py -a security -s brief  Focus on security, briefly\n  \
                     bp review --pr octo/app#12 --post      Review a pull request and comment\n  \
                     bp serve --port 8000                  Run the webhook server\n  \
                     bp doctor                             Check setup and environment"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .byte-patrol.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// When to use colors
    #[arg(long, global = true, default_value = "auto")]
    color: ColorChoice,
}

#[derive(Subcommand)]
enum Command {
    /// Review local files or a GitHub pull request
    #[command(long_about = "Review local files or a GitHub pull request.\n\n\
        Each local file is reviewed on its own and rated 1-10. The command exits\n\
        with status 1 when any rating is at or below --severity-threshold.\n\n\
        Examples:\n  bp review src/app.py\n  bp review --areas \"security, performance\" --style detailed app.py\n  \
        bp review --pr owner/repo#123\n  bp review --pr owner/repo#123 --post")]
    Review {
        /// Files to review
        #[arg(required_unless_present = "pr", conflicts_with = "pr")]
        files: Vec<PathBuf>,

        /// GitHub PR to review (format: owner/repo#123)
        #[arg(
            long,
            long_help = "GitHub PR to review.\n\nFormat: owner/repo#123\nRequires GITHUB_TOKEN or GH_TOKEN."
        )]
        pr: Option<String>,

        /// Post the review as a PR comment instead of printing it
        #[arg(long, requires = "pr")]
        post: bool,

        #[command(flatten)]
        options: ReviewOptions,
    },
    /// Pre-commit entry point: review staged files of the configured types
    #[command(long_about = "Pre-commit entry point.\n\n\
        Reviews only files whose extension is listed in review.file_types\n\
        (default: py) and fails when any rating is at or below the threshold.\n\n\
        Example .pre-commit-config.yaml entry:\n  - id: byte-patrol\n    entry: bp hook\n    language: system")]
    Hook {
        /// Files passed by the hook runner
        files: Vec<PathBuf>,

        #[command(flatten)]
        options: ReviewOptions,
    },
    /// Run the GitHub webhook server
    Serve {
        /// Bind address (default from config: 0.0.0.0)
        #[arg(long)]
        host: Option<String>,

        /// Bind port (default from config: 8000)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Create a default .byte-patrol.toml configuration file
    #[command(long_about = "Create a default .byte-patrol.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .byte-patrol.toml already exists.")]
    Init,
    /// Check your Byte Patrol setup and environment
    Doctor,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(clap::Args)]
struct ReviewOptions {
    /// Review areas, comma-separated; repeatable
    #[arg(long, short)]
    areas: Vec<String>,

    /// Writing style: concise, detailed, brief, or free text
    #[arg(long, short)]
    style: Option<String>,

    /// Per-attempt LLM timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Maximum tokens in the LLM response
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Fail when a rating is at or below this value
    #[arg(long)]
    severity_threshold: Option<u8>,
}

impl ReviewOptions {
    fn apply(&self, config: &mut PatrolConfig) {
        if let Some(timeout) = self.timeout {
            config.llm.timeout_secs = timeout;
        }
        if let Some(max_tokens) = self.max_tokens {
            config.llm.max_tokens = max_tokens;
        }
        if let Some(threshold) = self.severity_threshold {
            config.review.severity_threshold = threshold;
        }
    }

    fn command(&self, review: &ReviewConfig) -> Result<ReviewCommand> {
        let style = match &self.style {
            Some(style) => ReviewStyle::parse(style),
            None => ReviewStyle::parse(&review.default_style),
        };
        let mut command = ReviewCommand::with_defaults(&review.default_areas, style);
        if !self.areas.is_empty() {
            let named: BTreeSet<String> = self
                .areas
                .iter()
                .flat_map(|a| a.split(','))
                .filter_map(ReviewCommand::normalize_area)
                .collect();
            if named.is_empty() {
                return Err(PatrolError::from(CommandError::EmptyAreas).into());
            }
            command.areas = named;
            command.explicit_areas = true;
        }
        Ok(command)
    }
}

#[derive(Clone, PartialEq, Eq, ValueEnum)]
enum ColorChoice {
    /// Auto-detect based on terminal
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

fn print_welcome(use_color: bool) {
    let version = env!("CARGO_PKG_VERSION");
    let (bold, cyan, green, reset) = if use_color {
        ("\x1b[1m", "\x1b[36m", "\x1b[32m", "\x1b[0m")
    } else {
        ("", "", "", "")
    };

    println!("{bold}bp{reset} v{version}, Byte Patrol code review\n");

    println!("Quick start:");
    println!("  {cyan}bp init{reset}                 Create a .byte-patrol.toml config file");
    println!("  {cyan}bp review app.py{reset}        Review a file with the default areas");
    println!("  {cyan}bp serve{reset}                Run the GitHub webhook server\n");

    println!("All commands:");
    println!("  {green}review{reset}   Review local files or a GitHub pull request");
    println!("  {green}hook{reset}     Pre-commit entry point");
    println!("  {green}serve{reset}    GitHub webhook server");
    println!("  {green}doctor{reset}   Check your setup and environment");
    println!("  {green}init{reset}     Create default configuration\n");

    println!("Run 'bp <command> --help' for details.");
}

fn init_tracing(verbose: bool, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { default_level })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<(PatrolConfig, Option<PathBuf>)> {
    let (mut config, source) = match path {
        Some(path) => (
            PatrolConfig::from_file(path)
                .wrap_err_with(|| format!("loading {}", path.display()))?,
            Some(path.to_path_buf()),
        ),
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                (
                    PatrolConfig::from_file(default_path)?,
                    Some(default_path.to_path_buf()),
                )
            } else {
                (PatrolConfig::default(), None)
            }
        }
    };
    config.apply_env();
    Ok((config, source))
}

fn build_pipeline(config: &PatrolConfig) -> Result<ReviewPipeline> {
    if config.llm.api_key.is_none() {
        return Err(PatrolError::Config(
            "no LLM API key. Set OPENROUTER_API_KEY or llm.api_key in .byte-patrol.toml".into(),
        )
        .into());
    }
    let client = LlmClient::new(&config.llm)?;
    let gateway = LlmGateway::from_config(Arc::new(client), &config.llm);
    Ok(ReviewPipeline::from_config(gateway, config))
}

fn spinner(message: String) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
    {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

/// Outcome of reviewing one local file.
#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct FileReport {
    file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rating: Option<u8>,
    issues: Vec<String>,
    suggestion: String,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl FileReport {
    fn new(file: String, passed: bool, note: Option<String>) -> Self {
        Self {
            file,
            rating: None,
            issues: Vec::new(),
            suggestion: String::new(),
            passed,
            note,
        }
    }
}

async fn review_files(
    pipeline: &ReviewPipeline,
    files: &[PathBuf],
    command: &ReviewCommand,
    threshold: u8,
) -> Result<Vec<FileReport>> {
    let mut reports = Vec::with_capacity(files.len());
    for path in files {
        let source = std::fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading {}", path.display()))?;
        let name = path.display().to_string();
        let context = DiffContext::new(vec![FileChange::from_source(name.clone(), &source)]);

        let pb = spinner(format!("Reviewing {name}..."));
        let outcome = pipeline.review_context(command.clone(), context, None).await;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let report = match outcome {
            Ok(Some(completed)) => match completed.body {
                ReviewBody::Structured(feedback) => FileReport {
                    passed: feedback.passed(threshold),
                    rating: Some(feedback.rating),
                    issues: feedback.issues,
                    suggestion: feedback.suggestion,
                    file: name,
                    note: None,
                },
                ReviewBody::FreeText(text) => FileReport::new(name, true, Some(text)),
            },
            Ok(None) => FileReport::new(name, true, Some("skipped: nothing reviewable".into())),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "review failed");
                FileReport::new(name, false, Some(format!("review failed: {e}")))
            }
        };
        reports.push(report);
    }
    Ok(reports)
}

fn print_reports(reports: &[FileReport], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(reports).into_diagnostic()?);
        return Ok(());
    }

    for report in reports {
        println!("File: {}", report.file);
        if let Some(rating) = report.rating {
            println!("Rating: {} {rating}/10", rating_emoji(rating));
        }
        if !report.issues.is_empty() {
            println!("Issues:");
            for (i, issue) in report.issues.iter().enumerate() {
                println!("  {}. {issue}", i + 1);
            }
        }
        if !report.suggestion.is_empty() {
            println!("Suggestion: {}", report.suggestion);
        }
        if let Some(note) = &report.note {
            println!("{note}");
        }
        println!(
            "{}\n",
            if report.passed {
                "Passed ✅"
            } else {
                "Failed ❌"
            }
        );
    }

    let failed = reports.iter().filter(|r| !r.passed).count();
    println!("{} file(s) reviewed, {failed} failed", reports.len());
    Ok(())
}

async fn run_local_review(
    config: &PatrolConfig,
    files: &[PathBuf],
    options: &ReviewOptions,
    json: bool,
) -> Result<()> {
    let command = options.command(&config.review)?;
    let pipeline = build_pipeline(config)?;
    let reports = review_files(&pipeline, files, &command, config.review.severity_threshold).await?;
    print_reports(&reports, json)?;
    if reports.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_pr_review(
    config: &PatrolConfig,
    pr: &str,
    post: bool,
    options: &ReviewOptions,
    json: bool,
) -> Result<()> {
    let pr: PrIdentifier = pr.parse()?;
    let command = options.command(&config.review)?;
    let pipeline = build_pipeline(config)?;
    let host = GitHubClient::from_config(&config.github)?;

    if post {
        let job = ReviewJob {
            pr: pr.clone(),
            command,
            comment_id: None,
        };
        let pb = spinner(format!("Reviewing {pr}..."));
        let outcome = pipeline.run(&host, &job).await;
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }
        match outcome? {
            ReviewOutcome::Posted(result) => {
                println!("Posted review on {pr} (model: {})", result.model);
                fail_on_rating(result.rating, config.review.severity_threshold);
            }
            ReviewOutcome::NothingToReview => println!("No reviewable changes in {pr}"),
            ReviewOutcome::Discarded => println!("{pr} was closed, review discarded"),
            ReviewOutcome::Failed(e) => {
                return Err(PatrolError::Provider(e))
                    .wrap_err(format!("review of {pr} failed, error comment posted"));
            }
        }
        return Ok(());
    }

    let diff = host.fetch_diff(&pr).await?;
    let context = patrol_difflens::parser::parse_unified_diff(&diff)?;
    let pb = spinner(format!("Reviewing {pr}..."));
    let outcome = pipeline.review_context(command, context, Some(pr.clone())).await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    let Some(completed) = outcome.map_err(PatrolError::Provider)? else {
        println!("No reviewable changes in {pr}");
        return Ok(());
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&completed.result).into_diagnostic()?
        );
    } else {
        println!("{}", completed.result.body);
    }
    fail_on_rating(completed.result.rating, config.review.severity_threshold);
    Ok(())
}

fn fail_on_rating(rating: Option<u8>, threshold: u8) {
    if rating.is_some_and(|r| r <= threshold) {
        std::process::exit(1);
    }
}

/// Keep only files the hook is configured to review.
fn hook_files(files: &[PathBuf], file_types: &[String]) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    file_types
                        .iter()
                        .any(|t| t.trim_start_matches('.').eq_ignore_ascii_case(ext))
                })
        })
        .cloned()
        .collect()
}

async fn run_serve(mut config: PatrolConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    let pipeline = build_pipeline(&config)?;
    let runner = GitHubJobRunner::connect(pipeline, &config).await?;
    patrol_webhook::serve(&config, Arc::new(runner)).await?;
    Ok(())
}

#[derive(serde::Serialize)]
struct CheckResult {
    name: &'static str,
    status: &'static str,
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

impl CheckResult {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "pass",
            detail: detail.into(),
            hint: None,
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name,
            status: "fail",
            detail: detail.into(),
            hint: Some(hint.into()),
        }
    }

    fn info(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            status: "info",
            detail: detail.into(),
            hint: None,
        }
    }

    fn symbol(&self) -> &'static str {
        match self.status {
            "pass" => "\u{2713}",
            "fail" => "\u{2717}",
            _ => "~",
        }
    }

    fn colored_symbol(&self) -> String {
        match self.status {
            "pass" => "\x1b[32m\u{2713}\x1b[0m".into(),
            "fail" => "\x1b[31m\u{2717}\x1b[0m".into(),
            _ => "\x1b[33m~\x1b[0m".into(),
        }
    }
}

fn doctor_checks(config: &PatrolConfig, source: Option<&Path>) -> Vec<CheckResult> {
    let mut checks = Vec::new();

    match source {
        Some(path) => checks.push(CheckResult::pass(
            "config_file",
            format!("{} found", path.display()),
        )),
        None => checks.push(CheckResult::fail(
            "config_file",
            format!("{CONFIG_FILE} not found, using defaults"),
            "run 'bp init' to create a default config",
        )),
    }

    checks.push(CheckResult::pass(
        "llm_model",
        format!("{} via {}", config.llm.model, config.llm.base_url),
    ));
    if config.llm.api_key.is_some() {
        checks.push(CheckResult::pass("llm_api_key", "API key set"));
    } else {
        checks.push(CheckResult::fail(
            "llm_api_key",
            "OPENROUTER_API_KEY not set",
            "export OPENROUTER_API_KEY=... or set llm.api_key in .byte-patrol.toml",
        ));
    }

    match (config.github.app_id, &config.github.private_key_path) {
        (Some(id), Some(key)) if key.exists() => checks.push(CheckResult::pass(
            "github_app",
            format!("app {id}, key at {}", key.display()),
        )),
        (Some(_), Some(key)) => checks.push(CheckResult::fail(
            "github_app",
            format!("private key {} not found", key.display()),
            "point GITHUB_PRIVATE_KEY_PATH at the App's .pem file",
        )),
        (Some(_), None) | (None, Some(_)) => checks.push(CheckResult::fail(
            "github_app",
            "incomplete App credentials",
            "set both GITHUB_APP_ID and GITHUB_PRIVATE_KEY_PATH",
        )),
        (None, None) => checks.push(CheckResult::info(
            "github_app",
            "not configured (needed by 'bp serve' unless GITHUB_TOKEN is set)",
        )),
    }

    if config
        .github
        .webhook_secret
        .as_deref()
        .is_some_and(|s| !s.is_empty())
    {
        checks.push(CheckResult::pass("webhook_secret", "set"));
    } else {
        checks.push(CheckResult::fail(
            "webhook_secret",
            "not set, deliveries will not be verified",
            "export GITHUB_WEBHOOK_SECRET=... matching the App's webhook settings",
        ));
    }

    if config.github.token.is_some() {
        checks.push(CheckResult::pass("github_token", "set"));
    } else {
        checks.push(CheckResult::info(
            "github_token",
            "not set (needed by 'bp review --pr')",
        ));
    }

    checks.push(CheckResult::info(
        "server",
        format!(
            "{}:{}{}",
            config.server.host, config.server.port, config.server.webhook_path
        ),
    ));

    checks
}

fn run_doctor(
    config: &PatrolConfig,
    source: Option<&Path>,
    json: bool,
    use_color: bool,
) -> Result<()> {
    let checks = doctor_checks(config, source);
    let version = env!("CARGO_PKG_VERSION");

    if json {
        let json = serde_json::json!({
            "version": version,
            "checks": checks,
        });
        println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
        return Ok(());
    }

    println!("Byte Patrol v{version}, environment check\n");
    for check in &checks {
        let sym = if use_color {
            check.colored_symbol()
        } else {
            check.symbol().to_string()
        };
        let label = check.name.replace('_', " ");
        println!("  {sym} {label:<16} {}", check.detail);
        if let Some(hint) = &check.hint {
            println!("    hint: {hint}");
        }
    }

    let passed = checks.iter().filter(|c| c.status == "pass").count();
    let failed = checks.iter().filter(|c| c.status == "fail").count();
    let info = checks.iter().filter(|c| c.status == "info").count();
    println!("\n{passed} checks passed, {failed} failed, {info} info");
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# Byte Patrol configuration
# Environment variables override these values (OPENROUTER_API_KEY, MODEL_NAME,
# GITHUB_APP_ID, GITHUB_PRIVATE_KEY_PATH, GITHUB_WEBHOOK_SECRET, GITHUB_TOKEN).

[llm]
# model = "google/gemini-2.0-flash-001"
# base_url = "https://openrouter.ai/api/v1"
# timeout_secs = 30
# max_tokens = 1000
# max_retries = 3
# initial_backoff_ms = 500
# max_backoff_ms = 8000

[review]
# mention = "@byte-patrol"
# default_areas = ["code quality", "best practices"]
# default_style = "concise"
# unknown_flags = "ignore"   # or "reject"
# max_diff_bytes = 60000
# max_diff_lines = 1500
# max_comment_chars = 65536
# skip_patterns = ["docs/**"]
# skip_extensions = ["svg"]
# file_types = ["py"]        # reviewed by `bp hook`
# severity_threshold = 0     # ratings at or below fail `bp review` and `bp hook`
# auto_review_repos = []     # "owner/repo" reviewed on every push
# acknowledge = true

[github]
# app_id = 123456
# private_key_path = "byte-patrol.private-key.pem"
# api_url = "https://api.github.com"

[server]
# host = "0.0.0.0"
# port = 8000
# webhook_path = "/webhooks/github"
"#;

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Some(Command::Serve { .. })) {
        "info"
    } else {
        "warn"
    };
    init_tracing(cli.verbose, default_level);

    let use_color = match cli.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => std::io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    };

    match cli.command {
        None => print_welcome(use_color),
        Some(Command::Review {
            ref files,
            ref pr,
            post,
            ref options,
        }) => {
            let (mut config, _) = load_config(cli.config.as_deref())?;
            options.apply(&mut config);
            match pr {
                Some(pr) => run_pr_review(&config, pr, post, options, cli.json).await?,
                None => run_local_review(&config, files, options, cli.json).await?,
            }
        }
        Some(Command::Hook {
            ref files,
            ref options,
        }) => {
            let (mut config, _) = load_config(cli.config.as_deref())?;
            options.apply(&mut config);
            let selected = hook_files(files, &config.review.file_types);
            if selected.is_empty() {
                println!("No files to review.");
                return Ok(());
            }
            run_local_review(&config, &selected, options, cli.json).await?;
        }
        Some(Command::Serve { host, port }) => {
            let (config, _) = load_config(cli.config.as_deref())?;
            run_serve(config, host, port).await?;
        }
        Some(Command::Init) => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Some(Command::Doctor) => {
            let (config, source) = load_config(cli.config.as_deref())?;
            run_doctor(&config, source.as_deref(), cli.json, use_color)?;
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "bp", &mut std::io::stdout());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_template_parses() {
        let config = PatrolConfig::from_toml(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.review.mention, "@byte-patrol");
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn hook_keeps_configured_types_only() {
        let files = vec![
            PathBuf::from("app/main.py"),
            PathBuf::from("README.md"),
            PathBuf::from("tools/build.PY"),
            PathBuf::from("Makefile"),
        ];
        let kept = hook_files(&files, &["py".to_string()]);
        assert_eq!(
            kept,
            vec![PathBuf::from("app/main.py"), PathBuf::from("tools/build.PY")]
        );
    }

    #[test]
    fn cli_areas_override_defaults() {
        let options = ReviewOptions {
            areas: vec!["Security, performance".into(), "security".into()],
            style: Some("Detailed".into()),
            timeout: None,
            max_tokens: None,
            severity_threshold: None,
        };
        let command = options.command(&ReviewConfig::default()).unwrap();
        assert!(command.explicit_areas);
        assert_eq!(
            command.areas.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["performance", "security"]
        );
        assert_eq!(command.style, ReviewStyle::Detailed);
    }

    #[test]
    fn blank_cli_areas_are_rejected() {
        let options = ReviewOptions {
            areas: vec![" , ".into()],
            style: None,
            timeout: None,
            max_tokens: None,
            severity_threshold: None,
        };
        assert!(options.command(&ReviewConfig::default()).is_err());
    }

    #[test]
    fn doctor_flags_missing_key_and_secret() {
        let checks = doctor_checks(&PatrolConfig::default(), None);
        let status = |name: &str| {
            checks
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.status)
                .unwrap()
        };
        assert_eq!(status("llm_api_key"), "fail");
        assert_eq!(status("webhook_secret"), "fail");
        assert_eq!(status("github_app"), "info");
    }

    #[test]
    fn cli_parses_review_flags() {
        let cli = Cli::try_parse_from([
            "bp", "review", "a.py", "b.py", "-a", "security", "--severity-threshold", "6",
        ])
        .unwrap();
        let Some(Command::Review { files, options, .. }) = cli.command else {
            panic!("expected review");
        };
        assert_eq!(files.len(), 2);
        assert_eq!(options.severity_threshold, Some(6));
    }

    #[test]
    fn cli_post_requires_pr() {
        assert!(Cli::try_parse_from(["bp", "review", "a.py", "--post"]).is_err());
    }
}
