use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use commitscope_core::{AnalysisDocument, FetchStatus, ScopeConfig};
use commitscope_fetch::{cancellation, CacheStore, Fetcher, GitHubClient, RateLimiter};
use commitscope_pulse::Aggregator;
use miette::{Context, IntoDiagnostic, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const CONFIG_FILE: &str = ".commitscope.toml";

#[derive(Parser)]
#[command(
    name = "commitscope",
    version,
    about = "Behavioral analytics for your GitHub commit history",
    long_about = "commitscope fetches an account's commits from GitHub, caches them locally,\n\
                   and derives temporal, linguistic, language and productivity metrics\n\
                   into a single JSON document.\n\n\
                   Examples:\n  \
                     commitscope init                              Create a .commitscope.toml\n  \
                     commitscope analyze octocat --repo hello-world Analyze one repository\n  \
                     commitscope analyze octocat --discover -o out.json\n  \
                     commitscope analyze --refresh                 Ignore cached commits"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .commitscope.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch commits and write the analysis document
    #[command(long_about = "Fetch commits and write the analysis document.\n\n\
        Command-line values override the configuration file. The GitHub token is\n\
        read from [fetch].token or the GITHUB_TOKEN environment variable.\n\
        Press Ctrl-C to stop fetching; repositories in flight are marked partial.")]
    Analyze {
        /// Account whose commits are analyzed
        account: Option<String>,

        /// Repository to analyze (repeatable)
        #[arg(long = "repo", short)]
        repos: Vec<String>,

        /// Analyze every repository owned by the account
        #[arg(long)]
        discover: bool,

        /// Write the document here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Ignore cached commits and fetch again
        #[arg(long)]
        refresh: bool,

        /// Do not read or write the local cache
        #[arg(long)]
        no_cache: bool,

        /// Cache database path
        #[arg(long)]
        cache_path: Option<PathBuf>,

        /// Repositories fetched in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Maximum commits fetched per repository
        #[arg(long)]
        max_commits: Option<usize>,

        /// Offset from UTC in minutes applied to commit times
        #[arg(long, allow_hyphen_values = true)]
        utc_offset: Option<i32>,
    },
    /// Create a default .commitscope.toml configuration file
    #[command(long_about = "Create a default .commitscope.toml configuration file.\n\n\
        Generates a commented template with all available options.\n\
        Fails if .commitscope.toml already exists.")]
    Init,
}

/// Command-line values layered over the file configuration.
struct Overrides {
    account: Option<String>,
    repos: Vec<String>,
    discover: bool,
    no_cache: bool,
    cache_path: Option<PathBuf>,
    concurrency: Option<usize>,
    max_commits: Option<usize>,
    utc_offset: Option<i32>,
}

impl Overrides {
    fn apply(self, config: &mut ScopeConfig) {
        if let Some(account) = self.account {
            config.account = account;
        }
        if !self.repos.is_empty() {
            config.repositories = self.repos;
        }
        if self.discover {
            config.discover = true;
        }
        if self.no_cache {
            config.cache.enabled = false;
        }
        if let Some(path) = self.cache_path {
            config.cache.path = path;
        }
        if let Some(concurrency) = self.concurrency {
            config.fetch.concurrency = concurrency;
        }
        if let Some(max) = self.max_commits {
            config.fetch.max_commits_per_repo = max;
        }
        if let Some(offset) = self.utc_offset {
            config.analysis.utc_offset_minutes = offset;
        }
    }
}

fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    if json {
        registry.with(layer.json()).try_init().ok();
    } else {
        registry.with(layer).try_init().ok();
    }
}

fn load_config(path: Option<&Path>) -> Result<ScopeConfig> {
    match path {
        Some(path) => ScopeConfig::from_file(path)
            .into_diagnostic()
            .wrap_err(format!("loading {}", path.display())),
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                ScopeConfig::from_file(default_path)
                    .into_diagnostic()
                    .wrap_err(format!("loading {CONFIG_FILE}"))
            } else {
                Ok(ScopeConfig::default())
            }
        }
    }
}

fn resolve_token(config: &mut ScopeConfig) {
    let configured = config
        .fetch
        .token
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    if !configured {
        config.fetch.token = std::env::var("GITHUB_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
    }
    if config.fetch.token.is_none() {
        warn!("no GitHub token configured; unauthenticated requests are limited to 60 per hour");
    }
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
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn print_summary(doc: &AnalysisDocument) {
    let summary = &doc.summary;
    eprintln!(
        "{} commits across {} repositories ({} complete, {} partial, {} failed)",
        summary.total_commits,
        summary.total_repositories,
        summary.complete_repositories,
        summary.partial_repositories,
        summary.failed_repositories,
    );
    for repo in &doc.repositories {
        match &repo.status {
            FetchStatus::Complete => {}
            status => eprintln!("  {}: {status}", repo.name),
        }
    }
    if let Some(error) = &doc.discovery_error {
        eprintln!("  repository discovery failed: {error}");
    }
}

async fn run_analyze(
    mut config: ScopeConfig,
    refresh: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    resolve_token(&mut config);
    if let Err(e) = config.validate() {
        miette::bail!(miette::miette!(
            help = "Pass an account and --repo/--discover, or run 'commitscope init'",
            "{e}"
        ));
    }

    let limiter =
        Arc::new(RateLimiter::unknown().with_max_wait(config.fetch.max_rate_limit_wait()));
    let client = Arc::new(GitHubClient::new(&config.fetch).into_diagnostic()?);
    let mut fetcher = Fetcher::new(config.clone(), client, limiter).force_refresh(refresh);
    if config.cache.enabled {
        let store = CacheStore::open(&config.cache.path)
            .into_diagnostic()
            .wrap_err(format!("opening cache {}", config.cache.path.display()))?;
        fetcher = fetcher.with_cache(Arc::new(store));
    }

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, finishing with the commits fetched so far");
            handle.cancel();
        }
    });

    let progress = spinner(format!("Fetching commits for {}...", config.account));
    let outcome = fetcher.fetch_all(&token).await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let outcome = outcome.into_diagnostic()?;

    let doc = Aggregator::new(config.analysis.clone()).run(
        &config.account,
        &outcome.datasets,
        outcome.discovery_error.as_deref(),
    );
    let json = serde_json::to_string_pretty(&doc).into_diagnostic()?;

    match output {
        Some(path) => {
            std::fs::write(&path, format!("{json}\n"))
                .into_diagnostic()
                .wrap_err(format!("writing {}", path.display()))?;
            info!(path = %path.display(), "analysis written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").into_diagnostic()?;
        }
    }

    print_summary(&doc);
    if doc.has_incomplete_data() {
        warn!("the analysis is based on incomplete data");
    }
    Ok(())
}

const DEFAULT_CONFIG: &str = r#"# commitscope configuration
# Command-line flags override these values.

# GitHub account whose commits are analyzed
# account = "octocat"

# Repositories to analyze (ignored when discover = true)
# repositories = ["hello-world"]

# Analyze every repository owned by the account
# discover = false

[fetch]
# api_base_url = "https://api.github.com"
# token = ""                        # falls back to GITHUB_TOKEN
# max_commits_per_repo = 1000
# max_repositories = 100
# concurrency = 4
# page_size = 100
# fetch_file_stats = true
# max_files_per_commit = 50
# retry_attempts = 3
# retry_base_delay_ms = 2000
# retry_max_delay_ms = 60000
# max_rate_limit_wait_secs = 3600

[cache]
# enabled = true
# path = ".commitscope/cache.db"
# ttl_secs = 604800              # 7 days

[analysis]
# utc_offset_minutes = 0
# day_start_hour = 6
# day_end_hour = 18
# night_share_threshold = 0.5
# top_repositories = 5
# top_verbs = 20
# velocity_window_days = 7
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
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(
        cli.json_logs,
        if cli.verbose { Level::DEBUG } else { Level::INFO },
    );

    match cli.command {
        Command::Analyze {
            account,
            repos,
            discover,
            output,
            refresh,
            no_cache,
            cache_path,
            concurrency,
            max_commits,
            utc_offset,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            Overrides {
                account,
                repos,
                discover,
                no_cache,
                cache_path,
                concurrency,
                max_commits,
                utc_offset,
            }
            .apply(&mut config);
            run_analyze(config, refresh, output).await?;
        }
        Command::Init => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
    }

    Ok(())
}
