use anyhow::{Context, Result};
use clap::Parser;
use regex::Regex;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use repoherd::sync::{Resume, ResumeMode};
use repoherd::{Config, GitClient, GitSetting, RunOptions, SyncEngine};

#[derive(Parser)]
#[command(name = "repoherd")]
#[command(about = "Batch-synchronize local git working copies against their remotes")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Print an example configuration file and exit
    #[arg(long)]
    example_config: bool,

    /// Path to the git executable (overrides any `git` line in the config)
    #[arg(long, value_name = "PATH")]
    git: Option<String>,

    /// Group(s) to process (repeatable, comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    group: Vec<String>,

    /// List the configured group names and exit
    #[arg(long)]
    list_groups: bool,

    /// List the repositories that would be visited and exit
    #[arg(long)]
    list_repos: bool,

    /// Show what would be done without running any mutating git command
    #[arg(short, long)]
    not_really: bool,

    /// Increase verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only visit repositories whose path matches this regular expression
    /// (anchored at the start of the path)
    #[arg(short, long, value_name = "REGEX")]
    filter: Option<String>,

    /// Resume the traversal at this repository (path or basename),
    /// processing it and everything after it
    #[arg(long, value_name = "MARKER", conflicts_with = "continue_after")]
    continue_at: Option<String>,

    /// Resume the traversal after this repository (path or basename),
    /// processing only what follows it
    #[arg(long, value_name = "MARKER")]
    continue_after: Option<String>,

    /// Git sub-command to run in every repository instead of the default
    /// fetch-then-pull (give it after `--`)
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if cli.example_config {
        print!("{}", Config::example());
        return Ok(());
    }

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    let git_setting = match cli.git {
        Some(program) => GitSetting::FromOperator(program),
        None => GitSetting::Unset,
    };
    let config = Config::load(&config_path, git_setting)?;

    if cli.list_groups {
        for name in config.group_names() {
            println!("{name}");
        }
        return Ok(());
    }

    let filter = cli
        .filter
        .map(|pattern| Regex::new(&pattern))
        .transpose()
        .context("invalid path filter pattern")?;
    let resume = match (cli.continue_at, cli.continue_after) {
        (Some(marker), _) => Some(Resume {
            marker,
            mode: ResumeMode::At,
        }),
        (None, Some(marker)) => Some(Resume {
            marker,
            mode: ResumeMode::After,
        }),
        (None, None) => None,
    };
    let options = RunOptions {
        groups: cli.group,
        command: (!cli.command.is_empty()).then_some(cli.command),
        not_really: cli.not_really,
        verbosity: cli.verbose,
        list_repos: cli.list_repos,
        filter,
        resume,
    };
    let list_only = options.list_repos;

    let program = config.git.program().to_string();
    let git = GitClient::probe(&program).await?;

    let mut engine = SyncEngine::new(config, git, options);
    let summary = engine.run().await?;

    if !list_only {
        info!(
            "done: {} repositories processed, {} skipped",
            summary.processed, summary.skipped
        );
    }
    Ok(())
}

/// Initialize logging based on the repeated -v flag.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("repoherd={default_level}")));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
