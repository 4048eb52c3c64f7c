//! Sync Engine - resolves requested groups into an ordered, deduplicated
//! worklist and walks it one repository at a time.
//!
//! Group order is command-line order, with the `all` pseudo-group expanding
//! to the declared groups in alphabetical order at the point it is dequeued.
//! Within a group, repositories run in config declaration order. All git
//! invocations are awaited to completion before the next repository starts;
//! there is no parallelism.

use crate::config::{Config, RepoCandidate, ALL_GROUP, DEFAULT_GROUP};
use crate::git::{GitClient, SKIP_COMMANDS_KEY, SKIP_KEY};
use anyhow::Result;
use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Marker files that switch a repository on a non-primary branch to a
/// fetch-only update instead of a full pull.
pub const FETCH_ONLY_MARKERS: &[&str] = &[".fetchonly", ".fetch-only"];

/// Branch names that always get the full pull treatment.
const PRIMARY_BRANCHES: &[&str] = &["main", "master"];

/// How a resume marker relates to the matching repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Process the matching repository and everything after it.
    At,
    /// Skip the matching repository too; process only what follows.
    After,
}

/// Operator-supplied resume marker: a full path, or a basename when it
/// contains no path separator.
#[derive(Debug, Clone)]
pub struct Resume {
    pub marker: String,
    pub mode: ResumeMode,
}

impl Resume {
    fn matches(&self, path: &Path) -> bool {
        if self.marker.contains(std::path::MAIN_SEPARATOR) {
            path.to_string_lossy() == self.marker.as_str()
        } else {
            path.file_name()
                .map_or(false, |name| name.to_string_lossy() == self.marker.as_str())
        }
    }
}

/// Immutable snapshot of operator intent for one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Requested group names, in command-line order. Empty means the
    /// default group.
    pub groups: Vec<String>,
    /// Sub-command tokens replacing the default fetch-then-pull action.
    pub command: Option<Vec<String>>,
    /// Dry run: never invoke a mutating git command.
    pub not_really: bool,
    /// Verbosity level from repeated -v flags.
    pub verbosity: u8,
    /// Print each repository path instead of acting on it.
    pub list_repos: bool,
    /// Only act on paths matching this pattern, anchored at the start.
    pub filter: Option<Regex>,
    /// Skip a prefix of the traversal on a rerun.
    pub resume: Option<Resume>,
}

/// Why a repository was passed over. All of these are non-fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadySeen,
    ResumeFiltered,
    FilteredOut,
    ConfigFlag,
    NotAWorkingCopy,
    CommandDisabled,
    NoRemotes,
    DetachedHead,
}

/// Facts discovered while visiting one repository. Written at most once
/// per run and purely observational.
#[derive(Debug, Clone, Default)]
pub struct RepoNotes {
    pub branch: Option<String>,
    pub skip: Option<SkipReason>,
    pub fetch_marker: Option<&'static str>,
}

/// Per-repository record in the run summary.
#[derive(Debug, Clone)]
pub struct RepoReport {
    pub path: PathBuf,
    pub group: String,
    pub notes: RepoNotes,
}

/// Results from a complete run.
#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub processed: usize,
    pub skipped: usize,
    pub results: Vec<RepoReport>,
}

impl SyncSummary {
    fn push(&mut self, repo: &RepoCandidate, notes: RepoNotes) {
        if notes.skip.is_some() {
            self.skipped += 1;
        } else {
            self.processed += 1;
        }
        self.results.push(RepoReport {
            path: repo.path.clone(),
            group: repo.group.clone(),
            notes,
        });
    }
}

/// Run-scoped traversal state, owned by the engine and discarded at exit.
struct TraversalState {
    completed_groups: HashSet<String>,
    /// Dedup by literal path string; symlink aliasing is deliberately not
    /// detected.
    visited: HashSet<String>,
    /// Starts true when a resume marker was supplied, flips false for the
    /// rest of the run once the marker is reached.
    resuming: bool,
}

/// The traversal engine: walks groups and repositories per the parsed
/// configuration and the run options.
pub struct SyncEngine {
    config: Config,
    git: GitClient,
    options: RunOptions,
    state: TraversalState,
}

impl SyncEngine {
    pub fn new(config: Config, git: GitClient, options: RunOptions) -> Self {
        let resuming = options.resume.is_some();
        Self {
            config,
            git,
            options,
            state: TraversalState {
                completed_groups: HashSet::new(),
                visited: HashSet::new(),
                resuming,
            },
        }
    }

    /// Process every requested group, front to back. Returns the summary on
    /// normal completion; a fatal git failure aborts the whole run.
    pub async fn run(&mut self) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();
        let mut queue: VecDeque<String> = if self.options.groups.is_empty() {
            VecDeque::from([DEFAULT_GROUP.to_string()])
        } else {
            self.options.groups.iter().cloned().collect()
        };

        while let Some(name) = queue.pop_front() {
            if name.is_empty() {
                warn!("ignoring empty group name");
                continue;
            }
            if self.state.completed_groups.contains(&name) {
                debug!("group {name} already processed this run, skipping");
                continue;
            }
            if name == ALL_GROUP && self.config.group(ALL_GROUP).is_none() {
                // Expand in front of whatever was queued after `all`.
                self.state.completed_groups.insert(name);
                let mut names = self.config.group_names();
                names.sort();
                for group_name in names.into_iter().rev() {
                    queue.push_front(group_name);
                }
                continue;
            }
            self.process_group(&name, &mut summary).await?;
            self.state.completed_groups.insert(name);
        }
        Ok(summary)
    }

    async fn process_group(&mut self, name: &str, summary: &mut SyncSummary) -> Result<()> {
        let Some(group) = self.config.group(name) else {
            warn!("no group named `{name}` in configuration");
            return Ok(());
        };
        info!("processing group `{name}` ({} repositories)", group.repos.len());
        let repos = group.repos.clone();
        for repo in &repos {
            self.process_repo(repo, summary).await?;
        }
        Ok(())
    }

    async fn process_repo(&mut self, repo: &RepoCandidate, summary: &mut SyncSummary) -> Result<()> {
        let path_str = repo.path.to_string_lossy().into_owned();
        let mut notes = RepoNotes::default();

        if self.state.visited.contains(&path_str) {
            debug!("{path_str} already seen this run, skipping");
            notes.skip = Some(SkipReason::AlreadySeen);
            summary.push(repo, notes);
            return Ok(());
        }
        // Marked before the resume filter on purpose: a repository skipped
        // over while resuming still counts as seen for dedup.
        self.state.visited.insert(path_str.clone());

        if self.state.resuming {
            if let Some(resume) = &self.options.resume {
                if resume.matches(&repo.path) {
                    self.state.resuming = false;
                    if resume.mode == ResumeMode::After {
                        info!("resume marker reached at {path_str}, skipping it");
                        notes.skip = Some(SkipReason::ResumeFiltered);
                        summary.push(repo, notes);
                        return Ok(());
                    }
                } else {
                    debug!("resuming, marker not reached yet: skipping {path_str}");
                    notes.skip = Some(SkipReason::ResumeFiltered);
                    summary.push(repo, notes);
                    return Ok(());
                }
            }
        }

        if self.options.list_repos {
            println!("{path_str}");
            summary.push(repo, notes);
            return Ok(());
        }

        if let Some(filter) = &self.options.filter {
            // Anchored at the start of the path; need not consume it all.
            let hit = filter.find(&path_str).map_or(false, |m| m.start() == 0);
            if !hit {
                info!("{path_str} does not match the path filter, skipping");
                notes.skip = Some(SkipReason::FilteredOut);
                summary.push(repo, notes);
                return Ok(());
            }
        }

        // One check per repository, whatever action runs afterwards.
        if self.git.skip_flag(&repo.path).await? {
            info!("{path_str}: {SKIP_KEY} is set, skipping");
            notes.skip = Some(SkipReason::ConfigFlag);
            summary.push(repo, notes);
            return Ok(());
        }

        if let Some(tokens) = self.options.command.clone() {
            self.run_override(repo, &tokens, &mut notes).await?;
        } else {
            self.sync_repo(repo, &mut notes).await?;
        }
        summary.push(repo, notes);
        Ok(())
    }

    /// Run the operator-supplied sub-command instead of the default sync.
    async fn run_override(
        &self,
        repo: &RepoCandidate,
        tokens: &[String],
        notes: &mut RepoNotes,
    ) -> Result<()> {
        // rev-parse rather than remote enumeration: overrides like fsck
        // must work in repositories with zero remotes.
        if !self.git.is_working_copy(&repo.path).await? {
            warn!("{} is not a git working copy, skipping", repo.path.display());
            notes.skip = Some(SkipReason::NotAWorkingCopy);
            return Ok(());
        }

        let disabled = self.git.skipped_commands(&repo.path).await?;
        if let Some(first) = tokens.first() {
            if disabled.contains(&first.to_lowercase()) {
                info!(
                    "{}: `{first}` is disabled by {SKIP_COMMANDS_KEY}, skipping",
                    repo.path.display()
                );
                notes.skip = Some(SkipReason::CommandDisabled);
                return Ok(());
            }
        }

        if self.options.not_really {
            println!(
                "would run `{} {}` in {}",
                self.git.program(),
                tokens.join(" "),
                repo.path.display()
            );
            return Ok(());
        }

        info!(
            "running `{} {}` in {}",
            self.git.program(),
            tokens.join(" "),
            repo.path.display()
        );
        self.git.run(&repo.path, tokens).await
    }

    /// Default action: fetch the preferred remotes present here, then pull
    /// (or fetch only, when a marker file protects a non-primary branch).
    async fn sync_repo(&self, repo: &RepoCandidate, notes: &mut RepoNotes) -> Result<()> {
        let path = &repo.path;

        let mut remotes = self.git.remotes(path).await?;
        if remotes.is_empty() {
            info!("{} has no remotes, skipping", path.display());
            notes.skip = Some(SkipReason::NoRemotes);
            return Ok(());
        }

        let Some(branch) = self.git.current_branch(path).await? else {
            info!(
                "{}: cannot determine the current branch (detached HEAD?), skipping",
                path.display()
            );
            notes.skip = Some(SkipReason::DetachedHead);
            return Ok(());
        };
        notes.branch = Some(branch.clone());

        if self.options.verbosity > 0 {
            let status = self.git.status_short(path).await?;
            println!("{} [{branch}]", path.display());
            for line in status.lines() {
                println!("  {line}");
            }
        }

        if self.options.not_really {
            println!("would sync {} [{branch}]", path.display());
            return Ok(());
        }

        for preferred in &self.config.preferred_remotes {
            if let Some(pos) = remotes.iter().position(|r| r == preferred) {
                info!("fetching preferred remote {preferred} in {}", path.display());
                self.git.fetch(path, preferred).await?;
                // The pull will not need to fetch from this remote again.
                remotes.remove(pos);
            }
        }

        if !PRIMARY_BRANCHES.contains(&branch.as_str()) {
            if let Some(marker) = FETCH_ONLY_MARKERS
                .iter()
                .copied()
                .find(|name| path.join(name).is_file())
            {
                info!(
                    "{} is on `{branch}` and carries {marker}, fetching only",
                    path.display()
                );
                notes.fetch_marker = Some(marker);
                return self.git.fetch_verbose(path).await;
            }
        }

        self.git.pull(path).await
    }
}
