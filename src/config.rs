//! Configuration model and the line-oriented directive parser.
//!
//! A configuration file is a sequence of directives, one per line. Blank
//! lines and `#` comments are ignored, and a bare path is shorthand for
//! `dir <path>`. Directives that precede any `group` line belong to the
//! reserved default group.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the group holding directives that precede any `group` line.
pub const DEFAULT_GROUP: &str = "_default_";

/// Reserved pseudo-group that expands to every declared group, unless a
/// group literally named `all` exists in the configuration.
pub const ALL_GROUP: &str = "all";

/// One configured repository reference, bound to its group.
#[derive(Debug, Clone)]
pub struct RepoCandidate {
    /// Absolute filesystem path, post tilde expansion.
    pub path: PathBuf,
    /// Name of the owning group.
    pub group: String,
    /// 1-based config file line the candidate came from, for diagnostics.
    pub line: usize,
}

/// Named ordered sequence of repository candidates.
#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub repos: Vec<RepoCandidate>,
}

/// The git executable path as a three-state tunable: an operator-supplied
/// value always wins over a `git` config line, and the first explicit value
/// from either source sticks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GitSetting {
    #[default]
    Unset,
    FromConfig(String),
    FromOperator(String),
}

impl GitSetting {
    /// The effective executable to invoke.
    pub fn program(&self) -> &str {
        match self {
            GitSetting::Unset => "git",
            GitSetting::FromConfig(p) | GitSetting::FromOperator(p) => p.as_str(),
        }
    }

    fn offer_from_config(&mut self, value: &str, line: usize) {
        match self {
            GitSetting::Unset => *self = GitSetting::FromConfig(value.to_string()),
            GitSetting::FromConfig(_) | GitSetting::FromOperator(_) => {
                warn!("line {line}: git executable already set, ignoring `git {value}`");
            }
        }
    }
}

/// Parsed configuration: ordered groups of repository candidates, the
/// global preferred-remote list, and the git executable setting. Read-only
/// once parsing finishes.
#[derive(Debug, Clone)]
pub struct Config {
    pub groups: Vec<Group>,
    pub preferred_remotes: Vec<String>,
    pub git: GitSetting,
}

impl Config {
    /// Load and parse the configuration file at `path`. `git` carries any
    /// operator override of the git executable so that config-file `git`
    /// lines lose to it.
    pub fn load(path: &Path, git: GitSetting) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::parse(&content, git)
    }

    /// Parse configuration text. Unknown keywords are collected while the
    /// rest of the input is still processed; if any were seen the whole
    /// parse fails afterwards.
    pub fn parse(text: &str, git: GitSetting) -> Result<Self> {
        let mut config = Config {
            groups: vec![Group {
                name: DEFAULT_GROUP.to_string(),
                repos: Vec::new(),
            }],
            preferred_remotes: Vec::new(),
            git,
        };
        let mut current = DEFAULT_GROUP.to_string();
        let mut unknown_keywords = 0usize;

        for (idx, raw) in text.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (keyword, param) = match line.split_once(char::is_whitespace) {
                Some((k, p)) => (k, p.trim()),
                None => (line, ""),
            };

            match keyword {
                "dir" | "repo" => config.register_dir(param, &current, line_no),
                "glob" => config.register_glob(param, &current, line_no),
                "prefer_remotes" => {
                    config
                        .preferred_remotes
                        .extend(param.split_whitespace().map(String::from));
                }
                "git" => {
                    if param.is_empty() {
                        warn!("line {line_no}: `git` without an executable path, ignoring");
                    } else {
                        config.git.offer_from_config(param, line_no);
                    }
                }
                "group" => {
                    if param.is_empty() {
                        warn!("line {line_no}: `group` without a name, ignoring");
                    } else {
                        config.group_mut(param);
                        current = param.to_string();
                    }
                }
                other if param.is_empty() => {
                    // A single token that is no keyword is a bare path.
                    config.register_dir(other, &current, line_no);
                }
                other => {
                    warn!("line {line_no}: unknown keyword `{other}`");
                    unknown_keywords += 1;
                }
            }
        }

        if unknown_keywords > 0 {
            bail!("{unknown_keywords} unknown keyword(s) in configuration");
        }
        Ok(config)
    }

    /// Look up a declared group by name.
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Declared group names in configuration order.
    pub fn group_names(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.name.clone()).collect()
    }

    /// Get the default configuration file path (XDG compliant).
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("failed to get user config directory")?;
        Ok(config_dir.join("repoherd").join("config"))
    }

    /// Example configuration text emitted by `--example-config`.
    pub fn example() -> &'static str {
        EXAMPLE_CONFIG
    }

    fn group_mut(&mut self, name: &str) -> &mut Group {
        let idx = match self.groups.iter().position(|g| g.name == name) {
            Some(i) => i,
            None => {
                self.groups.push(Group {
                    name: name.to_string(),
                    repos: Vec::new(),
                });
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx]
    }

    /// Register one directory candidate. Paths that do not exist or are not
    /// directories are dropped with a diagnostic, never a failure.
    fn register_dir(&mut self, path_str: &str, group: &str, line: usize) {
        if path_str.is_empty() {
            warn!("line {line}: directory directive without a path, ignoring");
            return;
        }
        let expanded = shellexpand::tilde(path_str);
        let path = absolutize(Path::new(expanded.as_ref()));
        if !path.is_dir() {
            warn!("line {line}: {} is not a directory, ignoring", path.display());
            return;
        }
        self.register_path(path, group, line);
    }

    /// Expand a glob pattern and register every matching directory, sorted
    /// by path string so traversal (and resume markers) stay deterministic.
    fn register_glob(&mut self, pattern: &str, group: &str, line: usize) {
        let expanded = shellexpand::tilde(pattern).into_owned();
        let glob = match wax::Glob::new(&expanded) {
            Ok(g) => g,
            Err(e) => {
                warn!("line {line}: invalid glob pattern `{pattern}`: {e}");
                return;
            }
        };
        let (prefix, glob) = glob.partition();
        let root = absolutize(&prefix);
        let mut matches: Vec<PathBuf> = glob
            .walk(&root)
            .flatten()
            .map(|entry| entry.into_path())
            .filter(|p| p.is_dir())
            .collect();
        matches.sort();
        debug!(
            "line {line}: glob `{pattern}` matched {} directories",
            matches.len()
        );
        for path in matches {
            self.register_path(path, group, line);
        }
    }

    fn register_path(&mut self, path: PathBuf, group: &str, line: usize) {
        let group_name = group.to_string();
        self.group_mut(group).repos.push(RepoCandidate {
            path,
            group: group_name,
            line,
        });
    }
}

fn absolutize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

const EXAMPLE_CONFIG: &str = "\
# repoherd example configuration
#
# Blank lines and lines starting with '#' are ignored. A bare path is
# shorthand for `dir <path>`.

# Fetch these remotes before pulling, in this order, when a repository
# has them. Useful to warm the object store from a fast local mirror.
prefer_remotes mirror origin

# Repositories that belong to no named group:
~/src/dotfiles
dir ~/src/scratch

# Every directory matching a glob becomes a repository. Recursive
# wildcards (**) are supported.
glob ~/work/*

# A `group` line switches the current group for everything below it.
group projects
repo ~/src/repoherd
glob ~/src/oss/*

group experiments
~/src/spike
";
