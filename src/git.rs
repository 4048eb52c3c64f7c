//! All invocations of the external git tool, plus the one-time version
//! probe that gates capability-dependent behavior.

use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Boolean git-config key that excludes a repository from every action.
pub const SKIP_KEY: &str = "repoherd.skip";

/// Git-config key holding a space-separated list of sub-command names that
/// must not be run in a repository.
pub const SKIP_COMMANDS_KEY: &str = "repoherd.skip-commands";

/// `git config --get-regexp --name-only` needs at least this version.
const NAME_ONLY_MIN_VERSION: GitVersion = GitVersion {
    major: 2,
    minor: 6,
    patch: 0,
};

/// Parsed `git version` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct GitVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

/// Git operations handler. Every call shells out to the configured
/// executable and blocks the run until it completes.
#[derive(Debug)]
pub struct GitClient {
    program: String,
    config_names_only: bool,
}

impl GitClient {
    /// Query the tool's version once and derive capability flags from it.
    /// An unparseable version output is an unrecoverable environment error.
    pub async fn probe(program: &str) -> Result<Self> {
        let output = AsyncCommand::new(program)
            .arg("version")
            .output()
            .await
            .with_context(|| format!("failed to run `{program} version`"))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let version = parse_version(stdout.trim())
            .ok_or_else(|| anyhow!("cannot parse git version from {:?}", stdout.trim()))?;
        debug!(
            "detected git {}.{}.{}",
            version.major, version.minor, version.patch
        );
        Ok(Self {
            program: program.to_string(),
            config_names_only: version >= NAME_ONLY_MIN_VERSION,
        })
    }

    /// Build a client without probing. Used by callers that already know
    /// the capability set, and by tests.
    pub fn new(program: impl Into<String>, config_names_only: bool) -> Self {
        Self {
            program: program.into(),
            config_names_only,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn git(&self, path: &Path) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.arg("-C").arg(path);
        cmd
    }

    /// Whether the per-repository global skip flag is set.
    pub async fn skip_flag(&self, path: &Path) -> Result<bool> {
        let output = self
            .git(path)
            .args(["config", "--bool", SKIP_KEY])
            .output()
            .await
            .with_context(|| format!("failed to query {SKIP_KEY} in {}", path.display()))?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    /// Sub-command names disabled for this repository, case-folded.
    pub async fn skipped_commands(&self, path: &Path) -> Result<Vec<String>> {
        let output = self
            .git(path)
            .args(["config", SKIP_COMMANDS_KEY])
            .output()
            .await
            .with_context(|| format!("failed to query {SKIP_COMMANDS_KEY} in {}", path.display()))?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .split_whitespace()
            .map(|s| s.to_lowercase())
            .collect())
    }

    /// Cheap metadata query: is this path inside a git working copy? Works
    /// for repositories with no configured remotes, unlike remote
    /// enumeration.
    pub async fn is_working_copy(&self, path: &Path) -> Result<bool> {
        let output = self
            .git(path)
            .args(["rev-parse", "--git-dir"])
            .output()
            .await
            .with_context(|| format!("failed to run rev-parse in {}", path.display()))?;
        Ok(output.status.success())
    }

    /// Names of the locally configured remotes.
    pub async fn remotes(&self, path: &Path) -> Result<Vec<String>> {
        let mut cmd = self.git(path);
        cmd.args(["config", "--local"]);
        if self.config_names_only {
            cmd.arg("--name-only");
        }
        cmd.args(["--get-regexp", r"^remote\..*\.url"]);
        let output = cmd
            .output()
            .await
            .with_context(|| format!("failed to enumerate remotes in {}", path.display()))?;
        // git config exits non-zero when nothing matches.
        if !output.status.success() {
            return Ok(Vec::new());
        }
        Ok(parse_remote_names(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Current branch from the HEAD symbolic ref, or `None` when detached
    /// or otherwise unreadable.
    pub async fn current_branch(&self, path: &Path) -> Result<Option<String>> {
        let output = self
            .git(path)
            .args(["symbolic-ref", "-q", "HEAD"])
            .output()
            .await
            .with_context(|| format!("failed to read HEAD in {}", path.display()))?;
        if !output.status.success() {
            return Ok(None);
        }
        let full = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let branch = full.strip_prefix("refs/heads/").unwrap_or(&full);
        Ok(Some(branch.to_string()))
    }

    /// Short status text used for the verbose per-repository summary.
    pub async fn status_short(&self, path: &Path) -> Result<String> {
        let output = self
            .git(path)
            .args(["status", "--short"])
            .output()
            .await
            .with_context(|| format!("failed to run git status in {}", path.display()))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Fetch from one named remote. Mutating; non-zero exit is fatal.
    pub async fn fetch(&self, path: &Path, remote: &str) -> Result<()> {
        self.run_checked(path, &["fetch", remote]).await
    }

    /// Fetch-only update of the default remote. Mutating; non-zero exit is
    /// fatal.
    pub async fn fetch_verbose(&self, path: &Path) -> Result<()> {
        self.run_checked(path, &["fetch", "-v"]).await
    }

    /// Full synchronization (fetch + merge). Mutating; non-zero exit is
    /// fatal.
    pub async fn pull(&self, path: &Path) -> Result<()> {
        self.run_checked(path, &["pull"]).await
    }

    /// Run arbitrary override tokens verbatim, propagating a non-zero exit
    /// as a fatal error.
    pub async fn run(&self, path: &Path, tokens: &[String]) -> Result<()> {
        let status = self
            .git(path)
            .args(tokens)
            .status()
            .await
            .with_context(|| {
                format!("failed to run `{} {}`", self.program, tokens.join(" "))
            })?;
        if !status.success() {
            bail!(
                "`{} {}` failed in {} ({status})",
                self.program,
                tokens.join(" "),
                path.display()
            );
        }
        Ok(())
    }

    async fn run_checked(&self, path: &Path, args: &[&str]) -> Result<()> {
        let status = self
            .git(path)
            .args(args)
            .status()
            .await
            .with_context(|| format!("failed to run `{} {}`", self.program, args.join(" ")))?;
        if !status.success() {
            bail!(
                "`{} {}` failed in {} ({status})",
                self.program,
                args.join(" "),
                path.display()
            );
        }
        Ok(())
    }
}

/// Parse `"<name> version X.Y.Z..."` into a version triple. Trailing
/// vendor segments (e.g. `.windows.1`) are ignored.
fn parse_version(text: &str) -> Option<GitVersion> {
    let mut words = text.split_whitespace();
    words.find(|w| *w == "version")?;
    let triple = words.next()?;
    let mut parts = triple.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Some(GitVersion {
        major,
        minor,
        patch,
    })
}

/// Extract remote names from `git config --get-regexp` output, in both the
/// `--name-only` shape (`remote.<name>.url`) and the key-value fallback
/// (`remote.<name>.url <value>`).
fn parse_remote_names(output: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in output.lines() {
        let key = line.split_whitespace().next().unwrap_or("");
        if let Some(rest) = key.strip_prefix("remote.") {
            if let Some(name) = rest.strip_suffix(".url") {
                names.push(name.to_string());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_version() {
        let v = parse_version("git version 2.39.2").unwrap();
        assert_eq!(
            v,
            GitVersion {
                major: 2,
                minor: 39,
                patch: 2
            }
        );
    }

    #[test]
    fn parses_vendor_suffixed_version() {
        let v = parse_version("git version 2.45.0.windows.1").unwrap();
        assert_eq!(v.major, 2);
        assert_eq!(v.minor, 45);
        assert_eq!(v.patch, 0);
    }

    #[test]
    fn parses_two_part_version() {
        let v = parse_version("git version 1.8").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 8, 0));
    }

    #[test]
    fn rejects_garbage_version() {
        assert!(parse_version("").is_none());
        assert!(parse_version("not a version at all").is_none());
        assert!(parse_version("git version").is_none());
        assert!(parse_version("git version x.y.z").is_none());
    }

    #[test]
    fn version_ordering_gates_name_only() {
        let old = parse_version("git version 1.9.5").unwrap();
        let new = parse_version("git version 2.6.0").unwrap();
        assert!(old < NAME_ONLY_MIN_VERSION);
        assert!(new >= NAME_ONLY_MIN_VERSION);
    }

    #[test]
    fn parses_name_only_remote_output() {
        let names = parse_remote_names("remote.origin.url\nremote.mirror.url\n");
        assert_eq!(names, vec!["origin", "mirror"]);
    }

    #[test]
    fn parses_key_value_remote_output() {
        let names = parse_remote_names(
            "remote.origin.url https://example.com/a.git\n\
             remote.up.stream.url git@example.com:b.git\n",
        );
        // Remote names may themselves contain dots.
        assert_eq!(names, vec!["origin", "up.stream"]);
    }

    #[test]
    fn ignores_non_remote_config_lines() {
        let names = parse_remote_names("core.bare false\nbranch.main.remote origin\n");
        assert!(names.is_empty());
    }
}
