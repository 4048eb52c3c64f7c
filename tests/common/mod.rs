/// Common test utilities for repoherd integration tests.
///
/// Provides a temp workspace with fake repository directories and a stub
/// `git` shell script that records every invocation to a log file, so
/// engine behavior is observable without touching a real repository or
/// the network.
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// The stub reads per-repository answer files placed in the repo dir:
/// `.branch` (current branch name), `.remotes` (one remote name per line),
/// `.skipflag` (repoherd.skip=true), `.skipcmds` (repoherd.skip-commands
/// value), `.norepo` (not a working copy), `.fail` (fetch/pull exit 1).
const STUB_GIT: &str = r#"#!/bin/sh
log="__LOG__"
printf '%s\n' "$*" >> "$log"
if [ "$1" = "version" ]; then
    echo "git version 2.39.2"
    exit 0
fi
if [ "$1" = "-C" ]; then
    repo="$2"
    shift 2
fi
case "$1" in
    config)
        shift
        case "$*" in
            *"--bool repoherd.skip")
                [ -f "$repo/.skipflag" ] && { echo true; exit 0; }
                exit 1
                ;;
            "repoherd.skip-commands")
                [ -f "$repo/.skipcmds" ] && { cat "$repo/.skipcmds"; exit 0; }
                exit 1
                ;;
            *"--get-regexp"*)
                if [ -f "$repo/.remotes" ]; then
                    while read -r r; do echo "remote.$r.url"; done < "$repo/.remotes"
                    exit 0
                fi
                exit 1
                ;;
        esac
        exit 1
        ;;
    rev-parse)
        [ -f "$repo/.norepo" ] && exit 128
        echo .git
        exit 0
        ;;
    symbolic-ref)
        if [ -f "$repo/.branch" ]; then
            echo "refs/heads/$(cat "$repo/.branch")"
            exit 0
        fi
        exit 1
        ;;
    status)
        exit 0
        ;;
    fetch|pull)
        [ -f "$repo/.fail" ] && exit 1
        exit 0
        ;;
    boom)
        exit 3
        ;;
esac
exit 0
"#;

pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub git_stub: PathBuf,
    pub call_log: PathBuf,
}

impl TestEnvironment {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let call_log = temp_dir.path().join("git-calls.log");
        let env = Self {
            git_stub: temp_dir.path().join("git"),
            call_log,
            temp_dir,
        };
        let script = STUB_GIT.replace("__LOG__", &env.call_log.to_string_lossy());
        write_executable(&env.git_stub, &script);
        env
    }

    /// Create a fake repository directory. An empty `branch` simulates a
    /// detached HEAD; `remotes` is what the stub reports for enumeration.
    pub fn repo(&self, name: &str, branch: &str, remotes: &[&str]) -> PathBuf {
        let path = self.temp_dir.path().join("repos").join(name);
        std::fs::create_dir_all(&path).expect("failed to create repo dir");
        if !branch.is_empty() {
            std::fs::write(path.join(".branch"), branch).expect("failed to write branch file");
        }
        if !remotes.is_empty() {
            let mut content = remotes.join("\n");
            content.push('\n');
            std::fs::write(path.join(".remotes"), content).expect("failed to write remotes file");
        }
        path
    }

    /// Drop a marker/answer file into a repository directory.
    pub fn mark(&self, repo: &Path, file: &str, content: &str) {
        std::fs::write(repo.join(file), content).expect("failed to write marker file");
    }

    pub fn git_program(&self) -> String {
        self.git_stub.to_string_lossy().into_owned()
    }

    /// Write an additional executable script into the temp dir.
    pub fn write_script(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        write_executable(&path, content);
        path
    }

    /// Raw argv lines of every git invocation so far.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.call_log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// Sub-commands invoked in one repository, `-C <path>` prefix stripped.
    pub fn calls_in(&self, repo: &Path) -> Vec<String> {
        let prefix = format!("-C {} ", repo.display());
        self.calls()
            .into_iter()
            .filter_map(|line| line.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Only the mutating invocations (fetch/pull/override) in one repo.
    pub fn mutating_calls_in(&self, repo: &Path) -> Vec<String> {
        self.calls_in(repo)
            .into_iter()
            .filter(|cmd| {
                cmd.starts_with("fetch") || cmd.starts_with("pull") || cmd.starts_with("boom")
            })
            .collect()
    }
}

fn write_executable(path: &Path, content: &str) {
    std::fs::write(path, content).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .expect("failed to make script executable");
    }
}
