use std::collections::HashMap;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::process::Command;

use super::{FileChange, FileStatus, GitBackend, GitError, GitStatus, Worktree};

/// Timeout for git commands to prevent hanging on unresponsive repos
const GIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for commands that touch the working tree (add/remove worktree)
const GIT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// [`GitBackend`] backed by the `git` executable
#[derive(Debug, Clone, Default)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }
}

/// Run `git -C <dir> <args>` with a timeout
async fn run_git(dir: &Path, args: &[&str], timeout: Duration) -> Result<Output, GitError> {
    let command = args.first().copied().unwrap_or("git").to_string();
    let output = tokio::time::timeout(
        timeout,
        Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| GitError::Timeout {
        command: command.clone(),
        secs: timeout.as_secs(),
    })??;
    Ok(output)
}

/// Like [`run_git`] but turns a non-zero exit into a classified error
async fn run_git_checked(
    dir: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<String, GitError> {
    let output = run_git(dir, args, timeout).await?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).to_string());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(classify_failure(dir, args, stderr))
}

/// Map git stderr onto the error kinds the scheduler cares about
fn classify_failure(dir: &Path, args: &[&str], stderr: String) -> GitError {
    let path = dir.to_string_lossy().to_string();
    if stderr.contains("index.lock") {
        return GitError::IndexLocked { path };
    }
    if stderr.contains("not a git repository") || stderr.contains("cannot change to") {
        return GitError::WorktreeRemoved { path };
    }
    if stderr.contains("not fully merged") {
        let branch = args.last().copied().unwrap_or_default().to_string();
        return GitError::UnmergedBranch { branch };
    }
    GitError::CommandFailed {
        command: args.first().copied().unwrap_or("git").to_string(),
        stderr,
    }
}

impl GitBackend for GitCli {
    async fn status(&self, path: &Path) -> Result<GitStatus, GitError> {
        if !path.exists() {
            return Err(GitError::WorktreeRemoved {
                path: path.to_string_lossy().to_string(),
            });
        }

        let (porcelain, numstat, log) = tokio::join!(
            run_git_checked(
                path,
                &["status", "--porcelain", "--untracked-files=all"],
                GIT_TIMEOUT
            ),
            run_git(path, &["diff", "--numstat", "HEAD"], GIT_TIMEOUT),
            run_git(path, &["log", "-1", "--format=%ct%x00%s"], GIT_TIMEOUT),
        );

        let mut changes = parse_porcelain_status(&porcelain?);

        // numstat and log fail on a repo without commits; both are optional
        if let Ok(out) = numstat {
            if out.status.success() {
                let stats = parse_numstat(&String::from_utf8_lossy(&out.stdout));
                for change in &mut changes {
                    if let Some((ins, del)) = stats.get(&change.path) {
                        change.insertions = *ins;
                        change.deletions = *del;
                    }
                }
            }
        }

        let (last_commit_timestamp_ms, last_commit_message) = match log {
            Ok(out) if out.status.success() => {
                parse_last_commit(&String::from_utf8_lossy(&out.stdout))
            }
            _ => (None, None),
        };

        Ok(GitStatus {
            changed_file_count: changes.len(),
            changes,
            last_commit_message,
            last_commit_timestamp_ms,
        })
    }

    async fn list_worktrees(&self, root: &Path) -> Result<Vec<Worktree>, GitError> {
        let stdout =
            run_git_checked(root, &["worktree", "list", "--porcelain"], GIT_TIMEOUT).await?;
        Ok(parse_worktree_list(&stdout))
    }

    async fn add_worktree(
        &self,
        root: &Path,
        path: &Path,
        branch: &str,
        base: Option<&str>,
    ) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "add", "-b", branch, path_str.as_str()];
        if let Some(base) = base {
            args.push(base);
        }
        run_git_checked(root, &args, GIT_WRITE_TIMEOUT).await?;
        Ok(())
    }

    async fn remove_worktree(&self, root: &Path, path: &Path, force: bool) -> Result<(), GitError> {
        let path_str = path.to_string_lossy().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(path_str.as_str());
        run_git_checked(root, &args, GIT_WRITE_TIMEOUT).await?;
        Ok(())
    }

    async fn delete_branch(&self, root: &Path, branch: &str, force: bool) -> Result<(), GitError> {
        let flag = if force { "-D" } else { "-d" };
        run_git_checked(root, &["branch", flag, branch], GIT_TIMEOUT).await?;
        Ok(())
    }
}

/// Parse `git worktree list --porcelain`. The first record is the main worktree.
/// Bare entries are skipped.
pub(crate) fn parse_worktree_list(stdout: &str) -> Vec<Worktree> {
    let mut worktrees = Vec::new();

    for (index, block) in stdout.split("\n\n").enumerate() {
        let mut path = None;
        let mut head = None;
        let mut branch = None;
        let mut bare = false;

        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(p.trim().to_string());
            } else if let Some(h) = line.strip_prefix("HEAD ") {
                head = Some(h.trim().to_string());
            } else if let Some(b) = line.strip_prefix("branch ") {
                let b = b.trim();
                branch = Some(b.strip_prefix("refs/heads/").unwrap_or(b).to_string());
            } else if line.trim() == "bare" {
                bare = true;
            }
        }

        let Some(path) = path else { continue };
        if bare {
            continue;
        }
        let mut wt = Worktree::new(path, branch, index == 0);
        wt.head = head;
        worktrees.push(wt);
    }

    worktrees
}

/// Parse `git status --porcelain` (v1) into file changes
pub(crate) fn parse_porcelain_status(stdout: &str) -> Vec<FileChange> {
    stdout
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let (xy, rest) = line.split_at(2);
            let raw_path = rest.trim_start();
            // Renames are reported as "old -> new"
            let path = raw_path
                .rsplit_once(" -> ")
                .map(|(_, new)| new)
                .unwrap_or(raw_path)
                .trim_matches('"')
                .to_string();
            FileChange {
                path,
                status: parse_xy(xy),
                insertions: None,
                deletions: None,
            }
        })
        .collect()
}

fn parse_xy(xy: &str) -> FileStatus {
    let mut chars = xy.chars();
    let x = chars.next().unwrap_or(' ');
    let y = chars.next().unwrap_or(' ');
    match (x, y) {
        ('?', '?') => FileStatus::Untracked,
        ('U', _) | (_, 'U') | ('A', 'A') | ('D', 'D') => FileStatus::Conflicted,
        ('R', _) | (_, 'R') => FileStatus::Renamed,
        ('A', _) => FileStatus::Added,
        ('D', _) | (_, 'D') => FileStatus::Deleted,
        _ => FileStatus::Modified,
    }
}

/// Parse `git diff --numstat` into path -> (insertions, deletions).
/// Binary files report `-` and map to `None`.
pub(crate) fn parse_numstat(stdout: &str) -> HashMap<String, (Option<u32>, Option<u32>)> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let ins = parts.next()?.parse::<u32>().ok();
            let del = parts.next()?.parse::<u32>().ok();
            let path = parts.next()?;
            let path = path
                .rsplit_once(" => ")
                .map(|(_, new)| new.trim_end_matches('}'))
                .unwrap_or(path);
            Some((path.to_string(), (ins, del)))
        })
        .collect()
}

/// Parse `git log -1 --format=%ct%x00%s`
fn parse_last_commit(stdout: &str) -> (Option<i64>, Option<String>) {
    let line = stdout.trim_end_matches('\n');
    let (ts, subject) = match line.split_once('\0') {
        Some((ts, subject)) => (ts, Some(subject.to_string())),
        None => (line, None),
    };
    let ts_ms = ts
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|dt| dt.timestamp_millis());
    (ts_ms, subject.filter(|s| !s.is_empty()))
}
