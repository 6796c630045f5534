use std::path::Path;

use futures_util::future::{BoxFuture, FutureExt};
use once_cell::sync::Lazy;
use regex::Regex;

/// Derives an issue number for a worktree's branch.
///
/// `extract_sync` is a cheap best guess used during reconciliation;
/// `extract` is the authoritative answer and may do I/O.
pub trait IssueExtractor: Send + Sync {
    /// Best-effort guess from the branch name alone
    fn extract_sync(&self, branch: &str) -> Option<u64>;

    /// Authoritative lookup; defaults to the synchronous guess
    fn extract<'a>(&'a self, branch: &'a str, _path: &'a Path) -> BoxFuture<'a, Option<u64>> {
        let guess = self.extract_sync(branch);
        async move { guess }.boxed()
    }
}

/// Extracts issue numbers from conventional branch names
/// (`issue-123`, `feature/123-login`, `gh-42`, `fix/#7`)
#[derive(Debug, Clone, Default)]
pub struct BranchIssueExtractor;

impl IssueExtractor for BranchIssueExtractor {
    fn extract_sync(&self, branch: &str) -> Option<u64> {
        static PREFIXED_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"(?i)(?:^|[/_-])(?:issue|issues|gh|#)[-_/]?#?(\d+)(?:$|[/_-])").unwrap()
        });
        static LEADING_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?:^|/)#?(\d+)(?:$|[-_])").unwrap());

        PREFIXED_RE
            .captures(branch)
            .or_else(|| LEADING_RE.captures(branch))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .filter(|n| *n > 0)
    }
}
