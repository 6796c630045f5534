//! Free-form notes that agents leave in a worktree ("what I'm doing now").

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use serde::Serialize;

/// Default location of the note file, relative to the worktree root
pub const DEFAULT_NOTE_FILE: &str = ".git/wtmon-note";

/// Notes older than this are considered abandoned
const NOTE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest note we publish
const NOTE_MAX_CHARS: usize = 500;

/// A note and when it was last written
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AiNote {
    pub content: String,
    /// Modification time in epoch milliseconds
    pub timestamp: i64,
}

/// Reads the note for a worktree, if any
pub trait NoteReader: Send + Sync {
    fn read(&self, worktree_path: &Path) -> Option<AiNote>;
}

/// Reader that never finds a note
#[derive(Debug, Clone, Default)]
pub struct NoNotes;

impl NoteReader for NoNotes {
    fn read(&self, _worktree_path: &Path) -> Option<AiNote> {
        None
    }
}

/// Reads a note from a file inside the worktree.
///
/// For linked worktrees a `.git/...` relative path is resolved against the
/// worktree's own git directory.
#[derive(Debug, Clone)]
pub struct FileNoteReader {
    relative_path: PathBuf,
}

impl Default for FileNoteReader {
    fn default() -> Self {
        Self::new(DEFAULT_NOTE_FILE)
    }
}

impl FileNoteReader {
    pub fn new(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }

    fn resolve(&self, worktree_path: &Path) -> PathBuf {
        if let Ok(rest) = self.relative_path.strip_prefix(".git") {
            if let Some(git_dir) = crate::watcher::resolve_git_dir(worktree_path) {
                return git_dir.join(rest);
            }
        }
        worktree_path.join(&self.relative_path)
    }
}

impl NoteReader for FileNoteReader {
    fn read(&self, worktree_path: &Path) -> Option<AiNote> {
        let path = self.resolve(worktree_path);
        let metadata = std::fs::metadata(&path).ok()?;
        let modified = metadata.modified().ok()?;
        if modified.elapsed().unwrap_or_default() > NOTE_MAX_AGE {
            return None;
        }

        let raw = std::fs::read_to_string(&path).ok()?;
        let content = raw.trim();
        if content.is_empty() {
            return None;
        }
        let content: String = content.chars().take(NOTE_MAX_CHARS).collect();
        let timestamp = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();

        Some(AiNote { content, timestamp })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_note_from_git_dir() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/wtmon-note"), "  Refactoring the parser\n").unwrap();

        let note = FileNoteReader::default().read(tmp.path()).unwrap();
        assert_eq!(note.content, "Refactoring the parser");
        assert!(note.timestamp > 0);
    }

    #[test]
    fn test_linked_worktree_note() {
        let tmp = tempfile::tempdir().unwrap();
        let git_dir = tmp.path().join("main/.git/worktrees/feature");
        std::fs::create_dir_all(&git_dir).unwrap();
        let linked = tmp.path().join("feature");
        std::fs::create_dir_all(&linked).unwrap();
        std::fs::write(linked.join(".git"), format!("gitdir: {}\n", git_dir.display())).unwrap();
        std::fs::write(git_dir.join("wtmon-note"), "Writing tests").unwrap();

        let note = FileNoteReader::default().read(&linked).unwrap();
        assert_eq!(note.content, "Writing tests");
    }

    #[test]
    fn test_missing_or_empty_note() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(FileNoteReader::default().read(tmp.path()).is_none());

        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join(".git/wtmon-note"), "   \n").unwrap();
        assert!(FileNoteReader::default().read(tmp.path()).is_none());
    }

    #[test]
    fn test_long_note_is_truncated() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("NOTE"), "x".repeat(2_000)).unwrap();
        let note = FileNoteReader::new("NOTE").read(tmp.path()).unwrap();
        assert_eq!(note.content.len(), NOTE_MAX_CHARS);
    }

    #[test]
    fn test_no_notes() {
        assert!(NoNotes.read(Path::new("/repo")).is_none());
    }
}
