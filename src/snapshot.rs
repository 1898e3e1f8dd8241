//! Content-hash snapshots of a plugin's source tree, used to detect real
//! changes independent of filesystem-event noise.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::HostResult;

/// A relative-path -> SHA-256-hex-digest map for one directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: HashMap<PathBuf, String>,
}

/// Result of comparing two snapshots of the same directory taken at
/// different times.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

impl Snapshot {
    /// Walks `dir`, hashing every regular file not under a hidden (`.`-prefixed)
    /// path component, keyed by path relative to `dir`.
    pub fn create(dir: &Path) -> HostResult<Self> {
        let mut files = HashMap::new();
        let mut stack = vec![dir.to_path_buf()];

        while let Some(current) = stack.pop() {
            for entry in std::fs::read_dir(&current)?.flatten() {
                let path = entry.path();
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name.starts_with('.') {
                    continue;
                }

                if path.is_dir() {
                    stack.push(path);
                    continue;
                }

                let contents = std::fs::read(&path)?;
                let mut hasher = Sha256::new();
                hasher.update(&contents);
                let digest = hex::encode(hasher.finalize());

                let relative = path.strip_prefix(dir).unwrap_or(&path).to_path_buf();
                files.insert(relative, digest);
            }
        }

        Ok(Self { files })
    }

    /// Computes what changed between `old` and `new`. Identical snapshots
    /// always diff to an empty result.
    pub fn diff(old: &Snapshot, new: &Snapshot) -> SnapshotDiff {
        let old_keys: HashSet<_> = old.files.keys().collect();
        let new_keys: HashSet<_> = new.files.keys().collect();

        let added = new_keys
            .difference(&old_keys)
            .map(|p| (*p).clone())
            .collect();
        let removed = old_keys
            .difference(&new_keys)
            .map(|p| (*p).clone())
            .collect();
        let modified = old_keys
            .intersection(&new_keys)
            .filter(|p| old.files.get(**p) != new.files.get(**p))
            .map(|p| (*p).clone())
            .collect();

        SnapshotDiff {
            added,
            removed,
            modified,
        }
    }

    pub fn has_changed(old: &Snapshot, new: &Snapshot) -> bool {
        !Snapshot::diff(old, new).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_snapshots_diff_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();

        let s1 = Snapshot::create(dir.path()).unwrap();
        let s2 = Snapshot::create(dir.path()).unwrap();

        assert!(Snapshot::diff(&s1, &s2).is_empty());
        assert!(!Snapshot::has_changed(&s1, &s2));
    }

    #[test]
    fn detects_added_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let before = Snapshot::create(dir.path()).unwrap();

        std::fs::write(dir.path().join("b.rs"), "fn b() {}").unwrap();
        let after = Snapshot::create(dir.path()).unwrap();

        let diff = Snapshot::diff(&before, &after);
        assert_eq!(diff.added.len(), 1);
        assert!(diff.removed.is_empty());
        assert!(diff.modified.is_empty());
    }

    #[test]
    fn detects_modified_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let before = Snapshot::create(dir.path()).unwrap();

        std::fs::write(dir.path().join("a.rs"), "fn a() { 1 }").unwrap();
        let after = Snapshot::create(dir.path()).unwrap();

        let diff = Snapshot::diff(&before, &after);
        assert_eq!(diff.modified.len(), 1);
    }

    #[test]
    fn detects_removed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        std::fs::write(dir.path().join("b.rs"), "fn b() {}").unwrap();
        let before = Snapshot::create(dir.path()).unwrap();

        std::fs::remove_file(dir.path().join("b.rs")).unwrap();
        let after = Snapshot::create(dir.path()).unwrap();

        let diff = Snapshot::diff(&before, &after);
        assert_eq!(diff.removed.len(), 1);
    }

    #[test]
    fn ignores_hidden_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: refs/heads/main").unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();

        let snapshot = Snapshot::create(dir.path()).unwrap();
        assert_eq!(snapshot.files.len(), 1);
    }
}
