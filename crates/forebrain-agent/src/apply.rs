//! Change applier: each operation commits independently; one failure never
//! aborts the batch or rolls back earlier members.

use forebrain_core::{DeleteOp, PatchFailure, PatchOp, WriteOp, repo_relative};
use std::fs;
use std::path::Path;

/// Changes proposed by the model and not yet applied, carried across a
/// write-permission pause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChanges {
    pub writes: Vec<WriteOp>,
    pub deletes: Vec<DeleteOp>,
    pub patches: Vec<PatchOp>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty() && self.patches.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} writes, {} deletes, {} patches",
            self.writes.len(),
            self.deletes.len(),
            self.patches.len()
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub writes: Vec<WriteOp>,
    pub deletes: Vec<DeleteOp>,
    pub patches: Vec<PatchOp>,
    pub patch_failures: Vec<PatchFailure>,
}

impl ApplyReport {
    pub fn mismatched_patch_paths(&self) -> Vec<String> {
        self.patch_failures
            .iter()
            .filter(|f| f.reason == "patch failed to apply")
            .map(|f| f.path.clone())
            .collect()
    }
}

pub fn apply_all(root: &Path, pending: &PendingChanges) -> ApplyReport {
    let (patches, patch_failures) = apply_patches(root, &pending.patches);
    ApplyReport {
        writes: apply_writes(root, &pending.writes),
        deletes: apply_deletes(root, &pending.deletes),
        patches,
        patch_failures,
    }
}

/// Write each file, creating parent directories. Invalid paths and I/O
/// failures are simply omitted from the applied list.
pub fn apply_writes(root: &Path, writes: &[WriteOp]) -> Vec<WriteOp> {
    let mut applied = Vec::new();
    for w in writes {
        let Ok(clean) = repo_relative(&w.path) else {
            continue;
        };
        let path = root.join(&clean);
        if let Some(parent) = path.parent() {
            if fs::create_dir_all(parent).is_err() {
                continue;
            }
        }
        if fs::write(&path, &w.content).is_err() {
            continue;
        }
        applied.push(WriteOp {
            path: clean.to_string_lossy().replace('\\', "/"),
            content: w.content.clone(),
        });
    }
    applied
}

pub fn apply_deletes(root: &Path, deletes: &[DeleteOp]) -> Vec<DeleteOp> {
    let mut applied = Vec::new();
    for d in deletes {
        let Ok(clean) = repo_relative(&d.path) else {
            continue;
        };
        if fs::remove_file(root.join(&clean)).is_err() {
            continue;
        }
        applied.push(DeleteOp {
            path: clean.to_string_lossy().replace('\\', "/"),
        });
    }
    applied
}

/// Apply each patch in memory first; the file is rewritten only when the
/// whole diff applied cleanly. Failures carry a reason the orchestrator
/// inspects for the rewrite retry.
pub fn apply_patches(root: &Path, patches: &[PatchOp]) -> (Vec<PatchOp>, Vec<PatchFailure>) {
    let mut applied = Vec::new();
    let mut failed = Vec::new();
    for p in patches {
        let Ok(clean) = repo_relative(&p.path) else {
            failed.push(PatchFailure {
                path: p.path.clone(),
                reason: "invalid path".to_string(),
            });
            continue;
        };
        let clean_str = clean.to_string_lossy().replace('\\', "/");
        let abs = root.join(&clean);
        let original = match fs::read_to_string(&abs) {
            Ok(s) => s,
            Err(err) => {
                failed.push(PatchFailure {
                    path: clean_str,
                    reason: format!("read failed: {err}"),
                });
                continue;
            }
        };
        let updated = match forebrain_diff::apply(&original, &p.diff) {
            Ok(u) => u,
            Err(_) => {
                failed.push(PatchFailure {
                    path: clean_str,
                    reason: "patch failed to apply".to_string(),
                });
                continue;
            }
        };
        if let Err(err) = fs::write(&abs, updated) {
            failed.push(PatchFailure {
                path: clean_str,
                reason: format!("write failed: {err}"),
            });
            continue;
        }
        applied.push(PatchOp {
            path: clean_str,
            diff: p.diff.clone(),
        });
    }
    (applied, failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_create_parents_and_skip_bad_paths() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writes = vec![
            WriteOp {
                path: "src/new.rs".to_string(),
                content: "fn new() {}".to_string(),
            },
            WriteOp {
                path: "../escape.rs".to_string(),
                content: "nope".to_string(),
            },
        ];
        let applied = apply_writes(dir.path(), &writes);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].path, "src/new.rs");
        assert!(dir.path().join("src/new.rs").exists());
        assert!(!dir.path().parent().expect("parent").join("escape.rs").exists());
    }

    #[test]
    fn deletes_skip_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "x").expect("write");
        let deletes = vec![
            DeleteOp {
                path: "a.txt".to_string(),
            },
            DeleteOp {
                path: "missing.txt".to_string(),
            },
        ];
        let applied = apply_deletes(dir.path(), &deletes);
        assert_eq!(applied.len(), 1);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[test]
    fn failed_patch_leaves_file_untouched_and_others_proceed() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("good.txt"), "hello\nline2\n").expect("write");
        fs::write(dir.path().join("bad.txt"), "different\n").expect("write");
        let patches = vec![
            PatchOp {
                path: "good.txt".to_string(),
                diff: "@@ -1,2 +1,2 @@\n-hello\n+hello world\n line2\n".to_string(),
            },
            PatchOp {
                path: "bad.txt".to_string(),
                diff: "@@ -1,1 +1,1 @@\n-nomatch\n+x\n".to_string(),
            },
        ];
        let (applied, failed) = apply_patches(dir.path(), &patches);
        assert_eq!(applied.len(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("good.txt")).expect("read"),
            "hello world\nline2\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("bad.txt")).expect("read"),
            "different\n"
        );
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].reason, "patch failed to apply");
    }

    #[test]
    fn patch_reasons_cover_path_and_read_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let patches = vec![
            PatchOp {
                path: "/etc/passwd".to_string(),
                diff: "@@ -1,1 +1,1 @@\n-a\n+b\n".to_string(),
            },
            PatchOp {
                path: "nope.txt".to_string(),
                diff: "@@ -1,1 +1,1 @@\n-a\n+b\n".to_string(),
            },
        ];
        let (applied, failed) = apply_patches(dir.path(), &patches);
        assert!(applied.is_empty());
        assert_eq!(failed[0].reason, "invalid path");
        assert!(failed[1].reason.starts_with("read failed"));
    }
}
