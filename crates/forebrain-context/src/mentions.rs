use crate::is_skipped_dir;
use forebrain_core::{FileRef, repo_relative};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use walkdir::WalkDir;

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9._/\-]+)").expect("valid regex"));

/// Minimum fuzzy score for a resolution to be accepted.
const SCORE_THRESHOLD: i64 = 300;

/// Extract `@path` tokens from free text, de-duplicated in first-appearance
/// order.
pub fn extract_mentions(prompt: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in MENTION.captures_iter(prompt) {
        let token = caps[1].to_string();
        if !out.contains(&token) {
            out.push(token);
        }
    }
    out
}

/// Resolve a mention to a repository-relative path. Exact matches short-circuit;
/// otherwise the tree is walked and every candidate scored, and the best
/// candidate wins only if it clears the acceptance threshold.
pub fn resolve_mention(root: &Path, mention: &str) -> Option<String> {
    let mention = mention.trim();
    if mention.is_empty() {
        return None;
    }
    let clean = repo_relative(mention).ok()?;
    if root.join(&clean).exists() {
        return Some(clean.to_string_lossy().replace('\\', "/"));
    }

    let mut best_score = 0i64;
    let mut best: Option<String> = None;
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));
    for entry in walker {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let score = fuzzy_score(&rel, mention);
        if score > best_score {
            best_score = score;
            best = Some(rel);
        }
    }

    if best_score < SCORE_THRESHOLD {
        return None;
    }
    best
}

/// Score a candidate relative path against a mention. Case-insensitive;
/// exact path beats exact basename beats substring beats edit distance.
pub(crate) fn fuzzy_score(path: &str, mention: &str) -> i64 {
    let lp = path.to_lowercase();
    let lm = mention.to_lowercase();
    let base = basename(&lp);

    if lp == lm {
        return 1000;
    }
    if base == lm {
        return 900;
    }

    let mut score = 0i64;
    if base.contains(&lm) {
        score = 700 - (base.len() as i64 - lm.len() as i64);
    }
    if lp.contains(&lm) {
        let c = 600 - (lp.len() as i64 - lm.len() as i64);
        if c > score {
            score = c;
        }
    }
    let c = 500 - strsim::levenshtein(base, &lm) as i64;
    if c > score {
        score = c;
    }
    score
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// NUL byte in the first 8000 bytes marks a file as binary.
fn is_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8000).any(|&b| b == 0)
}

/// Load each mentioned file under per-file and total byte caps. Failures are
/// recorded in the returned refs, never raised: a missing or oversized file
/// still produces an entry the model can see and explain.
pub fn load_mentioned_files(
    root: &Path,
    mentions: &[String],
    allow_read: bool,
    max_file_bytes: usize,
    max_total_bytes: usize,
) -> Vec<FileRef> {
    let mut refs = Vec::new();
    let mut total = 0usize;
    for mention in mentions {
        let Some(resolved) = resolve_mention(root, mention) else {
            refs.push(FileRef::failed(mention, mention, "not found"));
            continue;
        };
        if !allow_read {
            refs.push(FileRef::failed(
                mention,
                &resolved,
                "permission denied: reading file content requires approval",
            ));
            continue;
        }
        let path = root.join(&resolved);
        if let Ok(meta) = fs::metadata(&path) {
            if max_file_bytes > 0 && meta.len() > max_file_bytes as u64 {
                refs.push(FileRef::failed(mention, &resolved, "file too large"));
                continue;
            }
        }
        if max_total_bytes > 0 && total >= max_total_bytes {
            refs.push(FileRef::failed(
                mention,
                &resolved,
                "total read limit exceeded",
            ));
            continue;
        }
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(err) => {
                refs.push(FileRef::failed(mention, &resolved, err.to_string()));
                continue;
            }
        };
        if is_binary(&bytes) {
            refs.push(FileRef::failed(mention, &resolved, "binary file skipped"));
            continue;
        }
        if max_total_bytes > 0 && total + bytes.len() > max_total_bytes {
            refs.push(FileRef::failed(
                mention,
                &resolved,
                "total read limit exceeded",
            ));
            continue;
        }
        total += bytes.len();
        let content = String::from_utf8_lossy(&bytes).into_owned();
        refs.push(FileRef::loaded(mention, &resolved, content));
    }
    refs
}

/// Merge two ref lists, keeping the first occurrence of each resolved path.
pub fn merge_file_refs(a: Vec<FileRef>, b: Vec<FileRef>) -> Vec<FileRef> {
    let mut seen: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for r in a.into_iter().chain(b) {
        let key = if r.path.is_empty() {
            r.mention.clone()
        } else {
            r.path.clone()
        };
        if seen.contains(&key) {
            continue;
        }
        seen.push(key);
        out.push(r);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, content).expect("write");
    }

    #[test]
    fn mentions_deduplicate_in_first_order() {
        let out = extract_mentions("look at @a.txt and @b/c.rs then @a.txt again");
        assert_eq!(out, vec!["a.txt".to_string(), "b/c.rs".to_string()]);
    }

    #[test]
    fn exact_path_resolves_without_fuzzy_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        assert_eq!(
            resolve_mention(dir.path(), "src/main.rs"),
            Some("src/main.rs".to_string())
        );
    }

    #[test]
    fn basename_match_resolves_through_fuzzy_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/deep/nested/parser.rs", "x");
        assert_eq!(
            resolve_mention(dir.path(), "parser.rs"),
            Some("src/deep/nested/parser.rs".to_string())
        );
    }

    #[test]
    fn unrelated_mention_is_unresolved() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/main.rs", "x");
        assert_eq!(resolve_mention(dir.path(), "zzzzzzzzzzzzzzzzzzzz"), None);
    }

    #[test]
    fn skipped_directories_are_invisible_to_fuzzy_search() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "node_modules/pkg/index.js", "x");
        assert_eq!(resolve_mention(dir.path(), "index.js"), None);
    }

    #[test]
    fn score_ladder_prefers_exact_over_basename_over_substring() {
        assert_eq!(fuzzy_score("a/b.txt", "a/b.txt"), 1000);
        assert_eq!(fuzzy_score("x/b.txt", "b.txt"), 900);
        assert!(fuzzy_score("x/config_loader.rs", "config") > 600);
        assert!(fuzzy_score("abc/def.rs", "qqq") < 300);
    }

    #[test]
    fn denied_read_keeps_resolution_but_no_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.txt", "hello");
        let refs = load_mentioned_files(dir.path(), &["a.txt".to_string()], false, 0, 0);
        assert_eq!(refs.len(), 1);
        assert!(refs[0].content.is_none());
        assert!(
            refs[0]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("permission denied"))
        );
    }

    #[test]
    fn binary_and_oversized_files_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3]).expect("write");
        write(dir.path(), "big.txt", &"x".repeat(100));
        let refs = load_mentioned_files(
            dir.path(),
            &["blob.bin".to_string(), "big.txt".to_string()],
            true,
            10,
            0,
        );
        assert_eq!(refs[0].error.as_deref(), Some("binary file skipped"));
        assert_eq!(refs[1].error.as_deref(), Some("file too large"));
    }

    #[test]
    fn total_read_cap_stops_further_loading() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.txt", &"a".repeat(60));
        write(dir.path(), "b.txt", &"b".repeat(60));
        let refs = load_mentioned_files(
            dir.path(),
            &["a.txt".to_string(), "b.txt".to_string()],
            true,
            0,
            100,
        );
        assert!(refs[0].content.is_some());
        assert_eq!(refs[1].error.as_deref(), Some("total read limit exceeded"));
    }

    #[test]
    fn merge_keeps_first_ref_per_path() {
        let a = vec![FileRef::loaded("a", "a.txt", "one".to_string())];
        let b = vec![
            FileRef::loaded("a.txt", "a.txt", "two".to_string()),
            FileRef::failed("b", "b.txt", "not found"),
        ];
        let merged = merge_file_refs(a, b);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content.as_deref(), Some("one"));
        assert_eq!(merged[1].path, "b.txt");
    }
}
