use crate::is_skipped_dir;
use crate::mentions::fuzzy_score;
use std::path::Path;
use walkdir::WalkDir;

/// Walk the repository listing relative paths, up to `max_files`. The second
/// return value reports truncation.
pub fn list_files(root: &Path, max_files: usize) -> (Vec<String>, bool) {
    let mut files = Vec::new();
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
        files.push(rel.to_string_lossy().replace('\\', "/"));
        if max_files > 0 && files.len() >= max_files {
            return (files, true);
        }
    }
    (files, false)
}

/// Rank repository files against the prompt's tokens and return the best
/// `max_files`. Falls back to a plain listing when the prompt yields no
/// usable tokens or no file scores at all.
pub fn list_relevant_files(root: &Path, prompt: &str, max_files: usize) -> (Vec<String>, bool) {
    let tokens = prompt_tokens(prompt);
    if tokens.is_empty() {
        return list_files(root, max_files);
    }

    let mut scored: Vec<(String, i64)> = Vec::new();
    let mut truncated = false;
    // Scan cap keeps the walk bounded on huge trees.
    let scan_cap = if max_files > 0 { max_files * 10 } else { 0 };
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
        let score = score_path(&rel, &tokens);
        if score > 0 {
            scored.push((rel, score));
        }
        if scan_cap > 0 && scored.len() >= scan_cap {
            truncated = true;
            break;
        }
    }

    if scored.is_empty() {
        return list_files(root, max_files);
    }

    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let mut limit = scored.len();
    if max_files > 0 && limit > max_files {
        limit = max_files;
        truncated = true;
    }
    (
        scored.into_iter().take(limit).map(|(p, _)| p).collect(),
        truncated,
    )
}

/// Lowercased tokens of three or more characters, de-duplicated in order.
pub fn prompt_tokens(prompt: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for part in prompt
        .to_lowercase()
        .split(|r: char| !(r.is_ascii_lowercase() || r.is_ascii_digit() || "._-".contains(r)))
    {
        if part.len() < 3 {
            continue;
        }
        if !out.iter().any(|t| t == part) {
            out.push(part.to_string());
        }
    }
    out
}

fn score_path(path: &str, tokens: &[String]) -> i64 {
    tokens
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| fuzzy_score(path, t))
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "x").expect("write");
    }

    #[test]
    fn listing_skips_conventional_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/lib.rs");
        write(dir.path(), ".git/HEAD");
        write(dir.path(), "vendor/dep.rs");
        let (files, truncated) = list_files(dir.path(), 0);
        assert_eq!(files, vec!["src/lib.rs".to_string()]);
        assert!(!truncated);
    }

    #[test]
    fn listing_truncates_at_cap() {
        let dir = tempfile::tempdir().expect("tempdir");
        for i in 0..5 {
            write(dir.path(), &format!("f{i}.txt"));
        }
        let (files, truncated) = list_files(dir.path(), 3);
        assert_eq!(files.len(), 3);
        assert!(truncated);
    }

    #[test]
    fn relevant_listing_ranks_matching_paths_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "src/parser.rs");
        write(dir.path(), "README.md");
        let (files, _) = list_relevant_files(dir.path(), "fix the parser bug", 10);
        assert_eq!(files[0], "src/parser.rs");
    }

    #[test]
    fn empty_prompt_falls_back_to_plain_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.txt");
        let (files, _) = list_relevant_files(dir.path(), "a b", 10);
        assert_eq!(files, vec!["a.txt".to_string()]);
    }

    #[test]
    fn tokens_drop_short_words_and_duplicates() {
        assert_eq!(
            prompt_tokens("Fix the fix in my_mod.rs, fix it"),
            vec!["fix".to_string(), "the".to_string(), "my_mod.rs".to_string()]
        );
    }
}
