//! In-memory unified-diff application.
//!
//! Context and deletion lines must match the target byte-for-byte; any
//! mismatch aborts the whole patch so nothing partial ever reaches disk.

use regex::Regex;
use std::sync::LazyLock;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("valid regex")
});

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("no hunk header found")]
    NoHunks,
    #[error("hunk start {start} is past end of file ({lines} lines)")]
    StartPastEof { start: usize, lines: usize },
    #[error("context mismatch at line {line}: expected {expected:?}")]
    ContextMismatch { line: usize, expected: String },
    #[error("unknown hunk line prefix {prefix:?}")]
    UnknownPrefix { prefix: char },
}

#[derive(Debug, Clone)]
struct Hunk {
    old_start: usize,
    lines: Vec<String>,
}

/// Quick structural probe used before asking the model to reformulate: a
/// diff with no `@@ -a,b +c,d @@` header can never apply.
pub fn looks_like_unified_diff(diff: &str) -> bool {
    diff.lines().any(|line| HUNK_HEADER.is_match(line))
}

/// Apply `diff` to `original`, returning the updated content.
///
/// Hunks apply in the order given. A hunk whose declared start lies behind
/// the cursor is clamped forward, which turns overlap into an explicit
/// mismatch failure instead of silent corruption. Trailing-newline presence
/// of the original is preserved regardless of the diff's own markers.
pub fn apply(original: &str, diff: &str) -> Result<String, PatchError> {
    let had_trailing_newline = original.ends_with('\n');
    let lines = split_lines(original);
    let hunks = parse_hunks(diff)?;

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut idx = 0usize;

    for hunk in &hunks {
        let mut start = hunk.old_start.saturating_sub(1);
        if start > lines.len() {
            return Err(PatchError::StartPastEof {
                start: hunk.old_start,
                lines: lines.len(),
            });
        }
        if start < idx {
            start = idx;
        }
        out.extend(lines[idx..start].iter().cloned());
        idx = start;

        for line in &hunk.lines {
            if line.is_empty() {
                continue;
            }
            let (prefix, content) = split_prefix(line);
            match prefix {
                ' ' => {
                    if idx >= lines.len() || lines[idx] != content {
                        return Err(PatchError::ContextMismatch {
                            line: idx + 1,
                            expected: content.to_string(),
                        });
                    }
                    out.push(content.to_string());
                    idx += 1;
                }
                '-' => {
                    if idx >= lines.len() || lines[idx] != content {
                        return Err(PatchError::ContextMismatch {
                            line: idx + 1,
                            expected: content.to_string(),
                        });
                    }
                    idx += 1;
                }
                '+' => out.push(content.to_string()),
                // "\ No newline at end of file" marker.
                '\\' => {}
                other => return Err(PatchError::UnknownPrefix { prefix: other }),
            }
        }
    }

    out.extend(lines[idx..].iter().cloned());
    let mut result = out.join("\n");
    if had_trailing_newline {
        result.push('\n');
    }
    Ok(result)
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for line in diff.lines() {
        if line.starts_with("@@ ") {
            if let Some(caps) = HUNK_HEADER.captures(line) {
                hunks.push(Hunk {
                    old_start: parse_number(caps.get(1).map_or("", |m| m.as_str())),
                    lines: Vec::new(),
                });
            }
            // Malformed `@@` lines are skipped, matching file headers and
            // other noise the model sometimes interleaves.
            continue;
        }
        if let Some(current) = hunks.last_mut() {
            current.lines.push(line.to_string());
        }
    }
    if hunks.is_empty() {
        return Err(PatchError::NoHunks);
    }
    Ok(hunks)
}

fn parse_number(s: &str) -> usize {
    let mut value = 0usize;
    for c in s.chars() {
        match c.to_digit(10) {
            Some(d) => value = value * 10 + d as usize,
            None => break,
        }
    }
    value
}

fn split_prefix(line: &str) -> (char, &str) {
    let mut chars = line.chars();
    let prefix = chars.next().unwrap_or(' ');
    (prefix, &line[prefix.len_utf8()..])
}

fn split_lines(s: &str) -> Vec<String> {
    let trimmed = s.strip_suffix('\n').unwrap_or(s);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('\n').map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_single_hunk_replacement() {
        let original = "hello\nline2\n";
        let diff = "@@ -1,2 +1,2 @@\n-hello\n+hello world\n line2\n";
        assert_eq!(apply(original, diff).unwrap(), "hello world\nline2\n");
    }

    #[test]
    fn count_omitted_defaults_to_one() {
        let original = "only\n";
        let diff = "@@ -1 +1 @@\n-only\n+changed\n";
        assert_eq!(apply(original, diff).unwrap(), "changed\n");
    }

    #[test]
    fn preserves_missing_trailing_newline() {
        let original = "a\nb";
        let diff = "@@ -1,2 +1,2 @@\n a\n-b\n+c\n\\ No newline at end of file\n";
        assert_eq!(apply(original, diff).unwrap(), "a\nc");
    }

    #[test]
    fn context_mismatch_fails_whole_patch() {
        let original = "a\nb\nc\n";
        let diff = "@@ -1,2 +1,2 @@\n a\n-x\n+y\n";
        let err = apply(original, diff).unwrap_err();
        assert!(matches!(err, PatchError::ContextMismatch { line: 2, .. }));
    }

    #[test]
    fn deletion_mismatch_fails_whole_patch() {
        let original = "a\nb\n";
        let diff = "@@ -1,1 +1,0 @@\n-z\n";
        assert!(apply(original, diff).is_err());
    }

    #[test]
    fn no_hunks_is_an_error() {
        assert_eq!(apply("a\n", "not a diff"), Err(PatchError::NoHunks));
        assert!(!looks_like_unified_diff("not a diff"));
        assert!(looks_like_unified_diff("@@ -1,2 +1,2 @@\n-a\n+b\n"));
    }

    #[test]
    fn multiple_hunks_apply_in_order() {
        let original = "one\ntwo\nthree\nfour\nfive\n";
        let diff = concat!(
            "@@ -1,1 +1,1 @@\n-one\n+ONE\n",
            "@@ -4,2 +4,2 @@\n four\n-five\n+FIVE\n",
        );
        assert_eq!(apply(original, diff).unwrap(), "ONE\ntwo\nthree\nFIVE\n");
    }

    #[test]
    fn backwards_hunk_is_clamped_into_mismatch() {
        // Second hunk declares a start behind the cursor; the clamp forces
        // its context check against later lines, which fails loudly.
        let original = "a\nb\nc\n";
        let diff = concat!(
            "@@ -2,1 +2,1 @@\n-b\n+B\n",
            "@@ -1,1 +1,1 @@\n-a\n+A\n",
        );
        assert!(apply(original, diff).is_err());
    }

    #[test]
    fn insertion_into_empty_file() {
        let diff = "@@ -0,0 +1,2 @@\n+first\n+second\n";
        assert_eq!(apply("", diff).unwrap(), "first\nsecond");
    }

    #[test]
    fn unknown_prefix_rejects_patch() {
        let original = "a\n";
        let diff = "@@ -1,1 +1,1 @@\n*weird\n";
        assert_eq!(
            apply(original, diff),
            Err(PatchError::UnknownPrefix { prefix: '*' })
        );
    }

    #[test]
    fn file_headers_are_ignored() {
        let original = "x\n";
        let diff = "--- a/f.txt\n+++ b/f.txt\n@@ -1,1 +1,1 @@\n-x\n+y\n";
        assert_eq!(apply(original, diff).unwrap(), "y\n");
    }
}
