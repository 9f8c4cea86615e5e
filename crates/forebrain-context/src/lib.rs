//! Per-turn context assembly: mention resolution, bounded file loading, the
//! relevant-file shortlist, and the developer message sent to the model.

mod files;
mod mentions;
mod prompt;

pub use files::{list_files, list_relevant_files, prompt_tokens};
pub use mentions::{extract_mentions, load_mentioned_files, merge_file_refs, resolve_mention};
pub use prompt::{ContextBundle, build_developer_message};

/// Directories never walked during resolution or shortlisting.
pub(crate) const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "dist",
    "build",
    "bin",
    "tmp",
];

pub(crate) fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name))
}
