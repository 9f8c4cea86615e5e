use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub type Result<T> = anyhow::Result<T>;

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const STATE_DIR_ENV: &str = "FOREBRAIN_HOME";

/// Per-project runtime directory (permission policy, run log).
pub fn runtime_dir(root: &Path) -> PathBuf {
    root.join(".forebrain")
}

/// Per-user state directory (settings, memory tiers). `FOREBRAIN_HOME`
/// overrides the home-relative default, which keeps tests hermetic.
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var(STATE_DIR_ENV) {
        let trimmed = v.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("HOME/USERPROFILE is not set"))?;
    Ok(Path::new(&home).join(".forebrain"))
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("absolute paths not allowed")]
    Absolute,
    #[error("path traversal not allowed")]
    Traversal,
    #[error("empty path")]
    Empty,
}

/// Normalize a model- or user-supplied path to repository-relative form.
///
/// This is the single gate every read, write, delete, and patch path passes
/// through: absolute paths and any `..` escape are rejected outright.
pub fn repo_relative(raw: &str) -> std::result::Result<PathBuf, PathError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PathError::Empty);
    }
    let path = Path::new(trimmed);
    if path.is_absolute() {
        return Err(PathError::Absolute);
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::Traversal),
            Component::RootDir | Component::Prefix(_) => return Err(PathError::Absolute),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    Ok(clean)
}

/// One file reference resolved from a prompt mention or an explicit read
/// request. Built and consumed within a single turn.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub mention: String,
    pub path: String,
    pub content: Option<String>,
    pub error: Option<String>,
}

impl FileRef {
    pub fn loaded(mention: impl Into<String>, path: impl Into<String>, content: String) -> Self {
        Self {
            mention: mention.into(),
            path: path.into(),
            content: Some(content),
            error: None,
        }
    }

    pub fn failed(mention: impl Into<String>, path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            mention: mention.into(),
            path: path.into(),
            content: None,
            error: Some(error.into()),
        }
    }

    /// `mention -> resolved` display form, collapsing the arrow when the two
    /// are identical.
    pub fn display_path(&self) -> String {
        if !self.mention.is_empty() && self.mention != self.path {
            format!("{} -> {}", self.mention, self.path)
        } else {
            self.path.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOp {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOp {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOp {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchFailure {
    pub path: String,
    pub reason: String,
}

/// Byte and line counters over the memory tiers. Derived for display and the
/// condensation trigger, never authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub long_term_lines: usize,
    pub short_term_lines: usize,
    pub long_term_bytes: usize,
    pub short_term_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageStats {
    pub long_term_bytes: usize,
    pub short_term_bytes: usize,
    pub short_term_window_bytes: usize,
    pub conversation_bytes: usize,
    pub conversation_window_bytes: usize,
    pub approx_tokens: usize,
    pub budget_tokens: usize,
}

/// Turn-level budgets and limits. Defaults match the sizes the system was
/// tuned with; zero values are normalized by the accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub timeout_seconds: u64,
    pub short_term_max_bytes: usize,
    pub short_term_window_bytes: usize,
    pub conversation_max_bytes: usize,
    pub context_budget_tokens: usize,
    pub max_files_listed: usize,
    pub max_file_bytes: usize,
    pub max_total_read_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            timeout_seconds: 60,
            short_term_max_bytes: 12_000,
            short_term_window_bytes: 4_000,
            conversation_max_bytes: 4_000,
            context_budget_tokens: 16_000,
            max_files_listed: 2_000,
            max_file_bytes: 512 * 1024,
            max_total_read_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Persisted user preferences: API key and model. Lives in the user state
/// dir, outside any repository.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub openai_api_key: String,
    pub model: String,
}

impl UserSettings {
    pub fn path() -> Result<PathBuf> {
        Ok(state_dir()?.join("config.json"))
    }

    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Model preference with fallback to the built-in default.
    pub fn model_or_default(&self) -> &str {
        let trimmed = self.model.trim();
        if trimmed.is_empty() { DEFAULT_MODEL } else { trimmed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_relative_accepts_clean_paths() {
        assert_eq!(
            repo_relative("src/main.rs").unwrap(),
            PathBuf::from("src/main.rs")
        );
        assert_eq!(repo_relative("./a/b.txt").unwrap(), PathBuf::from("a/b.txt"));
    }

    #[test]
    fn repo_relative_rejects_absolute_and_traversal() {
        assert_eq!(repo_relative("/etc/passwd"), Err(PathError::Absolute));
        assert_eq!(repo_relative("../outside"), Err(PathError::Traversal));
        assert_eq!(repo_relative("a/../../b"), Err(PathError::Traversal));
        assert_eq!(repo_relative("   "), Err(PathError::Empty));
    }

    #[test]
    fn repo_relative_rejects_inner_parent_components() {
        // `a/b/../c` would stay inside the repo, but the gate stays strict.
        assert_eq!(repo_relative("a/b/../c"), Err(PathError::Traversal));
    }

    #[test]
    fn settings_roundtrip_in_isolated_home() {
        let dir = tempfile::tempdir().expect("tempdir");
        // SAFETY: this test runs single-threaded with respect to env access.
        unsafe { std::env::set_var(STATE_DIR_ENV, dir.path()) };
        let settings = UserSettings {
            openai_api_key: "sk-test".to_string(),
            model: "gpt-4.1-mini".to_string(),
        };
        settings.save().expect("save");
        let loaded = UserSettings::load().expect("load");
        assert_eq!(loaded.model, "gpt-4.1-mini");
        assert_eq!(loaded.openai_api_key, "sk-test");
        // SAFETY: same thread as the matching set_var above.
        unsafe { std::env::remove_var(STATE_DIR_ENV) };
    }

    #[test]
    fn model_fallback_uses_default() {
        let settings = UserSettings::default();
        assert_eq!(settings.model_or_default(), DEFAULT_MODEL);
    }
}
