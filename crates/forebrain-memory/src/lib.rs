//! Three byte-budgeted memory tiers under the per-user state directory.
//!
//! Long-term memory is read in full each turn. Short-term memory is an
//! append-only session log windowed from the tail and condensed when it
//! outgrows its budget. The conversation tier is a rolling log of
//! `## <timestamp>` entries trimmed from the front on overflow.

use anyhow::{Context, Result};
use chrono::Utc;
use forebrain_core::{AgentConfig, FileRef, MemoryStats, UsageStats, state_dir};
use forebrain_llm::{CompletionRequest, LlmClient, OutputFormat};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const CONDENSE_INSTRUCTIONS: &str = "You condense short-term memory into a compact, future-use \
summary. Keep it concise, preserve decisions, TODOs, constraints, and file paths. Output plain \
text only.";

const RESPONSE_SUMMARY_BYTES: usize = 800;

pub struct MemoryStore {
    dir: PathBuf,
}

impl MemoryStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::open(state_dir()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn agent_file(&self) -> PathBuf {
        self.dir.join("AGENT.md")
    }

    pub fn persona_file(&self) -> PathBuf {
        self.dir.join("PERSONA.md")
    }

    pub fn long_term_path(&self) -> PathBuf {
        self.dir.join("memory").join("LONGTERM.md")
    }

    pub fn short_term_path(&self) -> PathBuf {
        self.dir.join("memory").join("SESSION.md")
    }

    pub fn conversation_path(&self) -> PathBuf {
        self.dir.join("memory").join("CONVERSATION.md")
    }

    /// Create the state directory and seed any missing files with defaults.
    /// Existing files are never touched.
    pub fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.dir.join("memory"))
            .with_context(|| format!("creating state dir {}", self.dir.display()))?;
        seed_if_missing(&self.agent_file(), &default_agent_config())?;
        seed_if_missing(&self.persona_file(), &default_persona())?;
        seed_if_missing(&self.long_term_path(), &default_long_term())?;
        seed_if_missing(&self.short_term_path(), &default_short_term())?;
        seed_if_missing(&self.conversation_path(), &default_conversation())?;
        Ok(())
    }

    pub fn operating_config(&self) -> String {
        read_or_empty(&self.agent_file())
    }

    pub fn persona(&self) -> String {
        read_or_empty(&self.persona_file())
    }

    /// Long-term memory, always read in full.
    pub fn read_long_term(&self) -> String {
        read_or_empty(&self.long_term_path())
    }

    /// Tail window over the short-term tier, trimmed forward to the next
    /// line boundary so no entry is sliced mid-line.
    pub fn short_term_window(&self, max_bytes: usize) -> String {
        tail_window(&read_or_empty(&self.short_term_path()), max_bytes)
    }

    pub fn conversation_window(&self, max_bytes: usize) -> String {
        tail_window(&read_or_empty(&self.conversation_path()), max_bytes)
    }

    /// Open a new session block in the short-term tier: timestamp, prompt,
    /// and what happened to each mentioned file.
    pub fn append_session_header(
        &self,
        prompt: &str,
        mentions: &[String],
        refs: &[FileRef],
    ) -> Result<()> {
        let mut b = String::new();
        let existing = read_or_empty(&self.short_term_path());
        if !existing.trim().is_empty() {
            b.push_str("\n---\n\n");
        }
        b.push_str("# Session Memory\n\n");
        b.push_str(&format!("- Started: {}\n", Utc::now().to_rfc3339()));
        b.push_str(&format!("- Prompt: {prompt}\n\n"));

        b.push_str("## Mentioned Files\n");
        if mentions.is_empty() {
            b.push_str("(none)\n");
        } else {
            for m in mentions {
                b.push_str(&format!("- {m}\n"));
            }
        }

        b.push_str("\n## File Load Results\n");
        if refs.is_empty() {
            b.push_str("(none)\n");
        } else {
            for r in refs {
                match &r.error {
                    Some(err) => b.push_str(&format!("- {}: {err}\n", r.display_path())),
                    None => b.push_str(&format!("- {}: loaded\n", r.display_path())),
                }
            }
        }

        append_to(&self.short_term_path(), &b)
    }

    /// Best-effort append to the session log. Losing an annotation must not
    /// fail the turn.
    pub fn append_session(&self, content: &str) {
        let _ = append_to(&self.short_term_path(), content);
    }

    /// Append one conversation entry, then trim the tier back under
    /// `max_bytes` at the nearest entry boundary.
    pub fn append_conversation(&self, prompt: &str, response: &str, max_bytes: usize) {
        if max_bytes == 0 {
            return;
        }
        let path = self.conversation_path();
        let summary = truncate_bytes(response.trim(), RESPONSE_SUMMARY_BYTES);
        let entry = format!(
            "## {}\nPrompt: {}\n\nResponse: {}\n\n",
            Utc::now().to_rfc3339(),
            prompt.trim(),
            summary
        );
        if append_to(&path, &entry).is_err() {
            return;
        }

        let content = read_or_empty(&path);
        if content.len() <= max_bytes {
            return;
        }
        let mut tail = tail_bytes(&content, max_bytes);
        if let Some(idx) = tail.find("\n## ") {
            if idx > 0 && idx < tail.len() - 1 {
                tail = &tail[idx + 1..];
            }
        }
        let _ = fs::write(&path, format!("{}\n", tail.trim()));
    }

    /// Reset the short-term tier to a cleared header.
    pub fn clear_short_term(&self) -> Result<()> {
        fs::create_dir_all(self.dir.join("memory"))?;
        let body = format!(
            "# Session Memory\n\n- Cleared: {}\n",
            Utc::now().to_rfc3339()
        );
        fs::write(self.short_term_path(), body)?;
        Ok(())
    }

    /// Summarize the short-term tier through the model and replace the file
    /// with a timestamped header plus the summary. Returns the summary, or
    /// `None` when the tier was empty.
    pub fn condense_short_term(
        &self,
        client: &dyn LlmClient,
        model: &str,
    ) -> Result<Option<String>> {
        let content = read_or_empty(&self.short_term_path());
        if content.trim().is_empty() {
            return Ok(None);
        }

        let req = CompletionRequest {
            model: model.to_string(),
            instructions: CONDENSE_INSTRUCTIONS.to_string(),
            input: content,
            format: OutputFormat::PlainText,
            temperature: Some(0.2),
        };
        let summary = client.complete(&req).context("condensation call failed")?;

        let mut body = format!(
            "# Session Memory\n\n- Condensed: {}\n\n{summary}",
            Utc::now().to_rfc3339()
        );
        if !body.ends_with('\n') {
            body.push('\n');
        }
        fs::write(self.short_term_path(), body)?;
        Ok(Some(summary))
    }

    /// Condense only when the tier exceeds `max_bytes`. Returns whether a
    /// condensation ran.
    pub fn auto_condense_if_needed(
        &self,
        client: &dyn LlmClient,
        model: &str,
        max_bytes: usize,
    ) -> Result<bool> {
        let limit = if max_bytes == 0 { 12_000 } else { max_bytes };
        let size = fs::metadata(self.short_term_path())
            .map(|m| m.len() as usize)
            .unwrap_or(0);
        if size <= limit {
            return Ok(false);
        }
        self.condense_short_term(client, model)?;
        Ok(true)
    }

    pub fn memory_stats(&self) -> MemoryStats {
        let long_term = self.read_long_term();
        let short_term = read_or_empty(&self.short_term_path());
        MemoryStats {
            long_term_lines: non_empty_lines(&long_term),
            short_term_lines: non_empty_lines(&short_term),
            long_term_bytes: long_term.len(),
            short_term_bytes: short_term.len(),
        }
    }

    /// Full tier sizes plus the windowed sizes actually sent to the model,
    /// and the rough token estimate against the configured budget.
    pub fn usage_stats(&self, cfg: &AgentConfig) -> UsageStats {
        let long_term = self.read_long_term();
        let short_term = read_or_empty(&self.short_term_path());
        let conversation = read_or_empty(&self.conversation_path());

        let short_window = short_term.len().min(cfg.short_term_window_bytes);
        let conv_window = conversation.len().min(cfg.conversation_max_bytes);
        let included = long_term.len() + short_window + conv_window;

        UsageStats {
            long_term_bytes: long_term.len(),
            short_term_bytes: short_term.len(),
            short_term_window_bytes: short_window,
            conversation_bytes: conversation.len(),
            conversation_window_bytes: conv_window,
            approx_tokens: included / 4,
            budget_tokens: cfg.context_budget_tokens,
        }
    }
}

fn read_or_empty(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}

fn seed_if_missing(path: &Path, content: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, content).with_context(|| format!("seeding {}", path.display()))?;
    Ok(())
}

fn append_to(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    f.write_all(content.as_bytes())?;
    Ok(())
}

fn non_empty_lines(s: &str) -> usize {
    s.lines().filter(|l| !l.trim().is_empty()).count()
}

/// Last `max_bytes` of `content`, snapped forward to a char boundary.
fn tail_bytes(content: &str, max_bytes: usize) -> &str {
    if content.len() <= max_bytes {
        return content;
    }
    let mut start = content.len() - max_bytes;
    while !content.is_char_boundary(start) {
        start += 1;
    }
    &content[start..]
}

fn tail_window(content: &str, max_bytes: usize) -> String {
    if max_bytes == 0 || content.trim().is_empty() {
        return String::new();
    }
    if content.len() <= max_bytes {
        return content.to_string();
    }
    let chunk = tail_bytes(content, max_bytes);
    let chunk = match chunk.find('\n') {
        Some(idx) if idx > 0 && idx < chunk.len() - 1 => &chunk[idx + 1..],
        _ => chunk,
    };
    chunk.trim().to_string()
}

fn truncate_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}

fn default_agent_config() -> String {
    "# AGENT\n\n\
     Core wiring for the agent. Keep this file small and focused on behavior and memory wiring.\n\n\
     ## Memory Files\n\
     - Long-term memory: `memory/LONGTERM.md`\n\
     - Short-term memory: `memory/SESSION.md`\n\
     - Conversation summary: `memory/CONVERSATION.md`\n\
     - Personality: `PERSONA.md`\n\n\
     ## Operating Rules\n\
     - Ask before reading file contents unless the user has allowed it.\n\
     - Request file contents through the `read` field of the response, never in prose.\n\
     - Prefer patches for edits; use writes for new files and full rewrites.\n\
     - When planning to modify files, include the actual changes in the same response.\n\n\
     ## Memory Process\n\
     - Long-term memory persists across sessions and accumulates durable facts and constraints.\n\
     - Short-term memory is session context, condensed when large or on request.\n\
     - The conversation summary is a compact rolling log of recent prompts and responses.\n"
        .to_string()
}

fn default_persona() -> String {
    "# PERSONA\n\n\
     A pragmatic, concise assistant focused on getting real work done.\n\n\
     Style:\n\
     - Prefer concrete steps over vague guidance.\n\
     - Ask one question at a time if clarification is needed.\n\
     - Be explicit about assumptions and uncertainty.\n\n\
     Behavior:\n\
     - Respect file-read permissions.\n\
     - Prefer small, reversible changes; favor patches over full rewrites.\n\
     - Summarize applied changes and call out any risks.\n"
        .to_string()
}

fn default_long_term() -> String {
    "# Long-Term Memory\n\n- Durable facts, preferences, and constraints live here.\n".to_string()
}

fn default_short_term() -> String {
    format!(
        "# Session Memory\n\n- Initialized: {}\n",
        Utc::now().to_rfc3339()
    )
}

fn default_conversation() -> String {
    format!(
        "# Conversation Summary\n\n- Initialized: {}\n",
        Utc::now().to_rfc3339()
    )
}
