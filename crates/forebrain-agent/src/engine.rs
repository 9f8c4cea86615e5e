//! The orchestrator: one user prompt in, one bounded sequence of model
//! invocations out, with permission gates and per-turn retry budgets.

use crate::apply::{ApplyReport, PendingChanges, apply_all};
use crate::protocol::{ProtocolError, StructuredResponse, parse_response};
use anyhow::{Context, Result};
use forebrain_context::{
    ContextBundle, build_developer_message, extract_mentions, list_relevant_files,
    load_mentioned_files, merge_file_refs,
};
use forebrain_core::{
    AgentConfig, DeleteOp, FileRef, MemoryStats, PatchFailure, PatchOp, WriteOp, repo_relative,
};
use forebrain_llm::{CompletionRequest, LlmClient, OutputFormat, StreamCallback};
use forebrain_memory::MemoryStore;
use forebrain_observe::Observer;
use forebrain_policy::PermissionState;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MAX_READ_DEPTH: u8 = 1;

const REFORMULATE_RESPONSE: &str = "Your previous output was not a valid response object. \
Respond again with exactly one JSON object containing read, patches, writes, deletes, and message.";

/// All retry counters for one turn. Reset when the user submits a new
/// prompt; every retry costs at most one extra model invocation, so a turn
/// always terminates in a bounded number of calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryBudget {
    pub read_depth: u8,
    pub response_reformulated: bool,
    pub patch_reformulated: bool,
    pub patch_context_rerun: bool,
    pub rewrite_retried: bool,
}

#[derive(Debug, Clone)]
pub struct TurnResult {
    pub turn_id: Uuid,
    pub message: String,
    pub raw_output: String,
    pub mentions: Vec<String>,
    pub refs: Vec<FileRef>,
    pub file_list: Vec<String>,
    pub file_list_truncated: bool,
    /// `None` when changes were proposed but not applied this turn.
    pub applied: Option<ApplyReport>,
    pub changes_denied: bool,
    pub memory: MemoryStats,
    pub condensed: bool,
}

/// Where a turn stopped. Pauses hand control back to the caller, who answers
/// with a permission choice and either resumes the turn or applies/discards
/// the pending changes.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed(TurnResult),
    AwaitingReadPermission { prompt: String, paths: Vec<String> },
    AwaitingWritePermission { pending: PendingChanges, result: TurnResult },
    ReadDenied,
}

struct TurnContext {
    mentions: Vec<String>,
    refs: Vec<FileRef>,
    file_list: Vec<String>,
    file_list_truncated: bool,
}

pub struct AgentEngine {
    root: PathBuf,
    memory: MemoryStore,
    config: AgentConfig,
    observer: Observer,
}

impl AgentEngine {
    pub fn new(root: impl Into<PathBuf>, memory: MemoryStore, config: AgentConfig) -> Result<Self> {
        let root = root.into();
        let observer = Observer::new(&root)?;
        Ok(Self {
            root,
            memory,
            config,
            observer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn observer(&mut self) -> &mut Observer {
        &mut self.observer
    }

    /// Run one full turn for a fresh user prompt.
    pub fn run_turn(
        &self,
        client: &dyn LlmClient,
        permissions: &PermissionState,
        prompt: &str,
        on_delta: Option<StreamCallback>,
    ) -> Result<TurnOutcome> {
        self.turn_loop(client, permissions, prompt, Vec::new(), on_delta)
    }

    /// Resume a turn that paused on a read request, after the caller granted
    /// read permission. The requested paths are loaded into context up front.
    pub fn resume_with_reads(
        &self,
        client: &dyn LlmClient,
        permissions: &PermissionState,
        prompt: &str,
        read_paths: Vec<String>,
        on_delta: Option<StreamCallback>,
    ) -> Result<TurnOutcome> {
        self.turn_loop(client, permissions, prompt, read_paths, on_delta)
    }

    /// Apply changes held across a write-permission pause.
    pub fn apply_pending(&self, pending: &PendingChanges) -> ApplyReport {
        let report = apply_all(&self.root, pending);
        self.memory.append_session(&applied_summary(&report));
        self.log_apply(&report);
        report
    }

    fn turn_loop(
        &self,
        client: &dyn LlmClient,
        permissions: &PermissionState,
        prompt: &str,
        mut read_paths: Vec<String>,
        on_delta: Option<StreamCallback>,
    ) -> Result<TurnOutcome> {
        let prompt = prompt.trim();
        anyhow::ensure!(!prompt.is_empty(), "prompt is required");
        self.memory.ensure_layout()?;

        let turn_id = Uuid::now_v7();
        self.observer.event(&format!("turn start id={turn_id}"));

        let mut budget = RetryBudget::default();
        let mut extra_instruction: Option<String> = None;

        loop {
            // 1. Assemble context under the current read permission.
            let allow_read = permissions.read_allowed() == Some(true);
            let ctx = self.build_context(prompt, &read_paths, allow_read)?;
            let mut instructions = build_developer_message(
                &ContextBundle {
                    operating_config: self.memory.operating_config(),
                    persona: self.memory.persona(),
                    long_term: self.memory.read_long_term(),
                    short_term: self
                        .memory
                        .short_term_window(self.config.short_term_window_bytes),
                    conversation: self
                        .memory
                        .conversation_window(self.config.conversation_max_bytes),
                    refs: ctx.refs.clone(),
                    file_list: ctx.file_list.clone(),
                    list_truncated: ctx.file_list_truncated,
                },
                prompt,
            );
            if let Some(instr) = extra_instruction.take() {
                instructions.push('\n');
                instructions.push_str(&instr);
            }

            // 2. Invoke the model and parse the structured response.
            let req = CompletionRequest {
                model: self.config.model.clone(),
                instructions,
                input: prompt.to_string(),
                format: OutputFormat::StructuredJson,
                temperature: None,
            };
            let raw = match &on_delta {
                Some(cb) => client.complete_streaming(&req, cb.clone()),
                None => client.complete(&req),
            };
            let raw = match raw {
                Ok(r) => r,
                Err(err) => {
                    // Transport failures abort the turn with no apply and no
                    // conversation entry.
                    self.observer.warn(&format!("model call failed: {err}"));
                    return Err(err).context("model invocation failed");
                }
            };
            let resp = match parse_response(&raw) {
                Ok(r) => r,
                Err(err) => {
                    if !budget.response_reformulated {
                        budget.response_reformulated = true;
                        self.observer
                            .event("malformed response, requesting reformulation");
                        extra_instruction = Some(REFORMULATE_RESPONSE.to_string());
                        continue;
                    }
                    return Err(err).context("model response stayed malformed after retry");
                }
            };

            // 3. Read requests come before any mutation.
            let reads = resp.read_paths();
            if !reads.is_empty() {
                match permissions.read_allowed() {
                    Some(false) => {
                        self.observer.event("read request denied by policy");
                        self.memory.append_session("\n## Read Denied\n");
                        return Ok(TurnOutcome::ReadDenied);
                    }
                    None => {
                        self.observer
                            .event(&format!("read confirmation needed paths={}", reads.join(",")));
                        return Ok(TurnOutcome::AwaitingReadPermission {
                            prompt: prompt.to_string(),
                            paths: reads,
                        });
                    }
                    Some(true) => {
                        // Depth cap stops read-request loops; once spent,
                        // further read requests are ignored and the rest of
                        // the response is honored as-is.
                        if budget.read_depth < MAX_READ_DEPTH {
                            budget.read_depth += 1;
                            extend_paths(&mut read_paths, &reads);
                            self.observer
                                .event(&format!("read rerun paths={}", reads.join(",")));
                            continue;
                        }
                    }
                }
            }

            // 4. Structural patch check, one reformulation at most.
            let bad = resp.malformed_patch_paths();
            if !bad.is_empty() {
                if !budget.patch_reformulated {
                    budget.patch_reformulated = true;
                    self.observer
                        .event(&format!("invalid diffs, requesting reformulation paths={}", bad.join(",")));
                    extra_instruction = Some(format!(
                        "These patches were not valid unified diffs: {}. Respond again with \
                         corrected unified diffs containing @@ -a,b +c,d @@ hunk headers.",
                        bad.join(", ")
                    ));
                    continue;
                }
                return Err(ProtocolError::PatchFormat {
                    path: bad[0].clone(),
                }
                .into());
            }

            // 5. Patches against files the model never saw: rerun once with
            // those files loaded, so it does not guess at contents.
            if permissions.read_allowed() == Some(true) && !budget.patch_context_rerun {
                let missing = self.unloaded_patch_paths(&resp, &ctx.refs);
                if !missing.is_empty() {
                    budget.patch_context_rerun = true;
                    self.observer
                        .event(&format!("patch context rerun paths={}", missing.join(",")));
                    extend_paths(&mut read_paths, &missing);
                    continue;
                }
            }

            // 6. Gate mutations on the effective write permission.
            let pending = pending_from(&resp);
            if pending.is_empty() {
                let result =
                    self.finalize(client, turn_id, prompt, ctx, &resp.message, &raw, None, false);
                return Ok(TurnOutcome::Completed(result));
            }
            match permissions.write_allowed() {
                Some(false) => {
                    self.observer
                        .event(&format!("changes denied by policy ({})", pending.summary()));
                    self.memory
                        .append_session(&proposed_summary(&pending, "Denied Changes"));
                    let result =
                        self.finalize(client, turn_id, prompt, ctx, &resp.message, &raw, None, true);
                    return Ok(TurnOutcome::Completed(result));
                }
                None => {
                    self.observer.event(&format!(
                        "write confirmation needed ({})",
                        pending.summary()
                    ));
                    self.memory
                        .append_session(&proposed_summary(&pending, "Proposed Changes"));
                    let result = self
                        .finalize(client, turn_id, prompt, ctx, &resp.message, &raw, None, false);
                    return Ok(TurnOutcome::AwaitingWritePermission { pending, result });
                }
                Some(true) => {
                    let report = apply_all(&self.root, &pending);
                    self.memory.append_session(&applied_summary(&report));
                    self.log_apply(&report);

                    // 7. One full-file rewrite retry for patches that did
                    // not match, with their current contents in context.
                    let mismatched = report.mismatched_patch_paths();
                    if !mismatched.is_empty() && !budget.rewrite_retried {
                        budget.rewrite_retried = true;
                        if permissions.read_allowed() == Some(true) {
                            extend_paths(&mut read_paths, &mismatched);
                        }
                        self.observer
                            .event(&format!("rewrite retry paths={}", mismatched.join(",")));
                        extra_instruction = Some(format!(
                            "These patches failed to apply cleanly: {}. Respond again with \
                             full-file writes for only those paths.",
                            mismatched.join(", ")
                        ));
                        continue;
                    }

                    let result = self.finalize(
                        client,
                        turn_id,
                        prompt,
                        ctx,
                        &resp.message,
                        &raw,
                        Some(report),
                        false,
                    );
                    return Ok(TurnOutcome::Completed(result));
                }
            }
        }
    }

    fn build_context(
        &self,
        prompt: &str,
        read_paths: &[String],
        allow_read: bool,
    ) -> Result<TurnContext> {
        let mentions = extract_mentions(prompt);
        let mut refs = load_mentioned_files(
            &self.root,
            &mentions,
            allow_read,
            self.config.max_file_bytes,
            self.config.max_total_read_bytes,
        );
        if !read_paths.is_empty() {
            // Granted read paths are loaded unconditionally; the grant is
            // what put them here.
            let extra = load_mentioned_files(
                &self.root,
                read_paths,
                true,
                self.config.max_file_bytes,
                self.config.max_total_read_bytes,
            );
            refs = merge_file_refs(refs, extra);
        }
        let (file_list, file_list_truncated) =
            list_relevant_files(&self.root, prompt, self.config.max_files_listed);
        self.memory
            .append_session_header(prompt, &mentions, &refs)?;
        Ok(TurnContext {
            mentions,
            refs,
            file_list,
            file_list_truncated,
        })
    }

    fn unloaded_patch_paths(&self, resp: &StructuredResponse, refs: &[FileRef]) -> Vec<String> {
        let loaded: Vec<&str> = refs
            .iter()
            .filter(|r| r.content.is_some())
            .map(|r| r.path.as_str())
            .collect();
        let mut missing: Vec<String> = Vec::new();
        for p in &resp.patches {
            let Ok(clean) = repo_relative(&p.path) else {
                continue;
            };
            let clean = clean.to_string_lossy().replace('\\', "/");
            if !loaded.contains(&clean.as_str()) && !missing.contains(&clean) {
                missing.push(clean);
            }
        }
        missing
    }

    /// Step 8: persist the turn to the conversation tier, condense the
    /// short-term tier if oversized, and assemble the result.
    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &self,
        client: &dyn LlmClient,
        turn_id: Uuid,
        prompt: &str,
        ctx: TurnContext,
        message: &str,
        raw: &str,
        applied: Option<ApplyReport>,
        changes_denied: bool,
    ) -> TurnResult {
        self.memory
            .append_session(&format!("\n## Model Message\n{message}\n"));
        self.memory
            .append_conversation(prompt, message, self.config.conversation_max_bytes);

        // Condensation failure leaves the tier oversized, never lost.
        let condensed = match self.memory.auto_condense_if_needed(
            client,
            &self.config.model,
            self.config.short_term_max_bytes,
        ) {
            Ok(ran) => ran,
            Err(err) => {
                self.observer.warn(&format!("condensation failed: {err}"));
                self.memory
                    .append_session(&format!("\n## Condense Error\n{err}\n"));
                false
            }
        };

        self.observer.event(&format!("turn complete id={turn_id}"));
        TurnResult {
            turn_id,
            message: message.to_string(),
            raw_output: raw.to_string(),
            mentions: ctx.mentions,
            refs: ctx.refs,
            file_list: ctx.file_list,
            file_list_truncated: ctx.file_list_truncated,
            applied,
            changes_denied,
            memory: self.memory.memory_stats(),
            condensed,
        }
    }

    fn log_apply(&self, report: &ApplyReport) {
        for w in &report.writes {
            self.observer.event(&format!("write applied path={}", w.path));
        }
        for d in &report.deletes {
            self.observer.event(&format!("delete applied path={}", d.path));
        }
        for p in &report.patches {
            self.observer.event(&format!("patch applied path={}", p.path));
        }
        for f in &report.patch_failures {
            self.observer
                .event(&format!("patch failed path={} reason={}", f.path, f.reason));
        }
    }
}

fn extend_paths(paths: &mut Vec<String>, extra: &[String]) {
    for p in extra {
        if !paths.contains(p) {
            paths.push(p.clone());
        }
    }
}

fn pending_from(resp: &StructuredResponse) -> PendingChanges {
    PendingChanges {
        writes: resp
            .writes
            .iter()
            .map(|w| WriteOp {
                path: w.path.clone(),
                content: w.content.clone(),
            })
            .collect(),
        deletes: resp
            .deletes
            .iter()
            .filter(|d| !d.trim().is_empty())
            .map(|d| DeleteOp {
                path: d.trim().to_string(),
            })
            .collect(),
        patches: resp
            .patches
            .iter()
            .map(|p| PatchOp {
                path: p.path.clone(),
                diff: p.diff.clone(),
            })
            .collect(),
    }
}

fn applied_summary(report: &ApplyReport) -> String {
    let mut b = String::from("\n## Applied Changes\n");
    push_ops(
        &mut b,
        &report.writes,
        &report.deletes,
        &report.patches,
        &report.patch_failures,
    );
    b
}

fn proposed_summary(pending: &PendingChanges, title: &str) -> String {
    let mut b = format!("\n## {title}\n");
    push_ops(&mut b, &pending.writes, &pending.deletes, &pending.patches, &[]);
    b
}

fn push_ops(
    b: &mut String,
    writes: &[WriteOp],
    deletes: &[DeleteOp],
    patches: &[PatchOp],
    failures: &[PatchFailure],
) {
    if writes.is_empty() && deletes.is_empty() && patches.is_empty() && failures.is_empty() {
        b.push_str("(none)\n");
        return;
    }
    for w in writes {
        b.push_str(&format!("- write {} ({} bytes)\n", w.path, w.content.len()));
    }
    for d in deletes {
        b.push_str(&format!("- delete {}\n", d.path));
    }
    for p in patches {
        b.push_str(&format!("- patch {}\n", p.path));
    }
    for f in failures {
        b.push_str(&format!("- patch FAILED {} ({})\n", f.path, f.reason));
    }
}
