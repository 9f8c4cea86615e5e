//! Shared wiring between commands: engine construction, the HTTP client,
//! and the effective configuration.

use anyhow::{Context, Result};
use forebrain_agent::AgentEngine;
use forebrain_core::{AgentConfig, UserSettings};
use forebrain_llm::OpenAiClient;
use forebrain_memory::MemoryStore;
use forebrain_policy::{FsPolicyStore, PermissionState};
use std::path::Path;

use crate::Cli;

/// Model preference order: CLI flag, then persisted setting, then default.
pub(crate) fn effective_config(cli: &Cli) -> Result<AgentConfig> {
    let settings = UserSettings::load().unwrap_or_default();
    let mut config = AgentConfig::default();
    config.model = match &cli.model {
        Some(m) => m.clone(),
        None => settings.model_or_default().to_string(),
    };
    Ok(config)
}

pub(crate) fn build_engine(cwd: &Path, cli: &Cli) -> Result<AgentEngine> {
    let config = effective_config(cli)?;
    let memory = MemoryStore::open_default()?;
    let mut engine = AgentEngine::new(cwd, memory, config)?;
    engine.observer().set_verbose(cli.verbose);
    Ok(engine)
}

pub(crate) fn build_client(config: &AgentConfig) -> Result<OpenAiClient> {
    OpenAiClient::new(config.timeout_seconds)
        .context("set OPENAI_API_KEY or store a key with the config file")
}

pub(crate) fn resolve_permissions(cwd: &Path, cli: &Cli) -> (PermissionState, FsPolicyStore) {
    let store = FsPolicyStore::new(cwd);
    let state = PermissionState::resolve(&store, cli.allow_reads, cli.allow_writes);
    (state, store)
}
