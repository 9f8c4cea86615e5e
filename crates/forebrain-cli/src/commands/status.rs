use anyhow::Result;
use forebrain_core::UserSettings;
use forebrain_memory::MemoryStore;
use serde_json::json;

use crate::context::effective_config;
use crate::output::print_json;
use crate::{Cli, ModelArgs};

pub(crate) fn run_usage(cli: &Cli) -> Result<()> {
    let config = effective_config(cli)?;
    let store = MemoryStore::open_default()?;
    store.ensure_layout()?;
    let usage = store.usage_stats(&config);
    if cli.json {
        print_json(&json!({
            "long_term_bytes": usage.long_term_bytes,
            "short_term_bytes": usage.short_term_bytes,
            "short_term_window_bytes": usage.short_term_window_bytes,
            "conversation_bytes": usage.conversation_bytes,
            "conversation_window_bytes": usage.conversation_window_bytes,
            "approx_tokens": usage.approx_tokens,
            "budget_tokens": usage.budget_tokens,
        }))?;
    } else {
        println!("long-term       {}B (sent in full)", usage.long_term_bytes);
        println!(
            "short-term      {}B, window {}B",
            usage.short_term_bytes, usage.short_term_window_bytes
        );
        println!(
            "conversation    {}B, window {}B",
            usage.conversation_bytes, usage.conversation_window_bytes
        );
        println!(
            "approx. context ~{} tokens of {} budget",
            usage.approx_tokens, usage.budget_tokens
        );
    }
    Ok(())
}

pub(crate) fn run_model(cli: &Cli, args: ModelArgs) -> Result<()> {
    let mut settings = UserSettings::load().unwrap_or_default();
    match args.name {
        Some(name) => {
            let name = name.trim().to_string();
            settings.model = name.clone();
            settings.save()?;
            if cli.json {
                print_json(&json!({"model": name, "saved": true}))?;
            } else {
                println!("model set to {name}");
            }
        }
        None => {
            if cli.json {
                print_json(&json!({"model": settings.model_or_default()}))?;
            } else {
                println!("model: {}", settings.model_or_default());
            }
        }
    }
    Ok(())
}
