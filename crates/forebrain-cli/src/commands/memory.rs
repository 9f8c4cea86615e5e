use anyhow::Result;
use forebrain_memory::MemoryStore;
use serde_json::json;
use std::path::Path;

use crate::context::{build_client, effective_config};
use crate::output::print_json;
use crate::{Cli, MemoryCmd};

pub(crate) fn run_memory(_cwd: &Path, cli: &Cli, cmd: MemoryCmd) -> Result<()> {
    let store = MemoryStore::open_default()?;
    store.ensure_layout()?;
    match cmd {
        MemoryCmd::Show => {
            let stats = store.memory_stats();
            if cli.json {
                print_json(&json!({
                    "dir": store.dir(),
                    "long_term": {
                        "path": store.long_term_path(),
                        "lines": stats.long_term_lines,
                        "bytes": stats.long_term_bytes,
                    },
                    "short_term": {
                        "path": store.short_term_path(),
                        "lines": stats.short_term_lines,
                        "bytes": stats.short_term_bytes,
                    },
                    "conversation": { "path": store.conversation_path() },
                }))?;
            } else {
                println!("memory dir: {}", store.dir().display());
                println!(
                    "long-term   {} ({} lines, {}B)",
                    store.long_term_path().display(),
                    stats.long_term_lines,
                    stats.long_term_bytes
                );
                println!(
                    "short-term  {} ({} lines, {}B)",
                    store.short_term_path().display(),
                    stats.short_term_lines,
                    stats.short_term_bytes
                );
                println!("conversation {}", store.conversation_path().display());
            }
        }
        MemoryCmd::Clear => {
            store.clear_short_term()?;
            if cli.json {
                print_json(&json!({"cleared": true}))?;
            } else {
                println!("short-term memory cleared");
            }
        }
        MemoryCmd::Condense => {
            let config = effective_config(cli)?;
            let client = build_client(&config)?;
            match store.condense_short_term(&client, &config.model)? {
                Some(summary) => {
                    if cli.json {
                        print_json(&json!({"condensed": true, "summary": summary}))?;
                    } else {
                        println!("condensed:\n{summary}");
                    }
                }
                None => {
                    if cli.json {
                        print_json(&json!({"condensed": false}))?;
                    } else {
                        println!("short-term memory is empty");
                    }
                }
            }
        }
    }
    Ok(())
}
