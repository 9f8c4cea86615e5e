use anyhow::Result;
use forebrain_agent::{AgentEngine, ApplyReport, TurnOutcome, TurnResult};
use forebrain_core::UserSettings;
use forebrain_llm::{LlmClient, StreamCallback, StreamEvent};
use forebrain_policy::{Axis, PermissionChoice, PermissionState, PolicyStore};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;

use crate::context::{build_client, build_engine, resolve_permissions};
use crate::output::print_json;
use crate::Cli;

const HELP: &str = "\
commands:
  /help               show this help
  /clear              reset short-term memory
  /condense           condense short-term memory now
  /usage              context usage against the token budget
  /model [name]       show or switch the model
  /retry              rerun the previous prompt
  /exit, /quit        leave the session";

pub(crate) fn run_chat(cwd: &Path, cli: &Cli) -> Result<()> {
    let mut engine = build_engine(cwd, cli)?;
    let mut client = build_client(engine.config())?;
    let (mut permissions, store) = resolve_permissions(cwd, cli);
    engine.memory().ensure_layout()?;

    println!(
        "forebrain | model {} | memory {}",
        engine.config().model,
        engine.memory().dir().display()
    );
    println!("type /help for commands\n");

    let stdin = io::stdin();
    let mut last_prompt: Option<String> = None;
    loop {
        print!("> ");
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(cmd) = input.strip_prefix('/') {
            let mut parts = cmd.splitn(2, ' ');
            match (parts.next().unwrap_or(""), parts.next()) {
                ("exit", _) | ("quit", _) => break,
                ("help", _) => println!("{HELP}"),
                ("clear", _) => {
                    engine.memory().clear_short_term()?;
                    println!("short-term memory cleared");
                }
                ("condense", _) => {
                    match engine
                        .memory()
                        .condense_short_term(&client, &engine.config().model)
                    {
                        Ok(Some(summary)) => println!("condensed:\n{summary}"),
                        Ok(None) => println!("short-term memory is empty"),
                        Err(err) => eprintln!("condensation failed: {err}"),
                    }
                }
                ("usage", _) => {
                    let usage = engine.memory().usage_stats(engine.config());
                    println!(
                        "long-term {}B | short-term {}B (window {}B) | conversation {}B (window {}B)",
                        usage.long_term_bytes,
                        usage.short_term_bytes,
                        usage.short_term_window_bytes,
                        usage.conversation_bytes,
                        usage.conversation_window_bytes,
                    );
                    println!(
                        "~{} tokens of {} budget",
                        usage.approx_tokens, usage.budget_tokens
                    );
                }
                ("model", None) => println!("model: {}", engine.config().model),
                ("model", Some(name)) => {
                    let name = name.trim();
                    let mut settings = UserSettings::load().unwrap_or_default();
                    settings.model = name.to_string();
                    settings.save()?;
                    // Rebuild so the new model applies to the next turn.
                    engine = build_engine(cwd, cli)?;
                    client = build_client(engine.config())?;
                    println!("model set to {name}");
                }
                ("retry", _) => match last_prompt.clone() {
                    Some(prompt) => {
                        run_prompt(&engine, &client, &mut permissions, &store, &prompt, cli)?
                    }
                    None => println!("nothing to retry yet"),
                },
                (other, _) => println!("unknown command /{other}; try /help"),
            }
            continue;
        }

        last_prompt = Some(input.to_string());
        run_prompt(&engine, &client, &mut permissions, &store, input, cli)?;
    }
    Ok(())
}

/// One-shot mode: no confirmation prompts are possible, so an unresolved
/// permission ends the run with a pointer at the session-grant flags.
pub(crate) fn run_ask(cwd: &Path, cli: &Cli, prompt: &str) -> Result<()> {
    let engine = build_engine(cwd, cli)?;
    let client = build_client(engine.config())?;
    let (permissions, _store) = resolve_permissions(cwd, cli);

    let outcome = engine.run_turn(&client, &permissions, prompt, delta_sink(cli))?;
    match outcome {
        TurnOutcome::Completed(result) => print_result(cli, &result),
        TurnOutcome::AwaitingReadPermission { paths, .. } => {
            if cli.json {
                print_json(&json!({"blocked": "read", "paths": paths}))?;
            } else {
                eprintln!(
                    "blocked: the model asked to read {}; rerun with --allow-reads",
                    paths.join(", ")
                );
            }
            Ok(())
        }
        TurnOutcome::AwaitingWritePermission { pending, result } => {
            if cli.json {
                print_json(&json!({
                    "blocked": "write",
                    "pending": pending.summary(),
                    "message": result.message,
                }))?;
            } else {
                println!("{}", result.message);
                eprintln!(
                    "blocked: proposed {}; rerun with --allow-writes to apply",
                    pending.summary()
                );
            }
            Ok(())
        }
        TurnOutcome::ReadDenied => {
            eprintln!("read denied; the model needed file contents to continue");
            Ok(())
        }
    }
}

fn run_prompt(
    engine: &AgentEngine,
    client: &dyn LlmClient,
    permissions: &mut PermissionState,
    store: &dyn PolicyStore,
    prompt: &str,
    cli: &Cli,
) -> Result<()> {
    let mut outcome = match engine.run_turn(client, permissions, prompt, delta_sink(cli)) {
        Ok(o) => o,
        Err(err) => {
            eprintln!("turn failed: {err:#}");
            return Ok(());
        }
    };

    loop {
        match outcome {
            TurnOutcome::Completed(result) => return print_result(cli, &result),
            TurnOutcome::ReadDenied => {
                println!("read denied; ask again or /retry after changing permissions");
                return Ok(());
            }
            TurnOutcome::AwaitingReadPermission { prompt, paths } => {
                println!("the model wants to read: {}", paths.join(", "));
                let choice = match ask("allow? [y]es / [n]o / [a]lways: ")?.as_str() {
                    "y" | "yes" => PermissionChoice::AllowSession,
                    "a" | "always" => PermissionChoice::AllowAlways,
                    _ => PermissionChoice::DenySession,
                };
                permissions.apply_choice(Axis::Read, choice, store)?;
                if permissions.read_allowed() != Some(true) {
                    println!("read denied");
                    return Ok(());
                }
                outcome = match engine.resume_with_reads(
                    client,
                    permissions,
                    &prompt,
                    paths,
                    delta_sink(cli),
                ) {
                    Ok(o) => o,
                    Err(err) => {
                        eprintln!("turn failed: {err:#}");
                        return Ok(());
                    }
                };
            }
            TurnOutcome::AwaitingWritePermission { pending, result } => {
                println!("{}\n", result.message);
                println!("proposed changes: {}", pending.summary());
                let answer = ask("apply? [a]pply / apply-[A]lways / [d]eny / deny-always: ")?;
                let choice = match answer.as_str() {
                    "a" | "apply" => PermissionChoice::AllowSession,
                    "A" | "apply-always" => PermissionChoice::AllowAlways,
                    "deny-always" => PermissionChoice::DenyAlways,
                    _ => PermissionChoice::DenySession,
                };
                permissions.apply_choice(Axis::Write, choice, store)?;
                if permissions.write_allowed() == Some(true) {
                    let report = engine.apply_pending(&pending);
                    print_report(&report);
                } else {
                    println!("changes discarded");
                }
                return Ok(());
            }
        }
    }
}

fn print_result(cli: &Cli, result: &TurnResult) -> Result<()> {
    if cli.json {
        return print_json(&json!({
            "turn_id": result.turn_id.to_string(),
            "message": result.message,
            "changes_denied": result.changes_denied,
            "condensed": result.condensed,
            "applied": result.applied.as_ref().map(|r| json!({
                "writes": r.writes.len(),
                "deletes": r.deletes.len(),
                "patches": r.patches.len(),
                "patch_failures": r.patch_failures.len(),
            })),
        }));
    }

    println!("{}", result.message);
    if let Some(report) = &result.applied {
        print_report(report);
    }
    if result.changes_denied {
        println!("(proposed changes were denied by policy)");
    }
    if result.condensed {
        println!("(short-term memory condensed)");
    }
    Ok(())
}

fn print_report(report: &ApplyReport) {
    for w in &report.writes {
        println!("  wrote {}", w.path);
    }
    for d in &report.deletes {
        println!("  deleted {}", d.path);
    }
    for p in &report.patches {
        println!("  patched {}", p.path);
    }
    for f in &report.patch_failures {
        println!("  FAILED {} ({})", f.path, f.reason);
    }
}

/// Verbose sessions mirror raw stream deltas to stderr; otherwise the
/// response is printed once, after parsing.
fn delta_sink(cli: &Cli) -> Option<StreamCallback> {
    if !cli.verbose {
        return None;
    }
    Some(Arc::new(|event: StreamEvent| {
        if let StreamEvent::Delta(chunk) = event {
            eprint!("{chunk}");
        } else {
            eprintln!();
        }
    }))
}

fn ask(prompt: &str) -> Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
