use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;
mod context;
mod output;

use commands::admin::run_permissions;
use commands::chat::{run_ask, run_chat};
use commands::memory::run_memory;
use commands::status::{run_model, run_usage};

#[derive(Parser)]
#[command(name = "forebrain")]
#[command(about = "Local coding agent with tiered memory", long_about = None)]
pub(crate) struct Cli {
    /// Machine-readable JSON output where supported.
    #[arg(long, global = true)]
    json: bool,

    /// Override the model for this invocation.
    #[arg(long, global = true)]
    model: Option<String>,

    /// Verbose logging to stderr, including raw stream deltas.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Grant file reads for this session without prompting.
    #[arg(long = "allow-reads", global = true)]
    allow_reads: bool,

    /// Grant file writes for this session without prompting.
    #[arg(long = "allow-writes", global = true)]
    allow_writes: bool,

    /// Non-interactive mode: run the prompt, print the result, exit.
    #[arg(short = 'p', long = "print")]
    print_mode: bool,

    /// Prompt for print mode.
    #[arg(trailing_var_arg = true)]
    prompt_args: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session (default).
    Chat,
    /// One-shot prompt, non-interactive.
    Ask(PromptArg),
    /// Inspect or maintain the memory tiers.
    Memory {
        #[command(subcommand)]
        command: MemoryCmd,
    },
    /// Context and memory usage against the token budget.
    Usage,
    /// Show or set the preferred model.
    Model(ModelArgs),
    /// Inspect or reset the project permission policy.
    Permissions {
        #[command(subcommand)]
        command: PermissionsCmd,
    },
}

#[derive(Args)]
pub(crate) struct PromptArg {
    pub prompt: String,
}

#[derive(Args, Default)]
pub(crate) struct ModelArgs {
    /// New model name; omit to show the current one.
    pub name: Option<String>,
}

#[derive(Subcommand)]
pub(crate) enum MemoryCmd {
    /// Tier paths and sizes.
    Show,
    /// Reset the short-term tier.
    Clear,
    /// Condense the short-term tier through the model now.
    Condense,
}

#[derive(Subcommand)]
pub(crate) enum PermissionsCmd {
    Show,
    Reset,
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    if cli.print_mode {
        let prompt = if cli.prompt_args.is_empty() {
            std::io::read_to_string(std::io::stdin())?
        } else {
            cli.prompt_args.join(" ")
        };
        return run_ask(&cwd, &cli, &prompt);
    }

    let command = cli.command.take().unwrap_or(Commands::Chat);
    match command {
        Commands::Chat => run_chat(&cwd, &cli),
        Commands::Ask(args) => run_ask(&cwd, &cli, &args.prompt),
        Commands::Memory { command } => run_memory(&cwd, &cli, command),
        Commands::Usage => run_usage(&cli),
        Commands::Model(args) => run_model(&cli, args),
        Commands::Permissions { command } => run_permissions(&cwd, &cli, command),
    }
}
