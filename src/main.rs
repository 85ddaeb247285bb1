mod client;
mod config;
mod dispatch;
mod enrich;
mod error;
mod history;
mod hotkey;
mod io;
mod llm;
mod manager;
mod phrases;
mod state;
mod tools;
mod ui;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use tokio::io::AsyncReadExt;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

use config::Config;
use dispatch::Dispatcher;
use enrich::Enrichment;
use io::IoRegistry;
use llm::OpenAiFactory;
use manager::{Manager, TurnInput};
use state::SessionState;
use tools::ToolRegistry;

#[derive(Parser, Debug)]
#[command(
    name = "parlance",
    about = "A conversational front-end for local and cloud LLMs",
    long_about = None,
)]
struct Args {
    /// Leading commands (e.g. `once quiet groq`) followed by a question.
    /// Omit to start an interactive conversation.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    words: Vec<String>,

    /// Config file to use
    #[arg(short, long, env = "PARLANCE_CONFIG")]
    config: Option<PathBuf>,

    /// Write a default config file to ~/.config/parlance/config.toml and exit
    #[arg(long)]
    init: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PARLANCE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let path = args.config.clone().unwrap_or_else(config::config_path);

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        Config::write_default_if_missing(&path)?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: parlance");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    if !path.exists() {
        bail!(
            "No config file at {}. Run `parlance --init` to create one.",
            path.display()
        );
    }
    let config = Config::load(&path)?;
    let mut state = SessionState::new(&config)?;

    // ── Command-line words: commands first, then the question ────────────────
    let outcome = Dispatcher::new(&config)
        .dispatch(&args.words.join(" "), &mut state, &config)
        .context("Invalid command on the command line")?;
    for note in &outcome.notes {
        ui::status(state.quiet, note);
    }
    if outcome.exit_requested() {
        return Ok(());
    }

    let mut question = outcome.question;
    if !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        tokio::io::stdin()
            .read_to_string(&mut piped)
            .await
            .context("Failed to read stdin")?;
        let piped = piped.trim_end();
        if !piped.is_empty() {
            question = if question.is_empty() {
                piped.to_string()
            } else {
                format!("{question}\n\n{piped}")
            };
        }
    }

    let tools = Arc::new(ToolRegistry::from_config(&config));
    let enrichment = Enrichment::from_config(&config)?;
    let io = IoRegistry::from_config(&config);
    let factory = Box::new(OpenAiFactory::new(Arc::clone(&tools)));

    // Ctrl-C aborts the current wait instead of killing the process.
    let interrupt = Arc::new(Notify::new());
    let signal = Arc::clone(&interrupt);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            signal.notify_waiters();
        }
    });

    let first = if question.is_empty() {
        TurnInput::Ask
    } else {
        TurnInput::Question(question)
    };

    let mut manager = Manager::new(config, state, factory, io, tools, enrichment).with_interrupt(interrupt);
    manager.run(first).await
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => bail!("Unknown shell: {shell_name} (supported: bash, zsh, fish, elvish)"),
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "parlance", &mut std::io::stdout());
    Ok(())
}
