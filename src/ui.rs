/// Plain-stdout presentation: status lines, prompts, help.
use std::io::Write;

use crossterm::style::Stylize;

use crate::config::Config;
use crate::enrich::Enrichment;
use crate::state::SessionState;
use crate::tools::ToolRegistry;

/// Short status message, suppressed in quiet mode.
pub fn status(quiet: bool, text: &str) {
    if !quiet {
        println!("  {}", text.dark_grey());
    }
}

/// Errors are shown even in quiet mode.
pub fn error(text: &str) {
    println!("  {} {text}", "✗".red());
}

pub fn prompt(user_name: &str) {
    print!("{} ", format!("{user_name}:").bold());
    let _ = std::io::stdout().flush();
}

pub fn tool_result(name: &str, output: &str) {
    println!("  {} {name}", "⚙".dark_grey());
    println!("{output}");
}

pub fn status_line(turn: usize, state: &SessionState) -> String {
    let mode = if state.tools_enabled { "agent" } else { "simple" };
    format!(
        "{turn}) {} → {mode} {} ({}) → {}",
        state.input_mode, state.model_key, state.model_options.model, state.output_mode
    )
}

pub fn help_text(config: &Config, enrichment: &Enrichment, tools: &ToolRegistry) -> String {
    let p = &config.phrases;
    let mut lines = vec![
        "Commands (must come first, can be chained):".to_string(),
        format!("  exit          {}", p.exit.join(", ")),
        format!("  clear memory  {}", p.clear_memory.join(", ")),
        format!("  run once      {}", p.run_once.join(", ")),
        format!("  quiet         {}", p.quiet.join(", ")),
        format!("  verbose       {}", p.verbose.join(", ")),
        "  voice / text  verbal, text".to_string(),
        format!("  tools on      {}", p.with_tools.join(", ")),
        format!("  tools off     {}", p.no_tools.join(", ")),
        String::new(),
        "Models:".to_string(),
    ];
    for (key, model) in &config.models {
        let synonyms = if model.synonyms.is_empty() {
            String::new()
        } else {
            format!("  (also: {})", model.synonyms.join(", "))
        };
        lines.push(format!("  {key:<12}  {} {}{synonyms}", model.provider.as_str(), model.model));
    }
    lines.push(String::new());
    lines.push(format!("Input:  {}", config.io_input.keys().cloned().collect::<Vec<_>>().join(", ")));
    lines.push(format!("Output: {}", config.io_output.keys().cloned().collect::<Vec<_>>().join(", ")));

    if !enrichment.enrichers().is_empty() {
        lines.push(String::new());
        lines.push("Enrichers:".to_string());
        for e in enrichment.enrichers() {
            lines.push(format!("  {:<12}  {}", e.name(), e.description()));
        }
    }
    if !tools.is_empty() {
        lines.push(String::new());
        lines.push(format!("Tools (type the name to run directly): {}", tools.names().join(", ")));
    }
    if !config.tasks.is_empty() {
        lines.push(String::new());
        lines.push(format!("Tasks: {}", config.tasks.keys().cloned().collect::<Vec<_>>().join(", ")));
    }
    lines.join("\n")
}
