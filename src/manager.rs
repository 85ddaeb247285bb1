/// The conversation loop.
///
/// One turn: read an utterance, strip and apply leading commands, answer
/// direct tool lookups, enrich, (re)build the LLM session if its shape
/// changed, ask the model with bounded retry, then print, speak and record
/// the answer. Turns run strictly one after another.
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::style::Stylize;
use tokio::sync::Notify;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::enrich::Enrichment;
use crate::error::Interrupted;
use crate::history::{ChatMemory, Transcript};
use crate::io::{IoContext, IoRegistry};
use crate::llm::{LlmSession, SessionFactory, Turn};
use crate::state::SessionState;
use crate::tools::{StateRequest, ToolRegistry};
use crate::ui;

/// Transcript speaker for text added by enrichers.
const ENRICHED_SPEAKER: &str = "Pre-parser";
/// Consecutive input-method failures before the loop gives up.
const MAX_INPUT_FAILURES: usize = 3;

/// Where the next turn's text comes from.
#[derive(Debug, Clone)]
pub enum TurnInput {
    /// Ask the current input method.
    Ask,
    /// Treat as if the user had typed it.
    Utterance(String),
    /// Commands already applied; `help` and task names are still honoured.
    Question(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Settings a task run changes and puts back afterwards.
#[derive(Debug, Clone)]
struct Snapshot {
    model_key: String,
    tools_enabled: bool,
    quiet: bool,
}

#[derive(Debug)]
enum Pending {
    Utterance(String),
    Restore(Snapshot),
}

pub struct Manager {
    config: Config,
    state: SessionState,
    dispatcher: Dispatcher,
    enrichment: Enrichment,
    tools: Arc<ToolRegistry>,
    io: IoRegistry,
    factory: Box<dyn SessionFactory>,
    session: Option<Box<dyn LlmSession>>,
    built_fingerprint: Option<u64>,
    built_prompts: Vec<PathBuf>,
    memory: ChatMemory,
    transcript: Transcript,
    interrupt: Arc<Notify>,
    pending: VecDeque<Pending>,
    retry_delay: Duration,
    turns: usize,
    input_failures: usize,
    last_answer: Option<String>,
}

impl Manager {
    pub fn new(
        config: Config,
        state: SessionState,
        factory: Box<dyn SessionFactory>,
        io: IoRegistry,
        tools: Arc<ToolRegistry>,
        enrichment: Enrichment,
    ) -> Self {
        let transcript = Transcript::new(config.transcript_path(), config.transcript.width);
        let retry_delay =
            Duration::try_from_secs_f64(config.agent.sleep_seconds_between_tries).unwrap_or_default();
        Self {
            dispatcher: Dispatcher::new(&config),
            config,
            state,
            enrichment,
            tools,
            io,
            factory,
            session: None,
            built_fingerprint: None,
            built_prompts: Vec::new(),
            memory: ChatMemory::default(),
            transcript,
            interrupt: Arc::new(Notify::new()),
            pending: VecDeque::new(),
            retry_delay,
            turns: 0,
            input_failures: 0,
            last_answer: None,
        }
    }

    /// Share an interrupt signal (Ctrl-C) that aborts the current wait.
    pub fn with_interrupt(mut self, interrupt: Arc<Notify>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn memory(&self) -> &ChatMemory {
        &self.memory
    }

    pub fn last_answer(&self) -> Option<&str> {
        self.last_answer.as_deref()
    }

    /// Run turns until one asks to stop.
    pub async fn run(&mut self, first: TurnInput) -> Result<()> {
        let mut input = first;
        while self.turn(input).await? == Flow::Continue {
            input = TurnInput::Ask;
        }
        Ok(())
    }

    fn io_context(&self) -> IoContext {
        IoContext {
            quiet: self.state.quiet,
            hotkey_enabled: self.state.hotkey_enabled,
            hotkey_presses: self.config.agent.hotkey_presses,
            user_name: self.config.user.name.clone(),
        }
    }

    fn after_turn(&self) -> Flow {
        if self.state.stopped { Flow::Stop } else { Flow::Continue }
    }

    fn record(&self, speaker: &str, text: &str) {
        if let Err(e) = self.transcript.append(speaker, text) {
            tracing::warn!(error = %e, "transcript write failed");
        }
    }

    // ── Turn ──────────────────────────────────────────────────────────────────

    pub async fn turn(&mut self, input: TurnInput) -> Result<Flow> {
        let input = match input {
            TurnInput::Ask => match self.pending.pop_front() {
                Some(Pending::Utterance(u)) => TurnInput::Utterance(u),
                Some(Pending::Restore(snapshot)) => {
                    self.restore(snapshot)?;
                    return Ok(Flow::Continue);
                }
                None => TurnInput::Ask,
            },
            other => other,
        };

        // ── Awaiting input ────────────────────────────────────────────────────
        let (utterance, dispatched) = match input {
            TurnInput::Ask => {
                self.turns += 1;
                ui::status(self.state.quiet, &ui::status_line(self.turns, &self.state));
                match self.read_input().await {
                    Ok(Some(text)) => {
                        self.input_failures = 0;
                        (text, false)
                    }
                    Ok(None) => return Ok(Flow::Stop),
                    Err(e) if e.is::<Interrupted>() => {
                        println!();
                        ui::status(self.state.quiet, "Interrupted");
                        return Ok(Flow::Continue);
                    }
                    Err(e) => {
                        self.input_failures += 1;
                        if self.input_failures >= MAX_INPUT_FAILURES {
                            return Err(e.context(format!("input method '{}' keeps failing", self.state.input_mode)));
                        }
                        ui::error(&format!("{e:#}"));
                        return Ok(Flow::Continue);
                    }
                }
            }
            TurnInput::Utterance(text) => (text, false),
            TurnInput::Question(text) => (text, true),
        };

        let trimmed = utterance.trim();
        if trimmed.eq_ignore_ascii_case("help") {
            println!("{}", ui::help_text(&self.config, &self.enrichment, &self.tools));
            return Ok(Flow::Continue);
        }
        if let Some(steps) = self.config.tasks.get(trimmed) {
            let steps = steps.clone();
            self.enqueue_task(&steps);
            return Ok(Flow::Continue);
        }

        // ── Dispatching ───────────────────────────────────────────────────────
        let question = if dispatched {
            trimmed.to_string()
        } else {
            let before = self.state.fingerprint();
            let outcome = match self.dispatcher.dispatch(&utterance, &mut self.state, &self.config) {
                Ok(outcome) => outcome,
                Err(e) => {
                    ui::error(&e.to_string());
                    return Ok(Flow::Continue);
                }
            };
            for note in &outcome.notes {
                ui::status(self.state.quiet, note);
            }
            if self.state.new_memory {
                self.memory.clear();
                self.state.new_memory = false;
            }
            if outcome.exit_requested() {
                return Ok(Flow::Stop);
            }
            // A switch that changes the session's shape ends the turn; the
            // session is rebuilt lazily when the next question arrives.
            let built = self.built_fingerprint.unwrap_or(before);
            if !outcome.matched.is_empty() && self.state.fingerprint() != built {
                tracing::debug!(model = %self.state.model_key, "session settings changed, rebuild pending");
                if !outcome.question.is_empty() {
                    ui::status(self.state.quiet, "Settings changed, ask again");
                }
                return Ok(self.after_turn());
            }
            outcome.question
        };
        if question.is_empty() {
            return Ok(self.after_turn());
        }

        // ── Direct tool lookup ────────────────────────────────────────────────
        let lookup = match self.tools.match_manual(&question) {
            Some((name, param)) => self.tools.call(name, param).await,
            None => None,
        };
        if let Some((name, output)) = lookup {
            ui::tool_result(&name, &output);
            self.record(&self.config.user.name, &question);
            self.record(&name, &output);
            self.emit(&output).await;
            self.last_answer = Some(output);
            self.apply_tool_requests();
            return Ok(self.after_turn());
        }

        // ── Enriching ─────────────────────────────────────────────────────────
        let (changed, enriched) = self.enrichment.enrich(&question);
        self.record(&self.config.user.name, &question);
        if changed {
            self.record(ENRICHED_SPEAKER, &enriched);
        }

        // ── Model invoke ──────────────────────────────────────────────────────
        if let Err(e) = self.ensure_session() {
            ui::error(&format!("{e:#}"));
            return Ok(self.after_turn());
        }
        self.memory.dedup();
        let Some(answer) = self.ask(&enriched).await else {
            self.apply_tool_requests();
            return Ok(self.after_turn());
        };

        // ── Responding ────────────────────────────────────────────────────────
        self.memory.push("user", &self.config.user.name, &enriched);
        self.memory.push("assistant", &self.config.agent.name, &answer);
        self.record(&self.config.agent.name, &answer);
        self.emit(&answer).await;
        self.last_answer = Some(answer);
        self.apply_tool_requests();
        Ok(self.after_turn())
    }

    /// Apply the session changes tools asked for during this turn.
    fn apply_tool_requests(&mut self) {
        for request in self.tools.take_requests() {
            tracing::debug!(?request, "applying tool request");
            match request {
                StateRequest::EndConversation => self.state.stopped = true,
                StateRequest::ResetChat => self.memory.clear(),
                StateRequest::SwitchModel(key) => match self.state.select_model(&self.config, &key) {
                    Ok(()) => ui::status(self.state.quiet, &format!("Model: {key} ({})", self.state.model_options.model)),
                    Err(e) => ui::error(&e.to_string()),
                },
            }
        }
    }

    async fn read_input(&mut self) -> Result<Option<String>> {
        let ctx = self.io_context();
        let interrupt = Arc::clone(&self.interrupt);
        let provider = self.io.input(&self.state.input_mode)?;
        tokio::select! {
            text = provider.get_text(&ctx) => text,
            _ = interrupt.notified() => Err(Interrupted.into()),
        }
    }

    async fn emit(&mut self, text: &str) {
        let ctx = self.io_context();
        let result = match self.io.output(&self.state.output_mode) {
            Ok(provider) => provider.emit(text, &ctx).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            ui::error(&format!("{e:#}"));
        }
    }

    /// Rebuild the LLM session when its fingerprint changed since the last build.
    fn ensure_session(&mut self) -> Result<()> {
        let fingerprint = self.state.fingerprint();
        if self.session.is_some() && self.built_fingerprint == Some(fingerprint) {
            return Ok(());
        }
        let session = self.factory.build(&self.state, &self.config)?;
        if self.session.is_some() && self.built_prompts != self.state.active_prompts {
            tracing::debug!("prompt set changed, clearing memory");
            self.memory.clear();
        }
        self.session = Some(session);
        self.built_fingerprint = Some(fingerprint);
        self.built_prompts = self.state.active_prompts.clone();
        Ok(())
    }

    /// Ask the model, retrying failures. `None` when the turn produced no answer.
    async fn ask(&self, question: &str) -> Option<String> {
        let session = self.session.as_ref()?;
        let history = self.memory.to_messages();
        let stream = !self.state.quiet && !self.state.tools_enabled;
        let max_tries = self.config.agent.max_tries.max(1);
        let agent = self.config.agent.name.as_str();

        let on_chunk = |chunk: &str| {
            print!("{chunk}");
            let _ = std::io::Write::flush(&mut std::io::stdout());
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            if stream {
                print!("{} ", format!("{agent}:").bold());
            }
            let turn = Turn { history: &history, question, stream, on_chunk: &on_chunk };
            let result = tokio::select! {
                answer = session.invoke(turn) => answer,
                _ = self.interrupt.notified() => Err(Interrupted.into()),
            };
            match result {
                Ok(answer) => {
                    if stream {
                        println!();
                    } else if self.state.quiet {
                        println!("{answer}");
                    } else {
                        println!("{} {answer}", format!("{agent}:").bold());
                    }
                    return Some(answer);
                }
                Err(e) if e.is::<Interrupted>() => {
                    println!();
                    ui::status(self.state.quiet, "Interrupted");
                    return None;
                }
                Err(e) if attempt < max_tries => {
                    if stream {
                        println!();
                    }
                    tracing::warn!(attempt, max_tries, error = %format!("{e:#}"), "model call failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => {
                    if stream {
                        println!();
                    }
                    ui::error(&format!("{e:#}"));
                    return None;
                }
            }
        }
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    fn enqueue_task(&mut self, steps: &[String]) {
        let snapshot = Snapshot {
            model_key: self.state.model_key.clone(),
            tools_enabled: self.state.tools_enabled,
            quiet: self.state.quiet,
        };
        let mut queued: Vec<Pending> = Vec::with_capacity(steps.len() + 2);
        if let Some(quiet) = self.config.phrases.quiet.first() {
            queued.push(Pending::Utterance(quiet.clone()));
        }
        queued.extend(steps.iter().cloned().map(Pending::Utterance));
        queued.push(Pending::Restore(snapshot));
        // Run before anything already waiting.
        for item in queued.into_iter().rev() {
            self.pending.push_front(item);
        }
    }

    fn restore(&mut self, snapshot: Snapshot) -> Result<()> {
        self.state.select_model(&self.config, &snapshot.model_key)?;
        self.state.tools_enabled = snapshot.tools_enabled;
        self.state.quiet = snapshot.quiet;
        Ok(())
    }
}
