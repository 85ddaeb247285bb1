/// Leading-command dispatcher.
///
/// An utterance is consumed token by token from the left. Each token is tried
/// against the command table in priority order; the first entry that knows
/// the token is applied and the next token is tried. The first token that no
/// entry knows ends the command prefix and everything from it onward is the
/// question.
use crate::config::Config;
use crate::error::ConfigError;
use crate::phrases::find_phrase;
use crate::state::SessionState;

/// Input and output keys selected by the `verbal` command.
pub const VERBAL_INPUT: &str = "listen";
pub const VERBAL_OUTPUT: &str = "speak";
/// Input and output key selected by the `text` command.
pub const TEXT_MODE: &str = "text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Exit,
    ClearMemory,
    RunOnce,
    Quiet,
    Verbose,
    VerbalMode,
    TextMode,
    Input,
    Output,
    Model,
    ToolsOff,
    ToolsOn,
}

#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub phrases: Vec<String>,
    pub command: Command,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Remaining text, rejoined with single spaces.
    pub question: String,
    /// Matched phrases in the order they were applied.
    pub matched: Vec<(String, Command)>,
    /// Short human-readable notes about what changed.
    pub notes: Vec<String>,
}

impl DispatchOutcome {
    pub fn exit_requested(&self) -> bool {
        self.matched.iter().any(|(_, c)| *c == Command::Exit)
    }
}

pub struct Dispatcher {
    entries: Vec<CommandEntry>,
}

impl Dispatcher {
    /// Build the priority-ordered table from validated configuration.
    pub fn new(config: &Config) -> Self {
        let phrases = &config.phrases;
        let model_phrases = config
            .models
            .iter()
            .flat_map(|(key, m)| std::iter::once(key.clone()).chain(m.synonyms.iter().cloned()))
            .collect();

        let entries = vec![
            CommandEntry { phrases: phrases.exit.clone(), command: Command::Exit },
            CommandEntry { phrases: phrases.clear_memory.clone(), command: Command::ClearMemory },
            CommandEntry { phrases: phrases.run_once.clone(), command: Command::RunOnce },
            CommandEntry { phrases: phrases.quiet.clone(), command: Command::Quiet },
            CommandEntry { phrases: phrases.verbose.clone(), command: Command::Verbose },
            CommandEntry { phrases: vec!["verbal".into()], command: Command::VerbalMode },
            CommandEntry { phrases: vec![TEXT_MODE.into()], command: Command::TextMode },
            CommandEntry { phrases: config.io_input.keys().cloned().collect(), command: Command::Input },
            CommandEntry { phrases: config.io_output.keys().cloned().collect(), command: Command::Output },
            CommandEntry { phrases: model_phrases, command: Command::Model },
            CommandEntry { phrases: phrases.no_tools.clone(), command: Command::ToolsOff },
            CommandEntry { phrases: phrases.with_tools.clone(), command: Command::ToolsOn },
        ];
        Self { entries }
    }

    /// Consume the command prefix of `utterance`.
    ///
    /// Either every matched command is applied or, on error, none is.
    pub fn dispatch(
        &self,
        utterance: &str,
        state: &mut SessionState,
        config: &Config,
    ) -> Result<DispatchOutcome, ConfigError> {
        let tokens: Vec<&str> = utterance.split_whitespace().collect();
        let mut draft = state.clone();
        let mut outcome = DispatchOutcome::default();
        let mut consumed = 0;

        for token in &tokens {
            let word = token.trim_end_matches(['.', '!']);
            let Some((phrase, command)) = self.lookup(word) else {
                break;
            };
            consumed += 1;
            let note = apply(command, &phrase, &mut draft, config)?;
            tracing::debug!(phrase = %phrase, ?command, "command matched");
            outcome.notes.push(note);
            outcome.matched.push((phrase, command));
            if command == Command::Exit {
                consumed = tokens.len();
                break;
            }
        }

        outcome.question = tokens[consumed..].join(" ");
        *state = draft;
        Ok(outcome)
    }

    fn lookup(&self, word: &str) -> Option<(String, Command)> {
        self.entries.iter().find_map(|entry| {
            find_phrase(word, &entry.phrases, false).map(|p| (p.to_string(), entry.command))
        })
    }
}

fn apply(command: Command, phrase: &str, state: &mut SessionState, config: &Config) -> Result<String, ConfigError> {
    let note = match command {
        Command::Exit => {
            state.stopped = true;
            "Exiting".to_string()
        }
        Command::ClearMemory => {
            state.new_memory = true;
            "Memory cleared".to_string()
        }
        Command::RunOnce => {
            state.stopped = true;
            "Answering once".to_string()
        }
        Command::Quiet => {
            state.quiet = true;
            "Quiet mode".to_string()
        }
        Command::Verbose => {
            state.quiet = false;
            "Verbose mode".to_string()
        }
        Command::VerbalMode => {
            state.set_input_mode(config, VERBAL_INPUT)?;
            state.set_output_mode(config, VERBAL_OUTPUT)?;
            format!("Input: {VERBAL_INPUT}, output: {VERBAL_OUTPUT}")
        }
        Command::TextMode => {
            state.set_input_mode(config, TEXT_MODE)?;
            state.set_output_mode(config, TEXT_MODE)?;
            format!("Input: {TEXT_MODE}, output: {TEXT_MODE}")
        }
        Command::Input => {
            state.set_input_mode(config, phrase)?;
            format!("Input: {phrase}")
        }
        Command::Output => {
            state.set_output_mode(config, phrase)?;
            format!("Output: {phrase}")
        }
        Command::Model => {
            let key = config
                .model_for_phrase(phrase)
                .ok_or_else(|| ConfigError::UnknownModel(phrase.to_string()))?
                .to_string();
            state.select_model(config, &key)?;
            format!("Model: {key} ({})", state.model_options.model)
        }
        Command::ToolsOff => {
            state.tools_enabled = false;
            "Tools disabled".to_string()
        }
        Command::ToolsOn => {
            state.tools_enabled = true;
            "Tools enabled".to_string()
        }
    };
    Ok(note)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> Config {
        let raw = r#"
[agent]
tools_enabled = false

[models.groq]
provider = "groq"
model = "llama3"

[models.gpt]
provider = "openai"
model = "gpt-4o-mini"
synonyms = ["smart"]

[io_input.text]
provider = "text"

[io_input.listen]
provider = "command"
command = ["stt"]

[io_output.text]
provider = "text"

[io_output.speak]
provider = "command"
command = ["tts"]
"#;
        Config::from_toml(raw, PathBuf::from(".")).unwrap()
    }

    fn setup() -> (Config, Dispatcher, SessionState) {
        let config = config();
        let dispatcher = Dispatcher::new(&config);
        let state = SessionState::new(&config).unwrap();
        (config, dispatcher, state)
    }

    fn phrases(outcome: &DispatchOutcome) -> Vec<&str> {
        outcome.matched.iter().map(|(p, _)| p.as_str()).collect()
    }

    #[test]
    fn test_quiet_and_model_prefix() {
        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("quiet groq tell me a joke", &mut state, &config).unwrap();
        assert_eq!(out.question, "tell me a joke");
        assert_eq!(phrases(&out), vec!["quiet", "groq"]);
        assert!(state.quiet);
        assert_eq!(state.model_key, "groq");
    }

    #[test]
    fn test_exit_stops_with_empty_question() {
        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("Exit. right now", &mut state, &config).unwrap();
        assert!(state.stopped);
        assert!(out.exit_requested());
        assert_eq!(out.question, "");
    }

    #[test]
    fn test_only_contiguous_prefix_is_consumed() {
        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("quiet hello quiet", &mut state, &config).unwrap();
        assert_eq!(out.question, "hello quiet");
        assert_eq!(phrases(&out), vec!["quiet"]);

        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("hello quiet", &mut state, &config).unwrap();
        assert_eq!(out.question, "hello quiet");
        assert!(out.matched.is_empty());
        assert!(!state.quiet);
    }

    #[test]
    fn test_mid_sentence_exit_is_question_text() {
        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("what does the word exit mean", &mut state, &config).unwrap();
        assert!(!state.stopped);
        assert_eq!(out.question, "what does the word exit mean");
    }

    #[test]
    fn test_all_command_utterance_leaves_empty_question() {
        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("forget once verbose agent", &mut state, &config).unwrap();
        assert_eq!(out.question, "");
        assert_eq!(phrases(&out), vec!["forget", "once", "verbose", "agent"]);
        assert!(state.new_memory);
        assert!(state.stopped);
        assert!(state.tools_enabled);
    }

    #[test]
    fn test_empty_utterance() {
        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("   ", &mut state, &config).unwrap();
        assert_eq!(out, DispatchOutcome::default());
    }

    #[test]
    fn test_synonym_selects_model_key() {
        let (config, dispatcher, mut state) = setup();
        let out = dispatcher.dispatch("smart! explain monads", &mut state, &config).unwrap();
        assert_eq!(state.model_key, "gpt");
        assert_eq!(out.question, "explain monads");
        assert_eq!(out.matched, vec![("smart".to_string(), Command::Model)]);
    }

    #[test]
    fn test_verbal_and_text_modes() {
        let (config, dispatcher, mut state) = setup();
        dispatcher.dispatch("verbal", &mut state, &config).unwrap();
        assert_eq!((state.input_mode.as_str(), state.output_mode.as_str()), ("listen", "speak"));
        let out = dispatcher.dispatch("text", &mut state, &config).unwrap();
        assert_eq!(out.matched[0].1, Command::TextMode);
        assert_eq!((state.input_mode.as_str(), state.output_mode.as_str()), ("text", "text"));
    }

    #[test]
    fn test_io_keys_switch_one_side() {
        let (config, dispatcher, mut state) = setup();
        dispatcher.dispatch("speak hello", &mut state, &config).unwrap();
        assert_eq!(state.input_mode, "text");
        assert_eq!(state.output_mode, "speak");
    }

    #[test]
    fn test_failed_command_is_all_or_nothing() {
        let raw = r#"
[models.groq]
provider = "groq"
model = "llama3"
"#;
        let config = Config::from_toml(raw, PathBuf::from(".")).unwrap();
        let dispatcher = Dispatcher::new(&config);
        let mut state = SessionState::new(&config).unwrap();
        // "verbal" needs listen/speak methods which are not configured.
        let err = dispatcher.dispatch("quiet verbal hi", &mut state, &config).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownInput(_)));
        assert!(!state.quiet);
    }

    #[test]
    fn test_priority_order_decides_shared_phrase() {
        let raw = r#"
[phrases]
quiet = ["shh"]
no_tools = ["shh"]

[models.groq]
provider = "groq"
model = "llama3"
"#;
        let config = Config::from_toml(raw, PathBuf::from(".")).unwrap();
        let dispatcher = Dispatcher::new(&config);
        let mut state = SessionState::new(&config).unwrap();
        let out = dispatcher.dispatch("shh", &mut state, &config).unwrap();
        assert_eq!(out.matched, vec![("shh".to_string(), Command::Quiet)]);
    }

    #[test]
    fn test_tools_off_and_on() {
        let (config, dispatcher, mut state) = setup();
        dispatcher.dispatch("tools", &mut state, &config).unwrap();
        assert!(state.tools_enabled);
        dispatcher.dispatch("llm", &mut state, &config).unwrap();
        assert!(!state.tools_enabled);
    }
}
