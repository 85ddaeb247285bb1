use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// ── User ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default = "default_user_name")]
    pub name: String,
    /// Free-form location, used by the weather tool and prompt replacements.
    #[serde(default)]
    pub location: String,
    /// Label shown by the time enricher. Falls back to the local UTC offset.
    #[serde(default)]
    pub timezone: Option<String>,
}

fn default_user_name() -> String {
    "Human".to_string()
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            name: default_user_name(),
            location: String::new(),
            timezone: None,
        }
    }
}

// ── Agent defaults ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Prompt names (keys of `[prompts]`) used when a model declares none.
    #[serde(default)]
    pub prompts: Vec<String>,
    #[serde(default)]
    pub temperature: f64,
    /// Attempts per model invocation before the turn gives up.
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default = "default_sleep_seconds")]
    pub sleep_seconds_between_tries: f64,
    #[serde(default = "default_agent_type")]
    pub agent_type: String,
    /// Tool-call round trips allowed per question in agent mode.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_true")]
    pub tools_enabled: bool,
    /// Consecutive hotkey taps that start listening / stop playback.
    #[serde(default = "default_hotkey_presses")]
    pub hotkey_presses: u32,
}

fn default_agent_name() -> String {
    "Assistant".to_string()
}

fn default_max_tries() -> u32 {
    3
}

fn default_sleep_seconds() -> f64 {
    2.0
}

fn default_agent_type() -> String {
    "conversational".to_string()
}

fn default_max_iterations() -> usize {
    4
}

fn default_hotkey_presses() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            prompts: Vec::new(),
            temperature: 0.0,
            max_tries: default_max_tries(),
            sleep_seconds_between_tries: default_sleep_seconds(),
            agent_type: default_agent_type(),
            max_iterations: default_max_iterations(),
            tools_enabled: true,
            hotkey_presses: default_hotkey_presses(),
        }
    }
}

// ── Command phrases ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhrasesConfig {
    #[serde(default = "default_exit")]
    pub exit: Vec<String>,
    #[serde(default = "default_clear_memory")]
    pub clear_memory: Vec<String>,
    #[serde(default = "default_run_once")]
    pub run_once: Vec<String>,
    #[serde(default = "default_quiet")]
    pub quiet: Vec<String>,
    #[serde(default = "default_verbose")]
    pub verbose: Vec<String>,
    #[serde(default = "default_with_tools")]
    pub with_tools: Vec<String>,
    #[serde(default = "default_no_tools")]
    pub no_tools: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_exit() -> Vec<String> {
    words(&["exit", "quit", "bye", "goodbye"])
}

fn default_clear_memory() -> Vec<String> {
    words(&["forget", "reset"])
}

fn default_run_once() -> Vec<String> {
    words(&["once"])
}

fn default_quiet() -> Vec<String> {
    words(&["quiet", "silent"])
}

fn default_verbose() -> Vec<String> {
    words(&["verbose", "loud"])
}

fn default_with_tools() -> Vec<String> {
    words(&["agent", "tools"])
}

fn default_no_tools() -> Vec<String> {
    words(&["llm", "simple"])
}

impl Default for PhrasesConfig {
    fn default() -> Self {
        Self {
            exit: default_exit(),
            clear_memory: default_clear_memory(),
            run_once: default_run_once(),
            quiet: default_quiet(),
            verbose: default_verbose(),
            with_tools: default_with_tools(),
            no_tools: default_no_tools(),
        }
    }
}

// ── Models ────────────────────────────────────────────────────────────────────

/// OpenAI-compatible backends the chat client knows how to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Openai,
    Groq,
    Mistral,
    Ollama,
    LmStudio,
    OpenaiCustom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Groq => "groq",
            Provider::Mistral => "mistral",
            Provider::Ollama => "ollama",
            Provider::LmStudio => "lm_studio",
            Provider::OpenaiCustom => "openai_custom",
        }
    }

    /// Endpoint root; the client appends `/v1/chat/completions`.
    pub fn default_base_url(&self) -> Option<&'static str> {
        match self {
            Provider::Openai => Some("https://api.openai.com"),
            Provider::Groq => Some("https://api.groq.com/openai"),
            Provider::Mistral => Some("https://api.mistral.ai"),
            Provider::Ollama => Some("http://localhost:11434"),
            Provider::LmStudio => Some("http://localhost:1234"),
            Provider::OpenaiCustom => None,
        }
    }

    /// Environment variable holding the API key, if the provider needs one.
    pub fn api_key_var(&self) -> Option<&'static str> {
        match self {
            Provider::Openai => Some("OPENAI_API_KEY"),
            Provider::Groq => Some("GROQ_API_KEY"),
            Provider::Mistral => Some("MISTRAL_API_KEY"),
            Provider::OpenaiCustom => Some("CUSTOM_PROVIDER_API_KEY"),
            Provider::Ollama | Provider::LmStudio => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: Provider,
    pub model: String,
    pub temperature: Option<f64>,
    pub tools_enabled: Option<bool>,
    pub agent_type: Option<String>,
    pub prompts: Option<Vec<String>>,
    /// Overrides the provider's default endpoint root.
    pub base_url: Option<String>,
    /// Extra phrases that select this model.
    #[serde(default)]
    pub synonyms: Vec<String>,
}

// ── Input / output methods ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IoProvider {
    /// Console line input / console echo.
    Text,
    /// External program (speech-to-text or text-to-speech).
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoConfig {
    pub provider: IoProvider,
    /// argv for `command` providers.
    #[serde(default)]
    pub command: Vec<String>,
}

fn default_io() -> IndexMap<String, IoConfig> {
    let mut map = IndexMap::new();
    map.insert(
        "text".to_string(),
        IoConfig { provider: IoProvider::Text, command: Vec::new() },
    );
    map
}

// ── Transcript / enrichers / tools ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_transcript_file")]
    pub file: PathBuf,
    /// Soft-wrap column for transcript lines.
    #[serde(default = "default_transcript_width")]
    pub width: usize,
}

fn default_transcript_file() -> PathBuf {
    PathBuf::from("history.txt")
}

fn default_transcript_width() -> usize {
    110
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: default_transcript_file(),
            width: default_transcript_width(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnricherToggles {
    #[serde(default = "default_true")]
    pub clipboard: bool,
    #[serde(default = "default_true")]
    pub time: bool,
    #[serde(default = "default_true")]
    pub file: bool,
}

impl Default for EnricherToggles {
    fn default() -> Self {
        Self { clipboard: true, time: true, file: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolToggles {
    #[serde(default = "default_true")]
    pub time: bool,
    #[serde(default = "default_true")]
    pub current_date: bool,
    #[serde(default = "default_true")]
    pub current_datetime: bool,
    #[serde(default = "default_true")]
    pub weather: bool,
    #[serde(default = "default_true")]
    pub get_models: bool,
    #[serde(default = "default_true")]
    pub switch_model: bool,
    #[serde(default = "default_true")]
    pub reset_chat: bool,
    #[serde(default = "default_true")]
    pub end_conversation: bool,
}

impl Default for ToolToggles {
    fn default() -> Self {
        Self {
            time: true,
            current_date: true,
            current_datetime: true,
            weather: true,
            get_models: true,
            switch_model: true,
            reset_chat: true,
            end_conversation: true,
        }
    }
}

// ── Config file ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub phrases: PhrasesConfig,
    /// Declaration order matters: the first model is the startup default.
    #[serde(default)]
    pub models: IndexMap<String, ModelConfig>,
    #[serde(default = "default_io")]
    pub io_input: IndexMap<String, IoConfig>,
    #[serde(default = "default_io")]
    pub io_output: IndexMap<String, IoConfig>,
    /// Prompt name → file path (relative paths resolve against the config dir).
    #[serde(default)]
    pub prompts: IndexMap<String, PathBuf>,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub enrichers: EnricherToggles,
    #[serde(default)]
    pub tools: ToolToggles,
    /// Task name → utterances run in order.
    #[serde(default)]
    pub tasks: IndexMap<String, Vec<String>>,
    /// Directory of the file this config was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Config {
    /// Load and validate the config at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {}", path.display()))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let config = Self::from_toml(&raw, base_dir)
            .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn from_toml(raw: &str, base_dir: PathBuf) -> Result<Self> {
        let mut config: Config = toml::from_str(raw)?;
        config.base_dir = base_dir;
        Ok(config)
    }

    /// Write a starter config file to disk (only if it doesn't exist).
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG_TOML)?;
        Ok(())
    }

    /// Everything that must hold before the conversation loop starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.models.is_empty() {
            return Err(ConfigError::Invalid("at least one [models.<name>] entry is required".into()));
        }
        if self.io_input.is_empty() {
            return Err(ConfigError::Invalid("[io_input] must define at least one method".into()));
        }
        if self.io_output.is_empty() {
            return Err(ConfigError::Invalid("[io_output] must define at least one method".into()));
        }
        if self.agent.max_tries == 0 {
            return Err(ConfigError::Invalid("agent.max_tries must be at least 1".into()));
        }
        let sleep = self.agent.sleep_seconds_between_tries;
        if !sleep.is_finite() || sleep < 0.0 {
            return Err(ConfigError::Invalid(
                "agent.sleep_seconds_between_tries must be a finite, non-negative number".into(),
            ));
        }

        for (key, io) in self.io_input.iter().chain(self.io_output.iter()) {
            if io.provider == IoProvider::Command && io.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "io method '{key}' uses the command provider but has no command"
                )));
            }
        }

        for name in &self.agent.prompts {
            self.resolve_prompt(name)?;
        }
        for (key, model) in &self.models {
            if model.model.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("model '{key}' has an empty model name")));
            }
            for name in model.prompts.iter().flatten() {
                self.resolve_prompt(name)?;
            }
        }

        let keys = self
            .models
            .keys()
            .chain(self.models.values().flat_map(|m| m.synonyms.iter()))
            .chain(self.io_input.keys())
            .chain(self.io_output.keys());
        for key in keys {
            if key.to_lowercase() != *key {
                tracing::warn!(key = %key, "command keys are matched against lowercased input; this key can never match");
            }
        }
        Ok(())
    }

    /// Resolve a prompt name to an existing file path.
    pub fn resolve_prompt(&self, name: &str) -> Result<PathBuf, ConfigError> {
        let file = self
            .prompts
            .get(name)
            .ok_or_else(|| ConfigError::UndefinedPrompt(name.to_string()))?;
        let path = if file.is_absolute() {
            file.clone()
        } else {
            self.base_dir.join(file)
        };
        if !path.is_file() {
            return Err(ConfigError::MissingPromptFile {
                name: name.to_string(),
                path: path.display().to_string(),
            });
        }
        Ok(path)
    }

    /// Model key selected by `phrase`: a key itself or one of its synonyms.
    pub fn model_for_phrase(&self, phrase: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|(key, model)| *key == phrase || model.synonyms.iter().any(|s| s == phrase))
            .map(|(key, _)| key.as_str())
    }

    pub fn transcript_path(&self) -> Option<PathBuf> {
        if !self.transcript.enabled {
            return None;
        }
        let file = &self.transcript.file;
        Some(if file.is_absolute() { file.clone() } else { self.base_dir.join(file) })
    }

    /// Timezone label: configured name, else the local UTC offset.
    pub fn timezone_label(&self) -> String {
        match &self.user.timezone {
            Some(tz) if !tz.trim().is_empty() => tz.clone(),
            _ => chrono::Local::now().format("%:z").to_string(),
        }
    }

    /// `{placeholder}` substitutions applied to prompt file text.
    pub fn prompt_replacements(&self) -> Vec<(&'static str, String)> {
        let now = chrono::Local::now();
        vec![
            ("agent_name", self.agent.name.clone()),
            ("user_name", self.user.name.clone()),
            ("date", now.format("%Y-%m-%d").to_string()),
            ("time", now.format("%H:%M:%S").to_string()),
            ("timezone", self.timezone_label()),
            ("location", self.user.location.clone()),
        ]
    }
}

// ── Paths ─────────────────────────────────────────────────────────────────────

pub fn config_path() -> PathBuf {
    dirs_config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("parlance")
        .join("config.toml")
}

fn dirs_config_dir() -> Option<PathBuf> {
    // XDG_CONFIG_HOME or ~/.config on Linux/macOS
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join(".config"))
        })
}

// ── Default config template written by --init ─────────────────────────────────

const DEFAULT_CONFIG_TOML: &str = r#"# parlance configuration
# Run `parlance --init` to regenerate this file.

[user]
name     = "Human"
location = "Berlin, Germany"
# timezone = "Europe/Berlin"

[agent]
name        = "Assistant"
prompts     = []
temperature = 0.0
max_tries   = 3
sleep_seconds_between_tries = 2
tools_enabled  = false
max_iterations = 4
hotkey_presses = 2

# Leading words that act as commands. Keep them lowercase.
[phrases]
exit         = ["exit", "quit", "bye", "goodbye"]
clear_memory = ["forget", "reset"]
run_once     = ["once"]
quiet        = ["quiet", "silent"]
verbose      = ["verbose", "loud"]
with_tools   = ["agent", "tools"]
no_tools     = ["llm", "simple"]

# ── Models (the first one is the default) ────────────────────────────────────
# The model key doubles as a command: typing "groq tell me a joke" switches model.
[models.local]
provider = "ollama"
model    = "qwen3:8b"

# [models.groq]
# provider = "groq"            # needs GROQ_API_KEY
# model    = "llama-3.3-70b-versatile"
# temperature = 0.3
# synonyms = ["fast"]

# [models.gpt]
# provider = "openai"          # needs OPENAI_API_KEY
# model    = "gpt-4o-mini"
# tools_enabled = true

# [models.custom]
# provider = "openai_custom"   # needs CUSTOM_PROVIDER_API_KEY
# model    = "my-model"
# base_url = "https://example.com/api"

# ── Input / output methods (the first one is the default) ────────────────────
[io_input.text]
provider = "text"

# [io_input.listen]
# provider = "command"
# command  = ["my-speech-to-text"]

[io_output.text]
provider = "text"

# [io_output.speak]
# provider = "command"
# command  = ["espeak"]

# ── Prompt files ─────────────────────────────────────────────────────────────
# Placeholders: {agent_name} {user_name} {date} {time} {timezone} {location}
[prompts]
# default = "prompts/default.md"

[transcript]
enabled = false
file    = "history.txt"
width   = 110

[enrichers]
clipboard = true
time      = true
file      = true

[tools]
time             = true
current_date     = true
current_datetime = true
weather          = true
get_models       = true
switch_model     = true
reset_chat       = true
end_conversation = true

[tasks]
# morning = ["weather today", "what day is it"]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[models.groq]
provider = "groq"
model = "llama3"

[models.local]
provider = "ollama"
model = "qwen3:8b"
synonyms = ["offline"]
"#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_toml(MINIMAL, PathBuf::from(".")).unwrap();
        assert_eq!(config.user.name, "Human");
        assert_eq!(config.agent.max_tries, 3);
        assert_eq!(config.phrases.exit[0], "exit");
        assert_eq!(config.io_input.keys().next().map(String::as_str), Some("text"));
        assert_eq!(config.io_output.keys().next().map(String::as_str), Some("text"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_models_keep_declaration_order() {
        let config = Config::from_toml(MINIMAL, PathBuf::from(".")).unwrap();
        let keys: Vec<&str> = config.models.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["groq", "local"]);
    }

    #[test]
    fn test_model_for_phrase_resolves_synonyms() {
        let config = Config::from_toml(MINIMAL, PathBuf::from(".")).unwrap();
        assert_eq!(config.model_for_phrase("local"), Some("local"));
        assert_eq!(config.model_for_phrase("offline"), Some("local"));
        assert_eq!(config.model_for_phrase("gpt"), None);
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let raw = "[models.x]\nprovider = \"nope\"\nmodel = \"m\"\n";
        assert!(Config::from_toml(raw, PathBuf::from(".")).is_err());
    }

    #[test]
    fn test_validate_requires_models() {
        let config = Config::from_toml("", PathBuf::from(".")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_undefined_prompt() {
        let raw = format!("[agent]\nprompts = [\"missing\"]\n{MINIMAL}");
        let config = Config::from_toml(&raw, PathBuf::from(".")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::UndefinedPrompt(name)) if name == "missing"));
    }

    #[test]
    fn test_validate_rejects_missing_prompt_file() {
        let dir = tempfile::tempdir().unwrap();
        let raw = format!("[agent]\nprompts = [\"p\"]\n[prompts]\np = \"nope.md\"\n{MINIMAL}");
        let config = Config::from_toml(&raw, dir.path().to_path_buf()).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::MissingPromptFile { .. })));
    }

    #[test]
    fn test_prompt_resolves_relative_to_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("p.md"), "hello {user_name}").unwrap();
        let raw = format!("[agent]\nprompts = [\"p\"]\n[prompts]\np = \"p.md\"\n{MINIMAL}");
        let config = Config::from_toml(&raw, dir.path().to_path_buf()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.resolve_prompt("p").unwrap(), dir.path().join("p.md"));
    }

    #[test]
    fn test_validate_rejects_zero_tries() {
        let raw = format!("[agent]\nmax_tries = 0\n{MINIMAL}");
        let config = Config::from_toml(&raw, PathBuf::from(".")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_unbounded_retry_sleep() {
        for value in ["inf", "nan", "-1.0"] {
            let raw = format!("[agent]\nsleep_seconds_between_tries = {value}\n{MINIMAL}");
            let config = Config::from_toml(&raw, PathBuf::from(".")).unwrap();
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))), "{value}");
        }
    }

    #[test]
    fn test_command_provider_needs_argv() {
        let raw = format!("[io_output.speak]\nprovider = \"command\"\n{MINIMAL}");
        let config = Config::from_toml(&raw, PathBuf::from(".")).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_default_template_parses_and_validates() {
        let config = Config::from_toml(DEFAULT_CONFIG_TOML, PathBuf::from(".")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.models.keys().next().map(String::as_str), Some("local"));
    }
}
