/// Session state: everything the dispatcher can switch and the LLM session
/// factory reads.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::config::{Config, ModelConfig};
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub input_mode: String,
    pub output_mode: String,
    pub model_key: String,
    pub model_options: ModelConfig,
    pub tools_enabled: bool,
    pub quiet: bool,
    /// Stop after the current turn (run-once) or immediately (exit).
    pub stopped: bool,
    pub hotkey_enabled: bool,
    /// Conversation memory should be cleared before the next model call.
    pub new_memory: bool,
    pub temperature: f64,
    pub agent_type: String,
    pub active_prompts: Vec<PathBuf>,
}

impl SessionState {
    /// First declared model, input and output.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let model_key = config
            .models
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| ConfigError::Invalid("no models configured".into()))?;
        let input_mode = config
            .io_input
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| ConfigError::Invalid("no input methods configured".into()))?;
        let output_mode = config
            .io_output
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| ConfigError::Invalid("no output methods configured".into()))?;

        let mut state = Self {
            input_mode,
            output_mode,
            model_options: config.models[&model_key].clone(),
            model_key: model_key.clone(),
            tools_enabled: config.agent.tools_enabled,
            quiet: false,
            stopped: false,
            hotkey_enabled: true,
            new_memory: false,
            temperature: config.agent.temperature,
            agent_type: config.agent.agent_type.clone(),
            active_prompts: Vec::new(),
        };
        state.select_model(config, &model_key)?;
        Ok(state)
    }

    /// Switch model and reset the settings derived from it.
    pub fn select_model(&mut self, config: &Config, key: &str) -> Result<(), ConfigError> {
        let model = config
            .models
            .get(key)
            .ok_or_else(|| ConfigError::UnknownModel(key.to_string()))?;

        let prompt_names = model.prompts.as_ref().unwrap_or(&config.agent.prompts);
        let active_prompts = prompt_names
            .iter()
            .map(|name| config.resolve_prompt(name))
            .collect::<Result<Vec<_>, _>>()?;

        self.model_key = key.to_string();
        self.model_options = model.clone();
        self.temperature = model.temperature.unwrap_or(config.agent.temperature);
        self.tools_enabled = model.tools_enabled.unwrap_or(config.agent.tools_enabled);
        self.agent_type = model
            .agent_type
            .clone()
            .unwrap_or_else(|| config.agent.agent_type.clone());
        self.active_prompts = active_prompts;
        Ok(())
    }

    pub fn set_input_mode(&mut self, config: &Config, key: &str) -> Result<(), ConfigError> {
        if !config.io_input.contains_key(key) {
            return Err(ConfigError::UnknownInput(key.to_string()));
        }
        self.input_mode = key.to_string();
        Ok(())
    }

    pub fn set_output_mode(&mut self, config: &Config, key: &str) -> Result<(), ConfigError> {
        if !config.io_output.contains_key(key) {
            return Err(ConfigError::UnknownOutput(key.to_string()));
        }
        self.output_mode = key.to_string();
        Ok(())
    }

    /// Hash of everything that shapes the LLM session. Input/output modes and
    /// the transient `stopped`/`new_memory` flags are left out.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.model_key.hash(&mut hasher);
        self.model_options.provider.hash(&mut hasher);
        self.model_options.model.hash(&mut hasher);
        self.model_options.base_url.hash(&mut hasher);
        self.temperature.to_bits().hash(&mut hasher);
        self.tools_enabled.hash(&mut hasher);
        self.agent_type.hash(&mut hasher);
        self.active_prompts.hash(&mut hasher);
        self.quiet.hash(&mut hasher);
        self.hotkey_enabled.hash(&mut hasher);
        hasher.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config() -> Config {
        let raw = r#"
[agent]
temperature = 0.1
tools_enabled = false

[models.groq]
provider = "groq"
model = "llama3"

[models.gpt]
provider = "openai"
model = "gpt-4o-mini"
temperature = 0.7
tools_enabled = true
agent_type = "react"

[io_input.text]
provider = "text"

[io_input.listen]
provider = "command"
command = ["stt"]

[io_output.text]
provider = "text"
"#;
        Config::from_toml(raw, PathBuf::from(".")).unwrap()
    }

    #[test]
    fn test_new_uses_first_declared_entries() {
        let state = SessionState::new(&config()).unwrap();
        assert_eq!(state.model_key, "groq");
        assert_eq!(state.input_mode, "text");
        assert_eq!(state.output_mode, "text");
        assert_eq!(state.temperature, 0.1);
        assert!(!state.tools_enabled);
    }

    #[test]
    fn test_select_model_applies_overrides() {
        let config = config();
        let mut state = SessionState::new(&config).unwrap();
        state.select_model(&config, "gpt").unwrap();
        assert_eq!(state.model_options.model, "gpt-4o-mini");
        assert_eq!(state.temperature, 0.7);
        assert!(state.tools_enabled);
        assert_eq!(state.agent_type, "react");

        state.select_model(&config, "groq").unwrap();
        assert_eq!(state.temperature, 0.1);
        assert!(!state.tools_enabled);
        assert_eq!(state.agent_type, "conversational");
    }

    #[test]
    fn test_unknown_model_leaves_state_alone() {
        let config = config();
        let mut state = SessionState::new(&config).unwrap();
        let err = state.select_model(&config, "nope").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModel(_)));
        assert_eq!(state.model_key, "groq");
    }

    #[test]
    fn test_reselecting_same_model_keeps_fingerprint() {
        let config = config();
        let mut state = SessionState::new(&config).unwrap();
        let before = state.fingerprint();
        state.select_model(&config, "groq").unwrap();
        assert_eq!(state.fingerprint(), before);
    }

    #[test]
    fn test_fingerprint_tracks_session_shape_only() {
        let config = config();
        let mut state = SessionState::new(&config).unwrap();
        let before = state.fingerprint();

        state.set_input_mode(&config, "listen").unwrap();
        state.stopped = true;
        state.new_memory = true;
        assert_eq!(state.fingerprint(), before);

        state.quiet = true;
        assert_ne!(state.fingerprint(), before);
        state.quiet = false;
        state.tools_enabled = true;
        assert_ne!(state.fingerprint(), before);
    }

    #[test]
    fn test_set_io_modes_validate_keys() {
        let config = config();
        let mut state = SessionState::new(&config).unwrap();
        assert!(matches!(state.set_input_mode(&config, "speak"), Err(ConfigError::UnknownInput(_))));
        assert!(matches!(state.set_output_mode(&config, "speak"), Err(ConfigError::UnknownOutput(_))));
        assert_eq!(state.output_mode, "text");
    }
}
