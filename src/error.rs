/// Typed errors that callers need to tell apart.
///
/// Everything else travels as `anyhow::Error`.

/// Configuration errors. Fatal before the loop starts; inside a turn they
/// abort the turn without touching session state.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("model '{0}' is not defined in [models]")]
    UnknownModel(String),

    #[error("input method '{0}' is not defined in [io_input]")]
    UnknownInput(String),

    #[error("output method '{0}' is not defined in [io_output]")]
    UnknownOutput(String),

    #[error("prompt '{0}' is not defined in [prompts]")]
    UndefinedPrompt(String),

    #[error("prompt file for '{name}' not found: {path}")]
    MissingPromptFile { name: String, path: String },

    #[error("provider '{provider}' needs {var} to be set")]
    MissingApiKey { provider: String, var: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The user cancelled the current wait (Ctrl-C, hotkey). Never retried.
#[derive(Debug, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;
