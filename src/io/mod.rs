/// Input and output methods, keyed by name as configured in `[io_input]`
/// and `[io_output]`.
pub mod input;
pub mod output;

use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;

use crate::config::{Config, IoProvider};
use crate::error::ConfigError;

pub use input::{CommandInput, TextInput};
pub use output::{CommandOutput, TextOutput};

/// Per-turn view of the session that providers may consult.
#[derive(Debug, Clone)]
pub struct IoContext {
    pub quiet: bool,
    pub hotkey_enabled: bool,
    pub hotkey_presses: u32,
    pub user_name: String,
}

#[async_trait]
pub trait InputProvider: Send {
    /// The next utterance, or `None` at end of input.
    async fn get_text(&mut self, ctx: &IoContext) -> Result<Option<String>>;
}

#[async_trait]
pub trait OutputProvider: Send {
    async fn emit(&mut self, text: &str, ctx: &IoContext) -> Result<()>;
}

pub struct IoRegistry {
    inputs: IndexMap<String, Box<dyn InputProvider>>,
    outputs: IndexMap<String, Box<dyn OutputProvider>>,
}

impl IoRegistry {
    pub fn new(
        inputs: IndexMap<String, Box<dyn InputProvider>>,
        outputs: IndexMap<String, Box<dyn OutputProvider>>,
    ) -> Self {
        Self { inputs, outputs }
    }

    pub fn from_config(config: &Config) -> Self {
        let inputs = config
            .io_input
            .iter()
            .map(|(key, io)| {
                let provider: Box<dyn InputProvider> = match io.provider {
                    IoProvider::Text => Box::new(TextInput::new()),
                    IoProvider::Command => Box::new(CommandInput::new(io.command.clone())),
                };
                (key.clone(), provider)
            })
            .collect();
        let outputs = config
            .io_output
            .iter()
            .map(|(key, io)| {
                let provider: Box<dyn OutputProvider> = match io.provider {
                    IoProvider::Text => Box::new(TextOutput),
                    IoProvider::Command => Box::new(CommandOutput::new(io.command.clone())),
                };
                (key.clone(), provider)
            })
            .collect();
        Self { inputs, outputs }
    }

    pub fn input(&mut self, key: &str) -> Result<&mut Box<dyn InputProvider>, ConfigError> {
        self.inputs
            .get_mut(key)
            .ok_or_else(|| ConfigError::UnknownInput(key.to_string()))
    }

    pub fn output(&mut self, key: &str) -> Result<&mut Box<dyn OutputProvider>, ConfigError> {
        self.outputs
            .get_mut(key)
            .ok_or_else(|| ConfigError::UnknownOutput(key.to_string()))
    }
}
