use anyhow::Result;
use async_trait::async_trait;

use super::Tool;
use crate::config::Config;

/// Lists the model keys and synonyms the user can switch to.
pub struct ModelsTool {
    names: Vec<String>,
}

impl ModelsTool {
    pub fn from_config(config: &Config) -> Self {
        let mut names: Vec<String> = config.models.keys().cloned().collect();
        names.extend(config.models.values().flat_map(|m| m.synonyms.iter().cloned()));
        Self { names }
    }
}

#[async_trait]
impl Tool for ModelsTool {
    fn name(&self) -> &'static str {
        "get_models"
    }

    fn description(&self) -> &'static str {
        "Returns all model names the user can switch to by saying the name. Responds with a JSON array."
    }

    async fn run(&self, _param: Option<&str>) -> Result<String> {
        Ok(serde_json::to_string(&self.names)?)
    }
}
