use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use super::{StateRequest, StateRequests, Tool};
use crate::config::Config;

pub struct EndConversationTool {
    requests: StateRequests,
}

impl EndConversationTool {
    pub fn new(requests: StateRequests) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl Tool for EndConversationTool {
    fn name(&self) -> &'static str {
        "end_conversation"
    }

    fn description(&self) -> &'static str {
        "Use this tool when the user says things like 'Please exit.' or 'Stop the conversation.'"
    }

    async fn run(&self, _param: Option<&str>) -> Result<String> {
        self.requests.push(StateRequest::EndConversation);
        Ok("Exit".to_string())
    }
}

/// Switches to a configured model, by key or synonym.
pub struct SwitchModelTool {
    /// (phrase, model key), keys before synonyms.
    phrases: Vec<(String, String)>,
    requests: StateRequests,
}

impl SwitchModelTool {
    pub fn from_config(config: &Config, requests: StateRequests) -> Self {
        let mut phrases: Vec<(String, String)> =
            config.models.keys().map(|k| (k.to_lowercase(), k.clone())).collect();
        for (key, model) in &config.models {
            phrases.extend(model.synonyms.iter().map(|s| (s.to_lowercase(), key.clone())));
        }
        Self { phrases, requests }
    }
}

#[async_trait]
impl Tool for SwitchModelTool {
    fn name(&self) -> &'static str {
        "switch_model"
    }

    fn description(&self) -> &'static str {
        "Switch the conversation to a different language model. Use it for phrases like \
         'change model to' or 'switch model'. Available names come from get_models."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "model": { "type": "string", "description": "model name or synonym" }
            },
            "required": ["model"]
        })
    }

    async fn run(&self, param: Option<&str>) -> Result<String> {
        let wanted = param.unwrap_or("").trim().to_lowercase();
        match self.phrases.iter().find(|(phrase, _)| *phrase == wanted) {
            Some((_, key)) => {
                self.requests.push(StateRequest::SwitchModel(key.clone()));
                Ok(format!("Changed to {key}"))
            }
            None => Ok(format!("Not changed. Unknown model: '{wanted}'")),
        }
    }
}

pub struct ResetChatTool {
    requests: StateRequests,
}

impl ResetChatTool {
    pub fn new(requests: StateRequests) -> Self {
        Self { requests }
    }
}

#[async_trait]
impl Tool for ResetChatTool {
    fn name(&self) -> &'static str {
        "reset_chat"
    }

    fn description(&self) -> &'static str {
        "Use this tool when the user says 'forget this conversation', 'let's change the topic' or similar."
    }

    async fn run(&self, _param: Option<&str>) -> Result<String> {
        self.requests.push(StateRequest::ResetChat);
        Ok("Cleared this conversation.".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config() -> Config {
        let raw = r#"
[models.groq]
provider = "groq"
model = "llama3"

[models.gpt]
provider = "openai"
model = "gpt-4o-mini"
synonyms = ["Smart"]
"#;
        Config::from_toml(raw, PathBuf::from(".")).unwrap()
    }

    #[tokio::test]
    async fn test_switch_model_resolves_synonym() {
        let requests = StateRequests::default();
        let tool = SwitchModelTool::from_config(&config(), requests.clone());
        assert_eq!(tool.run(Some("smart")).await.unwrap(), "Changed to gpt");
        assert_eq!(requests.drain(), vec![StateRequest::SwitchModel("gpt".into())]);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_model_requests_nothing() {
        let requests = StateRequests::default();
        let tool = SwitchModelTool::from_config(&config(), requests.clone());
        let out = tool.run(Some("claude")).await.unwrap();
        assert!(out.starts_with("Not changed"));
        assert!(tool.run(None).await.unwrap().starts_with("Not changed"));
        assert!(requests.drain().is_empty());
    }

    #[tokio::test]
    async fn test_end_and_reset_queue_in_call_order() {
        let requests = StateRequests::default();
        ResetChatTool::new(requests.clone()).run(None).await.unwrap();
        EndConversationTool::new(requests.clone()).run(None).await.unwrap();
        assert_eq!(requests.drain(), vec![StateRequest::ResetChat, StateRequest::EndConversation]);
        assert!(requests.drain().is_empty());
    }
}
