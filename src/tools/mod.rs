pub mod clock;
pub mod models;
pub mod session;
pub mod weather;

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::client;
use crate::config::Config;

/// A deterministic lookup the agent (or the user, by name) can call.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// JSON schema of the arguments object sent by the model.
    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn run(&self, param: Option<&str>) -> Result<String>;
}

// ── Session requests ──────────────────────────────────────────────────────────

/// A change to the conversation a tool asked for. Tools never touch session
/// state themselves; the loop applies these once the call has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRequest {
    EndConversation,
    /// Model key, already resolved from any synonym.
    SwitchModel(String),
    ResetChat,
}

/// Queue shared between the session tools and the registry.
#[derive(Debug, Clone, Default)]
pub struct StateRequests(Arc<Mutex<Vec<StateRequest>>>);

impl StateRequests {
    pub fn push(&self, request: StateRequest) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(request);
    }

    pub fn drain(&self) -> Vec<StateRequest> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    requests: StateRequests,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Self {
        Self::with_requests(tools, StateRequests::default())
    }

    /// Registry whose session tools report into `requests`.
    pub fn with_requests(tools: Vec<Box<dyn Tool>>, requests: StateRequests) -> Self {
        Self { tools, requests }
    }

    /// Tools switched on in `[tools]`.
    pub fn from_config(config: &Config) -> Self {
        let t = &config.tools;
        let requests = StateRequests::default();
        let mut tools: Vec<Box<dyn Tool>> = Vec::new();
        if t.time {
            tools.push(Box::new(clock::TimeTool));
        }
        if t.current_date {
            tools.push(Box::new(clock::DateTool));
        }
        if t.current_datetime {
            tools.push(Box::new(clock::DateTimeTool));
        }
        if t.weather {
            tools.push(Box::new(weather::WeatherTool::new(&config.user.location)));
        }
        if t.get_models {
            tools.push(Box::new(models::ModelsTool::from_config(config)));
        }
        if t.switch_model {
            tools.push(Box::new(session::SwitchModelTool::from_config(config, requests.clone())));
        }
        if t.reset_chat {
            tools.push(Box::new(session::ResetChatTool::new(requests.clone())));
        }
        if t.end_conversation {
            tools.push(Box::new(session::EndConversationTool::new(requests.clone())));
        }
        Self::with_requests(tools, requests)
    }

    /// Session changes requested by tools since the last call.
    pub fn take_requests(&self) -> Vec<StateRequest> {
        self.requests.drain()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions sent to the model in agent mode.
    pub fn definitions(&self) -> Vec<client::Tool> {
        self.tools
            .iter()
            .map(|t| client::Tool {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// A one- or two-word question whose first word names a tool, e.g.
    /// "weather tomorrow". Returns the tool name and optional argument.
    pub fn match_manual<'q>(&self, question: &'q str) -> Option<(&'static str, Option<&'q str>)> {
        let tokens: Vec<&str> = question.split_whitespace().collect();
        if tokens.is_empty() || tokens.len() > 2 {
            return None;
        }
        let first = tokens[0].to_lowercase();
        let tool = self.tools.iter().find(|t| t.name() == first)?;
        Some((tool.name(), tokens.get(1).copied()))
    }

    /// Run a tool by name. `None` when no such tool is registered; a failing
    /// tool reports its error as the result text.
    pub async fn call(&self, name: &str, param: Option<&str>) -> Option<(String, String)> {
        let tool = self.tools.iter().find(|t| t.name() == name)?;
        tracing::debug!(tool = name, ?param, "tool call");
        let output = match tool.run(param).await {
            Ok(out) => out,
            Err(e) => format!("[Tool error: {e}]"),
        };
        Some((tool.name().to_string(), output))
    }

    /// Run a model-issued call whose arguments arrive as a JSON object.
    pub async fn call_json(&self, name: &str, arguments: &str) -> String {
        let args: Value = serde_json::from_str(arguments).unwrap_or(Value::Null);
        let param = first_string_arg(&args);
        match self.call(name, param.as_deref()).await {
            Some((_, out)) => out,
            None => format!("[Tool error: unknown tool '{name}']"),
        }
    }
}

/// The first string-valued field of an arguments object, if any.
fn first_string_arg(args: &Value) -> Option<String> {
    match args {
        Value::Object(map) => map.values().find_map(|v| v.as_str()).map(str::to_string),
        Value::String(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "echoes"
        }
        async fn run(&self, param: Option<&str>) -> Result<String> {
            Ok(param.unwrap_or("nothing").to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }
        fn description(&self) -> &'static str {
            "always fails"
        }
        async fn run(&self, _param: Option<&str>) -> Result<String> {
            anyhow::bail!("service down")
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![Box::new(Echo), Box::new(Broken)])
    }

    #[test]
    fn test_match_manual_one_or_two_tokens() {
        let reg = registry();
        assert_eq!(reg.match_manual("echo"), Some(("echo", None)));
        assert_eq!(reg.match_manual("Echo hi"), Some(("echo", Some("hi"))));
        assert_eq!(reg.match_manual("echo hi there"), None);
        assert_eq!(reg.match_manual("say hi"), None);
        assert_eq!(reg.match_manual(""), None);
    }

    #[tokio::test]
    async fn test_call_known_and_unknown() {
        let reg = registry();
        assert_eq!(reg.call("echo", Some("x")).await, Some(("echo".into(), "x".into())));
        assert_eq!(reg.call("nope", None).await, None);
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_result_text() {
        let reg = registry();
        let (name, out) = reg.call("broken", None).await.unwrap();
        assert_eq!(name, "broken");
        assert_eq!(out, "[Tool error: service down]");
    }

    #[tokio::test]
    async fn test_call_json_extracts_argument() {
        let reg = registry();
        assert_eq!(reg.call_json("echo", r#"{"date":"tomorrow"}"#).await, "tomorrow");
        assert_eq!(reg.call_json("echo", "{}").await, "nothing");
        assert!(reg.call_json("nope", "{}").await.starts_with("[Tool error"));
    }

    #[tokio::test]
    async fn test_session_tools_report_through_registry() {
        let raw = r#"
[models.groq]
provider = "groq"
model = "llama3"

[tools]
weather = false
"#;
        let config = Config::from_toml(raw, std::path::PathBuf::from(".")).unwrap();
        let reg = ToolRegistry::from_config(&config);
        assert!(reg.names().contains(&"switch_model"));

        reg.call_json("switch_model", r#"{"model":"groq"}"#).await;
        reg.call("end_conversation", None).await.unwrap();
        assert_eq!(
            reg.take_requests(),
            vec![StateRequest::SwitchModel("groq".into()), StateRequest::EndConversation]
        );
        assert!(reg.take_requests().is_empty());
    }

    #[test]
    fn test_definitions_follow_registration_order() {
        let defs = registry().definitions();
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "broken"]);
    }
}
