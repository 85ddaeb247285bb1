/// LLM sessions: a system prompt, a chat client and, in agent mode, the
/// tool registry.
///
/// The conversation loop only sees [`LlmSession`] and [`SessionFactory`];
/// everything provider-specific stays in here.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::client::{Client, ContentPart, Message, MessageContent};
use crate::config::{Config, Provider};
use crate::error::ConfigError;
use crate::state::SessionState;
use crate::tools::ToolRegistry;

/// One question for the model.
pub struct Turn<'a> {
    /// Earlier exchanges, oldest first.
    pub history: &'a [Message],
    pub question: &'a str,
    /// Forward text chunks to `on_chunk` as they arrive.
    pub stream: bool,
    pub on_chunk: &'a (dyn Fn(&str) + Send + Sync),
}

#[async_trait]
pub trait LlmSession: Send + Sync {
    async fn invoke(&self, turn: Turn<'_>) -> Result<String>;
}

pub trait SessionFactory: Send + Sync {
    fn build(&self, state: &SessionState, config: &Config) -> Result<Box<dyn LlmSession>>;
}

// ── Prompt loading ────────────────────────────────────────────────────────────

/// Concatenate prompt files and substitute `{placeholder}`s.
pub fn load_system_prompt(paths: &[PathBuf], replacements: &[(&str, String)]) -> Result<String> {
    let mut parts = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt file {}", path.display()))?;
        parts.push(raw.trim_end().to_string());
    }
    let mut prompt = parts.join("\n\n");
    for (key, value) in replacements {
        prompt = prompt.replace(&format!("{{{key}}}"), value);
    }
    Ok(prompt)
}

// ── OpenAI-compatible sessions ────────────────────────────────────────────────

pub struct OpenAiFactory {
    tools: Arc<ToolRegistry>,
}

impl OpenAiFactory {
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self { tools }
    }
}

/// Endpoint root for the selected model.
fn endpoint(provider: Provider, base_url: Option<&str>) -> Result<String, ConfigError> {
    if let Some(url) = base_url.filter(|u| !u.trim().is_empty()) {
        return Ok(url.to_string());
    }
    if let Some(url) = provider.default_base_url() {
        return Ok(url.to_string());
    }
    std::env::var("CUSTOM_PROVIDER_BASE_URL")
        .ok()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingApiKey {
            provider: provider.as_str().to_string(),
            var: "CUSTOM_PROVIDER_BASE_URL".to_string(),
        })
}

fn api_key(provider: Provider) -> Result<Option<String>, ConfigError> {
    let Some(var) = provider.api_key_var() else {
        return Ok(None);
    };
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
        // Custom gateways often run without auth.
        _ if provider == Provider::OpenaiCustom => Ok(None),
        _ => Err(ConfigError::MissingApiKey {
            provider: provider.as_str().to_string(),
            var: var.to_string(),
        }),
    }
}

impl SessionFactory for OpenAiFactory {
    fn build(&self, state: &SessionState, config: &Config) -> Result<Box<dyn LlmSession>> {
        let opts = &state.model_options;
        let mut client = Client::new(endpoint(opts.provider, opts.base_url.as_deref())?, opts.model.clone());
        if let Some(key) = api_key(opts.provider)? {
            client.set_api_key(key);
        }
        client.set_temperature(state.temperature);

        let system = load_system_prompt(&state.active_prompts, &config.prompt_replacements())?;
        let tools = (state.tools_enabled && !self.tools.is_empty()).then(|| Arc::clone(&self.tools));

        tracing::info!(
            model = %opts.model,
            provider = opts.provider.as_str(),
            agent_type = %state.agent_type,
            tools = tools.is_some(),
            prompts = state.active_prompts.len(),
            "built LLM session"
        );

        Ok(Box::new(ChatSession {
            client,
            system,
            tools,
            max_iterations: config.agent.max_iterations,
        }))
    }
}

pub struct ChatSession {
    client: Client,
    system: String,
    tools: Option<Arc<ToolRegistry>>,
    max_iterations: usize,
}

#[async_trait]
impl LlmSession for ChatSession {
    async fn invoke(&self, turn: Turn<'_>) -> Result<String> {
        let mut messages = turn.history.to_vec();
        messages.push(Message {
            role: "user".to_string(),
            content: MessageContent::from(turn.question),
        });
        let stream = turn.stream;
        let on_chunk = turn.on_chunk;
        let forward = move |chunk: &str| {
            if stream {
                on_chunk(chunk)
            }
        };

        let Some(tools) = &self.tools else {
            let response = self.client.chat(&self.system, &messages, &[], forward).await?;
            return Ok(response.text);
        };

        let definitions = tools.definitions();
        for _ in 0..self.max_iterations {
            let response = self
                .client
                .chat(&self.system, &messages, &definitions, forward)
                .await?;
            if response.tool_calls.is_empty() {
                return Ok(response.text);
            }
            messages.push(response.to_message());

            let mut results = Vec::new();
            for tc in &response.tool_calls {
                let output = tools.call_json(&tc.name, &tc.arguments).await;
                tracing::debug!(tool = %tc.name, output_len = output.len(), "agent tool call");
                results.push(ContentPart::ToolResult {
                    tool_use_id: tc.id.clone(),
                    content: output,
                });
            }
            messages.push(Message {
                role: "tool".to_string(),
                content: MessageContent::Parts(results),
            });
        }

        // Out of tool round trips: ask for an answer from what was gathered.
        tracing::warn!(limit = self.max_iterations, "tool iteration limit reached");
        let response = self.client.chat(&self.system, &messages, &[], forward).await?;
        Ok(response.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(events: &[&str]) -> String {
        let mut body: String = events.iter().map(|e| format!("data: {e}\n\n")).collect();
        body.push_str("data: [DONE]\n\n");
        body
    }

    struct Fixed;

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &'static str {
            "time"
        }
        fn description(&self) -> &'static str {
            "fixed time"
        }
        async fn run(&self, _param: Option<&str>) -> Result<String> {
            Ok("12:34:56".into())
        }
    }

    fn session(uri: String, tools: Option<Arc<ToolRegistry>>) -> ChatSession {
        ChatSession {
            client: Client::new(uri, "m".into()),
            system: "sys".into(),
            tools,
            max_iterations: 2,
        }
    }

    #[test]
    fn test_load_system_prompt_replaces_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.md");
        let b = dir.path().join("b.md");
        std::fs::write(&a, "You are {agent_name}.\n").unwrap();
        std::fs::write(&b, "User {user_name} lives in {location}.").unwrap();
        let prompt = load_system_prompt(
            &[a, b],
            &[
                ("agent_name", "Bot".to_string()),
                ("user_name", "Ann".to_string()),
                ("location", "Oslo".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(prompt, "You are Bot.\n\nUser Ann lives in Oslo.");
    }

    #[test]
    fn test_endpoint_prefers_model_base_url() {
        assert_eq!(endpoint(Provider::Groq, None).unwrap(), "https://api.groq.com/openai");
        assert_eq!(endpoint(Provider::LmStudio, Some("http://box:1234")).unwrap(), "http://box:1234");
        assert_eq!(endpoint(Provider::Ollama, Some("  ")).unwrap(), "http://localhost:11434");
    }

    #[test]
    fn test_local_providers_need_no_key() {
        assert!(api_key(Provider::Ollama).unwrap().is_none());
        assert!(api_key(Provider::LmStudio).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_plain_session_streams_when_asked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string_contains("Ann: earlier"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[r#"{"choices":[{"delta":{"content":"Hi "}}]}"#, r#"{"choices":[{"delta":{"content":"there"}}]}"#]),
                "text/event-stream",
            ))
            .mount(&server)
            .await;

        let s = session(server.uri(), None);
        let history = vec![Message { role: "user".into(), content: "Ann: earlier".into() }];
        let seen = Mutex::new(String::new());
        let on_chunk = |c: &str| seen.lock().unwrap().push_str(c);
        let answer = s
            .invoke(Turn { history: &history, question: "hello", stream: true, on_chunk: &on_chunk })
            .await
            .unwrap();
        assert_eq!(answer, "Hi there");
        assert_eq!(seen.lock().unwrap().as_str(), "Hi there");

        let quiet = Mutex::new(String::new());
        let on_quiet = |c: &str| quiet.lock().unwrap().push_str(c);
        s.invoke(Turn { history: &history, question: "hello", stream: false, on_chunk: &on_quiet })
            .await
            .unwrap();
        assert!(quiet.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_agent_session_runs_tool_round_trip() {
        let server = MockServer::start().await;
        // Second request carries the tool result; answer it.
        Mock::given(method("POST"))
            .and(body_string_contains("12:34:56"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[r#"{"choices":[{"delta":{"content":"It is 12:34."}}]}"#]),
                "text/event-stream",
            ))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"time","arguments":"{}"}}]}}]}"#]),
                "text/event-stream",
            ))
            .with_priority(2)
            .mount(&server)
            .await;

        let registry = Arc::new(ToolRegistry::new(vec![Box::new(Fixed)]));
        let s = session(server.uri(), Some(registry));
        let noop = |_: &str| {};
        let answer = s
            .invoke(Turn { history: &[], question: "what time is it", stream: false, on_chunk: &noop })
            .await
            .unwrap();
        assert_eq!(answer, "It is 12:34.");
    }
}
