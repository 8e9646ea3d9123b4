//! Language model clients.
//!
//! [`ChatCompletionsClient`] speaks the OpenAI-compatible chat completions
//! protocol with function calling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;
use crate::error::{Error, Result};
use crate::tools::ToolDefinition;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Model-assigned call id, echoed back with the result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Decoded JSON arguments.
    pub arguments: serde_json::Value,
}

/// A message in the agent conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// A user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// An assistant message as produced by the model.
    pub fn assistant(message: &AssistantMessage) -> Self {
        Self {
            role: Role::Assistant,
            content: message.text.clone(),
            tool_calls: message.tool_calls.clone(),
            tool_call_id: None,
        }
    }

    /// A tool result answering `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// One inference response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Text content, if any.
    pub text: Option<String>,
    /// Tool calls in the order the model emitted them.
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    /// A text-only response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A response consisting of tool calls only.
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls: calls,
        }
    }
}

/// Everything the model needs for one inference.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Trait for model backends.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Runs one inference.
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantMessage>;

    /// Returns the model name.
    fn name(&self) -> &str;
}

/// Client for OpenAI-compatible `/chat/completions` endpoints.
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    retry: RetryPolicy,
}

impl ChatCompletionsClient {
    /// Creates a client for `model` at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| Error::Model(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            retry: RetryPolicy::default(),
        })
    }

    /// Sets the retry policy for transient failures.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn complete(&self, request: CompletionRequest) -> Result<AssistantMessage> {
        let body = WireRequest {
            model: &self.model,
            messages: to_wire(&request.system, &request.messages),
            tools: request
                .tools
                .iter()
                .map(|function| WireTool {
                    kind: "function",
                    function,
                })
                .collect(),
        };
        let url = self.endpoint();

        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            let failure = match response {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: WireResponse = resp
                        .json()
                        .await
                        .map_err(|e| Error::Model(format!("failed to parse response: {}", e)))?;
                    let choice = parsed
                        .choices
                        .into_iter()
                        .next()
                        .ok_or_else(|| Error::Model("response contained no choices".to_string()))?;
                    return Ok(from_wire(choice.message));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    let message = format!("API error {}: {}", status, text);
                    if status != reqwest::StatusCode::TOO_MANY_REQUESTS
                        && !status.is_server_error()
                    {
                        return Err(Error::Model(message));
                    }
                    message
                }
                Err(e) => format!("request failed: {}", e),
            };

            if !self.retry.should_retry(attempt) {
                return Err(Error::Model(failure));
            }
            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                model = %self.model,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "retrying model request"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn name(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: &'a ToolDefinition,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunction {
    name: String,
    /// JSON-encoded arguments, as the protocol transmits them.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

fn function_kind() -> String {
    "function".to_string()
}

fn to_wire(system: &str, messages: &[ChatMessage]) -> Vec<WireMessage> {
    let mut wire = Vec::with_capacity(messages.len() + 1);
    wire.push(WireMessage {
        role: Role::System,
        content: Some(system.to_string()),
        tool_calls: Vec::new(),
        tool_call_id: None,
    });
    wire.extend(messages.iter().map(|m| WireMessage {
        role: m.role,
        content: m.content.clone(),
        tool_calls: m
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                kind: function_kind(),
                function: WireFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect(),
        tool_call_id: m.tool_call_id.clone(),
    }));
    wire
}

fn from_wire(message: WireMessage) -> AssistantMessage {
    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| {
            // Models occasionally emit arguments that are not valid JSON; keep
            // the raw string so the tool layer reports it back as a fault.
            let arguments = serde_json::from_str(&call.function.arguments)
                .unwrap_or(serde_json::Value::String(call.function.arguments));
            ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            }
        })
        .collect();

    AssistantMessage {
        text: message.content.filter(|text| !text.trim().is_empty()),
        tool_calls,
    }
}

/// Model that replays a fixed script of responses.
///
/// Once the script runs out it repeats the fallback response, or fails if
/// none was given. Useful for dry runs and tests.
pub struct ScriptedModel {
    script: Mutex<VecDeque<AssistantMessage>>,
    fallback: Option<AssistantMessage>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// Creates a model replaying `script` in order.
    pub fn new(script: Vec<AssistantMessage>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Sets the response repeated after the script is exhausted.
    pub fn with_fallback(mut self, fallback: AssistantMessage) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Returns how many inferences were requested.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, _request: CompletionRequest) -> Result<AssistantMessage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        next.or_else(|| self.fallback.clone())
            .ok_or_else(|| Error::Model("scripted model has no more responses".to_string()))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COMPLETIONS_PATH: &str = "/v1/chat/completions";

    fn base_url(server: &MockServer) -> String {
        format!("{}/v1", server.uri())
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "system".to_string(),
            messages: vec![ChatMessage::user("build a counter")],
            tools: crate::tools::ToolLayer::definitions(),
        }
    }

    #[test]
    fn to_wire_prepends_system_and_encodes_arguments() {
        let messages = vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant(&AssistantMessage::tool_calls(vec![ToolCall {
                id: "c1".to_string(),
                name: "terminal".to_string(),
                arguments: json!({ "command": "ls" }),
            }])),
            ChatMessage::tool("c1", "app\n"),
        ];

        let wire = serde_json::to_value(to_wire("sys", &messages)).unwrap();

        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[0]["content"], "sys");
        assert_eq!(wire[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"command":"ls"}"#
        );
        assert_eq!(wire[3]["tool_call_id"], "c1");
    }

    #[test]
    fn from_wire_decodes_arguments_and_drops_blank_text() {
        let message: WireMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": "  ",
            "tool_calls": [{
                "id": "c1",
                "type": "function",
                "function": { "name": "read-files", "arguments": "{\"files\":[\"/home/user/a\"]}" }
            }, {
                "id": "c2",
                "function": { "name": "terminal", "arguments": "not json" }
            }]
        }))
        .unwrap();

        let assistant = from_wire(message);

        assert!(assistant.text.is_none());
        assert_eq!(assistant.tool_calls[0].arguments["files"][0], "/home/user/a");
        assert_eq!(assistant.tool_calls[1].arguments, json!("not json"));
    }

    #[tokio::test]
    async fn scripted_model_replays_then_falls_back() {
        let model = ScriptedModel::new(vec![AssistantMessage::text("first")])
            .with_fallback(AssistantMessage::text("again"));

        let a = model.complete(request()).await.unwrap();
        let b = model.complete(request()).await.unwrap();
        let c = model.complete(request()).await.unwrap();

        assert_eq!(a.text.as_deref(), Some("first"));
        assert_eq!(b.text.as_deref(), Some("again"));
        assert_eq!(c.text.as_deref(), Some("again"));
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn scripted_model_without_fallback_errors_when_exhausted() {
        let model = ScriptedModel::new(vec![]);
        assert!(matches!(
            model.complete(request()).await,
            Err(Error::Model(_))
        ));
    }

    #[tokio::test]
    async fn client_parses_tool_calls_from_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .and(header("authorization", "Bearer key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": { "name": "terminal", "arguments": "{\"command\":\"npm install\"}" }
                        }]
                    }
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(base_url(&server), "key", "grok-test").unwrap();
        let message = client.complete(request()).await.unwrap();

        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.tool_calls[0].name, "terminal");
        assert_eq!(message.tool_calls[0].arguments["command"], "npm install");
        assert_eq!(client.name(), "grok-test");
    }

    #[tokio::test]
    async fn client_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("{}"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "done" } }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(base_url(&server), "key", "grok-test")
            .unwrap()
            .with_retry(RetryPolicy::new(
                2,
                Duration::from_millis(1),
                Duration::from_millis(5),
            ));
        let message = client.complete(request()).await.unwrap();

        assert_eq!(message.text.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn client_gives_up_after_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .expect(3)
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(base_url(&server), "key", "grok-test")
            .unwrap()
            .with_retry(RetryPolicy::new(
                2,
                Duration::from_millis(1),
                Duration::from_millis(5),
            ));

        match client.complete(request()).await {
            Err(Error::Model(message)) => assert!(message.contains("429")),
            other => panic!("expected model error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn client_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(COMPLETIONS_PATH))
            .respond_with(ResponseTemplate::new(401).set_body_string("{\"error\":\"bad key\"}"))
            .expect(1)
            .mount(&server)
            .await;

        let client = ChatCompletionsClient::new(base_url(&server), "key", "grok-test")
            .unwrap()
            .with_retry(RetryPolicy::new(
                3,
                Duration::from_millis(1),
                Duration::from_millis(5),
            ));

        match client.complete(request()).await {
            Err(Error::Model(message)) => assert!(message.contains("401")),
            other => panic!("expected model error, got {:?}", other),
        }
    }
}
