//! Language-response provider seam and the OpenAI chat-completions adapter.

use crate::config::AssistantConfig;
use crate::error::AssistantError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

/// A structured request from the model to run a domain function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCallRequest {
    pub call_id: String,
    pub name: String,
    /// Raw arguments as the model produced them; validated by the registry.
    pub arguments: Value,
}

/// Conversation context entry.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(String),
    Assistant(String),
    FunctionCall(FunctionCallRequest),
    FunctionResult {
        call_id: String,
        name: String,
        content: String,
    },
}

/// What the model answered.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Text(String),
    FunctionCall(FunctionCallRequest),
}

/// A language-response provider.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// One completion over `messages`. `tools` holds the function
    /// definitions the model may call; empty means text only.
    async fn respond(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ModelReply, AssistantError>;
}

/// OpenAI chat completions with tool calling.
#[derive(Clone)]
pub struct OpenAiChatModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for OpenAiChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiChatModel")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiChatModel {
    pub fn new(config: &AssistantConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

fn to_wire(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(text) => json!({ "role": "system", "content": text }),
        ChatMessage::User(text) => json!({ "role": "user", "content": text }),
        ChatMessage::Assistant(text) => json!({ "role": "assistant", "content": text }),
        ChatMessage::FunctionCall(call) => {
            let arguments = match &call.arguments {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            json!({
                "role": "assistant",
                "content": Value::Null,
                "tool_calls": [{
                    "id": call.call_id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": arguments },
                }],
            })
        }
        ChatMessage::FunctionResult {
            call_id, content, ..
        } => json!({ "role": "tool", "tool_call_id": call_id, "content": content }),
    }
}

fn request_body(model: &str, messages: &[ChatMessage], tools: &[Value]) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().map(to_wire).collect::<Vec<_>>(),
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(tools.to_vec());
    }
    body
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn parse_reply(completion: ChatCompletion) -> Result<ModelReply, AssistantError> {
    let message = completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| AssistantError::Provider("completion had no choices".to_string()))?;

    // Only the first tool call is honoured; one function per turn.
    if let Some(call) = message.tool_calls.into_iter().flatten().next() {
        let arguments = serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments));
        return Ok(ModelReply::FunctionCall(FunctionCallRequest {
            call_id: call.id,
            name: call.function.name,
            arguments,
        }));
    }
    Ok(ModelReply::Text(message.content.unwrap_or_default()))
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn respond(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ModelReply, AssistantError> {
        if self.api_key.is_empty() {
            return Err(AssistantError::Config(
                "OpenAI API key is not configured".to_string(),
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request_body(&self.model, messages, tools))
            .send()
            .await
            .map_err(|e| AssistantError::Provider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AssistantError::Provider(format!("HTTP {status}: {body}")));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| AssistantError::Provider(format!("malformed completion: {e}")))?;
        parse_reply(completion)
    }
}
