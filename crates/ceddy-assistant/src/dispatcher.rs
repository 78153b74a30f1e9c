//! Turns a user utterance into the assistant's reply.

use crate::config::AssistantConfig;
use crate::error::AssistantError;
use crate::functions::FunctionRegistry;
use crate::llm::{ChatMessage, LanguageModel, ModelReply};
use ceddy_types::{FunctionCallRecord, Role, Utterance};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const EMPTY_REPLY: &str = "I'm sorry, I couldn't process your request.";
const UNKNOWN_FUNCTION_REPLY: &str = "Sorry, I can't help with that one on the course yet.";
const INVALID_ARGUMENTS_REPLY: &str =
    "Sorry, I didn't catch the details for that. Could you say it again?";

/// The assistant's answer for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReply {
    pub text: String,
    /// Set when a domain function ran during the turn.
    pub function_call: Option<FunctionCallRecord>,
}

/// Sends conversation context to the model and resolves at most one
/// function call per turn.
pub struct ResponseDispatcher {
    model: Arc<dyn LanguageModel>,
    registry: Arc<FunctionRegistry>,
    system_prompt: String,
    context_window: usize,
    timeout: Duration,
}

impl std::fmt::Debug for ResponseDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseDispatcher")
            .field("model", &self.model.name())
            .field("functions", &self.registry.names().collect::<Vec<_>>())
            .field("context_window", &self.context_window)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ResponseDispatcher {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        registry: Arc<FunctionRegistry>,
        config: &AssistantConfig,
    ) -> Self {
        Self {
            model,
            registry,
            system_prompt: config.system_prompt.clone(),
            context_window: config.context_window,
            timeout: config.timeout(),
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    fn context(&self, transcript: &[Utterance], user_text: &str) -> Vec<ChatMessage> {
        let recent = &transcript[transcript.len().saturating_sub(self.context_window)..];
        let mut messages = Vec::with_capacity(recent.len() + 2);
        messages.push(ChatMessage::System(self.system_prompt.clone()));
        messages.extend(recent.iter().map(|u| match u.role {
            Role::User => ChatMessage::User(u.text.clone()),
            Role::Assistant => ChatMessage::Assistant(u.text.clone()),
        }));
        messages.push(ChatMessage::User(user_text.to_string()));
        messages
    }

    async fn ask(
        &self,
        messages: &[ChatMessage],
        tools: &[Value],
    ) -> Result<ModelReply, AssistantError> {
        tokio::time::timeout(self.timeout, self.model.respond(messages, tools))
            .await
            .map_err(|_| AssistantError::Timeout(self.timeout.as_millis() as u64))?
    }

    /// Produces the reply to `user_text` given the session's transcript.
    ///
    /// Unknown functions and bad arguments are answered with an apology
    /// here; only a failing model call is returned as an error.
    pub async fn respond(
        &self,
        transcript: &[Utterance],
        user_text: &str,
    ) -> Result<DispatchReply, AssistantError> {
        let mut messages = self.context(transcript, user_text);
        let tools = self.registry.tool_definitions();

        let request = match self.ask(&messages, &tools).await? {
            ModelReply::Text(text) => {
                return Ok(DispatchReply {
                    text: non_empty_or(text, EMPTY_REPLY),
                    function_call: None,
                })
            }
            ModelReply::FunctionCall(request) => request,
        };

        let (record, summary) = match self.registry.invoke(&request.name, &request.arguments) {
            Ok(resolved) => resolved,
            Err(e) if e.is_recoverable() => {
                warn!(function = %request.name, error = %e, "function call rejected");
                let text = match e {
                    AssistantError::UnknownFunction(_) => UNKNOWN_FUNCTION_REPLY,
                    _ => INVALID_ARGUMENTS_REPLY,
                };
                return Ok(DispatchReply {
                    text: text.to_string(),
                    function_call: None,
                });
            }
            Err(e) => return Err(e),
        };
        debug!(function = %record.function_name, "function call resolved");

        messages.push(ChatMessage::FunctionCall(request.clone()));
        messages.push(ChatMessage::FunctionResult {
            call_id: request.call_id,
            name: record.function_name.clone(),
            content: record.result.to_string(),
        });

        // No tools on the follow-up: one function per turn.
        let text = match self.ask(&messages, &[]).await {
            Ok(ModelReply::Text(text)) => non_empty_or(text, &summary),
            Ok(ModelReply::FunctionCall(extra)) => {
                warn!(function = %extra.name, "ignoring second function call in one turn");
                summary
            }
            Err(e) => {
                warn!(error = %e, "follow-up completion failed; speaking function summary");
                summary
            }
        };

        Ok(DispatchReply {
            text,
            function_call: Some(record),
        })
    }
}

fn non_empty_or(text: String, fallback: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
