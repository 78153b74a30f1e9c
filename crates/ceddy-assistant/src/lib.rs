//! Response generation for Hey Ceddy.
//!
//! The [`ResponseDispatcher`] sends conversation context to a
//! [`LanguageModel`] and resolves the model's structured function-call
//! requests against the golf [`FunctionRegistry`].

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod functions;
pub mod llm;

pub use config::AssistantConfig;
pub use dispatcher::{DispatchReply, ResponseDispatcher};
pub use error::AssistantError;
pub use functions::{
    check_wind_conditions, ClubBand, ClubSuggestion, ClubTable, FunctionOutput, FunctionRegistry,
    FunctionSpec, ParamKind, ParamSpec, WindConditions, CHECK_WIND_CONDITIONS, SUGGEST_CLUB,
};
pub use llm::{ChatMessage, FunctionCallRequest, LanguageModel, ModelReply, OpenAiChatModel};
