use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Language model error: {0}")]
    Provider(String),

    #[error("Language model timed out after {0} ms")]
    Timeout(u64),

    /// The model asked for a function the registry does not hold.
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Invalid arguments for {function}: {reason}")]
    InvalidArguments { function: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl AssistantError {
    /// Whether the dispatcher answers this locally instead of failing the turn.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownFunction(_) | Self::InvalidArguments { .. }
        )
    }
}
