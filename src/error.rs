/// Errors returned by the command surface.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("Invalid parameter for {command}: {reason}")]
    InvalidParameter {
        command: &'static str,
        reason: String,
    },

    #[error("Unknown command type: {0}")]
    UnknownCommand(String),
}

impl CommandError {
    pub fn invalid(command: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            command,
            reason: reason.into(),
        }
    }
}
