use thiserror::Error;

use chathook_common::{EventKind, PluginId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {kind} pattern '{pattern}': {reason}")]
    InvalidPattern {
        kind: EventKind,
        pattern: String,
        reason: &'static str,
    },

    #[error("plugin {0} is not loaded")]
    PluginNotFound(PluginId),

    #[error("a plugin named '{0}' is already loaded")]
    PluginAlreadyLoaded(String),

    #[error("plugin '{plugin}' failed to register: {reason}")]
    Registration { plugin: String, reason: String },

    #[error(transparent)]
    Config(#[from] chathook_config::Error),

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn invalid_pattern(kind: EventKind, pattern: &str, reason: &'static str) -> Self {
        Self::InvalidPattern {
            kind,
            pattern: pattern.to_string(),
            reason,
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }
}

impl chathook_common::FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chathook_common::impl_context!();
