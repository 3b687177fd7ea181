//! Identifier newtypes shared by the timeline and the tracker.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} cannot contain whitespace: {value:?}")]
    Whitespace { field: &'static str, value: String },

    #[error("invalid suggestion decision: {value}")]
    InvalidDecision { value: String },

    #[error("invalid session event type: {value}")]
    InvalidSessionEventType { value: String },
}

fn validate_token(field: &'static str, value: String) -> Result<String, ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if value.chars().any(char::is_whitespace) {
        return Err(ValidationError::Whitespace { field, value });
    }
    Ok(value)
}

/// Declares a string identifier that is non-empty and free of whitespace.
/// `generate` adds a random v4 UUID constructor.
macro_rules! token_id {
    ($(#[$meta:meta])* $name:ident, $field:literal $(, $generate:ident)?) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, ValidationError> {
                validate_token($field, value.into()).map(Self)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            $(
                pub fn $generate() -> Self {
                    Self(uuid::Uuid::new_v4().to_string())
                }
            )?
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

token_id!(
    /// Package name of a monitored application, e.g. `com.example.reader`.
    PackageName, "package name"
);

token_id!(
    /// Links a `SuggestionShown` event to the decision made on it.
    SuggestionId, "suggestion ID", generate
);

token_id!(
    /// Keys the lifecycle markers of one focus session.
    SessionId, "session ID", generate
);

/// Store-assigned event identifier.
///
/// Identifiers are monotonically increasing in append order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(i64);

impl EventId {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
