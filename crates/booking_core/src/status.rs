use std::fmt;

use serde::Serialize;

/// Last user-facing status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusMessage {
    OrderConfirmed { name: String, items: u32 },
    OrderRejected { message: Option<String> },
    ServiceError,
    LessonsUnavailable,
}

impl StatusMessage {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::OrderConfirmed { .. })
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderConfirmed { name, items } => write!(
                f,
                "Thank you {name}! Your enrollment for {items} lesson(s) is confirmed."
            ),
            Self::OrderRejected {
                message: Some(message),
            } => write!(f, "Submission failed: {message}"),
            Self::OrderRejected { message: None } => f.write_str("Submission failed"),
            Self::ServiceError => f.write_str("Server error, please try again"),
            Self::LessonsUnavailable => f.write_str("Lessons could not be loaded"),
        }
    }
}
