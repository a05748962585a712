use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    SoldOut,
    Internal,
    #[serde(other)]
    Unknown,
}

/// Error body the lesson service may attach to a non-success response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(alias = "error")]
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Best-effort decode of a response body. Plain-text bodies are kept as
    /// the message; empty bodies yield `None`.
    pub fn from_body(body: &str) -> Option<Self> {
        let body = body.trim();
        if body.is_empty() {
            return None;
        }
        match serde_json::from_str::<Self>(body) {
            Ok(parsed) => Some(parsed),
            Err(_) if body.starts_with('{') || body.starts_with('[') => None,
            Err(_) => Some(Self {
                code: None,
                message: body.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseSortError {
    #[error("sort specification is empty")]
    Empty,
    #[error("unknown sort field '{0}'")]
    UnknownField(String),
    #[error("unknown sort direction '{0}'")]
    UnknownDirection(String),
}
