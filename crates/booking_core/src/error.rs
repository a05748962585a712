use thiserror::Error;

use crate::checkout::CheckoutValidation;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("lesson service request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error(
        "lesson service returned status {status}: {}",
        .message.as_deref().unwrap_or("no details")
    )]
    Status { status: u16, message: Option<String> },
    #[error("malformed lesson service response: {0}")]
    Malformed(String),
    #[error("invalid lesson service url '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("lesson service is unavailable")]
    Unavailable,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("checkout is disabled: {0}")]
    Disabled(CheckoutValidation),
    #[error("an order is already being submitted")]
    InFlight,
    #[error("order rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Service(ServiceError),
}

impl From<ServiceError> for CheckoutError {
    fn from(value: ServiceError) -> Self {
        match value {
            ServiceError::Status { status, message } => Self::Rejected {
                status,
                message: message.unwrap_or_else(|| "no details".to_string()),
            },
            other => Self::Service(other),
        }
    }
}
