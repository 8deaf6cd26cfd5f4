//! Request-facing errors and their HTTP mapping.

use thiserror::Error;

use crate::http::{Response, StatusCode};
use crate::transform::{TransformError, UnknownFormat};

/// The request is malformed. Always 400.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing image source")]
    MissingSource,

    #[error("Invalid image source: {0}")]
    InvalidSource(String),

    #[error("Invalid query parameter: Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("Invalid query parameter: {0}")]
    InvalidFormat(#[from] UnknownFormat),
}

/// The request is well-formed but not permitted. Always 403.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Domain '{0}' not allowed")]
    DomainNotAllowed(String),
}

/// Everything [`Optimizer::optimize`](super::Optimizer::optimize) can fail with.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("Error processing image: {0}")]
    Transform(#[from] TransformError),
}

impl ImageError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BadRequest,
            Self::Policy(_) => StatusCode::Forbidden,
            Self::Transform(_) => StatusCode::InternalServerError,
        }
    }

    /// Plain-text response carrying the error message as its body.
    pub fn to_response(&self) -> Response {
        Response::text(self.status(), self.to_string())
    }
}
