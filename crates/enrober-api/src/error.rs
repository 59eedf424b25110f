//! Mapping from core errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use enrober_core::{EnroberError, ErrorClass};
use tracing::{error, warn};

use crate::handlers::error_response;

/// A core error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub EnroberError);

impl From<EnroberError> for ApiError {
    fn from(err: EnroberError) -> Self {
        Self(err)
    }
}

/// Status code for an error class.
///
/// Validation and conflict failures answer 500, not 4xx. Clients in the
/// field depend on it.
pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorClass::Forbidden => StatusCode::FORBIDDEN,
        ErrorClass::Validation | ErrorClass::Conflict | ErrorClass::Upstream => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let class = self.0.class();
        let message = self.0.to_string();
        match class {
            ErrorClass::Upstream => error!(error = %message, "request failed"),
            _ => warn!(?class, error = %message, "request rejected"),
        }
        error_response(&message, status_for(class)).into_response()
    }
}
