use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use thiserror::Error;

use crate::database::StoreError;
use crate::handlers::shared::ApiResponse;

#[derive(Error, Debug)]
pub enum AppError {
    /// Actor lacks the role the action needs.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Request or group is not in the state the action needs.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Group is full ({max_members} members)")]
    CapacityExceeded { max_members: i32 },

    /// Duplicate pending join request.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Chat access by someone who is neither owner nor member.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error{}", .0.as_ref().map_or("".to_string(), |s| format!(": {}", s)))]
    InternalServerError(Option<String>),
}

pub type AppResult<T> = Result<T, AppError>;

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::CapacityExceeded { .. } => StatusCode::CONFLICT,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();
        let error_message = match self {
            // Storage details stay in the log
            AppError::Store(_) | AppError::InternalServerError(_) => {
                log::error!("Request failed with status {}: {}", status_code, self);
                "Internal server error".to_string()
            }
            _ => {
                log::warn!("Request failed with status {}: {}", status_code, self);
                self.to_string()
            }
        };

        HttpResponse::build(status_code).json(ApiResponse::<()>::error(&error_message))
    }
}

impl AppError {
    pub fn internal_server_error_message(message: impl Into<String>) -> Self {
        AppError::InternalServerError(Some(message.into()))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        log::error!("Anyhow error: {}", error);

        match error.downcast::<StoreError>() {
            Ok(store_error) => AppError::Store(store_error),
            Err(original_error) => AppError::InternalServerError(Some(original_error.to_string())),
        }
    }
}
