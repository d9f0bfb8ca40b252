use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// API error type that maps onto the `{status: "fail", message}` envelope.
///
/// Client-facing messages are intentionally generic: login never reveals
/// whether the email or the password was wrong, and token failures all
/// collapse into their status category.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("User with this email or username already exists")]
    DuplicateUser,

    #[error("Please provide email/username and password")]
    MissingCredentials,

    #[error("Incorrect email/username or password")]
    InvalidCredentials,

    #[error("You are not logged in! Please log in to get access.")]
    Unauthenticated,

    #[error("Invalid token. Please log in again!")]
    InvalidToken,

    #[error("The user belonging to this token no longer exists.")]
    TokenUserGone,

    #[error("User recently changed password! Please log in again.")]
    StalePassword,

    #[error("Your current password is wrong.")]
    WrongCurrentPassword,

    #[error("You do not have permission to perform this action")]
    Forbidden,

    #[error("Admin accounts cannot be modified")]
    AdminImmutable,

    #[error("There is no user with that email address.")]
    UserNotFound,

    #[error("Token is invalid or has expired")]
    InvalidOrExpiredToken,

    #[error("There was an error sending the email. Try again later!")]
    NotificationFailure,

    #[error("Something went wrong")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::DuplicateUser
            | ApiError::MissingCredentials
            | ApiError::InvalidOrExpiredToken => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::Unauthenticated
            | ApiError::InvalidToken
            | ApiError::TokenUserGone
            | ApiError::StalePassword
            | ApiError::WrongCurrentPassword
            | ApiError::AdminImmutable => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::UserNotFound => StatusCode::NOT_FOUND,
            ApiError::NotificationFailure | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error body matching the `{status: "fail", message}` envelope.
#[derive(Serialize)]
pub struct FailBody {
    pub status: &'static str,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(err) = &self {
            // Log the detail, hand the client the generic message only.
            error!(error = ?err, "internal error");
        }
        let body = Json(FailBody {
            status: "fail",
            message: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

/// Result type alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;
