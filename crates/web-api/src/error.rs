use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        use application::ApplicationError as AppErr;
        use domain::{DomainError, RepositoryError};

        match error {
            AppErr::Domain(DomainError::InvalidArgument { field, reason }) => ApiError::new(
                StatusCode::BAD_REQUEST,
                "INVALID_ARGUMENT",
                format!("{}: {}", field, reason),
            ),
            AppErr::Domain(DomainError::DealerNotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, "DEALER_NOT_FOUND", "dealer not found")
            }
            AppErr::Domain(DomainError::DealerProfileNotFound) => ApiError::new(
                StatusCode::NOT_FOUND,
                "DEALER_PROFILE_NOT_FOUND",
                "dealer profile not found",
            ),
            AppErr::Domain(DomainError::DealerNotApproved) => ApiError::new(
                StatusCode::FORBIDDEN,
                "DEALER_NOT_APPROVED",
                "dealer is not approved",
            ),
            AppErr::Domain(DomainError::CarNotFound) => {
                ApiError::new(StatusCode::NOT_FOUND, "CAR_NOT_FOUND", "car not found")
            }
            AppErr::Domain(DomainError::ConversationNotFound) => ApiError::new(
                StatusCode::NOT_FOUND,
                "CONVERSATION_NOT_FOUND",
                "conversation not found",
            ),
            AppErr::Domain(DomainError::NotConversationParticipant) => ApiError::new(
                StatusCode::FORBIDDEN,
                "NOT_CONVERSATION_PARTICIPANT",
                "caller is not a participant of this conversation",
            ),
            AppErr::Repository(repo_err) => match repo_err {
                RepositoryError::NotFound => ApiError::new(
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    "requested resource not found",
                ),
                RepositoryError::Conflict => {
                    ApiError::new(StatusCode::CONFLICT, "CONFLICT", "resource already exists")
                }
                err @ RepositoryError::Storage { .. } => {
                    tracing::error!(error = %err, "store unavailable");
                    ApiError::new(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "STORE_UNAVAILABLE",
                        "storage temporarily unavailable, please retry",
                    )
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
