use atelier_core::{ParseEnumError, WorkflowError};
use atelier_documents::DocumentError;
use atelier_platform::ErrorBody;
use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

#[derive(Debug)]
pub enum ApiError {
    Workflow(WorkflowError),
    Document(DocumentError),
    BadRequest(String),
    Unavailable(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Workflow(err) => match err {
                WorkflowError::Unauthenticated => StatusCode::UNAUTHORIZED,
                WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
                WorkflowError::NotFound(_) => StatusCode::NOT_FOUND,
                WorkflowError::Precondition(_) => StatusCode::PRECONDITION_FAILED,
                WorkflowError::Validation(_) => StatusCode::BAD_REQUEST,
                WorkflowError::Conflict(_) => StatusCode::CONFLICT,
                WorkflowError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Document(_) => StatusCode::PRECONDITION_FAILED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Client-facing message. Store failures never leak their details.
    pub fn message(&self) -> String {
        match self {
            Self::Workflow(err) => err.to_string(),
            Self::Document(err) => err.to_string(),
            Self::BadRequest(message) | Self::Unavailable(message) => message.clone(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::Workflow(WorkflowError::Store(source)) => {
                error!("operation failed: {source:#}");
            }
            Self::Unavailable(message) => warn!("service unavailable: {message}"),
            _ => {}
        }
        (self.status(), Json(ErrorBody::new(self.message()))).into_response()
    }
}

impl From<WorkflowError> for ApiError {
    fn from(err: WorkflowError) -> Self {
        Self::Workflow(err)
    }
}

impl From<DocumentError> for ApiError {
    fn from(err: DocumentError) -> Self {
        Self::Document(err)
    }
}

impl From<ParseEnumError> for ApiError {
    fn from(err: ParseEnumError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use atelier_core::StoreError;

    use super::*;

    #[test]
    fn workflow_errors_map_to_status_codes() {
        let cases = [
            (WorkflowError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (WorkflowError::forbidden("no"), StatusCode::FORBIDDEN),
            (WorkflowError::NotFound("contract"), StatusCode::NOT_FOUND),
            (
                WorkflowError::precondition("wrong state"),
                StatusCode::PRECONDITION_FAILED,
            ),
            (WorkflowError::validation("bad"), StatusCode::BAD_REQUEST),
            (WorkflowError::conflict("raced"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn store_failures_hide_their_details() {
        let err = ApiError::from(WorkflowError::Store(StoreError::Backend(anyhow::anyhow!(
            "connection reset by peer"
        ))));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "operation failed");
    }

    #[test]
    fn unknown_labels_are_bad_requests() {
        let err = ApiError::from(ParseEnumError::new("state", "archived"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.message(), "unknown state 'archived'");
    }
}
