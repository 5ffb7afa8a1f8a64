use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::error::{LookupError, NodeError, RewardsError};
use crate::service::ServiceError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl ApiError {
    /// Stable machine-readable kind, distinguishable by consumers.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Service(err) => match err {
                ServiceError::Node(_) => "node_error",
                ServiceError::Resolution(_) => "resolution_error",
                ServiceError::Classification(_) => "classification_error",
                ServiceError::Rewards(RewardsError::Source(_)) => "source_error",
                ServiceError::Rewards(RewardsError::Resolution { .. }) => "resolution_error",
                ServiceError::Rewards(RewardsError::Classification { .. }) => {
                    "classification_error"
                }
                ServiceError::Rewards(RewardsError::Overflow { .. }) => "overflow_error",
            },
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Service(err) => match err {
                ServiceError::Node(node) => node_status(node),
                ServiceError::Resolution(err) => match &err.source {
                    LookupError::UnknownHeight(_) => StatusCode::NOT_FOUND,
                    LookupError::Node(node) => node_status(node),
                },
                ServiceError::Classification(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ServiceError::Rewards(RewardsError::Source(err)) => node_status(&err.source),
                ServiceError::Rewards(RewardsError::Resolution { .. }) => StatusCode::BAD_GATEWAY,
                ServiceError::Rewards(
                    RewardsError::Classification { .. } | RewardsError::Overflow { .. },
                ) => StatusCode::UNPROCESSABLE_ENTITY,
            },
        }
    }
}

fn node_status(err: &NodeError) -> StatusCode {
    match err {
        NodeError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "request failed");
        }
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    #[test]
    fn reward_failures_map_to_distinct_codes() {
        let overflow = ApiError::from(ServiceError::from(RewardsError::Overflow {
            year: 2023,
            month: 8,
        }));
        assert_eq!(overflow.code(), "overflow_error");
        assert_eq!(overflow.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

        let capped = ApiError::from(ServiceError::from(RewardsError::Source(SourceError {
            address: "addr".to_string(),
            source: NodeError::PageLimit {
                path: "query/accounttxs".to_string(),
                pages: 10_000,
            },
        })));
        assert_eq!(capped.code(), "source_error");
        assert_eq!(capped.status_code(), StatusCode::BAD_GATEWAY);
    }
}
