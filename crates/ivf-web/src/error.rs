//! 错误到 HTTP 响应的映射

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ivf_core::{FieldError, IvfError};
use serde_json::json;
use tracing::{error, warn};

/// HTTP 层错误
#[derive(Debug)]
pub struct ApiError(pub IvfError);

impl From<IvfError> for ApiError {
    fn from(error: IvfError) -> Self {
        Self(error)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            IvfError::Validation(_) => StatusCode::BAD_REQUEST,
            IvfError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            IvfError::NotFound(_) => StatusCode::NOT_FOUND,
            IvfError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            IvfError::Conflict(_) => StatusCode::CONFLICT,
            IvfError::Inference(_)
            | IvfError::Database(_)
            | IvfError::Config(_)
            | IvfError::Internal(_)
            | IvfError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 服务端故障只记录日志，不把内部信息返回给调用方
    fn public_details(&self) -> Vec<FieldError> {
        match &self.0 {
            IvfError::Inference(_) => vec![FieldError::new(
                "details",
                "The prediction could not be computed. Please try again later.",
            )],
            e if e.is_server_fault() => {
                vec![FieldError::new("details", "A server error occurred.")]
            }
            IvfError::Conflict(_) => vec![FieldError::new(
                "details",
                "The request conflicts with an existing record.",
            )],
            e => e.details(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_server_fault() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self.0);
        }

        let body = json!({
            "kind": self.0.kind(),
            "detail": self.public_details(),
        });

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (IvfError::invalid("x"), StatusCode::BAD_REQUEST),
            (IvfError::PermissionDenied("x".into()), StatusCode::FORBIDDEN),
            (IvfError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (IvfError::Inference("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (IvfError::Unauthenticated("x".into()), StatusCode::UNAUTHORIZED),
            (IvfError::Conflict("x".into()), StatusCode::CONFLICT),
            (IvfError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError(error).status(), status);
        }
    }

    #[test]
    fn test_server_fault_details_are_hidden() {
        let details = ApiError(IvfError::Database("password=secret".into())).public_details();
        assert_eq!(details[0].message, "A server error occurred.");

        let details = ApiError(IvfError::validation("AMH", "bad")).public_details();
        assert_eq!(details[0].field, "AMH");
    }
}
