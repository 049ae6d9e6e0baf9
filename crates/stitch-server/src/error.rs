use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use stitch_core::StitchError;

/// Unified error type for HTTP responses. Engine faults map to status codes
/// by kind; bodies carry the kind, a short message, field detail where it
/// exists, and a suggested next action. Stack traces are never serialized.
#[derive(Debug)]
pub struct ApiError(pub anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = if let Some(e) = self.0.downcast_ref::<StitchError>() {
            let status = match e {
                StitchError::ManifestInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
                StitchError::UnknownTemplate(_) => StatusCode::NOT_FOUND,
                StitchError::NameCollision(_) | StitchError::DependencyCycle(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                StitchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                StitchError::DispatchUnreachable(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let mut body = serde_json::json!({
                "error": e.to_string(),
                "kind": e.kind(),
                "suggestion": e.suggestion(),
            });
            let fields = e.field_errors();
            if !fields.is_empty() {
                body["fields"] = serde_json::to_value(fields).unwrap_or_default();
            }
            (status, body)
        } else {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "error": self.0.to_string() }),
            )
        };

        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
