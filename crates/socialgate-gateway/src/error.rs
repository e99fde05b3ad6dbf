use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use socialgate_core::GatewayError;

/// Adapter turning a [`GatewayError`] into an HTTP response with a JSON
/// `{"error": "..."}` body.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(e: GatewayError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        json_error(status, &self.0.to_string())
    }
}

/// JSON error body with the given status.
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
