// Wire envelope: `{ success, data?|error?, message?, details? }`, mapped from the
// common `ApiError` taxonomy onto the status codes this API surface uses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::errors::ApiError;
use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(Envelope { success: true, data: Some(data), error: None, message: None, details: None }))
        .into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(Envelope { success: true, data: Some(data), error: None, message: None, details: None }),
    )
        .into_response()
}

pub struct ApiErrorResponse(pub ApiError);

impl From<ApiError> for ApiErrorResponse {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = match err.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "INSUFFICIENT_CREDITS" => StatusCode::PAYMENT_REQUIRED,
            "TIER_LIMIT_EXCEEDED" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body: Envelope<()> = Envelope {
            success: false,
            data: None,
            error: Some(err.code),
            message: Some(err.message),
            details: err.details,
        };

        (status, Json(body)).into_response()
    }
}
