use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use std::fmt::Display;

pub type HttpResponse = Response;

#[derive(Debug, Serialize, PartialEq)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
}

pub(crate) fn json_error(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> HttpResponse {
    (status, Json(HttpErrorEnvelope { code: code.into(), message: message.into() })).into_response()
}

pub fn internal_error(err: impl Display) -> HttpResponse {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", err.to_string())
}

pub fn bad_request(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
}

pub fn not_found(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn conflict(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::CONFLICT, "CONFLICT", message)
}

pub fn bad_gateway(message: impl Into<String>) -> HttpResponse {
    json_error(StatusCode::BAD_GATEWAY, "DEVICE_UNREACHABLE", message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn assert_error_response(response: Response, expected_status: StatusCode, expected_code: &str, expected_message: &str) {
        assert_eq!(response.status(), expected_status);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body should be readable");
        let parsed: HttpErrorEnvelope = serde_json::from_slice(&body).expect("response body should be valid error json");
        assert_eq!(parsed.code, expected_code);
        assert_eq!(parsed.message, expected_message);
    }

    #[tokio::test]
    async fn not_found_sets_not_found_contract() {
        let response = not_found("device not registered");
        assert_error_response(response, StatusCode::NOT_FOUND, "NOT_FOUND", "device not registered").await;
    }

    #[tokio::test]
    async fn conflict_sets_conflict_contract() {
        let response = conflict("a command is already outstanding for this device");
        assert_error_response(response, StatusCode::CONFLICT, "CONFLICT", "a command is already outstanding for this device").await;
    }
}
