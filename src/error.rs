//! 统一的 API 错误类型与转换。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::http::StatusPayload;
use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    InvalidFile,
    MaliciousFile,
    RateLimited(u64),
    NotFound,
    PayloadTooLarge,
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidFile | ApiError::MaliciousFile => StatusCode::BAD_REQUEST,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ApiError::InvalidFile => "Invalid File",
            ApiError::MaliciousFile => "Malicious File",
            ApiError::RateLimited(_) => "Rate Limited",
            ApiError::NotFound => "Not Found",
            ApiError::PayloadTooLarge => "File Too Large",
            ApiError::Internal(_) => "Internal Server Error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let payload = StatusPayload::failure(self.label(), status);
        let mut headers = HeaderMap::new();
        match &self {
            ApiError::RateLimited(retry_after) => {
                if *retry_after > 0
                    && let Ok(value) = HeaderValue::from_str(&retry_after.to_string())
                {
                    headers.insert(header::RETRY_AFTER, value);
                }
            }
            ApiError::Internal(msg) => error!(error = %msg, "request failed"),
            _ => {}
        }
        (status, headers, payload).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        if error.is_not_found() {
            return ApiError::NotFound;
        }
        match error {
            StorageError::InvalidId => ApiError::NotFound,
            StorageError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::io;

    async fn render(error: ApiError) -> (StatusCode, HeaderMap, String) {
        let response = error.into_response();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        (status, headers, String::from_utf8(body.to_vec()).expect("utf8"))
    }

    #[tokio::test]
    async fn renders_documented_payloads() {
        let (status, _, body) = render(ApiError::InvalidFile).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"status":"Invalid File","code":400}"#);

        let (_, _, body) = render(ApiError::MaliciousFile).await;
        assert_eq!(body, r#"{"status":"Malicious File","code":400}"#);

        let (status, _, body) = render(ApiError::NotFound).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, r#"{"status":"Not Found","code":404}"#);
    }

    #[tokio::test]
    async fn rate_limited_carries_retry_after() {
        let (status, headers, body) = render(ApiError::RateLimited(120)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body, r#"{"status":"Rate Limited","code":429}"#);
        assert_eq!(
            headers.get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
            Some("120")
        );
    }

    #[test]
    fn storage_errors_map_to_not_found_or_internal() {
        let missing = StorageError::Io(io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(ApiError::from(missing), ApiError::NotFound));
        assert!(matches!(
            ApiError::from(StorageError::InvalidId),
            ApiError::NotFound
        ));
        let denied = StorageError::Io(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(ApiError::from(denied), ApiError::Internal(_)));
    }
}
