//! HTTP 辅助工具：状态响应体、CORS、客户端 IP 与通用响应头。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use axum::middleware;
use serde::Serialize;
use std::net::IpAddr;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

use crate::config::SERVER_HEADER;

/// `{"status":..,"code":..[,"id":..]}` 形式的响应体。
#[derive(Debug, Serialize)]
pub struct StatusPayload {
    status: &'static str,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
}

impl StatusPayload {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            code: StatusCode::OK.as_u16(),
            id: None,
        }
    }

    pub fn accepted(id: String) -> Self {
        Self {
            id: Some(id),
            ..Self::ok()
        }
    }

    pub fn failure(label: &'static str, status: StatusCode) -> Self {
        Self {
            status: label,
            code: status.as_u16(),
            id: None,
        }
    }
}

impl IntoResponse for StatusPayload {
    fn into_response(self) -> Response {
        JsonResponse(self).into_response()
    }
}

/// 构建 CORS Layer：`*` 允许任意来源，否则为逗号分隔的来源列表。
pub fn build_cors_layer(cors_origins: &str) -> Option<CorsLayer> {
    let cors_origins = cors_origins.trim();
    if cors_origins == "*" {
        return Some(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    let origins = cors_origins
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// 计算限流所用的客户端 IP；仅在信任代理时采用转发头。
pub fn resolve_client_ip(headers: &HeaderMap, peer: IpAddr, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded && let Some(ip) = extract_forwarded_ip(headers) {
        return ip;
    }
    peer
}

/// 添加基础安全响应头与服务标识。
pub async fn add_common_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER_HEADER));
    Ok(response)
}
