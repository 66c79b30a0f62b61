//! 路由装配：API 路由、请求体限制、请求日志与通用响应头。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::intake::IntakePipeline;
use crate::registry::ObjectRegistry;
use crate::storage::Storage;
use crate::{download, http, status, upload};

/// 客户端地址的取值策略。
#[derive(Clone, Copy, Debug, Default)]
pub struct ClientAddressPolicy {
    pub trust_forwarded: bool,
}

pub struct AppParts {
    pub intake: Arc<IntakePipeline>,
    pub registry: Arc<ObjectRegistry>,
    pub storage: Arc<Storage>,
    pub client_policy: ClientAddressPolicy,
    pub upload_max_size: usize,
}

pub fn build_router(parts: AppParts) -> Router {
    Router::new()
        .route("/api/v1/status", get(status::get_status))
        .route("/api/v1/version", get(status::get_version_info))
        .route(
            "/api/v1/upload",
            post(upload::upload_world).layer(DefaultBodyLimit::max(parts.upload_max_size)),
        )
        .route("/api/v1/download", get(download::download_world))
        .layer(middleware::from_fn(http::add_common_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let client_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip().to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(parts.intake))
        .layer(Extension(parts.registry))
        .layer(Extension(parts.storage))
        .layer(Extension(parts.client_policy))
}
