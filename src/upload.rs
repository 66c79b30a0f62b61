//! 上传接口：解析 multipart 表单，文件字段边接收边写入临时文件。

use axum::extract::connect_info::ConnectInfo;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Extension, Multipart};
use axum::http::{HeaderMap, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::http::{StatusPayload, resolve_client_ip};
use crate::intake::{IntakeError, IntakePipeline, WorldUpload};
use crate::router::ClientAddressPolicy;

/// 接收世界存档上传，成功时返回对象 ID。
pub async fn upload_world(
    Extension(intake): Extension<Arc<IntakePipeline>>,
    Extension(policy): Extension<ClientAddressPolicy>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<StatusPayload, ApiError> {
    let client = resolve_client_ip(&headers, addr.ip(), policy.trust_forwarded);
    intake.admit(client).await?;

    let mut multipart = multipart.map_err(|rejection| {
        debug!(client_ip = %client, error = %rejection, "upload is not multipart");
        ApiError::InvalidFile
    })?;

    let mut name = None;
    let mut staged = None;
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("name") => {
                name = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("file") => {
                let mut file = intake.stage(client, field.file_name()).await?;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    file.write_all(&chunk).await.map_err(IntakeError::Storage)?;
                }
                debug!(client_ip = %client, bytes = file.written(), "upload body received");
                staged = Some(file);
            }
            _ => {}
        }
    }

    let Some(staged) = staged else {
        return Err(ApiError::InvalidFile);
    };
    let object = intake
        .ingest(WorldUpload {
            client,
            name: name.unwrap_or_default(),
            staged,
        })
        .await?;

    Ok(StatusPayload::accepted(object.id))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return ApiError::PayloadTooLarge;
    }
    debug!(error = %err.body_text(), "malformed multipart body");
    ApiError::InvalidFile
}
