//! 下载接口：按 ID 查找未过期对象并以附件形式返回。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::error::ApiError;
use crate::ident::is_well_formed;
use crate::registry::ObjectRegistry;
use crate::storage::Storage;

/// RFC 5987 attr-char 之外的字节都要编码。
const ATTR_CHAR_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'!')
    .remove(b'#')
    .remove(b'$')
    .remove(b'&')
    .remove(b'+')
    .remove(b'-')
    .remove(b'.')
    .remove(b'^')
    .remove(b'_')
    .remove(b'`')
    .remove(b'|')
    .remove(b'~');

#[derive(Deserialize)]
pub(crate) struct DownloadQuery {
    c: Option<String>,
}

/// 下载世界存档，未知或已过期的 ID 返回 404。
pub async fn download_world(
    Query(DownloadQuery { c }): Query<DownloadQuery>,
    Extension(registry): Extension<Arc<ObjectRegistry>>,
    Extension(storage): Extension<Arc<Storage>>,
) -> Result<Response, ApiError> {
    let Some(id) = c.filter(|id| is_well_formed(id)) else {
        return Err(ApiError::NotFound);
    };
    let object = registry.lookup(&id).await.ok_or(ApiError::NotFound)?;
    let (file, metadata) = storage.open_object(&id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/zip"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&object.display_name))
        .map_err(|_| ApiError::Internal("invalid content-disposition".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    info!(id, name = object.display_name, size = metadata.len(), "download world");
    Ok((
        StatusCode::OK,
        headers,
        AxumBody::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

/// ASCII 名称只带 `filename`；其他名称附加 `filename*=UTF-8''...`，
/// 同时给旧客户端一个用下划线替换的 ASCII 版本。
fn content_disposition(name: &str) -> String {
    let file_name = format!("{name}.zip");
    if file_name.is_ascii() {
        return format!("attachment; filename=\"{file_name}\"");
    }
    let fallback: String = file_name
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(&file_name, &ATTR_CHAR_ENCODE_SET)
    )
}
