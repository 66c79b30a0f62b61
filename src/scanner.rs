//! 恶意文件扫描：ClamAV REST 服务客户端。扫描失败一律视为上传失败。

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

const FOUND_STATUS: &str = "FOUND";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    Found { description: String },
}

#[derive(Debug)]
pub enum ScanError {
    /// 待扫描文件无法读取。
    Source(String),
    Transport(String),
    Status(u16),
    Decode(String),
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Source(msg) => write!(f, "scan input unreadable: {msg}"),
            ScanError::Transport(msg) => write!(f, "scanner unreachable: {msg}"),
            ScanError::Status(code) => write!(f, "scanner answered HTTP {code}"),
            ScanError::Decode(msg) => write!(f, "scanner response unreadable: {msg}"),
        }
    }
}

/// 扫描服务契约，便于测试替换。扫描对象是已落盘的文件。
pub trait MalwareScanner: Send + Sync + 'static {
    fn scan<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict, ScanError>> + Send + 'a>>;
}

#[derive(Deserialize, Default)]
struct ScanResponse {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "Description", default)]
    description: String,
}

#[derive(Debug, Clone)]
pub struct ClamAvClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ClamAvClient {
    pub fn new(endpoint: String, timeout: Duration) -> Result<Self, ScanError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ScanError::Transport(err.to_string()))?;
        Ok(Self { http, endpoint })
    }

    async fn scan_file(&self, path: &Path) -> Result<Verdict, ScanError> {
        let file = File::open(path)
            .await
            .map_err(|err| ScanError::Source(err.to_string()))?;
        let size = file
            .metadata()
            .await
            .map_err(|err| ScanError::Source(err.to_string()))?
            .len();
        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = Part::stream_with_length(body, size)
            .file_name("file.zip")
            .mime_str("application/zip")
            .map_err(|err| ScanError::Transport(err.to_string()))?;
        let response = self
            .http
            .post(&self.endpoint)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|err| ScanError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ScanError::Transport(err.to_string()))?;
        debug!(status = status.as_u16(), bytes = size, "scanner responded");
        interpret_response(status.as_u16(), &body)
    }
}

impl MalwareScanner for ClamAvClient {
    fn scan<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Verdict, ScanError>> + Send + 'a>> {
        Box::pin(self.scan_file(path))
    }
}

/// 解析扫描结果。FOUND 优先于 HTTP 状态（部分实现对感染文件返回 406）。
fn interpret_response(status: u16, body: &[u8]) -> Result<Verdict, ScanError> {
    let parsed = if body.iter().all(u8::is_ascii_whitespace) {
        Ok(ScanResponse::default())
    } else {
        serde_json::from_slice::<ScanResponse>(body)
    };

    if let Ok(response) = &parsed
        && response.status.eq_ignore_ascii_case(FOUND_STATUS)
    {
        return Ok(Verdict::Found {
            description: response.description.clone(),
        });
    }
    if !(200..300).contains(&status) {
        return Err(ScanError::Status(status));
    }
    parsed
        .map(|_| Verdict::Clean)
        .map_err(|err| ScanError::Decode(err.to_string()))
}
