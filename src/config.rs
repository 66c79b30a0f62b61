//! CLI 参数与服务默认配置。

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SERVER_HEADER: &str = "WDL-Backend";
pub const OBJECT_EXTENSION: &str = "zip";
pub const OBJECT_ID_LEN: usize = 15;
pub const DEFAULT_OBJECT_TTL_SECS: u64 = 30 * 60;
pub const DEFAULT_UPLOAD_MAX_PER_WINDOW: u32 = 5;
pub const DEFAULT_UPLOAD_WINDOW_SECS: u64 = 6 * 60 * 60;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_SCANNER_TIMEOUT_SECS: u64 = 120;
pub const QUOTA_PRUNE_INTERVAL_SECS: u64 = 300;
/// 保留期、限流窗口等时长的上限（约十年）。
pub const MAX_SPAN_SECS: u64 = 10 * 365 * 24 * 60 * 60;
pub const MAX_SCANNER_TIMEOUT_SECS: u64 = 60 * 60;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "world-relay", version = VERSION_INFO, about = "World upload relay")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "WDL_STORAGE_DIR",
        default_value = "./worlds",
        help = "Directory for stored world archives (purged at startup)"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "WDL_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "WDL_HTTP_PORT",
        default_value_t = 8080,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "WDL_HTTPS_PORT",
        help = "HTTPS port (HTTPS disabled when unset)"
    )]
    pub https_port: Option<u16>,
    #[arg(short = 'c', long, env = "WDL_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "WDL_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "WDL_CORS_ORIGINS",
        default_value = "*",
        help = "Comma separated CORS origins, or * for any"
    )]
    pub cors_origins: String,
    #[arg(
        long,
        env = "CLAMAV_HOST",
        help = "host[:port] of the ClamAV REST scanner"
    )]
    pub clamav_host: Option<String>,
    #[arg(
        long,
        env = "WDL_SCANNER_URL",
        help = "Full scan endpoint URL (overrides --clamav-host)"
    )]
    pub scanner_url: Option<String>,
    #[arg(
        long,
        env = "WDL_SCANNER_TIMEOUT_SECS",
        default_value_t = DEFAULT_SCANNER_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..=MAX_SCANNER_TIMEOUT_SECS),
        help = "Scanner request timeout in seconds"
    )]
    pub scanner_timeout_secs: u64,
    #[arg(
        long,
        env = "WDL_OBJECT_TTL_SECS",
        default_value_t = DEFAULT_OBJECT_TTL_SECS,
        value_parser = clap::value_parser!(u64).range(1..=MAX_SPAN_SECS),
        help = "Lifetime of an uploaded world in seconds"
    )]
    pub object_ttl_secs: u64,
    #[arg(
        long,
        env = "WDL_UPLOAD_MAX_PER_WINDOW",
        default_value_t = DEFAULT_UPLOAD_MAX_PER_WINDOW,
        help = "Max uploads per client per window (0 to disable)"
    )]
    pub upload_max_per_window: u32,
    #[arg(
        long,
        env = "WDL_UPLOAD_WINDOW_SECS",
        default_value_t = DEFAULT_UPLOAD_WINDOW_SECS,
        value_parser = clap::value_parser!(u64).range(1..=MAX_SPAN_SECS),
        help = "Upload quota window in seconds"
    )]
    pub upload_window_secs: u64,
    #[arg(
        long,
        env = "WDL_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Max upload body size in bytes"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "WDL_TRUST_FORWARDED_FOR",
        default_value_t = false,
        help = "Use X-Forwarded-For as the client address (only behind a proxy)"
    )]
    pub trust_forwarded_for: bool,
}

impl Args {
    /// 解析扫描服务地址，未配置时返回 None。
    pub fn scanner_endpoint(&self) -> Option<String> {
        if let Some(url) = self.scanner_url.as_deref().map(str::trim)
            && !url.is_empty()
        {
            return Some(url.to_string());
        }
        self.clamav_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| format!("http://{host}/scan"))
    }
}
