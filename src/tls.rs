//! HTTPS 监听所需的证书：优先使用配置的 PEM 文件，否则生成自签名证书。

use axum_server::tls_rustls::RustlsConfig;
use rcgen::generate_simple_self_signed;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};

use crate::config::Args;

pub async fn build_rustls_config(
    args: &Args,
    host: IpAddr,
) -> Result<RustlsConfig, std::io::Error> {
    let (cert_pem, key_pem) = match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => (
            fs::read(PathBuf::from(cert)).await?,
            fs::read(PathBuf::from(key)).await?,
        ),
        (Some(_), None) | (None, Some(_)) => {
            warn!("both --tls-cert and --tls-key are required, falling back to self-signed");
            self_signed_pem(host).await?
        }
        (None, None) => self_signed_pem(host).await?,
    };
    RustlsConfig::from_pem(cert_pem, key_pem).await
}

/// 生成自签名证书，同时写入临时目录便于客户端导入信任。
async fn self_signed_pem(host: IpAddr) -> Result<(Vec<u8>, Vec<u8>), std::io::Error> {
    let mut names = vec![host.to_string()];
    if host.is_unspecified() || host.is_loopback() {
        names.push("localhost".to_string());
    }
    let cert = generate_simple_self_signed(names)
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    let cert_pem = cert.cert.pem().into_bytes();
    let key_pem = cert.key_pair.serialize_pem().into_bytes();

    let cert_path = std::env::temp_dir().join("world-relay-cert.pem");
    fs::write(&cert_path, &cert_pem).await?;
    info!(path = %cert_path.display(), "generated self-signed certificate");
    Ok((cert_pem, key_pem))
}
