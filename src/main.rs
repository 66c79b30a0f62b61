//! World relay server binary.
//!
//! Accepts Minecraft world archives over HTTP, checks their layout and scans
//! them for malware, then serves each one under a short random ID until its
//! retention period runs out. Nothing survives a restart.

mod archive;
mod atomic;
mod background;
mod config;
mod download;
mod error;
mod expiry;
mod http;
mod ident;
mod intake;
mod logging;
mod ratelimit;
mod registry;
mod router;
mod scanner;
mod status;
mod storage;
mod tls;
mod upload;

use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::io::{Error, ErrorKind};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::http::build_cors_layer;
use crate::intake::IntakePipeline;
use crate::ratelimit::RateLimiter;
use crate::registry::ObjectRegistry;
use crate::router::{AppParts, ClientAddressPolicy, build_router};
use crate::scanner::ClamAvClient;
use crate::storage::Storage;

shadow!(build);

/// Starts the relay and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let Some(scanner_endpoint) = args.scanner_endpoint() else {
        error!("no malware scanner configured, set CLAMAV_HOST or WDL_SCANNER_URL");
        return Err(Error::new(
            ErrorKind::InvalidInput,
            "malware scanner endpoint is required",
        ));
    };

    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;
    let purged = storage.purge().await?;
    if purged > 0 {
        info!(purged, dir = %args.storage_dir, "removed leftovers from previous run");
    }

    let (registry, scheduler) = ObjectRegistry::new(storage.clone());
    let limiter = Arc::new(RateLimiter::new(
        args.upload_max_per_window,
        Duration::from_secs(args.upload_window_secs),
    ));
    if args.upload_max_per_window == 0 {
        warn!("upload rate limiting is disabled");
    }
    let scanner = ClamAvClient::new(
        scanner_endpoint.clone(),
        Duration::from_secs(args.scanner_timeout_secs),
    )
    .map_err(|err| Error::new(ErrorKind::InvalidInput, err.to_string()))?;
    let intake = Arc::new(IntakePipeline::new(
        limiter.clone(),
        registry.clone(),
        storage.clone(),
        Arc::new(scanner),
        Duration::from_secs(args.object_ttl_secs),
    ));

    let mut app = build_router(AppParts {
        intake,
        registry,
        storage,
        client_policy: ClientAddressPolicy {
            trust_forwarded: args.trust_forwarded_for,
        },
        upload_max_size: usize::try_from(args.upload_max_size).unwrap_or(usize::MAX),
    });
    if let Some(cors_layer) = build_cors_layer(&args.cors_origins) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| Error::new(ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let https = match args.https_port {
        Some(port) => Some((
            SocketAddr::new(host, port),
            tls::build_rustls_config(&args, host).await?,
        )),
        None => None,
    };
    let handle = Handle::new();

    info!(
        scanner = %scanner_endpoint,
        ttl_secs = args.object_ttl_secs,
        "🚀 Starting HTTP server at {}",
        http_addr
    );
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.clone().into_make_service_with_connect_info::<SocketAddr>());

    let https_handle = handle.clone();
    let https_server = async move {
        match https {
            Some((https_addr, tls_config)) => {
                info!("🔒 Starting HTTPS server at {}", https_addr);
                axum_server::bind_rustls(https_addr, tls_config)
                    .handle(https_handle)
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
            }
            None => std::future::pending::<Result<(), Error>>().await,
        }
    };

    spawn_background_tasks(scheduler, limiter);
    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
