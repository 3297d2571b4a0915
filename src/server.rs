//! The runnable demo harness: assembles one [`FailoverInstance`] from a
//! config file and serves it with `hyper`, standing in for the host
//! framework this core is designed to be embedded in. Not part of the hard
//! core — a thin shell so the crate runs end to end.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::RouteConfig;
use crate::engine;
use crate::instance::FailoverInstance;
use crate::registry::ProxyRegistry;
use crate::replacer::EnvReplacer;
use crate::status;

pub struct BootstrapArgs {
    pub config_path: std::path::PathBuf,
    pub listen: String,
}

/// Install `tracing` + `tracing-subscriber` with an env-filter and a
/// non-blocking writer.
pub fn init_tracing() {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_target(false)
                .with_ansi(false),
        )
        .init();

    // Leaked deliberately: the guard must outlive the process for buffered
    // lines to flush, and this is only ever called once from `main`.
    std::mem::forget(guard);
}

/// Load config, provision and start one instance, register it, and serve
/// it until ctrl-c.
pub async fn run(args: BootstrapArgs) -> Result<()> {
    let config = RouteConfig::load(&args.config_path)?;
    let registry = Arc::new(ProxyRegistry::new());

    let instance = Arc::new(FailoverInstance::provision(config, &EnvReplacer, None)?);
    instance.start();
    registry.register(instance.registration_path(), instance.clone());

    let shutdown = Arc::new(Notify::new());
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_signal.notify_one();
    });

    let result = run_proxy_server(&args.listen, instance.clone(), registry, shutdown).await;
    instance.cleanup().await;
    result
}

async fn run_proxy_server(
    listen: &str,
    instance: Arc<FailoverInstance>,
    registry: Arc<ProxyRegistry>,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "server: listening");

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            _ = shutdown.notified() => {
                info!("server: shutting down, no longer accepting connections");
                break;
            }
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(err) => {
                error!(error = %err, "server: accept failed");
                continue;
            }
        };

        let instance = instance.clone();
        let registry = registry.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let instance = instance.clone();
                let registry = registry.clone();
                async move { route_request(req, instance, registry, peer_addr).await }
            });

            if let Err(err) = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .http2()
                .serve_connection_with_upgrades(io, svc)
                .await
            {
                if !err.to_string().contains("connection closed") {
                    error!(peer = %peer_addr, error = %err, "server: connection error");
                }
            }
        });
    }

    Ok(())
}

async fn route_request(
    req: Request<Incoming>,
    instance: Arc<FailoverInstance>,
    registry: Arc<ProxyRegistry>,
    peer_addr: SocketAddr,
) -> Result<hyper::Response<engine::EngineBody>, hyper::Error> {
    if req.uri().path() == instance.registration_path() {
        return status::handle_status(req, &registry).await;
    }
    engine::handle_request(&instance, req, peer_addr, false).await
}
