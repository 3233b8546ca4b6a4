//! Listener startup for each [`ListenerMode`].
//!
//! - Plain / OnionPlain: HTTP via `axum_server::bind`
//! - Tls / OnionTls: HTTPS from the provisioned PEM files
//!
//! Onion modes publish the service on Tor before serving.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::sync::watch;

use crate::bootstrap::{Handoff, ServingSubsystem};
use crate::config::{HttpConfig, ServerConfig, TorControlConfig};
use crate::credentials::TlsIdentity;
use crate::middleware::Blacklist;
use crate::planner::ListenerMode;
use crate::reseed::{LocalNetDb, Reseeder};
use crate::routes::create_router;
use crate::state::AppState;

use super::shutdown;
use super::tor::{self, TorError};

/// Server startup error
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Failed to load blacklist {path}: {source}")]
    Blacklist {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to load TLS configuration: {0}")]
    TlsConfig(String),

    #[error("Failed to publish onion service: {0}")]
    Tor(#[from] TorError),

    #[error("Server error: {0}")]
    Server(String),
}

/// The axum-based serving subsystem
#[derive(Debug, Clone)]
pub struct AxumServing {
    http: HttpConfig,
    tor: TorControlConfig,
    rebuild_interval: Duration,
}

impl AxumServing {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            http: config.http.clone(),
            tor: config.tor.clone(),
            rebuild_interval: config.rebuild_interval,
        }
    }
}

#[async_trait]
impl ServingSubsystem for AxumServing {
    /// Blocks until the server shuts down.
    async fn start_serving(&self, handoff: Handoff) -> Result<(), ServeError> {
        let Handoff {
            plan,
            signer,
            data_dir,
        } = handoff;

        let blacklist = match &self.http.blacklist {
            Some(path) => {
                let blacklist = Blacklist::load(path).map_err(|source| ServeError::Blacklist {
                    path: path.display().to_string(),
                    source,
                })?;
                tracing::info!(path = %path.display(), entries = blacklist.len(), "Loaded blacklist");
                blacklist
            }
            None => Blacklist::default(),
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let reseeder = Arc::new(Reseeder::new(Box::new(LocalNetDb::new(data_dir)), signer));
        reseeder
            .clone()
            .spawn_rebuild_loop(self.rebuild_interval, stop_rx);

        let state = AppState::new(reseeder, blacklist, self.http.trust_proxy, plan.mode());
        let app = create_router(state, self.http.prefix.as_deref());

        let handle = Handle::new();
        shutdown::setup_shutdown_handler(handle.clone(), stop_tx.clone());

        // Held until the listener returns; dropping it closes the control
        // connection and takes the onion service down.
        let _onion = match (plan.onion(), plan.virtual_port()) {
            (Some(identity), Some(virtual_port)) => Some(
                tor::publish_onion_service(
                    &self.tor,
                    identity,
                    virtual_port,
                    plan.bind_addr(),
                    plan.single_hop(),
                )
                .await?,
            ),
            _ => None,
        };

        let result = match plan.tls() {
            Some(tls) => start_tls_server(app, plan.bind_addr(), plan.mode(), tls, handle).await,
            None => start_plain_server(app, plan.bind_addr(), plan.mode(), handle).await,
        };

        let _ = stop_tx.send(true);
        result
    }
}

/// Start a plain HTTP server (no TLS).
async fn start_plain_server(
    app: Router,
    addr: SocketAddr,
    mode: ListenerMode,
    handle: Handle,
) -> Result<(), ServeError> {
    if mode == ListenerMode::Plain {
        tracing::warn!("TLS disabled - serving plain HTTP (use --tls-host for HTTPS)");
    }
    tracing::info!(%addr, %mode, "HTTP server started");

    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| ServeError::Server(e.to_string()))
}

/// Start an HTTPS server from the provisioned certificate files.
async fn start_tls_server(
    app: Router,
    addr: SocketAddr,
    mode: ListenerMode,
    tls: &TlsIdentity,
    handle: Handle,
) -> Result<(), ServeError> {
    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| ServeError::TlsConfig(format!("Failed to load certificates: {}", e)))?;

    shutdown::setup_reload_handler(
        rustls_config.clone(),
        tls.cert_path.clone(),
        tls.key_path.clone(),
    );

    tracing::info!(
        %addr,
        %mode,
        host = %tls.host,
        cert = %tls.cert_path.display(),
        "HTTPS server started"
    );

    axum_server::bind_rustls(addr, rustls_config)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| ServeError::Server(e.to_string()))
}
