//! Graceful shutdown and signal handling.
//!
//! Handles:
//! - SIGTERM/SIGINT: stop accepting, drain connections, stop the rebuild loop
//! - SIGHUP: TLS certificate reload (TLS listeners only)

use std::path::PathBuf;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use tokio::sync::watch;

/// How long open connections get to finish after a shutdown signal
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Setup graceful shutdown on SIGTERM and SIGINT.
///
/// On either signal the listener stops accepting, existing connections get
/// [`SHUTDOWN_GRACE`] to finish, and `stop` is raised for background tasks.
pub fn setup_shutdown_handler(handle: Handle, stop: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        let _ = stop.send(true);
        handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
        tracing::info!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "Graceful shutdown initiated"
        );
    });
}

/// Setup SIGHUP handler for certificate reload.
///
/// Reloads the PEM files in place; the listener and the onion service stay up.
#[cfg(unix)]
pub fn setup_reload_handler(tls_config: RustlsConfig, cert_path: PathBuf, key_path: PathBuf) {
    tokio::spawn(async move {
        let mut sighup =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                Ok(signal) => signal,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install SIGHUP handler");
                    return;
                }
            };

        while sighup.recv().await.is_some() {
            tracing::info!("Received SIGHUP, reloading TLS certificate");

            match tls_config.reload_from_pem_file(&cert_path, &key_path).await {
                Ok(()) => {
                    tracing::info!(
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "TLS certificate reloaded"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        cert = %cert_path.display(),
                        key = %key_path.display(),
                        "Failed to reload TLS certificate, keeping the current one"
                    );
                }
            }
        }
    });
}

#[cfg(not(unix))]
pub fn setup_reload_handler(_tls_config: RustlsConfig, _cert_path: PathBuf, _key_path: PathBuf) {
    tracing::warn!("Certificate hot-reload via SIGHUP not supported on this platform");
}
