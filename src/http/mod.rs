//! HTTP serving subsystem.
//!
//! Opens exactly the listener a [`ListenerPlan`](crate::planner::ListenerPlan)
//! describes:
//! - **Plain / TLS**: bound directly on the configured address
//! - **Onion / Onion+TLS**: bound on loopback and published through the
//!   Tor control port
//!
//! The server includes:
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Certificate hot-reload via SIGHUP (TLS listeners)

mod server;
mod shutdown;
pub mod tor;

pub use server::{AxumServing, ServeError};
