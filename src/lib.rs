//! reseed: a reseed server that provisions its own identities.
//!
//! Startup validates configuration, loads or creates the onion key, TLS
//! certificate and signing key, picks exactly one listener mode and hands
//! everything to the HTTP serving subsystem.

pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod error;
pub mod http;
pub mod middleware;
pub mod planner;
pub mod reseed;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use bootstrap::{Bootstrapper, Handoff, ServingSubsystem};
pub use error::BootstrapError;
