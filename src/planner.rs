//! Listener mode selection.
//!
//! [`plan`] is a pure function of configuration flags; [`ListenerPlan`]
//! bundles the chosen mode with the identities it needs and cannot be
//! built in an inconsistent state.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::credentials::{OnionIdentity, TlsIdentity};

/// Onion virtual port for plain HTTP
pub const ONION_HTTP_PORT: u16 = 80;

/// Onion virtual port for HTTPS
pub const ONION_HTTPS_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    Plain,
    Tls,
    OnionPlain,
    OnionTls,
}

impl ListenerMode {
    pub fn is_onion(self) -> bool {
        matches!(self, ListenerMode::OnionPlain | ListenerMode::OnionTls)
    }

    pub fn is_tls(self) -> bool {
        matches!(self, ListenerMode::Tls | ListenerMode::OnionTls)
    }
}

impl fmt::Display for ListenerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ListenerMode::Plain => "plain",
            ListenerMode::Tls => "tls",
            ListenerMode::OnionPlain => "onion",
            ListenerMode::OnionTls => "onion+tls",
        };
        f.write_str(name)
    }
}

/// Inputs to the mode decision
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportFlags {
    pub onion_enabled: bool,
    pub single_hop: bool,
    pub tls_host_present: bool,
    pub tls_cert_present: bool,
    pub tls_key_present: bool,
}

/// Pick the listener mode. Onion always takes precedence over plain TLS;
/// `single_hop` never affects the result.
pub fn plan(flags: TransportFlags) -> ListenerMode {
    let cert_and_key = flags.tls_cert_present && flags.tls_key_present;
    match (flags.onion_enabled, cert_and_key) {
        (true, true) => ListenerMode::OnionTls,
        (true, false) => ListenerMode::OnionPlain,
        (false, true) if flags.tls_host_present => ListenerMode::Tls,
        _ => ListenerMode::Plain,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("{0} listener requires an onion identity")]
    MissingOnionIdentity(ListenerMode),
    #[error("{0} listener requires a TLS identity")]
    MissingTlsIdentity(ListenerMode),
}

/// Everything the serving subsystem needs to open its listener
#[derive(Debug, Clone)]
pub struct ListenerPlan {
    mode: ListenerMode,
    bind_addr: SocketAddr,
    onion: Option<OnionIdentity>,
    tls: Option<TlsIdentity>,
    single_hop: bool,
}

impl ListenerPlan {
    /// Build a plan, checking the mode has the identities it depends on.
    ///
    /// Onion listeners bind to loopback on the configured port; only Tor
    /// should reach them. Identities a mode does not use are dropped.
    pub fn new(
        mode: ListenerMode,
        bind_addr: SocketAddr,
        onion: Option<OnionIdentity>,
        tls: Option<TlsIdentity>,
        single_hop: bool,
    ) -> Result<Self, PlanError> {
        if mode.is_onion() && onion.is_none() {
            return Err(PlanError::MissingOnionIdentity(mode));
        }
        if mode.is_tls() && tls.is_none() {
            return Err(PlanError::MissingTlsIdentity(mode));
        }

        let bind_addr = if mode.is_onion() {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), bind_addr.port())
        } else {
            bind_addr
        };

        Ok(Self {
            mode,
            bind_addr,
            onion: onion.filter(|_| mode.is_onion()),
            tls: tls.filter(|_| mode.is_tls()),
            single_hop,
        })
    }

    pub fn mode(&self) -> ListenerMode {
        self.mode
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    pub fn onion(&self) -> Option<&OnionIdentity> {
        self.onion.as_ref()
    }

    pub fn tls(&self) -> Option<&TlsIdentity> {
        self.tls.as_ref()
    }

    pub fn single_hop(&self) -> bool {
        self.single_hop
    }

    /// Port advertised on the onion service, if any
    pub fn virtual_port(&self) -> Option<u16> {
        match self.mode {
            ListenerMode::OnionTls => Some(ONION_HTTPS_PORT),
            ListenerMode::OnionPlain => Some(ONION_HTTP_PORT),
            _ => None,
        }
    }
}
