//! Startup sequencing.
//!
//! validate → onion key → TLS pair → signing key → plan → hand-off.
//! Every step runs synchronously and in order; each later step depends on
//! what the earlier ones produced.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::config::{self, RawConfig, ServerConfig};
use crate::credentials::{
    load_or_create_onion_identity, load_or_create_signing_identity, load_or_create_tls_identity,
    CertificateIssuer, SigningIdentity,
};
use crate::error::BootstrapError;
use crate::http::ServeError;
use crate::planner::{plan, ListenerPlan, TransportFlags};

/// What the serving subsystem receives once credentials and plan are ready
#[derive(Debug)]
pub struct Handoff {
    pub plan: ListenerPlan,
    pub signer: SigningIdentity,
    pub data_dir: PathBuf,
}

/// Opens the planned listener and serves until shutdown.
#[async_trait]
pub trait ServingSubsystem: Send + Sync {
    async fn start_serving(&self, handoff: Handoff) -> Result<(), ServeError>;
}

pub struct Bootstrapper<I, S> {
    config: ServerConfig,
    issuer: I,
    serving: S,
}

impl<I, S> Bootstrapper<I, S>
where
    I: CertificateIssuer,
    S: ServingSubsystem,
{
    /// Validate `raw`. Nothing is read or written on failure.
    pub fn new(raw: RawConfig, issuer: I, serving: S) -> Result<Self, BootstrapError> {
        Ok(Self::with_config(config::validate(raw)?, issuer, serving))
    }

    pub fn with_config(config: ServerConfig, issuer: I, serving: S) -> Self {
        Self {
            config,
            issuer,
            serving,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Provision credentials and build the listener plan.
    pub fn prepare(&self) -> Result<Handoff, BootstrapError> {
        let config = &self.config;

        let onion = match &config.onion {
            Some(onion) => Some(load_or_create_onion_identity(&onion.key_path)?),
            None => None,
        };

        // Without an explicit TLS host, the onion address serves as one.
        let tls_target = match (&config.tls.host, &onion) {
            (Some(host), _) => Some(host.clone()),
            (None, Some(identity)) => Some(identity.hostname()),
            (None, None) => None,
        }
        .map(|host| {
            let (cert, key) = config.tls.paths_for(&host);
            (host, cert, key)
        });

        let tls = match &tls_target {
            Some((host, cert, key)) => {
                Some(load_or_create_tls_identity(host, cert, key, &self.issuer)?)
            }
            None => None,
        };

        let signer =
            load_or_create_signing_identity(&config.signing.key_path, &config.signing.label)?;

        let flags = TransportFlags {
            onion_enabled: onion.is_some(),
            single_hop: config.onion.as_ref().is_some_and(|o| o.single_hop),
            tls_host_present: tls_target.is_some(),
            tls_cert_present: tls_target.as_ref().is_some_and(|(_, cert, _)| cert.exists()),
            tls_key_present: tls_target.as_ref().is_some_and(|(_, _, key)| key.exists()),
        };
        let mode = plan(flags);

        let plan = ListenerPlan::new(mode, config.bind, onion, tls, flags.single_hop)?;
        tracing::info!(
            mode = %plan.mode(),
            bind = %plan.bind_addr(),
            onion = ?plan.onion().map(|o| o.hostname()),
            tls_host = ?plan.tls().map(|t| t.host.as_str()),
            single_hop = plan.single_hop(),
            "Listener planned"
        );

        Ok(Handoff {
            plan,
            signer,
            data_dir: config.netdb.clone(),
        })
    }

    /// Prepare, then hand off to the serving subsystem and block until it returns.
    pub async fn run(self) -> Result<(), BootstrapError> {
        let handoff = self.prepare()?;
        self.serving.start_serving(handoff).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::credentials::{CredentialError, IssuedCertificate};
    use crate::planner::ListenerMode;

    struct StubIssuer;

    impl CertificateIssuer for StubIssuer {
        fn issue_self_signed(&self, host: &str) -> Result<IssuedCertificate, CredentialError> {
            Ok(IssuedCertificate {
                cert_pem: format!("cert {host}"),
                key_pem: format!("key {host}"),
            })
        }
    }

    #[derive(Default)]
    struct RecordingServing {
        modes: Mutex<Vec<ListenerMode>>,
    }

    #[async_trait]
    impl ServingSubsystem for RecordingServing {
        async fn start_serving(&self, handoff: Handoff) -> Result<(), ServeError> {
            self.modes.lock().unwrap().push(handoff.plan.mode());
            Ok(())
        }
    }

    fn raw_in(dir: &std::path::Path) -> RawConfig {
        RawConfig {
            netdb: Some(dir.join("netDb")),
            signer: Some("me@mail.i2p".to_string()),
            key: Some(dir.join("signer.pem")),
            onion_key: Some(dir.join("onion.key")),
            ..Default::default()
        }
    }

    #[test]
    fn plain_without_tls_or_onion() {
        let dir = tempfile::tempdir().unwrap();
        let boot = Bootstrapper::new(raw_in(dir.path()), StubIssuer, RecordingServing::default())
            .unwrap();

        let handoff = boot.prepare().unwrap();
        assert_eq!(handoff.plan.mode(), ListenerMode::Plain);
        assert_eq!(handoff.data_dir, dir.path().join("netDb"));
        assert!(!dir.path().join("onion.key").exists());
    }

    #[test]
    fn tls_host_provisions_pair() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawConfig {
            tls_host: Some("reseed.example.org".to_string()),
            tls_cert: Some(dir.path().join("tls.crt")),
            tls_key: Some(dir.path().join("tls.pem")),
            ..raw_in(dir.path())
        };
        let boot = Bootstrapper::new(raw, StubIssuer, RecordingServing::default()).unwrap();

        let handoff = boot.prepare().unwrap();
        assert_eq!(handoff.plan.mode(), ListenerMode::Tls);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tls.crt")).unwrap(),
            "cert reseed.example.org"
        );
    }

    #[test]
    fn onion_uses_its_address_as_tls_host() {
        let dir = tempfile::tempdir().unwrap();
        let raw = RawConfig {
            onion: true,
            tls_cert: Some(dir.path().join("onion.crt")),
            tls_key: Some(dir.path().join("onion.pem")),
            ..raw_in(dir.path())
        };
        let boot = Bootstrapper::new(raw, StubIssuer, RecordingServing::default()).unwrap();

        let handoff = boot.prepare().unwrap();
        let onion = handoff.plan.onion().unwrap();
        let tls = handoff.plan.tls().unwrap();
        assert_eq!(handoff.plan.mode(), ListenerMode::OnionTls);
        assert_eq!(tls.host, onion.hostname());
        assert!(handoff.plan.bind_addr().ip().is_loopback());
    }

    #[tokio::test]
    async fn run_hands_plan_to_serving() {
        let dir = tempfile::tempdir().unwrap();
        let serving = RecordingServing::default();
        let boot = Bootstrapper::new(raw_in(dir.path()), StubIssuer, serving).unwrap();

        let handoff = boot.prepare().unwrap();
        boot.serving.start_serving(handoff).await.unwrap();
        assert_eq!(
            *boot.serving.modes.lock().unwrap(),
            vec![ListenerMode::Plain]
        );

        // A second run reuses everything the first one persisted
        boot.run().await.unwrap();
    }

    #[test]
    fn validation_error_is_classified() {
        let err = Bootstrapper::new(RawConfig::default(), StubIssuer, RecordingServing::default())
            .err()
            .unwrap();
        assert!(err.is_validation());
        assert_eq!(err.exit_code(), 2);
    }
}
