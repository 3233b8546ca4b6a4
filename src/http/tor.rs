//! Tor control port client for publishing the onion service.
//!
//! The service lives as long as the control connection that created it, so
//! [`OnionService`] must be held for the whole serving lifetime.

use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::config::TorControlConfig;
use crate::credentials::OnionIdentity;

#[derive(Debug, thiserror::Error)]
pub enum TorError {
    #[error("Tor control connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to read control auth cookie {path}: {source}")]
    Cookie {
        path: String,
        source: std::io::Error,
    },
    #[error("Tor control authentication failed: {0}")]
    AuthFailed(String),
    #[error("Tor rejected ADD_ONION: {0}")]
    Rejected(String),
    #[error("Tor control connection closed unexpectedly")]
    Closed,
    #[error("ADD_ONION reply missing ServiceID")]
    MissingServiceId,
    #[error("Tor published {actual}.onion but the onion key derives {expected}.onion")]
    ServiceIdMismatch { expected: String, actual: String },
}

/// A published onion service, alive while this value is
#[derive(Debug)]
pub struct OnionService {
    service_id: String,
    _control: BufReader<TcpStream>,
}

impl OnionService {
    pub fn hostname(&self) -> String {
        format!("{}.onion", self.service_id)
    }
}

/// Publish `identity` on Tor, forwarding `virtual_port` to `target`.
pub async fn publish_onion_service(
    config: &TorControlConfig,
    identity: &OnionIdentity,
    virtual_port: u16,
    target: SocketAddr,
    single_hop: bool,
) -> Result<OnionService, TorError> {
    let stream = TcpStream::connect(config.addr).await?;
    let mut control = BufReader::new(stream);

    authenticate(&mut control, config).await?;

    let flags = if single_hop { " Flags=NonAnonymous" } else { "" };
    let cmd = format!(
        "ADD_ONION {}{} Port={},{}\r\n",
        identity.tor_key_blob(),
        flags,
        virtual_port,
        target
    );
    control.get_mut().write_all(cmd.as_bytes()).await?;

    let mut service_id = None;
    loop {
        let line = read_line(&mut control).await?;
        if let Some(id) = line.strip_prefix("250-ServiceID=") {
            service_id = Some(id.trim().to_string());
        } else if line.starts_with("250 ") {
            break;
        } else if !line.starts_with("250") {
            return Err(TorError::Rejected(line));
        }
    }

    let actual = service_id.ok_or(TorError::MissingServiceId)?;
    if actual != identity.service_id() {
        return Err(TorError::ServiceIdMismatch {
            expected: identity.service_id().to_string(),
            actual,
        });
    }

    tracing::info!(
        address = %identity.hostname(),
        virtual_port,
        %target,
        single_hop,
        "Published onion service"
    );

    Ok(OnionService {
        service_id: actual,
        _control: control,
    })
}

async fn authenticate(
    control: &mut BufReader<TcpStream>,
    config: &TorControlConfig,
) -> Result<(), TorError> {
    let cmd = if let Some(path) = &config.cookie {
        let cookie = tokio::fs::read(path).await.map_err(|source| TorError::Cookie {
            path: path.display().to_string(),
            source,
        })?;
        format!("AUTHENTICATE {}\r\n", hex::encode(cookie))
    } else if let Some(password) = &config.password {
        format!("AUTHENTICATE {}\r\n", quote(password))
    } else {
        "AUTHENTICATE\r\n".to_string()
    };
    control.get_mut().write_all(cmd.as_bytes()).await?;

    let line = read_line(control).await?;
    if line.starts_with("250") {
        Ok(())
    } else {
        Err(TorError::AuthFailed(line))
    }
}

fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

async fn read_line(control: &mut BufReader<TcpStream>) -> Result<String, TorError> {
    let mut line = String::new();
    if control.read_line(&mut line).await? == 0 {
        return Err(TorError::Closed);
    }
    Ok(line.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Fake control port: answers AUTHENTICATE, then ADD_ONION with `reply`.
    /// Returns the commands it received.
    async fn fake_tor(reply: Vec<String>) -> (SocketAddr, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut received = Vec::new();

            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            received.push(line.trim_end().to_string());
            stream.get_mut().write_all(b"250 OK\r\n").await.unwrap();

            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            received.push(line.trim_end().to_string());
            for r in reply {
                stream.get_mut().write_all(r.as_bytes()).await.unwrap();
            }
            received
        });
        (addr, handle)
    }

    fn control_config(addr: SocketAddr) -> TorControlConfig {
        TorControlConfig {
            addr,
            cookie: None,
            password: Some("s3cr\"et".to_string()),
        }
    }

    #[tokio::test]
    async fn publishes_with_expected_command() {
        let identity = OnionIdentity::from_seed([11u8; 32]);
        let (addr, server) = fake_tor(vec![
            format!("250-ServiceID={}\r\n", identity.service_id()),
            "250 OK\r\n".to_string(),
        ])
        .await;

        let target: SocketAddr = "127.0.0.1:8443".parse().unwrap();
        let service = publish_onion_service(&control_config(addr), &identity, 443, target, true)
            .await
            .unwrap();
        assert_eq!(service.hostname(), identity.hostname());

        let received = server.await.unwrap();
        assert_eq!(received[0], r#"AUTHENTICATE "s3cr\"et""#);
        assert_eq!(
            received[1],
            format!(
                "ADD_ONION {} Flags=NonAnonymous Port=443,127.0.0.1:8443",
                identity.tor_key_blob()
            )
        );
    }

    #[tokio::test]
    async fn mismatched_service_id_is_fatal() {
        let identity = OnionIdentity::from_seed([11u8; 32]);
        let other = OnionIdentity::from_seed([12u8; 32]);
        let (addr, _server) = fake_tor(vec![
            format!("250-ServiceID={}\r\n", other.service_id()),
            "250 OK\r\n".to_string(),
        ])
        .await;

        let target: SocketAddr = "127.0.0.1:8443".parse().unwrap();
        let result =
            publish_onion_service(&control_config(addr), &identity, 80, target, false).await;
        assert!(matches!(result, Err(TorError::ServiceIdMismatch { .. })));
    }

    #[tokio::test]
    async fn rejection_is_reported() {
        let identity = OnionIdentity::from_seed([11u8; 32]);
        let (addr, _server) =
            fake_tor(vec!["512 Bad arguments to ADD_ONION\r\n".to_string()]).await;

        let target: SocketAddr = "127.0.0.1:8443".parse().unwrap();
        let result =
            publish_onion_service(&control_config(addr), &identity, 80, target, false).await;
        assert!(matches!(result, Err(TorError::Rejected(line)) if line.starts_with("512")));
    }

    #[test]
    fn quotes_passwords() {
        assert_eq!(quote(r"a\b"), r#""a\\b""#);
    }
}
