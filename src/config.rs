//! Configuration loading, validation and constants.
//!
//! Operator input arrives as a [`RawConfig`] (CLI flags layered over an
//! optional TOML file). [`validate`] turns it into an immutable
//! [`ServerConfig`], filling in every default path and parsing durations.
//! Validation never writes to the filesystem.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use const_format::formatcp;
use serde::Deserialize;

// =============================================================================
// Defaults
// =============================================================================

/// Default path of the persisted onion service key
pub const DEFAULT_ONION_KEY_PATH: &str = "onion.key";

/// Default listen IP
pub const DEFAULT_IP: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8443;

/// Default bind address, used in help text
pub const DEFAULT_BIND: &str = formatcp!("{}:{}", DEFAULT_IP, DEFAULT_PORT);

/// Default duration between packaging rebuilds
pub const DEFAULT_REBUILD_INTERVAL: &str = "90h";

/// Default Tor control port address
pub const DEFAULT_TOR_CONTROL: &str = "127.0.0.1:9051";

/// Extension of certificate files derived from a TLS host name
pub const TLS_CERT_EXTENSION: &str = "crt";

/// Extension of private key files (TLS and signing)
pub const PRIVATE_KEY_EXTENSION: &str = "pem";

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "reseed=info,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

// =============================================================================
// Raw input
// =============================================================================

/// Unvalidated configuration bag, as read from the CLI and/or a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RawConfig {
    pub netdb: Option<PathBuf>,
    pub signer: Option<String>,
    pub key: Option<PathBuf>,
    pub tls_host: Option<String>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub onion: bool,
    pub single_onion: bool,
    pub onion_key: Option<PathBuf>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub interval: Option<String>,
    pub prefix: Option<String>,
    pub trust_proxy: bool,
    pub blacklist: Option<PathBuf>,
    pub stats: Option<String>,
    pub tor_control: Option<String>,
    pub tor_cookie: Option<PathBuf>,
    pub tor_password: Option<String>,
    pub log_format: Option<String>,
}

impl RawConfig {
    /// Read a TOML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Layer `self` over `base`: any value set here wins.
    pub fn overlay(self, base: RawConfig) -> RawConfig {
        RawConfig {
            netdb: self.netdb.or(base.netdb),
            signer: self.signer.or(base.signer),
            key: self.key.or(base.key),
            tls_host: self.tls_host.or(base.tls_host),
            tls_cert: self.tls_cert.or(base.tls_cert),
            tls_key: self.tls_key.or(base.tls_key),
            onion: self.onion || base.onion,
            single_onion: self.single_onion || base.single_onion,
            onion_key: self.onion_key.or(base.onion_key),
            ip: self.ip.or(base.ip),
            port: self.port.or(base.port),
            interval: self.interval.or(base.interval),
            prefix: self.prefix.or(base.prefix),
            trust_proxy: self.trust_proxy || base.trust_proxy,
            blacklist: self.blacklist.or(base.blacklist),
            stats: self.stats.or(base.stats),
            tor_control: self.tor_control.or(base.tor_control),
            tor_cookie: self.tor_cookie.or(base.tor_cookie),
            tor_password: self.tor_password.or(base.tor_password),
            log_format: self.log_format.or(base.log_format),
        }
    }
}

// =============================================================================
// Validated configuration
// =============================================================================

/// Validated, immutable server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory scanned by the packaging engine
    pub netdb: PathBuf,
    pub signing: SigningConfig,
    pub tls: TlsConfig,
    pub onion: Option<OnionConfig>,
    pub bind: SocketAddr,
    /// Duration between packaging rebuilds
    pub rebuild_interval: Duration,
    pub http: HttpConfig,
    /// Telemetry interval; `None` when disabled
    pub stats_interval: Option<Duration>,
    pub tor: TorControlConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub label: String,
    pub key_path: PathBuf,
}

/// TLS settings. `cert_path`/`key_path` are always resolved when `host` is set;
/// without a host they hold only explicit operator overrides.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub host: Option<String>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    /// Resolve cert and key paths for `host`, keeping explicit overrides.
    pub fn paths_for(&self, host: &str) -> (PathBuf, PathBuf) {
        let cert = self
            .cert_path
            .clone()
            .unwrap_or_else(|| default_tls_path(host, TLS_CERT_EXTENSION));
        let key = self
            .key_path
            .clone()
            .unwrap_or_else(|| default_tls_path(host, PRIVATE_KEY_EXTENSION));
        (cert, key)
    }
}

#[derive(Debug, Clone)]
pub struct OnionConfig {
    pub key_path: PathBuf,
    /// Non-anonymous single-hop service
    pub single_hop: bool,
}

/// Pass-through settings for the router
#[derive(Debug, Clone, Default)]
pub struct HttpConfig {
    pub prefix: Option<String>,
    pub trust_proxy: bool,
    pub blacklist: Option<PathBuf>,
}

#[derive(Clone)]
pub struct TorControlConfig {
    pub addr: SocketAddr,
    pub cookie: Option<PathBuf>,
    pub password: Option<String>,
}

impl fmt::Debug for TorControlConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TorControlConfig")
            .field("addr", &self.addr)
            .field("cookie", &self.cookie)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

/// Validate a raw configuration bag and compute all defaults.
pub fn validate(raw: RawConfig) -> Result<ServerConfig, ConfigError> {
    let netdb = raw
        .netdb
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(ConfigError::MissingRequiredField("netdb"))?;
    let label = raw
        .signer
        .filter(|s| !s.trim().is_empty())
        .ok_or(ConfigError::MissingRequiredField("signer"))?;

    let interval_str = raw.interval.as_deref().unwrap_or(DEFAULT_REBUILD_INTERVAL);
    let rebuild_interval = parse_duration(interval_str)?;
    if rebuild_interval.is_zero() {
        return Err(ConfigError::InvalidDuration(interval_str.to_string()));
    }
    let stats_interval = match raw.stats.as_deref() {
        Some(s) => Some(parse_duration(s)?).filter(|d| !d.is_zero()),
        None => None,
    };

    let ip_str = raw.ip.as_deref().unwrap_or(DEFAULT_IP);
    let ip: IpAddr = ip_str
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(ip_str.to_string()))?;
    let bind = SocketAddr::new(ip, raw.port.unwrap_or(DEFAULT_PORT));

    let tor_addr_str = raw.tor_control.as_deref().unwrap_or(DEFAULT_TOR_CONTROL);
    let tor_addr: SocketAddr = tor_addr_str
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(tor_addr_str.to_string()))?;

    let signing = SigningConfig {
        key_path: raw.key.unwrap_or_else(|| {
            PathBuf::from(format!("{}.{}", signer_file(&label), PRIVATE_KEY_EXTENSION))
        }),
        label,
    };

    let mut tls = TlsConfig {
        host: raw.tls_host.filter(|h| !h.trim().is_empty()),
        cert_path: raw.tls_cert,
        key_path: raw.tls_key,
    };
    if let Some(host) = tls.host.clone() {
        let (cert, key) = tls.paths_for(&host);
        tls.cert_path = Some(cert);
        tls.key_path = Some(key);
    }

    let onion = raw.onion.then(|| OnionConfig {
        key_path: raw
            .onion_key
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ONION_KEY_PATH)),
        single_hop: raw.single_onion,
    });

    let format = raw
        .log_format
        .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string());
    if format != "text" && format != "json" {
        return Err(ConfigError::Validation(format!(
            "unknown log format '{}' (expected text or json)",
            format
        )));
    }

    Ok(ServerConfig {
        netdb,
        signing,
        tls,
        onion,
        bind,
        rebuild_interval,
        http: HttpConfig {
            prefix: raw.prefix.filter(|p| !p.is_empty() && p != "/"),
            trust_proxy: raw.trust_proxy,
            blacklist: raw.blacklist,
        },
        stats_interval,
        tor: TorControlConfig {
            addr: tor_addr,
            cookie: raw.tor_cookie,
            password: raw.tor_password,
        },
        logging: LoggingConfig { format },
    })
}

/// Filesystem-safe file stem for a signer label (`me@mail.i2p` -> `me_at_mail.i2p`).
pub fn signer_file(label: &str) -> String {
    label
        .replace('@', "_at_")
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

fn default_tls_path(host: &str, extension: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", host, extension))
}

/// Parse a duration such as `90h`, `1h30m`, `1.5h` or `300ms`.
///
/// Units: `ns`, `us` (`µs`), `ms`, `s`, `m`, `h`. A bare `0` is accepted.
/// Negative durations are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidDuration(input.to_string());

    let mut s = input.strip_prefix('+').unwrap_or(input);
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    while !s.is_empty() {
        let int_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (int_part, rest) = s.split_at(int_end);
        let (frac_part, rest) = match rest.strip_prefix('.') {
            Some(r) => r.split_at(r.find(|c: char| !c.is_ascii_digit()).unwrap_or(r.len())),
            None => ("", rest),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let (unit, rest) = rest.split_at(unit_end);
        let scale = unit_nanos(unit).ok_or_else(invalid)?;

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| invalid())?
        };
        let mut value = whole.checked_mul(scale).ok_or_else(invalid)?;

        let mut frac: u128 = 0;
        let mut divisor: u128 = 1;
        for digit in frac_part.bytes().take(18) {
            frac = frac * 10 + u128::from(digit - b'0');
            divisor *= 10;
        }
        value = value
            .checked_add(frac * scale / divisor)
            .ok_or_else(invalid)?;

        total = total.checked_add(value).ok_or_else(invalid)?;
        s = rest;
    }

    let secs = u64::try_from(total / 1_000_000_000).map_err(|_| invalid())?;
    Ok(Duration::new(secs, (total % 1_000_000_000) as u32))
}

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" | "μs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3600 * 1_000_000_000),
        _ => None,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("--{0} is required")]
    MissingRequiredField(&'static str),
    #[error("'{0}' is not a valid time interval")]
    InvalidDuration(String),
    #[error("'{0}' is not a valid address")]
    InvalidAddress(String),
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
