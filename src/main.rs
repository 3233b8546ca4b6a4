//! reseed: serve netDb reseed bundles over HTTP, HTTPS or a Tor onion service.
//!
//! Parses flags (optionally layered over a TOML file), initializes tracing,
//! runs the bootstrap sequence and decides the process exit status.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reseed::config::{
    RawConfig, DEFAULT_BIND, DEFAULT_LOG_FILTER, DEFAULT_LOG_FORMAT, DEFAULT_ONION_KEY_PATH,
    DEFAULT_REBUILD_INTERVAL, DEFAULT_TOR_CONTROL,
};
use reseed::credentials::SelfSignedIssuer;
use reseed::http::AxumServing;
use reseed::telemetry::spawn_stats_reporter;
use reseed::{BootstrapError, Bootstrapper};

/// Start a reseed server
#[derive(Parser, Debug)]
#[command(name = "reseed", version, about)]
struct Args {
    /// Optional TOML file; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the netDb directory containing routerInfos
    #[arg(long)]
    netdb: Option<PathBuf>,

    /// Signing ID (ex. something@mail.i2p)
    #[arg(long)]
    signer: Option<String>,

    /// Path to the signing private key (default: <signer>.pem)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Public hostname used on the TLS certificate
    #[arg(long)]
    tls_host: Option<String>,

    /// Path to a TLS certificate (default: <tls-host>.crt)
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// Path to a TLS private key (default: <tls-host>.pem)
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Present an onion v3 address
    #[arg(long)]
    onion: bool,

    /// Use a faster, but non-anonymous single-hop onion
    #[arg(long)]
    single_onion: bool,

    #[arg(long, help = format!("Path to the onion service private key [default: {DEFAULT_ONION_KEY_PATH}]"))]
    onion_key: Option<PathBuf>,

    /// IP address to listen on
    #[arg(long)]
    ip: Option<String>,

    #[arg(long, help = format!("Port to listen on [default bind: {DEFAULT_BIND}]"))]
    port: Option<u16>,

    #[arg(long, help = format!("Duration between reseed rebuilds, ex. 12h, 15m [default: {DEFAULT_REBUILD_INTERVAL}]"))]
    interval: Option<String>,

    /// Path prefix for the HTTP(S) server (ex. /netdb)
    #[arg(long)]
    prefix: Option<String>,

    /// Trust the X-Forwarded-For header (ex. behind a reverse proxy)
    #[arg(long)]
    trust_proxy: bool,

    /// Path to a file listing IPs to deny
    #[arg(long)]
    blacklist: Option<PathBuf>,

    /// Periodically log memory stats (ex. 10m; 0 disables)
    #[arg(long)]
    stats: Option<String>,

    #[arg(long, help = format!("Tor control port address [default: {DEFAULT_TOR_CONTROL}]"))]
    tor_control: Option<String>,

    /// Tor control auth cookie file
    #[arg(long)]
    tor_cookie: Option<PathBuf>,

    /// Tor control password
    #[arg(long)]
    tor_password: Option<String>,

    /// Log level filter (e.g., "reseed=debug,tower_http=info")
    #[arg(short, long)]
    log_level: Option<String>,

    #[arg(long, help = format!("Log format: text or json [default: {DEFAULT_LOG_FORMAT}]"))]
    log_format: Option<String>,
}

impl Args {
    fn into_raw(self) -> RawConfig {
        RawConfig {
            netdb: self.netdb,
            signer: self.signer,
            key: self.key,
            tls_host: self.tls_host,
            tls_cert: self.tls_cert,
            tls_key: self.tls_key,
            onion: self.onion,
            single_onion: self.single_onion,
            onion_key: self.onion_key,
            ip: self.ip,
            port: self.port,
            interval: self.interval,
            prefix: self.prefix,
            trust_proxy: self.trust_proxy,
            blacklist: self.blacklist,
            stats: self.stats,
            tor_control: self.tor_control,
            tor_cookie: self.tor_cookie,
            tor_password: self.tor_password,
            log_format: self.log_format,
        }
    }
}

fn init_tracing(filter: &str, format: &str) {
    let registry = tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(filter));
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_raw(args: Args) -> Result<RawConfig, BootstrapError> {
    let config_path = args.config.clone();
    let cli = args.into_raw();
    Ok(match config_path {
        Some(path) => cli.overlay(RawConfig::load(path)?),
        None => cli,
    })
}

async fn run(raw: RawConfig) -> Result<(), BootstrapError> {
    let config = reseed::config::validate(raw)?;
    let serving = AxumServing::from_config(&config);
    let boot = Bootstrapper::with_config(config, SelfSignedIssuer, serving);

    // Lives until the process exits
    let (_stats_stop, stats_rx) = watch::channel(false);
    if let Some(interval) = boot.config().stats_interval {
        spawn_stats_reporter(interval, stats_rx);
    }

    boot.run().await
}

fn exit_with(e: BootstrapError) -> ! {
    if e.is_validation() {
        eprintln!("{}", e);
    } else {
        tracing::error!(error = %e, "reseed server stopped");
    }
    std::process::exit(e.exit_code());
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Priority: CLI > env > default
    let log_filter = args
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    let raw = load_raw(args).unwrap_or_else(|e| exit_with(e));

    let log_format = raw
        .log_format
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FORMAT.to_string());
    init_tracing(&log_filter, &log_format);

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls crypto provider already installed");
    }

    if let Err(e) = run(raw).await {
        exit_with(e);
    }
}
