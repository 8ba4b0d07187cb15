//! # Ghoko CLI Entry Point
//!
//! Starts the webhook gateway. Every request names a script in the script
//! directory; see the server crate for the request format.
//!
//! ## Usage
//!
//! ```bash
//! # Serve ./scripts on 0.0.0.0:3080 without authentication
//! ghoko
//!
//! # Require ?secret=s3cr3t and serve over TLS
//! ghoko -s /srv/hooks --secret s3cr3t --tls-cert cert.pem --tls-key key.pem
//!
//! # Secret from the environment
//! GHOKO_SECRET=s3cr3t ghoko -a 127.0.0.1:8080
//! ```

use anyhow::{anyhow, Result};
use argh::FromArgs;
use ghoko_common::GhokoError;
use ghoko_server::{GatewayConfig, HttpServer, PoolConfig, TlsConfig};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Environment variable read when `--secret` is not given.
const SECRET_ENV: &str = "GHOKO_SECRET";

#[derive(FromArgs, Debug)]
/// ghoko - run scripts from webhooks
struct Cli {
    /// address to listen on
    #[argh(option, short = 'a', default = "default_addr()")]
    addr: SocketAddr,

    /// directory holding the `<name>.js` scripts
    #[argh(option, short = 's', default = "PathBuf::from(\"./scripts\")")]
    script_path: PathBuf,

    /// shared secret expected in the `secret` query parameter
    ///
    /// Falls back to the GHOKO_SECRET environment variable. Empty disables
    /// authentication.
    #[argh(option)]
    secret: Option<String>,

    /// PEM certificate chain; requires --tls-key
    #[argh(option)]
    tls_cert: Option<PathBuf>,

    /// PEM private key; requires --tls-cert
    #[argh(option)]
    tls_key: Option<PathBuf>,

    /// number of idle interpreters kept for reuse
    #[argh(option, default = "PoolConfig::default().max_idle")]
    max_idle: usize,
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3080))
}

/// Builds the gateway configuration from parsed flags.
fn gateway_config(cli: &Cli, env_secret: Option<String>) -> Result<GatewayConfig> {
    let secret = cli.secret.clone().or(env_secret).unwrap_or_default();

    let mut config = GatewayConfig::new(&cli.script_path)
        .with_secret(secret)
        .with_pool(PoolConfig { max_idle: cli.max_idle });

    match (&cli.tls_cert, &cli.tls_key) {
        (Some(cert), Some(key)) => config = config.with_tls(TlsConfig::new(cert, key)),
        (None, None) => {}
        _ => return Err(anyhow!("--tls-cert and --tls-key must be given together")),
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Set default log level to INFO, but allow RUST_LOG env var to override
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = gateway_config(&cli, std::env::var(SECRET_ENV).ok())?;
    tracing::info!("Starting Ghoko gateway on {}", cli.addr);

    let server = HttpServer::new(config)?;
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    match server.run(cli.addr, shutdown).await {
        Ok(()) => {
            tracing::info!("Gateway stopped");
            Ok(())
        }
        Err(GhokoError::Shutdown(errors)) => {
            for (id, err) in errors.iter() {
                tracing::error!(interpreter = %id, "Teardown failed: {}", err);
            }
            Err(anyhow!("{} interpreter(s) failed to shut down", errors.len()))
        }
        Err(e) => Err(e.into()),
    }
}
