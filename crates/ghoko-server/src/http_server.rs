//! HTTP Server for the Ghoko gateway
//!
//! Listens on a TCP socket (optionally wrapped in TLS), serves each
//! connection with hyper's HTTP/1.1 server on its own task, and hands every
//! request to the [`RequestDispatcher`]. When the shutdown future resolves the
//! accept loop stops and the interpreter pool is drained.
//!
//! # Example
//!
//! ```no_run
//! use ghoko_server::{GatewayConfig, HttpServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = HttpServer::new(GatewayConfig::new("./scripts").with_secret("s3cr3t")).unwrap();
//!     let shutdown = async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     };
//!     server.run("127.0.0.1:3080".parse().unwrap(), shutdown).await.unwrap();
//! }
//! ```

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::dispatcher::RequestDispatcher;
use crate::runtime::{CapabilityBinder, EngineFactory, InterpreterPool, JsEngine, PoolConfig};
use crate::tls::TlsConfig;
use ghoko_common::{AuthGate, GhokoError, IdGenerator, Result};

/// Everything needed to start a gateway.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Directory holding `<name>.js` scripts.
    pub script_path: PathBuf,
    /// Shared secret; empty disables authentication.
    pub secret: String,
    pub tls: Option<TlsConfig>,
    pub pool: PoolConfig,
}

impl GatewayConfig {
    pub fn new(script_path: impl Into<PathBuf>) -> Self {
        Self {
            script_path: script_path.into(),
            secret: String::new(),
            tls: None,
            pool: PoolConfig::default(),
        }
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    dispatcher: Arc<RequestDispatcher>,
    tls: Option<TlsAcceptor>,
}

impl HttpServer {
    /// Creates a server that runs scripts with the JavaScript engine.
    ///
    /// # Errors
    ///
    /// Fails when the script path is not a directory or the TLS files cannot
    /// be loaded.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        Self::with_engine(config, JsEngine::factory())
    }

    /// Creates a server whose interpreters are built by `factory`.
    pub fn with_engine(config: GatewayConfig, factory: EngineFactory) -> Result<Self> {
        Self::build(config, factory, None)
    }

    /// Like [`HttpServer::with_engine`], minting correlation ids with `idgen`.
    pub fn with_id_generator(
        config: GatewayConfig,
        factory: EngineFactory,
        idgen: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        Self::build(config, factory, Some(idgen))
    }

    fn build(config: GatewayConfig, factory: EngineFactory, idgen: Option<Arc<dyn IdGenerator>>) -> Result<Self> {
        if !config.script_path.is_dir() {
            return Err(GhokoError::ScriptNotFound(format!(
                "script path {} is not a directory",
                config.script_path.display()
            )));
        }

        let tls = config.tls.as_ref().map(TlsConfig::acceptor).transpose()?;

        let pool = InterpreterPool::new(factory, config.pool.clone());
        pool.set_on_create(CapabilityBinder::create_hook(
            config.script_path.clone(),
            config.secret.clone(),
            &pool,
        ));

        let gate = AuthGate::new(config.secret);
        info!(
            script_path = %config.script_path.display(),
            auth = %gate,
            tls = tls.is_some(),
            max_idle = config.pool.max_idle,
            "Gateway configured"
        );

        let mut dispatcher = RequestDispatcher::new(pool, gate);
        if let Some(idgen) = idgen {
            dispatcher = dispatcher.with_id_generator(idgen);
        }

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            tls,
        })
    }

    pub fn pool(&self) -> &Arc<InterpreterPool> {
        self.dispatcher.pool()
    }

    /// Binds `addr` and serves until `shutdown` resolves.
    pub async fn run<F>(self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GhokoError::Transport(format!("Failed to bind to {}: {}", addr, e)))?;
        self.serve(listener, shutdown).await
    }

    /// Serves connections from an already bound listener until `shutdown`
    /// resolves, then drains the interpreter pool.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local = listener
            .local_addr()
            .map_err(|e| GhokoError::Transport(format!("Failed to get local address: {}", e)))?;
        info!(tls = self.tls.is_some(), "HTTP server listening on {}", local);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, draining interpreter pool");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => self.spawn_connection(stream, remote),
                    Err(e) => {
                        if let Err(close_err) = self.close() {
                            error!(error = %close_err, "Interpreter pool teardown failed");
                        }
                        return Err(GhokoError::Transport(format!("Failed to accept connection: {}", e)));
                    }
                },
            }
        }

        self.close()
    }

    /// Closes every pooled interpreter.
    pub fn close(&self) -> Result<()> {
        self.pool().close_all()
    }

    fn spawn_connection(&self, stream: TcpStream, remote: SocketAddr) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let tls = self.tls.clone();

        tokio::task::spawn(async move {
            match tls {
                Some(acceptor) => match acceptor.accept(stream).await {
                    Ok(stream) => serve_connection(stream, dispatcher, remote).await,
                    Err(e) => warn!(remote = %remote, error = %e, "TLS handshake failed"),
                },
                None => serve_connection(stream, dispatcher, remote).await,
            }
        });
    }
}

async fn serve_connection<S>(stream: S, dispatcher: Arc<RequestDispatcher>, remote: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { Ok::<_, Infallible>(dispatcher.dispatch(req, remote).await) }
    });

    if let Err(err) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        error!(remote = %remote, "Error serving connection: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::testing::FakeRuntime;

    #[test]
    fn test_gateway_config_builder() {
        let config = GatewayConfig::new("/srv/hooks")
            .with_secret("s3cr3t")
            .with_pool(PoolConfig { max_idle: 2 });
        assert_eq!(config.script_path, PathBuf::from("/srv/hooks"));
        assert_eq!(config.secret, "s3cr3t");
        assert_eq!(config.pool.max_idle, 2);
        assert!(config.tls.is_none());
    }

    #[test]
    fn test_missing_script_path() {
        let runtime = FakeRuntime::new();
        let result = HttpServer::with_engine(GatewayConfig::new("/definitely/not/here"), runtime.factory());
        assert!(matches!(result, Err(GhokoError::ScriptNotFound(_))));
    }

    #[test]
    fn test_bad_tls_files() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let config = GatewayConfig::new(dir.path()).with_tls(TlsConfig::new(
            dir.path().join("cert.pem"),
            dir.path().join("key.pem"),
        ));
        assert!(matches!(
            HttpServer::with_engine(config, runtime.factory()),
            Err(GhokoError::Tls(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_drains_pool() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let server = HttpServer::with_engine(GatewayConfig::new(dir.path()), runtime.factory()).unwrap();
        drop(server.pool().acquire().unwrap());
        let pool = Arc::clone(server.pool());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        server.serve(listener, async {}).await.unwrap();

        assert!(pool.is_closed());
        assert_eq!(pool.stats().idle, 0);
    }
}
