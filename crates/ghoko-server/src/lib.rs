//! Ghoko Server
//!
//! The webhook gateway: HTTP requests name a script, the script runs on a
//! pooled Boa interpreter with the request's parameters, and the response is
//! either the script's own output (`sync=true`) or a correlation id.

pub mod dispatcher;
pub mod http_server;
pub mod response;
pub mod runtime;
pub mod tls;

pub use dispatcher::{ExecutionUnit, RequestDispatcher};
pub use http_server::{GatewayConfig, HttpServer};
pub use response::{BufferedResponse, DetachedResponse, ResponseWriter, ID_HEADER};
pub use runtime::{InterpreterPool, JsEngine, PoolConfig};
pub use tls::TlsConfig;
