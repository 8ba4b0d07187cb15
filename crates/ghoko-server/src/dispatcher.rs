//! Request dispatch
//!
//! Turns one HTTP request into one script execution:
//!
//! 1. only GET and POST pass the method gate
//! 2. the script name is the last path segment
//! 3. the `secret` query value is checked and then stripped
//! 4. query parameters are merged with the JSON body (POST only)
//! 5. a correlation id is minted
//! 6. `sync=true` runs the script before answering; anything else answers
//!    with the id right away and runs the script in the background

use crate::response::{
    error_response, text_response, BufferedResponse, DetachedResponse, HyperResponse, ResponseWriter,
};
use crate::runtime::{CapabilityBinder, Checkout, InterpreterPool};
use ghoko_common::auth::SECRET_PARAM;
use ghoko_common::{AuthGate, GhokoError, IdGenerator, ObjectIdGenerator, ParamCollector, Params, Result};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::{Method, Request, StatusCode};
use percent_encoding::percent_decode_str;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// Query parameter selecting synchronous execution.
pub const SYNC_PARAM: &str = "sync";

/// A validated request, ready to run.
struct Prepared {
    script: String,
    params: Params,
    sync: bool,
}

/// One script execution together with everything it needs to log itself.
pub struct ExecutionUnit {
    pub script: String,
    pub params: Params,
    pub id: String,
    pub writer: Arc<dyn ResponseWriter>,
    pub remote: SocketAddr,
    pub uri: String,
}

impl ExecutionUnit {
    /// Acquires an interpreter, binds the checkout and runs the script.
    /// The interpreter goes back to the pool however the script ends.
    pub fn run(self, pool: &Arc<InterpreterPool>) -> Result<()> {
        let result = self.execute(pool);
        match &result {
            Ok(()) => info!(
                remote = %self.remote,
                uri = %self.uri,
                id = %self.id,
                script = %self.script,
                "Success"
            ),
            Err(e) => error!(
                remote = %self.remote,
                uri = %self.uri,
                id = %self.id,
                script = %self.script,
                error = %e,
                "Script execution failed"
            ),
        }
        result
    }

    fn execute(&self, pool: &Arc<InterpreterPool>) -> Result<()> {
        let ipt = pool.acquire()?;
        CapabilityBinder::bind_checkout(&ipt, Checkout::new(self.id.clone(), Arc::clone(&self.writer)))?;
        ipt.exec(&self.script, &self.params)
    }
}

/// Validates requests and hands them to the interpreter pool.
pub struct RequestDispatcher {
    pool: Arc<InterpreterPool>,
    gate: AuthGate,
    idgen: Arc<dyn IdGenerator>,
}

impl RequestDispatcher {
    pub fn new(pool: Arc<InterpreterPool>, gate: AuthGate) -> Self {
        Self {
            pool,
            gate,
            idgen: Arc::new(ObjectIdGenerator::new()),
        }
    }

    pub fn with_id_generator(mut self, idgen: Arc<dyn IdGenerator>) -> Self {
        self.idgen = idgen;
        self
    }

    pub fn pool(&self) -> &Arc<InterpreterPool> {
        &self.pool
    }

    /// Handles one request. Every failure still produces a complete response.
    pub async fn dispatch<B>(&self, req: Request<B>, remote: SocketAddr) -> HyperResponse
    where
        B: Body,
        B::Error: Display,
    {
        let uri = req.uri().to_string();
        let prepared = match self.prepare(req).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(remote = %remote, uri = %uri, error = %e, "Request rejected");
                return error_response(&e, None);
            }
        };

        let id = self.idgen.next_id();
        if prepared.sync {
            self.run_sync(prepared, id, remote, uri).await
        } else {
            self.run_async(prepared, id, remote, uri)
        }
    }

    async fn prepare<B>(&self, req: Request<B>) -> Result<Prepared>
    where
        B: Body,
        B::Error: Display,
    {
        let method = req.method().clone();
        if method != Method::GET && method != Method::POST {
            return Err(GhokoError::MethodNotAllowed(method.to_string()));
        }

        let script = script_name(req.uri().path())?;
        let mut query = Params::from_query(req.uri().query().unwrap_or(""));
        let authorized = self.gate.verify(&query);
        query.remove(SECRET_PARAM);
        if !authorized {
            return Err(GhokoError::AccessDenied);
        }
        let sync = query.get_str(SYNC_PARAM) == Some("true");

        let body = if method == Method::POST {
            let collected = req
                .into_body()
                .collect()
                .await
                .map_err(|e| GhokoError::BodyRead(e.to_string()))?;
            Some(collected.to_bytes())
        } else {
            None
        };
        let params = ParamCollector::build(query, body.as_deref())?;

        Ok(Prepared { script, params, sync })
    }

    async fn run_sync(&self, prepared: Prepared, id: String, remote: SocketAddr, uri: String) -> HyperResponse {
        let writer = Arc::new(BufferedResponse::new());
        let unit = ExecutionUnit {
            script: prepared.script,
            params: prepared.params,
            id: id.clone(),
            writer: writer.clone(),
            remote,
            uri,
        };

        let pool = Arc::clone(&self.pool);
        match tokio::task::spawn_blocking(move || unit.run(&pool)).await {
            Ok(Ok(())) => writer.finish(&id),
            Ok(Err(e)) => error_response(&e, Some(&id)),
            Err(e) => {
                let err = GhokoError::ScriptExecution(format!("execution task failed: {}", e));
                error_response(&err, Some(&id))
            }
        }
    }

    fn run_async(&self, prepared: Prepared, id: String, remote: SocketAddr, uri: String) -> HyperResponse {
        let unit = ExecutionUnit {
            script: prepared.script,
            params: prepared.params,
            id: id.clone(),
            writer: Arc::new(DetachedResponse),
            remote,
            uri,
        };

        let pool = Arc::clone(&self.pool);
        // Detached; failures are logged by the unit itself.
        tokio::task::spawn_blocking(move || {
            let _ = unit.run(&pool);
        });

        text_response(StatusCode::OK, id)
    }
}

/// Last segment of the request path, percent-decoded.
fn script_name(path: &str) -> Result<String> {
    let segment = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    percent_decode_str(segment)
        .decode_utf8()
        .map(|name| name.into_owned())
        .map_err(|e| GhokoError::RequestParse(format!("invalid script name in {}: {}", path, e)))
}
