//! Response write capabilities
//!
//! Scripts write the HTTP response through a [`ResponseWriter`]. The two
//! execution modes get structurally different writers:
//!
//! - [`BufferedResponse`] (sync): collects status and body while the script
//!   runs; the dispatcher turns it into the HTTP response afterwards.
//! - [`DetachedResponse`] (async): the response was already sent, so every
//!   write fails with `GhokoError::SyncRequired` and touches nothing.

use ghoko_common::{GhokoError, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use std::sync::Mutex;

/// Response header carrying the correlation id of a synchronous execution.
pub const ID_HEADER: &str = "Ghoko-Id";

const ID_HEADER_NAME: HeaderName = HeaderName::from_static("ghoko-id");

/// Hyper response type produced by the gateway.
pub type HyperResponse = Response<Full<Bytes>>;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Write capability handed to a script for one checkout.
pub trait ResponseWriter: Send + Sync {
    /// Appends `chunk` to the response body.
    fn write_body(&self, chunk: &str) -> Result<()>;

    /// Sets the response status. The last call wins.
    fn write_header(&self, status: u16) -> Result<()>;
}

#[derive(Debug, Default)]
struct Buffered {
    status: Option<StatusCode>,
    body: Vec<u8>,
}

/// Writer for synchronous executions.
#[derive(Debug, Default)]
pub struct BufferedResponse {
    state: Mutex<Buffered>,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Buffered> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    pub fn body(&self) -> Vec<u8> {
        self.lock().body.clone()
    }

    /// Takes the buffered output and builds the final response.
    ///
    /// Status defaults to 200. `Ghoko-Id` is always attached.
    pub fn finish(&self, id: &str) -> HyperResponse {
        let buffered = std::mem::take(&mut *self.lock());
        let mut response = Response::new(Full::new(Bytes::from(buffered.body)));
        *response.status_mut() = buffered.status.unwrap_or(StatusCode::OK);
        attach_id(&mut response, id);
        response
    }
}

impl ResponseWriter for BufferedResponse {
    fn write_body(&self, chunk: &str) -> Result<()> {
        self.lock().body.extend_from_slice(chunk.as_bytes());
        Ok(())
    }

    fn write_header(&self, status: u16) -> Result<()> {
        let status = StatusCode::from_u16(status)
            .map_err(|_| GhokoError::ScriptExecution(format!("invalid HTTP status {}", status)))?;
        self.lock().status = Some(status);
        Ok(())
    }
}

/// Writer for asynchronous executions.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedResponse;

impl ResponseWriter for DetachedResponse {
    fn write_body(&self, _chunk: &str) -> Result<()> {
        Err(GhokoError::SyncRequired)
    }

    fn write_header(&self, _status: u16) -> Result<()> {
        Err(GhokoError::SyncRequired)
    }
}

/// Plain-text response, the shape used for ids and errors.
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> HyperResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}

/// Error response whose status comes from the error and whose body is the
/// error text.
pub fn error_response(err: &GhokoError, id: Option<&str>) -> HyperResponse {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = text_response(status, format!("{}\n", err));
    if let Some(id) = id {
        attach_id(&mut response, id);
    }
    response
}

fn attach_id(response: &mut HyperResponse, id: &str) {
    if let Ok(value) = HeaderValue::from_str(id) {
        response.headers_mut().insert(ID_HEADER_NAME, value);
    }
}
