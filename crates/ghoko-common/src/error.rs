use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GhokoError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Method Not Allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Request parse error: {0}")]
    RequestParse(String),

    #[error("Access Deny")]
    AccessDenied,

    #[error("Failed to read request body: {0}")]
    BodyRead(String),

    #[error("Failed to decode request body: {0}")]
    BodyDecode(#[from] serde_json::Error),

    #[error("Script execution error: {0}")]
    ScriptExecution(String),

    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("synchronous execution required (pass sync=true)")]
    SyncRequired,

    #[error("Interpreter pool is closed")]
    PoolClosed,

    #[error("Interpreter unavailable: {0}")]
    InterpreterUnavailable(String),

    #[error("Interpreter teardown failed:\n{0}")]
    Shutdown(ShutdownErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GhokoError {
    /// HTTP status used when this error terminates a request.
    pub fn status_code(&self) -> u16 {
        match self {
            GhokoError::MethodNotAllowed(_) => 405,
            GhokoError::AccessDenied => 403,
            _ => 500,
        }
    }
}

/// Teardown failures collected by `InterpreterPool::close_all`, keyed by
/// interpreter id.
#[derive(Debug, Default)]
pub struct ShutdownErrors(BTreeMap<String, GhokoError>);

impl ShutdownErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, err: GhokoError) {
        self.0.insert(id.into(), err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, id: &str) -> Option<&GhokoError> {
        self.0.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GhokoError)> {
        self.0.iter().map(|(id, err)| (id.as_str(), err))
    }

    /// `Ok(())` when nothing failed, otherwise the composite `Shutdown` error.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(GhokoError::Shutdown(self))
        }
    }
}

impl fmt::Display for ShutdownErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, err) in &self.0 {
            writeln!(f, "[{}]: {}", id, err)?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, GhokoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GhokoError::MethodNotAllowed("PUT".into()).status_code(), 405);
        assert_eq!(GhokoError::AccessDenied.status_code(), 403);
        assert_eq!(GhokoError::RequestParse("bad".into()).status_code(), 500);
        assert_eq!(GhokoError::BodyRead("eof".into()).status_code(), 500);
        assert_eq!(GhokoError::ScriptExecution("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_sync_required_message() {
        let msg = GhokoError::SyncRequired.to_string();
        assert!(msg.contains("synchronous execution required"));
    }

    #[test]
    fn test_shutdown_errors_empty_is_ok() {
        assert!(ShutdownErrors::new().into_result().is_ok());
    }

    #[test]
    fn test_shutdown_errors_display() {
        let mut errors = ShutdownErrors::new();
        errors.insert("ipt-2", GhokoError::ScriptExecution("stuck".into()));
        errors.insert("ipt-1", GhokoError::InterpreterUnavailable("ipt-1".into()));

        let text = errors.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[ipt-1]: "));
        assert!(lines[1].starts_with("[ipt-2]: "));

        match errors.into_result() {
            Err(GhokoError::Shutdown(inner)) => assert_eq!(inner.len(), 2),
            other => panic!("expected shutdown error, got {:?}", other),
        }
    }
}
