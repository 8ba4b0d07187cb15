//! Script parameters
//!
//! Scripts receive one flat mapping built from the query string and, for
//! POST requests, a JSON object body. Query values are strings; a key that
//! repeats becomes an array of strings. Body values keep their JSON types and
//! overwrite query values with the same key.

use crate::error::{GhokoError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Parameter map handed to a script as `Params`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params.append(key.into_owned(), value.into_owned());
        }
        params
    }

    /// Adds a query value, turning the entry into an array on repeats.
    fn append(&mut self, key: String, value: String) {
        match self.0.get_mut(&key) {
            None => {
                self.0.insert(key, Value::String(value));
            }
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }

    /// Merges a JSON object body. Body keys overwrite existing keys.
    ///
    /// An empty (or all-whitespace) body adds nothing.
    ///
    /// # Errors
    ///
    /// Returns `GhokoError::BodyDecode` for malformed JSON and for JSON that
    /// is not an object.
    pub fn add_json(&mut self, body: &[u8]) -> Result<()> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let object: Map<String, Value> = serde_json::from_slice(body).map_err(GhokoError::BodyDecode)?;
        self.0.extend(object);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// First string value for `key`, looking inside repeated query values.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.0.get(key)? {
            Value::String(s) => Some(s),
            Value::Array(values) => values.first().and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Builds the final parameter map for one request.
pub struct ParamCollector;

impl ParamCollector {
    /// Merges already-decoded query parameters with an optional POST body.
    ///
    /// `body` is `None` for GET requests, which never read a body.
    pub fn build(query: Params, body: Option<&[u8]>) -> Result<Params> {
        let mut params = query;
        if let Some(body) = body {
            params.add_json(body)?;
        }
        Ok(params)
    }
}
