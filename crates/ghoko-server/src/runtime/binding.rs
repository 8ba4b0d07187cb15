//! Capability bindings
//!
//! A binding associates a global name visible to scripts with either a
//! constant or a host callable. Every interpreter keeps its bindings in a
//! [`BindingTable`]; binding a name again replaces the previous entry.

use ghoko_common::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Host function callable from scripts. Arguments and result cross the
/// engine boundary as JSON.
pub type HostFn = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

#[derive(Clone)]
pub enum Binding {
    Constant(Value),
    Callable(HostFn),
}

impl Binding {
    pub fn constant(value: impl Into<Value>) -> Self {
        Binding::Constant(value.into())
    }

    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Binding::Callable(Arc::new(f))
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Binding::Constant(value) => Some(value),
            Binding::Callable(_) => None,
        }
    }

    /// Invokes a callable binding. Constants are not callable.
    pub fn call(&self, args: &[Value]) -> Option<Result<Value>> {
        match self {
            Binding::Constant(_) => None,
            Binding::Callable(f) => Some(f(args)),
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Binding::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Binding::Callable(_) => f.write_str("Callable(..)"),
        }
    }
}

/// Per-interpreter table of installed bindings.
#[derive(Debug, Default)]
pub struct BindingTable {
    entries: HashMap<String, Binding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `binding` under `name`, returning the binding it replaced.
    pub fn insert(&mut self, name: impl Into<String>, binding: Binding) -> Option<Binding> {
        self.entries.insert(name.into(), binding)
    }

    pub fn remove(&mut self, name: &str) -> Option<Binding> {
        self.entries.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rebinding_replaces() {
        let mut table = BindingTable::new();
        assert!(table.insert("Id", Binding::constant("first")).is_none());
        let previous = table.insert("Id", Binding::constant("second"));

        assert_eq!(previous.and_then(|b| b.as_constant().cloned()), Some(json!("first")));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("Id").and_then(Binding::as_constant), Some(&json!("second")));
    }

    #[test]
    fn test_callable_binding() {
        let binding = Binding::callable(|args| Ok(json!(args.len())));
        let result = binding.call(&[json!(1), json!(2)]).unwrap().unwrap();
        assert_eq!(result, json!(2));
        assert!(binding.as_constant().is_none());
    }

    #[test]
    fn test_constant_is_not_callable() {
        assert!(Binding::constant(1).call(&[]).is_none());
    }

    #[test]
    fn test_remove() {
        let mut table = BindingTable::new();
        table.insert("WriteBody", Binding::callable(|_| Ok(Value::Null)));
        assert!(table.remove("WriteBody").is_some());
        assert!(table.is_empty());
        assert!(table.remove("WriteBody").is_none());
    }
}
