//! Capability binding
//!
//! Two tiers of script-visible globals:
//!
//! - instance lifetime, bound once by the pool's creation hook: `Secret` and
//!   `Call`. These are read-only to scripts.
//! - per checkout, bound right before each execution and removed on release:
//!   `Id`, `WriteBody` and `WriteHeader`
//!
//! Binding a per-checkout name again replaces it.

use crate::runtime::binding::Binding;
use crate::runtime::interpreter::{current_checkout, Checkout, CheckoutSlot, Interpreter};
use crate::runtime::pool::{CreateHook, InterpreterPool};
use ghoko_common::{GhokoError, Params, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

pub struct CapabilityBinder;

impl CapabilityBinder {
    pub const SECRET: &'static str = "Secret";
    pub const CALL: &'static str = "Call";
    pub const ID: &'static str = "Id";
    pub const WRITE_BODY: &'static str = "WriteBody";
    pub const WRITE_HEADER: &'static str = "WriteHeader";

    /// Names that only live for one checkout.
    pub const PER_CHECKOUT: [&'static str; 3] = [Self::ID, Self::WRITE_BODY, Self::WRITE_HEADER];

    /// Creation hook that points new interpreters at `script_path` and binds
    /// the instance-lifetime capabilities.
    pub fn create_hook(script_path: PathBuf, secret: String, pool: &Arc<InterpreterPool>) -> CreateHook {
        let pool = Arc::downgrade(pool);
        Arc::new(move |ipt| Self::bind_instance(ipt, &script_path, &secret, pool.clone()))
    }

    pub fn bind_instance(
        ipt: &Interpreter,
        script_path: &Path,
        secret: &str,
        pool: Weak<InterpreterPool>,
    ) -> Result<()> {
        ipt.init(script_path)?;
        ipt.bind_fixed(Self::SECRET, Binding::constant(secret))?;

        let slot = ipt.checkout_slot();
        ipt.bind_fixed(
            Self::CALL,
            Binding::callable(move |args| call_script(&pool, &slot, args)),
        )
    }

    /// Binds the request identity and write capability for one checkout.
    pub fn bind_checkout(ipt: &Interpreter, checkout: Checkout) -> Result<()> {
        ipt.bind(Self::ID, Binding::constant(checkout.id.clone()))?;

        let writer = Arc::clone(&checkout.writer);
        ipt.bind(
            Self::WRITE_BODY,
            Binding::callable(move |args| {
                writer.write_body(&body_text(args))?;
                Ok(Value::Null)
            }),
        )?;

        let writer = Arc::clone(&checkout.writer);
        ipt.bind(
            Self::WRITE_HEADER,
            Binding::callable(move |args| {
                writer.write_header(status_arg(args)?)?;
                Ok(Value::Null)
            }),
        )?;

        ipt.set_checkout(checkout);
        Ok(())
    }

    /// Drops the checkout and its bindings so the next request cannot see them.
    pub fn clear_checkout(ipt: &Interpreter) -> Result<()> {
        ipt.clear_checkout();
        ipt.unbind(&Self::PER_CHECKOUT)
    }
}

fn body_text(args: &[Value]) -> String {
    match args.first() {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn status_arg(args: &[Value]) -> Result<u16> {
    let status = match args.first() {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    status
        .and_then(|n| u16::try_from(n).ok())
        .ok_or_else(|| GhokoError::ScriptExecution("WriteHeader expects a numeric HTTP status".into()))
}

/// `Call(name, params?)`: runs `name` on another interpreter on behalf of the
/// caller's checkout.
fn call_script(pool: &Weak<InterpreterPool>, slot: &CheckoutSlot, args: &[Value]) -> Result<Value> {
    let name = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| GhokoError::ScriptExecution("Call expects a script name".into()))?;
    let params = match args.get(1) {
        None | Some(Value::Null) => Params::new(),
        Some(Value::Object(map)) => Params::from(map.clone()),
        Some(_) => {
            return Err(GhokoError::ScriptExecution(format!(
                "Call({}) params must be an object",
                name
            )))
        }
    };

    let checkout = current_checkout(slot)
        .ok_or_else(|| GhokoError::ScriptExecution(format!("Call({}) used outside of a request", name)))?;
    let pool = pool.upgrade().ok_or(GhokoError::PoolClosed)?;

    let callee = pool.acquire()?;
    debug!(id = %checkout.id, script = %name, interpreter = %callee.id(), "Nested script call");
    CapabilityBinder::bind_checkout(&callee, checkout)?;
    callee.exec(name, &params)?;
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::{BufferedResponse, DetachedResponse, ResponseWriter};
    use crate::runtime::pool::PoolConfig;
    use crate::runtime::testing::{call_binding, FakeRuntime};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn gateway_pool(runtime: &Arc<FakeRuntime>) -> Arc<InterpreterPool> {
        let pool = InterpreterPool::new(runtime.factory(), PoolConfig::default());
        pool.set_on_create(CapabilityBinder::create_hook(
            PathBuf::from("/srv/hooks"),
            "s3cr3t".into(),
            &pool,
        ));
        pool
    }

    fn constant(bindings: &crate::runtime::BindingTable, name: &str) -> Option<Value> {
        bindings.get(name).and_then(|b| b.as_constant()).cloned()
    }

    #[test]
    fn test_instance_bindings() {
        let runtime = FakeRuntime::new();
        runtime.script("probe", |b, _| {
            assert_eq!(constant(b, "Secret"), Some(json!("s3cr3t")));
            assert!(b.contains("Call"));
            Ok(())
        });
        let pool = gateway_pool(&runtime);

        let ipt = pool.acquire().unwrap();
        ipt.exec("probe", &Params::new()).unwrap();
        assert_eq!(*runtime.init_paths.lock().unwrap(), vec![PathBuf::from("/srv/hooks")]);
    }

    #[test]
    fn test_sync_checkout_writes() {
        let runtime = FakeRuntime::new();
        runtime.script("deploy", |b, _| {
            let id = constant(b, "Id").unwrap();
            call_binding(b, "WriteHeader", &[json!(201)])?;
            call_binding(b, "WriteBody", &[json!("deployed ")])?;
            call_binding(b, "WriteBody", &[id])?;
            Ok(())
        });
        let pool = gateway_pool(&runtime);
        let writer = Arc::new(BufferedResponse::new());

        let ipt = pool.acquire().unwrap();
        CapabilityBinder::bind_checkout(&ipt, Checkout::new("req-1", writer.clone())).unwrap();
        ipt.exec("deploy", &Params::new()).unwrap();

        assert_eq!(writer.body(), b"deployed req-1");
        assert_eq!(writer.status().map(|s| s.as_u16()), Some(201));
    }

    #[test]
    fn test_async_checkout_writes_fail() {
        let runtime = FakeRuntime::new();
        runtime.script("deploy", |b, _| {
            let body = call_binding(b, "WriteBody", &[json!("x")]);
            let header = call_binding(b, "WriteHeader", &[json!(200)]);
            assert!(matches!(body, Err(GhokoError::SyncRequired)));
            assert!(matches!(header, Err(GhokoError::SyncRequired)));
            Ok(())
        });
        let pool = gateway_pool(&runtime);

        let ipt = pool.acquire().unwrap();
        CapabilityBinder::bind_checkout(&ipt, Checkout::new("req-1", Arc::new(DetachedResponse))).unwrap();
        ipt.exec("deploy", &Params::new()).unwrap();
        assert_eq!(runtime.executions.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_write_header_rejects_non_numeric() {
        let writer = Arc::new(BufferedResponse::new());
        let runtime = FakeRuntime::new();
        runtime.script("bad", |b, _| {
            assert!(call_binding(b, "WriteHeader", &[json!("teapot")]).is_err());
            Ok(())
        });
        let pool = gateway_pool(&runtime);

        let ipt = pool.acquire().unwrap();
        CapabilityBinder::bind_checkout(&ipt, Checkout::new("req-1", writer.clone())).unwrap();
        ipt.exec("bad", &Params::new()).unwrap();
        assert_eq!(writer.status(), None);
    }

    #[test]
    fn test_release_clears_checkout() {
        let runtime = FakeRuntime::new();
        runtime.script("probe", |b, _| {
            for name in CapabilityBinder::PER_CHECKOUT {
                assert!(!b.contains(name), "{} survived release", name);
            }
            assert!(b.contains("Secret"));
            Ok(())
        });
        let pool = gateway_pool(&runtime);

        {
            let ipt = pool.acquire().unwrap();
            CapabilityBinder::bind_checkout(&ipt, Checkout::new("req-1", Arc::new(BufferedResponse::new())))
                .unwrap();
        }

        let ipt = pool.acquire().unwrap();
        assert_eq!(ipt.id(), "ipt-1");
        assert!(ipt.checkout().is_none());
        ipt.exec("probe", &Params::new()).unwrap();
    }

    #[test]
    fn test_nested_call_inherits_checkout() {
        let runtime = FakeRuntime::new();
        runtime.script("outer", |b, _| {
            call_binding(b, "WriteBody", &[json!("outer;")])?;
            call_binding(b, "Call", &[json!("inner"), json!({"x": 1})])?;
            Ok(())
        });
        runtime.script("inner", |b, params| {
            let id = constant(b, "Id").unwrap();
            let text = format!("inner:{}:{}", id.as_str().unwrap(), params.get("x").unwrap());
            call_binding(b, "WriteBody", &[json!(text)])?;
            Ok(())
        });
        let pool = gateway_pool(&runtime);
        let writer = Arc::new(BufferedResponse::new());

        let ipt = pool.acquire().unwrap();
        CapabilityBinder::bind_checkout(&ipt, Checkout::new("req-7", writer.clone())).unwrap();
        ipt.exec("outer", &Params::new()).unwrap();

        assert_eq!(writer.body(), b"outer;inner:req-7:1");
        assert_eq!(pool.stats().created, 2);
        assert_eq!(pool.stats().in_use, 1);
    }

    #[test]
    fn test_nested_call_failure_propagates() {
        let runtime = FakeRuntime::new();
        runtime.script("outer", |b, _| {
            call_binding(b, "Call", &[json!("missing")])?;
            Ok(())
        });
        let pool = gateway_pool(&runtime);

        let ipt = pool.acquire().unwrap();
        CapabilityBinder::bind_checkout(&ipt, Checkout::new("req-1", Arc::new(DetachedResponse))).unwrap();
        assert!(matches!(
            ipt.exec("outer", &Params::new()),
            Err(GhokoError::ScriptNotFound(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_call_outside_checkout() {
        let runtime = FakeRuntime::new();
        runtime.script("outer", |b, _| {
            call_binding(b, "Call", &[json!("inner")])?;
            Ok(())
        });
        let pool = gateway_pool(&runtime);

        let ipt = pool.acquire().unwrap();
        assert!(matches!(ipt.exec("outer", &Params::new()), Err(GhokoError::ScriptExecution(_))));
    }

    #[test]
    fn test_body_text() {
        assert_eq!(body_text(&[]), "");
        assert_eq!(body_text(&[json!("plain")]), "plain");
        assert_eq!(body_text(&[json!({"ok": true})]), r#"{"ok":true}"#);
    }

    #[test]
    fn test_writer_trait_object() {
        let writer: Arc<dyn ResponseWriter> = Arc::new(BufferedResponse::new());
        let checkout = Checkout::new("req-1", writer);
        assert_eq!(format!("{:?}", checkout), r#"Checkout { id: "req-1", .. }"#);
    }
}
