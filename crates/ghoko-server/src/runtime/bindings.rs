//! Installing bindings into a Boa context
//!
//! Rebindable bindings become configurable global properties, so binding the
//! same name again redefines them and unbinding deletes them. Fixed bindings
//! are read-only and permanent for the life of the context. Callables are
//! wrapped in native functions that convert arguments to JSON, run the host
//! function, and turn a host error into a thrown JavaScript `Error`.

use crate::runtime::binding::{Binding, HostFn};
use crate::runtime::conversions::{js_value_to_json, json_to_js_value};
use boa_engine::{
    native_function::NativeFunction,
    object::{builtins::JsFunction, FunctionObjectBuilder},
    property::Attribute,
    value::JsValue,
    Context, JsError, JsNativeError, JsString,
};
use boa_gc::{Finalize, Trace};
use ghoko_common::{GhokoError, Result};

/// Defines (or redefines) the global `name` from `binding`.
pub(crate) fn install_binding(ctx: &mut Context, name: &str, binding: &Binding) -> Result<()> {
    define_global(ctx, name, binding, Attribute::all())
}

/// Defines the global `name` as a read-only, non-deletable property.
///
/// Assignments from scripts are ignored and `delete` fails, so the value
/// survives every execution on this context.
pub(crate) fn install_fixed_binding(ctx: &mut Context, name: &str, binding: &Binding) -> Result<()> {
    define_global(ctx, name, binding, Attribute::ENUMERABLE)
}

fn define_global(ctx: &mut Context, name: &str, binding: &Binding, attributes: Attribute) -> Result<()> {
    let value: JsValue = match binding {
        Binding::Constant(value) => json_to_js_value(value.clone(), ctx)?,
        Binding::Callable(f) => host_function(ctx, f.clone()).into(),
    };

    ctx.register_global_property(JsString::from(name), value, attributes)
        .map_err(|e| GhokoError::ScriptExecution(format!("Failed to bind `{}`: {}", name, e)))
}

/// Deletes the global `name`.
pub(crate) fn uninstall_binding(ctx: &mut Context, name: &str) -> Result<()> {
    ctx.global_object()
        .delete_property_or_throw(JsString::from(name), ctx)
        .map(|_| ())
        .map_err(|e| GhokoError::ScriptExecution(format!("Failed to unbind `{}`: {}", name, e)))
}

/// Host function captured by a native function. It holds no Boa values.
#[derive(Trace, Finalize)]
struct HostCapture {
    #[unsafe_ignore_trace]
    f: HostFn,
}

fn host_function(ctx: &mut Context, f: HostFn) -> JsFunction {
    let native = NativeFunction::from_copy_closure_with_captures(
        |_this, args: &[JsValue], capture: &HostCapture, context| {
            let mut json_args = Vec::with_capacity(args.len());
            for arg in args {
                json_args.push(js_value_to_json(arg.clone(), context).map_err(to_js_error)?);
            }

            let result = (capture.f)(&json_args).map_err(to_js_error)?;
            json_to_js_value(result, context).map_err(to_js_error)
        },
        HostCapture { f },
    );

    FunctionObjectBuilder::new(ctx.realm(), native).build()
}

fn to_js_error(err: GhokoError) -> JsError {
    JsNativeError::error().with_message(err.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::Source;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn eval_json(ctx: &mut Context, src: &str) -> serde_json::Value {
        let value = ctx.eval(Source::from_bytes(src)).unwrap();
        js_value_to_json(value, ctx).unwrap()
    }

    #[test]
    fn test_constant_binding() {
        let mut ctx = Context::default();
        install_binding(&mut ctx, "Secret", &Binding::constant("s3cr3t")).unwrap();
        assert_eq!(eval_json(&mut ctx, "Secret"), json!("s3cr3t"));
    }

    #[test]
    fn test_rebinding_overwrites_global() {
        let mut ctx = Context::default();
        install_binding(&mut ctx, "Id", &Binding::constant("first")).unwrap();
        install_binding(&mut ctx, "Id", &Binding::constant("second")).unwrap();
        assert_eq!(eval_json(&mut ctx, "Id"), json!("second"));
    }

    #[test]
    fn test_callable_receives_json_args() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let binding = Binding::callable(move |args| {
            sink.lock().unwrap().extend_from_slice(args);
            Ok(json!("ack"))
        });

        let mut ctx = Context::default();
        install_binding(&mut ctx, "Notify", &binding).unwrap();
        assert_eq!(eval_json(&mut ctx, r#"Notify("deploy", { n: 2 })"#), json!("ack"));
        assert_eq!(*seen.lock().unwrap(), vec![json!("deploy"), json!({"n": 2})]);
    }

    #[test]
    fn test_host_error_is_thrown() {
        let binding = Binding::callable(|_| Err(GhokoError::SyncRequired));
        let mut ctx = Context::default();
        install_binding(&mut ctx, "WriteBody", &binding).unwrap();

        let caught = eval_json(
            &mut ctx,
            r#"(function () { try { WriteBody("x"); return "no error"; } catch (e) { return String(e.message); } })()"#,
        );
        assert!(caught.as_str().unwrap().contains("synchronous execution required"));
    }

    #[test]
    fn test_fixed_binding_survives_assignment_and_delete() {
        let mut ctx = Context::default();
        install_fixed_binding(&mut ctx, "Secret", &Binding::constant("s3cr3t")).unwrap();
        install_fixed_binding(&mut ctx, "Call", &Binding::callable(|_| Ok(json!(1)))).unwrap();

        ctx.eval(Source::from_bytes(r#"Secret = "x"; Call = undefined; delete Secret; delete Call;"#))
            .unwrap();
        assert_eq!(eval_json(&mut ctx, "Secret"), json!("s3cr3t"));
        assert_eq!(eval_json(&mut ctx, "typeof Call"), json!("function"));
        assert_eq!(eval_json(&mut ctx, "Call()"), json!(1));
    }

    #[test]
    fn test_uninstall_removes_global() {
        let mut ctx = Context::default();
        install_binding(&mut ctx, "Id", &Binding::constant("abc")).unwrap();
        uninstall_binding(&mut ctx, "Id").unwrap();
        assert_eq!(eval_json(&mut ctx, "typeof Id"), json!("undefined"));
    }
}
