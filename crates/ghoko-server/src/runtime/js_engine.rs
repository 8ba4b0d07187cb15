use crate::runtime::binding::{Binding, BindingTable};
use crate::runtime::bindings::{install_binding, install_fixed_binding, uninstall_binding};
use crate::runtime::conversions::json_to_js_value;
use crate::runtime::engine::{resolve_script, EngineFactory, ScriptEngine};
use boa_engine::{
    builtins::promise::{OperationType, PromiseState},
    context::{ContextBuilder, HostHooks},
    object::{builtins::JsPromise, JsObject},
    value::JsValue,
    Context, JsError, Source,
};
use ghoko_common::{GhokoError, Params, Result};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

thread_local! {
    // Promises rejected with no handler attached, on this thread's contexts.
    static UNHANDLED: RefCell<Vec<JsObject>> = const { RefCell::new(Vec::new()) };
}

/// Host hooks that track unhandled promise rejections.
struct RejectionTracker;

impl HostHooks for RejectionTracker {
    fn promise_rejection_tracker(&self, promise: &JsObject, operation: OperationType, _context: &mut Context) {
        UNHANDLED.with_borrow_mut(|unhandled| match operation {
            OperationType::Reject => unhandled.push(promise.clone()),
            OperationType::Handle => unhandled.retain(|p| !JsObject::equals(p, promise)),
        });
    }
}

static REJECTION_TRACKER: RejectionTracker = RejectionTracker;

/// Reasons of the promises still rejected without a handler, oldest first.
fn take_unhandled_rejections() -> Vec<String> {
    UNHANDLED
        .with_borrow_mut(std::mem::take)
        .into_iter()
        .filter_map(|promise| match JsPromise::from_object(promise).ok()?.state() {
            PromiseState::Rejected(reason) => Some(JsError::from_opaque(reason).to_string()),
            _ => None,
        })
        .collect()
}

/// Boa-backed script engine.
///
/// A script is read from disk on every execution, wrapped as the body of
/// `function (Params) { ... }` and called once. The wrapper keeps top-level
/// declarations local to one execution, so a reused context never sees
/// `let`/`const` redeclaration errors from a previous request.
pub struct JsEngine {
    ctx: Context,
    script_path: Option<PathBuf>,
    bindings: BindingTable,
}

impl JsEngine {
    pub fn new() -> Result<Self> {
        let ctx = ContextBuilder::default()
            .host_hooks(&REJECTION_TRACKER)
            .build()
            .map_err(|e| GhokoError::ScriptExecution(format!("Failed to create context: {}", e)))?;

        Ok(Self {
            ctx,
            script_path: None,
            bindings: BindingTable::new(),
        })
    }

    /// Factory handed to the interpreter pool.
    pub fn factory() -> EngineFactory {
        Arc::new(|| Ok(Box::new(JsEngine::new()?) as Box<dyn ScriptEngine>))
    }

    pub fn bindings(&self) -> &BindingTable {
        &self.bindings
    }

    fn load(&self, script: &str) -> Result<String> {
        let dir = self
            .script_path
            .as_ref()
            .ok_or_else(|| GhokoError::ScriptExecution("interpreter has no script path".into()))?;
        let path = resolve_script(dir, script)?;

        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => GhokoError::ScriptNotFound(script.to_string()),
            _ => GhokoError::Io(e),
        })
    }
}

impl ScriptEngine for JsEngine {
    fn init(&mut self, script_path: &Path) -> Result<()> {
        if !script_path.is_dir() {
            return Err(GhokoError::ScriptNotFound(format!(
                "script path {} is not a directory",
                script_path.display()
            )));
        }
        self.script_path = Some(script_path.to_path_buf());
        Ok(())
    }

    fn bind(&mut self, name: &str, binding: Binding) -> Result<()> {
        install_binding(&mut self.ctx, name, &binding)?;
        self.bindings.insert(name, binding);
        Ok(())
    }

    fn bind_fixed(&mut self, name: &str, binding: Binding) -> Result<()> {
        install_fixed_binding(&mut self.ctx, name, &binding)?;
        self.bindings.insert(name, binding);
        Ok(())
    }

    fn unbind(&mut self, name: &str) -> Result<()> {
        if self.bindings.remove(name).is_some() {
            uninstall_binding(&mut self.ctx, name)?;
        }
        Ok(())
    }

    fn exec(&mut self, script: &str, params: &Params) -> Result<()> {
        let source = self.load(script)?;
        let wrapped = format!("(function (Params) {{\n{}\n}})", source);

        let compiled = self
            .ctx
            .eval(Source::from_bytes(wrapped.as_bytes()))
            .map_err(|e| GhokoError::ScriptExecution(format!("{}: {}", script, e)))?;
        let func = compiled
            .as_callable()
            .ok_or_else(|| GhokoError::ScriptExecution(format!("{}: script did not compile to a function", script)))?;

        let args = json_to_js_value(params.clone().into_value(), &mut self.ctx)?;
        take_unhandled_rejections();
        let result = func.call(&JsValue::undefined(), &[args], &mut self.ctx);

        // Settle any promises the script left behind before reporting.
        self.ctx.run_jobs();
        let rejections = take_unhandled_rejections();
        for reason in &rejections {
            warn!(script = %script, reason = %reason, "Unhandled promise rejection");
        }

        result.map_err(|e| GhokoError::ScriptExecution(format!("{}: {}", script, e)))?;
        match rejections.into_iter().next() {
            Some(reason) => Err(GhokoError::ScriptExecution(format!(
                "{}: unhandled promise rejection: {}",
                script, reason
            ))),
            None => Ok(()),
        }
    }
}
