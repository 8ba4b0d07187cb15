//! In-crate fake engine for pool, binder and dispatcher tests.

use crate::runtime::binding::BindingTable;
use crate::runtime::engine::{EngineFactory, ScriptEngine};
use ghoko_common::{GhokoError, Params, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) type ScriptFn = Arc<dyn Fn(&BindingTable, &Params) -> Result<()> + Send + Sync>;

/// Shared state behind every engine a [`FakeRuntime::factory`] produces.
#[derive(Default)]
pub(crate) struct FakeRuntime {
    scripts: Mutex<HashMap<String, ScriptFn>>,
    fail_create: Mutex<HashSet<usize>>,
    fail_close: Mutex<HashSet<usize>>,
    pub engines: AtomicUsize,
    pub executions: AtomicUsize,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub closed: AtomicUsize,
    pub init_paths: Mutex<Vec<PathBuf>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script<F>(&self, name: &str, f: F)
    where
        F: Fn(&BindingTable, &Params) -> Result<()> + Send + Sync + 'static,
    {
        self.scripts.lock().unwrap().insert(name.to_string(), Arc::new(f));
    }

    /// Makes the `nth` engine (1-based, creation order) fail to build.
    pub fn fail_create(&self, nth: usize) {
        self.fail_create.lock().unwrap().insert(nth);
    }

    /// Makes the `nth` engine (1-based, creation order) fail on close.
    pub fn fail_close(&self, nth: usize) {
        self.fail_close.lock().unwrap().insert(nth);
    }

    pub fn factory(self: &Arc<Self>) -> EngineFactory {
        let runtime = Arc::clone(self);
        Arc::new(move || {
            let ordinal = runtime.engines.fetch_add(1, Ordering::SeqCst) + 1;
            if runtime.fail_create.lock().unwrap().contains(&ordinal) {
                return Err(GhokoError::ScriptExecution(format!("engine {} refused to start", ordinal)));
            }
            Ok(Box::new(FakeEngine {
                runtime: Arc::clone(&runtime),
                ordinal,
                bindings: BindingTable::new(),
            }) as Box<dyn ScriptEngine>)
        })
    }
}

struct FakeEngine {
    runtime: Arc<FakeRuntime>,
    ordinal: usize,
    bindings: BindingTable,
}

impl ScriptEngine for FakeEngine {
    fn init(&mut self, script_path: &Path) -> Result<()> {
        self.runtime.init_paths.lock().unwrap().push(script_path.to_path_buf());
        Ok(())
    }

    fn bind(&mut self, name: &str, binding: crate::runtime::Binding) -> Result<()> {
        self.bindings.insert(name, binding);
        Ok(())
    }

    fn unbind(&mut self, name: &str) -> Result<()> {
        self.bindings.remove(name);
        Ok(())
    }

    fn exec(&mut self, script: &str, params: &Params) -> Result<()> {
        let f = self
            .runtime
            .scripts
            .lock()
            .unwrap()
            .get(script)
            .cloned()
            .ok_or_else(|| GhokoError::ScriptNotFound(script.to_string()))?;

        let now = self.runtime.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.runtime.max_running.fetch_max(now, Ordering::SeqCst);
        let result = f(&self.bindings, params);
        self.runtime.running.fetch_sub(1, Ordering::SeqCst);
        self.runtime.executions.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn close(&mut self) -> Result<()> {
        self.runtime.closed.fetch_add(1, Ordering::SeqCst);
        if self.runtime.fail_close.lock().unwrap().contains(&self.ordinal) {
            return Err(GhokoError::ScriptExecution(format!("engine {} failed to close", self.ordinal)));
        }
        Ok(())
    }
}

/// Calls the callable binding `name` the way a script would.
pub(crate) fn call_binding(bindings: &BindingTable, name: &str, args: &[serde_json::Value]) -> Result<serde_json::Value> {
    bindings
        .get(name)
        .and_then(|b| b.call(args))
        .unwrap_or_else(|| Err(GhokoError::ScriptExecution(format!("{} is not defined", name))))
}
