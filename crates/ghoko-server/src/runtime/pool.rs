use crate::runtime::binder::CapabilityBinder;
use crate::runtime::engine::EngineFactory;
use crate::runtime::interpreter::Interpreter;
use ghoko_common::{GhokoError, Result, ShutdownErrors};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the interpreter pool
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Released interpreters beyond this many idle ones are torn down.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_idle: 16 }
    }
}

/// Runs once for every new interpreter, before its first checkout.
pub type CreateHook = Arc<dyn Fn(&Interpreter) -> Result<()> + Send + Sync>;

/// Counters reported by [`InterpreterPool::stats`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub created: usize,
    pub idle: usize,
    pub in_use: usize,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Interpreter>,
    closed: bool,
}

/// Pool of interpreters, grown on demand.
///
/// An interpreter is owned by exactly one [`PooledInterpreter`] between
/// `acquire` and the guard's drop. There is no ceiling on live instances, so
/// a script that calls another script always gets a second interpreter
/// instead of waiting on its own.
pub struct InterpreterPool {
    state: Mutex<PoolState>,
    factory: EngineFactory,
    on_create: RwLock<Option<CreateHook>>,
    config: PoolConfig,
    next_id: AtomicU64,
    created: AtomicUsize,
    in_use: AtomicUsize,
}

impl InterpreterPool {
    pub fn new(factory: EngineFactory, config: PoolConfig) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState::default()),
            factory,
            on_create: RwLock::new(None),
            config,
            next_id: AtomicU64::new(1),
            created: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
        })
    }

    /// Installs the hook run on every interpreter the pool creates from now on.
    pub fn set_on_create(&self, hook: CreateHook) {
        let mut slot = match self.on_create.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(hook);
    }

    /// Takes an idle interpreter or creates a new one.
    pub fn acquire(self: &Arc<Self>) -> Result<PooledInterpreter> {
        let reused = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(GhokoError::PoolClosed);
            }
            state.idle.pop()
        };

        let interpreter = match reused {
            Some(interpreter) => interpreter,
            None => self.create()?,
        };
        self.in_use.fetch_add(1, Ordering::SeqCst);

        Ok(PooledInterpreter {
            interpreter: Some(interpreter),
            pool: Arc::clone(self),
        })
    }

    /// Closes every idle interpreter and marks the pool closed.
    ///
    /// Teardown failures do not stop the rest; they come back together as
    /// `GhokoError::Shutdown`, keyed by interpreter id.
    ///
    /// Only interpreters idle at the time of the call are covered. Ones still
    /// checked out are closed later, when their guard drops, and a failure
    /// there is logged but never reported here. `Ok(())` therefore does not
    /// mean every interpreter has shut down cleanly.
    pub fn close_all(&self) -> Result<()> {
        let idle = {
            let mut state = self.lock_state();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };

        let total = idle.len();
        let mut errors = ShutdownErrors::new();
        for interpreter in idle {
            let id = interpreter.id().to_string();
            if let Err(e) = interpreter.close() {
                warn!(interpreter = %id, error = %e, "Interpreter teardown failed");
                errors.insert(id, e);
            }
        }

        info!(closed = total, failed = errors.len(), "Interpreter pool drained");
        errors.into_result()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::SeqCst),
            idle: self.lock_state().idle.len(),
            in_use: self.in_use.load(Ordering::SeqCst),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn create(&self) -> Result<Interpreter> {
        let id = format!("ipt-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let interpreter = Interpreter::spawn(id, Arc::clone(&self.factory))?;
        self.created.fetch_add(1, Ordering::SeqCst);

        let hook = match self.on_create.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        if let Some(hook) = hook {
            if let Err(e) = hook(&interpreter) {
                warn!(interpreter = %interpreter.id(), error = %e, "Interpreter setup failed");
                retire(interpreter);
                return Err(e);
            }
        }

        debug!(interpreter = %interpreter.id(), "Interpreter created");
        Ok(interpreter)
    }

    fn release(&self, interpreter: Interpreter) {
        if let Err(e) = CapabilityBinder::clear_checkout(&interpreter) {
            warn!(interpreter = %interpreter.id(), error = %e, "Failed to clear checkout, retiring interpreter");
            retire(interpreter);
            return;
        }

        let mut state = self.lock_state();
        if state.closed || state.idle.len() >= self.config.max_idle {
            drop(state);
            retire(interpreter);
            return;
        }
        state.idle.push(interpreter);
    }
}

fn retire(interpreter: Interpreter) {
    let id = interpreter.id().to_string();
    match interpreter.close() {
        Ok(()) => debug!(interpreter = %id, "Interpreter retired"),
        Err(e) => warn!(interpreter = %id, error = %e, "Interpreter teardown failed"),
    }
}

/// Guard that holds an interpreter and releases it back to the pool when dropped
pub struct PooledInterpreter {
    interpreter: Option<Interpreter>,
    pool: Arc<InterpreterPool>,
}

impl Deref for PooledInterpreter {
    type Target = Interpreter;

    fn deref(&self) -> &Interpreter {
        // Only `drop` takes the interpreter out.
        self.interpreter.as_ref().expect("pooled interpreter already released")
    }
}

impl Drop for PooledInterpreter {
    fn drop(&mut self) {
        if let Some(interpreter) = self.interpreter.take() {
            self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
            self.pool.release(interpreter);
        }
    }
}
