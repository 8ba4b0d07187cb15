//! Interpreter worker threads
//!
//! A Boa context cannot leave the thread it was created on, so every
//! interpreter owns one OS thread that builds the engine and then serves
//! commands from a channel until it is closed. [`Interpreter`] is the
//! `Send + Sync` handle the pool hands around; each call blocks until the
//! worker replies.

use crate::response::ResponseWriter;
use crate::runtime::binding::Binding;
use crate::runtime::engine::{EngineFactory, ScriptEngine};
use ghoko_common::{GhokoError, Params, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Reply = mpsc::Sender<Result<()>>;

/// Commands served by the interpreter thread.
enum Command {
    Init { script_path: PathBuf, resp: Reply },
    Bind { name: String, binding: Binding, fixed: bool, resp: Reply },
    Unbind { names: Vec<String>, resp: Reply },
    Exec { script: String, params: Params, resp: Reply },
    Close { resp: Reply },
}

/// Identity and write capability of the request currently owning an
/// interpreter.
#[derive(Clone)]
pub struct Checkout {
    pub id: String,
    pub writer: Arc<dyn ResponseWriter>,
}

impl Checkout {
    pub fn new(id: impl Into<String>, writer: Arc<dyn ResponseWriter>) -> Self {
        Self {
            id: id.into(),
            writer,
        }
    }
}

impl fmt::Debug for Checkout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Checkout").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Shared view of an interpreter's current checkout. Host callables capture
/// it so they always act on behalf of the request that is running.
pub type CheckoutSlot = Arc<Mutex<Option<Checkout>>>;

fn lock_slot(slot: &CheckoutSlot) -> MutexGuard<'_, Option<Checkout>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Reads the checkout currently stored in `slot`.
pub fn current_checkout(slot: &CheckoutSlot) -> Option<Checkout> {
    lock_slot(slot).clone()
}

/// Handle to one interpreter thread.
pub struct Interpreter {
    id: String,
    tx: mpsc::Sender<Command>,
    thread: Option<JoinHandle<()>>,
    checkout: CheckoutSlot,
}

impl Interpreter {
    /// Starts the worker thread and builds its engine with `factory`.
    ///
    /// Returns once the engine exists, or with the factory's error.
    pub fn spawn(id: impl Into<String>, factory: EngineFactory) -> Result<Self> {
        let id = id.into();
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let worker_id = id.clone();
        let thread = thread::Builder::new()
            .name(format!("ghoko-{}", id))
            .spawn(move || {
                let engine = match factory() {
                    Ok(engine) => engine,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_worker(&worker_id, engine, rx);
            })
            .map_err(|e| {
                GhokoError::InterpreterUnavailable(format!("failed to start thread for {}: {}", id, e))
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(GhokoError::InterpreterUnavailable(format!(
                "{} exited during startup",
                id
            )))
        });
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        debug!(interpreter = %id, "Interpreter started");
        Ok(Self {
            id,
            tx,
            thread: Some(thread),
            checkout: Arc::new(Mutex::new(None)),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// False once the worker thread has stopped, e.g. after an engine panic.
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn init(&self, script_path: &Path) -> Result<()> {
        self.request(|resp| Command::Init {
            script_path: script_path.to_path_buf(),
            resp,
        })
    }

    pub fn bind(&self, name: &str, binding: Binding) -> Result<()> {
        self.request(|resp| Command::Bind {
            name: name.to_string(),
            binding,
            fixed: false,
            resp,
        })
    }

    /// Binds `name` for the interpreter's whole life. Scripts cannot replace it.
    pub fn bind_fixed(&self, name: &str, binding: Binding) -> Result<()> {
        self.request(|resp| Command::Bind {
            name: name.to_string(),
            binding,
            fixed: true,
            resp,
        })
    }

    /// Removes every binding in `names`. All names are attempted and the
    /// first failure is returned.
    pub fn unbind(&self, names: &[&str]) -> Result<()> {
        self.request(|resp| Command::Unbind {
            names: names.iter().map(|n| n.to_string()).collect(),
            resp,
        })
    }

    pub fn exec(&self, script: &str, params: &Params) -> Result<()> {
        self.request(|resp| Command::Exec {
            script: script.to_string(),
            params: params.clone(),
            resp,
        })
    }

    /// Tears the engine down and waits for the thread to exit.
    pub fn close(mut self) -> Result<()> {
        let result = self.request(|resp| Command::Close { resp });
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                return Err(GhokoError::InterpreterUnavailable(format!("{} panicked", self.id)));
            }
        }
        result
    }

    pub fn checkout_slot(&self) -> CheckoutSlot {
        Arc::clone(&self.checkout)
    }

    pub fn checkout(&self) -> Option<Checkout> {
        current_checkout(&self.checkout)
    }

    pub fn set_checkout(&self, checkout: Checkout) {
        *lock_slot(&self.checkout) = Some(checkout);
    }

    pub fn clear_checkout(&self) {
        *lock_slot(&self.checkout) = None;
    }

    fn request(&self, build: impl FnOnce(Reply) -> Command) -> Result<()> {
        let (resp, rx) = mpsc::channel();
        self.tx.send(build(resp)).map_err(|_| self.unavailable())?;
        rx.recv().map_err(|_| self.unavailable())?
    }

    fn unavailable(&self) -> GhokoError {
        GhokoError::InterpreterUnavailable(format!("{} is not running", self.id))
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Log result with debug on success and warn on error.
macro_rules! log_result {
    ($id:expr, $result:expr, $ok_msg:literal, $err_msg:literal) => {
        match &$result {
            Ok(_) => debug!(interpreter = %$id, $ok_msg),
            Err(e) => warn!(interpreter = %$id, error = %e, $err_msg),
        }
    };
}

/// Serves commands until `Close` arrives or every handle is gone.
fn run_worker(id: &str, mut engine: Box<dyn ScriptEngine>, rx: mpsc::Receiver<Command>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            Command::Init { script_path, resp } => {
                let result = engine.init(&script_path);
                log_result!(id, result, "Script path loaded", "Failed to load script path");
                let _ = resp.send(result);
            }
            Command::Bind {
                name,
                binding,
                fixed,
                resp,
            } => {
                let result = if fixed {
                    engine.bind_fixed(&name, binding)
                } else {
                    engine.bind(&name, binding)
                };
                let _ = resp.send(result);
            }
            Command::Unbind { names, resp } => {
                let mut result = Ok(());
                for name in &names {
                    if let Err(e) = engine.unbind(name) {
                        if result.is_ok() {
                            result = Err(e);
                        }
                    }
                }
                let _ = resp.send(result);
            }
            Command::Exec {
                script,
                params,
                resp,
            } => {
                let _ = resp.send(engine.exec(&script, &params));
            }
            Command::Close { resp } => {
                let result = engine.close();
                log_result!(id, result, "Interpreter closed", "Interpreter close failed");
                let _ = resp.send(result);
                return;
            }
        }
    }

    // Handle dropped without an explicit close.
    if let Err(e) = engine.close() {
        warn!(interpreter = %id, error = %e, "Engine close failed after handle was dropped");
    }
}
