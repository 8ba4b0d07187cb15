//! Script engine seam
//!
//! The interpreter pool is engine-agnostic: it only needs something that can
//! be pointed at a script directory, receive bindings, and run a named script
//! with a parameter map. [`JsEngine`](crate::runtime::JsEngine) is the
//! production implementation.

use crate::runtime::binding::Binding;
use ghoko_common::{GhokoError, Params, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extension of hook scripts.
pub const SCRIPT_EXTENSION: &str = "js";

/// An embedded scripting engine instance.
///
/// Engines are created and used on a single interpreter thread, so
/// implementations do not need to be `Send`.
pub trait ScriptEngine {
    /// Sets the directory scripts are resolved against.
    fn init(&mut self, script_path: &Path) -> Result<()>;

    /// Installs `binding` under `name`, replacing any previous binding.
    fn bind(&mut self, name: &str, binding: Binding) -> Result<()>;

    /// Installs `binding` under `name` for the rest of the engine's life.
    /// Scripts must not be able to reassign or delete it.
    fn bind_fixed(&mut self, name: &str, binding: Binding) -> Result<()> {
        self.bind(name, binding)
    }

    /// Removes the binding for `name`. Unknown names are ignored.
    fn unbind(&mut self, name: &str) -> Result<()>;

    /// Runs the script called `script` with `params`.
    fn exec(&mut self, script: &str, params: &Params) -> Result<()>;

    /// Releases engine resources. Called once, when the interpreter is torn down.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds a fresh engine. Invoked on the interpreter's own thread.
pub type EngineFactory = Arc<dyn Fn() -> Result<Box<dyn ScriptEngine>> + Send + Sync>;

/// Maps a script name to its file under `script_path`.
///
/// Names that are empty, hidden, or contain a path separator are rejected
/// before touching the filesystem.
pub fn resolve_script(script_path: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(GhokoError::ScriptNotFound(format!("invalid script name `{}`", name)));
    }
    Ok(script_path.join(format!("{}.{}", name, SCRIPT_EXTENSION)))
}
