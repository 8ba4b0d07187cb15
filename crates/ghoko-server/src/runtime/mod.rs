pub mod binder;
pub mod binding;
pub mod engine;
pub mod interpreter;
pub mod js_engine;
pub mod pool;

mod bindings;
mod conversions;

#[cfg(test)]
pub(crate) mod testing;

pub use binder::CapabilityBinder;
pub use binding::{Binding, BindingTable, HostFn};
pub use engine::{EngineFactory, ScriptEngine, SCRIPT_EXTENSION};
pub use interpreter::{Checkout, CheckoutSlot, Interpreter};
pub use js_engine::JsEngine;
pub use pool::{CreateHook, InterpreterPool, PoolConfig, PoolStats, PooledInterpreter};
