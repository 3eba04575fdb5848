//! Cross-runtime bridge between a native host and a script engine.
//!
//! Native capabilities are [`NativeModule`]s collected into a [`NativeModuleRegistry`].
//! Their methods are compiled into invokers that marshal wire arguments ([`marshal`]).
//! A [`RuntimeInstance`] binds the registry, a [`ScriptExecutor`] and the per-instance
//! queues together, and a [`RuntimeContext`] is the host-facing handle to it.

pub mod batch;
mod bundle;
mod context;
mod error;
pub mod executor;
mod instance;
pub mod marshal;
mod module;
mod registry;
mod script_module;

pub use bundle::{Bundle, BundleLoader, BundleSource, CachedNetworkBundleLoader, FileBundleLoader, RemoteDebuggerBundleLoader};
pub use context::{BackgroundEventListener, ContextState, LifecycleEventListener, RuntimeContext};
pub use error::{BridgeError, ExceptionHandler, ExecutorError, ModuleError};
pub use executor::{ExecutorFactory, NativeHooks, ScriptExecutor};
pub use instance::{InstanceParts, RuntimeInstance, WeakRuntimeInstance};
pub use module::{MethodTable, ModuleHolder, NativeModule};
pub use registry::{ModuleDefinition, NativeModuleRegistry, NativeModuleRegistryBuilder};
pub use script_module::{AppRegistry, DeviceEventEmitter};

#[cfg(test)]
pub(crate) mod test_support;
