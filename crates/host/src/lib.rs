//! Host side of the trellis bridge.
//!
//! [`InstanceManager`] owns context creation: it serializes create and recreate attempts,
//! supersedes stale ones, tears the previous context down and keeps attached
//! [`RootView`]s mounted across recreations. Host lifecycle events enter through the
//! manager on its dispatcher queue and are forwarded to the live context by the
//! [`LifecycleStateMachine`].

mod builder;
mod config;
mod core_modules;
mod dev_support;
mod error;
mod lifecycle;
mod manager;
mod package;
mod root;

pub use builder::InstanceManagerBuilder;
pub use config::{ConfigError, HostConfig, QueueSection};
pub use core_modules::{CoreModulesPackage, DeviceEventManager, ExceptionsManager};
pub use dev_support::{DevSupport, DisabledDevSupport};
pub use error::HostError;
pub use lifecycle::{LifecycleState, LifecycleStateMachine};
pub use manager::{BackHandler, InstanceManager};
pub use package::ModulePackage;
pub use root::{HeadlessRootView, RootTag, RootTagAllocator, RootView, RootViewHost};
