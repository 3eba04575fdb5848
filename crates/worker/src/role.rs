/// Execution domain a [`crate::MessageQueue`] serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
	/// Host UI/dispatcher domain. Owned by the host, shared by every instance.
	Dispatcher,
	/// Default domain for native module method execution.
	NativeModules,
	/// Script-engine domain. All executor calls happen here.
	Script,
	/// Dedicated queue requested by a single native module.
	Module,
}

impl QueueRole {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Dispatcher => "dispatcher",
			Self::NativeModules => "native_modules",
			Self::Script => "script",
			Self::Module => "module",
		}
	}
}
