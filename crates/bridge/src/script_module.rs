//! Typed proxies for script-side modules the host calls into.

use serde_json::Value;

use crate::{BridgeError, RuntimeInstance};

/// Script-side application registry.
pub struct AppRegistry<'a> {
	instance: &'a RuntimeInstance,
}

impl<'a> AppRegistry<'a> {
	pub const NAME: &'static str = "AppRegistry";

	pub fn new(instance: &'a RuntimeInstance) -> Self {
		Self { instance }
	}

	/// Starts `app_key` with `{rootTag, initialProps}` parameters.
	pub fn run_application(&self, app_key: &str, params: Value) -> Result<(), BridgeError> {
		self.instance.call_function(Self::NAME, "runApplication", vec![Value::from(app_key), params])
	}

	pub fn unmount_application_component_at_root_tag(&self, root_tag: i64) -> Result<(), BridgeError> {
		self.instance
			.call_function(Self::NAME, "unmountApplicationComponentAtRootTag", vec![Value::from(root_tag)])
	}
}

/// Script-side event emitter for device events.
pub struct DeviceEventEmitter<'a> {
	instance: &'a RuntimeInstance,
}

impl<'a> DeviceEventEmitter<'a> {
	pub const NAME: &'static str = "RCTDeviceEventEmitter";

	pub fn new(instance: &'a RuntimeInstance) -> Self {
		Self { instance }
	}

	pub fn emit(&self, event: &str, data: Value) -> Result<(), BridgeError> {
		self.instance.call_function(Self::NAME, "emit", vec![Value::from(event), data])
	}
}
