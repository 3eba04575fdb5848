use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ModuleError;

/// Script-side callback identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub i64);

impl std::fmt::Display for CallbackId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		self.0.fmt(f)
	}
}

/// Raw channel back into the script runtime. The instance supplies one that enqueues the
/// callback on the script queue.
pub type CallbackSink = Arc<dyn Fn(CallbackId, Vec<Value>) + Send + Sync>;

/// Success/error callback pair passed to a module method. Fires exactly once.
pub struct Callback {
	success: CallbackId,
	failure: CallbackId,
	sink: CallbackSink,
}

impl Callback {
	pub fn new(success: CallbackId, failure: CallbackId, sink: CallbackSink) -> Self {
		Self { success, failure, sink }
	}

	pub fn ids(&self) -> (CallbackId, CallbackId) {
		(self.success, self.failure)
	}

	/// Invokes the success callback.
	pub fn invoke(self, args: Vec<Value>) {
		tracing::trace!(callback = %self.success, "callback.invoke");
		(self.sink)(self.success, args);
	}

	/// Invokes the error callback.
	pub fn invoke_error(self, args: Vec<Value>) {
		tracing::trace!(callback = %self.failure, "callback.invoke_error");
		(self.sink)(self.failure, args);
	}
}

impl std::fmt::Debug for Callback {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Callback").field("success", &self.success).field("failure", &self.failure).finish()
	}
}

/// Error object delivered to a rejected promise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromiseRejection {
	pub code: String,
	pub message: String,
	pub stack: Option<String>,
	pub user_info: Option<Value>,
}

impl PromiseRejection {
	/// Code used when a rejection carries no specific code.
	pub const UNSPECIFIED: &'static str = "EUNSPECIFIED";

	pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			code: code.into(),
			message: message.into(),
			stack: None,
			user_info: None,
		}
	}

	pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
		self.stack = Some(stack.into());
		self
	}

	pub fn with_user_info(mut self, user_info: Value) -> Self {
		self.user_info = Some(user_info);
		self
	}
}

impl From<ModuleError> for PromiseRejection {
	fn from(err: ModuleError) -> Self {
		Self::new(Self::UNSPECIFIED, err.message)
	}
}

/// Resolve/reject pair for a promise-returning method. Settles exactly once.
pub struct Promise {
	resolve: CallbackId,
	reject: CallbackId,
	sink: CallbackSink,
}

impl Promise {
	pub fn new(resolve: CallbackId, reject: CallbackId, sink: CallbackSink) -> Self {
		Self { resolve, reject, sink }
	}

	/// Resolves with `value`. A value that fails to encode rejects the promise instead.
	pub fn resolve(self, value: impl Serialize) {
		match serde_json::to_value(value) {
			Ok(value) => (self.sink)(self.resolve, vec![value]),
			Err(err) => self.reject(PromiseRejection::new("E_ENCODE", err.to_string())),
		}
	}

	pub fn reject(self, rejection: PromiseRejection) {
		tracing::trace!(callback = %self.reject, code = %rejection.code, "promise.reject");
		let error = serde_json::to_value(&rejection).unwrap_or(Value::Null);
		(self.sink)(self.reject, vec![error]);
	}
}

impl std::fmt::Debug for Promise {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Promise").field("resolve", &self.resolve).field("reject", &self.reject).finish()
	}
}
