//! Argument marshaling between wire values and typed module methods.
//!
//! Every declared method is compiled once into an [`Invoker`]: a closure that checks the
//! wire arity, extracts each parameter in order, calls the method and encodes the result.
//! Value parameters take one wire slot; [`Callback`] and [`Promise`] parameters take two.

mod callback;
mod handler;

use std::sync::Arc;

use serde_json::Value;

pub use self::callback::{Callback, CallbackId, CallbackSink, Promise, PromiseRejection};
pub use self::handler::{CallSite, MethodHandler, MethodParam, ParamKind};
use crate::BridgeError;

/// Compiled, reusable entry point for one module method.
///
/// Returns `None` for methods without a return value and `Some(Value::Null)` for a null
/// result.
pub type Invoker = Arc<dyn Fn(&[Value], &CallbackSink) -> Result<Option<Value>, BridgeError> + Send + Sync>;

/// How the script side calls a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
	/// Fire-and-forget; results come back through callbacks.
	Async,
	/// Runs inline and returns a value to the caller.
	Sync,
	/// Settles a script promise.
	Promise,
}

impl MethodKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Async => "async",
			Self::Sync => "sync",
			Self::Promise => "promise",
		}
	}
}

/// Parameter layout and return shape of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
	pub params: Vec<ParamKind>,
	pub returns_value: bool,
}

impl MethodSignature {
	/// Number of wire arguments a call must supply.
	pub fn arity(&self) -> usize {
		self.params.iter().map(|param| param.slots()).sum()
	}

	/// A trailing promise makes a promise method; otherwise a return value makes it sync.
	pub fn kind(&self) -> MethodKind {
		if self.params.last() == Some(&ParamKind::Promise) {
			MethodKind::Promise
		} else if self.returns_value {
			MethodKind::Sync
		} else {
			MethodKind::Async
		}
	}

	/// Rejects layouts the script side cannot call.
	pub fn validate(&self) -> Result<(), &'static str> {
		let promises = self.params.iter().filter(|param| **param == ParamKind::Promise).count();
		if promises > 1 {
			return Err("at most one promise parameter is allowed");
		}
		if promises == 1 && self.params.last() != Some(&ParamKind::Promise) {
			return Err("the promise must be the last parameter");
		}
		if let Some(first) = self.params.iter().position(|param| *param == ParamKind::Callback)
			&& self.params[first..].contains(&ParamKind::Value)
		{
			return Err("callbacks must be trailing parameters");
		}
		if self.returns_value && self.params.iter().any(|param| *param != ParamKind::Value) {
			return Err("methods returning a value cannot take callbacks or promises");
		}
		Ok(())
	}
}

/// Declared but not yet bound method, produced by [`crate::MethodTable`].
pub(crate) struct MethodEntry<M> {
	pub(crate) name: String,
	pub(crate) signature: MethodSignature,
	pub(crate) call: Arc<dyn Fn(&M, &[Value], &CallSite<'_>) -> Result<Option<Value>, BridgeError> + Send + Sync>,
}

/// A method bound to its module instance.
#[derive(Clone)]
pub struct CompiledMethod {
	name: String,
	kind: MethodKind,
	arity: usize,
	invoker: Invoker,
}

impl std::fmt::Debug for CompiledMethod {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CompiledMethod")
			.field("name", &self.name)
			.field("kind", &self.kind)
			.field("arity", &self.arity)
			.finish_non_exhaustive()
	}
}

impl CompiledMethod {
	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn kind(&self) -> MethodKind {
		self.kind
	}

	pub fn arity(&self) -> usize {
		self.arity
	}

	pub fn invoker(&self) -> &Invoker {
		&self.invoker
	}

	/// Fails with [`BridgeError::ArgumentCountMismatch`] unless `actual` matches the arity.
	pub fn check_arity(&self, module: &str, actual: usize) -> Result<(), BridgeError> {
		if actual == self.arity {
			return Ok(());
		}
		Err(BridgeError::ArgumentCountMismatch {
			module: module.to_string(),
			method: self.name.clone(),
			expected: self.arity,
			actual,
		})
	}
}

/// Binds `entry` to `module`, validating its signature.
pub(crate) fn compile<M>(module: &Arc<M>, module_name: &str, entry: MethodEntry<M>) -> Result<CompiledMethod, BridgeError>
where
	M: Send + Sync + 'static,
{
	entry.signature.validate().map_err(|reason| BridgeError::UnsupportedSignature {
		module: module_name.to_string(),
		method: entry.name.clone(),
		reason,
	})?;

	let arity = entry.signature.arity();
	let kind = entry.signature.kind();
	tracing::trace!(module = module_name, method = %entry.name, kind = kind.as_str(), arity, "marshal.compiled");

	let module = Arc::clone(module);
	let module_name: Arc<str> = Arc::from(module_name);
	let method_name: Arc<str> = Arc::from(entry.name.as_str());
	let call = entry.call;

	let invoker: Invoker = Arc::new(move |args: &[Value], sink: &CallbackSink| {
		if args.len() != arity {
			return Err(BridgeError::ArgumentCountMismatch {
				module: module_name.to_string(),
				method: method_name.to_string(),
				expected: arity,
				actual: args.len(),
			});
		}
		let site = CallSite {
			module: &module_name,
			method: &method_name,
			sink,
		};
		call(&module, args, &site)
	});

	Ok(CompiledMethod {
		name: entry.name,
		kind,
		arity,
		invoker,
	})
}
