use std::any::TypeId;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Callback, CallbackId, CallbackSink, MethodSignature, Promise};
use crate::{BridgeError, ModuleError};

/// How a declared parameter maps onto wire slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
	/// One decoded wire value.
	Value,
	/// Success and error callback ids.
	Callback,
	/// Resolve and reject callback ids.
	Promise,
}

impl ParamKind {
	/// Number of wire slots this parameter consumes.
	pub const fn slots(self) -> usize {
		match self {
			Self::Value => 1,
			Self::Callback | Self::Promise => 2,
		}
	}
}

/// Identifies the call being marshaled, for error reporting and callback plumbing.
pub struct CallSite<'a> {
	pub module: &'a str,
	pub method: &'a str,
	pub sink: &'a CallbackSink,
}

impl CallSite<'_> {
	fn slot<'v>(&self, args: &'v [Value], index: usize, expected: usize) -> Result<&'v Value, BridgeError> {
		args.get(index).ok_or_else(|| BridgeError::ArgumentCountMismatch {
			module: self.module.to_string(),
			method: self.method.to_string(),
			expected,
			actual: args.len(),
		})
	}

	fn decode<T: DeserializeOwned>(&self, args: &[Value], index: usize, expected: usize) -> Result<T, BridgeError> {
		T::deserialize(self.slot(args, index, expected)?).map_err(|source| BridgeError::ArgumentDecode {
			module: self.module.to_string(),
			method: self.method.to_string(),
			index,
			source,
		})
	}
}

/// A type that can be extracted from the wire argument list.
pub trait MethodParam: Sized + Send + 'static {
	const KIND: ParamKind;

	/// Extracts the parameter starting at wire slot `index`.
	fn extract(args: &[Value], index: usize, site: &CallSite<'_>) -> Result<Self, BridgeError>;
}

impl<T> MethodParam for T
where
	T: DeserializeOwned + Send + 'static,
{
	const KIND: ParamKind = ParamKind::Value;

	fn extract(args: &[Value], index: usize, site: &CallSite<'_>) -> Result<Self, BridgeError> {
		site.decode(args, index, index + 1)
	}
}

impl MethodParam for Callback {
	const KIND: ParamKind = ParamKind::Callback;

	fn extract(args: &[Value], index: usize, site: &CallSite<'_>) -> Result<Self, BridgeError> {
		let success: CallbackId = site.decode(args, index, index + 2)?;
		let failure: CallbackId = site.decode(args, index + 1, index + 2)?;
		Ok(Callback::new(success, failure, site.sink.clone()))
	}
}

impl MethodParam for Promise {
	const KIND: ParamKind = ParamKind::Promise;

	fn extract(args: &[Value], index: usize, site: &CallSite<'_>) -> Result<Self, BridgeError> {
		let resolve: CallbackId = site.decode(args, index, index + 2)?;
		let reject: CallbackId = site.decode(args, index + 1, index + 2)?;
		Ok(Promise::new(resolve, reject, site.sink.clone()))
	}
}

/// A module method: a function of the module plus typed parameters.
///
/// Implemented for `Fn(&M, P1, .., Pn) -> Result<R, ModuleError>` up to eight parameters.
/// `Args` is the parameter tuple and only serves to keep the impls apart.
pub trait MethodHandler<M, Args>: Send + Sync + 'static {
	fn signature() -> MethodSignature;

	/// Extracts parameters, runs the method and encodes its result. Arity is checked by
	/// the caller.
	fn call(&self, module: &M, args: &[Value], site: &CallSite<'_>) -> Result<Option<Value>, BridgeError>;
}

fn returns_value<R: 'static>() -> bool {
	TypeId::of::<R>() != TypeId::of::<()>()
}

fn encode_return<R: Serialize + 'static>(value: R, site: &CallSite<'_>) -> Result<Option<Value>, BridgeError> {
	if !returns_value::<R>() {
		return Ok(None);
	}
	serde_json::to_value(value).map(Some).map_err(|source| BridgeError::Encode {
		module: site.module.to_string(),
		method: site.method.to_string(),
		source,
	})
}

macro_rules! impl_method_handler {
	($($param:ident $arg:ident),*) => {
		impl<M, F, R, $($param,)*> MethodHandler<M, ($($param,)*)> for F
		where
			F: Fn(&M, $($param),*) -> Result<R, ModuleError> + Send + Sync + 'static,
			R: Serialize + 'static,
			$($param: MethodParam,)*
		{
			fn signature() -> MethodSignature {
				MethodSignature {
					params: vec![$($param::KIND),*],
					returns_value: returns_value::<R>(),
				}
			}

			#[allow(unused_mut, unused_variables, unused_assignments)]
			fn call(&self, module: &M, args: &[Value], site: &CallSite<'_>) -> Result<Option<Value>, BridgeError> {
				let mut index = 0;
				$(
					let $arg = $param::extract(args, index, site)?;
					index += $param::KIND.slots();
				)*
				let result = (self)(module, $($arg),*).map_err(|err| BridgeError::Module(err.in_module(site.module)))?;
				encode_return(result, site)
			}
		}
	};
}

impl_method_handler!();
impl_method_handler!(P1 a1);
impl_method_handler!(P1 a1, P2 a2);
impl_method_handler!(P1 a1, P2 a2, P3 a3);
impl_method_handler!(P1 a1, P2 a2, P3 a3, P4 a4);
impl_method_handler!(P1 a1, P2 a2, P3 a3, P4 a4, P5 a5);
impl_method_handler!(P1 a1, P2 a2, P3 a3, P4 a4, P5 a5, P6 a6);
impl_method_handler!(P1 a1, P2 a2, P3 a3, P4 a4, P5 a5, P6 a6, P7 a7);
impl_method_handler!(P1 a1, P2 a2, P3 a3, P4 a4, P5 a5, P6 a6, P7 a7, P8 a8);

