//! Native call batches flushed by the script side.
//!
//! A flushed queue is `null` (nothing to do) or `[[moduleIds], [methodIds], [argLists]]`,
//! optionally followed by a call id the bridge ignores.

use serde_json::Value;

use crate::BridgeError;

/// One script-to-native call.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeCall {
	pub module_id: usize,
	pub method_id: usize,
	pub args: Vec<Value>,
}

/// Parses a flushed queue into calls, in order.
pub fn parse_flushed_queue(response: Value) -> Result<Vec<NativeCall>, BridgeError> {
	let parts = match response {
		Value::Null => return Ok(Vec::new()),
		Value::Array(parts) if parts.len() >= 3 => parts,
		other => return Err(BridgeError::InvalidBatch(format!("expected [moduleIds, methodIds, params], got {other}"))),
	};

	let mut parts = parts.into_iter();
	let module_ids = index_list(parts.next(), "moduleIds")?;
	let method_ids = index_list(parts.next(), "methodIds")?;
	let params = match parts.next() {
		Some(Value::Array(params)) => params,
		_ => return Err(BridgeError::InvalidBatch("params must be an array".to_string())),
	};

	if module_ids.len() != method_ids.len() || module_ids.len() != params.len() {
		return Err(BridgeError::InvalidBatch(format!(
			"length mismatch: {} module ids, {} method ids, {} argument lists",
			module_ids.len(),
			method_ids.len(),
			params.len()
		)));
	}

	module_ids
		.into_iter()
		.zip(method_ids)
		.zip(params)
		.map(|((module_id, method_id), args)| match args {
			Value::Array(args) => Ok(NativeCall { module_id, method_id, args }),
			other => Err(BridgeError::InvalidBatch(format!("argument list must be an array, got {other}"))),
		})
		.collect()
}

/// Encodes calls into the flushed-queue wire shape.
pub fn encode_calls(calls: &[NativeCall]) -> Value {
	if calls.is_empty() {
		return Value::Null;
	}
	let module_ids: Vec<usize> = calls.iter().map(|call| call.module_id).collect();
	let method_ids: Vec<usize> = calls.iter().map(|call| call.method_id).collect();
	let params: Vec<&[Value]> = calls.iter().map(|call| call.args.as_slice()).collect();
	serde_json::json!([module_ids, method_ids, params])
}

fn index_list(value: Option<Value>, field: &str) -> Result<Vec<usize>, BridgeError> {
	let Some(Value::Array(items)) = value else {
		return Err(BridgeError::InvalidBatch(format!("{field} must be an array")));
	};
	items
		.iter()
		.map(|item| {
			item.as_u64()
				.and_then(|id| usize::try_from(id).ok())
				.ok_or_else(|| BridgeError::InvalidBatch(format!("{field} entries must be non-negative integers, got {item}")))
		})
		.collect()
}
