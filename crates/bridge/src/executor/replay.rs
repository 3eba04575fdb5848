//! Deterministic executor that replays scripted native calls.
//!
//! The bundle is a JSON document:
//!
//! ```json
//! {
//!   "startup": [{ "module": "Counter", "method": "increment" }],
//!   "functions": { "AppRegistry.runApplication": [{ "module": "Counter", "method": "get", "sync": true }] },
//!   "callbacks": { "7": [] }
//! }
//! ```
//!
//! `startup` runs when the bundle loads, `functions` when the host calls a script function
//! and `callbacks` when a native module fires a callback id. Module and method names are
//! resolved against the module metadata global. Every call the executor receives and every
//! sync result is appended to a shared [`ReplayJournal`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ExecutorFactory, MODULE_CONFIG_GLOBAL, NativeHooks, ScriptExecutor};
use crate::batch::{NativeCall, encode_calls};
use crate::marshal::CallbackId;
use crate::{Bundle, BundleSource, ExecutorError};

/// One scripted call into a native module.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayCall {
	pub module: String,
	pub method: String,
	#[serde(default)]
	pub args: Vec<Value>,
	/// Call through the sync hook instead of the flushed queue.
	#[serde(default)]
	pub sync: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct ReplayScript {
	startup: Vec<ReplayCall>,
	functions: HashMap<String, Vec<ReplayCall>>,
	callbacks: HashMap<String, Vec<ReplayCall>>,
}

/// Something the replay executor observed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalEntry {
	Global { name: String },
	Loaded { source_url: String },
	Function { module: String, method: String, args: Vec<Value> },
	Callback { id: CallbackId, args: Vec<Value> },
	SyncResult { module: String, method: String, result: Result<Option<Value>, String> },
	Disposed,
}

/// Shared, append-only record of executor activity.
#[derive(Debug, Clone, Default)]
pub struct ReplayJournal {
	entries: Arc<Mutex<Vec<JournalEntry>>>,
}

impl ReplayJournal {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn entries(&self) -> Vec<JournalEntry> {
		self.entries.lock().clone()
	}

	/// `(module, method, args)` of every script function the host called.
	pub fn function_calls(&self) -> Vec<(String, String, Vec<Value>)> {
		self.entries
			.lock()
			.iter()
			.filter_map(|entry| match entry {
				JournalEntry::Function { module, method, args } => Some((module.clone(), method.clone(), args.clone())),
				_ => None,
			})
			.collect()
	}

	/// Ids and arguments of every callback fired back into the script side.
	pub fn callbacks(&self) -> Vec<(CallbackId, Vec<Value>)> {
		self.entries
			.lock()
			.iter()
			.filter_map(|entry| match entry {
				JournalEntry::Callback { id, args } => Some((*id, args.clone())),
				_ => None,
			})
			.collect()
	}

	fn push(&self, entry: JournalEntry) {
		self.entries.lock().push(entry);
	}
}

#[derive(Debug, Default)]
struct ModuleIndex {
	id: usize,
	methods: HashMap<String, usize>,
}

/// [`ScriptExecutor`] driven by a JSON replay script.
#[derive(Debug, Default)]
pub struct ReplayExecutor {
	journal: ReplayJournal,
	script: ReplayScript,
	modules: HashMap<String, ModuleIndex>,
	hooks: Option<NativeHooks>,
}

impl ReplayExecutor {
	pub fn new(journal: ReplayJournal) -> Self {
		Self {
			journal,
			..Self::default()
		}
	}

	/// Factory producing executors that share `journal`.
	pub fn factory(journal: ReplayJournal) -> ExecutorFactory {
		Arc::new(move || Ok(Box::new(ReplayExecutor::new(journal.clone())) as Box<dyn ScriptExecutor>))
	}

	fn index_modules(&mut self, config: &Value) -> Result<(), ExecutorError> {
		let modules = config
			.get("remoteModuleConfig")
			.and_then(Value::as_array)
			.ok_or_else(|| ExecutorError::Script("module config is missing remoteModuleConfig".to_string()))?;

		self.modules.clear();
		for (id, module) in modules.iter().enumerate() {
			let name = module.get(0).and_then(Value::as_str).unwrap_or_default();
			let methods = module
				.get(2)
				.and_then(Value::as_array)
				.map(|methods| methods.iter().enumerate().filter_map(|(index, name)| Some((name.as_str()?.to_string(), index))).collect())
				.unwrap_or_default();
			self.modules.insert(name.to_string(), ModuleIndex { id, methods });
		}
		Ok(())
	}

	fn resolve(&self, call: &ReplayCall) -> Result<(usize, usize), ExecutorError> {
		let module = self
			.modules
			.get(&call.module)
			.ok_or_else(|| ExecutorError::Script(format!("unknown native module '{}'", call.module)))?;
		let method = module
			.methods
			.get(&call.method)
			.ok_or_else(|| ExecutorError::Script(format!("unknown method '{}.{}'", call.module, call.method)))?;
		Ok((module.id, *method))
	}

	/// Runs sync calls immediately and returns the async ones as a flushed queue.
	fn run(&mut self, calls: Vec<ReplayCall>) -> Result<Value, ExecutorError> {
		let mut queued = Vec::new();
		for call in calls {
			let (module_id, method_id) = self.resolve(&call)?;
			if !call.sync {
				queued.push(NativeCall {
					module_id,
					method_id,
					args: call.args,
				});
				continue;
			}

			let hooks = self.hooks.as_ref().ok_or(ExecutorError::Unavailable)?;
			let result = hooks.invoke_sync(module_id, method_id, call.args).map_err(|err| err.to_string());
			self.journal.push(JournalEntry::SyncResult {
				module: call.module,
				method: call.method,
				result,
			});
		}
		Ok(encode_calls(&queued))
	}
}

impl ScriptExecutor for ReplayExecutor {
	fn install_native_hooks(&mut self, hooks: NativeHooks) {
		self.hooks = Some(hooks);
	}

	fn set_global_variable(&mut self, name: &str, value: Value) -> Result<(), ExecutorError> {
		if name == MODULE_CONFIG_GLOBAL {
			self.index_modules(&value)?;
		}
		self.journal.push(JournalEntry::Global { name: name.to_string() });
		Ok(())
	}

	fn load_and_run(&mut self, bundle: &Bundle) -> Result<Value, ExecutorError> {
		self.script = match &bundle.source {
			BundleSource::Script(text) => serde_json::from_str(text).map_err(|err| ExecutorError::InvalidBundle(err.to_string()))?,
			BundleSource::Remote => ReplayScript::default(),
		};
		self.journal.push(JournalEntry::Loaded {
			source_url: bundle.source_url.clone(),
		});
		let startup = std::mem::take(&mut self.script.startup);
		self.run(startup)
	}

	fn call_function(&mut self, module: &str, method: &str, args: Vec<Value>) -> Result<Value, ExecutorError> {
		self.journal.push(JournalEntry::Function {
			module: module.to_string(),
			method: method.to_string(),
			args,
		});
		let calls = self.script.functions.get(&format!("{module}.{method}")).cloned().unwrap_or_default();
		self.run(calls)
	}

	fn invoke_callback(&mut self, id: CallbackId, args: Vec<Value>) -> Result<Value, ExecutorError> {
		self.journal.push(JournalEntry::Callback { id, args });
		let calls = self.script.callbacks.get(&id.to_string()).cloned().unwrap_or_default();
		self.run(calls)
	}

	fn dispose(&mut self) {
		self.journal.push(JournalEntry::Disposed);
	}
}
