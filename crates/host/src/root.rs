//! Host UI roots the script side renders into.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Identifier the native UI layer assigns to a mounted root.
pub type RootTag = i64;

/// A surface that hosts one script application.
pub trait RootView: Send + Sync {
	/// Application key passed to `AppRegistry.runApplication`.
	fn module_name(&self) -> &str;

	fn initial_props(&self) -> Value {
		Value::Object(Map::new())
	}

	/// Silences the view while its context is torn down.
	fn cleanup(&self) {}
}

/// Native UI layer that owns mounted roots. Called on the dispatcher queue.
pub trait RootViewHost: Send + Sync {
	fn add_root_view(&self, view: &Arc<dyn RootView>) -> RootTag;

	fn remove_root_view(&self, tag: RootTag);
}

/// [`RootViewHost`] that only hands out tags: 1, 11, 21 and so on.
#[derive(Debug)]
pub struct RootTagAllocator {
	next: AtomicI64,
	mounted: Mutex<Vec<RootTag>>,
}

impl RootTagAllocator {
	pub const FIRST: RootTag = 1;
	pub const INCREMENT: RootTag = 10;

	pub fn new() -> Self {
		Self {
			next: AtomicI64::new(Self::FIRST),
			mounted: Mutex::new(Vec::new()),
		}
	}

	/// Tags currently mounted, in mount order.
	pub fn mounted(&self) -> Vec<RootTag> {
		self.mounted.lock().clone()
	}
}

impl Default for RootTagAllocator {
	fn default() -> Self {
		Self::new()
	}
}

impl RootViewHost for RootTagAllocator {
	fn add_root_view(&self, view: &Arc<dyn RootView>) -> RootTag {
		let tag = self.next.fetch_add(Self::INCREMENT, Ordering::AcqRel);
		self.mounted.lock().push(tag);
		tracing::trace!(tag, module = view.module_name(), "root.add");
		tag
	}

	fn remove_root_view(&self, tag: RootTag) {
		self.mounted.lock().retain(|mounted| *mounted != tag);
		tracing::trace!(tag, "root.remove");
	}
}

/// Root without a visual surface.
#[derive(Debug)]
pub struct HeadlessRootView {
	module_name: String,
	initial_props: Value,
	cleanups: AtomicUsize,
}

impl HeadlessRootView {
	pub fn new(module_name: impl Into<String>, initial_props: Value) -> Self {
		Self {
			module_name: module_name.into(),
			initial_props,
			cleanups: AtomicUsize::new(0),
		}
	}

	/// How many times the view was cleaned up by a context teardown.
	pub fn cleanups(&self) -> usize {
		self.cleanups.load(Ordering::Acquire)
	}
}

impl RootView for HeadlessRootView {
	fn module_name(&self) -> &str {
		&self.module_name
	}

	fn initial_props(&self) -> Value {
		self.initial_props.clone()
	}

	fn cleanup(&self) {
		self.cleanups.fetch_add(1, Ordering::AcqRel);
	}
}

pub(crate) fn same_view(a: &Arc<dyn RootView>, b: &Arc<dyn RootView>) -> bool {
	std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
