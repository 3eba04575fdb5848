use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use trellis_bridge::{BridgeError, BundleLoader, RuntimeContext};

/// Development tooling the manager consults when developer support is on.
///
/// Supplies bundles from a packager, receives recoverable startup and module failures,
/// and is told when contexts come and go.
#[async_trait]
pub trait DevSupport: Send + Sync {
	fn is_enabled(&self) -> bool;

	fn set_enabled(&self, enabled: bool);

	fn has_cached_bundle(&self) -> bool {
		self.cached_bundle_loader().is_some()
	}

	/// Loader for a bundle previously downloaded from the packager.
	fn cached_bundle_loader(&self) -> Option<Arc<dyn BundleLoader>>;

	/// Fetches a fresh bundle from the packager. `token` fires when the creation attempt
	/// is superseded or the host suspends.
	async fn packager_bundle_loader(&self, token: CancellationToken) -> Result<Arc<dyn BundleLoader>, BridgeError>;

	fn handle_exception(&self, error: BridgeError);

	fn on_new_context_created(&self, context: &Arc<RuntimeContext>) {
		let _ = context;
	}

	fn on_context_destroyed(&self, context: &Arc<RuntimeContext>) {
		let _ = context;
	}
}

/// Dev support for release hosts: never enabled and has no packager.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledDevSupport;

#[async_trait]
impl DevSupport for DisabledDevSupport {
	fn is_enabled(&self) -> bool {
		false
	}

	fn set_enabled(&self, _: bool) {}

	fn cached_bundle_loader(&self) -> Option<Arc<dyn BundleLoader>> {
		None
	}

	async fn packager_bundle_loader(&self, _: CancellationToken) -> Result<Arc<dyn BundleLoader>, BridgeError> {
		Err(BridgeError::Fatal("developer support is disabled; no packager is available".to_string()))
	}

	fn handle_exception(&self, error: BridgeError) {
		tracing::error!(error = %error, "dev_support.unhandled_exception");
	}
}
