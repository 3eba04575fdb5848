use crate::ConfigError;

/// Errors raised while assembling an [`crate::InstanceManager`].
#[derive(Debug, thiserror::Error)]
pub enum HostError {
	/// No script executor factory was configured.
	#[error("an executor factory is required to build the instance manager")]
	MissingExecutor,
	/// The dispatcher queue thread could not be started.
	#[error("failed to spawn the dispatcher queue: {0}")]
	Dispatcher(#[source] std::io::Error),
	#[error(transparent)]
	Config(#[from] ConfigError),
}
