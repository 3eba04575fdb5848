use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::task::{Context, Waker};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use trellis_bridge::{BridgeError, CachedNetworkBundleLoader, ContextState};
use trellis_host::LifecycleState;

use crate::common::{Fixture, RecordingDevSupport, Tally, fixture, script, settle, wait_until};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn create_twice_is_rejected() {
	let f = fixture(script());

	let context = f.create().await;
	assert!(context.has_active_instance());
	assert!(matches!(f.manager.create_context(CancellationToken::new()).await, Err(BridgeError::AlreadyCreated)));
	assert!(Arc::ptr_eq(&f.manager.try_get_context().unwrap(), &context));
	assert_eq!(f.manager.source_url(), Some(f.bundle.display().to_string()));

	settle(&context).await;
	assert_eq!(context.native_module::<Tally>().unwrap().value(), 1);
	assert_eq!(f.builds(), 1);
}

#[tokio::test]
async fn recreate_and_get_need_a_started_creation() {
	let f = fixture(script());

	assert!(matches!(f.manager.recreate_context(CancellationToken::new()).await, Err(BridgeError::NotYetCreated)));
	assert!(matches!(f.manager.get_context().await, Err(BridgeError::NotYetCreated)));
	assert!(f.manager.try_get_context().is_none());

	let first = f.manager.get_or_create_context(CancellationToken::new()).await.unwrap().unwrap();
	let again = f.manager.get_or_create_context(CancellationToken::new()).await.unwrap().unwrap();
	assert!(Arc::ptr_eq(&first, &again));
	assert_eq!(f.builds(), 1);

	let second = f.manager.recreate_context(CancellationToken::new()).await.unwrap().unwrap();
	assert!(!Arc::ptr_eq(&first, &second));
	assert_eq!(first.state(), ContextState::Disposed);
	assert!(!first.has_active_instance());
	assert_eq!(f.tally(0).disposed(), 1);
	assert_eq!(f.builds(), 2);
	assert!(Arc::ptr_eq(&f.manager.get_context().await.unwrap().unwrap(), &second));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_creates_build_once() {
	let f = fixture(script());

	let (a, b) = tokio::join!(f.manager.create_context(CancellationToken::new()), f.manager.create_context(CancellationToken::new()));
	let created = [&a, &b].iter().filter(|result| matches!(result, Ok(Some(_)))).count();
	let rejected = [&a, &b].iter().filter(|result| matches!(result, Err(BridgeError::AlreadyCreated))).count();

	assert_eq!((created, rejected), (1, 1));
	assert_eq!(f.builds(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_recreate_supersedes_the_running_one() {
	let f = fixture(script());
	f.create().await;

	f.gate.close();
	let manager = Arc::clone(&f.manager);
	let first = tokio::spawn(async move { manager.recreate_context(CancellationToken::new()).await });
	assert!(wait_until(WAIT, || f.gate.entered() == 2).await);

	// Polling once installs the newer attempt, then parks on the lock.
	let mut second = Box::pin(f.manager.recreate_context(CancellationToken::new()));
	assert!(second.as_mut().poll(&mut Context::from_waker(Waker::noop())).is_pending());
	f.gate.open();

	assert!(first.await.unwrap().unwrap().is_none());
	let context = second.await.unwrap().expect("the newer attempt should win");
	assert!(context.has_active_instance());
	assert_eq!(f.builds(), 3);
	assert_eq!(f.tally(1).disposed(), 1);
	assert!(Arc::ptr_eq(&f.manager.try_get_context().unwrap(), &context));
}

#[tokio::test]
async fn cancelled_caller_gets_cancelled() {
	let f = fixture(script());
	let token = CancellationToken::new();
	token.cancel();

	assert!(matches!(f.manager.create_context(token).await, Err(BridgeError::Cancelled)));
	assert!(f.manager.try_get_context().is_none());
	assert_eq!(f.builds(), 0);

	assert!(matches!(f.manager.create_context(CancellationToken::new()).await, Err(BridgeError::AlreadyCreated)));
	assert!(f.manager.recreate_context(CancellationToken::new()).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelling_mid_flight_disposes_the_partial_context() {
	let f = fixture(script());
	let token = CancellationToken::new();

	f.gate.close();
	let manager = Arc::clone(&f.manager);
	let caller = token.clone();
	let attempt = tokio::spawn(async move { manager.create_context(caller).await });
	assert!(wait_until(WAIT, || f.gate.entered() == 1).await);
	token.cancel();
	f.gate.open();

	assert!(matches!(attempt.await.unwrap(), Err(BridgeError::Cancelled)));
	assert!(f.manager.try_get_context().is_none());
	assert_eq!(f.tally(0).disposed(), 1);
	assert!(f.host.events().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn suspending_cancels_creation_until_resume() {
	let f = fixture(script());

	f.gate.close();
	let manager = Arc::clone(&f.manager);
	let attempt = tokio::spawn(async move { manager.create_context(CancellationToken::new()).await });
	assert!(wait_until(WAIT, || f.gate.entered() == 1).await);
	f.on_dispatcher(|manager| manager.on_suspend()).await.unwrap();
	f.gate.open();

	assert!(attempt.await.unwrap().unwrap().is_none());
	assert!(f.manager.recreate_context(CancellationToken::new()).await.unwrap().is_none());

	f.on_dispatcher(|manager| manager.on_resume(Arc::new(|| {}))).await.unwrap();
	let context = f.manager.recreate_context(CancellationToken::new()).await.unwrap().unwrap();
	assert!(context.has_active_instance());
	assert_eq!(f.manager.lifecycle_state(), LifecycleState::Resumed);
}

#[tokio::test]
async fn startup_failure_without_developer_support_is_fatal() {
	let f = fixture(json!("not a script"));

	let err = f.manager.create_context(CancellationToken::new()).await.unwrap_err();
	let BridgeError::Fatal(message) = err else {
		panic!("expected a fatal error, got {err:?}");
	};
	assert!(message.contains("invalid bundle"), "{message}");
	assert!(f.manager.try_get_context().is_none());
	assert_eq!(f.tally(0).disposed(), 1);
}

#[tokio::test]
async fn startup_failure_with_developer_support_goes_to_dev_support() {
	let dev = Arc::new(RecordingDevSupport::default());
	let dev_support = dev.clone();
	let f = Fixture::build(json!("not a script"), move |builder, path| {
		builder.bundle_file(path).use_developer_support(true).dev_support(dev_support)
	});

	assert!(f.manager.create_context(CancellationToken::new()).await.unwrap().is_none());
	assert!(f.manager.try_get_context().is_none());

	let errors = dev.errors.lock().clone();
	assert_eq!(errors.len(), 1);
	assert!(errors[0].contains("invalid bundle"), "{errors:?}");
	assert_eq!(dev.created.load(Ordering::SeqCst), 0);
	assert!(f.fatal.lock().is_empty());
}

#[tokio::test]
async fn developer_support_prefers_the_cached_bundle() {
	let dev = Arc::new(RecordingDevSupport::default());
	let dev_support = dev.clone();
	let f = Fixture::build(script(), move |builder, _| builder.use_developer_support(true).dev_support(dev_support));
	dev.set_cached(Arc::new(CachedNetworkBundleLoader::new("http://localhost:8081/index.bundle", &f.bundle)));

	let context = f.create().await;
	assert_eq!(f.manager.source_url().as_deref(), Some("http://localhost:8081/index.bundle"));
	assert_eq!(dev.packager_requests.load(Ordering::SeqCst), 0);
	assert_eq!(dev.created.load(Ordering::SeqCst), 1);

	f.manager.recreate_context(CancellationToken::new()).await.unwrap().unwrap();
	assert_eq!(context.state(), ContextState::Disposed);
	assert_eq!(dev.created.load(Ordering::SeqCst), 2);
	assert_eq!(dev.destroyed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn packager_wait_follows_supersession_and_caller_cancellation() {
	let dev = Arc::new(RecordingDevSupport::default());
	let dev_support = dev.clone();
	let f = Fixture::build(script(), move |builder, _| builder.use_developer_support(true).dev_support(dev_support));

	let manager = Arc::clone(&f.manager);
	let first = tokio::spawn(async move { manager.create_context(CancellationToken::new()).await });
	assert!(wait_until(WAIT, || dev.packager_requests.load(Ordering::SeqCst) == 1).await);

	let token = CancellationToken::new();
	let manager = Arc::clone(&f.manager);
	let caller = token.clone();
	let second = tokio::spawn(async move { manager.recreate_context(caller).await });

	assert!(first.await.unwrap().unwrap().is_none());
	assert!(wait_until(WAIT, || dev.packager_requests.load(Ordering::SeqCst) == 2).await);
	token.cancel();
	assert!(matches!(second.await.unwrap(), Err(BridgeError::Cancelled)));
	assert_eq!(f.builds(), 0);
	assert!(dev.errors.lock().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispose_cancels_the_attempt_in_flight() {
	let f = fixture(script());

	f.gate.close();
	let manager = Arc::clone(&f.manager);
	let attempt = tokio::spawn(async move { manager.create_context(CancellationToken::new()).await });
	assert!(wait_until(WAIT, || f.gate.entered() == 1).await);

	// Polling once cancels the running attempt, then parks on the lock.
	let mut disposing = Box::pin(f.manager.dispose());
	assert!(disposing.as_mut().poll(&mut Context::from_waker(Waker::noop())).is_pending());
	f.gate.open();

	assert!(attempt.await.unwrap().unwrap().is_none());
	disposing.await;
	assert!(f.manager.try_get_context().is_none());
	assert_eq!(f.tally(0).disposed(), 1);
	assert!(f.manager.create_context(CancellationToken::new()).await.unwrap().is_some());
}

#[tokio::test]
async fn dispose_resets_creation() {
	let f = fixture(script());
	let context = f.create().await;

	f.manager.dispose().await;
	assert!(f.manager.try_get_context().is_none());
	assert_eq!(context.state(), ContextState::Disposed);
	assert_eq!(f.tally(0).disposed(), 1);
	assert_eq!(f.manager.lifecycle_state(), LifecycleState::BeforeCreate);
	assert!(matches!(f.manager.get_context().await, Err(BridgeError::NotYetCreated)));

	let context = f.create().await;
	assert!(context.has_active_instance());
	assert_eq!(f.builds(), 2);
}
