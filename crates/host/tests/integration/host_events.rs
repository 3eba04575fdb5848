use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use trellis_bridge::executor::replay::{ReplayExecutor, ReplayJournal};
use trellis_bridge::{BackgroundEventListener, BridgeError, LifecycleEventListener, ModuleError, ModuleHolder, RuntimeContext};
use trellis_host::{BackHandler, HeadlessRootView, InstanceManagerBuilder, LifecycleState, RootView};
use trellis_worker::QueueError;

use crate::common::{Fixture, fixture, script, settle, wait_until};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Recorder {
	events: Mutex<Vec<&'static str>>,
}

impl Recorder {
	fn events(&self) -> Vec<&'static str> {
		self.events.lock().clone()
	}

	fn record(&self, event: &'static str) -> Result<(), ModuleError> {
		self.events.lock().push(event);
		Ok(())
	}
}

impl LifecycleEventListener for Recorder {
	fn on_suspend(&self) -> Result<(), ModuleError> {
		self.record("suspend")
	}

	fn on_resume(&self) -> Result<(), ModuleError> {
		self.record("resume")
	}

	fn on_destroy(&self) -> Result<(), ModuleError> {
		self.record("destroy")
	}
}

impl BackgroundEventListener for Recorder {
	fn on_entered_background(&self) -> Result<(), ModuleError> {
		self.record("entered_background")
	}

	fn on_leaving_background(&self) -> Result<(), ModuleError> {
		self.record("leaving_background")
	}
}

fn listen(context: &RuntimeContext, recorder: &Arc<Recorder>) {
	context.add_lifecycle_event_listener(recorder.clone());
	context.add_background_event_listener(recorder.clone());
}

fn counting_back() -> (Arc<AtomicUsize>, BackHandler) {
	let presses = Arc::new(AtomicUsize::new(0));
	let counter = Arc::clone(&presses);
	(presses, Arc::new(move || {
		counter.fetch_add(1, Ordering::SeqCst);
	}))
}

#[tokio::test]
async fn host_events_reach_listeners_in_order() {
	let f = fixture(script());
	let context = f.create().await;
	let recorder = Arc::new(Recorder::default());
	listen(&context, &recorder);

	f.on_dispatcher(|manager| {
		manager.on_resume(Arc::new(|| {}))?;
		manager.on_entered_background()?;
		manager.on_leaving_background()?;
		manager.on_suspend()
	})
	.await
	.unwrap();

	assert_eq!(recorder.events(), vec!["resume", "entered_background", "leaving_background", "suspend"]);
	assert_eq!(f.manager.lifecycle_state(), LifecycleState::Suspended);
}

#[tokio::test]
async fn host_events_off_the_dispatcher_are_rejected() {
	let f = fixture(script());

	assert!(matches!(f.manager.on_suspend(), Err(BridgeError::Queue(QueueError::WrongThread { .. }))));
	assert!(matches!(f.manager.on_resume(Arc::new(|| {})), Err(BridgeError::Queue(QueueError::WrongThread { .. }))));
	assert!(matches!(f.manager.on_back_pressed(), Err(BridgeError::Queue(QueueError::WrongThread { .. }))));
	assert_eq!(f.manager.lifecycle_state(), LifecycleState::BeforeCreate);
}

#[tokio::test]
async fn new_context_catches_up_with_the_host() {
	let recorder = Arc::new(Recorder::default());
	let package_recorder = Arc::clone(&recorder);
	let f = Fixture::build(script(), move |builder, path| {
		builder.bundle_file(path).package(move |context: &Arc<RuntimeContext>| {
			listen(context, &package_recorder);
			Vec::<ModuleHolder>::new()
		})
	});

	f.on_dispatcher(|manager| {
		manager.on_resume(Arc::new(|| {}))?;
		manager.on_entered_background()
	})
	.await
	.unwrap();
	assert!(recorder.events().is_empty());

	f.create().await;
	assert_eq!(recorder.events(), vec!["resume", "entered_background"]);
	assert_eq!(f.manager.lifecycle_state(), LifecycleState::Resumed);

	f.manager.dispose().await;
	assert_eq!(recorder.events(), vec!["resume", "entered_background", "suspend", "destroy"]);
	assert_eq!(f.manager.lifecycle_state(), LifecycleState::BeforeCreate);
}

#[tokio::test]
async fn back_press_without_a_context_runs_the_default_handler() {
	let f = fixture(script());
	let (presses, back) = counting_back();

	f.on_dispatcher(move |manager| {
		manager.on_resume(back)?;
		manager.on_back_pressed()
	})
	.await
	.unwrap();
	assert_eq!(presses.load(Ordering::SeqCst), 1);

	f.on_dispatcher(|manager| {
		manager.on_suspend()?;
		manager.on_back_pressed()
	})
	.await
	.unwrap();
	assert_eq!(presses.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unhandled_back_press_round_trips_through_the_script_side() {
	let f = fixture(script());
	let context = f.create().await;
	let (presses, back) = counting_back();

	f.on_dispatcher(move |manager| {
		manager.on_resume(back)?;
		manager.on_back_pressed()
	})
	.await
	.unwrap();
	settle(&context).await;

	assert!(wait_until(WAIT, || presses.load(Ordering::SeqCst) == 1).await);
	assert_eq!(
		f.journal.function_calls(),
		vec![("RCTDeviceEventEmitter".to_string(), "emit".to_string(), vec![json!("hardwareBackPress"), Value::Null])]
	);
	assert_eq!(presses.load(Ordering::SeqCst), 1);
}

/// Bundle whose application reports a fatal script exception as soon as it runs.
fn fatal_script() -> Value {
	json!({
		"functions": {
			"AppRegistry.runApplication": [{ "module": "ExceptionsManager", "method": "reportFatalException", "args": ["boom", [], 3] }]
		}
	})
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_script_exceptions_reach_the_fatal_handler() {
	let f = fixture(fatal_script());
	let view: Arc<dyn RootView> = Arc::new(HeadlessRootView::new("Main", json!({})));
	f.manager.attach_root_view(view).await.unwrap();

	let context = f.create().await;
	settle(&context).await;

	assert!(wait_until(WAIT, || !f.fatal.lock().is_empty()).await);
	assert_eq!(f.fatal.lock().clone(), vec!["fatal: script exception 3: boom".to_string()]);
	assert_eq!(f.manager.last_fatal_error().as_deref(), Some("fatal: script exception 3: boom"));
	assert_eq!(f.host.mounted(), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_errors_surface_without_a_fatal_handler() {
	let dir = tempfile::tempdir().unwrap();
	let bundle = dir.path().join("index.bundle");
	std::fs::write(&bundle, fatal_script().to_string()).unwrap();
	let manager = InstanceManagerBuilder::new()
		.executor_factory(ReplayExecutor::factory(ReplayJournal::new()))
		.bundle_file(&bundle)
		.build()
		.unwrap();
	assert!(manager.last_fatal_error().is_none());

	manager.attach_root_view(Arc::new(HeadlessRootView::new("Main", json!({})))).await.unwrap();
	let context = manager.create_context(CancellationToken::new()).await.unwrap().unwrap();
	settle(&context).await;

	assert!(wait_until(WAIT, || manager.last_fatal_error().is_some()).await);
	assert_eq!(manager.last_fatal_error().as_deref(), Some("fatal: script exception 3: boom"));
	manager.dispose().await;
}

#[tokio::test]
async fn module_config_lists_core_modules_first() {
	let f = fixture(script());

	let config = f.manager.module_config().unwrap();
	let names: Vec<&str> = config
		.as_array()
		.unwrap()
		.iter()
		.map(|module| module[0].as_str().unwrap())
		.collect();

	assert_eq!(names, vec!["DeviceEventManager", "ExceptionsManager", "Tally"]);
	assert!(f.manager.try_get_context().is_none());
}
