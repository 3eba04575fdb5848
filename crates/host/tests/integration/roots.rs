use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use trellis_host::{HeadlessRootView, RootView};

use crate::common::{HostEvent, fixture, script, settle};

fn headless(module: &str, props: Value) -> (Arc<HeadlessRootView>, Arc<dyn RootView>) {
	let view = Arc::new(HeadlessRootView::new(module, props));
	let handle: Arc<dyn RootView> = view.clone();
	(view, handle)
}

fn run_application(module: &str, tag: i64, props: Value) -> (String, String, Vec<Value>) {
	(
		"AppRegistry".to_string(),
		"runApplication".to_string(),
		vec![json!(module), json!({ "rootTag": tag, "initialProps": props })],
	)
}

fn unmount(tag: i64) -> (String, String, Vec<Value>) {
	("AppRegistry".to_string(), "unmountApplicationComponentAtRootTag".to_string(), vec![json!(tag)])
}

fn added(tag: i64, module: &str) -> HostEvent {
	HostEvent::Added {
		tag,
		module: module.to_string(),
	}
}

#[tokio::test]
async fn roots_attached_early_mount_on_creation() {
	let f = fixture(script());
	let (_, main) = headless("Main", json!({ "theme": "dark" }));
	let (_, side) = headless("Side", json!({}));

	f.manager.attach_root_view(main).await.unwrap();
	f.manager.attach_root_view(side).await.unwrap();
	assert_eq!(f.manager.attached_root_count(), 2);
	assert!(f.host.events().is_empty());
	assert!(f.journal.function_calls().is_empty());

	let context = f.create().await;
	settle(&context).await;

	assert_eq!(f.host.mounted(), vec![1, 11]);
	assert_eq!(
		f.journal.function_calls(),
		vec![run_application("Main", 1, json!({ "theme": "dark" })), run_application("Side", 11, json!({}))]
	);
	assert_eq!(f.tally(0).value(), 3);
}

#[tokio::test]
async fn roots_are_only_cleaned_up_when_a_context_is_torn_down() {
	let f = fixture(script());
	let (main_view, main) = headless("Main", json!({}));
	f.manager.attach_root_view(main).await.unwrap();

	f.manager.dispose().await;
	assert_eq!(main_view.cleanups(), 0);

	let context = f.create().await;
	settle(&context).await;
	assert_eq!(main_view.cleanups(), 0);
	assert_eq!(f.host.events(), vec![added(1, "Main")]);

	f.manager.dispose().await;
	assert_eq!(main_view.cleanups(), 1);
	assert_eq!(f.host.events(), vec![added(1, "Main"), HostEvent::Removed { tag: 1, unmount_sent: false }]);
	assert_eq!(f.manager.attached_root_count(), 1);
}

#[tokio::test]
async fn attaching_to_a_live_context_mounts_once() {
	let f = fixture(script());
	let context = f.create().await;
	let (_, main) = headless("Main", json!({}));

	f.manager.attach_root_view(Arc::clone(&main)).await.unwrap();
	f.manager.attach_root_view(Arc::clone(&main)).await.unwrap();
	settle(&context).await;

	assert_eq!(f.manager.attached_root_count(), 1);
	assert_eq!(f.host.events(), vec![added(1, "Main")]);
	assert_eq!(f.journal.function_calls(), vec![run_application("Main", 1, json!({}))]);
}

#[tokio::test]
async fn detach_removes_the_native_root_before_the_script_unmount() {
	let f = fixture(script());
	let (_, main) = headless("Main", json!({}));
	f.manager.attach_root_view(Arc::clone(&main)).await.unwrap();
	let context = f.create().await;
	settle(&context).await;

	f.manager.detach_root_view(&main).await.unwrap();
	settle(&context).await;

	assert_eq!(f.host.events(), vec![added(1, "Main"), HostEvent::Removed { tag: 1, unmount_sent: false }]);
	assert_eq!(f.journal.function_calls().last(), Some(&unmount(1)));
	assert!(f.host.mounted().is_empty());
	assert_eq!(f.manager.attached_root_count(), 0);

	f.manager.detach_root_view(&main).await.unwrap();
	settle(&context).await;
	assert_eq!(f.host.events().len(), 2);
	assert_eq!(f.journal.function_calls().iter().filter(|call| **call == unmount(1)).count(), 1);
}

#[tokio::test]
async fn detach_without_a_context_only_forgets_the_view() {
	let f = fixture(script());
	let (_, main) = headless("Main", json!({}));
	let (_, stranger) = headless("Stranger", json!({}));

	f.manager.attach_root_view(Arc::clone(&main)).await.unwrap();
	f.manager.detach_root_view(&stranger).await.unwrap();
	assert_eq!(f.manager.attached_root_count(), 1);
	f.manager.detach_root_view(&main).await.unwrap();
	assert_eq!(f.manager.attached_root_count(), 0);

	let context = f.create().await;
	settle(&context).await;
	assert!(f.host.events().is_empty());
	assert!(f.journal.function_calls().is_empty());
}

#[tokio::test]
async fn recreate_cleans_up_and_remounts_in_order() {
	let f = fixture(script());
	let (main_view, main) = headless("Main", json!({}));
	let (side_view, side) = headless("Side", json!({}));
	f.manager.attach_root_view(main).await.unwrap();
	f.manager.attach_root_view(side).await.unwrap();
	f.create().await;

	let context = f.manager.recreate_context(Default::default()).await.unwrap().unwrap();
	settle(&context).await;

	assert_eq!((main_view.cleanups(), side_view.cleanups()), (1, 1));
	assert_eq!(
		f.host.events(),
		vec![
			added(1, "Main"),
			added(11, "Side"),
			HostEvent::Removed { tag: 1, unmount_sent: false },
			HostEvent::Removed { tag: 11, unmount_sent: false },
			added(21, "Main"),
			added(31, "Side"),
		]
	);
	let calls = f.journal.function_calls();
	assert_eq!(&calls[calls.len() - 2..], &[run_application("Main", 21, json!({})), run_application("Side", 31, json!({}))]);
	assert_eq!(f.host.mounted(), vec![21, 31]);
}
