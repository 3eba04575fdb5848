//! Trellis command line host.
//!
//! Drives an [`InstanceManager`] against the replay executor: `run` boots a bundle, mounts
//! one headless root and prints what the script side observed; `modules` prints the module
//! metadata a new context would publish.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;
use trellis_bridge::executor::replay::{ReplayExecutor, ReplayJournal};
use trellis_bridge::{BridgeError, RuntimeContext};
use trellis_host::{HeadlessRootView, HostConfig, InstanceManager, InstanceManagerBuilder, RootView};

#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(about = "Boot replay bundles through the trellis bridge")]
struct Args {
	/// Host configuration file
	#[arg(short, long, global = true, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Verbose logging
	#[arg(short, long, global = true)]
	verbose: bool,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Print the module config of a fresh context
	Modules,
	/// Load a bundle, mount one root and print the executor journal
	Run {
		/// Bundle file; overrides the configured one
		#[arg(value_name = "BUNDLE")]
		bundle: Option<PathBuf>,

		/// Application key to mount; defaults to the main module name
		#[arg(short, long)]
		app: Option<String>,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	setup_tracing(args.verbose);

	let config = match &args.config {
		Some(path) => HostConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
		None => HostConfig::default(),
	};

	match args.command {
		Command::Modules => {
			let manager = build_manager(&config, None, ReplayJournal::new())?;
			println!("{}", serde_json::to_string_pretty(&manager.module_config()?)?);
			Ok(())
		}
		Command::Run { bundle, app } => run(&config, bundle, app).await,
	}
}

fn build_manager(config: &HostConfig, bundle: Option<PathBuf>, journal: ReplayJournal) -> anyhow::Result<InstanceManager> {
	let mut builder = InstanceManagerBuilder::from_config(config)
		.executor_factory(ReplayExecutor::factory(journal))
		.fatal_handler(Arc::new(|err: BridgeError| tracing::error!(error = %err, "trellis.fatal")));
	if let Some(bundle) = bundle {
		builder = builder.bundle_file(bundle);
	}
	Ok(builder.build()?)
}

async fn run(config: &HostConfig, bundle: Option<PathBuf>, app: Option<String>) -> anyhow::Result<()> {
	let journal = ReplayJournal::new();
	let manager = Arc::new(build_manager(config, bundle, journal.clone())?);
	let app = app.unwrap_or_else(|| manager.main_module_name().to_string());
	info!(app = %app, "starting trellis");

	let view: Arc<dyn RootView> = Arc::new(HeadlessRootView::new(app, json!({})));
	manager.attach_root_view(Arc::clone(&view)).await?;

	let resumed = Arc::clone(&manager);
	manager
		.dispatcher()
		.run_sync(move || resumed.on_resume(Arc::new(|| info!("default back handler"))))
		.await??;

	let context = manager
		.create_context(CancellationToken::new())
		.await?
		.context("context creation was cancelled")?;
	info!(source_url = ?manager.source_url(), "context created");
	settle(&context).await?;

	println!("{}", serde_json::to_string_pretty(&journal.entries())?);

	manager.detach_root_view(&view).await?;
	settle(&context).await?;
	manager.dispose().await;
	Ok(())
}

/// Drains the context's queues, including work queued by the drained jobs.
async fn settle(context: &RuntimeContext) -> anyhow::Result<()> {
	let instance = context.instance()?;
	let queues = instance.queues();
	for _ in 0..3 {
		queues.script().run_sync(|| ()).await?;
		queues.native_modules().run_sync(|| ()).await?;
		queues.dispatcher().run_sync(|| ()).await?;
	}
	Ok(())
}

fn setup_tracing(verbose: bool) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	if let Some(log_dir) = std::env::var("TRELLIS_LOG_DIR").ok().map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let pid = std::process::id();
		let log_path = log_dir.join(format!("trellis.{}.log", pid));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("trellis_host=trace,trellis_bridge=trace,debug")
				} else {
					EnvFilter::new("trellis_host=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter).with(file_layer).init();

			tracing::info!(path = ?log_path, "trellis tracing initialized");
			return;
		}
	}

	// Logs go to stderr so the journal on stdout stays parseable.
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
		.init();
}
