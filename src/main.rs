//! Process entry point: load configuration, wire up collaborators, and run
//! the tick loop, widget ticker, and HTTP front door side by side.

// std
use std::sync::Arc;
// self
use live_activity_scheduler::{
	Error, Result,
	config::Config,
	http::{self, AppState},
	push::{NoopPushGateway, PushGateway, apns::ApnsPushGateway},
	scheduler::Scheduler,
	store::{StateStore, redis_store::RedisStateStore},
	upstream::dexcom::DexcomFetcher,
};

#[tokio::main]
async fn main() -> Result<()> {
	init_tracing();

	#[cfg(feature = "prometheus")]
	live_activity_scheduler::metrics::install_default_exporter()?;

	let config = Config::from_env()?;
	let store: Arc<dyn StateStore> = Arc::new(RedisStateStore::connect(&config.redis_url)?);
	let upstream = Arc::new(DexcomFetcher::new()?);
	let push: Arc<dyn PushGateway> = match config.push {
		Some(push_config) => Arc::new(ApnsPushGateway::new(push_config.credentials)?),
		None => Arc::new(NoopPushGateway),
	};

	let scheduler = Arc::new(Scheduler::new(store.clone(), upstream, push.clone()));
	let widget_ticker = scheduler.widget_ticker();

	tokio::spawn(scheduler.clone().run_tick_loop());
	tokio::spawn(widget_ticker.run_loop(config.widget_tick_interval));

	let state = Arc::new(AppState::new(store, push));
	let app = http::build_router(state);

	let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.map_err(Error::Io)?;

	tracing::info!(addr = %config.bind_addr, "live-activity-scheduler listening");

	axum::serve(listener, app).await.map_err(Error::Io)?;

	Ok(())
}

fn init_tracing() {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();
}
