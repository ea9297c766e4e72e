//! The adaptive polling scheduler: a 1 Hz tick loop that pops due
//! activities, claims them, and drives each through one processing cycle,
//! plus a separate periodic widget-refresh fan-out.

pub mod processor;
pub mod widget_ticker;

// std
use std::sync::Arc;
// crates.io
use tokio::{sync::Semaphore, time};
// self
use crate::{
	_prelude::*,
	model::MAX_INTERVAL,
	push::PushGateway,
	scheduler::{processor::ActivityProcessor, widget_ticker::WidgetTicker},
	store::StateStore,
	upstream::UpstreamFetcher,
};

/// Upper bound on processors running concurrently within a single tick.
const MAX_CONCURRENT_PROCESSORS: usize = 64;

/// Shared dependencies borrowed by every [`ActivityProcessor`] cycle.
pub struct SchedulerDeps {
	pub(crate) store: Arc<dyn StateStore>,
	pub(crate) upstream: Arc<dyn UpstreamFetcher>,
	pub(crate) push: Arc<dyn PushGateway>,
}

/// Owns the 1 Hz tick timer and the widget-refresh timer, and spawns bounded
/// concurrent processing tasks for each due activity.
pub struct Scheduler {
	deps: Arc<SchedulerDeps>,
	concurrency: Arc<Semaphore>,
}
impl Scheduler {
	/// Build a scheduler from its three collaborators.
	pub fn new(
		store: Arc<dyn StateStore>,
		upstream: Arc<dyn UpstreamFetcher>,
		push: Arc<dyn PushGateway>,
	) -> Self {
		Self {
			deps: Arc::new(SchedulerDeps { store, upstream, push }),
			concurrency: Arc::new(Semaphore::new(MAX_CONCURRENT_PROCESSORS)),
		}
	}

	/// Run a single tick: pop due ids, claim them, and fire off a bounded
	/// concurrent processing task for each. Fire-and-forget — this call
	/// returns once tasks are spawned, not once they complete.
	#[tracing::instrument(skip(self))]
	pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
		let ids = self.deps.store.due_before(now).await?;

		if ids.is_empty() {
			return Ok(());
		}

		let claim_until = now + chrono_duration(MAX_INTERVAL);

		self.deps.store.claim(&ids, claim_until).await?;

		#[cfg(feature = "metrics")]
		crate::metrics::record_tick(ids.len());

		for id in ids {
			let deps = self.deps.clone();
			let permit = self.concurrency.clone().acquire_owned().await.expect("semaphore never closed");

			tokio::spawn(async move {
				let _permit = permit;
				let processor = ActivityProcessor::new(&deps);

				if let Err(err) = processor.process_one(&id, now).await {
					tracing::warn!(error = %err, "processing cycle aborted with a store error");
				}

				#[cfg(feature = "metrics")]
				crate::metrics::record_tick_drained(1);
			});
		}

		Ok(())
	}

	/// Run the 1 Hz tick loop forever. Intended to be spawned as its own
	/// task at process startup.
	pub async fn run_tick_loop(self: Arc<Self>) {
		let mut interval = time::interval(Duration::from_secs(1));

		loop {
			interval.tick().await;

			if let Err(err) = self.tick(Utc::now()).await {
				tracing::warn!(error = %err, "scheduler tick failed");
			}
		}
	}

	/// Build a [`WidgetTicker`] sharing this scheduler's store and push
	/// gateway.
	pub fn widget_ticker(&self) -> WidgetTicker {
		WidgetTicker::new(self.deps.store.clone(), self.deps.push.clone())
	}
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
	chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::{
		model::{AccountLocation, ActivityRecord, Environment, UpstreamCredentials},
		push::NoopPushGateway,
		store::memory::InMemoryStateStore,
		upstream::{FetchOutcome, UpstreamFetcher},
	};

	struct EmptyFetcher;
	#[async_trait::async_trait]
	impl UpstreamFetcher for EmptyFetcher {
		async fn fetch(
			&self,
			_creds: &UpstreamCredentials,
			_account_location: AccountLocation,
			_duration_secs: u64,
		) -> std::result::Result<FetchOutcome, crate::upstream::UpstreamError> {
			Ok(FetchOutcome::default())
		}
	}

	#[tokio::test]
	async fn tick_claims_due_activities_and_reschedules_them() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		let scheduler = Scheduler::new(
			store.clone(),
			Arc::new(EmptyFetcher),
			Arc::new(NoopPushGateway),
		);
		let now = Utc::now();
		let record = ActivityRecord::new(
			"u1",
			"token",
			Environment::Production,
			AccountLocation::Us,
			21_600,
			UpstreamCredentials::default(),
			None,
			now,
		);

		store.put_record("u1", &record).await.unwrap();
		store.schedule("u1", now).await.unwrap();

		scheduler.tick(now).await.unwrap();

		// allow the spawned processing task to run
		tokio::task::yield_now().await;
		tokio::time::sleep(Duration::from_millis(50)).await;

		let due_now = store.due_before(now).await.unwrap();

		assert!(due_now.is_empty(), "claim should have pushed the schedule past `now`");
	}

	#[tokio::test]
	async fn tick_with_nothing_due_is_a_no_op() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		let scheduler =
			Scheduler::new(store.clone(), Arc::new(EmptyFetcher), Arc::new(NoopPushGateway));

		scheduler.tick(Utc::now()).await.unwrap();
	}
}
