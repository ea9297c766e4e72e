//! Per-activity state machine: decide what to do with a fresh, stale, or
//! missing reading; compute the next fire time; persist; re-enqueue.

// crates.io
use rand::Rng;
// self
use crate::{
	_prelude::*,
	alert,
	model::{
		ActivityRecord, BACKOFF, ERROR_BACKOFF, EndReason, MAX_INTERVAL, MIN_INTERVAL,
		READING_INTERVAL, Reading,
	},
	push::{ContentState, HistoryPoint, PushGateway},
	scheduler::SchedulerDeps,
	security::redact_activity_id,
	store::StateStore,
	upstream::{FetchOutcome, UpstreamError, UpstreamFetcher},
};

/// A Live Activity outlives this many missed 429 retries before giving up
/// (status-429 branch of `handleDecoding`).
const DECODING_RETRY_LIMIT: u32 = 5;
/// Retry ceiling for the plain network/5xx branch (`handleGeneric`).
const GENERIC_RETRY_LIMIT: u32 = 3;

/// Runs one processing cycle for a single activity id.
pub struct ActivityProcessor<'a> {
	deps: &'a SchedulerDeps,
}
impl<'a> ActivityProcessor<'a> {
	/// Build a processor borrowing the scheduler's shared dependencies.
	pub fn new(deps: &'a SchedulerDeps) -> Self {
		Self { deps }
	}

	/// Run exactly one processing cycle for `id` as of `now`.
	#[tracing::instrument(skip(self), fields(id = %redact_activity_id(id)))]
	pub async fn process_one(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
		let Some(mut record) = self.deps.store.get_record(id).await? else {
			self.deps.store.unschedule(id).await?;

			return Ok(());
		};

		if record.has_expired(now) {
			self.terminate(id, &record, EndReason::MaxDuration).await?;

			return Ok(());
		}

		let fetch = self
			.deps
			.upstream
			.fetch(&record.credentials, record.account_location, record.duration_secs)
			.await;

		let outcome = match fetch {
			Ok(outcome) => outcome,
			Err(UpstreamError::ClientHardError(reason)) => {
				tracing::info!(reason, "upstream refused credentials, terminating activity");
				self.terminate(id, &record, EndReason::DexcomError).await?;

				return Ok(());
			},
			Err(err @ UpstreamError::DecodingError { .. }) => {
				self.handle_decoding(id, &mut record, now, &err).await?;

				return Ok(());
			},
			Err(UpstreamError::GenericError(_)) => {
				self.handle_generic(id, &mut record, now).await?;

				return Ok(());
			},
		};

		if outcome.readings.is_empty() {
			#[cfg(feature = "metrics")]
			crate::metrics::record_poll("empty");

			let old_interval = record.poll_interval;

			record.set_poll_interval(old_interval.mul_f64(BACKOFF));
			self.reschedule(id, &mut record, now, chrono_duration(old_interval), None, true, &outcome)
				.await?;

			return Ok(());
		}

		let latest = *outcome.readings.last().expect("checked non-empty above");

		if let Some(last_reading_date) = record.last_reading_date() {
			if latest.date <= last_reading_date {
				#[cfg(feature = "metrics")]
				crate::metrics::record_poll("stale");

				let since_last = now.signed_duration_since(last_reading_date);

				if since_last > chrono_reading_interval() {
					let old_interval = record.poll_interval;

					record.set_poll_interval(old_interval.mul_f64(BACKOFF));
					self.reschedule(
						id,
						&mut record,
						now,
						chrono_duration(old_interval),
						None,
						false,
						&outcome,
					)
					.await?;
				} else {
					let until_next = chrono_reading_interval() - since_last;
					let delay = until_next.max(chrono::Duration::zero()) + chrono_duration(MIN_INTERVAL);
					let delay = delay.max(chrono_duration(MIN_INTERVAL));

					record.set_poll_interval(MIN_INTERVAL);
					self.reschedule(id, &mut record, now, delay, None, true, &outcome).await?;
				}

				return Ok(());
			}
		}

		#[cfg(feature = "metrics")]
		crate::metrics::record_poll("delivered");

		let alert = alert::decide(&latest, record.last_reading.as_ref(), record.preferences.as_ref());
		let history = vec![HistoryPoint { t: latest.date.timestamp(), v: latest.value as i16 }];
		let state = ContentState::for_reading(latest.value, history);
		let stale_date = latest.date + chrono_reading_interval() * 2;
		let push_result = self
			.deps
			.push
			.send_live_activity_update(
				record.environment,
				&record.push_token,
				&state,
				alert.as_ref(),
				stale_date,
				latest.date,
			)
			.await;

		#[cfg(feature = "metrics")]
		crate::metrics::record_reading_delivered(record.environment, alert.is_some());

		if let Err(err) = push_result {
			#[cfg(feature = "metrics")]
			crate::metrics::record_push(record.environment, false);

			if err.is_terminal() {
				tracing::info!(error = %err, "terminal APNs error, terminating activity");
				self.terminate(id, &record, EndReason::ApnsInvalidToken).await?;

				return Ok(());
			}

			tracing::warn!(error = %err, "non-terminal APNs error, will retry next cycle");
		} else {
			#[cfg(feature = "metrics")]
			crate::metrics::record_push(record.environment, true);
		}

		let since_latest = now.signed_duration_since(latest.date);
		let until_next = chrono_reading_interval() - since_latest;
		let delay = (until_next + chrono_duration(MIN_INTERVAL)).max(chrono_duration(MIN_INTERVAL));

		record.set_poll_interval(MIN_INTERVAL);
		self.reschedule(id, &mut record, now, delay, Some(latest), true, &outcome).await?;

		Ok(())
	}

	async fn handle_decoding(
		&self,
		id: &str,
		record: &mut ActivityRecord,
		now: DateTime<Utc>,
		err: &UpstreamError,
	) -> Result<()> {
		#[cfg(feature = "metrics")]
		crate::metrics::record_poll("decoding_error");

		if record.poll_interval >= MAX_INTERVAL && record.retry_count > DECODING_RETRY_LIMIT {
			tracing::info!("retry budget exhausted, terminating activity");
			self.terminate(id, record, EndReason::TooManyRetries).await?;

			return Ok(());
		}

		let old_interval = record.poll_interval;

		record.set_poll_interval(old_interval.mul_f64(ERROR_BACKOFF));
		record.retry_count += 1;

		let delay = if err.status() == Some(429) {
			chrono::Duration::seconds(60) + jittered_seconds(10)
		} else {
			chrono_duration(old_interval)
		};

		self.write_and_schedule(id, record, now, delay).await
	}

	async fn handle_generic(&self, id: &str, record: &mut ActivityRecord, now: DateTime<Utc>) -> Result<()> {
		#[cfg(feature = "metrics")]
		crate::metrics::record_poll("generic_error");

		if record.poll_interval >= MAX_INTERVAL && record.retry_count >= GENERIC_RETRY_LIMIT {
			tracing::info!("retry budget exhausted, terminating activity");
			self.terminate(id, record, EndReason::TooManyRetries).await?;

			return Ok(());
		}

		let old_interval = record.poll_interval;

		record.set_poll_interval(old_interval.mul_f64(ERROR_BACKOFF));
		record.retry_count += 1;

		self.write_and_schedule(id, record, now, chrono_duration(old_interval)).await
	}

	async fn reschedule(
		&self,
		id: &str,
		record: &mut ActivityRecord,
		now: DateTime<Utc>,
		delay: chrono::Duration,
		last_reading: Option<Reading>,
		reset_retries: bool,
		outcome: &FetchOutcome,
	) -> Result<()> {
		if let Some(account_id) = outcome.refreshed_account_id {
			record.credentials.account_id = Some(account_id);
		}
		if let Some(session_id) = outcome.refreshed_session_id {
			record.credentials.session_id = Some(session_id);
		}
		if let Some(reading) = last_reading {
			record.last_reading = Some(reading);
		}
		if reset_retries {
			record.retry_count = 0;
		}

		self.write_and_schedule(id, record, now, delay).await
	}

	async fn write_and_schedule(
		&self,
		id: &str,
		record: &ActivityRecord,
		now: DateTime<Utc>,
		delay: chrono::Duration,
	) -> Result<()> {
		self.deps.store.put_record(id, record).await?;
		self.deps.store.schedule(id, now + delay).await?;

		Ok(())
	}

	async fn terminate(&self, id: &str, record: &ActivityRecord, reason: EndReason) -> Result<()> {
		if let Err(err) =
			self.deps.push.send_live_activity_end(record.environment, &record.push_token).await
		{
			tracing::warn!(error = %err, "best-effort end push failed");
		}

		self.deps.store.delete_record(id).await?;
		self.deps.store.unschedule(id).await?;

		#[cfg(feature = "metrics")]
		crate::metrics::record_termination(reason);

		tracing::info!(%reason, "activity terminated");

		Ok(())
	}
}

fn chrono_reading_interval() -> chrono::Duration {
	chrono_duration(READING_INTERVAL)
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
	chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn jittered_seconds(spread: i64) -> chrono::Duration {
	let offset = rand::rng().random_range(-spread..=spread);

	chrono::Duration::seconds(offset)
}

#[cfg(test)]
mod tests {
	use std::sync::Mutex;

	use super::*;
	use crate::{
		model::{AccountLocation, Environment, Trend, UpstreamCredentials},
		push::NoopPushGateway,
		store::memory::InMemoryStateStore,
	};

	/// Stub [`UpstreamFetcher`] that returns a single scripted result once,
	/// then panics if called again — every test below drives exactly one
	/// `process_one` cycle.
	struct ScriptedFetcher(Mutex<Option<std::result::Result<FetchOutcome, UpstreamError>>>);
	impl ScriptedFetcher {
		fn once(result: std::result::Result<FetchOutcome, UpstreamError>) -> Self {
			Self(Mutex::new(Some(result)))
		}
	}
	#[async_trait::async_trait]
	impl UpstreamFetcher for ScriptedFetcher {
		async fn fetch(
			&self,
			_creds: &UpstreamCredentials,
			_account_location: AccountLocation,
			_duration_secs: u64,
		) -> std::result::Result<FetchOutcome, UpstreamError> {
			self.0.lock().unwrap().take().expect("fetch called more than once in this test")
		}
	}

	fn sample_record(now: DateTime<Utc>) -> ActivityRecord {
		ActivityRecord::new(
			"u1",
			"token",
			Environment::Production,
			AccountLocation::Us,
			21_600,
			UpstreamCredentials::default(),
			None,
			now,
		)
	}

	fn deps(upstream: ScriptedFetcher) -> (Arc<dyn StateStore>, SchedulerDeps) {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
		let deps = SchedulerDeps {
			store: store.clone(),
			upstream: Arc::new(upstream),
			push: Arc::new(NoopPushGateway),
		};

		(store, deps)
	}

	/// `outcome.readings` empty: back off by `BACKOFF`, reset retries, and
	/// reschedule after the *old* poll interval (spec §4.F's empty-readings
	/// branch).
	#[tokio::test]
	async fn empty_readings_backs_off_and_resets_retries() {
		let now = Utc::now();
		let (store, deps) = deps(ScriptedFetcher::once(Ok(FetchOutcome::default())));
		let mut record = sample_record(now);

		record.retry_count = 2;
		record.set_poll_interval(MIN_INTERVAL);
		store.put_record("u1", &record).await.unwrap();

		ActivityProcessor::new(&deps).process_one("u1", now).await.unwrap();

		let updated = store.get_record("u1").await.unwrap().unwrap();

		assert_eq!(updated.poll_interval, MIN_INTERVAL.mul_f64(BACKOFF));
		assert_eq!(updated.retry_count, 0);

		let due = store.due_before(now + chrono_duration(MIN_INTERVAL)).await.unwrap();
		assert_eq!(due, vec!["u1".to_string()]);
		assert!(store.due_before(now + chrono::Duration::seconds(3)).await.unwrap().is_empty());
	}

	/// Stale reading, `sinceLast > readingInterval`: back off by `BACKOFF`
	/// and do *not* reset the retry count.
	#[tokio::test]
	async fn stale_reading_past_reading_interval_backs_off_without_resetting_retries() {
		let now = Utc::now();
		let last_reading_date = now - chrono::Duration::seconds(400);
		let stale = Reading { date: last_reading_date, value: 110, trend: Trend::Flat };
		let (store, deps) =
			deps(ScriptedFetcher::once(Ok(FetchOutcome { readings: vec![stale], ..Default::default() })));
		let mut record = sample_record(now);

		record.retry_count = 2;
		record.last_reading = Some(stale);
		record.set_poll_interval(MIN_INTERVAL);
		store.put_record("u1", &record).await.unwrap();

		ActivityProcessor::new(&deps).process_one("u1", now).await.unwrap();

		let updated = store.get_record("u1").await.unwrap().unwrap();

		assert_eq!(updated.poll_interval, MIN_INTERVAL.mul_f64(BACKOFF));
		assert_eq!(updated.retry_count, 2, "resetRetries=false on this branch");

		let due = store.due_before(now + chrono_duration(MIN_INTERVAL)).await.unwrap();
		assert_eq!(due, vec!["u1".to_string()]);
	}

	/// Stale reading, `sinceLast <= readingInterval`: poll interval drops to
	/// the floor, retries reset, and the reschedule delay aims just past the
	/// next expected reading.
	#[tokio::test]
	async fn stale_reading_within_reading_interval_reschedules_near_next_reading() {
		let now = Utc::now();
		let last_reading_date = now - chrono::Duration::seconds(100);
		let stale = Reading { date: last_reading_date, value: 110, trend: Trend::Flat };
		let (store, deps) =
			deps(ScriptedFetcher::once(Ok(FetchOutcome { readings: vec![stale], ..Default::default() })));
		let mut record = sample_record(now);

		record.retry_count = 1;
		record.last_reading = Some(stale);
		record.set_poll_interval(Duration::from_secs(20));
		store.put_record("u1", &record).await.unwrap();

		ActivityProcessor::new(&deps).process_one("u1", now).await.unwrap();

		let updated = store.get_record("u1").await.unwrap().unwrap();

		assert_eq!(updated.poll_interval, MIN_INTERVAL);
		assert_eq!(updated.retry_count, 0);

		// untilNext (200s) + minInterval (4s) = 204s
		let due = store.due_before(now + chrono::Duration::seconds(204)).await.unwrap();
		assert_eq!(due, vec!["u1".to_string()]);
		assert!(store.due_before(now + chrono::Duration::seconds(203)).await.unwrap().is_empty());
	}

	/// `GenericError` below the retry ceiling: back off by `ERROR_BACKOFF`,
	/// increment retries, and reschedule at the *old* poll interval.
	#[tokio::test]
	async fn generic_error_backs_off_without_terminating() {
		let now = Utc::now();
		let (store, deps) =
			deps(ScriptedFetcher::once(Err(UpstreamError::GenericError("timed out".into()))));
		let mut record = sample_record(now);

		record.retry_count = 1;
		record.set_poll_interval(Duration::from_secs(10));
		store.put_record("u1", &record).await.unwrap();

		ActivityProcessor::new(&deps).process_one("u1", now).await.unwrap();

		let updated = store.get_record("u1").await.unwrap().unwrap();

		assert_eq!(updated.poll_interval, Duration::from_secs(10).mul_f64(ERROR_BACKOFF));
		assert_eq!(updated.retry_count, 2);

		let due = store.due_before(now + chrono::Duration::seconds(10)).await.unwrap();
		assert_eq!(due, vec!["u1".to_string()]);
	}

	/// `GenericError` once `pollInterval >= maxInterval AND retryCount >= 3`
	/// terminates the activity with reason `tooManyRetries` in the same
	/// cycle (testable property #6's ceiling for the generic-error branch).
	#[tokio::test]
	async fn generic_error_terminates_once_retry_budget_is_exhausted() {
		let now = Utc::now();
		let (store, deps) =
			deps(ScriptedFetcher::once(Err(UpstreamError::GenericError("still failing".into()))));
		let mut record = sample_record(now);

		record.retry_count = GENERIC_RETRY_LIMIT;
		record.set_poll_interval(MAX_INTERVAL);
		store.put_record("u1", &record).await.unwrap();
		store.schedule("u1", now).await.unwrap();

		ActivityProcessor::new(&deps).process_one("u1", now).await.unwrap();

		assert!(store.get_record("u1").await.unwrap().is_none());
		assert!(store.due_before(now + chrono_duration(MAX_INTERVAL)).await.unwrap().is_empty());
	}

	/// `DecodingError` once `pollInterval >= maxInterval AND retryCount > 5`
	/// terminates the activity with reason `tooManyRetries`.
	#[tokio::test]
	async fn decoding_error_terminates_once_retry_budget_is_exhausted() {
		let now = Utc::now();
		let (store, deps) = deps(ScriptedFetcher::once(Err(UpstreamError::DecodingError {
			status: 500,
			body: Vec::new(),
		})));
		let mut record = sample_record(now);

		record.retry_count = DECODING_RETRY_LIMIT + 1;
		record.set_poll_interval(MAX_INTERVAL);
		store.put_record("u1", &record).await.unwrap();
		store.schedule("u1", now).await.unwrap();

		ActivityProcessor::new(&deps).process_one("u1", now).await.unwrap();

		assert!(store.get_record("u1").await.unwrap().is_none());
		assert!(store.due_before(now + chrono_duration(MAX_INTERVAL)).await.unwrap().is_empty());
	}
}
