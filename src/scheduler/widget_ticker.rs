//! Periodic fan-out of silent widget-refresh pushes to every token in the
//! widget set, for both APNs environments.

// std
use std::sync::Arc;
// crates.io
use tokio::time;
// self
use crate::{
	_prelude::*,
	model::Environment,
	push::PushGateway,
	security::redact_push_token,
	store::StateStore,
};

const ENVIRONMENTS: [Environment; 2] = [Environment::Development, Environment::Production];

/// Drives the widget-refresh fan-out on its own timer, independent of the
/// per-activity tick loop.
pub struct WidgetTicker {
	store: Arc<dyn StateStore>,
	push: Arc<dyn PushGateway>,
}
impl WidgetTicker {
	/// Build a ticker sharing the scheduler's store and push gateway.
	pub fn new(store: Arc<dyn StateStore>, push: Arc<dyn PushGateway>) -> Self {
		Self { store, push }
	}

	/// Run a single widget-refresh cycle across both environments.
	#[tracing::instrument(skip(self))]
	pub async fn tick(&self) -> Result<()> {
		for environment in ENVIRONMENTS {
			let tokens = self.store.list_widget_tokens(environment).await?;

			for token in tokens {
				let result = self.push.send_widget_refresh(environment, &token).await;

				#[cfg(feature = "metrics")]
				crate::metrics::record_push(environment, result.is_ok());

				if let Err(err) = result {
					if err.is_terminal() {
						tracing::info!(
							%environment,
							token = %redact_push_token(&token),
							"widget token unreachable, removing from set"
						);
						self.store.remove_widget_token(environment, &token).await?;
					} else {
						tracing::warn!(error = %err, %environment, "widget refresh push failed");
					}
				}
			}
		}

		Ok(())
	}

	/// Run the widget-refresh cycle forever at the given cadence. Intended
	/// to be spawned as its own task at process startup.
	pub async fn run_loop(self, cadence: Duration) {
		let mut interval = time::interval(cadence);

		loop {
			interval.tick().await;

			if let Err(err) = self.tick().await {
				tracing::warn!(error = %err, "widget ticker cycle failed");
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::{alert::AlertContent, push::ApnsError, push::ContentState, store::memory::InMemoryStateStore};

	struct AlwaysUnregistered;
	#[async_trait::async_trait]
	impl PushGateway for AlwaysUnregistered {
		async fn send_live_activity_update(
			&self,
			_environment: Environment,
			_push_token: &str,
			_state: &ContentState,
			_alert: Option<&AlertContent>,
			_stale_date: DateTime<Utc>,
			_timestamp: DateTime<Utc>,
		) -> std::result::Result<(), ApnsError> {
			Ok(())
		}

		async fn send_live_activity_end(
			&self,
			_environment: Environment,
			_push_token: &str,
		) -> std::result::Result<(), ApnsError> {
			Ok(())
		}

		async fn send_widget_refresh(
			&self,
			_environment: Environment,
			_push_token: &str,
		) -> std::result::Result<(), ApnsError> {
			Err(ApnsError::Unregistered)
		}
	}

	#[tokio::test]
	async fn terminal_error_removes_token_from_set() {
		let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());

		store.add_widget_token(Environment::Production, "tok-1").await.unwrap();

		let ticker = WidgetTicker::new(store.clone(), Arc::new(AlwaysUnregistered));

		ticker.tick().await.unwrap();

		assert!(store.list_widget_tokens(Environment::Production).await.unwrap().is_empty());
	}
}
