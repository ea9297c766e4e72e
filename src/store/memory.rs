//! In-memory [`StateStore`] fake used by tests.

// std
use std::collections::{HashMap, HashSet};
// crates.io
use tokio::sync::RwLock;
// self
use crate::{
	_prelude::*,
	model::{ActivityRecord, Environment},
	store::StateStore,
};

#[derive(Default)]
struct Inner {
	records: HashMap<String, ActivityRecord>,
	schedule: HashMap<String, i64>,
	widget_tokens: HashMap<Environment, HashSet<String>>,
}

/// Single-process [`StateStore`] backed by plain collections, for unit and
/// integration tests that would otherwise require a live Redis instance.
#[derive(Default)]
pub struct InMemoryStateStore {
	inner: RwLock<Inner>,
}
impl InMemoryStateStore {
	/// Construct an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}
#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
	async fn put_record(&self, id: &str, record: &ActivityRecord) -> Result<()> {
		self.inner.write().await.records.insert(id.to_string(), record.clone());

		Ok(())
	}

	async fn get_record(&self, id: &str) -> Result<Option<ActivityRecord>> {
		Ok(self.inner.read().await.records.get(id).cloned())
	}

	async fn delete_record(&self, id: &str) -> Result<()> {
		self.inner.write().await.records.remove(id);

		Ok(())
	}

	async fn schedule(&self, id: &str, score: DateTime<Utc>) -> Result<()> {
		self.inner.write().await.schedule.insert(id.to_string(), score.timestamp());

		Ok(())
	}

	async fn unschedule(&self, id: &str) -> Result<()> {
		self.inner.write().await.schedule.remove(id);

		Ok(())
	}

	async fn due_before(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
		let inner = self.inner.read().await;
		let now = now.timestamp();
		let mut due: Vec<(String, i64)> = inner
			.schedule
			.iter()
			.filter(|(_, score)| **score <= now)
			.map(|(id, score)| (id.clone(), *score))
			.collect();

		due.sort_by_key(|(_, score)| *score);

		Ok(due.into_iter().map(|(id, _)| id).collect())
	}

	async fn claim(&self, ids: &[String], new_score: DateTime<Utc>) -> Result<()> {
		let mut inner = self.inner.write().await;

		for id in ids {
			inner.schedule.insert(id.clone(), new_score.timestamp());
		}

		Ok(())
	}

	async fn add_widget_token(&self, environment: Environment, token: &str) -> Result<()> {
		self.inner
			.write()
			.await
			.widget_tokens
			.entry(environment)
			.or_default()
			.insert(token.to_string());

		Ok(())
	}

	async fn remove_widget_token(&self, environment: Environment, token: &str) -> Result<()> {
		if let Some(set) = self.inner.write().await.widget_tokens.get_mut(&environment) {
			set.remove(token);
		}

		Ok(())
	}

	async fn list_widget_tokens(&self, environment: Environment) -> Result<Vec<String>> {
		Ok(self
			.inner
			.read()
			.await
			.widget_tokens
			.get(&environment)
			.map(|set| set.iter().cloned().collect())
			.unwrap_or_default())
	}
}
