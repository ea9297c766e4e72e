//! Typed wrapper over the backing key-value store: activity records, the
//! schedule index, and the widget-token sets.
//!
//! Every operation here is expected to be individually atomic against the
//! backend; no multi-key transactions are required. Callers must tolerate an
//! interleaving where [`StateStore::due_before`] returns an id whose record
//! was concurrently deleted.

pub mod memory;
pub mod redis_store;

// self
use crate::{_prelude::*, model::{ActivityRecord, Environment}};

pub use crate::store::{memory::InMemoryStateStore, redis_store::RedisStateStore};

/// Redis key for the schedule sorted set.
pub const SCHEDULE_KEY: &str = "live-activities:schedule";

/// Redis hash key prefix for activity records; the full key is
/// `live-activity:data:<id>`.
pub const RECORD_KEY_PREFIX: &str = "live-activity:data:";

/// Hash field holding the JSON-encoded [`ActivityRecord`].
pub const RECORD_FIELD: &str = "data";

/// Redis set key prefix for widget tokens; the full key is
/// `widget-tokens:<environment>`.
pub const WIDGET_TOKEN_KEY_PREFIX: &str = "widget-tokens:";

/// Compute the hash key an activity record is stored under.
pub fn record_key(id: &str) -> String {
	format!("{RECORD_KEY_PREFIX}{id}")
}

/// Compute the set key a given environment's widget tokens are stored under.
pub fn widget_token_key(environment: Environment) -> String {
	format!("{WIDGET_TOKEN_KEY_PREFIX}{}", environment.as_str())
}

/// Contract over a Redis-like backend for activity records, the schedule
/// index, and widget-token membership.
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
	/// Overwrite the record stored under `id`.
	async fn put_record(&self, id: &str, record: &ActivityRecord) -> Result<()>;

	/// Fetch the record stored under `id`, if any.
	async fn get_record(&self, id: &str) -> Result<Option<ActivityRecord>>;

	/// Remove the record stored under `id`.
	async fn delete_record(&self, id: &str) -> Result<()>;

	/// Upsert `id` into the schedule index with the given score.
	async fn schedule(&self, id: &str, score: DateTime<Utc>) -> Result<()>;

	/// Remove `id` from the schedule index.
	async fn unschedule(&self, id: &str) -> Result<()>;

	/// Return ids whose schedule score is `<= now`, ascending by score.
	async fn due_before(&self, now: DateTime<Utc>) -> Result<Vec<String>>;

	/// Bulk-rescore `ids` to `new_score`, reserving them against re-pickup.
	async fn claim(&self, ids: &[String], new_score: DateTime<Utc>) -> Result<()>;

	/// Add `token` to the widget-token set for `environment`.
	async fn add_widget_token(&self, environment: Environment, token: &str) -> Result<()>;

	/// Remove `token` from the widget-token set for `environment`.
	async fn remove_widget_token(&self, environment: Environment, token: &str) -> Result<()>;

	/// List all tokens currently in the widget-token set for `environment`.
	async fn list_widget_tokens(&self, environment: Environment) -> Result<Vec<String>>;
}
