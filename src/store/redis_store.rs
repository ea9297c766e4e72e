//! Redis-backed [`StateStore`] implementation.

// crates.io
use redis::AsyncCommands;
// self
use crate::{
	_prelude::*,
	model::{ActivityRecord, Environment},
	store::{RECORD_FIELD, SCHEDULE_KEY, StateStore, record_key, widget_token_key},
};

/// [`StateStore`] backed by a shared Redis instance.
///
/// Holds only a `redis::Client`; each operation borrows a fresh multiplexed
/// connection, mirroring how the rest of this crate's dependents use Redis —
/// cheap to clone, safe to share across every concurrently running processor.
#[derive(Clone, Debug)]
pub struct RedisStateStore {
	client: redis::Client,
}
impl RedisStateStore {
	/// Wrap an existing Redis client.
	pub fn new(client: redis::Client) -> Self {
		Self { client }
	}

	/// Build a store by parsing `url` into a Redis client.
	pub fn connect(url: &str) -> Result<Self> {
		Ok(Self::new(redis::Client::open(url)?))
	}

	async fn conn(&self) -> Result<redis::aio::MultiplexedConnection> {
		Ok(self.client.get_multiplexed_async_connection().await?)
	}
}
#[async_trait::async_trait]
impl StateStore for RedisStateStore {
	async fn put_record(&self, id: &str, record: &ActivityRecord) -> Result<()> {
		let mut conn = self.conn().await?;
		let json = serde_json::to_string(record)?;

		conn.hset::<_, _, _, ()>(record_key(id), RECORD_FIELD, json).await?;

		Ok(())
	}

	async fn get_record(&self, id: &str) -> Result<Option<ActivityRecord>> {
		let mut conn = self.conn().await?;
		let value: Option<String> = conn.hget(record_key(id), RECORD_FIELD).await?;

		Ok(match value {
			Some(json) => Some(serde_json::from_str(&json)?),
			None => None,
		})
	}

	async fn delete_record(&self, id: &str) -> Result<()> {
		let mut conn = self.conn().await?;

		conn.del::<_, ()>(record_key(id)).await?;

		Ok(())
	}

	async fn schedule(&self, id: &str, score: DateTime<Utc>) -> Result<()> {
		let mut conn = self.conn().await?;

		conn.zadd::<_, _, _, ()>(SCHEDULE_KEY, id, score.timestamp()).await?;

		Ok(())
	}

	async fn unschedule(&self, id: &str) -> Result<()> {
		let mut conn = self.conn().await?;

		conn.zrem::<_, _, ()>(SCHEDULE_KEY, id).await?;

		Ok(())
	}

	async fn due_before(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
		let mut conn = self.conn().await?;
		let ids: Vec<String> =
			conn.zrangebyscore(SCHEDULE_KEY, "-inf", now.timestamp()).await?;

		Ok(ids)
	}

	async fn claim(&self, ids: &[String], new_score: DateTime<Utc>) -> Result<()> {
		if ids.is_empty() {
			return Ok(());
		}

		let mut conn = self.conn().await?;
		let mut pipe = redis::pipe();

		pipe.atomic();
		for id in ids {
			pipe.zadd(SCHEDULE_KEY, id, new_score.timestamp()).ignore();
		}
		pipe.query_async::<()>(&mut conn).await?;

		Ok(())
	}

	async fn add_widget_token(&self, environment: Environment, token: &str) -> Result<()> {
		let mut conn = self.conn().await?;

		conn.sadd::<_, _, ()>(widget_token_key(environment), token).await?;

		Ok(())
	}

	async fn remove_widget_token(&self, environment: Environment, token: &str) -> Result<()> {
		let mut conn = self.conn().await?;

		conn.srem::<_, _, ()>(widget_token_key(environment), token).await?;

		Ok(())
	}

	async fn list_widget_tokens(&self, environment: Environment) -> Result<Vec<String>> {
		let mut conn = self.conn().await?;
		let tokens: Vec<String> = conn.smembers(widget_token_key(environment)).await?;

		Ok(tokens)
	}
}
