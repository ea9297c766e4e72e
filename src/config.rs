//! Environment-driven process configuration.

// self
use crate::{_prelude::*, push::apns::ApnsCredentials};

/// Floor applied to `WIDGET_TICK_SECONDS`, per the widget-refresh cadence
/// recommendation.
pub const WIDGET_TICK_FLOOR: Duration = Duration::from_secs(300);
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// APNs JWT signing material, present only when all three env vars are set.
pub struct PushConfig {
	/// Parsed ES256 signing credentials.
	pub credentials: ApnsCredentials,
}

/// Process configuration loaded from the environment.
pub struct Config {
	/// Redis connection string backing the state store.
	pub redis_url: String,
	/// APNs push credentials, or `None` if push sending is disabled.
	pub push: Option<PushConfig>,
	/// Address the HTTP front door binds to.
	pub bind_addr: String,
	/// Cadence of the widget-refresh ticker, floored at
	/// [`WIDGET_TICK_FLOOR`].
	pub widget_tick_interval: Duration,
}
impl Config {
	/// Load configuration from the process environment, first loading
	/// `.env.local` if present (a no-op in production, where env vars are
	/// injected directly).
	pub fn from_env() -> Result<Self> {
		let _ = dotenvy::from_filename(".env.local");

		let redis_url = require_env("REDIS_URL")?;
		let push = load_push_config()?;
		let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
		let widget_tick_interval = std::env::var("WIDGET_TICK_SECONDS")
			.ok()
			.and_then(|value| value.parse::<u64>().ok())
			.map(Duration::from_secs)
			.unwrap_or(WIDGET_TICK_FLOOR)
			.max(WIDGET_TICK_FLOOR);

		Ok(Self { redis_url, push, bind_addr, widget_tick_interval })
	}
}

fn load_push_config() -> Result<Option<PushConfig>> {
	let pem = std::env::var("PUSH_NOTIFICATION_PEM").ok();
	let key_id = std::env::var("PUSH_NOTIFICATION_ID").ok();
	let team_id = std::env::var("TEAM_IDENTIFIER").ok();

	match (pem, key_id, team_id) {
		(Some(pem), Some(key_id), Some(team_id)) => {
			let credentials = ApnsCredentials::from_ec_pem(key_id, team_id, pem.as_bytes())?;

			Ok(Some(PushConfig { credentials }))
		},
		(None, None, None) => {
			tracing::warn!(
				"PUSH_NOTIFICATION_PEM/PUSH_NOTIFICATION_ID/TEAM_IDENTIFIER not set, push sending disabled"
			);

			Ok(None)
		},
		_ => Err(Error::Validation {
			field: "push_notification_credentials",
			reason: "PUSH_NOTIFICATION_PEM, PUSH_NOTIFICATION_ID, and TEAM_IDENTIFIER must all be set together."
				.into(),
		}),
	}
}

fn require_env(name: &'static str) -> Result<String> {
	std::env::var(name).map_err(|_| Error::Validation {
		field: name,
		reason: "Required environment variable is not set.".into(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn widget_tick_interval_is_floored() {
		assert_eq!(WIDGET_TICK_FLOOR, Duration::from_secs(300));
	}
}
