//! Domain types for activities, readings, and schedule bookkeeping.

// self
use crate::_prelude::*;

/// Lower bound of the adaptive poll interval.
pub const MIN_INTERVAL: Duration = Duration::from_secs(4);
/// Upper bound of the adaptive poll interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);
/// Expected cadence of new readings from the upstream provider.
pub const READING_INTERVAL: Duration = Duration::from_secs(300);
/// Hard lifetime cap for a single Live Activity (7h45m).
pub const MAXIMUM_DURATION: Duration = Duration::from_secs(27_900);
/// Multiplicative backoff applied when a poll yields no new reading.
pub const BACKOFF: f64 = 1.8;
/// Multiplicative backoff applied on upstream errors.
pub const ERROR_BACKOFF: f64 = 3.0;

/// APNs push environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
	/// Sandbox APNs environment, used for development builds.
	Development,
	/// Production APNs environment.
	Production,
}
impl Environment {
	/// Redis key suffix / set name fragment for this environment.
	pub fn as_str(&self) -> &'static str {
		match self {
			Environment::Development => "development",
			Environment::Production => "production",
		}
	}
}
impl fmt::Display for Environment {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Upstream CGM provider hosting region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountLocation {
	/// United States hosting region.
	Us,
	/// Outside-US hosting region.
	Ous,
}

/// Unit the stored preferences and readings are expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlucoseUnit {
	/// Milligrams per decilitre.
	Mgdl,
	/// Millimoles per litre.
	Mmol,
}

/// CGM trend direction as reported by the upstream provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Trend {
	/// Rate of change is negligible.
	Flat,
	/// Rising at a shallow (45°) rate.
	FortyFiveUp,
	/// Falling at a shallow (45°) rate.
	FortyFiveDown,
	/// Rising at a single-arrow rate.
	SingleUp,
	/// Falling at a single-arrow rate.
	SingleDown,
	/// Rising rapidly (double arrow).
	DoubleUp,
	/// Falling rapidly (double arrow).
	DoubleDown,
	/// No trend reported.
	None,
	/// Provider could not compute a trend.
	NotComputable,
	/// Rate of change exceeded the sensor's reportable range.
	RateOutOfRange,
}
impl Trend {
	/// Whether this trend represents a rapid (double-arrow) change.
	pub fn is_rapid(&self) -> bool {
		matches!(self, Trend::DoubleUp | Trend::DoubleDown)
	}
}

/// A single glucose reading from the upstream provider.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
	/// Timestamp the reading was captured upstream.
	pub date: DateTime<Utc>,
	/// Glucose value in the record's stored unit.
	pub value: i32,
	/// Reported trend direction.
	pub trend: Trend,
}

/// Inclusive target range used for in-range/out-of-range alerting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRange {
	/// Inclusive lower bound.
	pub lower: i32,
	/// Inclusive upper bound.
	pub upper: i32,
}
impl TargetRange {
	/// Whether `value` falls within `[lower, upper]`.
	pub fn contains(&self, value: i32) -> bool {
		value >= self.lower && value <= self.upper
	}
}

/// User-configured alerting preferences.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
	/// Target glucose range for in-range/out-of-range comparisons.
	pub target_range: TargetRange,
	/// Unit the range and readings are expressed in.
	pub unit: GlucoseUnit,
}

/// Reason an activity's lifecycle ended, recorded in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
	/// The activity reached its maximum allowed lifetime.
	MaxDuration,
	/// The upstream provider refused credentials or disabled the account.
	DexcomError,
	/// APNs reported the device token as permanently invalid.
	ApnsInvalidToken,
	/// The client explicitly ended the activity.
	ManualStop,
	/// The retry budget was exhausted.
	TooManyRetries,
}
impl fmt::Display for EndReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			EndReason::MaxDuration => "maxDuration",
			EndReason::DexcomError => "dexcomError",
			EndReason::ApnsInvalidToken => "apnsInvalidToken",
			EndReason::ManualStop => "manualStop",
			EndReason::TooManyRetries => "tooManyRetries",
		};

		f.write_str(s)
	}
}

/// Upstream credentials and session handles carried on an activity record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamCredentials {
	/// Account username, used for re-login on session expiry.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub username: Option<String>,
	/// Account password, used for re-login on session expiry.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub password: Option<String>,
	/// Upstream account identifier, refreshed on successful re-login.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account_id: Option<Uuid>,
	/// Upstream session identifier, refreshed on successful fetch.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<Uuid>,
}

/// One active Live Activity, persisted under `live-activity:data:<id>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
	/// Stable identity: `username` if provided, else the raw push token.
	pub id: String,
	/// Opaque, device-unique APNs push token.
	pub push_token: String,
	/// APNs environment to push through.
	pub environment: Environment,
	/// Upstream provider hosting region.
	pub account_location: AccountLocation,
	/// History window requested from upstream on each poll, in seconds.
	pub duration_secs: u64,
	/// Upstream credentials and session handles.
	#[serde(default)]
	pub credentials: UpstreamCredentials,
	/// Optional alerting preferences.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub preferences: Option<Preferences>,
	/// When this activity was first started; caps its lifetime.
	pub start_date: DateTime<Utc>,
	/// Most recently delivered reading, if any.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_reading: Option<Reading>,
	/// Current adaptive poll interval, always within `[MIN_INTERVAL, MAX_INTERVAL]`.
	#[serde(with = "duration_secs")]
	pub poll_interval: Duration,
	/// Consecutive error count; reset on any cycle that yields a reading.
	#[serde(default)]
	pub retry_count: u32,
}
impl ActivityRecord {
	/// Build a fresh record as created by `/start-live-activity`, with poll
	/// interval initialised to the floor and no retry history.
	pub fn new(
		id: impl Into<String>,
		push_token: impl Into<String>,
		environment: Environment,
		account_location: AccountLocation,
		duration_secs: u64,
		credentials: UpstreamCredentials,
		preferences: Option<Preferences>,
		start_date: DateTime<Utc>,
	) -> Self {
		Self {
			id: id.into(),
			push_token: push_token.into(),
			environment,
			account_location,
			duration_secs,
			credentials,
			preferences,
			start_date,
			last_reading: None,
			poll_interval: MIN_INTERVAL,
			retry_count: 0,
		}
	}

	/// Timestamp of the last reading previously delivered, if any.
	pub fn last_reading_date(&self) -> Option<DateTime<Utc>> {
		self.last_reading.map(|reading| reading.date)
	}

	/// Whether this activity has outlived `MAXIMUM_DURATION` as of `now`.
	pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
		now.signed_duration_since(self.start_date) >= chrono_duration(MAXIMUM_DURATION)
	}

	/// Clamp and store a new poll interval, preserving the invariant
	/// `MIN_INTERVAL <= poll_interval <= MAX_INTERVAL`.
	pub fn set_poll_interval(&mut self, interval: Duration) {
		self.poll_interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);
	}
}

/// Compute the identity used as both Redis key and schedule element.
pub fn activity_id(username: Option<&str>, push_token: &str) -> String {
	match username {
		Some(username) if !username.is_empty() => username.to_string(),
		_ => push_token.to_string(),
	}
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
	chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

mod duration_secs {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(value.as_secs())
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		let secs = u64::deserialize(deserializer)?;

		Ok(Duration::from_secs(secs))
	}
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;

	use super::*;

	#[test]
	fn activity_id_prefers_username() {
		assert_eq!(activity_id(Some("alice"), "tok123"), "alice");
		assert_eq!(activity_id(None, "tok123"), "tok123");
		assert_eq!(activity_id(Some(""), "tok123"), "tok123");
	}

	#[test]
	fn set_poll_interval_clamps_to_bounds() {
		let mut record = sample_record();

		record.set_poll_interval(Duration::from_secs(1));
		assert_eq!(record.poll_interval, MIN_INTERVAL);

		record.set_poll_interval(Duration::from_secs(600));
		assert_eq!(record.poll_interval, MAX_INTERVAL);

		record.set_poll_interval(Duration::from_secs(10));
		assert_eq!(record.poll_interval, Duration::from_secs(10));
	}

	#[test]
	fn has_expired_respects_maximum_duration() {
		let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
		let mut record = sample_record();

		record.start_date = now - chrono::Duration::seconds(28_000);
		assert!(record.has_expired(now));

		record.start_date = now - chrono::Duration::seconds(100);
		assert!(!record.has_expired(now));
	}

	fn sample_record() -> ActivityRecord {
		ActivityRecord::new(
			"u1",
			"token",
			Environment::Production,
			AccountLocation::Us,
			21_600,
			UpstreamCredentials::default(),
			None,
			Utc::now(),
		)
	}
}
