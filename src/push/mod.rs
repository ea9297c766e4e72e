//! Builds and sends APNs Live-Activity update/end payloads and widget
//! refresh pushes.

pub mod apns;

// self
use crate::{_prelude::*, alert::AlertContent, model::Environment};

pub use crate::push::apns::ApnsPushGateway;

/// Fixed bundle id (and `.push-type.liveactivity` topic suffix) of the
/// mobile app every push in this crate targets.
pub const APP_BUNDLE_ID: &str = "com.example.cgmcompanion";

/// Compact Live-Activity content-state payload.
///
/// Mirrors the wire schema exactly: single-letter keys keep the push
/// payload (which APNs caps at 4 KiB) as small as possible.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentState {
	/// Current glucose value, or `None` for an end-of-activity payload.
	pub c: Option<i32>,
	/// Recent history points rendered on the Live Activity's chart.
	pub h: Vec<HistoryPoint>,
	/// Set on the end payload to mark the upstream session as expired.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub se: Option<bool>,
}
impl ContentState {
	/// Build the content state for a fresh reading.
	pub fn for_reading(value: i32, history: Vec<HistoryPoint>) -> Self {
		Self { c: Some(value), h: history, se: None }
	}

	/// Build the content state for an end-of-activity payload: no current
	/// reading, empty history, session marked expired.
	pub fn end() -> Self {
		Self { c: None, h: Vec::new(), se: Some(true) }
	}
}

/// One point on the Live Activity's glucose history chart.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
	/// UNIX epoch seconds the reading was captured at.
	pub t: i64,
	/// Glucose value, narrowed to the wire's `int16` range.
	pub v: i16,
}

/// Error taxonomy for an APNs send.
#[derive(Debug, thiserror::Error)]
pub enum ApnsError {
	/// The device token is malformed. Terminal for the activity.
	#[error("APNs reported BadDeviceToken")]
	BadDeviceToken,
	/// The device token is no longer registered for push. Terminal.
	#[error("APNs reported Unregistered")]
	Unregistered,
	/// The device token has expired. Terminal.
	#[error("APNs reported ExpiredToken")]
	ExpiredToken,
	/// Any other APNs rejection or transport failure. Non-terminal: logged
	/// and swallowed by the caller, who retries on the next cycle.
	#[error("APNs send failed: {0}")]
	NonTerminal(String),
}
impl ApnsError {
	/// Whether this error means the device is permanently unreachable and
	/// the activity (or widget token) owning it must be torn down.
	pub fn is_terminal(&self) -> bool {
		matches!(self, ApnsError::BadDeviceToken | ApnsError::Unregistered | ApnsError::ExpiredToken)
	}
}

/// Builds and sends the three push shapes this system ever emits.
#[async_trait::async_trait]
pub trait PushGateway: Send + Sync {
	/// Send a Live-Activity update carrying `state`, an optional alert, the
	/// activity's stale-after date, and the event timestamp.
	async fn send_live_activity_update(
		&self,
		environment: Environment,
		push_token: &str,
		state: &ContentState,
		alert: Option<&AlertContent>,
		stale_date: DateTime<Utc>,
		timestamp: DateTime<Utc>,
	) -> std::result::Result<(), ApnsError>;

	/// Send a Live-Activity end event: no current reading, empty history,
	/// session marked expired.
	async fn send_live_activity_end(
		&self,
		environment: Environment,
		push_token: &str,
	) -> std::result::Result<(), ApnsError>;

	/// Send a silent background push instructing the device to rerun its
	/// widget timeline.
	async fn send_widget_refresh(
		&self,
		environment: Environment,
		push_token: &str,
	) -> std::result::Result<(), ApnsError>;
}

/// [`PushGateway`] used when no APNs credentials are configured: every call
/// logs and returns success without attempting delivery.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPushGateway;
#[async_trait::async_trait]
impl PushGateway for NoopPushGateway {
	async fn send_live_activity_update(
		&self,
		environment: Environment,
		push_token: &str,
		_state: &ContentState,
		_alert: Option<&AlertContent>,
		_stale_date: DateTime<Utc>,
		_timestamp: DateTime<Utc>,
	) -> std::result::Result<(), ApnsError> {
		tracing::debug!(%environment, token = %crate::security::redact_push_token(push_token), "push disabled, skipping live activity update");

		Ok(())
	}

	async fn send_live_activity_end(
		&self,
		environment: Environment,
		push_token: &str,
	) -> std::result::Result<(), ApnsError> {
		tracing::debug!(%environment, token = %crate::security::redact_push_token(push_token), "push disabled, skipping live activity end");

		Ok(())
	}

	async fn send_widget_refresh(
		&self,
		environment: Environment,
		push_token: &str,
	) -> std::result::Result<(), ApnsError> {
		tracing::debug!(%environment, token = %crate::security::redact_push_token(push_token), "push disabled, skipping widget refresh");

		Ok(())
	}
}
