//! Calls the upstream CGM provider and reports refreshed session handles back
//! to the caller.

pub mod dexcom;

// self
use crate::{
	_prelude::*,
	model::{AccountLocation, Reading, UpstreamCredentials},
};

pub use crate::upstream::dexcom::DexcomFetcher;

/// Outcome of a single [`UpstreamFetcher::fetch`] call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchOutcome {
	/// Readings returned by the provider, ordered by timestamp ascending.
	pub readings: Vec<Reading>,
	/// Account id minted by a re-login performed during this call, if any.
	pub refreshed_account_id: Option<Uuid>,
	/// Session id minted by a re-login performed during this call, if any.
	pub refreshed_session_id: Option<Uuid>,
}

/// Error taxonomy surfaced to [`crate::scheduler::ActivityProcessor`].
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
	/// Credentials invalid, account disabled, or the upstream otherwise
	/// refuses to authenticate this account. Terminal for the activity.
	#[error("upstream refused credentials: {0}")]
	ClientHardError(String),
	/// Upstream returned a body that could not be decoded into the expected
	/// shape. Retryable against the error-backoff budget.
	#[error("upstream returned undecodable response (status {status}): {}", String::from_utf8_lossy(body))]
	DecodingError {
		/// HTTP status code returned with the undecodable body.
		status: u16,
		/// Raw response bytes, kept for logging.
		body: Vec<u8>,
	},
	/// Network, timeout, or 5xx failure. Retryable with exponential backoff.
	#[error("upstream request failed: {0}")]
	GenericError(String),
}
impl UpstreamError {
	/// HTTP status carried by a [`UpstreamError::DecodingError`], if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			UpstreamError::DecodingError { status, .. } => Some(*status),
			_ => None,
		}
	}
}

/// Single operation exposed to the scheduler: fetch readings for an
/// activity's configured upstream account within the requested history
/// window, performing a session login internally when required.
#[async_trait::async_trait]
pub trait UpstreamFetcher: Send + Sync {
	/// Fetch readings for `creds` within `duration_secs`, logging in first if
	/// `creds` carries no session id.
	async fn fetch(
		&self,
		creds: &UpstreamCredentials,
		account_location: AccountLocation,
		duration_secs: u64,
	) -> std::result::Result<FetchOutcome, UpstreamError>;
}
