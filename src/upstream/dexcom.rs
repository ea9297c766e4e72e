//! Dexcom Share-compatible upstream fetcher.

// crates.io
use reqwest::{Client, StatusCode};
use serde::Deserialize;
// self
use crate::{
	_prelude::*,
	model::{AccountLocation, Reading, Trend, UpstreamCredentials},
	upstream::{FetchOutcome, UpstreamError, UpstreamFetcher},
};

const APPLICATION_ID: &str = "d8665ade-9673-4e27-9ff6-92db4ce13d13";
const US_BASE_URL: &str = "https://share2.dexcom.com/ShareWebServices/Services";
const OUS_BASE_URL: &str = "https://shareous1.dexcom.com/ShareWebServices/Services";
const HARD_TIMEOUT: Duration = Duration::from_secs(15);

fn base_url(location: AccountLocation) -> &'static str {
	match location {
		AccountLocation::Us => US_BASE_URL,
		AccountLocation::Ous => OUS_BASE_URL,
	}
}

/// reqwest-based [`UpstreamFetcher`] talking to the Dexcom Share API.
#[derive(Clone, Debug)]
pub struct DexcomFetcher {
	client: Client,
	base_url_override: Option<String>,
}
impl DexcomFetcher {
	/// Build a fetcher with the default hard-timeout client.
	pub fn new() -> Result<Self> {
		let client = Client::builder()
			.user_agent(format!("live-activity-scheduler/{}", env!("CARGO_PKG_VERSION")))
			.timeout(HARD_TIMEOUT)
			.build()?;

		Ok(Self::with_client(client))
	}

	/// Build a fetcher using the supplied HTTP client (primarily for tests).
	pub fn with_client(client: Client) -> Self {
		Self { client, base_url_override: None }
	}

	/// Point every request at `base_url` regardless of account location, for
	/// exercising this fetcher against a mock server.
	pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
		Self { client, base_url_override: Some(base_url.into()) }
	}

	fn base_url(&self, location: AccountLocation) -> &str {
		self.base_url_override.as_deref().unwrap_or_else(|| base_url(location))
	}

	async fn login(
		&self,
		creds: &UpstreamCredentials,
		account_location: AccountLocation,
	) -> std::result::Result<Uuid, UpstreamError> {
		let username = creds.username.as_deref().ok_or_else(|| {
			UpstreamError::ClientHardError("no username on file for re-login".into())
		})?;
		let password = creds.password.as_deref().ok_or_else(|| {
			UpstreamError::ClientHardError("no password on file for re-login".into())
		})?;
		let url = format!(
			"{}/General/LoginPublisherAccountByName",
			self.base_url(account_location)
		);
		let body = LoginRequest { account_name: username, password, application_id: APPLICATION_ID };
		let response = self
			.client
			.post(url)
			.json(&body)
			.send()
			.await
			.map_err(|err| map_transport_error(&err))?;

		handle_auth_status(response.status())?;

		let bytes = response.bytes().await.map_err(|err| map_transport_error(&err))?;
		let raw = String::from_utf8_lossy(&bytes);
		let session_id: Uuid = raw.trim_matches('"').parse().map_err(|_| {
			UpstreamError::DecodingError { status: 200, body: bytes.to_vec() }
		})?;

		Ok(session_id)
	}

	async fn fetch_readings(
		&self,
		session_id: Uuid,
		account_location: AccountLocation,
		duration_secs: u64,
	) -> std::result::Result<Vec<Reading>, UpstreamError> {
		let url = format!(
			"{}/Publisher/ReadPublisherLatestGlucoseValues",
			self.base_url(account_location)
		);
		let minutes = (duration_secs / 60).max(1);
		let query = ReadingsQuery { session_id, minutes, max_count: 288 };
		let response = self
			.client
			.post(url)
			.query(&query)
			.send()
			.await
			.map_err(|err| map_transport_error(&err))?;

		handle_auth_status(response.status())?;

		let status = response.status();

		if !status.is_success() {
			let body = response.bytes().await.unwrap_or_default().to_vec();

			return if status.is_server_error() {
				Err(UpstreamError::GenericError(format!("upstream returned {status}")))
			} else {
				Err(UpstreamError::DecodingError { status: status.as_u16(), body })
			};
		}

		let bytes = response.bytes().await.map_err(|err| map_transport_error(&err))?;
		let raw: Vec<RawReading> = serde_json::from_slice(&bytes).map_err(|_| {
			UpstreamError::DecodingError { status: status.as_u16(), body: bytes.to_vec() }
		})?;
		let mut readings: Vec<Reading> =
			raw.into_iter().filter_map(RawReading::into_reading).collect();

		readings.sort_by_key(|reading| reading.date);

		Ok(readings)
	}
}
impl Default for DexcomFetcher {
	fn default() -> Self {
		Self::new().expect("default reqwest client configuration is always valid")
	}
}
#[async_trait::async_trait]
impl UpstreamFetcher for DexcomFetcher {
	async fn fetch(
		&self,
		creds: &UpstreamCredentials,
		account_location: AccountLocation,
		duration_secs: u64,
	) -> std::result::Result<FetchOutcome, UpstreamError> {
		let mut refreshed_session_id = None;
		let session_id = match creds.session_id {
			Some(existing) => existing,
			None => {
				let minted = self.login(creds, account_location).await?;

				refreshed_session_id = Some(minted);
				minted
			},
		};

		let readings =
			match self.fetch_readings(session_id, account_location, duration_secs).await {
				Ok(readings) => readings,
				Err(UpstreamError::DecodingError { status, .. })
					if status == StatusCode::UNAUTHORIZED.as_u16() && refreshed_session_id.is_none() =>
				{
					let minted = self.login(creds, account_location).await?;

					refreshed_session_id = Some(minted);
					self.fetch_readings(minted, account_location, duration_secs).await?
				},
				Err(err) => return Err(err),
			};

		Ok(FetchOutcome { readings, refreshed_account_id: None, refreshed_session_id })
	}
}

fn handle_auth_status(status: StatusCode) -> std::result::Result<(), UpstreamError> {
	match status {
		StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN =>
			Err(UpstreamError::DecodingError { status: status.as_u16(), body: Vec::new() }),
		status if status == StatusCode::BAD_REQUEST =>
			Err(UpstreamError::ClientHardError("account disabled or credentials rejected".into())),
		_ => Ok(()),
	}
}

fn map_transport_error(err: &reqwest::Error) -> UpstreamError {
	if err.is_timeout() || err.is_connect() {
		UpstreamError::GenericError(err.to_string())
	} else if let Some(status) = err.status() {
		if status.is_server_error() {
			UpstreamError::GenericError(err.to_string())
		} else {
			UpstreamError::DecodingError { status: status.as_u16(), body: Vec::new() }
		}
	} else {
		UpstreamError::GenericError(err.to_string())
	}
}

#[derive(Debug, serde::Serialize)]
struct LoginRequest<'a> {
	#[serde(rename = "accountName")]
	account_name: &'a str,
	password: &'a str,
	#[serde(rename = "applicationId")]
	application_id: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct ReadingsQuery {
	#[serde(rename = "sessionId")]
	session_id: Uuid,
	minutes: u64,
	#[serde(rename = "maxCount")]
	max_count: u32,
}

#[derive(Debug, Deserialize)]
struct RawReading {
	#[serde(rename = "DT")]
	date: String,
	#[serde(rename = "Value")]
	value: i32,
	#[serde(rename = "Trend")]
	trend: String,
}
impl RawReading {
	fn into_reading(self) -> Option<Reading> {
		let date = parse_dexcom_date(&self.date)?;
		let trend = parse_trend(&self.trend);

		Some(Reading { date, value: self.value, trend })
	}
}

fn parse_dexcom_date(raw: &str) -> Option<DateTime<Utc>> {
	let millis: i64 = raw
		.strip_prefix("/Date(")
		.and_then(|rest| rest.split(['+', '-', ')']).next())
		.and_then(|digits| digits.parse().ok())?;

	DateTime::from_timestamp_millis(millis)
}

fn parse_trend(raw: &str) -> Trend {
	match raw {
		"Flat" => Trend::Flat,
		"FortyFiveUp" => Trend::FortyFiveUp,
		"FortyFiveDown" => Trend::FortyFiveDown,
		"SingleUp" => Trend::SingleUp,
		"SingleDown" => Trend::SingleDown,
		"DoubleUp" => Trend::DoubleUp,
		"DoubleDown" => Trend::DoubleDown,
		"NotComputable" => Trend::NotComputable,
		"RateOutOfRange" => Trend::RateOutOfRange,
		_ => Trend::None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_dexcom_wire_date() {
		let parsed = parse_dexcom_date("/Date(1700000000000)/").unwrap();

		assert_eq!(parsed.timestamp_millis(), 1_700_000_000_000);
	}

	#[test]
	fn unknown_trend_strings_map_to_none() {
		assert_eq!(parse_trend("DoubleUp"), Trend::DoubleUp);
		assert_eq!(parse_trend("garbage"), Trend::None);
	}

	#[test]
	fn base_url_selects_region() {
		assert_eq!(base_url(AccountLocation::Us), US_BASE_URL);
		assert_eq!(base_url(AccountLocation::Ous), OUS_BASE_URL);
	}
}
