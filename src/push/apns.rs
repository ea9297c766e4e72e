//! APNs HTTP/2 JWT-authenticated push client.

// crates.io
use jsonwebtoken::{EncodingKey, Header, Algorithm, encode};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
// self
use crate::{
	_prelude::*,
	alert::AlertContent,
	model::Environment,
	push::{ApnsError, ContentState, PushGateway, APP_BUNDLE_ID},
};

const PROVIDER_TOKEN_TTL: Duration = Duration::from_secs(50 * 60);
const HARD_TIMEOUT: Duration = Duration::from_secs(15);

fn apns_host(environment: Environment) -> &'static str {
	match environment {
		Environment::Production => "https://api.push.apple.com",
		Environment::Development => "https://api.sandbox.push.apple.com",
	}
}

/// Signing material for minting APNs provider (JWT) tokens.
#[derive(Clone)]
pub struct ApnsCredentials {
	key_id: String,
	team_id: String,
	encoding_key: EncodingKey,
}
impl ApnsCredentials {
	/// Load credentials from an ES256 PEM-encoded private key.
	pub fn from_ec_pem(key_id: impl Into<String>, team_id: impl Into<String>, pem: &[u8]) -> Result<Self> {
		let encoding_key = EncodingKey::from_ec_pem(pem)?;

		Ok(Self { key_id: key_id.into(), team_id: team_id.into(), encoding_key })
	}
}
impl fmt::Debug for ApnsCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ApnsCredentials")
			.field("key_id", &self.key_id)
			.field("team_id", &self.team_id)
			.finish_non_exhaustive()
	}
}

#[derive(Serialize)]
struct ProviderClaims {
	iss: String,
	iat: i64,
}

struct CachedToken {
	value: String,
	minted_at: Instant,
}

/// [`PushGateway`] backed by two APNs HTTP/2 clients (one per environment),
/// each minting and caching its own ES256 provider JWT.
pub struct ApnsPushGateway {
	client: Client,
	credentials: ApnsCredentials,
	cached_token: RwLock<Option<CachedToken>>,
	host_override: Option<String>,
}
impl ApnsPushGateway {
	/// Build a gateway from the team's APNs signing credentials.
	pub fn new(credentials: ApnsCredentials) -> Result<Self> {
		let client = Client::builder()
			.http2_prior_knowledge()
			.timeout(HARD_TIMEOUT)
			.build()?;

		Ok(Self { client, credentials, cached_token: RwLock::new(None), host_override: None })
	}

	/// Build a gateway that sends every request to `host` instead of Apple's
	/// real APNs hosts, for exercising this gateway against a mock server.
	/// HTTP/2-prior-knowledge is dropped since mock servers typically speak
	/// plain HTTP/1.1.
	pub fn with_host_override(credentials: ApnsCredentials, host: impl Into<String>) -> Result<Self> {
		let client = Client::builder().timeout(HARD_TIMEOUT).build()?;

		Ok(Self { client, credentials, cached_token: RwLock::new(None), host_override: Some(host.into()) })
	}

	fn host(&self, environment: Environment) -> &str {
		self.host_override.as_deref().unwrap_or_else(|| apns_host(environment))
	}

	async fn provider_token(&self) -> Result<String> {
		{
			let cached = self.cached_token.read().await;

			if let Some(token) = cached.as_ref() {
				if token.minted_at.elapsed() < PROVIDER_TOKEN_TTL {
					return Ok(token.value.clone());
				}
			}
		}

		let mut header = Header::new(Algorithm::ES256);

		header.kid = Some(self.credentials.key_id.clone());

		let claims = ProviderClaims { iss: self.credentials.team_id.clone(), iat: Utc::now().timestamp() };
		let token = encode(&header, &claims, &self.credentials.encoding_key)?;

		*self.cached_token.write().await =
			Some(CachedToken { value: token.clone(), minted_at: Instant::now() });

		Ok(token)
	}

	async fn send(
		&self,
		environment: Environment,
		push_token: &str,
		push_type: &str,
		payload: &impl Serialize,
	) -> std::result::Result<(), ApnsError> {
		let provider_token =
			self.provider_token().await.map_err(|err| ApnsError::NonTerminal(err.to_string()))?;
		let url = format!("{}/3/device/{push_token}", self.host(environment));
		let response = self
			.client
			.post(url)
			.bearer_auth(provider_token)
			.header("apns-topic", format!("{APP_BUNDLE_ID}.push-type.liveactivity"))
			.header("apns-push-type", push_type)
			.header("apns-priority", "10")
			.json(payload)
			.send()
			.await
			.map_err(|err| ApnsError::NonTerminal(err.to_string()))?;

		if response.status() == StatusCode::OK {
			return Ok(());
		}

		let reason = response
			.json::<ApnsErrorBody>()
			.await
			.map(|body| body.reason)
			.unwrap_or_else(|_| "Unknown".to_string());

		Err(match reason.as_str() {
			"BadDeviceToken" => ApnsError::BadDeviceToken,
			"Unregistered" => ApnsError::Unregistered,
			"ExpiredToken" => ApnsError::ExpiredToken,
			other => ApnsError::NonTerminal(other.to_string()),
		})
	}
}
#[async_trait::async_trait]
impl PushGateway for ApnsPushGateway {
	async fn send_live_activity_update(
		&self,
		environment: Environment,
		push_token: &str,
		state: &ContentState,
		alert: Option<&AlertContent>,
		stale_date: DateTime<Utc>,
		timestamp: DateTime<Utc>,
	) -> std::result::Result<(), ApnsError> {
		let aps = Aps {
			timestamp: timestamp.timestamp(),
			event: "update",
			content_state: state.clone(),
			alert: alert.map(|alert| ApnsAlert { title: alert.title.clone(), body: alert.body.clone() }),
			stale_date: Some(stale_date.timestamp()),
		};

		self.send(environment, push_token, "liveactivity", &ApnsPayload { aps }).await
	}

	async fn send_live_activity_end(
		&self,
		environment: Environment,
		push_token: &str,
	) -> std::result::Result<(), ApnsError> {
		let aps = Aps {
			timestamp: Utc::now().timestamp(),
			event: "end",
			content_state: ContentState::end(),
			alert: None,
			stale_date: None,
		};

		self.send(environment, push_token, "liveactivity", &ApnsPayload { aps }).await
	}

	async fn send_widget_refresh(
		&self,
		environment: Environment,
		push_token: &str,
	) -> std::result::Result<(), ApnsError> {
		let payload = WidgetRefreshPayload { aps: WidgetAps { content_available: 1 } };

		self.send(environment, push_token, "background", &payload).await
	}
}

#[derive(Serialize)]
struct ApnsPayload {
	aps: Aps,
}

#[derive(Serialize)]
struct Aps {
	timestamp: i64,
	event: &'static str,
	#[serde(rename = "content-state")]
	content_state: ContentState,
	#[serde(skip_serializing_if = "Option::is_none")]
	alert: Option<ApnsAlert>,
	#[serde(rename = "stale-date", skip_serializing_if = "Option::is_none")]
	stale_date: Option<i64>,
}

#[derive(Serialize)]
struct ApnsAlert {
	title: String,
	body: String,
}

#[derive(Serialize)]
struct WidgetRefreshPayload {
	aps: WidgetAps,
}

#[derive(Serialize)]
struct WidgetAps {
	#[serde(rename = "content-available")]
	content_available: u8,
}

#[derive(Deserialize)]
struct ApnsErrorBody {
	reason: String,
}
