//! HTTP front door: the three endpoints a client ever calls, plus bot-probe
//! path filtering.

// std
use std::sync::Arc;
// crates.io
use axum::{
	Json, Router,
	extract::{Request, State},
	http::StatusCode,
	middleware::{self, Next},
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Deserialize;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;
// self
use crate::{
	_prelude::*,
	model::{AccountLocation, ActivityRecord, Environment, Preferences, UpstreamCredentials, activity_id},
	push::PushGateway,
	store::StateStore,
};

const MARKETING_BODY: &str = "Live activities, kept alive.";

/// Shared application state handed to every route handler.
///
/// The front door only ever reads and writes schedule state; it holds the
/// push gateway too so a future admin endpoint can send an ad hoc push
/// without reaching into the scheduler.
pub struct AppState {
	pub(crate) store: Arc<dyn StateStore>,
	pub(crate) push: Arc<dyn PushGateway>,
}
impl AppState {
	/// Build the front door's shared state from its two collaborators.
	pub fn new(store: Arc<dyn StateStore>, push: Arc<dyn PushGateway>) -> Self {
		Self { store, push }
	}
}

/// Build the axum [`Router`] serving the three public endpoints, guarded by
/// bot-probe path filtering.
///
/// Layer order matters: `reject_bot_paths` is applied last so it is the
/// outermost service, running before the trace layer creates a span or logs
/// a response — a `.php`-style probe path must 404 without ever being
/// logged, per the bot-probe suppression requirement.
pub fn build_router(state: Arc<AppState>) -> Router {
	let router = Router::new()
		.route("/", get(root))
		.route("/start-live-activity", post(start_live_activity))
		.route("/end-live-activity", post(end_live_activity));

	#[cfg(feature = "metrics")]
	let router = router.route("/status", get(status));

	router
		.with_state(state)
		.layer(
			TraceLayer::new_for_http()
				.make_span_with(DefaultMakeSpan::new().level(Level::INFO))
				.on_response(DefaultOnResponse::new().level(Level::INFO)),
		)
		.layer(middleware::from_fn(reject_bot_paths))
}

/// `GET /` — a short marketing line, nothing more.
async fn root() -> &'static str {
	MARKETING_BODY
}

/// `GET /status` — a point-in-time snapshot of process-wide scheduler
/// telemetry, present only when the `metrics` feature is enabled.
#[cfg(feature = "metrics")]
async fn status() -> Json<crate::metrics::SchedulerMetricsSnapshot> {
	Json(crate::metrics::global().snapshot())
}

#[derive(Debug, Deserialize)]
struct TargetRangeBody {
	lower: i32,
	upper: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreferencesBody {
	target_range: TargetRangeBody,
	unit: crate::model::GlucoseUnit,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartLiveActivityRequest {
	push_token: String,
	environment: Environment,
	username: Option<String>,
	password: Option<String>,
	#[serde(rename = "accountID")]
	account_id: Option<Uuid>,
	#[serde(rename = "sessionID")]
	session_id: Option<Uuid>,
	account_location: AccountLocation,
	duration: u64,
	preferences: Option<PreferencesBody>,
}

/// `POST /start-live-activity` — register or overwrite an activity and
/// schedule it to be polled immediately.
async fn start_live_activity(
	State(state): State<Arc<AppState>>,
	body: std::result::Result<Json<StartLiveActivityRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
	let Ok(Json(body)) = body else {
		return StatusCode::BAD_REQUEST.into_response();
	};

	let id = activity_id(body.username.as_deref(), &body.push_token);
	let credentials = UpstreamCredentials {
		username: body.username,
		password: body.password,
		account_id: body.account_id,
		session_id: body.session_id,
	};
	let preferences = body.preferences.map(|preferences| Preferences {
		target_range: crate::model::TargetRange {
			lower: preferences.target_range.lower,
			upper: preferences.target_range.upper,
		},
		unit: preferences.unit,
	});
	let now = Utc::now();
	let record = ActivityRecord::new(
		&id,
		body.push_token,
		body.environment,
		body.account_location,
		body.duration,
		credentials,
		preferences,
		now,
	);

	if let Err(err) = state.store.put_record(&id, &record).await {
		tracing::warn!(error = %err, "failed to persist new activity record");

		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}
	if let Err(err) = state.store.schedule(&id, now).await {
		tracing::warn!(error = %err, "failed to schedule new activity");

		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}

	StatusCode::OK.into_response()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndLiveActivityRequest {
	push_token: Option<String>,
	username: Option<String>,
}

/// `POST /end-live-activity` — delete the record and schedule entry for the
/// computed id.
async fn end_live_activity(
	State(state): State<Arc<AppState>>,
	body: std::result::Result<Json<EndLiveActivityRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
	let Ok(Json(body)) = body else {
		return StatusCode::BAD_REQUEST.into_response();
	};

	if body.push_token.is_none() && body.username.is_none() {
		return StatusCode::BAD_REQUEST.into_response();
	}

	let id = activity_id(body.username.as_deref(), body.push_token.as_deref().unwrap_or_default());

	if let Err(err) = state.store.delete_record(&id).await {
		tracing::warn!(error = %err, "failed to delete activity record");

		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}
	if let Err(err) = state.store.unschedule(&id).await {
		tracing::warn!(error = %err, "failed to unschedule activity");

		return StatusCode::INTERNAL_SERVER_ERROR.into_response();
	}

	StatusCode::OK.into_response()
}

/// Bot-probe suppression: paths ending `.php`, containing `.php7`, or
/// containing `.php/` return 404 without logging, before any other routing.
async fn reject_bot_paths(request: Request, next: Next) -> Response {
	let path = request.uri().path();

	if path.ends_with(".php") || path.contains(".php7") || path.contains(".php/") {
		return StatusCode::NOT_FOUND.into_response();
	}

	next.run(request).await
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bot_path_predicate_matches_documented_shapes() {
		let is_bot_path = |path: &str| {
			path.ends_with(".php") || path.contains(".php7") || path.contains(".php/")
		};

		assert!(is_bot_path("/wp-login.php"));
		assert!(is_bot_path("/index.php7"));
		assert!(is_bot_path("/xmlrpc.php/foo"));
		assert!(!is_bot_path("/start-live-activity"));
	}

	#[test]
	fn start_request_deserializes_the_documented_camel_case_wire_format() {
		let body = serde_json::json!({
			"pushToken": "tok-1",
			"environment": "production",
			"username": "alice",
			"accountID": "3fa85f64-5717-4562-b3fc-2c963f66afa6",
			"sessionID": "3fa85f64-5717-4562-b3fc-2c963f66afa7",
			"accountLocation": "us",
			"duration": 21_600,
			"preferences": {
				"targetRange": { "lower": 70, "upper": 180 },
				"unit": "mgdl",
			},
		});

		let parsed: StartLiveActivityRequest = serde_json::from_value(body).unwrap();

		assert_eq!(parsed.push_token, "tok-1");
		assert_eq!(parsed.account_id.unwrap().to_string(), "3fa85f64-5717-4562-b3fc-2c963f66afa6");
		assert_eq!(parsed.session_id.unwrap().to_string(), "3fa85f64-5717-4562-b3fc-2c963f66afa7");
		assert_eq!(parsed.account_location, AccountLocation::Us);
		assert!(parsed.preferences.is_some());
	}

	#[test]
	fn end_request_deserializes_the_documented_camel_case_wire_format() {
		let body = serde_json::json!({ "pushToken": "tok-1" });
		let parsed: EndLiveActivityRequest = serde_json::from_value(body).unwrap();

		assert_eq!(parsed.push_token.as_deref(), Some("tok-1"));
		assert_eq!(parsed.username, None);
	}
}
