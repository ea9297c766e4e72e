//! Log-redaction helpers.
//!
//! Every log line that refers to a user must identify them without exposing
//! the raw push token, full email address, or full account identifier — see
//! the redacted-identifier requirement in the error handling design. These
//! helpers are pure and synchronous so call sites can use them directly in
//! `tracing` field expressions.

// self
use crate::_prelude::*;

/// Bullet used to pad a redacted email's local part, per the redacted-
/// identifier log format.
const BULLET: &str = "•••";

/// Redact an email address to its first local-part character plus bullet
/// padding plus the domain, e.g. `alice@example.com` becomes
/// `a•••@example.com`.
///
/// Addresses without an `@` are treated as opaque identifiers and redacted to
/// bullet padding alone.
pub fn redact_email(email: &str) -> String {
	match email.split_once('@') {
		Some((local, domain)) if !local.is_empty() => {
			let first = &local[..local.chars().next().map(char::len_utf8).unwrap_or(0)];

			format!("{first}{BULLET}@{domain}")
		},
		_ => BULLET.to_string(),
	}
}

/// Redact a UUID to its first eight hex characters, e.g.
/// `a1b2c3d4-e5f6-...` becomes `a1b2c3d4`.
pub fn redact_uuid(id: &Uuid) -> String {
	id.simple().to_string().chars().take(8).collect()
}

/// Redact an activity id for logging: emails are redacted via
/// [`redact_email`]; anything else (a raw push token) is redacted to a fixed
/// placeholder that still reveals the token's length class.
pub fn redact_activity_id(id: &str) -> String {
	if id.contains('@') {
		redact_email(id)
	} else {
		redact_push_token(id)
	}
}

/// Redact a raw push token, keeping only a short, non-identifying prefix.
pub fn redact_push_token(token: &str) -> String {
	let prefix: String = token.chars().take(4).collect();

	format!("{prefix}…({} chars)", token.chars().count())
}
