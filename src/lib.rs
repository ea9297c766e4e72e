//! Adaptive polling scheduler that drives Apple Live Activity updates for a
//! continuous glucose monitor companion app, backed by Redis for durable
//! schedule state and APNs for push delivery.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod alert;
pub mod config;
pub mod http;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod model;
pub mod push;
pub mod scheduler;
pub mod security;
pub mod store;
pub mod upstream;

mod error;

mod _prelude {
	pub use std::{
		fmt,
		sync::Arc,
		time::Duration,
	};

	pub use chrono::{DateTime, Utc};
	pub use serde::{Deserialize, Serialize};
	pub use tokio::time::Instant;
	pub use uuid::Uuid;

	pub use crate::{Error, Result};
}
pub use crate::error::{Error, Result};

#[cfg(test)]
mod _test {
	use metrics_util as _;
	use tracing_subscriber as _;
	use wiremock as _;
}
