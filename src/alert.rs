//! Pure decision: given the current reading, the previous reading, and the
//! user's alerting preferences, decide whether to surface an alert and what
//! it should say.

// self
use crate::{
	_prelude::*,
	model::{GlucoseUnit, Preferences, Reading, Trend},
};

/// Title and body text for a push-delivered alert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertContent {
	/// Short alert title, e.g. `"High Glucose"`.
	pub title: String,
	/// Alert body describing the current and previous readings.
	pub body: String,
}

/// Decide whether `current` (compared against `previous` and `preferences`)
/// warrants an alert, and what it should say.
///
/// Returns `None` whenever `previous` or `preferences` is absent, or when
/// neither alert condition holds. Pure and deterministic: identical inputs
/// always produce identical output.
pub fn decide(
	current: &Reading,
	previous: Option<&Reading>,
	preferences: Option<&Preferences>,
) -> Option<AlertContent> {
	let previous = previous?;
	let preferences = preferences?;
	let range = &preferences.target_range;
	let crossed_band = range.contains(current.value) != range.contains(previous.value);
	let rapid_change = current.trend.is_rapid();

	if !crossed_band && !rapid_change {
		return None;
	}

	let adjective = trend_adjective(current.trend);
	let unit = unit_suffix(preferences.unit);
	let (title, body) = if current.value > range.upper {
		(
			"High Glucose",
			format!(
				"Now {} {unit} and {}, was {} {unit}.",
				current.value, adjective, previous.value
			),
		)
	} else if current.value < range.lower {
		(
			"Low Glucose",
			format!(
				"Now {} {unit} and {}, was {} {unit}.",
				current.value, adjective, previous.value
			),
		)
	} else {
		("Back in Range", adjective.to_string())
	};

	Some(AlertContent { title: title.to_string(), body })
}

/// Display suffix for a glucose value in the given unit.
///
/// This is display-only: `decide` never converts or rounds the underlying
/// integer value, which is always compared against `targetRange` in its
/// stored, native unit.
fn unit_suffix(unit: GlucoseUnit) -> &'static str {
	match unit {
		GlucoseUnit::Mgdl => "mg/dL",
		GlucoseUnit::Mmol => "mmol/L",
	}
}

fn trend_adjective(trend: Trend) -> &'static str {
	match trend {
		Trend::Flat => "stable",
		Trend::FortyFiveUp => "rising slowly",
		Trend::FortyFiveDown => "falling slowly",
		Trend::SingleUp => "rising",
		Trend::SingleDown => "falling",
		Trend::DoubleUp => "rising quickly",
		Trend::DoubleDown => "falling quickly",
		Trend::None | Trend::NotComputable | Trend::RateOutOfRange => "nil",
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::TargetRange;

	fn reading(value: i32, trend: Trend) -> Reading {
		Reading { date: Utc::now(), value, trend }
	}

	fn prefs() -> Preferences {
		Preferences {
			target_range: TargetRange { lower: 70, upper: 180 },
			unit: crate::model::GlucoseUnit::Mgdl,
		}
	}

	#[test]
	fn returns_none_without_previous_or_preferences() {
		let current = reading(200, Trend::Flat);

		assert_eq!(decide(&current, None, Some(&prefs())), None);
		assert_eq!(decide(&current, Some(&reading(100, Trend::Flat)), None), None);
	}

	#[test]
	fn crossing_above_band_emits_high_glucose() {
		let previous = reading(170, Trend::Flat);
		let current = reading(185, Trend::SingleUp);

		let alert = decide(&current, Some(&previous), Some(&prefs())).unwrap();

		assert_eq!(alert.title, "High Glucose");
		assert_eq!(alert.body, "Now 185 mg/dL and rising, was 170 mg/dL.");
	}

	#[test]
	fn crossing_below_band_emits_low_glucose() {
		let previous = reading(75, Trend::Flat);
		let current = reading(65, Trend::SingleDown);

		let alert = decide(&current, Some(&previous), Some(&prefs())).unwrap();

		assert_eq!(alert.title, "Low Glucose");
	}

	#[test]
	fn returning_to_band_emits_back_in_range() {
		let previous = reading(185, Trend::SingleDown);
		let current = reading(175, Trend::FortyFiveDown);

		let alert = decide(&current, Some(&previous), Some(&prefs())).unwrap();

		assert_eq!(alert.title, "Back in Range");
		assert_eq!(alert.body, "falling slowly");
	}

	#[test]
	fn rapid_change_alerts_even_within_band() {
		let previous = reading(120, Trend::Flat);
		let current = reading(130, Trend::DoubleUp);

		let alert = decide(&current, Some(&previous), Some(&prefs()));

		assert!(alert.is_some());
	}

	#[test]
	fn no_alert_when_stable_within_band() {
		let previous = reading(120, Trend::Flat);
		let current = reading(125, Trend::Flat);

		assert_eq!(decide(&current, Some(&previous), Some(&prefs())), None);
	}

	#[test]
	fn mmol_preferences_format_with_mmol_suffix_and_unrounded_values() {
		let previous = reading(9, Trend::Flat);
		let current = reading(11, Trend::SingleUp);
		let preferences = Preferences {
			target_range: TargetRange { lower: 4, upper: 10 },
			unit: crate::model::GlucoseUnit::Mmol,
		};

		let alert = decide(&current, Some(&previous), Some(&preferences)).unwrap();

		assert_eq!(alert.title, "High Glucose");
		assert_eq!(alert.body, "Now 11 mmol/L and rising, was 9 mmol/L.");
	}

	#[test]
	fn is_pure_and_deterministic() {
		let previous = reading(170, Trend::Flat);
		let current = reading(185, Trend::SingleUp);
		let preferences = prefs();

		let first = decide(&current, Some(&previous), Some(&preferences));
		let second = decide(&current, Some(&previous), Some(&preferences));

		assert_eq!(first, second);
	}
}
