//! Interpreting model-rated importance scores.

use tracing::debug;

/// Highest importance on the poignancy scale.
pub const MAX_IMPORTANCE: f64 = 9.0;

/// Importance given to game events (reports, code exchanges, rejections).
pub const EVENT_IMPORTANCE: f64 = MAX_IMPORTANCE;

/// Parse a 0 to 9 importance rating from raw model output.
///
/// Tries the whole trimmed text as a number, then the first run of digits,
/// then falls back to `default`. Results are clamped to the scale.
pub fn parse_importance(raw: &str, default: f64) -> f64 {
    let trimmed = raw.trim();
    let parsed = trimmed.parse::<f64>().ok().filter(|v| v.is_finite()).or_else(|| {
        let digits: String = trimmed
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse::<f64>().ok()
    });
    match parsed {
        Some(value) => value.clamp(0.0, MAX_IMPORTANCE),
        None => {
            debug!(raw = trimmed, default, "could not parse memory importance");
            default
        }
    }
}
