//! Wire-format normalization for the device feeds.
//!
//! Devices speak one of two dialects: CDM (JSON, newer firmware) or LEDM
//! (XML, older firmware). Both normalize into the same [`Alert`] and
//! [`TelemetryRecord`](crate::types::TelemetryRecord) shapes here, inside
//! the poll worker; raw wire shapes never cross the worker boundary. The
//! record's `source` tag preserves provenance for display.
//!
//! [`Alert`]: crate::types::Alert

pub mod cdm;
pub mod ledm;

/// Map a supply colour code (shared between both dialects) to a stable
/// metric segment. Unknown codes pass through lowercased so new supplies
/// still produce distinct metrics.
pub(crate) fn supply_color_name(code: &str) -> String {
    match code.trim().to_ascii_uppercase().as_str() {
        "C" => "cyan".to_string(),
        "M" => "magenta".to_string(),
        "Y" => "yellow".to_string(),
        "K" => "black".to_string(),
        "CMY" => "tricolor".to_string(),
        other => other.to_ascii_lowercase(),
    }
}
