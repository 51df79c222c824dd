//! LEDM (XML) wire shapes and normalization.
//!
//! Older device firmware serves XML status documents; supply state lives
//! in `ConsumableConfigDyn.xml`. The wire carries namespace-prefixed
//! element names; matching happens on the local names.

use chrono::Utc;
use serde::Deserialize;

use crate::error::FetchError;
use crate::feeds::supply_color_name;
use crate::types::{TelemetryRecord, WireFormat};

// quick-xml strips namespace prefixes before handing names to serde, so
// the renames use the local names even though the wire carries `ccdyn:`
// and `dd:` prefixes.
#[derive(Debug, Deserialize)]
struct ConsumableConfigDyn {
    #[serde(rename = "ConsumableInfo", default)]
    consumables: Vec<ConsumableInfo>,
}

#[derive(Debug, Deserialize)]
struct ConsumableInfo {
    #[serde(rename = "ConsumableLabelCode")]
    label_code: String,
    #[serde(rename = "ConsumableTypeEnum", default)]
    type_enum: Option<String>,
    #[serde(rename = "ConsumablePercentageLevelRemaining", default)]
    percentage_remaining: Option<u8>,
    #[serde(rename = "ConsumableLifeState", default)]
    life_state: Option<LifeState>,
}

#[derive(Debug, Deserialize, Default)]
struct LifeState {
    #[serde(rename = "ConsumableState", default)]
    state: Option<String>,
}

/// Parse a `ConsumableConfigDyn` document into telemetry records.
///
/// Ink and toner consumables yield a fill-level record; printheads and
/// other unmetered consumables yield a state record instead.
pub fn parse_consumables(doc: &[u8]) -> Result<Vec<TelemetryRecord>, FetchError> {
    let text = std::str::from_utf8(doc)
        .map_err(|e| FetchError::invalid_response(format!("document is not UTF-8: {e}")))?;
    let config: ConsumableConfigDyn = quick_xml::de::from_str(text)?;
    let now = Utc::now();
    Ok(config
        .consumables
        .into_iter()
        .map(|info| {
            let color = supply_color_name(&info.label_code);
            match info.percentage_remaining {
                Some(level) => TelemetryRecord {
                    id: info.label_code,
                    metric: format!("supply.{color}.level"),
                    value: level.to_string(),
                    timestamp: now,
                    source: WireFormat::Ledm,
                },
                None => TelemetryRecord {
                    id: info.label_code,
                    metric: format!("supply.{color}.state"),
                    value: info
                        .life_state
                        .and_then(|s| s.state)
                        .or(info.type_enum)
                        .unwrap_or_else(|| "unknown".to_string()),
                    timestamp: now,
                    source: WireFormat::Ledm,
                },
            }
        })
        .collect())
}
