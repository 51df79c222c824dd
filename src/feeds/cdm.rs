//! CDM (JSON) wire shapes and normalization.
//!
//! Newer device firmware exposes REST-ish endpoints returning JSON: an
//! alert listing and a supply event stream. Only the fields we normalize
//! are modelled; everything else is ignored by serde.

use chrono::Utc;
use serde::Deserialize;

use crate::error::FetchError;
use crate::feeds::supply_color_name;
use crate::types::{Alert, Severity, TelemetryRecord, WireFormat};

#[derive(Debug, Deserialize)]
struct AlertListing {
    #[serde(default)]
    alerts: Vec<CdmAlert>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CdmAlert {
    // Firmware is inconsistent about this field's type.
    id: Option<serde_json::Value>,
    severity: Option<String>,
    string_id: Option<String>,
    category: Option<String>,
    priority: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventBatch {
    #[serde(default)]
    events: Vec<SupplyEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SupplyEvent {
    sequence_number: u64,
    event_detail: EventDetail,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct EventDetail {
    notification_trigger: Option<String>,
    identity_info: IdentityInfo,
    state_info: StateInfo,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct IdentityInfo {
    supply_color_code: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct StateInfo {
    state_reasons: Vec<String>,
}

/// Parse a CDM alert listing into normalized alerts.
pub fn parse_alerts(doc: &[u8]) -> Result<Vec<Alert>, FetchError> {
    let listing: AlertListing = serde_json::from_slice(doc)?;
    let now = Utc::now();
    Ok(listing
        .alerts
        .into_iter()
        .map(|alert| {
            let id = match &alert.id {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => alert.string_id.clone().unwrap_or_default(),
            };
            let message = alert
                .string_id
                .or(alert.category)
                .or(alert.priority)
                .unwrap_or_else(|| "unlabelled alert".to_string());
            Alert {
                id,
                severity: Severity::from_wire(alert.severity.as_deref().unwrap_or("")),
                message,
                timestamp: now,
            }
        })
        .collect())
}

/// Parse a CDM supply event batch into telemetry records.
///
/// One record per event: the metric is keyed by supply colour, the value
/// is the notification trigger with any state reasons appended.
pub fn parse_supply_events(doc: &[u8]) -> Result<Vec<TelemetryRecord>, FetchError> {
    let batch: EventBatch = serde_json::from_slice(doc)?;
    let now = Utc::now();
    Ok(batch
        .events
        .into_iter()
        .map(|event| {
            let detail = event.event_detail;
            let color = detail
                .identity_info
                .supply_color_code
                .as_deref()
                .map(supply_color_name)
                .unwrap_or_else(|| "unknown".to_string());
            let trigger = detail
                .notification_trigger
                .unwrap_or_else(|| "unspecified".to_string());
            let value = if detail.state_info.state_reasons.is_empty() {
                trigger
            } else {
                format!("{trigger} [{}]", detail.state_info.state_reasons.join(", "))
            };
            TelemetryRecord {
                id: event.sequence_number.to_string(),
                metric: format!("supply.{color}.state"),
                value,
                timestamp: now,
                source: WireFormat::Cdm,
            }
        })
        .collect())
}
