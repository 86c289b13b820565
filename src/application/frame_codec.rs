// Frame codec - Classify, decode and encode socket frames per channel
use crate::domain::telemetry::{LoggerStatus, RealtimePoint, TelemetryPoint};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Shortest trimmed frame considered for sensor-record sniffing.
pub const MIN_SENSOR_FRAME_LEN: usize = 10;

/// Tokens required before positions 2, 3 and 4 can be checked.
pub const MIN_SENSOR_TOKENS: usize = 5;

const STATUS_FRAME_TYPE: &str = "logger_status";

/// Epoch values below this are taken as seconds rather than milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e11;

#[derive(Debug, Clone, PartialEq)]
pub enum SensorFrame {
    /// Whitespace-delimited positional record.
    SensorRecord(TelemetryPoint),
    /// Anything else with content; republished but not accumulated.
    RawFrame(String),
    /// Blank frame.
    Unrecognized,
}

/// Sniff a primary-channel frame.
///
/// A frame is a sensor record when it is at least [`MIN_SENSOR_FRAME_LEN`]
/// characters, has at least [`MIN_SENSOR_TOKENS`] whitespace tokens, and the
/// tokens at positions 2, 3 and 4 (lat, long, velocity) are numbers. This is a
/// heuristic: short but legitimate records are reported as raw frames.
pub fn classify_sensor_frame(frame: &str) -> SensorFrame {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return SensorFrame::Unrecognized;
    }

    if looks_like_sensor_record(trimmed) {
        SensorFrame::SensorRecord(TelemetryPoint::from_sensor_tokens(trimmed.split_whitespace()))
    } else {
        SensorFrame::RawFrame(trimmed.to_string())
    }
}

fn looks_like_sensor_record(frame: &str) -> bool {
    if frame.len() < MIN_SENSOR_FRAME_LEN {
        return false;
    }
    let tokens: Vec<&str> = frame.split_whitespace().collect();
    tokens.len() >= MIN_SENSOR_TOKENS && [2, 3, 4].iter().all(|&i| is_number(tokens[i]))
}

fn is_number(token: &str) -> bool {
    token.parse::<f64>().is_ok_and(|v| v.is_finite())
}

/// Decode a realtime or history frame.
///
/// Accepts a flat JSON object, an object whose `data` is another object, or an
/// object whose `data` is a JSON-encoded string. Returns `None` for anything
/// without numeric coordinates. A nested point without its own timestamp takes
/// the envelope's; `received_at_ms` stands in when neither has a usable one.
pub fn decode_point_frame(frame: &str, received_at_ms: i64) -> Option<RealtimePoint> {
    let value: Value = serde_json::from_str(frame).ok()?;
    let (fields, envelope) = point_fields(value)?;

    let lat = number(&fields, &["lat", "latitude"])?;
    let lon = number(&fields, &["lon", "long", "longitude"])?;

    Some(RealtimePoint {
        lat,
        lon,
        afr: number(&fields, &["afr", "data", "afrValue"]),
        velocity: number(&fields, &["velocity", "speed"]),
        heading: number(&fields, &["heading"]),
        timestamp_ms: timestamp(&fields)
            .or_else(|| envelope.as_ref().and_then(timestamp))
            .unwrap_or(received_at_ms),
    })
}

/// Point fields plus the outer envelope when the point was nested in `data`.
fn point_fields(value: Value) -> Option<(Map<String, Value>, Option<Map<String, Value>>)> {
    let Value::Object(map) = value else {
        return None;
    };

    let nested = match map.get("data") {
        Some(Value::String(encoded)) => serde_json::from_str::<Value>(encoded).ok(),
        Some(Value::Object(inner)) if has_coordinates(inner) => Some(Value::Object(inner.clone())),
        _ => None,
    };

    match nested {
        Some(Value::Object(inner)) => Some((inner, Some(map))),
        _ => Some((map, None)),
    }
}

fn has_coordinates(map: &Map<String, Value>) -> bool {
    ["lat", "latitude"].iter().any(|k| map.contains_key(*k))
}

/// First key holding a number or a numeric string.
fn number(map: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| match map.get(*key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|v| v.is_finite())
}

fn timestamp(map: &Map<String, Value>) -> Option<i64> {
    match map.get("timestamp").or_else(|| map.get("time"))? {
        Value::Number(n) => n.as_f64().map(epoch_to_millis),
        Value::String(s) => parse_timestamp(s),
        _ => None,
    }
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(epoch) = raw.parse::<f64>() {
        return Some(epoch_to_millis(epoch));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp_millis());
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn epoch_to_millis(epoch: f64) -> i64 {
    if epoch.abs() < EPOCH_MILLIS_THRESHOLD {
        (epoch * 1000.0).round() as i64
    } else {
        epoch.round() as i64
    }
}

#[derive(Deserialize)]
struct StatusEnvelope {
    #[serde(rename = "type")]
    kind: String,
    data: Vec<LoggerStatus>,
}

/// Decode a fleet status frame. Anything but `{type: "logger_status", data: [...]}` is ignored.
pub fn decode_status_frame(frame: &str) -> Option<Vec<LoggerStatus>> {
    let envelope: StatusEnvelope = serde_json::from_str(frame).ok()?;
    (envelope.kind == STATUS_FRAME_TYPE).then_some(envelope.data)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    Subscribe,
    Unsubscribe,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFrame<'a> {
    #[serde(rename = "type")]
    pub kind: ControlKind,
    pub logger_id: &'a str,
    pub timestamp: i64,
}

/// Encode a subscribe/unsubscribe frame stamped with the current time.
pub fn encode_control(kind: ControlKind, logger_id: &str) -> serde_json::Result<String> {
    serde_json::to_string(&ControlFrame {
        kind,
        logger_id,
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

/// Pass-through payload for a raw frame: parsed JSON when it is JSON, the text otherwise.
pub fn raw_payload(frame: &str) -> Value {
    serde_json::from_str(frame).unwrap_or_else(|_| Value::String(frame.to_string()))
}
