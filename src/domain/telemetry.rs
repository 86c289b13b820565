// Telemetry data domain models
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Column order of a positional sensor record as emitted by the loggers.
pub const SENSOR_FIELDS: [&str; 19] = [
    "sats",
    "time",
    "lat",
    "long",
    "velocity",
    "heading",
    "height",
    "FixType",
    "accelX",
    "accelY",
    "accelZ",
    "gyroX",
    "gyroY",
    "gyroZ",
    "magX",
    "magY",
    "magZ",
    "mDirection",
    "Time_ms",
];

/// One instantaneous reading from a logger device.
///
/// Every field is kept exactly as it appeared on the wire. Short source lines
/// leave the remaining fields as empty strings, never absent. Columns that are
/// not part of the sensor layout end up in `extra`, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryPoint {
    pub sats: String,
    pub time: String,
    pub lat: String,
    pub long: String,
    pub velocity: String,
    pub heading: String,
    pub height: String,
    #[serde(rename = "FixType")]
    pub fix_type: String,
    #[serde(rename = "accelX")]
    pub accel_x: String,
    #[serde(rename = "accelY")]
    pub accel_y: String,
    #[serde(rename = "accelZ")]
    pub accel_z: String,
    #[serde(rename = "gyroX")]
    pub gyro_x: String,
    #[serde(rename = "gyroY")]
    pub gyro_y: String,
    #[serde(rename = "gyroZ")]
    pub gyro_z: String,
    #[serde(rename = "magX")]
    pub mag_x: String,
    #[serde(rename = "magY")]
    pub mag_y: String,
    #[serde(rename = "magZ")]
    pub mag_z: String,
    #[serde(rename = "mDirection")]
    pub m_direction: String,
    #[serde(rename = "Time_ms")]
    pub time_ms: String,
    /// Running mean of `height` up to and including this point.
    #[serde(rename = "averageHeight", skip_serializing_if = "Option::is_none")]
    pub average_height: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

impl TelemetryPoint {
    /// Build a point from a raw sensor frame, mapping tokens onto [`SENSOR_FIELDS`].
    pub fn from_sensor_tokens<'a, I>(tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut point = Self::default();
        for (name, value) in SENSOR_FIELDS.iter().zip(tokens) {
            point.set_field(name, value.to_string());
        }
        point
    }

    /// Zip a row of tokens onto the given column names.
    ///
    /// Missing trailing values become `""`; surplus values are dropped.
    pub fn from_columns<'a, I>(columns: &[String], tokens: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut point = Self::default();
        let mut tokens = tokens.into_iter();
        for name in columns {
            let value = tokens.next().unwrap_or_default();
            point.set_field(name, value.to_string());
        }
        point
    }

    /// Re-join the point positionally using the given column names.
    pub fn to_row(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|name| self.field(name).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Look up a value by its source column name.
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "sats" => &self.sats,
            "time" => &self.time,
            "lat" => &self.lat,
            "long" => &self.long,
            "velocity" => &self.velocity,
            "heading" => &self.heading,
            "height" => &self.height,
            "FixType" => &self.fix_type,
            "accelX" => &self.accel_x,
            "accelY" => &self.accel_y,
            "accelZ" => &self.accel_z,
            "gyroX" => &self.gyro_x,
            "gyroY" => &self.gyro_y,
            "gyroZ" => &self.gyro_z,
            "magX" => &self.mag_x,
            "magY" => &self.mag_y,
            "magZ" => &self.mag_z,
            "mDirection" => &self.m_direction,
            "Time_ms" => &self.time_ms,
            other => return self.extra.get(other).map(String::as_str),
        };
        Some(value.as_str())
    }

    /// Assign a value by its source column name.
    pub fn set_field(&mut self, name: &str, value: String) {
        let slot = match name {
            "sats" => &mut self.sats,
            "time" => &mut self.time,
            "lat" => &mut self.lat,
            "long" => &mut self.long,
            "velocity" => &mut self.velocity,
            "heading" => &mut self.heading,
            "height" => &mut self.height,
            "FixType" => &mut self.fix_type,
            "accelX" => &mut self.accel_x,
            "accelY" => &mut self.accel_y,
            "accelZ" => &mut self.accel_z,
            "gyroX" => &mut self.gyro_x,
            "gyroY" => &mut self.gyro_y,
            "gyroZ" => &mut self.gyro_z,
            "magX" => &mut self.mag_x,
            "magY" => &mut self.mag_y,
            "magZ" => &mut self.mag_z,
            "mDirection" => &mut self.m_direction,
            "Time_ms" => &mut self.time_ms,
            other => {
                self.extra.insert(other.to_string(), value);
                return;
            }
        };
        *slot = value;
    }

    /// Parse a field as a finite number.
    pub fn numeric(&self, name: &str) -> Option<f64> {
        self.field(name)?
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
    }

    pub fn lat_f64(&self) -> Option<f64> {
        self.numeric("lat")
    }

    pub fn long_f64(&self) -> Option<f64> {
        self.numeric("long")
    }

    pub fn height_f64(&self) -> Option<f64> {
        self.numeric("height")
    }

    pub fn velocity_f64(&self) -> Option<f64> {
        self.numeric("velocity")
    }
}

/// Envelope published to subscribers regardless of the originating channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
}

impl WebSocketMessage {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// A decoded point from the realtime or history feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimePoint {
    pub lat: f64,
    pub lon: f64,
    pub afr: Option<f64>,
    pub velocity: Option<f64>,
    pub heading: Option<f64>,
    pub timestamp_ms: i64,
}

/// One entry of a fleet `logger_status` frame.
///
/// Only the identity, status and last-seen keys are interpreted; anything else
/// the backend sends is kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggerStatus {
    #[serde(default, alias = "logger_id", deserialize_with = "string_or_number")]
    pub logger_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "last_seen")]
    pub last_seen: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// The four logical feeds a client can hold open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Sensor,
    Realtime,
    History,
    Status,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Sensor,
        ChannelKind::Realtime,
        ChannelKind::History,
        ChannelKind::Status,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Sensor => "sensor",
            ChannelKind::Realtime => "realtime",
            ChannelKind::History => "history",
            ChannelKind::Status => "status",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sensor" => Ok(ChannelKind::Sensor),
            "realtime" => Ok(ChannelKind::Realtime),
            "history" => Ok(ChannelKind::History),
            "status" => Ok(ChannelKind::Status),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}
