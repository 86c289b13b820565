// Geometry domain models for track rendering
use serde::{Deserialize, Serialize};

/// A true GPS sample used for track rendering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub afr: Option<f64>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng, afr: None }
    }

    pub fn with_afr(mut self, afr: f64) -> Self {
        self.afr = Some(afr);
        self
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && self.lat.abs() <= 90.0
            && self.lng.abs() <= 180.0
    }
}

/// A sample in an arbitrary local frame. The first sample of a sequence is the origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelativePoint {
    pub lat: f64,
    pub lon: f64,
    #[serde(default, rename = "AFR")]
    pub afr: Option<f64>,
    #[serde(default, rename = "RPM")]
    pub rpm: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl RelativePoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            afr: None,
            rpm: None,
            timestamp: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// One drawn edge between consecutive projected points.
///
/// `color` and `afr` describe the destination endpoint `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: usize,
    pub from: PixelPoint,
    pub to: PixelPoint,
    pub color: String,
    pub afr: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
    pub scale: f64,
    pub margin: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackProjection {
    pub segments: Vec<Segment>,
    pub start_point_px: PixelPoint,
    /// Valid points that went into the projection.
    pub point_count: usize,
    pub bounding_box: BoundingBox,
}

/// Projected relative telemetry, ready to be drawn as a single path.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelativePath {
    pub points: Vec<PixelPoint>,
    pub path: String,
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl RelativePath {
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
