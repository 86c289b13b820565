// Geo projector - Project point sequences onto a fixed-size drawing surface
use crate::domain::geometry::{
    BoundingBox, GeoPoint, PixelPoint, RelativePath, RelativePoint, Segment, TrackProjection,
};
use crate::domain::telemetry::TelemetryPoint;
use std::fmt::Write;

/// Floor for a coordinate span, keeps single-point and straight-line tracks finite.
pub const SPAN_EPSILON: f64 = 1e-6;

/// Floor for the largest relative delta on an axis.
const MIN_RELATIVE_EXTENT: f64 = 1.0;

pub const COLOR_NO_AFR: &str = "#1e88e5";
pub const COLOR_RICH: &str = "#e53935";
pub const COLOR_POWER: &str = "#43a047";
pub const COLOR_CRUISE: &str = "#fdd835";
pub const COLOR_LEAN: &str = "#fb8c00";

/// Stroke colour for an air/fuel ratio reading.
pub fn afr_color(afr: Option<f64>) -> &'static str {
    match afr {
        Some(v) if v.is_finite() => {
            if v < 12.0 {
                COLOR_RICH
            } else if v <= 13.5 {
                COLOR_POWER
            } else if v <= 14.7 {
                COLOR_CRUISE
            } else {
                COLOR_LEAN
            }
        }
        _ => COLOR_NO_AFR,
    }
}

/// Project GPS points into pixel space, preserving aspect ratio.
///
/// Invalid points (non-finite, |lat| > 90, |lng| > 180) are dropped first. With
/// no valid points the result is empty with a zeroed bounding box. Latitude grows
/// upwards, so the vertical axis is inverted. Each segment takes its colour from
/// the point it arrives at.
pub fn project_track(
    points: &[GeoPoint],
    width: f64,
    height: f64,
    margin: f64,
) -> TrackProjection {
    let valid: Vec<&GeoPoint> = points.iter().filter(|p| p.is_valid()).collect();
    if valid.is_empty() {
        return TrackProjection::default();
    }

    let mut min_lat = f64::INFINITY;
    let mut max_lat = f64::NEG_INFINITY;
    let mut min_lng = f64::INFINITY;
    let mut max_lng = f64::NEG_INFINITY;
    for p in &valid {
        min_lat = min_lat.min(p.lat);
        max_lat = max_lat.max(p.lat);
        min_lng = min_lng.min(p.lng);
        max_lng = max_lng.max(p.lng);
    }

    let drawable_width = width - 2.0 * margin;
    let drawable_height = height - 2.0 * margin;
    let scale_x = drawable_width / (max_lng - min_lng).max(SPAN_EPSILON);
    let scale_y = drawable_height / (max_lat - min_lat).max(SPAN_EPSILON);
    let scale = clamp_scale(scale_x.min(scale_y));

    let projected: Vec<(PixelPoint, Option<f64>)> = valid
        .iter()
        .map(|p| {
            let x = (p.lng - min_lng) * scale + margin;
            let y = (max_lat - p.lat) * scale + margin;
            (PixelPoint::new(x, y), p.afr)
        })
        .collect();

    let segments = projected
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            let (from, _) = pair[0];
            let (to, afr) = pair[1];
            Segment {
                index,
                from,
                to,
                color: afr_color(afr).to_string(),
                afr,
            }
        })
        .collect();

    TrackProjection {
        segments,
        start_point_px: projected[0].0,
        point_count: projected.len(),
        bounding_box: BoundingBox {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
            scale,
            margin,
        },
    }
}

/// Project relative telemetry around the first valid sample.
///
/// Deltas are scaled by the largest absolute delta per axis (at least 1) and
/// centred on the surface midpoint, vertical axis inverted.
pub fn project_relative_polyline(
    points: &[RelativePoint],
    width: f64,
    height: f64,
    margin: f64,
) -> RelativePath {
    let valid: Vec<&RelativePoint> = points.iter().filter(|p| p.is_valid()).collect();
    let Some(origin) = valid.first() else {
        return RelativePath::default();
    };

    let deltas: Vec<(f64, f64)> = valid
        .iter()
        .map(|p| (p.lon - origin.lon, p.lat - origin.lat))
        .collect();

    let max_dx = deltas
        .iter()
        .fold(0.0_f64, |acc, (dx, _)| acc.max(dx.abs()))
        .max(MIN_RELATIVE_EXTENT);
    let max_dy = deltas
        .iter()
        .fold(0.0_f64, |acc, (_, dy)| acc.max(dy.abs()))
        .max(MIN_RELATIVE_EXTENT);

    let center_x = width / 2.0;
    let center_y = height / 2.0;
    let scale = clamp_scale(((center_x - margin) / max_dx).min((center_y - margin) / max_dy));

    let projected: Vec<PixelPoint> = deltas
        .iter()
        .map(|(dx, dy)| PixelPoint::new(center_x + dx * scale, center_y - dy * scale))
        .collect();

    RelativePath {
        path: path_data(&projected),
        points: projected,
        width,
        height,
        scale,
    }
}

/// Compact SVG path data: `M x,y L x,y ...`.
pub fn path_data(points: &[PixelPoint]) -> String {
    let mut path = String::with_capacity(points.len() * 16);
    for (i, p) in points.iter().enumerate() {
        let command = if i == 0 { 'M' } else { 'L' };
        if i > 0 {
            path.push(' ');
        }
        let _ = write!(path, "{}{:.2},{:.2}", command, p.x, p.y);
    }
    path
}

/// Reduced lat/lng/AFR view of parsed telemetry. Rows without usable coordinates are skipped.
pub fn geo_points_from_telemetry(points: &[TelemetryPoint]) -> Vec<GeoPoint> {
    points
        .iter()
        .filter_map(|p| {
            let lat = p.lat_f64()?;
            let lng = p.long_f64()?;
            Some(GeoPoint {
                lat,
                lng,
                afr: afr_of(p),
            })
        })
        .collect()
}

pub fn relative_points_from_telemetry(points: &[TelemetryPoint]) -> Vec<RelativePoint> {
    points
        .iter()
        .filter_map(|p| {
            let lat = p.lat_f64()?;
            let lon = p.long_f64()?;
            Some(RelativePoint {
                lat,
                lon,
                afr: afr_of(p),
                rpm: p.numeric("RPM").or_else(|| p.numeric("rpm")),
                timestamp: p.numeric("Time_ms").map(|t| t as i64),
            })
        })
        .collect()
}

fn afr_of(point: &TelemetryPoint) -> Option<f64> {
    point.numeric("AFR").or_else(|| point.numeric("afr"))
}

fn clamp_scale(scale: f64) -> f64 {
    if scale.is_finite() && scale > 0.0 { scale } else { 0.0 }
}
