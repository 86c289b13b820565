// SVG rendering for projected tracks
use crate::domain::geometry::{RelativePath, TrackProjection};
use std::fmt::Write;

const BACKGROUND: &str = "#121212";
const START_MARKER: &str = "#ffffff";
const STROKE_WIDTH: f64 = 3.0;
const START_RADIUS: f64 = 6.0;

/// Render a GPS track as one coloured `<line>` per segment plus a start marker.
pub fn render_track_svg(track: &TrackProjection, width: f64, height: f64) -> String {
    let mut svg = open_document(width, height);

    let _ = writeln!(svg, r#"  <g stroke-width="{}" stroke-linecap="round">"#, STROKE_WIDTH);
    for segment in &track.segments {
        let _ = writeln!(
            svg,
            r#"    <line x1="{:.2}" y1="{:.2}" x2="{:.2}" y2="{:.2}" stroke="{}"/>"#,
            segment.from.x, segment.from.y, segment.to.x, segment.to.y, segment.color
        );
    }
    svg.push_str("  </g>\n");

    if track.point_count > 0 {
        let _ = writeln!(
            svg,
            r#"  <circle cx="{:.2}" cy="{:.2}" r="{}" fill="{}"/>"#,
            track.start_point_px.x, track.start_point_px.y, START_RADIUS, START_MARKER
        );
    }

    svg.push_str("</svg>\n");
    svg
}

/// Render a relative polyline as a single `<path>`.
pub fn render_relative_svg(path: &RelativePath, stroke: &str) -> String {
    let mut svg = open_document(path.width, path.height);

    if !path.is_empty() {
        let _ = writeln!(
            svg,
            r#"  <path d="{}" fill="none" stroke="{}" stroke-width="{}" stroke-linejoin="round"/>"#,
            path.path, stroke, STROKE_WIDTH
        );
        let start = path.points[0];
        let _ = writeln!(
            svg,
            r#"  <circle cx="{:.2}" cy="{:.2}" r="{}" fill="{}"/>"#,
            start.x, start.y, START_RADIUS, START_MARKER
        );
    }

    svg.push_str("</svg>\n");
    svg
}

fn open_document(width: f64, height: f64) -> String {
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = width,
        h = height
    );
    let _ = writeln!(svg, r#"  <rect width="100%" height="100%" fill="{}"/>"#, BACKGROUND);
    svg
}
