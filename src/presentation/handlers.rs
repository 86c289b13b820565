// Command handlers
use crate::application::file_parser::StreamingFileParser;
use crate::application::geo_projector::{
    geo_points_from_telemetry, project_relative_polyline, project_track,
    relative_points_from_telemetry, COLOR_NO_AFR,
};
use crate::application::link_manager::TelemetryLinkManager;
use crate::domain::telemetry::TelemetryPoint;
use crate::infrastructure::config::TrackSettings;
use crate::infrastructure::svg_renderer::{render_relative_svg, render_track_svg};
use crate::infrastructure::ws_connector::WsConnector;
use crate::presentation::app_state::AppState;
use crate::presentation::cli::{ParseArgs, TrackArgs, WatchArgs};
use anyhow::Context;
use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Parse a file and print a summary, or every record with `--json`.
pub async fn run_parse(state: &AppState, args: &ParseArgs) -> anyhow::Result<()> {
    let records = parse_with_progress(&state.parser, &args.file).await?;

    if args.json {
        for record in records.iter() {
            println!("{}", serde_json::to_string(record)?);
        }
    } else {
        let fixes = records.iter().filter(|r| r.lat_f64().is_some()).count();
        let top_speed = records
            .iter()
            .filter_map(TelemetryPoint::velocity_f64)
            .fold(None, |top: Option<f64>, v| Some(top.map_or(v, |t| t.max(v))));
        println!(
            "Parsed {} records ({} with coordinates) from {}",
            records.len(),
            fixes,
            args.file.display()
        );
        if let Some(top_speed) = top_speed {
            println!("Top speed: {:.1}", top_speed);
        }
    }
    Ok(())
}

/// Parse a file and render its track as SVG.
pub async fn run_track(state: &AppState, args: &TrackArgs) -> anyhow::Result<()> {
    let records = parse_with_progress(&state.parser, &args.file).await?;

    let surface = TrackSettings {
        width: args.width.unwrap_or(state.settings.track.width),
        height: args.height.unwrap_or(state.settings.track.height),
        margin: args.margin.unwrap_or(state.settings.track.margin),
    };
    let svg = render_records(&records, &surface, args.relative);

    match &args.out {
        Some(path) => {
            tokio::fs::write(path, svg)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "Track written");
        }
        None => print!("{}", svg),
    }
    Ok(())
}

/// Open the requested channels and print decoded messages until Ctrl-C.
pub async fn run_watch(state: &AppState, args: &WatchArgs) -> anyhow::Result<()> {
    let connector = Arc::new(WsConnector::new());
    let manager = TelemetryLinkManager::new(state.settings.links.clone(), connector);
    let mut messages = BroadcastStream::new(manager.messages());

    for &kind in &args.channels {
        let mut status = manager.subscribe_status(kind);
        tokio::spawn(async move {
            while status.changed().await.is_ok() {
                let current = *status.borrow_and_update();
                tracing::info!(channel = %kind, status = ?current, "Channel status changed");
            }
        });
        manager.connect(kind, args.logger.as_deref())?;
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted, closing channels");
                break;
            }
            item = messages.next() => match item {
                Some(Ok(message)) => println!("{}", serde_json::to_string(&message)?),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Message printer fell behind");
                }
                None => break,
            },
        }
    }

    manager.disconnect_all()?;
    manager.shutdown();
    Ok(())
}

/// Drive a progressive parse to completion, reporting progress on stderr.
pub async fn parse_with_progress(
    parser: &StreamingFileParser,
    path: &Path,
) -> anyhow::Result<Vec<TelemetryPoint>> {
    let mut updates = parser
        .parse_path(path)
        .await
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    // Only the final snapshot is kept; intermediate updates are dropped as they arrive
    let mut records = Vec::new();
    while let Some(update) = updates.next().await {
        let progress = &update.progress;
        if progress.is_complete {
            records = update.records.to_vec();
        } else {
            eprintln!(
                "{:>3}%  {}/{} records  {:.0} rec/s  ETA {}  ~{:.2} MB",
                progress.percentage,
                progress.current,
                progress.total,
                progress.processing_speed,
                progress.estimated_time,
                progress.memory_usage
            );
        }
    }
    Ok(records)
}

pub fn render_records(
    records: &[TelemetryPoint],
    surface: &TrackSettings,
    relative: bool,
) -> String {
    if relative {
        let points = relative_points_from_telemetry(records);
        let path =
            project_relative_polyline(&points, surface.width, surface.height, surface.margin);
        tracing::debug!(points = path.points.len(), scale = path.scale, "Projected relative path");
        render_relative_svg(&path, COLOR_NO_AFR)
    } else {
        let points = geo_points_from_telemetry(records);
        let track = project_track(&points, surface.width, surface.height, surface.margin);
        tracing::debug!(
            segments = track.segments.len(),
            scale = track.bounding_box.scale,
            "Projected track"
        );
        render_track_svg(&track, surface.width, surface.height)
    }
}
