// Streaming file parser - Progressive parsing of positional telemetry files
use crate::domain::progress::ProcessingProgress;
use crate::domain::telemetry::TelemetryPoint;
use crate::infrastructure::config::ParserSettings;
use bytes::Bytes;
use futures::stream::Stream;
use std::collections::HashSet;
use std::ops::{Index, Range};
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

pub const COLUMNS_MARKER: &str = "[columnnames]";
pub const DATA_MARKER: &str = "[data]";

/// Lower bound for a chunk's measured duration, keeps the speed finite.
const MIN_CHUNK_SECS: f64 = 0.001;

#[derive(Debug, Error)]
pub enum ParseError {
    /// Structural markers missing or out of order. Nothing is emitted.
    #[error("Invalid telemetry file format: {0}")]
    Format(String),

    /// A parse is already running on this parser.
    #[error("A telemetry parse is already in progress")]
    Busy,

    #[error("Failed to read telemetry file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParsePhase {
    #[default]
    Idle,
    Reading,
    Parsing { chunk: usize, chunks: usize },
    Complete,
    Error,
}

impl ParsePhase {
    pub fn is_active(&self) -> bool {
        matches!(self, ParsePhase::Reading | ParsePhase::Parsing { .. })
    }
}

/// Accumulated parse output, stored as the list of parsed chunks.
///
/// Cloning shares every chunk, so a snapshot costs one pointer per chunk no
/// matter how many records it holds.
#[derive(Debug, Clone, Default)]
pub struct ParsedRecords {
    chunks: Vec<Arc<[TelemetryPoint]>>,
    len: usize,
}

impl ParsedRecords {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<&TelemetryPoint> {
        let mut offset = index;
        for chunk in &self.chunks {
            if offset < chunk.len() {
                return Some(&chunk[offset]);
            }
            offset -= chunk.len();
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = &TelemetryPoint> {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }

    pub fn chunks(&self) -> &[Arc<[TelemetryPoint]>] {
        &self.chunks
    }

    /// Copy the records into one contiguous vector.
    pub fn to_vec(&self) -> Vec<TelemetryPoint> {
        self.iter().cloned().collect()
    }

    fn push_chunk(&mut self, chunk: Vec<TelemetryPoint>) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk.into());
    }
}

impl Index<usize> for ParsedRecords {
    type Output = TelemetryPoint;

    fn index(&self, index: usize) -> &TelemetryPoint {
        match self.get(index) {
            Some(point) => point,
            None => panic!("record index {} out of range for {} records", index, self.len),
        }
    }
}

/// One progressive emission.
///
/// `records` is the whole accumulation so far; `new_range` indexes the records
/// added by this chunk.
#[derive(Debug, Clone)]
pub struct ParseUpdate {
    pub records: ParsedRecords,
    pub new_range: Range<usize>,
    pub progress: ProcessingProgress,
}

pub type ParseStream = Pin<Box<dyn Stream<Item = ParseUpdate> + Send>>;

/// Column names and data rows of a positional file.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionalLayout {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
}

impl PositionalLayout {
    /// Locate the `[columnnames]` and `[data]` sections.
    pub fn from_text(text: &str) -> Result<Self, ParseError> {
        let lines: Vec<&str> = text.lines().collect();

        let header_at = lines
            .iter()
            .position(|l| l.trim() == COLUMNS_MARKER)
            .ok_or_else(|| ParseError::Format(format!("missing {} section", COLUMNS_MARKER)))?;

        let columns: Vec<String> = lines
            .get(header_at + 1)
            .map(|l| l.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        if columns.is_empty() {
            return Err(ParseError::Format(format!(
                "no column names after {}",
                COLUMNS_MARKER
            )));
        }

        let data_at = lines[header_at + 1..]
            .iter()
            .position(|l| l.trim() == DATA_MARKER)
            .map(|offset| header_at + 1 + offset)
            .ok_or_else(|| {
                ParseError::Format(format!("missing {} section after column names", DATA_MARKER))
            })?;

        let rows = lines[data_at + 1..]
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect();

        Ok(Self { columns, rows })
    }

    pub fn point(&self, row: &str) -> TelemetryPoint {
        TelemetryPoint::from_columns(&self.columns, row.split_whitespace())
    }
}

/// Incremental arithmetic mean that skips non-numeric samples but still counts them.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: usize,
}

impl RunningMean {
    pub fn push(&mut self, value: Option<f64>) -> f64 {
        self.count += 1;
        if let Some(v) = value {
            self.sum += v;
        }
        round3(self.sum / self.count as f64)
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Running mean of `field` for every point, in order.
pub fn running_average(points: &[TelemetryPoint], field: &str) -> Vec<f64> {
    let mut mean = RunningMean::default();
    points.iter().map(|p| mean.push(p.numeric(field))).collect()
}

/// Fill `average_height` on every point.
pub fn with_average_height(mut points: Vec<TelemetryPoint>) -> Vec<TelemetryPoint> {
    let mut mean = RunningMean::default();
    for point in &mut points {
        point.average_height = Some(mean.push(point.height_f64()));
    }
    points
}

/// Append `incoming` to `existing`, keeping the first point seen for each
/// `(time, lat, long)` key.
pub fn merge_incoming(
    existing: &[TelemetryPoint],
    incoming: &[TelemetryPoint],
) -> Vec<TelemetryPoint> {
    let mut seen: HashSet<(&str, &str, &str)> =
        HashSet::with_capacity(existing.len() + incoming.len());
    existing
        .iter()
        .chain(incoming)
        .filter(|p| seen.insert((p.time.as_str(), p.lat.as_str(), p.long.as_str())))
        .cloned()
        .collect()
}

/// Parse a whole positional file in one go.
pub fn parse_positional(text: &str) -> Result<Vec<TelemetryPoint>, ParseError> {
    let layout = PositionalLayout::from_text(text)?;
    let points = layout.rows.iter().map(|row| layout.point(row)).collect();
    Ok(with_average_height(points))
}

/// Parses telemetry files chunk by chunk, one file at a time.
#[derive(Clone)]
pub struct StreamingFileParser {
    settings: ParserSettings,
    phase: Arc<watch::Sender<ParsePhase>>,
}

impl StreamingFileParser {
    pub fn new(settings: ParserSettings) -> Self {
        let (phase, _) = watch::channel(ParsePhase::Idle);
        Self {
            settings,
            phase: Arc::new(phase),
        }
    }

    pub fn phase(&self) -> ParsePhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ParsePhase> {
        self.phase.subscribe()
    }

    /// Validate the file layout and return a stream of progressive updates.
    ///
    /// Fails immediately with [`ParseError::Busy`] if another parse is active,
    /// or [`ParseError::Format`] if the markers are missing. The stream yields
    /// after every chunk and once more with `is_complete` set. Dropping the
    /// stream abandons the parse.
    pub fn parse_file_progressively(&self, bytes: Bytes) -> Result<ParseStream, ParseError> {
        let guard = self.acquire(ParsePhase::Parsing { chunk: 0, chunks: 0 })?;
        self.prepare(guard, &bytes)
    }

    /// Read `path` and parse it progressively.
    pub async fn parse_path(&self, path: &Path) -> Result<ParseStream, ParseError> {
        let mut guard = self.acquire(ParsePhase::Reading)?;
        tracing::debug!(path = %path.display(), "Reading telemetry file");

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                guard.fail();
                return Err(e.into());
            }
        };
        guard.set(ParsePhase::Parsing { chunk: 0, chunks: 0 });
        self.prepare(guard, &bytes)
    }

    fn acquire(&self, phase: ParsePhase) -> Result<PhaseGuard, ParseError> {
        let mut acquired = false;
        self.phase.send_if_modified(|current| {
            if current.is_active() {
                return false;
            }
            *current = phase;
            acquired = true;
            true
        });

        if !acquired {
            tracing::warn!("Rejected telemetry parse: another parse is in progress");
            return Err(ParseError::Busy);
        }

        Ok(PhaseGuard {
            phase: self.phase.clone(),
        })
    }

    fn prepare(&self, mut guard: PhaseGuard, bytes: &[u8]) -> Result<ParseStream, ParseError> {
        let text = String::from_utf8_lossy(bytes);
        match PositionalLayout::from_text(&text) {
            Ok(layout) => Ok(self.stream_chunks(layout, guard)),
            Err(e) => {
                tracing::warn!(error = %e, "Rejected telemetry file");
                guard.fail();
                Err(e)
            }
        }
    }

    fn stream_chunks(&self, layout: PositionalLayout, guard: PhaseGuard) -> ParseStream {
        let settings = self.settings.clone();

        let stream = async_stream::stream! {
            let mut guard = guard;
            let total = layout.rows.len();
            let chunk_size = settings.chunk_size.max(1);
            let chunks = total.div_ceil(chunk_size);
            let started = Instant::now();

            let mut records = ParsedRecords::default();
            let mut mean = RunningMean::default();
            let mut last_tick = Instant::now();
            let mut speed = 0.0;

            tracing::info!(
                total,
                columns = layout.columns.len(),
                chunks,
                "Telemetry parse started"
            );

            for (index, chunk) in layout.rows.chunks(chunk_size).enumerate() {
                guard.set(ParsePhase::Parsing { chunk: index, chunks });

                let start = records.len();
                let batch: Vec<TelemetryPoint> = chunk
                    .iter()
                    .map(|row| {
                        let mut point = layout.point(row);
                        point.average_height = Some(mean.push(point.height_f64()));
                        point
                    })
                    .collect();
                records.push_chunk(batch);

                let elapsed = last_tick.elapsed().as_secs_f64().max(MIN_CHUNK_SECS);
                speed = chunk.len() as f64 / elapsed;
                last_tick = Instant::now();

                let progress = ProcessingProgress::new(
                    records.len(),
                    total,
                    speed,
                    settings.average_record_bytes,
                );
                tracing::debug!(
                    chunk = index + 1,
                    chunks,
                    current = progress.current,
                    percentage = progress.percentage,
                    speed = progress.processing_speed,
                    eta = %progress.estimated_time,
                    "Parsed telemetry chunk"
                );

                yield ParseUpdate {
                    records: records.clone(),
                    new_range: start..records.len(),
                    progress,
                };

                if index + 1 < chunks {
                    tokio::time::sleep(settings.yield_delay()).await;
                }
            }

            guard.complete();
            tracing::info!(
                total,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Telemetry parse complete"
            );

            yield ParseUpdate {
                records: records.clone(),
                new_range: total..total,
                progress: ProcessingProgress::complete(total, speed, settings.average_record_bytes),
            };
        };

        Box::pin(stream)
    }
}

/// Holds the parser's single in-flight slot. Dropping it before completion
/// returns the parser to `Idle`.
struct PhaseGuard {
    phase: Arc<watch::Sender<ParsePhase>>,
}

impl PhaseGuard {
    fn set(&mut self, phase: ParsePhase) {
        self.phase.send_replace(phase);
    }

    fn complete(&mut self) {
        self.set(ParsePhase::Complete);
    }

    fn fail(&mut self) {
        self.set(ParsePhase::Error);
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.phase.send_if_modified(|current| {
            if current.is_active() {
                *current = ParsePhase::Idle;
                true
            } else {
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    const SAMPLE: &str = "[columnnames]\nlat long time\n[data]\n10.0 20.0 120000\n11.0 21.0 120100";

    fn settings(chunk_size: usize) -> ParserSettings {
        ParserSettings {
            chunk_size,
            yield_delay_ms: 10,
            average_record_bytes: 512,
        }
    }

    fn file_with_rows(rows: usize) -> Bytes {
        let mut text = String::from("[columnnames]\nsats time lat long velocity heading height\n[data]\n");
        for i in 0..rows {
            text.push_str(&format!("8 {:06}.000 45.{:04} 7.{:04} 30.5 90 {}\n", i, i, i, i % 10));
        }
        Bytes::from(text)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sample_file_yields_two_records() {
        let parser = StreamingFileParser::new(settings(1000));
        let updates: Vec<ParseUpdate> = parser
            .parse_file_progressively(Bytes::from_static(SAMPLE.as_bytes()))
            .unwrap()
            .collect()
            .await;

        let last = updates.last().unwrap();
        assert!(last.progress.is_complete);
        assert_eq!(last.records.len(), 2);
        assert_eq!(last.records[1].time, "120100");
        assert_eq!(last.records[0].lat, "10.0");
        assert_eq!(parser.phase(), ParsePhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunks_accumulate_in_order() {
        let parser = StreamingFileParser::new(settings(1000));
        let updates: Vec<ParseUpdate> = parser
            .parse_file_progressively(file_with_rows(2500))
            .unwrap()
            .collect()
            .await;

        assert_eq!(updates.len(), 4);
        let currents: Vec<usize> = updates.iter().map(|u| u.progress.current).collect();
        assert_eq!(currents, vec![1000, 2000, 2500, 2500]);
        assert_eq!(updates[1].new_range, 1000..2000);
        assert_eq!(updates[0].progress.percentage, 40);

        // Every emission is a prefix of the next one
        for pair in updates.windows(2) {
            let (a, b) = (&pair[0].records, &pair[1].records);
            assert!(b.iter().take(a.len()).eq(a.iter()));
        }

        let last = updates.last().unwrap();
        assert!(last.progress.is_complete);
        assert_eq!(last.progress.current, last.progress.total);
        assert_eq!(last.progress.percentage, 100);
        assert!(updates[..3].iter().all(|u| !u.progress.is_complete));
        assert!(updates[1].progress.processing_speed > 0.0);
        assert!(updates[1].progress.processing_speed.is_finite());
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_snapshot_shares_earlier_chunks() {
        let parser = StreamingFileParser::new(settings(100));
        let mut updates = parser.parse_file_progressively(file_with_rows(300)).unwrap();

        let first = updates.next().await.unwrap();
        let second = updates.next().await.unwrap();
        let third = updates.next().await.unwrap();

        // Holding earlier updates must not force the accumulation to be copied
        assert_eq!(first.records.chunks().len(), 1);
        assert_eq!(third.records.chunks().len(), 3);
        assert!(Arc::ptr_eq(&first.records.chunks()[0], &third.records.chunks()[0]));
        assert!(Arc::ptr_eq(&second.records.chunks()[1], &third.records.chunks()[1]));
        assert_eq!(first.records.len(), 100);
        assert_eq!(third.records.len(), 300);
        assert_eq!(third.records[150], second.records[150]);
        assert!(third.records.get(300).is_none());

        let last = updates.next().await.unwrap();
        assert!(last.progress.is_complete);
        assert!(Arc::ptr_eq(&first.records.chunks()[0], &last.records.chunks()[0]));
        assert_eq!(last.records.to_vec().len(), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_follows_chunks() {
        let parser = StreamingFileParser::new(settings(1));
        let mut phases = parser.subscribe_phase();
        assert_eq!(*phases.borrow_and_update(), ParsePhase::Idle);

        let mut updates = parser
            .parse_file_progressively(Bytes::from_static(SAMPLE.as_bytes()))
            .unwrap();
        assert!(phases.has_changed().unwrap());

        updates.next().await.unwrap();
        assert_eq!(*phases.borrow_and_update(), ParsePhase::Parsing { chunk: 0, chunks: 2 });
        updates.next().await.unwrap();
        assert_eq!(*phases.borrow_and_update(), ParsePhase::Parsing { chunk: 1, chunks: 2 });
        let last = updates.next().await.unwrap();
        assert!(last.progress.is_complete);
        assert_eq!(*phases.borrow_and_update(), ParsePhase::Complete);

        assert!(updates.next().await.is_none());
        drop(updates);
        assert!(!phases.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_average_height_is_filled_progressively() {
        let parser = StreamingFileParser::new(settings(2));
        let text = "[columnnames]\nheight\n[data]\n10\nnope\n20\n";
        let updates: Vec<ParseUpdate> = parser
            .parse_file_progressively(Bytes::from(text))
            .unwrap()
            .collect()
            .await;

        let averages: Vec<Option<f64>> = updates
            .last()
            .unwrap()
            .records
            .iter()
            .map(|p| p.average_height)
            .collect();
        assert_eq!(averages, vec![Some(10.0), Some(5.0), Some(10.0)]);
    }

    #[tokio::test]
    async fn test_missing_markers_fail_without_data() {
        let parser = StreamingFileParser::new(settings(1000));

        let no_data = "[columnnames]\nlat long\n10 20\n";
        assert!(matches!(
            parser.parse_file_progressively(Bytes::from(no_data)),
            Err(ParseError::Format(_))
        ));
        assert_eq!(parser.phase(), ParsePhase::Error);

        let no_header = "[data]\n10 20\n";
        assert!(matches!(
            parser.parse_file_progressively(Bytes::from(no_header)),
            Err(ParseError::Format(_))
        ));

        let reversed = "[data]\n10 20\n[columnnames]\nlat long\n";
        assert!(matches!(
            parser.parse_file_progressively(Bytes::from(reversed)),
            Err(ParseError::Format(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_parse_is_rejected_while_active() {
        let parser = StreamingFileParser::new(settings(1000));
        let first = parser
            .parse_file_progressively(Bytes::from_static(SAMPLE.as_bytes()))
            .unwrap();

        assert!(matches!(
            parser.parse_file_progressively(Bytes::from_static(SAMPLE.as_bytes())),
            Err(ParseError::Busy)
        ));

        // Abandoning the stream frees the parser
        drop(first);
        assert_eq!(parser.phase(), ParsePhase::Idle);
        assert!(parser
            .parse_file_progressively(Bytes::from_static(SAMPLE.as_bytes()))
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_data_section_completes() {
        let parser = StreamingFileParser::new(settings(1000));
        let updates: Vec<ParseUpdate> = parser
            .parse_file_progressively(Bytes::from("[columnnames]\nlat long\n[data]\n\n\n"))
            .unwrap()
            .collect()
            .await;

        assert_eq!(updates.len(), 1);
        assert!(updates[0].progress.is_complete);
        assert_eq!(updates[0].progress.total, 0);
        assert_eq!(updates[0].progress.percentage, 100);
    }

    #[tokio::test]
    async fn test_parse_path_reports_io_error() {
        let parser = StreamingFileParser::new(settings(1000));
        let result = parser
            .parse_path(Path::new("/definitely/not/a/telemetry/file.txt"))
            .await;

        assert!(matches!(result, Err(ParseError::Io(_))));
        assert_eq!(parser.phase(), ParsePhase::Error);
    }

    #[test]
    fn test_short_and_long_rows_are_tolerated() {
        let text = "[columnnames]\nlat long time\n[data]\n10.0\n10.0 20.0 120000 extra\n";
        let points = parse_positional(text).unwrap();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].long, "");
        assert_eq!(points[0].time, "");
        assert_eq!(points[1].time, "120000");
        assert!(points[1].extra.is_empty());
    }

    #[test]
    fn test_rows_rejoin_to_original_tokens() {
        let text = "[columnnames]\nsats  time\tlat long AFR\n[data]\n9 120000.200 51.1 -0.2 13.4\n";
        let layout = PositionalLayout::from_text(text).unwrap();
        let point = layout.point(&layout.rows[0]);
        assert_eq!(point.to_row(&layout.columns), "9 120000.200 51.1 -0.2 13.4");
    }

    #[test]
    fn test_merge_incoming_dedupes_and_keeps_order() {
        let make = |time: &str, lat: &str, sats: &str| TelemetryPoint {
            time: time.to_string(),
            lat: lat.to_string(),
            long: "7.0".to_string(),
            sats: sats.to_string(),
            ..Default::default()
        };

        let existing = vec![make("1", "45.0", "a"), make("2", "45.1", "b")];
        let incoming = vec![
            make("2", "45.1", "dup"),
            make("3", "45.2", "c"),
            make("3", "45.2", "dup"),
        ];

        let merged = merge_incoming(&existing, &incoming);
        let sats: Vec<&str> = merged.iter().map(|p| p.sats.as_str()).collect();
        assert_eq!(sats, vec!["a", "b", "c"]);

        let again = merge_incoming(&merged, &incoming);
        assert_eq!(again, merged);
    }

    #[test]
    fn test_running_average_counts_every_element() {
        let points: Vec<TelemetryPoint> = ["3", "", "x", "6.5"]
            .iter()
            .map(|h| TelemetryPoint {
                height: h.to_string(),
                ..Default::default()
            })
            .collect();

        assert_eq!(running_average(&points, "height"), vec![3.0, 1.5, 1.0, 2.375]);
        assert_eq!(running_average(&points[..0], "height"), Vec::<f64>::new());

        let thirds = vec![
            TelemetryPoint { height: "1".into(), ..Default::default() },
            TelemetryPoint { height: "1".into(), ..Default::default() },
            TelemetryPoint { height: "0".into(), ..Default::default() },
        ];
        assert_eq!(with_average_height(thirds)[2].average_height, Some(0.667));
    }
}
