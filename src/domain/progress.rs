// Ingestion progress domain model
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Snapshot of an ingestion in flight, republished after every chunk.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingProgress {
    pub current: usize,
    pub total: usize,
    pub percentage: u32,
    pub is_complete: bool,
    /// Records per second, measured over the most recent chunk.
    pub processing_speed: f64,
    pub estimated_time: String,
    /// Estimated resident size of the accumulated records, in MB.
    pub memory_usage: f64,
}

impl ProcessingProgress {
    pub fn new(
        current: usize,
        total: usize,
        processing_speed: f64,
        average_record_bytes: usize,
    ) -> Self {
        let remaining = total.saturating_sub(current);
        let estimated_time = if processing_speed > 0.0 && processing_speed.is_finite() {
            format_eta(remaining as f64 / processing_speed)
        } else {
            format_eta(0.0)
        };

        Self {
            current,
            total,
            percentage: percentage(current, total),
            is_complete: false,
            processing_speed,
            estimated_time,
            memory_usage: estimate_memory_mb(current, average_record_bytes),
        }
    }

    /// Terminal snapshot: everything processed.
    pub fn complete(total: usize, processing_speed: f64, average_record_bytes: usize) -> Self {
        Self {
            is_complete: true,
            ..Self::new(total, total, processing_speed, average_record_bytes)
        }
    }
}

/// An empty workload counts as fully processed.
pub fn percentage(current: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    let ratio = current.min(total) as f64 / total as f64;
    (ratio * 100.0).round() as u32
}

/// Format a remaining duration as `Ns`, `Nm Ss` or `Nh Mm`.
pub fn format_eta(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };

    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

pub fn estimate_memory_mb(records: usize, average_record_bytes: usize) -> f64 {
    let mb = records as f64 * average_record_bytes as f64 / BYTES_PER_MB;
    (mb * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_eta_ranges() {
        assert_eq!(format_eta(0.0), "0s");
        assert_eq!(format_eta(42.4), "42s");
        assert_eq!(format_eta(125.0), "2m 5s");
        assert_eq!(format_eta(7325.0), "2h 2m");
        assert_eq!(format_eta(f64::INFINITY), "0s");
    }

    #[test]
    fn test_percentage_of_empty_workload() {
        assert_eq!(percentage(0, 0), 100);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
    }

    #[test]
    fn test_progress_snapshot() {
        let progress = ProcessingProgress::new(1000, 3000, 500.0, 512);
        assert_eq!(progress.percentage, 33);
        assert_eq!(progress.estimated_time, "4s");
        assert!(!progress.is_complete);
        assert!(progress.memory_usage > 0.0);

        let done = ProcessingProgress::complete(3000, 500.0, 512);
        assert!(done.is_complete);
        assert_eq!(done.current, 3000);
        assert_eq!(done.percentage, 100);
        assert_eq!(done.estimated_time, "0s");
    }
}
