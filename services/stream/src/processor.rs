//! Partitioned frame processing.
//!
//! Each partition of a micro-batch runs through [`FrameProcessor::process_partition`]
//! independently: decode the record, decode the JPEG payload, apply the
//! injected transform, write the result under a deterministic name. Every
//! per-record error is absorbed into the partition tally; a single corrupt
//! frame can never abort a partition or a micro-batch.

use crate::matte::{FrameTransform, TransformError};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use matte_protocol::{DecodeError, FrameRecord};
use parking_lot::RwLock;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Why one record failed. Inspectable in tests; never propagated past the
/// partition boundary.
#[derive(Debug, Error)]
pub enum FailureReason {
    #[error("record decode failed: {0}")]
    Record(#[from] DecodeError),

    #[error("image decode failed: {0}")]
    Image(String),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("output write failed: {0}")]
    Write(String),
}

/// Per-partition processing tally.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub success_count: u64,
    pub failure_count: u64,
}

impl PartitionOutcome {
    /// Fold one per-record result into the tally.
    pub fn record(&mut self, result: &Result<(), FailureReason>) {
        match result {
            Ok(()) => self.success_count += 1,
            Err(_) => self.failure_count += 1,
        }
    }

    /// Total records seen by this partition.
    pub fn records_seen(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Absorb another partition's tally.
    pub fn merge(&mut self, other: PartitionOutcome) {
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
    }
}

/// Cumulative statistics across all partitions this processor has run.
#[derive(Debug, Default, Clone)]
pub struct ProcessorStats {
    pub frames_succeeded: u64,
    pub frames_failed: u64,
    pub partitions_processed: u64,
}

/// Stateless-per-batch frame processor shared by all partition workers.
pub struct FrameProcessor {
    transform: Arc<dyn FrameTransform>,
    output_dir: PathBuf,
    jpeg_quality: u8,
    stats: Arc<RwLock<ProcessorStats>>,
}

impl FrameProcessor {
    /// Create a processor writing to `output_dir` at the given JPEG quality.
    pub fn new(
        transform: Arc<dyn FrameTransform>,
        output_dir: impl Into<PathBuf>,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            transform,
            output_dir: output_dir.into(),
            jpeg_quality,
            stats: Arc::new(RwLock::new(ProcessorStats::default())),
        }
    }

    /// Get cumulative processor statistics.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.read().clone()
    }

    /// Process one partition of raw lines and return its tally.
    ///
    /// `success_count + failure_count` always equals the number of lines.
    pub fn process_partition(&self, lines: &[String]) -> PartitionOutcome {
        let mut outcome = PartitionOutcome::default();

        for line in lines {
            let result = self.process_line(line);
            if let Err(reason) = &result {
                debug!(error = %reason, "frame processing failed");
            }
            outcome.record(&result);
        }

        {
            let mut stats = self.stats.write();
            stats.frames_succeeded += outcome.success_count;
            stats.frames_failed += outcome.failure_count;
            stats.partitions_processed += 1;
        }

        outcome
    }

    /// Run one record through decode → transform → write.
    fn process_line(&self, line: &str) -> Result<(), FailureReason> {
        let record = FrameRecord::decode(line)?;

        let frame = image::load_from_memory_with_format(&record.image_payload, ImageFormat::Jpeg)
            .map_err(|e| FailureReason::Image(e.to_string()))?
            .to_rgb8();

        let transformed = self.transform.apply(&frame)?;

        self.write_output(&record, &transformed)
    }

    /// Destination for a record: `{camera_id}_{frame_id}.jpg`, so
    /// reprocessing the same frame overwrites the same file.
    pub fn output_path(&self, record: &FrameRecord) -> PathBuf {
        self.output_dir
            .join(format!("{}_{}.jpg", record.camera_id, record.frame_id))
    }

    fn write_output(&self, record: &FrameRecord, frame: &RgbImage) -> Result<(), FailureReason> {
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality);
        encoder
            .encode(
                frame.as_raw(),
                frame.width(),
                frame.height(),
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|e| FailureReason::Write(e.to_string()))?;

        fs::write(self.output_path(record), &buf).map_err(|e| FailureReason::Write(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use self::helpers::*;

    /// Test helpers for building wire lines with real JPEG payloads.
    mod helpers {
        use super::*;

        pub struct Passthrough;

        impl FrameTransform for Passthrough {
            fn apply(&self, frame: &RgbImage) -> Result<RgbImage, TransformError> {
                Ok(frame.clone())
            }
        }

        pub struct AlwaysFails;

        impl FrameTransform for AlwaysFails {
            fn apply(&self, _frame: &RgbImage) -> Result<RgbImage, TransformError> {
                Err(TransformError::Failed("induced".to_string()))
            }
        }

        pub fn jpeg_bytes(shade: u8) -> Vec<u8> {
            let img = RgbImage::from_pixel(4, 4, image::Rgb([shade, shade, shade]));
            let mut buf = Vec::new();
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, 80);
            encoder
                .encode(img.as_raw(), 4, 4, image::ExtendedColorType::Rgb8)
                .unwrap();
            buf
        }

        pub fn valid_line(camera_id: &str, frame_id: u64) -> String {
            FrameRecord {
                camera_id: camera_id.to_string(),
                frame_id,
                timestamp: 1718000000.0,
                image_payload: jpeg_bytes((frame_id % 256) as u8),
            }
            .encode()
        }
    }

    fn create_test_processor(dir: &std::path::Path) -> FrameProcessor {
        FrameProcessor::new(Arc::new(Passthrough), dir, 90)
    }

    #[test]
    fn test_malformed_lines_counted_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let processor = create_test_processor(dir.path());

        let lines = vec![
            valid_line("cam01", 0),
            "{broken json".to_string(),
            valid_line("cam01", 1),
            "not even close".to_string(),
            valid_line("cam01", 2),
        ];

        let outcome = processor.process_partition(&lines);
        assert_eq!(
            outcome,
            PartitionOutcome {
                success_count: 3,
                failure_count: 2
            }
        );
        assert_eq!(outcome.records_seen(), lines.len() as u64);

        for id in 0..3 {
            assert!(dir.path().join(format!("cam01_{}.jpg", id)).is_file());
        }
    }

    #[test]
    fn test_corrupt_payload_counted() {
        let dir = tempfile::tempdir().unwrap();
        let processor = create_test_processor(dir.path());

        let line = FrameRecord {
            camera_id: "cam01".to_string(),
            frame_id: 9,
            timestamp: 1.0,
            image_payload: b"definitely not a jpeg".to_vec(),
        }
        .encode();

        let outcome = processor.process_partition(&[line]);
        assert_eq!(outcome.failure_count, 1);
        assert!(!dir.path().join("cam01_9.jpg").exists());
    }

    #[test]
    fn test_transform_failure_counted() {
        let dir = tempfile::tempdir().unwrap();
        let processor = FrameProcessor::new(Arc::new(AlwaysFails), dir.path(), 90);

        let outcome = processor.process_partition(&[valid_line("cam01", 0)]);
        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.failure_count, 1);
        assert!(!dir.path().join("cam01_0.jpg").exists());
    }

    #[test]
    fn test_write_failure_counted() {
        // Nonexistent nested directory: every write fails, nothing escapes.
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not").join("created");
        let processor = FrameProcessor::new(Arc::new(Passthrough), &missing, 90);

        let lines = vec![valid_line("cam01", 0), valid_line("cam01", 1)];
        let outcome = processor.process_partition(&lines);
        assert_eq!(outcome.failure_count, 2);
    }

    #[test]
    fn test_reprocessing_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let processor = create_test_processor(dir.path());
        let lines = vec![valid_line("cam01", 0), valid_line("cam01", 1)];

        processor.process_partition(&lines);
        let first: Vec<Vec<u8>> = (0..2)
            .map(|id| fs::read(dir.path().join(format!("cam01_{}.jpg", id))).unwrap())
            .collect();

        processor.process_partition(&lines);
        let second: Vec<Vec<u8>> = (0..2)
            .map(|id| fs::read(dir.path().join(format!("cam01_{}.jpg", id))).unwrap())
            .collect();

        assert_eq!(first, second);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn test_empty_partition() {
        let dir = tempfile::tempdir().unwrap();
        let processor = create_test_processor(dir.path());
        let outcome = processor.process_partition(&[]);
        assert_eq!(outcome, PartitionOutcome::default());
    }

    #[test]
    fn test_stats_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let processor = create_test_processor(dir.path());

        processor.process_partition(&[valid_line("cam01", 0)]);
        processor.process_partition(&["junk".to_string()]);

        let stats = processor.stats();
        assert_eq!(stats.frames_succeeded, 1);
        assert_eq!(stats.frames_failed, 1);
        assert_eq!(stats.partitions_processed, 2);
    }
}
