//! Matte stream consumer - partitioned frame matting with micro-batch
//! checkpointing.
//!
//! This library ingests newline-delimited frame records from the camera
//! server over TCP, groups them into bounded micro-batches, processes each
//! batch's partitions in parallel (decode, matte, write), and records a
//! checkpoint after every committed batch so a restart resumes without
//! re-marking work it already committed. Processing is at-least-once:
//! replayed batches overwrite the same deterministically-named outputs.
//!
//! # Example
//!
//! ```rust,no_run
//! use matte_stream::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = StreamConfig::from_env()?;
//!
//! let matte = BackgroundMatte::from_asset_path(config.transform.asset_path.as_ref())?;
//! let processor = Arc::new(FrameProcessor::new(
//!     Arc::new(matte),
//!     &config.output.dir,
//!     config.output.jpeg_quality,
//! ));
//!
//! let checkpoints = CheckpointStore::open(&config.checkpoint.dir, config.checkpoint.retain)?;
//! let start_batch_id = checkpoints.resume_batch_id()?;
//!
//! let _job = StreamJob::new(config.batch.clone(), processor, checkpoints, start_batch_id);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod ingest;
pub mod job;
pub mod matte;
pub mod processor;

// Re-export main types
pub use batch::{partition, MicroBatch, MicroBatcher};
pub use checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
pub use config::{ConfigValidationError, StreamConfig};
pub use ingest::{ConnectionState, IngestError, IngestStats, StreamClient};
pub use job::{BatchOutcome, StreamJob};
pub use matte::{AssetError, BackgroundMatte, FrameTransform, MatteAsset, TransformError};
pub use processor::{FailureReason, FrameProcessor, PartitionOutcome, ProcessorStats};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::checkpoint::{Checkpoint, CheckpointStore};
    pub use crate::config::StreamConfig;
    pub use crate::ingest::StreamClient;
    pub use crate::job::StreamJob;
    pub use crate::matte::{BackgroundMatte, FrameTransform};
    pub use crate::processor::{FrameProcessor, PartitionOutcome};
}
