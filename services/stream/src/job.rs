//! Micro-batch job driver.
//!
//! Ties the pipeline together: collect a micro-batch, fan its partitions out
//! to blocking workers, merge their tallies, then commit a checkpoint. The
//! job ends when the line channel closes; buffered lines drain into a final
//! partial batch first, so graceful shutdown flushes pending work and
//! records its checkpoint before exit.

use crate::batch::{partition, MicroBatch, MicroBatcher};
use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::config::BatchConfig;
use crate::processor::{FrameProcessor, PartitionOutcome};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Outcome of one processed micro-batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub batch_id: u64,
    pub partitions: Vec<PartitionOutcome>,
}

impl BatchOutcome {
    /// Merged tally across all partitions.
    pub fn totals(&self) -> PartitionOutcome {
        let mut totals = PartitionOutcome::default();
        for outcome in &self.partitions {
            totals.merge(*outcome);
        }
        totals
    }
}

/// Batch/process/commit loop.
pub struct StreamJob {
    batcher: MicroBatcher,
    processor: Arc<FrameProcessor>,
    checkpoints: CheckpointStore,
    partitions: usize,
}

impl StreamJob {
    /// Create a job resuming at `start_batch_id`.
    pub fn new(
        batch_config: BatchConfig,
        processor: Arc<FrameProcessor>,
        checkpoints: CheckpointStore,
        start_batch_id: u64,
    ) -> Self {
        let partitions = batch_config.partitions;
        Self {
            batcher: MicroBatcher::new(batch_config, start_batch_id),
            processor,
            checkpoints,
            partitions,
        }
    }

    /// Process one micro-batch across parallel partition workers.
    ///
    /// Partitions share nothing and may finish in any order; their tallies
    /// are merged after the join.
    pub async fn process_batch(&self, batch: MicroBatch) -> BatchOutcome {
        let batch_id = batch.batch_id;
        let parts = partition(batch.lines, self.partitions);

        let workers: Vec<_> = parts
            .into_iter()
            .map(|lines| {
                let processor = self.processor.clone();
                tokio::task::spawn_blocking(move || processor.process_partition(&lines))
            })
            .collect();

        let mut partitions = Vec::new();
        for joined in join_all(workers).await {
            match joined {
                Ok(outcome) => partitions.push(outcome),
                Err(e) => warn!(batch_id, error = %e, "partition worker failed to join"),
            }
        }

        BatchOutcome {
            batch_id,
            partitions,
        }
    }

    /// Run until the line channel closes, committing a checkpoint after
    /// each processed micro-batch.
    pub async fn run(&mut self, rx: &mut mpsc::Receiver<String>) -> Result<(), CheckpointError> {
        while let Some(batch) = self.batcher.next_batch(rx).await {
            let records = batch.lines.len();
            let outcome = self.process_batch(batch).await;
            let totals = outcome.totals();

            info!(
                batch_id = outcome.batch_id,
                records,
                success = totals.success_count,
                failure = totals.failure_count,
                partitions = outcome.partitions.len(),
                "micro-batch processed"
            );

            self.checkpoints.commit(&Checkpoint {
                batch_id: outcome.batch_id,
                success_count: totals.success_count,
                failure_count: totals.failure_count,
                committed_at: Utc::now(),
            })?;
        }

        info!("record stream ended, job finished");
        Ok(())
    }
}
