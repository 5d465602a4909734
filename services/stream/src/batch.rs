//! Micro-batching of raw record lines.
//!
//! Ingested lines are grouped into bounded micro-batches: a batch closes
//! when it reaches `max_records` or when the batch window elapses, whichever
//! comes first. Batch ids are monotone starting from the restart resume
//! point, so committed batches keep their identity across runs.

use crate::config::BatchConfig;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// A bounded group of raw lines processed together between checkpoints.
#[derive(Debug, Clone)]
pub struct MicroBatch {
    pub batch_id: u64,
    pub lines: Vec<String>,
}

/// Groups incoming lines into micro-batches.
pub struct MicroBatcher {
    config: BatchConfig,
    next_batch_id: u64,
}

impl MicroBatcher {
    /// Create a batcher whose first batch gets `start_batch_id`.
    pub fn new(config: BatchConfig, start_batch_id: u64) -> Self {
        Self {
            config,
            next_batch_id: start_batch_id,
        }
    }

    /// The id the next closed batch will receive.
    pub fn next_batch_id(&self) -> u64 {
        self.next_batch_id
    }

    /// Collect the next micro-batch.
    ///
    /// Waits indefinitely for the first line, then bounds the batch by size
    /// and window. Returns `None` once the channel is closed and drained;
    /// lines still buffered at close time are emitted as a final partial
    /// batch first.
    pub async fn next_batch(&mut self, rx: &mut mpsc::Receiver<String>) -> Option<MicroBatch> {
        let first = rx.recv().await?;

        let mut lines = vec![first];
        let deadline = Instant::now() + self.config.window();

        while lines.len() < self.config.max_records {
            match timeout_at(deadline, rx.recv()).await {
                Ok(Some(line)) => lines.push(line),
                // Channel closed: flush what we have.
                Ok(None) => break,
                // Window elapsed.
                Err(_) => break,
            }
        }

        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;

        debug!(batch_id, records = lines.len(), "micro-batch closed");

        Some(MicroBatch { batch_id, lines })
    }
}

/// Split a batch into at most `n` contiguous partitions.
///
/// Ordering within a partition follows arrival order of the lines assigned
/// to it; nothing is guaranteed across partitions.
pub fn partition(mut lines: Vec<String>, n: usize) -> Vec<Vec<String>> {
    if lines.is_empty() || n == 0 {
        return Vec::new();
    }

    let chunk = lines.len().div_ceil(n);
    let mut parts = Vec::with_capacity(n);
    while !lines.is_empty() {
        let rest = lines.split_off(chunk.min(lines.len()));
        parts.push(std::mem::replace(&mut lines, rest));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config(max_records: usize, window_ms: u64) -> BatchConfig {
        BatchConfig {
            max_records,
            window_ms,
            partitions: 4,
            queue_size: 64,
        }
    }

    fn numbered_lines(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("line-{}", i)).collect()
    }

    #[tokio::test]
    async fn test_batch_closes_at_max_records() {
        let mut batcher = MicroBatcher::new(create_test_config(4, 10_000), 0);
        let (tx, mut rx) = mpsc::channel(16);

        for line in numbered_lines(6) {
            tx.send(line).await.unwrap();
        }
        drop(tx);

        let first = batcher.next_batch(&mut rx).await.unwrap();
        assert_eq!(first.batch_id, 0);
        assert_eq!(first.lines.len(), 4);

        // Remaining lines flush as a final partial batch.
        let second = batcher.next_batch(&mut rx).await.unwrap();
        assert_eq!(second.batch_id, 1);
        assert_eq!(second.lines, vec!["line-4", "line-5"]);

        assert!(batcher.next_batch(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_batch_closes_on_window() {
        let mut batcher = MicroBatcher::new(create_test_config(100, 50), 0);
        let (tx, mut rx) = mpsc::channel(16);

        tx.send("only".to_string()).await.unwrap();

        let batch = batcher.next_batch(&mut rx).await.unwrap();
        assert_eq!(batch.lines, vec!["only"]);

        drop(tx);
        assert!(batcher.next_batch(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_batch_ids_resume_from_start() {
        let mut batcher = MicroBatcher::new(create_test_config(1, 100), 7);
        let (tx, mut rx) = mpsc::channel(4);
        tx.send("a".to_string()).await.unwrap();
        tx.send("b".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(batcher.next_batch(&mut rx).await.unwrap().batch_id, 7);
        assert_eq!(batcher.next_batch(&mut rx).await.unwrap().batch_id, 8);
        assert_eq!(batcher.next_batch_id(), 9);
    }

    #[test]
    fn test_partition_covers_all_lines_in_order() {
        let lines = numbered_lines(10);
        let parts = partition(lines.clone(), 3);

        assert!(parts.len() <= 3);
        let flattened: Vec<String> = parts.into_iter().flatten().collect();
        assert_eq!(flattened, lines);
    }

    #[test]
    fn test_partition_fewer_lines_than_partitions() {
        let parts = partition(numbered_lines(2), 8);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.len() == 1));
    }

    #[test]
    fn test_partition_empty() {
        assert!(partition(Vec::new(), 4).is_empty());
    }
}
