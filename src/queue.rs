//! Bounded event queue and the worker pool that drains it.
//!
//! The queue decouples Jetstream arrival rate from processing rate: enqueue
//! never blocks the consumer, it drops on overflow instead. Workers dequeue
//! with a short timeout so shutdown sentinels are observed promptly.

use crate::Event;
use crate::pipeline::{self, PipelineContext};
use crate::stats::PipelineStats;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// How long a worker waits on an empty queue before looping.
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long shutdown waits for each worker to drain.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One queue slot: a real event or the shutdown sentinel.
#[derive(Debug)]
pub enum QueueItem {
    Event(Event),
    Shutdown,
}

/// Fixed-capacity FIFO between the stream consumer and the worker pool.
pub struct EventQueue {
    tx: mpsc::Sender<QueueItem>,
    rx: Mutex<mpsc::Receiver<QueueItem>>,
    stats: Arc<PipelineStats>,
    capacity: usize,
}

impl EventQueue {
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            stats,
            capacity,
        }
    }

    /// Non-blocking enqueue. Returns `false` and counts a drop when full -
    /// the stream consumer must never stall behind slow workers.
    pub fn enqueue(&self, event: Event) -> bool {
        match self.tx.try_send(QueueItem::Event(event)) {
            Ok(()) => {
                self.stats.record_received();
                self.stats.set_queue_depth(self.depth());
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.record_dropped();
                tracing::warn!(capacity = self.capacity, "event queue full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("event queue closed, dropping event");
                false
            }
        }
    }

    /// Dequeue with a timeout. `None` means the timeout elapsed or the
    /// channel closed.
    pub async fn dequeue(&self, timeout: Duration) -> Option<QueueItem> {
        let mut rx = self.rx.lock().await;
        let item = tokio::time::timeout(timeout, rx.recv()).await.ok().flatten();
        drop(rx);
        if item.is_some() {
            self.stats.set_queue_depth(self.depth());
        }
        item
    }

    /// Current number of buffered items.
    pub fn depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Enqueue one shutdown sentinel per worker. Best effort: a full queue
    /// still shuts down via the closed-channel path once senders drop.
    pub fn signal_shutdown(&self, workers: usize) {
        for _ in 0..workers {
            if self.tx.try_send(QueueItem::Shutdown).is_err() {
                tracing::warn!("could not enqueue shutdown sentinel (queue full or closed)");
            }
        }
    }
}

/// Fixed pool of workers running the reply pipeline.
pub struct WorkerPool {
    handles: Vec<tokio::task::JoinHandle<()>>,
}

/// Worker count: modest parallelism tied to the host, clamped to sane bounds.
pub fn pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores + 2).min(8).clamp(2, 32)
}

impl WorkerPool {
    /// Spawn `workers` tasks draining the queue until each sees a sentinel.
    pub fn spawn(ctx: Arc<PipelineContext>, queue: Arc<EventQueue>, workers: usize) -> Self {
        let handles = (0..workers)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, ctx, queue).await;
                })
            })
            .collect();

        tracing::info!(workers, "worker pool started");
        Self { handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal shutdown and wait (bounded) for every worker to drain.
    pub async fn shutdown(self, queue: &EventQueue) {
        queue.signal_shutdown(self.handles.len());
        for (worker_id, handle) in self.handles.into_iter().enumerate() {
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!(worker_id, "worker did not drain before the join timeout");
            }
        }
        tracing::info!("worker pool shut down");
    }
}

async fn worker_loop(worker_id: usize, ctx: Arc<PipelineContext>, queue: Arc<EventQueue>) {
    tracing::debug!(worker_id, "worker started");

    loop {
        match queue.dequeue(DEQUEUE_TIMEOUT).await {
            Some(QueueItem::Shutdown) => {
                tracing::debug!(worker_id, "worker received shutdown sentinel");
                break;
            }
            Some(QueueItem::Event(event)) => {
                let uri = event.uri();
                // Pipeline failures are contained here: one bad event must
                // never take a worker down with it.
                match pipeline::process_event(&ctx, event).await {
                    Ok(outcome) => {
                        ctx.stats.record_processed();
                        tracing::debug!(worker_id, uri = %uri, ?outcome, "event processed");
                    }
                    Err(error) => {
                        ctx.stats.record_error();
                        tracing::error!(worker_id, uri = %uri, %error, "event processing failed");
                    }
                }
            }
            None => {
                // Timeout with nothing buffered; loop to stay responsive to
                // sentinels.
                continue;
            }
        }
    }

    tracing::debug!(worker_id, "worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsky::types::PostRecord;

    fn event(n: usize) -> Event {
        Event {
            did: "did:plc:somebody".into(),
            collection: "app.bsky.feed.post".into(),
            rkey: format!("rkey{n}"),
            record: PostRecord::default(),
        }
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_roundtrip() {
        let stats = Arc::new(PipelineStats::default());
        let queue = EventQueue::new(4, stats.clone());

        assert!(queue.enqueue(event(1)));
        let item = queue.dequeue(Duration::from_millis(50)).await;
        assert!(matches!(item, Some(QueueItem::Event(_))));
        assert_eq!(stats.snapshot().received, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_panicking() {
        let stats = Arc::new(PipelineStats::default());
        let queue = EventQueue::new(2, stats.clone());

        assert!(queue.enqueue(event(1)));
        assert!(queue.enqueue(event(2)));

        // One more than capacity: rejected, counted, no error raised.
        assert!(!queue.enqueue(event(3)));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.dropped, 1);
    }

    #[tokio::test]
    async fn test_dequeue_times_out_on_empty_queue() {
        let stats = Arc::new(PipelineStats::default());
        let queue = EventQueue::new(2, stats);
        assert!(queue.dequeue(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let stats = Arc::new(PipelineStats::default());
        let queue = EventQueue::new(8, stats);

        for n in 0..3 {
            queue.enqueue(event(n));
        }
        for n in 0..3 {
            let Some(QueueItem::Event(dequeued)) = queue.dequeue(Duration::from_millis(50)).await
            else {
                panic!("expected an event");
            };
            assert_eq!(dequeued.rkey, format!("rkey{n}"));
        }
    }

    #[test]
    fn test_pool_size_bounds() {
        let size = pool_size();
        assert!((2..=8).contains(&size));
    }
}
