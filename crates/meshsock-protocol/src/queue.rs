//! A single-owner, bounded FIFO-with-priority queue that batches outbound
//! sends, draining and yielding periodically so it cannot starve the I/O
//! loop it shares a runtime with.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;

/// Default batch size drained per worker tick.
pub const DEFAULT_BATCH_SIZE: usize = 100;
/// Default delay between worker ticks.
pub const DEFAULT_PROCESS_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for a [`MessageQueue`] and its worker.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Maximum number of items the queue holds before load-shedding.
    pub max_size: usize,
    /// Number of items drained per worker tick.
    pub batch_size: usize,
    /// Delay between worker ticks.
    pub process_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            batch_size: DEFAULT_BATCH_SIZE,
            process_interval: DEFAULT_PROCESS_INTERVAL,
        }
    }
}

struct QueueItem<T> {
    payload: T,
    priority: i32,
}

/// A bounded FIFO with optional priority (lower sorts earlier).
///
/// When full, enqueuing drops the oldest item (load-shedding) rather than
/// rejecting the new one or blocking.
pub struct MessageQueue<T> {
    items: VecDeque<QueueItem<T>>,
    max_size: usize,
}

impl<T> MessageQueue<T> {
    /// Create an empty queue with the given capacity.
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size: max_size.max(1),
        }
    }

    /// Enqueue `payload`. Returns `true` if an existing item was dropped
    /// from the head to make room.
    pub fn enqueue(&mut self, payload: T, priority: Option<i32>) -> bool {
        let dropped = if self.items.len() >= self.max_size {
            self.items.pop_front();
            true
        } else {
            false
        };
        self.items.push_back(QueueItem {
            payload,
            priority: priority.unwrap_or(0),
        });
        dropped
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drain up to `batch_size` items from the front of the queue.
    ///
    /// Items are sorted by priority only when at least two distinct
    /// priorities are present in the batch; otherwise FIFO order is
    /// preserved exactly (a stable sort over a single priority value
    /// would be a no-op anyway, but skipping it avoids the cost on the
    /// common case of an unprioritized queue).
    pub fn drain_batch(&mut self, batch_size: usize) -> Vec<T> {
        let n = batch_size.min(self.items.len());
        let mut batch: Vec<QueueItem<T>> = self.items.drain(..n).collect();

        let distinct: HashSet<i32> = batch.iter().map(|item| item.priority).collect();
        if distinct.len() >= 2 {
            batch.sort_by_key(|item| item.priority);
        }

        batch.into_iter().map(|item| item.payload).collect()
    }
}

/// Command accepted by a running [`MessageQueueWorker`].
enum Command<T> {
    Enqueue { payload: T, priority: Option<i32> },
    Shutdown,
}

/// Cloneable handle for enqueuing work on a [`MessageQueueWorker`].
#[derive(Clone)]
pub struct QueueHandle<T> {
    cmd_tx: mpsc::Sender<Command<T>>,
}

impl<T: Send + 'static> QueueHandle<T> {
    /// Enqueue `payload`. Errors only if the worker has shut down.
    pub async fn enqueue(&self, payload: T, priority: Option<i32>) -> Result<(), T> {
        self.cmd_tx
            .send(Command::Enqueue { payload, priority })
            .await
            .map_err(|e| match e.0 {
                Command::Enqueue { payload, .. } => payload,
                Command::Shutdown => unreachable!(),
            })
    }

    /// Ask the worker to stop after draining its current contents.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

/// Drives a [`MessageQueue`]: accepts enqueue commands and, on a fixed
/// tick, drains a batch and hands each item to the caller-supplied send
/// function. Send failures invoke `on_error` and are otherwise non-fatal.
pub struct MessageQueueWorker<T> {
    queue: MessageQueue<T>,
    cmd_rx: mpsc::Receiver<Command<T>>,
    batch_size: usize,
    process_interval: Duration,
}

impl<T: Send + 'static> MessageQueueWorker<T> {
    /// Create a worker and its handle.
    pub fn new(config: QueueConfig) -> (Self, QueueHandle<T>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(1024);
        let worker = Self {
            queue: MessageQueue::new(config.max_size),
            cmd_rx,
            batch_size: config.batch_size,
            process_interval: config.process_interval,
        };
        (worker, QueueHandle { cmd_tx })
    }

    /// Run until [`QueueHandle::shutdown`] is called or every handle is
    /// dropped, driving `send` on each batch drained every tick.
    pub async fn run<F, Fut>(mut self, mut send: F, mut on_error: impl FnMut(&str))
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let mut ticker = interval(self.process_interval);
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Enqueue { payload, priority }) => {
                            self.queue.enqueue(payload, priority);
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }
                _ = ticker.tick() => {
                    let batch = self.queue.drain_batch(self.batch_size);
                    for item in batch {
                        if let Err(e) = send(item).await {
                            on_error(&e);
                        }
                    }
                }
            }
        }

        // Drain whatever remains before exiting.
        loop {
            let batch = self.queue.drain_batch(self.batch_size);
            if batch.is_empty() {
                break;
            }
            for item in batch {
                if let Err(e) = send(item).await {
                    on_error(&e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn enqueue_and_drain_preserves_fifo_without_priorities() {
        let mut q = MessageQueue::new(10);
        q.enqueue(1, None);
        q.enqueue(2, None);
        q.enqueue(3, None);
        assert_eq!(q.drain_batch(10), vec![1, 2, 3]);
    }

    #[test]
    fn load_sheds_oldest_when_full() {
        let mut q = MessageQueue::new(2);
        q.enqueue(1, None);
        let dropped = q.enqueue(2, None);
        assert!(!dropped);
        let dropped = q.enqueue(3, None);
        assert!(dropped);
        assert_eq!(q.drain_batch(10), vec![2, 3]);
    }

    #[test]
    fn sorts_by_priority_only_with_distinct_priorities() {
        let mut q = MessageQueue::new(10);
        q.enqueue("low-a", Some(5));
        q.enqueue("high", Some(0));
        q.enqueue("low-b", Some(5));
        assert_eq!(q.drain_batch(10), vec!["high", "low-a", "low-b"]);
    }

    #[test]
    fn preserves_fifo_when_all_priorities_equal() {
        let mut q = MessageQueue::new(10);
        q.enqueue("a", Some(3));
        q.enqueue("b", Some(3));
        q.enqueue("c", Some(3));
        assert_eq!(q.drain_batch(10), vec!["a", "b", "c"]);
    }

    #[test]
    fn drain_batch_respects_size_cap() {
        let mut q = MessageQueue::new(10);
        for i in 0..5 {
            q.enqueue(i, None);
        }
        assert_eq!(q.drain_batch(3), vec![0, 1, 2]);
        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn worker_delivers_enqueued_items() {
        let (worker, handle) = MessageQueueWorker::new(QueueConfig {
            max_size: 100,
            batch_size: 10,
            process_interval: Duration::from_millis(5),
        });

        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        let task = tokio::spawn(worker.run(
            move |_item: i32| {
                let delivered = delivered_clone.clone();
                async move {
                    delivered.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            |_err| {},
        ));

        handle.enqueue(1, None).await.unwrap();
        handle.enqueue(2, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
        task.await.unwrap();

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn worker_invokes_on_error_without_stopping() {
        let (worker, handle) = MessageQueueWorker::new(QueueConfig {
            max_size: 100,
            batch_size: 10,
            process_interval: Duration::from_millis(5),
        });

        let errors = Arc::new(AtomicUsize::new(0));
        let errors_clone = errors.clone();
        let delivered = Arc::new(AtomicUsize::new(0));
        let delivered_clone = delivered.clone();
        let task = tokio::spawn(worker.run(
            move |item: i32| {
                let delivered = delivered_clone.clone();
                async move {
                    if item == 2 {
                        Err("boom".to_string())
                    } else {
                        delivered.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }
            },
            move |_err| {
                errors_clone.fetch_add(1, Ordering::SeqCst);
            },
        ));

        handle.enqueue(1, None).await.unwrap();
        handle.enqueue(2, None).await.unwrap();
        handle.enqueue(3, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.shutdown().await;
        task.await.unwrap();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(delivered.load(Ordering::SeqCst), 2);
    }
}
