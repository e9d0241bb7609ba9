use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};
use proxy_stats::{StatsRegistry, metric};

use crate::builder::{PanicHandler, WorkerPoolBuilder};
use crate::metrics::WorkerPoolGauges;

/// An error returned when sending into a closed [`WorkerPool`].
///
/// Contains the item that could not be queued.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
#[error("the queue has been closed")]
pub struct QueueClosed<T>(pub T);

/// A bounded FIFO queue drained by a fixed set of worker threads.
///
/// Any number of producers can [`send`](Self::send) items concurrently. Every item is handed to
/// exactly one worker, which calls the handler passed to [`WorkerPoolBuilder::build`]. Workers
/// share no state, so items sent concurrently may be handled in any order.
///
/// Once the queue is full, producers wait for a free slot. After [`close`](Self::close), new items
/// are rejected while the workers keep draining everything that was queued before. Workers exit
/// when the queue is closed and empty, which [`join`](Self::join) waits for.
pub struct WorkerPool<T> {
    tx: RwLock<Option<flume::Sender<T>>>,
    rx: flume::Receiver<T>,
    capacity: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> WorkerPool<T>
where
    T: Send + 'static,
{
    /// Constructs a new [`WorkerPool`] using the configuration specified by [`WorkerPoolBuilder`].
    ///
    /// Spawns all worker threads immediately.
    pub fn new<H>(mut builder: WorkerPoolBuilder, handler: H) -> io::Result<Self>
    where
        H: Fn(T) + Send + Sync + 'static,
    {
        let capacity = builder.queue_size.max(1);
        let (tx, rx) = flume::bounded(capacity);
        let handler: Arc<dyn Fn(T) + Send + Sync> = Arc::new(handler);
        let registry = proxy_stats::current();

        let mut handles = Vec::with_capacity(builder.num_threads);
        for index in 0..builder.num_threads.max(1) {
            let worker = Worker {
                index,
                rx: rx.clone(),
                handler: handler.clone(),
                registry: registry.clone(),
                panic_handler: builder.thread_panic_handler.clone(),
                task_panic_handler: builder.task_panic_handler.clone(),
            };

            let mut thread = std::thread::Builder::new();
            if let Some(name) = builder.thread_name.as_mut().map(|f| f(index)) {
                thread = thread.name(name);
            }
            handles.push(thread.spawn(|| worker.run())?);
        }

        Ok(Self {
            tx: RwLock::new(Some(tx)),
            rx,
            capacity,
            handles: Mutex::new(handles),
        })
    }
}

impl<T> WorkerPool<T> {
    fn sender(&self) -> Option<flume::Sender<T>> {
        self.tx.read().clone()
    }

    /// Queues an item, blocking the current thread while the queue is full.
    pub fn send(&self, item: T) -> Result<(), QueueClosed<T>> {
        let Some(tx) = self.sender() else {
            return Err(QueueClosed(item));
        };

        tx.send(item).map_err(|flume::SendError(item)| QueueClosed(item))
    }

    /// Queues an item, awaiting a free slot while the queue is full.
    pub async fn send_async(&self, item: T) -> Result<(), QueueClosed<T>> {
        let Some(tx) = self.sender() else {
            return Err(QueueClosed(item));
        };

        tx.send_async(item)
            .await
            .map_err(|flume::SendError(item)| QueueClosed(item))
    }

    /// Closes the queue for new items.
    ///
    /// Returns `false` if the queue had already been closed. Producers waiting for a free slot at
    /// the time of closing still complete their send.
    pub fn close(&self) -> bool {
        self.tx.write().take().is_some()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }

    /// Returns the number of items waiting in the queue.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Returns `true` if no items are waiting in the queue.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Returns the maximum number of items that can wait in the queue.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reports the current queue depth to the internal metrics.
    pub fn report_metrics(&self) {
        metric!(gauge(WorkerPoolGauges::QueueDepth) = self.len() as f64);
    }

    /// Blocks until all workers have exited.
    ///
    /// Workers only exit after the queue has been closed and drained, so this must be called after
    /// [`close`](Self::close). Calling it a second time returns immediately.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            // Panics have been reported by the thread panic handler or are re-raised here.
            if let Err(panic) = handle.join() {
                std::panic::resume_unwind(panic);
            }
        }
    }
}

impl<T> std::fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A dedicated thread draining the queue of a [`WorkerPool`].
struct Worker<T> {
    index: usize,
    rx: flume::Receiver<T>,
    handler: Arc<dyn Fn(T) + Send + Sync>,
    registry: Option<Arc<StatsRegistry>>,
    panic_handler: Option<Arc<PanicHandler>>,
    task_panic_handler: Option<Arc<PanicHandler>>,
}

impl<T> Worker<T> {
    /// Runs the worker loop until the queue is closed and drained.
    ///
    /// If there is a panic outside of the item handler, the `panic_handler` will be called.
    fn run(self) {
        proxy_stats::bind(self.registry.clone());
        proxy_log::trace!(worker = self.index, "worker started");

        let Self {
            index,
            rx,
            handler,
            panic_handler,
            task_panic_handler,
            ..
        } = self;

        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
            while let Ok(item) = rx.recv() {
                handle_item(&*handler, item, task_panic_handler.as_deref());
            }
        }));

        match (panic_handler, result) {
            // Panic handler and error, we swallow the panic and invoke the callback.
            (Some(panic_handler), Err(error)) => panic_handler(error),
            // No panic handler and error, we propagate the panic.
            (None, Err(error)) => std::panic::resume_unwind(error),
            (_, Ok(())) => proxy_log::trace!(worker = index, "worker stopped"),
        }
    }
}

fn handle_item<T>(
    handler: &(dyn Fn(T) + Send + Sync),
    item: T,
    panic_handler: Option<&PanicHandler>,
) {
    let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler(item)));

    if let Err(panic) = result {
        match panic_handler {
            Some(panic_handler) => panic_handler(panic),
            None => std::panic::resume_unwind(panic),
        }
    }
}

/// Extracts a printable message from a panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use proxy_stats::CounterMetric;

    use super::*;

    struct Handled;

    impl CounterMetric for Handled {
        fn name(&self) -> &'static str {
            "handled_total"
        }

        fn description(&self) -> &'static str {
            "Items handled in tests."
        }
    }

    #[test]
    fn test_concurrent_producers_no_loss() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let seen = Arc::new(Mutex::new(HashSet::new()));
        let pool = {
            let seen = seen.clone();
            WorkerPoolBuilder::new()
                .num_threads(3)
                .queue_size(8)
                .thread_name(|index| format!("test-worker-{index}"))
                .build(move |item: usize| {
                    assert!(seen.lock().insert(item), "item {item} handled twice");
                })
                .unwrap()
        };
        let pool = Arc::new(pool);

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        pool.send(producer * PER_PRODUCER + i).unwrap();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        assert!(pool.close());
        pool.join();

        assert_eq!(seen.lock().len(), PRODUCERS * PER_PRODUCER);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_send_after_close() {
        let pool = WorkerPoolBuilder::new().build(|_: &str| {}).unwrap();

        assert!(pool.close());
        assert!(!pool.close());
        assert!(pool.is_closed());
        assert_eq!(pool.send("late"), Err(QueueClosed("late")));
        assert_eq!(
            futures::executor::block_on(pool.send_async("later")),
            Err(QueueClosed("later"))
        );

        pool.join();
    }

    #[test]
    fn test_queued_items_drain_after_close() {
        let (release_tx, release_rx) = flume::bounded::<()>(0);
        let handled = Arc::new(AtomicUsize::new(0));

        let pool = {
            let handled = handled.clone();
            WorkerPoolBuilder::new()
                .queue_size(4)
                .build(move |_: u32| {
                    release_rx.recv().ok();
                    handled.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };

        for i in 0..4 {
            pool.send(i).unwrap();
        }
        pool.close();

        for _ in 0..4 {
            release_tx.send(()).unwrap();
        }
        pool.join();

        assert_eq!(handled.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_len_and_capacity() {
        let (started_tx, started_rx) = flume::unbounded();
        let (release_tx, release_rx) = flume::unbounded::<()>();

        let pool = WorkerPoolBuilder::new()
            .queue_size(4)
            .build(move |_: u32| {
                started_tx.send(()).ok();
                release_rx.recv().ok();
            })
            .unwrap();

        pool.send(0).unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.send(1).unwrap();
        pool.send(2).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.capacity(), 4);

        let registry = proxy_stats::with_test_registry(|| pool.report_metrics());
        assert_eq!(registry.gauge_value("metrics_queue_depth", &[]), Some(2.0));

        pool.close();
        for _ in 0..3 {
            release_tx.send(()).unwrap();
        }
        pool.join();
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_task_panic_handling() {
        let panics = Arc::new(Mutex::new(Vec::new()));
        let handled = Arc::new(AtomicUsize::new(0));

        let pool = {
            let panics = panics.clone();
            let handled = handled.clone();
            WorkerPoolBuilder::new()
                .queue_size(4)
                .task_panic_handler(move |panic| {
                    panics.lock().push(panic_message(&*panic).to_owned());
                })
                .build(move |item: u32| {
                    if item == 1 {
                        panic!("item {item} panicked");
                    }
                    handled.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };

        for item in 0..3 {
            pool.send(item).unwrap();
        }
        pool.close();
        pool.join();

        assert_eq!(handled.load(Ordering::SeqCst), 2);
        assert_eq!(*panics.lock(), vec!["item 1 panicked".to_owned()]);
    }

    #[test]
    fn test_workers_inherit_registry() {
        let registry = Arc::new(StatsRegistry::new());
        let guard = proxy_stats::enter(registry.clone());

        let pool = WorkerPoolBuilder::new()
            .num_threads(2)
            .queue_size(2)
            .build(|count: u64| metric!(counter(Handled) += count))
            .unwrap();
        drop(guard);

        for count in [1, 2, 3] {
            pool.send(count).unwrap();
        }
        pool.close();
        pool.join();

        assert_eq!(registry.counter_value("handled_total", &[]), 6);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_send_async_backpressure() {
        let handled = Arc::new(AtomicUsize::new(0));
        let pool = {
            let handled = handled.clone();
            WorkerPoolBuilder::new()
                .num_threads(2)
                .queue_size(1)
                .build(move |_: u32| {
                    std::thread::sleep(Duration::from_millis(1));
                    handled.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
        };

        for item in 0..50 {
            pool.send_async(item).await.unwrap();
        }

        pool.close();
        tokio::task::spawn_blocking(move || pool.join())
            .await
            .unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 50);
    }
}
