use std::any::Any;
use std::io;
use std::sync::Arc;

use crate::pool::WorkerPool;

/// Type alias for a thread safe closure that is used for panic handling across the code.
pub(crate) type PanicHandler = dyn Fn(Box<dyn Any + Send>) + Send + Sync;

/// [`WorkerPoolBuilder`] provides a flexible way to configure and build a [`WorkerPool`] that
/// drains a bounded queue on dedicated threads.
///
/// This builder enables you to customize the number of threads, the queue capacity, thread naming,
/// and panic handling strategies.
pub struct WorkerPoolBuilder {
    pub(crate) thread_name: Option<Box<dyn FnMut(usize) -> String>>,
    pub(crate) thread_panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) task_panic_handler: Option<Arc<PanicHandler>>,
    pub(crate) num_threads: usize,
    pub(crate) queue_size: usize,
}

impl WorkerPoolBuilder {
    /// Initializes a new [`WorkerPoolBuilder`] with a single thread and a single queue slot.
    pub fn new() -> Self {
        Self {
            thread_name: None,
            thread_panic_handler: None,
            task_panic_handler: None,
            num_threads: 1,
            queue_size: 1,
        }
    }

    /// Specifies a custom naming convention for threads in the [`WorkerPool`].
    ///
    /// The provided closure receives the thread's index and returns a name,
    /// which can be useful for debugging and logging.
    pub fn thread_name<F>(mut self, thread_name: F) -> Self
    where
        F: FnMut(usize) -> String + 'static,
    {
        self.thread_name = Some(Box::new(thread_name));
        self
    }

    /// Sets a custom panic handler for threads in the [`WorkerPool`].
    ///
    /// If a thread panics outside of an item handler, the provided handler will be invoked so that
    /// you can perform custom error handling or cleanup.
    pub fn thread_panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.thread_panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Sets a custom panic handler for items processed by the [`WorkerPool`].
    ///
    /// With a handler, a panicking item is reported and the worker continues with the next item.
    /// Without one, the panic terminates the worker thread.
    pub fn task_panic_handler<F>(mut self, panic_handler: F) -> Self
    where
        F: Fn(Box<dyn Any + Send>) + Send + Sync + 'static,
    {
        self.task_panic_handler = Some(Arc::new(panic_handler));
        self
    }

    /// Sets the number of worker threads for the [`WorkerPool`].
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Sets the capacity of the queue in front of the workers.
    ///
    /// Producers block once this many items are waiting.
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Constructs a [`WorkerPool`] that calls `handler` for every queued item.
    ///
    /// Worker threads record internal metrics into the registry that is current on the calling
    /// thread.
    pub fn build<T, H>(self, handler: H) -> Result<WorkerPool<T>, io::Error>
    where
        T: Send + 'static,
        H: Fn(T) + Send + Sync + 'static,
    {
        WorkerPool::new(self, handler)
    }
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}
