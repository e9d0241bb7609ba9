//! # Proxy Threading
//!
//! The ingestion queue of the proxy and the pool of threads forwarding its items to StatsD.
//!
//! - **Bounded Queue**: Items wait in a fixed-capacity FIFO channel. A full queue blocks the
//!   producer, or suspends it when using [`WorkerPool::send_async`], so a slow backend slows down
//!   the HTTP handlers instead of growing memory.
//! - **Worker Threads**: A fixed number of OS threads pull items from the queue. Workers are
//!   interchangeable and keep no state, so there is no ordering between items handled by
//!   different workers.
//! - **Panic Recovery**: Panics of single items and of whole threads can be reported to custom
//!   handlers.
//! - **Graceful Shutdown**: [`WorkerPool::close`] rejects new items, the workers drain what is
//!   left and exit, and [`WorkerPool::join`] waits for them.
//!
//! ## Usage Example
//!
//! ```rust
//! use proxy_threading::WorkerPoolBuilder;
//!
//! let pool = WorkerPoolBuilder::new()
//!     .num_threads(4)
//!     .queue_size(1000)
//!     .thread_name(|index| format!("forwarder-{index}"))
//!     .build(|line: String| {
//!         // forward the line
//!         drop(line);
//!     })
//!     .expect("failed to spawn worker threads");
//!
//! pool.send("requests:1|c".to_owned()).unwrap();
//!
//! pool.close();
//! pool.join();
//! ```

mod builder;
mod metrics;
mod pool;

pub use self::builder::*;
pub use self::metrics::*;
pub use self::pool::*;
