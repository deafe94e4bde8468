use crate::Result;

/// Runs connection handlers.
///
/// The server hands every accepted connection to `spawn` and never joins
/// or inspects the job afterwards.
pub trait ThreadPool {
    /// Creates a new pool with the given number of threads.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created (e.g., zero threads
    /// for a pool that needs workers).
    fn new(threads: u32) -> Result<Self>
    where
        Self: Sized;

    /// Hands `job` to the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the job could not be scheduled.
    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static;
}

mod naive;
mod shared_queue;

pub use self::naive::NaiveThreadPool;
pub use self::shared_queue::SharedQueueThreadPool;
