use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use super::ThreadPool;
use crate::{GradebookError, Result};

/// One detached OS thread per job.
///
/// This is the server's default: every connection gets its own thread,
/// which exits when the client disconnects. Threads are never joined.
pub struct NaiveThreadPool {
    spawned: AtomicU64,
}

impl ThreadPool for NaiveThreadPool {
    fn new(_threads: u32) -> Result<Self> {
        Ok(NaiveThreadPool {
            spawned: AtomicU64::new(0),
        })
    }

    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.spawned.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("conn-{id}"))
            .spawn(job)
            .map(drop)
            .map_err(|e| GradebookError::StringError(format!("failed to spawn handler: {e}")))
    }
}
