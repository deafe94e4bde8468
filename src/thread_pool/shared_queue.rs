use std::panic::{self, AssertUnwindSafe};
use std::thread;

use crossbeam::channel::{self, Receiver, Sender};
use log::{debug, error};

use super::ThreadPool;
use crate::{GradebookError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of workers pulling connection handlers from one queue.
///
/// Bounds the number of connections served at once; further connections
/// wait in the queue until a worker frees up. A panicking handler does
/// not take its worker down.
pub struct SharedQueueThreadPool {
    tx: Sender<Job>,
}

impl ThreadPool for SharedQueueThreadPool {
    fn new(threads: u32) -> Result<Self> {
        if threads == 0 {
            return Err(GradebookError::StringError(
                "shared-queue pool needs at least one thread".to_owned(),
            ));
        }
        let (tx, rx) = channel::unbounded::<Job>();

        for id in 0..threads {
            spawn_worker(id, rx.clone())?;
        }

        Ok(SharedQueueThreadPool { tx })
    }

    fn spawn<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Box::new(job))
            .map_err(|_| GradebookError::StringError("thread pool has no active workers".to_owned()))
    }
}

/// Starts one worker. It runs until every sender is dropped.
fn spawn_worker(id: u32, rx: Receiver<Job>) -> Result<()> {
    thread::Builder::new()
        .name(format!("pool-worker-{id}"))
        .spawn(move || {
            while let Ok(job) = rx.recv() {
                debug!("Worker {id} picked up a connection");
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Worker {id}: connection handler panicked, continuing");
                }
            }
            debug!("Worker {id}: queue closed, shutting down");
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;

    #[test]
    fn zero_threads_is_an_error() {
        assert!(SharedQueueThreadPool::new(0).is_err());
    }

    #[test]
    fn survives_a_panicking_job() {
        let pool = SharedQueueThreadPool::new(1).unwrap();
        pool.spawn(|| panic!("handler blew up")).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.spawn(move || tx.send(42).unwrap()).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
    }
}
