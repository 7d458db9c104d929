//! Background thread pool for loader work (network/decoder simulation).
//!
//! Jobs are plain closures pulled from one shared crossbeam channel. Workers
//! never touch pool state: results go back to the control sequence through
//! `LoadCompletion`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::FeedError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of named worker threads.
///
/// # Example
/// ```ignore
/// let workers = Workers::new(2, "reel-loader")?;
/// workers.execute(move || {
///     std::thread::sleep(latency);
///     completion.ready();
/// });
/// ```
pub struct Workers {
    tx: Option<Sender<Job>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Workers {
    /// Spawn `num_threads` workers named `{name}-{i}` (at least one).
    pub fn new(num_threads: usize, name: &str) -> Result<Self, FeedError> {
        let (tx, rx): (Sender<Job>, Receiver<Job>) = unbounded();
        let mut handles = Vec::new();

        for worker_id in 0..num_threads.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, worker_id))
                .spawn(move || {
                    trace!("Worker {} started", worker_id);
                    // Ends when every sender is gone and the queue is drained
                    for job in rx.iter() {
                        job();
                    }
                    trace!("Worker {} stopped", worker_id);
                })
                .map_err(FeedError::Spawn)?;
            handles.push(handle);
        }

        trace!("Workers initialized: {} threads", handles.len());
        Ok(Self { tx: Some(tx), handles })
    }

    /// Run closure on a worker thread. Silently dropped after shutdown.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Box::new(f));
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        let num_threads = self.handles.len();
        trace!("Workers shutting down ({} threads)...", num_threads);

        // Closing the channel lets workers finish queued jobs and exit
        self.tx.take();

        // Long simulated loads may still be sleeping; don't hang the caller
        let deadline = Instant::now() + Duration::from_millis(500);
        for handle in std::mem::take(&mut self.handles) {
            while !handle.is_finished() {
                if Instant::now() >= deadline {
                    trace!("Shutdown timeout reached, exiting anyway");
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            let _ = handle.join();
        }

        trace!("All {} workers stopped gracefully", num_threads);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_jobs_run_on_named_threads() {
        let workers = Workers::new(2, "test-worker").unwrap();
        assert_eq!(workers.len(), 2);
        let (tx, rx) = bounded(8);
        for i in 0..4 {
            let tx = tx.clone();
            workers.execute(move || {
                let name = thread::current().name().unwrap_or_default().to_string();
                tx.send((i, name)).unwrap();
            });
        }

        let mut seen = Vec::new();
        for _ in 0..4 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert!(name.starts_with("test-worker-"), "{}", name);
            seen.push(i);
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_drop_drains_queue() {
        let (tx, rx) = unbounded();
        {
            let workers = Workers::new(1, "drain").unwrap();
            for i in 0..3 {
                let tx = tx.clone();
                workers.execute(move || {
                    tx.send(i).unwrap();
                });
            }
        }
        let got: Vec<i32> = rx.try_iter().collect();
        assert_eq!(got, vec![0, 1, 2]);
    }
}
