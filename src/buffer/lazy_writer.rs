//! Background lazy writer.
//!
//! Periodically writes a small batch of dirty pages so that victimization
//! rarely has to wait on I/O.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use crate::buffer::Cache;

#[derive(Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

/// Handle to the lazy writer thread. Dropping it stops and joins the thread.
pub struct LazyWriter {
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl LazyWriter {
    /// Start a thread calling [`Cache::flush_some_pages`] every `interval`.
    pub fn spawn(cache: Arc<Cache>, interval: Duration) -> Self {
        let shutdown = Arc::new(Shutdown::default());
        let worker_shutdown = Arc::clone(&shutdown);
        let handle = thread::spawn(move || Self::worker_loop(&cache, &worker_shutdown, interval));

        debug!(target: "pagetree::cache", ?interval, "lazy writer started");
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    fn worker_loop(cache: &Cache, shutdown: &Shutdown, interval: Duration) {
        loop {
            {
                let mut stopped = shutdown.stopped.lock();
                if !*stopped {
                    shutdown.wakeup.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }
            if let Err(e) = cache.flush_some_pages() {
                warn!(target: "pagetree::cache", error = %e, "lazy write failed");
            }
        }
        debug!(target: "pagetree::cache", "lazy writer exit");
    }

    /// Stop the thread and wait for it to finish its current pass.
    pub fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        *self.shutdown.stopped.lock() = true;
        self.shutdown.wakeup.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(target: "pagetree::cache", "lazy writer panicked");
            }
        }
    }
}

impl Drop for LazyWriter {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}
