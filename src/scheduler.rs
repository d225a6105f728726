//! Background threads.
//!
//! - The compactor flushes sealed memtables and runs compaction tasks. It
//!   wakes on a [`Signal`] or every `compaction_check_delay`.
//! - The sweeper evicts the block cache down to capacity every
//!   `cache_check_delay`, and every `segments_open_check_delay` closes the
//!   least recently used segment handles and reclaims superseded segments.
//!
//! Both threads exit when the scheduler's shutdown channel is dropped.

use crate::db::Core;
use crate::error::{Error, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam::select;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Work requests sent to the compactor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    /// A memtable was sealed or a function was registered. Every run ends
    /// with a compaction pass.
    Flush,
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    /// Disconnects when the thread exits.
    exited: Receiver<()>,
}

/// Owns the background threads of one database.
pub(crate) struct Scheduler {
    shutdown: Option<Sender<()>>,
    workers: Vec<Worker>,
}

impl Scheduler {
    pub(crate) fn start(core: Arc<Core>, signals: Receiver<Signal>) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);
        let mut scheduler = Scheduler { shutdown: Some(shutdown_tx), workers: Vec::with_capacity(2) };

        let compactor = {
            let core = Arc::clone(&core);
            let shutdown = shutdown_rx.clone();
            spawn("swaykv-compactor", move || compactor_loop(&core, &signals, &shutdown))?
        };
        scheduler.workers.push(compactor);

        let sweeper = spawn("swaykv-sweeper", move || sweeper_loop(&core, &shutdown_rx))?;
        scheduler.workers.push(sweeper);

        Ok(scheduler)
    }

    /// Stops every thread, waiting up to `timeout` for each.
    pub(crate) fn shutdown(&mut self, timeout: Duration) {
        drop(self.shutdown.take());

        for worker in self.workers.drain(..) {
            match worker.exited.recv_timeout(timeout) {
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("{} did not stop within {:?}, detaching it", worker.name, timeout);
                }
                _ => {
                    if worker.handle.join().is_err() {
                        log::error!("{} panicked", worker.name);
                    }
                }
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown(Duration::from_secs(1));
        }
    }
}

fn spawn<F>(name: &'static str, body: F) -> Result<Worker>
where
    F: FnOnce() + Send + 'static,
{
    let (exited_tx, exited) = channel::bounded::<()>(0);
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let _exited = exited_tx;
            body();
        })
        .map_err(Error::Io)?;
    log::debug!("Started {}", name);
    Ok(Worker { name, handle, exited })
}

fn compactor_loop(core: &Core, signals: &Receiver<Signal>, shutdown: &Receiver<()>) {
    let idle = core.options().compaction_check_delay;
    loop {
        select! {
            recv(signals) -> signal => {
                if signal.is_err() {
                    break;
                }
            }
            recv(shutdown) -> _ => break,
            default(idle) => {}
        }
        // Coalesce queued signals into this run.
        while signals.try_recv().is_ok() {}
        // Closing flushes Level Zero itself.
        if core.check_open().is_err() {
            break;
        }

        if let Err(e) = core.run_jobs() {
            match e {
                Error::FunctionNotFound(_) => log::warn!("Background job postponed: {}", e),
                _ => log::error!("Background job failed: {}", e),
            }
        }
    }
    log::debug!("Compactor stopped");
}

fn sweeper_loop(core: &Core, shutdown: &Receiver<()>) {
    let cache_tick = channel::tick(core.options().cache_check_delay);
    let segments_tick = channel::tick(core.options().segments_open_check_delay);
    loop {
        select! {
            recv(cache_tick) -> _ => {
                let evicted = core.cache().sweep();
                if evicted > 0 {
                    log::debug!("Evicted {} cached blocks", evicted);
                }
            }
            recv(segments_tick) -> _ => core.sweep_segments(),
            recv(shutdown) -> _ => break,
        }
    }
    log::debug!("Sweeper stopped");
}
