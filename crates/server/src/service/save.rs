//! Coalescing background saves.
//!
//! The service thread hands finished snapshots to `enqueue`, which never
//! blocks on I/O: it parks the job in a single pending slot and wakes the
//! worker only if no write is in flight. A job that arrives during a write
//! is folded into whatever is already pending, so a burst of requests turns
//! into at most one extra write.
//!
//! The slot is a mutex-guarded `Option` rather than an atomic pointer: a
//! `SaveJob` is folded into the one already there, which needs the old value
//! in hand. The only compare-and-swap is on `in_flight`, which elects the
//! single caller that wakes the worker. The slot lock is held just long
//! enough to fold or take a job.
//!
//! Every storage call happens under the storage lock, and jobs are taken out
//! of the slot while holding it. That keeps writes in request order even
//! when a blocking `save_now` races the worker.

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{Context, Result};

use crate::metrics::{SaveMetrics, WriteKind};
use crate::persistence::{self, DeletedPlots, PlotSnapshot, PlotStorage};

/// One unit of work for the storage backend.
#[derive(Debug, Clone)]
pub enum SaveJob {
    /// Everything, replacing what storage holds.
    Full(PlotSnapshot),
    /// Only plots written or removed since the previous job.
    Incremental {
        dirty: PlotSnapshot,
        deleted: DeletedPlots,
    },
}

impl SaveJob {
    /// Fold a newer job on top of this one without losing either's changes.
    pub fn absorb(self, newer: SaveJob) -> SaveJob {
        match (self, newer) {
            (_, full @ SaveJob::Full(_)) => full,
            (SaveJob::Full(mut worlds), SaveJob::Incremental { dirty, deleted }) => {
                for (world, ids) in deleted {
                    if let Some(plots) = worlds.get_mut(&world) {
                        for id in ids {
                            plots.remove(&id);
                        }
                    }
                }
                for (world, plots) in dirty {
                    worlds.entry(world).or_default().extend(plots);
                }
                SaveJob::Full(worlds)
            }
            (
                SaveJob::Incremental {
                    dirty: mut older_dirty,
                    deleted: mut older_deleted,
                },
                SaveJob::Incremental { dirty, deleted },
            ) => {
                for (world, ids) in deleted {
                    if let Some(plots) = older_dirty.get_mut(&world) {
                        for id in &ids {
                            plots.remove(id);
                        }
                    }
                    older_deleted.entry(world).or_default().extend(ids);
                }
                for (world, plots) in dirty {
                    if let Some(ids) = older_deleted.get_mut(&world) {
                        for id in plots.keys() {
                            ids.remove(id);
                        }
                    }
                    older_dirty.entry(world).or_default().extend(plots);
                }
                SaveJob::Incremental {
                    dirty: older_dirty,
                    deleted: older_deleted,
                }
            }
        }
    }

    fn kind(&self) -> WriteKind {
        match self {
            SaveJob::Full(_) => WriteKind::Full,
            SaveJob::Incremental { .. } => WriteKind::Incremental,
        }
    }

    /// Plots this job writes.
    pub fn plot_count(&self) -> usize {
        match self {
            SaveJob::Full(worlds) => persistence::plot_count(worlds),
            SaveJob::Incremental { dirty, .. } => persistence::plot_count(dirty),
        }
    }
}

struct Shared {
    storage: Mutex<Box<dyn PlotStorage>>,
    pending: Mutex<Option<SaveJob>>,
    in_flight: AtomicBool,
    /// Set after a failed write; the next snapshot must be a full one.
    retry_full: AtomicBool,
    incremental: bool,
    metrics: Arc<SaveMetrics>,
}

impl Shared {
    fn take_pending(&self) -> Option<SaveJob> {
        self.pending.lock().expect("save slot poisoned").take()
    }

    fn write(&self, storage: &mut dyn PlotStorage, job: &SaveJob) -> Result<()> {
        let start = Instant::now();
        let result = match job {
            SaveJob::Full(worlds) => storage.save(worlds),
            SaveJob::Incremental { dirty, deleted } => storage.save_incremental(dirty, deleted),
        };
        match &result {
            Ok(()) => {
                self.metrics
                    .record_write(job.kind(), job.plot_count(), start.elapsed());
            }
            Err(_) => {
                self.retry_full.store(true, SeqCst);
                self.metrics.record_failure();
            }
        }
        result.with_context(|| format!("saving plots to {} storage", storage.name()))
    }

    /// Write pending jobs until the slot stays empty.
    fn drain(&self) {
        loop {
            loop {
                let mut storage = self.storage.lock().expect("plot storage poisoned");
                let Some(job) = self.take_pending() else {
                    break;
                };
                if let Err(e) = self.write(storage.as_mut(), &job) {
                    tracing::error!("Background plot save failed: {:#}", e);
                }
            }
            self.in_flight.store(false, SeqCst);
            // A job may have landed between the last take and clearing the
            // flag. Whoever wins the flag writes it.
            let landed = self.pending.lock().expect("save slot poisoned").is_some();
            if !landed || self.in_flight.compare_exchange(false, true, SeqCst, SeqCst).is_err() {
                break;
            }
        }
    }
}

pub struct SavePipeline {
    shared: Arc<Shared>,
    wake: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SavePipeline {
    pub fn new(storage: Box<dyn PlotStorage>, metrics: Arc<SaveMetrics>) -> Result<Self> {
        let incremental = storage.supports_incremental_save();
        let shared = Arc::new(Shared {
            storage: Mutex::new(storage),
            pending: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            retry_full: AtomicBool::new(false),
            incremental,
            metrics,
        });
        let (wake_tx, wake_rx) = mpsc::channel();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("plot-save".into())
            .spawn(move || run_worker(worker_shared, wake_rx))
            .context("spawning plot save worker")?;
        Ok(Self {
            shared,
            wake: Mutex::new(Some(wake_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn supports_incremental(&self) -> bool {
        self.shared.incremental
    }

    /// Consume the retry flag left by a failed write.
    pub fn take_full_retry(&self) -> bool {
        self.shared.retry_full.swap(false, SeqCst)
    }

    pub fn load(&self) -> Result<PlotSnapshot> {
        let mut storage = self.shared.storage.lock().expect("plot storage poisoned");
        storage.load()
    }

    /// Hand a job to the worker. Never blocks on storage.
    pub fn enqueue(&self, job: SaveJob) {
        {
            let mut pending = self.shared.pending.lock().expect("save slot poisoned");
            let next = match pending.take() {
                Some(older) => {
                    self.shared.metrics.record_coalesced();
                    older.absorb(job)
                }
                None => job,
            };
            *pending = Some(next);
        }
        if self
            .shared
            .in_flight
            .compare_exchange(false, true, SeqCst, SeqCst)
            .is_ok()
        {
            let sent = self
                .wake
                .lock()
                .expect("save wake poisoned")
                .as_ref()
                .is_some_and(|wake| wake.send(()).is_ok());
            if !sent {
                // Worker is gone; write here rather than lose the job.
                self.shared.drain();
            }
        }
    }

    /// Write `job`, together with anything still pending, on the calling
    /// thread. Returns whether anything was written.
    pub fn save_now(&self, job: Option<SaveJob>) -> Result<bool> {
        let mut storage = self.shared.storage.lock().expect("plot storage poisoned");
        let combined = match (self.shared.take_pending(), job) {
            (Some(older), Some(newer)) => older.absorb(newer),
            (Some(job), None) | (None, Some(job)) => job,
            (None, None) => return Ok(false),
        };
        self.shared.write(storage.as_mut(), &combined)?;
        Ok(true)
    }

    /// Stop the worker after it has written everything pending.
    pub fn shutdown(&self) {
        drop(self.wake.lock().expect("save wake poisoned").take());
        let worker = self.worker.lock().expect("save worker poisoned").take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                tracing::error!("Plot save worker panicked");
            }
        }
    }
}

impl Drop for SavePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: Arc<Shared>, wake: Receiver<()>) {
    while wake.recv().is_ok() {
        shared.drain();
    }
    // Channel closed: flush whatever is left before exiting.
    shared.drain();
    tracing::debug!("Plot save worker stopped");
}
