//! The plot service: one thread owns all plot state.
//!
//! Callers never touch `PlotState` directly. They send a closure down a FIFO
//! queue and get a `Reply` back, which can be `.await`ed from async code or
//! `.wait()`ed from a plain thread. Fire-and-forget work goes through
//! `submit`. Because only the service thread mutates plots, operations need
//! no locks and always observe each other in queue order.
//!
//! The state sits in a thread-local on the service thread and is borrowed
//! for one operation at a time. Any call made on that thread runs inline
//! and its reply is already complete, so service code can use the same API
//! as everyone else. The one thing that cannot nest is a state operation
//! inside a `with_state` closure, which already holds the borrow; that is
//! answered with `ServiceError::Reentrant`.

pub mod owner_index;
pub mod results;
pub mod save;
pub mod state;

use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use plotgrid_engine::plot::{MergeDirection, Plot, PlotBounds, PlotFlag, PlotId};
use plotgrid_engine::world::grid::GridConfig;

use crate::metrics::{MetricsSnapshot, SaveMetrics};
use crate::persistence::PlotStorage;
use owner_index::{OwnerIndex, PlotLocation};
use results::{ClaimResult, MergeResult, OwnerActionResult, ServiceError, UnmergeResult};
use save::SavePipeline;
use state::PlotState;

/// Queued work. Called with `true` to run, or `false` when the service
/// stopped before reaching it.
type Task = Box<dyn FnOnce(bool) + Send>;

thread_local! {
    /// Plot state, present only on a running service thread.
    static STATE: RefCell<Option<PlotState>> = const { RefCell::new(None) };
}

/// Borrow the state of the service thread this runs on for one operation.
fn with_local_state<T>(f: impl FnOnce(&mut PlotState) -> T) -> Result<T, ServiceError> {
    STATE.with(|cell| {
        let mut slot = cell.try_borrow_mut().map_err(|_| ServiceError::Reentrant)?;
        let state = slot.as_mut().ok_or(ServiceError::Stopped)?;
        Ok(f(state))
    })
}

fn local_state_is_free() -> bool {
    STATE.with(|cell| cell.try_borrow_mut().is_ok())
}

/// Wrap `f` so its result, or `Stopped` if it never runs, goes to a reply.
fn reply_task<T, F>(f: F) -> (Task, Reply<T>)
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let task: Task = Box::new(move |live| {
        let _ = tx.send(if live { f() } else { Err(ServiceError::Stopped) });
    });
    (task, Reply::waiting(rx))
}

enum Command {
    Run(Task),
    /// Sentinel: everything queued before it still runs.
    Shutdown,
}

/// Answer to a service call.
///
/// Dropping a `Reply` does not cancel the task; it still runs, and the
/// result is discarded.
pub struct Reply<T> {
    state: ReplyState<T>,
}

enum ReplyState<T> {
    Waiting(oneshot::Receiver<Result<T, ServiceError>>),
    Ready(Option<Result<T, ServiceError>>),
}

// The value is never pinned in place.
impl<T> Unpin for Reply<T> {}

impl<T> Reply<T> {
    fn waiting(rx: oneshot::Receiver<Result<T, ServiceError>>) -> Self {
        Self { state: ReplyState::Waiting(rx) }
    }

    fn ready(result: Result<T, ServiceError>) -> Self {
        Self { state: ReplyState::Ready(Some(result)) }
    }

    fn failed(error: ServiceError) -> Self {
        Self::ready(Err(error))
    }

    /// Block the current thread until the service answers.
    ///
    /// Must not be called from inside an async runtime; `.await` the reply
    /// there instead.
    pub fn wait(self) -> Result<T, ServiceError> {
        match self.state {
            ReplyState::Waiting(rx) => rx.blocking_recv().unwrap_or(Err(ServiceError::Dropped)),
            ReplyState::Ready(result) => result.unwrap_or(Err(ServiceError::Dropped)),
        }
    }
}

impl<T> Future for Reply<T> {
    type Output = Result<T, ServiceError>;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            ReplyState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(ServiceError::Dropped))),
            ReplyState::Ready(result) => Poll::Ready(result.take().unwrap_or(Err(ServiceError::Dropped))),
        }
    }
}

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    running: AtomicBool,
    thread_id: ThreadId,
    thread: Mutex<Option<JoinHandle<()>>>,
    homes: OwnerIndex,
    saves: Arc<SavePipeline>,
    metrics: Arc<SaveMetrics>,
}

/// Handle to the plot service. Cheap to clone; all clones talk to the same
/// service thread.
#[derive(Clone)]
pub struct PlotService {
    inner: Arc<Inner>,
}

impl PlotService {
    /// Load every plot from `storage` on the calling thread, then start the
    /// service thread. `worlds` lists the configured worlds in order.
    pub fn start(worlds: IndexMap<String, GridConfig>, storage: Box<dyn PlotStorage>) -> Result<Self> {
        let metrics = Arc::new(SaveMetrics::new());
        let storage_name = storage.name();
        let saves = Arc::new(SavePipeline::new(storage, Arc::clone(&metrics))?);
        let homes = OwnerIndex::new();
        let mut state = PlotState::new(worlds, homes.clone());

        let start = Instant::now();
        match saves.load() {
            Ok(stored) => {
                let loaded = state.load(stored);
                tracing::info!(
                    "Loaded {} plots from {} storage, {} owners indexed ({:.2?})",
                    loaded,
                    storage_name,
                    homes.len(),
                    start.elapsed()
                );
            }
            Err(e) => tracing::error!("Failed to load plots, starting empty: {:#}", e),
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = thread::Builder::new()
            .name("plot-service".into())
            .spawn(move || run_loop(state, rx))
            .context("spawning plot service thread")?;
        let thread_id = handle.thread().id();

        Ok(Self {
            inner: Arc::new(Inner {
                commands: tx,
                running: AtomicBool::new(true),
                thread_id,
                thread: Mutex::new(Some(handle)),
                homes,
                saves,
                metrics,
            }),
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(SeqCst)
    }

    pub fn is_service_thread(&self) -> bool {
        thread::current().id() == self.inner.thread_id
    }

    /// Run `f` on the service thread and reply with its result. On the
    /// service thread itself `f` runs right away, and service calls made
    /// inside it run inline too.
    pub fn call<T, F>(&self, f: F) -> Reply<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if !self.is_running() {
            return Reply::failed(ServiceError::Stopped);
        }
        if self.is_service_thread() {
            return Reply::ready(Ok(f()));
        }
        let (task, reply) = reply_task(move || Ok(f()));
        self.enqueue(task, reply)
    }

    /// Run `f` against the plot state and reply with its result. The state
    /// is borrowed for the duration of `f`, so state operations inside it
    /// get `ServiceError::Reentrant`; work on the `&mut PlotState` instead.
    pub fn with_state<T, F>(&self, f: F) -> Reply<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PlotState) -> T + Send + 'static,
    {
        if !self.is_running() {
            return Reply::failed(ServiceError::Stopped);
        }
        if self.is_service_thread() {
            return Reply::ready(with_local_state(f));
        }
        let (task, reply) = reply_task(move || with_local_state(f));
        self.enqueue(task, reply)
    }

    /// Queue `f` without waiting. Dropped silently once the service stopped.
    ///
    /// On the service thread `f` runs immediately, unless the state is held
    /// by an enclosing `with_state` closure; then it runs after that task.
    pub fn submit<F>(&self, f: F)
    where
        F: FnOnce(&mut PlotState) + Send + 'static,
    {
        if !self.is_running() {
            return;
        }
        if self.is_service_thread() && local_state_is_free() {
            let _ = with_local_state(f);
            return;
        }
        let task: Task = Box::new(move |live| {
            if live {
                let _ = with_local_state(f);
            }
        });
        let _ = self.inner.commands.send(Command::Run(task));
    }

    fn enqueue<T>(&self, task: Task, reply: Reply<T>) -> Reply<T> {
        if !self.is_running() || self.inner.commands.send(Command::Run(task)).is_err() {
            return Reply::failed(ServiceError::Stopped);
        }
        reply
    }

    // ── Mutations ───────────────────────────────────────────────────────

    /// `max_plots` of 0 means no limit.
    pub fn claim(
        &self,
        world: &str,
        id: PlotId,
        owner: Uuid,
        owner_name: Option<String>,
        max_plots: usize,
    ) -> Reply<ClaimResult> {
        let world = world.to_string();
        self.with_state(move |s| s.claim(&world, id, owner, owner_name, max_plots))
    }

    pub fn delete(&self, world: &str, id: PlotId, requester: Uuid, bypass_owner: bool) -> Reply<OwnerActionResult> {
        let world = world.to_string();
        self.with_state(move |s| s.delete(&world, id, requester, bypass_owner))
    }

    pub fn set_owner(
        &self,
        world: &str,
        id: PlotId,
        requester: Uuid,
        bypass_owner: bool,
        new_owner: Uuid,
        new_owner_name: Option<String>,
    ) -> Reply<OwnerActionResult> {
        let world = world.to_string();
        self.with_state(move |s| s.set_owner(&world, id, requester, bypass_owner, new_owner, new_owner_name))
    }

    pub fn set_home(&self, owner: Uuid, world: &str, id: PlotId) -> Reply<OwnerActionResult> {
        let world = world.to_string();
        self.with_state(move |s| s.set_home(owner, &world, id))
    }

    pub fn merge(
        &self,
        world: &str,
        id: PlotId,
        direction: MergeDirection,
        requester: Uuid,
        bypass_owner: bool,
    ) -> Reply<MergeResult> {
        let world = world.to_string();
        self.with_state(move |s| s.merge(&world, id, direction, requester, bypass_owner))
    }

    pub fn unmerge(
        &self,
        world: &str,
        id: PlotId,
        direction: MergeDirection,
        requester: Uuid,
        bypass_owner: bool,
    ) -> Reply<UnmergeResult> {
        let world = world.to_string();
        self.with_state(move |s| s.unmerge(&world, id, direction, requester, bypass_owner))
    }

    /// Apply `updater` to each plot of the merge group owned by the same
    /// owner as `id`.
    pub fn update_merge_group<F>(
        &self,
        world: &str,
        id: PlotId,
        requester: Uuid,
        bypass_owner: bool,
        updater: F,
    ) -> Reply<OwnerActionResult>
    where
        F: FnMut(Plot) -> Plot + Send + 'static,
    {
        let world = world.to_string();
        self.with_state(move |s| s.update_merge_group(&world, id, requester, bypass_owner, updater))
    }

    /// Set a flag across the group. `None` restores the default.
    pub fn set_flag(
        &self,
        world: &str,
        id: PlotId,
        requester: Uuid,
        bypass_owner: bool,
        flag: PlotFlag,
        value: Option<bool>,
    ) -> Reply<OwnerActionResult> {
        self.update_merge_group(world, id, requester, bypass_owner, move |p| match value {
            Some(value) => p.with_flag(flag, value),
            None => p.without_flag(flag.key()),
        })
    }

    /// Set an arbitrary flag key across the group. `None` removes it.
    pub fn set_flag_raw(
        &self,
        world: &str,
        id: PlotId,
        requester: Uuid,
        bypass_owner: bool,
        key: &str,
        value: Option<String>,
    ) -> Reply<OwnerActionResult> {
        let key = key.to_string();
        self.update_merge_group(world, id, requester, bypass_owner, move |p| {
            p.with_flag_raw(&key, value.as_deref())
        })
    }

    pub fn add_trusted(&self, world: &str, id: PlotId, requester: Uuid, bypass_owner: bool, player: Uuid) -> Reply<OwnerActionResult> {
        self.update_merge_group(world, id, requester, bypass_owner, move |p| p.with_trusted_added(player))
    }

    pub fn remove_trusted(&self, world: &str, id: PlotId, requester: Uuid, bypass_owner: bool, player: Uuid) -> Reply<OwnerActionResult> {
        self.update_merge_group(world, id, requester, bypass_owner, move |p| p.with_trusted_removed(player))
    }

    pub fn add_denied(&self, world: &str, id: PlotId, requester: Uuid, bypass_owner: bool, player: Uuid) -> Reply<OwnerActionResult> {
        self.update_merge_group(world, id, requester, bypass_owner, move |p| p.with_denied_added(player))
    }

    pub fn remove_denied(&self, world: &str, id: PlotId, requester: Uuid, bypass_owner: bool, player: Uuid) -> Reply<OwnerActionResult> {
        self.update_merge_group(world, id, requester, bypass_owner, move |p| p.with_denied_removed(player))
    }

    /// Copy `source`'s trusted, denied and flags onto the rest of its group.
    pub fn sync_plot_settings(&self, world: &str, id: PlotId, source: Plot) -> Reply<bool> {
        let world = world.to_string();
        self.with_state(move |s| s.sync_plot_settings(&world, id, &source))
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn plot(&self, world: &str, id: PlotId) -> Reply<Option<Arc<Plot>>> {
        let world = world.to_string();
        self.with_state(move |s| s.plot(&world, id))
    }

    pub fn plot_at(&self, world: &str, x: i32, z: i32) -> Reply<Option<PlotId>> {
        let world = world.to_string();
        self.with_state(move |s| s.plot_at(&world, x, z))
    }

    pub fn merge_group(&self, world: &str, id: PlotId) -> Reply<Vec<PlotId>> {
        let world = world.to_string();
        self.with_state(move |s| {
            s.world(&world)
                .map(|w| w.merge_group(id).into_iter().collect())
                .unwrap_or_default()
        })
    }

    pub fn merge_root(&self, world: &str, id: PlotId) -> Reply<PlotId> {
        let world = world.to_string();
        self.with_state(move |s| s.world(&world).map_or(id, |w| w.merge_root(id)))
    }

    pub fn merged_bounds(&self, world: &str, id: PlotId) -> Reply<Option<PlotBounds>> {
        let world = world.to_string();
        self.with_state(move |s| s.merged_bounds(&world, id))
    }

    pub fn count_owned(&self, world: &str, owner: Uuid) -> Reply<usize> {
        let world = world.to_string();
        self.with_state(move |s| s.count_owned(&world, owner))
    }

    pub fn find_next_free(&self, world: &str) -> Reply<Option<PlotId>> {
        let world = world.to_string();
        self.with_state(move |s| s.world(&world).map(|w| w.find_next_free_plot_id()))
    }

    pub fn owned_plots(&self, owner: Uuid) -> Reply<Vec<PlotLocation>> {
        self.with_state(move |s| s.owned_plots(owner))
    }

    pub fn world_names(&self) -> Reply<Vec<String>> {
        self.with_state(|s| s.world_names())
    }

    /// Home plot of `owner`. Reads the index directly, without a round trip
    /// through the service thread.
    pub fn find_home(&self, owner: Uuid) -> Option<PlotLocation> {
        self.inner.homes.home(owner)
    }

    // ── Saving ──────────────────────────────────────────────────────────

    /// Snapshot on the service thread and hand the job to the background
    /// writer. Returns immediately.
    pub fn request_save(&self) {
        self.inner.metrics.record_request();
        let saves = Arc::clone(&self.inner.saves);
        self.submit(move |state| {
            let force_full = saves.take_full_retry();
            if let Some(job) = state.take_save_job(saves.supports_incremental(), force_full) {
                saves.enqueue(job);
            }
        });
    }

    /// Snapshot on the service thread, then write on the calling thread,
    /// including any job still waiting for the background writer. Returns
    /// whether anything was written.
    pub fn save(&self) -> Result<bool> {
        self.inner.metrics.record_request();
        let saves = Arc::clone(&self.inner.saves);
        let job = self
            .with_state(move |state| {
                let force_full = saves.take_full_retry();
                state.take_save_job(saves.supports_incremental(), force_full)
            })
            .wait()?;
        self.inner.saves.save_now(job)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stop accepting work, let queued tasks finish, then flush the save
    /// worker. Does not save by itself; call `save` first for that.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, SeqCst) {
            return;
        }
        let _ = self.inner.commands.send(Command::Shutdown);
        if self.is_service_thread() {
            tracing::warn!("Plot service shutdown requested from its own thread; not joining");
            return;
        }
        let handle = self.inner.thread.lock().expect("service handle poisoned").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Plot service thread panicked");
            }
        }
        self.inner.saves.shutdown();
        tracing::info!("Plot service stopped");
    }
}

fn run_loop(state: PlotState, mut commands: mpsc::UnboundedReceiver<Command>) {
    tracing::debug!("Plot service thread started");
    STATE.with(|cell| *cell.borrow_mut() = Some(state));
    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Run(task) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(true)));
                if let Err(payload) = outcome {
                    tracing::error!("Plot task panicked: {}", panic_message(payload.as_ref()));
                }
            }
            Command::Shutdown => break,
        }
    }

    // Calls that raced shutdown may sit behind the sentinel.
    commands.close();
    let mut cancelled = 0usize;
    while let Ok(command) = commands.try_recv() {
        if let Command::Run(task) = command {
            task(false);
            cancelled += 1;
        }
    }
    if cancelled > 0 {
        tracing::debug!("Cancelled {} plot tasks queued after shutdown", cancelled);
    }

    let state = STATE.with(|cell| cell.borrow_mut().take());
    let plots = state.map_or(0, |s| s.worlds().map(|w| w.plot_count()).sum::<usize>());
    tracing::debug!("Plot service thread exiting ({} plots in memory)", plots);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
