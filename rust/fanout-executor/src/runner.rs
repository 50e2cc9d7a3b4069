//! The bounded-parallelism batch runner.

use std::{
    fmt,
    sync::{Arc, Mutex},
    thread,
    time::{Duration, Instant},
};

use fanout_common::sync::lock;
use fanout_workflow::{mpmc, thread_pool::ThreadPool};

use crate::{
    dispatcher::{self, CompletionCallback, DispatchState, UnitFault},
    unit_of_work::UnitOfWork,
};

/// Identifier assigned to a unit when it is registered, unique within one runner.
///
/// Ids count up from 0 in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    pub(crate) fn new(value: u64) -> Self {
        UnitId(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of [`BoundedRunner::register`].
///
/// Registering after [`BoundedRunner::start`] is a permitted no-op; the unit
/// comes back as `Ignored` and will never execute.
#[derive(Debug)]
pub enum Registration<T> {
    Accepted(UnitId),
    Ignored(T),
}

impl<T> Registration<T> {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Registration::Accepted(_))
    }

    pub fn id(&self) -> Option<UnitId> {
        match self {
            Registration::Accepted(id) => Some(*id),
            Registration::Ignored(_) => None,
        }
    }

    pub fn into_ignored(self) -> Option<T> {
        match self {
            Registration::Accepted(_) => None,
            Registration::Ignored(unit) => Some(unit),
        }
    }
}

/// Construction options for a [`BoundedRunner`].
#[derive(Clone, Debug)]
pub struct RunnerOptions {
    max_workers: usize,
    join_poll_interval: Duration,
    thread_name_prefix: String,
}

impl RunnerOptions {
    pub const DEFAULT_JOIN_POLL_INTERVAL: Duration = Duration::from_secs(2);

    pub fn new(max_workers: usize) -> Self {
        RunnerOptions {
            max_workers,
            ..Default::default()
        }
    }

    /// Requested worker count; clamped to `[1, available_parallelism]` when the
    /// runner is built.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Interval between pool-quiescence checks in [`BoundedRunner::join`].
    /// A zero interval is raised to one millisecond.
    pub fn with_join_poll_interval(mut self, interval: Duration) -> Self {
        self.join_poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Prefix for worker (`{prefix}-{i}`) and dispatcher (`{prefix}-dispatcher`)
    /// thread names.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn join_poll_interval(&self) -> Duration {
        self.join_poll_interval
    }

    pub fn thread_name_prefix(&self) -> &str {
        &self.thread_name_prefix
    }

    /// The pool size these options produce on this host.
    pub fn effective_workers(&self) -> usize {
        effective_workers(self.max_workers, fanout_workflow::available_parallelism())
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            max_workers: fanout_workflow::available_parallelism(),
            join_poll_interval: Self::DEFAULT_JOIN_POLL_INTERVAL,
            thread_name_prefix: "fanout".to_string(),
        }
    }
}

/// `clamp(requested, 1, available)`, with `available` itself at least 1.
pub fn effective_workers(requested: usize, available: usize) -> usize {
    requested.clamp(1, available.max(1))
}

/// Runs a fixed batch of units on at most N worker threads and reports each
/// unit as it finishes.
///
/// ## Lifecycle
///
/// 1. **Idle**: units are added with [`register`](Self::register).
/// 2. **Running**: [`start`](Self::start) submits the batch FIFO to the worker
///    pool and returns immediately. Registration is frozen.
/// 3. **Idle again**: the dispatcher has delivered every completion. The runner
///    is single-use; a second `start` is rejected.
///
/// ## Completion delivery
///
/// The completion callback runs on a dedicated dispatcher thread, once per
/// successfully executed unit, in the order units *finish* (not the order they
/// were registered). Calls never overlap each other, though they may overlap
/// units that are still executing. Executed units are then kept, in the same
/// order, for [`take_completed`](Self::take_completed).
///
/// A unit whose `execute` panics gets no callback; it is logged and kept for
/// [`take_faults`](Self::take_faults). The rest of the batch is unaffected.
///
/// ```
/// use fanout_executor::{BoundedRunner, unit_of_work::Task};
///
/// let runner = BoundedRunner::new(2);
/// for i in 0..4u64 {
///     runner.register(Task::new(move || i * i));
/// }
/// runner.set_completion_callback(|t| println!("finished: {:?}", t.result()));
/// assert!(runner.start());
/// runner.join();
///
/// let mut squares: Vec<u64> = runner
///     .take_completed()
///     .into_iter()
///     .filter_map(|t| t.into_result())
///     .collect();
/// squares.sort();
/// assert_eq!(squares, vec![0, 1, 4, 9]);
/// ```
pub struct BoundedRunner<T: UnitOfWork> {
    options: RunnerOptions,
    pool: ThreadPool,
    batch: Mutex<Batch<T>>,
    state: Arc<DispatchState<T>>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

struct Batch<T> {
    pending: Vec<(UnitId, T)>,
    next_id: u64,
    started: bool,
}

impl<T: UnitOfWork> BoundedRunner<T> {
    /// Creates a runner with `clamp(max_workers, 1, available_parallelism)` workers.
    pub fn new(max_workers: usize) -> Self {
        Self::with_options(RunnerOptions::new(max_workers))
    }

    pub fn with_options(options: RunnerOptions) -> Self {
        let workers = options.effective_workers();
        let prefix = options.thread_name_prefix.clone();
        let pool = ThreadPool::with_thread_name(workers, |i| format!("{prefix}-{i}"));
        log::trace!(
            "runner created with {workers} worker(s) (requested {})",
            options.max_workers
        );
        BoundedRunner {
            options,
            pool,
            batch: Mutex::new(Batch {
                pending: Vec::new(),
                next_id: 0,
                started: false,
            }),
            state: Arc::new(DispatchState::new()),
            dispatcher: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Size of the worker pool.
    pub fn worker_count(&self) -> usize {
        self.pool.size()
    }

    /// Adds a unit to the batch while the runner has not been started.
    ///
    /// After `start` the unit is returned as [`Registration::Ignored`].
    pub fn register(&self, unit: T) -> Registration<T> {
        let mut batch = lock(&self.batch);
        if batch.started {
            log::debug!("runner already started; ignoring registration");
            return Registration::Ignored(unit);
        }
        let id = UnitId::new(batch.next_id);
        batch.next_id += 1;
        batch.pending.push((id, unit));
        Registration::Accepted(id)
    }

    /// Number of units accepted by [`register`](Self::register).
    pub fn registered_len(&self) -> usize {
        lock(&self.batch).next_id as usize
    }

    /// Sets the completion callback, replacing any previous one.
    ///
    /// May be called before or during a run; it applies to completions
    /// dispatched after the call. The callback may replace or clear itself, but
    /// must not call [`join`](Self::join) on its own runner (that is detected
    /// and turned into a no-op).
    pub fn set_completion_callback<F>(&self, callback: F)
    where
        F: FnMut(&T) + Send + 'static,
    {
        self.state.set_callback(Some(Box::new(callback) as CompletionCallback<T>));
    }

    /// Removes the completion callback; later completions are drained silently.
    pub fn clear_completion_callback(&self) {
        self.state.set_callback(None);
    }

    /// Submits the batch and returns without waiting.
    ///
    /// Returns `true` if this call started the batch, `false` if the runner is
    /// running or has already run (the call is then a no-op).
    pub fn start(&self) -> bool {
        let mut batch = lock(&self.batch);
        if batch.started {
            log::debug!(
                "start ignored: runner is {}",
                if self.state.is_running() { "running" } else { "finished" }
            );
            return false;
        }
        batch.started = true;
        self.state.set_running(true);

        let pending = std::mem::take(&mut batch.pending);
        drop(batch);

        let total = pending.len();
        log::debug!(
            "starting batch of {total} unit(s) on {} worker(s)",
            self.pool.size()
        );

        let (tx, rx) = mpmc::sync_channel(total.max(1));
        let mut submitted = 0;
        for (id, unit) in pending {
            let completions = tx.clone();
            match self
                .pool
                .spawn_detached(move || dispatcher::run_unit(id, unit, completions))
            {
                Ok(()) => submitted += 1,
                Err(e) => log::error!("failed to submit unit {id}: {e}"),
            }
        }
        drop(tx);
        self.pool.shutdown();

        // Held across the spawn so a callback calling `join` sees the handle.
        let mut slot = lock(&self.dispatcher);
        *slot = Some(dispatcher::spawn(
            self.state.clone(),
            rx,
            submitted,
            format!("{}-dispatcher", self.options.thread_name_prefix),
        ));
        true
    }

    /// `true` from `start` until the dispatcher has delivered every completion.
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// `true` once `start` has taken effect.
    pub fn has_started(&self) -> bool {
        lock(&self.batch).started
    }

    /// Blocks until every submitted unit has executed and all workers have
    /// exited, polling every `join_poll_interval`.
    ///
    /// Does not wait for the callback of the last unit; use [`join`](Self::join)
    /// for that. Returns immediately if the runner was never started.
    pub fn wait_for_workers(&self) {
        if !self.has_started() {
            return;
        }
        let mut polls = 0u64;
        while !self.pool.await_termination(self.options.join_poll_interval) {
            polls += 1;
            log::debug!(
                "waiting for workers: poll {polls}, {} busy",
                self.pool.busy_count()
            );
        }
    }

    /// Blocks until the batch is fully drained: every unit executed, every
    /// callback delivered, and [`is_running`](Self::is_running) is `false`.
    ///
    /// Both the worker wait and the dispatcher wait poll every
    /// `join_poll_interval`.
    ///
    /// Returns immediately if the runner was never started.
    pub fn join(&self) {
        if !self.has_started() || self.on_dispatcher_thread() {
            return;
        }
        self.wait_for_workers();
        let interval = self.options.join_poll_interval;
        let mut polls = 0u64;
        while !self.state.wait_idle(Some(Instant::now() + interval)) {
            polls += 1;
            log::debug!("waiting for the dispatcher: poll {polls}");
        }
        self.reap_dispatcher();
    }

    /// Like [`join`](Self::join) but gives up after `timeout`.
    ///
    /// Returns `true` if the batch drained in time.
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        if !self.has_started() {
            return true;
        }
        if self.on_dispatcher_thread() {
            return false;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self
                .pool
                .await_termination(remaining.min(self.options.join_poll_interval))
            {
                break;
            }
            if remaining.is_zero() {
                return false;
            }
        }
        if !self.state.wait_idle(Some(deadline)) {
            return false;
        }
        self.reap_dispatcher();
        true
    }

    /// Hands back the units that executed successfully so far, in completion order.
    pub fn take_completed(&self) -> Vec<T> {
        self.state.take_completed()
    }

    /// Hands back the units whose `execute` panicked so far.
    pub fn take_faults(&self) -> Vec<UnitFault<T>> {
        self.state.take_faults()
    }

    /// Number of successfully executed units not yet taken.
    pub fn completed_len(&self) -> usize {
        self.state.completed_len()
    }

    /// Number of faulted units not yet taken.
    pub fn faults_len(&self) -> usize {
        self.state.faults_len()
    }

    fn on_dispatcher_thread(&self) -> bool {
        let on_it = lock(&self.dispatcher)
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id());
        if on_it {
            log::warn!("join called from the completion callback; ignoring");
        }
        on_it
    }

    fn reap_dispatcher(&self) {
        let handle = lock(&self.dispatcher).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("dispatcher thread panicked");
            }
        }
    }
}

impl<T: UnitOfWork> fmt::Debug for BoundedRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundedRunner")
            .field("workers", &self.pool.size())
            .field("registered", &self.registered_len())
            .field("started", &self.has_started())
            .field("running", &self.is_running())
            .finish()
    }
}
