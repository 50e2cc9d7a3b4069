//! Fixed-size thread pool with FIFO task intake and graceful shutdown.
//!
//! Tasks are submitted with [`ThreadPool::spawn_detached`] and picked up by the
//! first free worker in submission order. [`ThreadPool::shutdown`] closes the
//! intake; workers finish everything already queued and then exit, which can be
//! observed through [`ThreadPool::await_termination`].

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use fanout_common::{
    Result,
    error::Error,
    sync::{lock, panic_message},
};

use crate::mpmc::{Receiver, Sender};

/// A boxed function that can be executed by a worker thread.
type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A pool of `size` worker threads draining a shared FIFO task queue.
///
/// ## Lifecycle
///
/// 1. **Accepting**: tasks may be spawned; workers execute them as they free up.
/// 2. **Shut down**: [`shutdown`](Self::shutdown) was called (or the pool was
///    dropped); new tasks are rejected, queued tasks still run.
/// 3. **Terminated**: the queue is drained and every worker thread has exited.
///
/// A task that panics is logged and does not take its worker down.
pub struct ThreadPool {
    intake: Mutex<Option<Sender<TaskFn>>>,
    workers: Arc<WorkerState>,
    size: usize,
}

impl ThreadPool {
    /// Creates a pool with `num_threads` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is 0, or if the OS refuses to spawn a thread.
    pub fn new(num_threads: usize) -> Self {
        Self::with_thread_name(num_threads, |_| String::new())
    }

    /// Creates a pool whose worker `i` is named `thread_name(i)`.
    ///
    /// An empty name leaves that thread unnamed.
    ///
    /// # Panics
    ///
    /// Panics if `num_threads` is 0, or if the OS refuses to spawn a thread.
    pub fn with_thread_name(num_threads: usize, thread_name: impl Fn(usize) -> String) -> Self {
        assert_ne!(num_threads, 0);

        let workers = Arc::new(WorkerState {
            live: Mutex::new(num_threads),
            all_exited: Condvar::new(),
            busy: AtomicUsize::new(0),
        });

        let (tx, rx) = crate::mpmc::channel::<TaskFn>();
        for i in 0..num_threads {
            let rx = rx.clone();
            let workers = workers.clone();
            let mut builder = thread::Builder::new();
            let name = thread_name(i);
            if !name.is_empty() {
                builder = builder.name(name);
            }
            builder
                .spawn(move || Self::thread_fn(rx, workers))
                .expect("spawn thread");
        }

        ThreadPool {
            intake: Mutex::new(Some(tx)),
            workers,
            size: num_threads,
        }
    }

    /// Number of worker threads the pool was created with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers currently executing a task.
    pub fn busy_count(&self) -> usize {
        self.workers.busy.load(Ordering::SeqCst)
    }

    /// Queues `f` for execution on the next free worker.
    ///
    /// Fails with `InvalidOperation` once the pool has been shut down.
    pub fn spawn_detached<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let intake = lock(&self.intake);
        let Some(tx) = intake.as_ref() else {
            return Err(Error::invalid_operation("spawn on a shut down thread pool"));
        };
        tx.send(Box::new(f))
            .map_err(|_| Error::invalid_operation("spawn with no live worker threads"))
    }

    /// Stops accepting tasks. Already queued tasks still run. Idempotent.
    pub fn shutdown(&self) {
        if lock(&self.intake).take().is_some() {
            log::trace!("thread pool of {} worker(s) shut down", self.size);
        }
    }

    /// Blocks for at most `timeout` waiting for every worker to exit.
    ///
    /// Returns `true` if the pool terminated, `false` on timeout. Workers only
    /// exit after [`shutdown`](Self::shutdown), so this always times out on a
    /// pool that still accepts tasks.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let live = lock(&self.workers.live);
        let (live, _) = self
            .workers
            .all_exited
            .wait_timeout_while(live, timeout, |live| *live > 0)
            .unwrap_or_else(|e| e.into_inner());
        *live == 0
    }
}

impl ThreadPool {
    fn thread_fn(rx: Receiver<TaskFn>, workers: Arc<WorkerState>) {
        let _exit = WorkerExit(workers.clone());
        while let Ok(task) = rx.recv() {
            workers.busy.fetch_add(1, Ordering::SeqCst);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                log::error!(
                    "task panicked on worker {:?}: {}",
                    thread::current().name().unwrap_or("<unnamed>"),
                    panic_message(&*payload)
                );
            }
            workers.busy.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct WorkerState {
    live: Mutex<usize>,
    all_exited: Condvar,
    busy: AtomicUsize,
}

/// Decrements the live worker count when a worker thread leaves its loop.
struct WorkerExit(Arc<WorkerState>);

impl Drop for WorkerExit {
    fn drop(&mut self) {
        let mut live = lock(&self.0.live);
        *live -= 1;
        if *live == 0 {
            self.0.all_exited.notify_all();
        }
    }
}
