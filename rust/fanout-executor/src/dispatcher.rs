//! Completion delivery for a running batch.
//!
//! Workers push one [`Completion`] per unit into a channel bounded to the
//! batch length, in the order they finish. A single dispatcher thread drains
//! exactly the submitted count, invokes the completion callback one unit at a
//! time, files each unit under "completed" or "faulted", and finally flips the
//! runner back to idle.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Condvar, Mutex},
    thread,
    time::Instant,
};

use fanout_common::sync::{lock, panic_message};
use fanout_workflow::mpmc::{Receiver, Sender};

use crate::{runner::UnitId, unit_of_work::UnitOfWork};

/// Handler invoked on the dispatcher thread for every successfully executed unit.
pub type CompletionCallback<T> = Box<dyn FnMut(&T) + Send + 'static>;

/// A unit whose `execute` panicked, handed back to the caller with the panic message.
pub struct UnitFault<T> {
    pub id: UnitId,
    pub message: String,
    pub unit: T,
}

impl<T> std::fmt::Debug for UnitFault<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitFault")
            .field("id", &self.id)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// What a worker reports after running one unit.
pub(crate) struct Completion<T> {
    pub id: UnitId,
    pub unit: T,
    pub outcome: Result<(), String>,
}

/// Worker-side body: runs the unit, catching a panic, and reports the outcome.
pub(crate) fn run_unit<T: UnitOfWork>(id: UnitId, mut unit: T, completions: Sender<Completion<T>>) {
    log::trace!("unit {id} executing");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| unit.execute()))
        .map_err(|payload| panic_message(&*payload));
    if completions
        .send(Completion { id, unit, outcome })
        .is_err()
    {
        log::error!("unit {id} finished but the dispatcher is gone");
    }
}

/// State shared between the runner handle and its dispatcher thread.
pub(crate) struct DispatchState<T> {
    running: Mutex<bool>,
    idle: Condvar,
    callback: Mutex<CallbackSlot<T>>,
    completed: Mutex<Vec<T>>,
    faults: Mutex<Vec<UnitFault<T>>>,
}

struct CallbackSlot<T> {
    handler: Option<CompletionCallback<T>>,
    /// Bumped on every replacement, so a handler taken out for invocation is
    /// only put back if nobody replaced it meanwhile.
    generation: u64,
}

impl<T: UnitOfWork> DispatchState<T> {
    pub fn new() -> Self {
        DispatchState {
            running: Mutex::new(false),
            idle: Condvar::new(),
            callback: Mutex::new(CallbackSlot {
                handler: None,
                generation: 0,
            }),
            completed: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        *lock(&self.running)
    }

    pub fn set_running(&self, running: bool) {
        *lock(&self.running) = running;
        if !running {
            self.idle.notify_all();
        }
    }

    /// Waits until the dispatcher has cleared the running flag, or `deadline` passes.
    pub fn wait_idle(&self, deadline: Option<Instant>) -> bool {
        let mut running = lock(&self.running);
        while *running {
            match deadline {
                None => {
                    running = self.idle.wait(running).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    running = self
                        .idle
                        .wait_timeout(running, deadline - now)
                        .unwrap_or_else(|e| e.into_inner())
                        .0;
                }
            }
        }
        true
    }

    pub fn set_callback(&self, handler: Option<CompletionCallback<T>>) {
        let mut slot = lock(&self.callback);
        slot.handler = handler;
        slot.generation += 1;
    }

    pub fn take_completed(&self) -> Vec<T> {
        std::mem::take(&mut *lock(&self.completed))
    }

    pub fn take_faults(&self) -> Vec<UnitFault<T>> {
        std::mem::take(&mut *lock(&self.faults))
    }

    pub fn completed_len(&self) -> usize {
        lock(&self.completed).len()
    }

    pub fn faults_len(&self) -> usize {
        lock(&self.faults).len()
    }

    /// Invokes the current callback outside the slot lock, so the callback may
    /// itself replace or clear the handler.
    fn notify(&self, id: UnitId, unit: &T) {
        let (handler, generation) = {
            let mut slot = lock(&self.callback);
            (slot.handler.take(), slot.generation)
        };
        let Some(mut handler) = handler else {
            return;
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(unit))) {
            log::error!(
                "completion callback panicked for unit {id}: {}",
                panic_message(&*payload)
            );
        }

        let mut slot = lock(&self.callback);
        if slot.generation == generation {
            slot.handler = Some(handler);
        }
    }

    fn accept(&self, completion: Completion<T>) {
        let Completion { id, unit, outcome } = completion;
        match outcome {
            Ok(()) => {
                self.notify(id, &unit);
                lock(&self.completed).push(unit);
            }
            Err(message) => {
                log::error!("unit {id} faulted during execution: {message}");
                lock(&self.faults).push(UnitFault { id, message, unit });
            }
        }
    }
}

/// Starts the dispatcher thread for a batch of `expected` submitted units.
///
/// # Panics
///
/// Panics if the OS refuses to spawn the thread.
pub(crate) fn spawn<T: UnitOfWork>(
    state: std::sync::Arc<DispatchState<T>>,
    completions: Receiver<Completion<T>>,
    expected: usize,
    thread_name: String,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name(thread_name)
        .spawn(move || drain(&state, &completions, expected))
        .expect("spawn dispatcher thread")
}

fn drain<T: UnitOfWork>(state: &DispatchState<T>, completions: &Receiver<Completion<T>>, expected: usize) {
    let started = Instant::now();
    for received in 0..expected {
        match completions.recv() {
            Ok(completion) => state.accept(completion),
            Err(_) => {
                log::error!(
                    "completion channel closed with {} of {expected} completion(s) outstanding",
                    expected - received
                );
                break;
            }
        }
    }
    log::debug!(
        "dispatcher drained {expected} unit(s) in {:?} ({} faulted)",
        started.elapsed(),
        state.faults_len()
    );
    state.set_running(false);
}
