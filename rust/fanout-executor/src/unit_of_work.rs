//! The capability every batch item must provide, plus a few adapters.

use std::sync::{Arc, Mutex};

use fanout_common::sync::lock;

/// A self-contained piece of synchronous work.
///
/// `execute` has no return value and no error channel: a unit records its own
/// outcome (a result field, an exit code) and the caller inspects it after the
/// runner hands the unit back. The runner calls `execute` exactly once per
/// registered unit and never concurrently on the same instance. Distinct units
/// that share mutable state must synchronize it themselves.
///
/// A panic escaping `execute` is treated as an execution fault: it is logged,
/// the unit is set aside in the runner's fault list, and the rest of the batch
/// carries on.
pub trait UnitOfWork: Send + 'static {
    fn execute(&mut self);
}

impl<U: UnitOfWork + ?Sized> UnitOfWork for Box<U> {
    fn execute(&mut self) {
        (**self).execute();
    }
}

/// Lets the caller keep a handle to a unit while the runner owns a clone of it.
impl<U: UnitOfWork> UnitOfWork for Arc<Mutex<U>> {
    fn execute(&mut self) {
        lock(self).execute();
    }
}

/// Wraps a closure as a unit of work and keeps its most recent result.
///
/// ```
/// use fanout_executor::unit_of_work::{Task, UnitOfWork};
///
/// let mut sum = Task::new(|| 2 + 3);
/// assert_eq!(sum.result(), None);
/// sum.execute();
/// assert_eq!(sum.result(), Some(&5));
/// ```
pub struct Task<F, R> {
    f: F,
    result: Option<R>,
}

impl<F, R> Task<F, R>
where
    F: FnMut() -> R + Send + 'static,
    R: Send + 'static,
{
    pub fn new(f: F) -> Self {
        Task { f, result: None }
    }

    /// The value returned by the last `execute`, if it ran.
    pub fn result(&self) -> Option<&R> {
        self.result.as_ref()
    }

    pub fn into_result(self) -> Option<R> {
        self.result
    }
}

impl<F, R> UnitOfWork for Task<F, R>
where
    F: FnMut() -> R + Send + 'static,
    R: Send + 'static,
{
    fn execute(&mut self) {
        self.result = Some((self.f)());
    }
}

impl<F, R: std::fmt::Debug> std::fmt::Debug for Task<F, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("result", &self.result).finish()
    }
}
