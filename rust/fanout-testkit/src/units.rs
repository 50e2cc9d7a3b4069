//! Units of work with controllable timing and failure.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use fanout_executor::UnitOfWork;

/// Tracks how many probed units execute at the same time.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    total: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Marks one execution as in progress until the guard is dropped.
    pub fn enter(&self) -> ProbeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        ProbeGuard(self)
    }

    /// Highest number of simultaneous executions observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Executions currently in progress.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// Executions started so far.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

pub struct ProbeGuard<'a>(&'a ConcurrencyProbe);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A unit that sleeps, optionally panics, and records what happened to it.
#[derive(Debug)]
pub struct TestUnit {
    pub label: usize,
    pub sleep: Duration,
    pub panics: bool,
    pub probe: Option<Arc<ConcurrencyProbe>>,
    pub executions: usize,
    pub finished_at: Option<Instant>,
}

impl TestUnit {
    pub fn new(label: usize) -> Self {
        TestUnit {
            label,
            sleep: Duration::ZERO,
            panics: false,
            probe: None,
            executions: 0,
            finished_at: None,
        }
    }

    pub fn sleeping(label: usize, millis: u64) -> Self {
        Self::new(label).with_sleep(Duration::from_millis(millis))
    }

    pub fn with_sleep(mut self, sleep: Duration) -> Self {
        self.sleep = sleep;
        self
    }

    /// Makes `execute` panic after sleeping.
    pub fn panicking(mut self) -> Self {
        self.panics = true;
        self
    }

    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

impl UnitOfWork for TestUnit {
    fn execute(&mut self) {
        self.executions += 1;
        let probe = self.probe.clone();
        let _guard = probe.as_deref().map(ConcurrencyProbe::enter);
        if !self.sleep.is_zero() {
            thread::sleep(self.sleep);
        }
        if self.panics {
            panic!("test unit {} failed on purpose", self.label);
        }
        self.finished_at = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_counts_overlap() {
        let probe = ConcurrencyProbe::new();
        {
            let _a = probe.enter();
            let _b = probe.enter();
            assert_eq!(probe.current(), 2);
        }
        let _c = probe.enter();
        assert_eq!(probe.current(), 1);
        assert_eq!(probe.peak(), 2);
        assert_eq!(probe.total(), 3);
    }

    #[test]
    fn test_unit_records_execution() {
        let mut unit = TestUnit::sleeping(1, 1);
        unit.execute();
        assert_eq!(unit.executions, 1);
        assert!(unit.finished_at.is_some());
    }

    #[test]
    fn test_panicking_unit() {
        let mut unit = TestUnit::new(7).panicking();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unit.execute()));
        assert!(result.is_err());
        assert!(unit.finished_at.is_none());
    }
}
