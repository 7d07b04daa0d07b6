//! Per-intention memory profiling.
//!
//! Purely observational: the counters have no effect on allocation behavior
//! or correctness. The [`MemoryProfiler`] periodically renders a
//! human-readable consumption report through the `log` crate.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use crate::memory::Intention;

const INTENTIONS: usize = Intention::ALL.len();

/// Lock-free per-[`Intention`] consumption counters.
///
/// Updated by the allocator on every allocate/deallocate when profiling is
/// enabled. Counters are signed: a negative value means more bytes were
/// freed under an intention than allocated under it, which can happen when
/// ownership of a block crosses an intention boundary.
pub struct MemoryProfile {
    consumed: [AtomicI64; INTENTIONS],
}

impl MemoryProfile {
    pub(crate) fn new() -> Self {
        Self {
            consumed: std::array::from_fn(|_| AtomicI64::new(0)),
        }
    }

    pub(crate) fn record_alloc(&self, intention: Intention, size: u32) {
        self.consumed[intention.index()].fetch_add(size as i64, Ordering::Relaxed);
    }

    pub(crate) fn record_dealloc(&self, intention: Intention, size: u32) {
        self.consumed[intention.index()].fetch_sub(size as i64, Ordering::Relaxed);
    }

    /// Non-atomic copy of the counters for display/logging.
    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            consumed: std::array::from_fn(|i| self.consumed[i].load(Ordering::Relaxed)),
        }
    }
}

/// A point-in-time copy of the profile counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSnapshot {
    consumed: [i64; INTENTIONS],
}

impl ProfileSnapshot {
    /// Bytes currently consumed under the given intention.
    pub fn consumed(&self, intention: Intention) -> i64 {
        self.consumed[intention.index()]
    }

    /// Total bytes consumed across all intentions.
    pub fn total(&self) -> i64 {
        self.consumed.iter().sum()
    }
}

impl fmt::Display for ProfileSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RULE: &str =
            "-----------------------------------------------------------------------------";

        writeln!(f, "{}", RULE)?;
        writeln!(f, "Memory profiling results for off-heap allocation")?;
        writeln!(f, "Amount of memory consumed by category in bytes/Kb/Mb/Gb")?;
        writeln!(f)?;

        for intention in Intention::ALL {
            let consumed = self.consumed(intention);
            writeln!(
                f,
                "{} : {}/{}/{}/{}",
                intention,
                consumed,
                consumed / 1024,
                consumed / (1024 * 1024),
                consumed / (1024 * 1024 * 1024)
            )?;
        }

        writeln!(f)?;
        let total = self.total();
        writeln!(
            f,
            "Total : {}/{}/{}/{}",
            total,
            total / 1024,
            total / (1024 * 1024),
            total / (1024 * 1024 * 1024)
        )?;
        write!(f, "{}", RULE)
    }
}

/// Background thread that logs the memory profile on a fixed interval.
///
/// Stops and joins on drop.
pub struct MemoryProfiler {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MemoryProfiler {
    /// Spawn the reporter thread.
    pub fn start(profile: Arc<MemoryProfile>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("pagepool-memory-profiler".to_string())
            .spawn(move || {
                // Wake up often enough that drop never blocks for a full
                // reporting interval.
                let tick = Duration::from_millis(50).min(interval);
                let mut elapsed = Duration::ZERO;

                while !stop_flag.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    elapsed += tick;

                    if elapsed >= interval {
                        elapsed = Duration::ZERO;
                        info!("{}", profile.snapshot());
                    }
                }
            })
            .expect("failed to spawn memory profiler thread");

        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for MemoryProfiler {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let profile = MemoryProfile::new();

        profile.record_alloc(Intention::Test, 100);
        profile.record_alloc(Intention::Test, 50);
        profile.record_alloc(Intention::LoadPageFromDisk, 4096);
        profile.record_dealloc(Intention::Test, 50);

        let snapshot = profile.snapshot();
        assert_eq!(snapshot.consumed(Intention::Test), 100);
        assert_eq!(snapshot.consumed(Intention::LoadPageFromDisk), 4096);
        assert_eq!(snapshot.total(), 4196);
    }

    #[test]
    fn test_report_format() {
        let profile = MemoryProfile::new();
        profile.record_alloc(Intention::AddNewPageInCache, 8192);

        let report = format!("{}", profile.snapshot());
        assert!(report.contains("AddNewPageInCache : 8192/8/0/0"));
        assert!(report.contains("Total : 8192/8/0/0"));
    }

    #[test]
    fn test_profiler_start_stop() {
        let profile = Arc::new(MemoryProfile::new());
        let profiler = MemoryProfiler::start(Arc::clone(&profile), Duration::from_millis(10));

        thread::sleep(Duration::from_millis(30));
        drop(profiler); // must not hang
    }
}
