//! Process memory probes
//!
//! The request path only ever reads an atomic. Sampling `/proc` (or the
//! platform equivalent) happens on a background task at a fixed interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Source of the memory reading attached to each record
pub trait MemoryProbe: Send + Sync + 'static {
    /// Latest process memory reading in megabytes, or `None` if unknown
    fn memory_mb(&self) -> Option<f64>;
}

/// Most recent memory sample, shared between a sampler and its readers
///
/// A value of zero means no sample is available.
#[derive(Debug, Default)]
pub struct MemoryGauge {
    bytes: AtomicU64,
}

impl MemoryGauge {
    /// Replace the reading; `None` clears it
    pub fn set(&self, bytes: Option<u64>) {
        self.bytes.store(bytes.unwrap_or(0), Ordering::Relaxed);
    }

    /// Current reading in megabytes
    pub fn megabytes(&self) -> Option<f64> {
        match self.bytes.load(Ordering::Relaxed) {
            0 => None,
            bytes => Some(bytes as f64 / BYTES_PER_MB),
        }
    }
}

impl MemoryProbe for MemoryGauge {
    fn memory_mb(&self) -> Option<f64> {
        self.megabytes()
    }
}

/// Resident set size of the current process, sampled with `sysinfo`
///
/// Each request sees the most recent sample, so the reading follows the
/// process down as well as up. The sampler stops when the probe is dropped.
pub struct SysinfoProbe {
    gauge: Arc<MemoryGauge>,
    sampler: JoinHandle<()>,
}

impl SysinfoProbe {
    /// Start sampling every `interval`
    ///
    /// Must be called from within a tokio runtime. The first sample is taken
    /// immediately.
    pub fn start(interval: Duration) -> Self {
        let gauge = Arc::new(MemoryGauge::default());
        let sampler = tokio::spawn(sample_loop(
            gauge.clone(),
            interval.max(MIN_SAMPLE_INTERVAL),
        ));
        Self { gauge, sampler }
    }
}

impl MemoryProbe for SysinfoProbe {
    fn memory_mb(&self) -> Option<f64> {
        self.gauge.megabytes()
    }
}

impl Drop for SysinfoProbe {
    fn drop(&mut self) {
        self.sampler.abort();
    }
}

async fn sample_loop(gauge: Arc<MemoryGauge>, interval: Duration) {
    let pid = match sysinfo::get_current_pid() {
        Ok(pid) => pid,
        Err(e) => {
            tracing::debug!(error = %e, "Memory probe cannot resolve current pid");
            return;
        }
    };

    let mut system = System::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let sampled = tokio::task::spawn_blocking(move || {
            let bytes = resident_bytes(&mut system, pid);
            (system, bytes)
        })
        .await;

        match sampled {
            Ok((returned, bytes)) => {
                system = returned;
                gauge.set(bytes);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Memory sampler stopped");
                gauge.set(None);
                return;
            }
        }
    }
}

fn resident_bytes(system: &mut System, pid: Pid) -> Option<u64> {
    if !system.refresh_process(pid) {
        return None;
    }
    system.process(pid).map(|p| p.memory())
}

/// Probe that never reports, for hosts that do not want memory sampling
pub struct DisabledProbe;

impl MemoryProbe for DisabledProbe {
    fn memory_mb(&self) -> Option<f64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_gauge_follows_latest_sample_down() {
        let gauge = MemoryGauge::default();
        assert!(gauge.memory_mb().is_none());

        gauge.set(Some(500 * MB));
        assert_eq!(gauge.memory_mb(), Some(500.0));

        gauge.set(Some(100 * MB));
        assert_eq!(gauge.memory_mb(), Some(100.0));

        gauge.set(None);
        assert!(gauge.memory_mb().is_none());
    }

    #[tokio::test]
    async fn test_sampler_reports_current_process() {
        let sampler = SysinfoProbe::start(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Platforms without process info are allowed to report nothing
        if let Some(mb) = sampler.memory_mb() {
            assert!(mb > 0.0);
        }
    }

    #[tokio::test]
    async fn test_drop_stops_sampler() {
        let sampler = SysinfoProbe::start(Duration::from_millis(10));
        let gauge = sampler.gauge.clone();
        drop(sampler);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only the test's handle remains once the task is gone
        assert_eq!(Arc::strong_count(&gauge), 1);
    }

    #[test]
    fn test_disabled_probe() {
        assert!(DisabledProbe.memory_mb().is_none());
    }
}
