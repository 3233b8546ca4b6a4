//! Periodic process memory reporting.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Process memory figures in KiB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub resident_kb: u64,
    pub virtual_kb: u64,
    pub peak_resident_kb: u64,
}

impl MemoryStats {
    /// Read the current process's memory usage from `/proc`.
    #[cfg(target_os = "linux")]
    pub fn current() -> Option<Self> {
        let status = procfs::process::Process::myself().ok()?.status().ok()?;
        Some(Self {
            resident_kb: status.vmrss.unwrap_or(0),
            virtual_kb: status.vmsize.unwrap_or(0),
            peak_resident_kb: status.vmhwm.unwrap_or(0),
        })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn current() -> Option<Self> {
        None
    }
}

/// Log memory stats every `interval` until `stop` is set or dropped.
pub fn spawn_stats_reporter(interval: Duration, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => match MemoryStats::current() {
                    Some(stats) => tracing::info!(
                        resident_kb = stats.resident_kb,
                        virtual_kb = stats.virtual_kb,
                        peak_resident_kb = stats.peak_resident_kb,
                        "Memory stats"
                    ),
                    None => tracing::debug!("Memory stats unavailable on this platform"),
                },
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_own_memory_usage() {
        let stats = MemoryStats::current().unwrap();
        assert!(stats.resident_kb > 0);
        assert!(stats.virtual_kb >= stats.resident_kb);
        assert!(stats.peak_resident_kb >= stats.resident_kb);
    }

    #[tokio::test]
    async fn reporter_stops_on_signal() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_stats_reporter(Duration::from_millis(5), stop_rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reporter_stops_when_sender_dropped() {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_stats_reporter(Duration::from_secs(3600), stop_rx);
        drop(stop_tx);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
