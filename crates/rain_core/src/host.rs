//! One-shot snapshot of the in-process system view.
//!
//! sysinfo refreshes are taken once per collection run, before sections fan
//! out, so every probe reads the same consistent state and no section pays
//! the refresh cost twice.

use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Components, Disks, Networks, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::{debug, warn};

use crate::config::Config;

pub struct HostSnapshot {
    pub system: System,
    pub disks: Disks,
    pub networks: Networks,
    pub components: Components,
}

impl HostSnapshot {
    /// Refresh everything on a blocking worker; CPU usage needs two samples
    /// separated by sysinfo's minimum interval.
    pub async fn capture() -> Arc<Self> {
        match tokio::task::spawn_blocking(Self::capture_blocking).await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(err) => {
                warn!(error = %err, "host snapshot task failed; probes fall back to commands");
                Arc::new(Self::empty())
            }
        }
    }

    fn capture_blocking() -> Self {
        let started = std::time::Instant::now();
        let mut system = System::new_all();
        system.refresh_all();
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        system.refresh_cpu();
        system.refresh_processes();

        let snapshot = Self {
            system,
            disks: Disks::new_with_refreshed_list(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
        };
        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            processes = snapshot.system.processes().len(),
            "host snapshot ready"
        );
        snapshot
    }

    fn empty() -> Self {
        Self {
            system: System::new(),
            disks: Disks::new(),
            networks: Networks::new(),
            components: Components::new(),
        }
    }
}

/// Everything a probe source may consult, cheap to clone into section tasks.
#[derive(Clone)]
pub struct ProbeCtx {
    pub config: Arc<Config>,
    pub host: Arc<HostSnapshot>,
}

impl ProbeCtx {
    pub fn new(config: Arc<Config>, host: Arc<HostSnapshot>) -> Self {
        Self { config, host }
    }

    /// Deadline for network-bound sources.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.config.collector.network_timeout_secs)
    }

    /// Deadline for local subprocess sources; the section budget caps the
    /// whole chain anyway.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.config.collector.section_timeout_secs)
    }

    pub fn max_processes(&self) -> usize {
        self.config.collector.max_processes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn snapshot_capture_completes() {
        // Process and CPU counts vary wildly across hosts, so only assert
        // the snapshot machinery itself.
        let snapshot = HostSnapshot::capture().await;
        assert!(snapshot.system.cpus().len() < 4096);
    }

    #[tokio::test]
    async fn ctx_timeouts_follow_config() {
        let mut config = Config::default();
        config.collector.network_timeout_secs = 3;
        config.collector.section_timeout_secs = 7;
        let ctx = ProbeCtx::new(Arc::new(config), HostSnapshot::capture().await);
        assert_eq!(ctx.network_timeout(), Duration::from_secs(3));
        assert_eq!(ctx.command_timeout(), Duration::from_secs(7));
    }
}
