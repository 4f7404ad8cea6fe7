//! Host-backed telemetry, identity and screenshot producers.

use std::{
    sync::{Mutex, MutexGuard},
    time::Instant,
};

use shell_bridge_core::{
    CollaboratorError, IdentityProvider, MetricsSnapshot, ScreenshotProducer, TelemetryProducer,
};
use sysinfo::{Disks, Networks, System};

/// Files holding a stable per-machine id, in lookup order.
const MACHINE_ID_PATHS: &[&str] = &["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Telemetry sampled from the local host.
///
/// CPU usage and network rates are measured between consecutive samples, so
/// the first sample reports them as zero.
pub struct SysinfoTelemetry {
    state: Mutex<Sampler>,
}

struct Sampler {
    system: System,
    /// Interface byte counters (received, transmitted) at `last_sample`.
    net_totals: (u64, u64),
    last_sample: Instant,
}

impl SysinfoTelemetry {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            state: Mutex::new(Sampler {
                system,
                net_totals: network_totals(),
                last_sample: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Sampler> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for SysinfoTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryProducer for SysinfoTelemetry {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&self) -> MetricsSnapshot {
        let mut sampler = self.lock();
        sampler.system.refresh_cpu_usage();
        sampler.system.refresh_memory();

        let now = Instant::now();
        let elapsed = now.duration_since(sampler.last_sample).as_secs_f64();
        let (rx, tx) = network_totals();
        let (prev_rx, prev_tx) = sampler.net_totals;
        sampler.net_totals = (rx, tx);
        sampler.last_sample = now;

        let kbps = |bytes: u64| {
            if elapsed > 0.0 {
                bytes as f64 / 1024.0 / elapsed
            } else {
                0.0
            }
        };

        let (disk_used, disk_total) = Disks::new_with_refreshed_list()
            .list()
            .iter()
            .fold((0u64, 0u64), |(used, total), disk| {
                (
                    used + disk.total_space().saturating_sub(disk.available_space()),
                    total + disk.total_space(),
                )
            });

        MetricsSnapshot {
            cpu_percent: f64::from(sampler.system.global_cpu_usage()),
            ram_percent: percent(sampler.system.used_memory(), sampler.system.total_memory()),
            disk_percent: percent(disk_used, disk_total),
            upload_kbps: kbps(tx.saturating_sub(prev_tx)),
            download_kbps: kbps(rx.saturating_sub(prev_rx)),
        }
    }
}

fn network_totals() -> (u64, u64) {
    Networks::new_with_refreshed_list()
        .list()
        .values()
        .fold((0, 0), |(rx, tx), data| {
            (rx + data.total_received(), tx + data.total_transmitted())
        })
}

#[allow(clippy::cast_precision_loss)]
fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Identity of this host, resolved once.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    device_id: String,
    device_name: String,
    os_description: String,
}

impl HostIdentity {
    /// Read the machine id, host name and OS description.
    ///
    /// Without a machine id a random id is used for this process.
    pub fn detect() -> Self {
        let device_id = MACHINE_ID_PATHS
            .iter()
            .find_map(|path| read_machine_id(path))
            .unwrap_or_else(|| {
                tracing::warn!("No machine id found, using a random device id");
                uuid::Uuid::new_v4().to_string()
            });

        Self {
            device_id,
            device_name: System::host_name()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "unknown".to_string()),
            os_description: System::long_os_version()
                .filter(|os| !os.is_empty())
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
        }
    }
}

fn read_machine_id(path: &str) -> Option<String> {
    let id = std::fs::read_to_string(path).ok()?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

impl IdentityProvider for HostIdentity {
    fn device_id(&self) -> String {
        self.device_id.clone()
    }

    fn device_name(&self) -> String {
        self.device_name.clone()
    }

    fn os_description(&self) -> String {
        self.os_description.clone()
    }
}

/// Screen capture is not available on this build.
pub struct UnsupportedScreenshot;

impl ScreenshotProducer for UnsupportedScreenshot {
    fn capture(&self) -> Result<Vec<u8>, CollaboratorError> {
        Err(CollaboratorError::Unsupported)
    }
}
