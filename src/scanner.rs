use crate::models::{Device, ScanProgress};
use crate::prober::LivenessProber;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Devices seen by the current (or last) sweep.
#[derive(Debug, Default)]
pub struct ScanState {
    devices: Vec<Device>,
    in_progress: bool,
    progress: ScanProgress,
}

impl ScanState {
    /// Claims the scanner. Clears the previous result set on success.
    pub fn try_begin(&mut self, total: usize) -> bool {
        if self.in_progress {
            return false;
        }
        self.in_progress = true;
        self.devices.clear();
        self.progress = ScanProgress {
            total,
            ..ScanProgress::default()
        };
        true
    }

    pub fn record(&mut self, found: Option<Device>) {
        self.progress.probed += 1;
        if let Some(device) = found {
            self.progress.alive += 1;
            self.devices.push(device);
        }
    }

    pub fn finish(&mut self, devices: Vec<Device>) {
        self.devices = devices;
        self.in_progress = false;
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress
    }
}

#[derive(Debug, Clone, Default)]
pub struct SharedScanState(Arc<Mutex<ScanState>>);

impl SharedScanState {
    pub fn lock(&self) -> MutexGuard<'_, ScanState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Every usable host of `subnet`; network and broadcast addresses are skipped
/// for prefixes that have them.
pub fn host_addresses(subnet: Ipv4Network) -> Vec<Ipv4Addr> {
    let network = subnet.network();
    let broadcast = subnet.broadcast();
    subnet
        .iter()
        .filter(|ip| subnet.prefix() >= 31 || (*ip != network && *ip != broadcast))
        .collect()
}

/// Probes `hosts` with at most `concurrency` probes in flight and returns once
/// every probe has finished. Live hosts are appended to `state` as they answer,
/// in completion order.
pub async fn sweep(
    hosts: Vec<Ipv4Addr>,
    prober: Arc<dyn LivenessProber>,
    concurrency: usize,
    state: &SharedScanState,
) -> Vec<Device> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut probes = JoinSet::new();

    for ip in hosts {
        let permits = Arc::clone(&permits);
        let prober = Arc::clone(&prober);
        probes.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok()?;
            prober.probe(ip).await
        });
    }

    let mut found = Vec::new();
    while let Some(joined) = probes.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "Probe task failed");
                None
            }
        };
        if let Some(device) = &result {
            found.push(device.clone());
        }
        state.lock().record(result);
    }

    found
}
