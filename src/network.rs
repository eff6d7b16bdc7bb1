use crate::address::{local_address, subnet_for};
use crate::models::{Device, ScanStartStatus, ScanStatusResponse};
use crate::pairing::pair;
use crate::prober::LivenessProber;
use crate::scanner::{host_addresses, sweep, SharedScanState};
use ipnetwork::Ipv4Network;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Runs at most one subnet sweep at a time and keeps its result.
#[derive(Clone)]
pub struct NetworkScanner {
    state: SharedScanState,
    prober: Arc<dyn LivenessProber>,
    concurrency: usize,
}

impl NetworkScanner {
    pub fn new(prober: Arc<dyn LivenessProber>, concurrency: usize) -> Self {
        Self {
            state: SharedScanState::default(),
            prober,
            concurrency,
        }
    }

    /// Sweeps the /24 of this host's LAN address in the background.
    pub fn scan_network(&self) -> ScanStartStatus {
        let subnet = subnet_for(local_address());
        match self.scan_subnet(subnet) {
            Some(_) => ScanStartStatus::Started,
            None => ScanStartStatus::AlreadyScanning,
        }
    }

    /// Starts a sweep of `subnet`. Returns `None`, leaving the running scan and
    /// its devices untouched, if a sweep is already in progress.
    pub fn scan_subnet(&self, subnet: Ipv4Network) -> Option<JoinHandle<()>> {
        let hosts = host_addresses(subnet);
        if !self.state.lock().try_begin(hosts.len()) {
            tracing::info!(subnet = %subnet, "Scan already in progress");
            return None;
        }

        tracing::info!(subnet = %subnet, hosts = hosts.len(), "Scanning network");

        let state = self.state.clone();
        let prober = Arc::clone(&self.prober);
        let concurrency = self.concurrency;

        Some(tokio::spawn(async move {
            let found = sweep(hosts, prober, concurrency, &state).await;
            let paired = pair(&found);

            tracing::info!(
                subnet = %subnet,
                alive = found.len(),
                paired = paired.len(),
                "Scanning complete"
            );
            for device in &paired {
                if let Some(role) = device.role {
                    tracing::info!(ip = %device.address, role = role.as_str(), "Paired device");
                }
            }

            state.lock().finish(paired);
        }))
    }

    #[cfg(test)]
    pub fn is_scanning(&self) -> bool {
        self.state.lock().in_progress()
    }

    pub fn status(&self) -> ScanStatusResponse {
        let state = self.state.lock();
        ScanStatusResponse {
            scanning: state.in_progress(),
            progress: state.progress(),
        }
    }

    pub fn devices(&self) -> Vec<Device> {
        self.state.lock().devices().to_vec()
    }
}
