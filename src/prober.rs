use crate::config::ProbeMethod;
use crate::models::{Device, Hostname};
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_icmp_echo::Pinger;

/// Checks one address for liveness and names it.
#[async_trait]
pub trait LivenessProber: Send + Sync {
    /// `None` when the host did not answer within the probe timeout.
    async fn probe(&self, ip: Ipv4Addr) -> Option<Device>;
}

enum Backend {
    Icmp(Arc<Pinger>),
    Command,
}

pub struct HostProber {
    backend: Backend,
    probe_timeout: Duration,
    resolve_timeout: Duration,
}

impl HostProber {
    /// Opens the ICMP socket when requested; without raw socket privileges this
    /// falls back to the system `ping` utility.
    pub async fn new(method: ProbeMethod, probe_timeout: Duration, resolve_timeout: Duration) -> Self {
        let backend = match method {
            ProbeMethod::Icmp => match Pinger::new().await {
                Ok(pinger) => Backend::Icmp(Arc::new(pinger)),
                Err(e) => {
                    tracing::warn!(
                        error = ?e,
                        "Cannot open ICMP socket, falling back to system ping"
                    );
                    Backend::Command
                }
            },
            ProbeMethod::Command => Backend::Command,
        };

        Self {
            backend,
            probe_timeout,
            resolve_timeout,
        }
    }

    pub fn method(&self) -> ProbeMethod {
        match self.backend {
            Backend::Icmp(_) => ProbeMethod::Icmp,
            Backend::Command => ProbeMethod::Command,
        }
    }

    async fn is_reachable(&self, ip: Ipv4Addr) -> bool {
        match &self.backend {
            Backend::Icmp(pinger) => {
                let ident = rand::random::<u16>();
                match pinger
                    .ping(IpAddr::V4(ip), ident, 0, self.probe_timeout)
                    .await
                {
                    Ok(Some(_rtt)) => true,
                    Ok(None) => false,
                    Err(e) => {
                        tracing::debug!(ip = %ip, error = ?e, "ICMP probe failed");
                        false
                    }
                }
            }
            Backend::Command => ping_command(ip, self.probe_timeout).await,
        }
    }
}

#[async_trait]
impl LivenessProber for HostProber {
    async fn probe(&self, ip: Ipv4Addr) -> Option<Device> {
        if !self.is_reachable(ip).await {
            return None;
        }
        let hostname = resolve_hostname(ip, self.resolve_timeout).await;
        tracing::info!(ip = %ip, hostname = %hostname, "Found live host");
        Some(Device::new(ip, hostname))
    }
}

// `ping -W` only takes whole seconds.
fn ping_wait_secs(limit: Duration) -> u64 {
    let secs = limit.as_secs() + u64::from(limit.subsec_nanos() > 0);
    secs.max(1)
}

fn ping_args(ip: Ipv4Addr, limit: Duration) -> Vec<String> {
    vec![
        "-c".to_string(),
        "1".to_string(),
        "-W".to_string(),
        ping_wait_secs(limit).to_string(),
        ip.to_string(),
    ]
}

async fn ping_command(ip: Ipv4Addr, limit: Duration) -> bool {
    let mut cmd = Command::new("ping");
    cmd.args(ping_args(ip, limit))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    // The utility enforces its own deadline; this only guards against a hung process.
    let guard = Duration::from_secs(ping_wait_secs(limit) + 1);
    match timeout(guard, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::warn!(ip = %ip, error = %e, "Failed to run ping");
            false
        }
        Err(_) => false,
    }
}

/// Reverse lookup on the blocking pool, bounded by `limit`.
pub async fn resolve_hostname(ip: Ipv4Addr, limit: Duration) -> Hostname {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&IpAddr::V4(ip)));

    match timeout(limit, lookup).await {
        Ok(Ok(Ok(name))) => Hostname::from_lookup(ip, Some(name)),
        Ok(Ok(Err(e))) => {
            tracing::debug!(ip = %ip, error = %e, "Reverse lookup failed");
            Hostname::Unknown
        }
        Ok(Err(e)) => {
            tracing::warn!(ip = %ip, error = %e, "Reverse lookup task failed");
            Hostname::Unknown
        }
        Err(_) => {
            tracing::debug!(ip = %ip, "Reverse lookup timed out");
            Hostname::Unknown
        }
    }
}
