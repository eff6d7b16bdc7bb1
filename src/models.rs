use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

// Result of a reverse lookup for a live host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hostname {
    Resolved(String),
    Unknown,
}

impl Hostname {
    /// Normalizes a lookup answer. Empty names and names that merely echo the
    /// address back are treated as unresolved.
    pub fn from_lookup(ip: Ipv4Addr, name: Option<String>) -> Self {
        match name {
            Some(name) => {
                let name = name.trim().trim_end_matches('.');
                if name.is_empty() || name == ip.to_string() {
                    Hostname::Unknown
                } else {
                    Hostname::Resolved(name.to_string())
                }
            }
            None => Hostname::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Hostname::Unknown)
    }
}

impl fmt::Display for Hostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hostname::Resolved(name) => f.write_str(name),
            Hostname::Unknown => f.write_str("Unknown Device"),
        }
    }
}

// Role assigned by the pairing heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Camera,
    Plotter,
}

impl DeviceRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Camera => "camera",
            DeviceRole::Plotter => "plotter",
        }
    }
}

// Struct to hold information about a live host found by a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub address: Ipv4Addr,
    pub hostname: Hostname,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<DeviceRole>,
}

impl Device {
    pub fn new(address: Ipv4Addr, hostname: Hostname) -> Self {
        Self {
            address,
            hostname,
            role: None,
        }
    }

    pub fn with_role(mut self, role: DeviceRole) -> Self {
        self.role = Some(role);
        self
    }
}

/// Answer to a scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStartStatus {
    Started,
    AlreadyScanning,
}

#[derive(Debug, Clone, Serialize)]
pub struct StartScanResponse {
    pub status: ScanStartStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub total: usize,
    pub probed: usize,
    pub alive: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanStatusResponse {
    pub scanning: bool,
    pub progress: ScanProgress,
}
