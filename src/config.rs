//! Runtime configuration, from flags or `NAIL_RIG_*` environment variables.

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// How liveness probes reach a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProbeMethod {
    /// Raw ICMP echo (needs CAP_NET_RAW or root)
    Icmp,
    /// The system `ping` utility
    Command,
}

/// Nail printer rig - device discovery and camera stream relay
#[derive(Debug, Clone, Parser)]
#[command(name = "nail-printer-rig")]
#[command(version)]
#[command(about = "Discovers the camera/plotter pair on the LAN and relays the camera feed")]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "NAIL_RIG_BIND", default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// Liveness probe method
    #[arg(long, env = "NAIL_RIG_PROBE_METHOD", value_enum, default_value_t = ProbeMethod::Icmp)]
    pub probe_method: ProbeMethod,

    /// Liveness probe timeout in milliseconds
    #[arg(long, env = "NAIL_RIG_PROBE_TIMEOUT_MS", default_value_t = 1000)]
    pub probe_timeout_ms: u64,

    /// Reverse hostname lookup timeout in milliseconds
    #[arg(long, env = "NAIL_RIG_RESOLVE_TIMEOUT_MS", default_value_t = 2000)]
    pub resolve_timeout_ms: u64,

    /// Maximum number of probes in flight during a sweep
    #[arg(long, env = "NAIL_RIG_SCAN_CONCURRENCY", default_value_t = 256)]
    pub scan_concurrency: usize,

    /// Camera snapshot request timeout in milliseconds
    #[arg(long, env = "NAIL_RIG_FETCH_TIMEOUT_MS", default_value_t = 2000)]
    pub fetch_timeout_ms: u64,

    /// Delay between successful snapshot fetches in milliseconds
    #[arg(long, env = "NAIL_RIG_POLL_INTERVAL_MS", default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Delay after a failed snapshot fetch in milliseconds
    #[arg(long, env = "NAIL_RIG_RETRY_BACKOFF_MS", default_value_t = 1000)]
    pub retry_backoff_ms: u64,

    /// JPEG quality for re-encoded stream frames (1-100)
    #[arg(long, env = "NAIL_RIG_JPEG_QUALITY", default_value_t = 95)]
    pub jpeg_quality: u8,

    /// Where captured frames are written
    #[arg(long, env = "NAIL_RIG_CAPTURE_PATH", default_value = "captured_image.jpg")]
    pub capture_path: PathBuf,

    /// Program run on every capture; the image path is appended as last argument
    #[arg(long, env = "NAIL_RIG_ANNOTATE_COMMAND")]
    pub annotate_command: Option<String>,

    /// Directory served under `/static`
    #[arg(long, env = "NAIL_RIG_STATIC_DIR", default_value = "static")]
    pub static_dir: PathBuf,

    /// Image written by the annotation program, shown by `/show_processed_image`
    #[arg(long, env = "NAIL_RIG_PROCESSED_IMAGE", default_value = "static/annotated_output.jpg")]
    pub processed_image: PathBuf,

    /// Program run by `/run_pycode` to turn the picked colour into plotter output
    #[arg(long, env = "NAIL_RIG_PLOT_COMMAND")]
    pub plot_command: Option<String>,

    /// Image sampled by the color picker
    #[arg(long, env = "NAIL_RIG_COLOR_IMAGE", default_value = "static/image.png")]
    pub color_image: PathBuf,

    /// File receiving the picked CMYK values
    #[arg(long, env = "NAIL_RIG_COLOR_OUTPUT", default_value = "colour.txt")]
    pub color_output: PathBuf,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.scan_concurrency == 0 {
            bail!("--scan-concurrency must be at least 1");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            bail!("--jpeg-quality must be between 1 and 100");
        }
        if let Some(cmd) = &self.annotate_command {
            if cmd.split_whitespace().next().is_none() {
                bail!("--annotate-command must not be empty");
            }
        }
        if let Some(cmd) = &self.plot_command {
            if cmd.split_whitespace().next().is_none() {
                bail!("--plot-command must not be empty");
            }
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }

    pub fn poller_settings(&self) -> crate::poller::PollerSettings {
        crate::poller::PollerSettings {
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}
