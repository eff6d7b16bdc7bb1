use crate::capture::CaptureService;
use crate::color::ColorPicker;
use crate::config::Config;
use crate::frame::LatestFrame;
use crate::network::NetworkScanner;
use crate::plotter::PlotterJob;
use crate::poller::{FrameSource, HttpFrameSource};
use crate::prober::{HostProber, LivenessProber};
use crate::stream::StreamController;
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything the HTTP handlers share.
#[derive(Clone)]
pub struct AppContext {
    pub scanner: NetworkScanner,
    pub stream: StreamController,
    pub latest: LatestFrame,
    pub capture: CaptureService,
    pub colors: ColorPicker,
    pub plotter: PlotterJob,
    pub static_dir: PathBuf,
    pub processed_image: PathBuf,
}

impl AppContext {
    /// Wires the real ICMP/ping prober and HTTP camera client.
    pub async fn build(config: &Config) -> anyhow::Result<Self> {
        let prober = HostProber::new(
            config.probe_method,
            config.probe_timeout(),
            config.resolve_timeout(),
        )
        .await;
        tracing::info!(method = ?prober.method(), "Liveness prober ready");

        let source = HttpFrameSource::new(config.poller_settings().fetch_timeout)
            .context("failed to build camera HTTP client")?;

        Ok(Self::with_parts(config, Arc::new(prober), Arc::new(source)))
    }

    pub fn with_parts(
        config: &Config,
        prober: Arc<dyn LivenessProber>,
        source: Arc<dyn FrameSource>,
    ) -> Self {
        let latest = LatestFrame::new();
        Self {
            scanner: NetworkScanner::new(prober, config.scan_concurrency),
            stream: StreamController::new(
                source,
                latest.clone(),
                config.poller_settings(),
                config.jpeg_quality,
            ),
            capture: CaptureService::new(
                latest.clone(),
                config.capture_path.clone(),
                config.annotate_command.clone(),
                config.jpeg_quality,
            ),
            colors: ColorPicker::new(config.color_image.clone(), config.color_output.clone()),
            plotter: PlotterJob::new(
                config.plot_command.clone(),
                config.color_image.clone(),
                config.static_dir.clone(),
            ),
            static_dir: config.static_dir.clone(),
            processed_image: config.processed_image.clone(),
            latest,
        }
    }
}
