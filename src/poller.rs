use crate::frame::{decode_image, LatestFrame};
use crate::stream::StreamConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

/// Why a snapshot could not be obtained. Never leaves the poll loop.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("camera answered {0}")]
    Status(StatusCode),
    #[error("timed out")]
    Timeout,
    #[error("invalid camera url: {0}")]
    Url(#[from] url::ParseError),
}

/// Where snapshots come from.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn fetch(&self, base: &Url) -> Result<Bytes, FetchError>;
}

/// `GET {base}/capture` on the camera board.
pub struct HttpFrameSource {
    client: reqwest::Client,
}

impl HttpFrameSource {
    pub fn new(fetch_timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(fetch_timeout).build()?;
        Ok(Self { client })
    }
}

pub fn capture_url(base: &Url) -> Result<Url, url::ParseError> {
    Url::parse(&format!("{}/capture", base.as_str().trim_end_matches('/')))
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn fetch(&self, base: &Url) -> Result<Bytes, FetchError> {
        let response = self.client.get(capture_url(base)?).send().await?;
        if response.status() != StatusCode::OK {
            return Err(FetchError::Status(response.status()));
        }
        Ok(response.bytes().await?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    pub fetch_timeout: Duration,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct PollerStats {
    fetches: AtomicU64,
    frames_published: AtomicU64,
    fetch_failures: AtomicU64,
    decode_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStatsSnapshot {
    pub fetches: u64,
    pub frames_published: u64,
    pub fetch_failures: u64,
    pub decode_failures: u64,
}

impl PollerStats {
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// A running poll loop.
pub struct PollerHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Frame poller task failed");
        }
    }
}

/// Polls one camera and feeds [`LatestFrame`] until cancelled.
pub struct FramePoller {
    pub source: Arc<dyn FrameSource>,
    pub base_url: Url,
    /// Frames are only published while the config still names this generation.
    pub generation: u64,
    pub config: watch::Receiver<StreamConfig>,
    pub latest: LatestFrame,
    pub stats: Arc<PollerStats>,
    pub settings: PollerSettings,
}

impl FramePoller {
    pub fn spawn(self) -> PollerHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        PollerHandle { token, task }
    }

    fn is_current(&self) -> bool {
        let config = self.config.borrow();
        config.enabled && config.generation == self.generation
    }

    async fn run(self, token: CancellationToken) {
        tracing::info!(camera = %self.base_url, "Frame poller started");

        while !token.is_cancelled() && self.is_current() {
            let delay = tokio::select! {
                _ = token.cancelled() => break,
                outcome = self.poll_once() => match outcome {
                    Ok(seq) => {
                        tracing::trace!(seq, "Published frame");
                        self.settings.poll_interval
                    }
                    Err(()) => self.settings.retry_backoff,
                },
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }

        tracing::info!(camera = %self.base_url, "Frame poller stopped");
    }

    /// One fetch/decode/publish cycle. Failures are logged and counted here.
    async fn poll_once(&self) -> Result<u64, ()> {
        self.stats.fetches.fetch_add(1, Ordering::Relaxed);

        let fetched = match timeout(self.settings.fetch_timeout, self.source.fetch(&self.base_url)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout),
        };
        let body = fetched.map_err(|e| {
            self.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(camera = %self.base_url, error = %e, "Error fetching frame");
        })?;

        let decoded = tokio::task::spawn_blocking(move || decode_image(&body))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Decode task failed");
            })?;
        let image = decoded.map_err(|e| {
            self.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(camera = %self.base_url, error = %e, "Undecodable frame");
        })?;

        // The camera may have been switched while the request was in flight.
        if !self.is_current() {
            return Err(());
        }

        let seq = self.latest.publish(image);
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        Ok(seq)
    }
}
