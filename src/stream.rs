//! Camera selection, stream on/off, and the multipart relay served to browsers.

use crate::error::{Error, Result};
use crate::frame::{encode_jpeg, Frame, LatestFrame};
use crate::poller::{FramePoller, FrameSource, PollerHandle, PollerSettings, PollerStats, PollerStatsSnapshot};
use bytes::{BufMut, Bytes, BytesMut};
use futures::Stream;
use image::ImageResult;
use reqwest::Url;
use serde::Serialize;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinError;

pub const BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

/// Which camera to relay and whether relaying is on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamConfig {
    pub camera_base_url: Option<Url>,
    pub enabled: bool,
    /// Bumped on every camera selection.
    pub generation: u64,
}

impl StreamConfig {
    pub fn is_active(&self) -> bool {
        self.enabled && self.camera_base_url.is_some()
    }
}

/// Owns the stream config and the single frame poller.
///
/// URL and `enabled` are only ever changed together through the config
/// channel, and the poller is stopped before a new camera is bound.
#[derive(Clone)]
pub struct StreamController {
    config: Arc<watch::Sender<StreamConfig>>,
    poller: Arc<Mutex<Option<PollerHandle>>>,
    latest: LatestFrame,
    source: Arc<dyn FrameSource>,
    settings: PollerSettings,
    stats: Arc<PollerStats>,
    jpeg_quality: u8,
}

impl StreamController {
    pub fn new(
        source: Arc<dyn FrameSource>,
        latest: LatestFrame,
        settings: PollerSettings,
        jpeg_quality: u8,
    ) -> Self {
        let (config, _) = watch::channel(StreamConfig::default());
        Self {
            config: Arc::new(config),
            poller: Arc::new(Mutex::new(None)),
            latest,
            source,
            settings,
            stats: Arc::new(PollerStats::default()),
            jpeg_quality,
        }
    }

    pub fn config(&self) -> StreamConfig {
        self.config.borrow().clone()
    }

    pub fn stats(&self) -> PollerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Binds `http://{ip}/` as the camera. Streaming is switched off and any
    /// running poller has exited before the new URL becomes visible.
    pub async fn select_camera(&self, ip: Ipv4Addr) -> Result<Url> {
        let url: Url = format!("http://{ip}/")
            .parse()
            .map_err(|e| Error::Validation(format!("bad camera address {ip}: {e}")))?;

        let mut poller = self.poller.lock().await;
        self.config.send_modify(|config| config.enabled = false);
        if let Some(handle) = poller.take() {
            handle.stop().await;
        }

        self.config.send_modify(|config| {
            config.camera_base_url = Some(url.clone());
            config.enabled = false;
            config.generation += 1;
        });
        self.latest.clear();

        tracing::info!(camera = %url, "Camera selected");
        Ok(url)
    }

    /// Turns streaming on and starts polling if a camera is bound.
    pub async fn start(&self) {
        let mut poller = self.poller.lock().await;
        self.config.send_modify(|config| config.enabled = true);

        if poller.as_ref().is_some_and(PollerHandle::is_running) {
            return;
        }

        let config = self.config();
        let Some(base_url) = config.camera_base_url else {
            tracing::info!("Streaming enabled without a camera selected");
            return;
        };

        *poller = Some(
            FramePoller {
                source: Arc::clone(&self.source),
                base_url,
                generation: config.generation,
                config: self.config.subscribe(),
                latest: self.latest.clone(),
                stats: Arc::clone(&self.stats),
                settings: self.settings,
            }
            .spawn(),
        );
    }

    /// Turns streaming off. Open client streams end on their next frame.
    pub async fn stop(&self) {
        let mut poller = self.poller.lock().await;
        self.config.send_modify(|config| config.enabled = false);
        if let Some(handle) = poller.take() {
            handle.stop().await;
        }
        tracing::info!("Streaming disabled");
    }

    /// A new client stream of multipart JPEG parts.
    ///
    /// Fails with [`Error::NoActiveStream`] unless a camera is bound and
    /// streaming is on. Nothing is emitted until a frame exists; the stream
    /// ends once streaming is switched off.
    pub fn open_stream(&self) -> Result<impl Stream<Item = Bytes> + Send + 'static> {
        if !self.config().is_active() {
            return Err(Error::NoActiveStream);
        }

        let client = ClientStream {
            frames: self.latest.subscribe(),
            config: self.config.subscribe(),
            last_seq: 0,
            quality: self.jpeg_quality,
        };

        Ok(futures::stream::unfold(client, |mut client| async move {
            client.next_part().await.map(|part| (part, client))
        }))
    }
}

struct ClientStream {
    frames: watch::Receiver<Option<Arc<Frame>>>,
    config: watch::Receiver<StreamConfig>,
    last_seq: u64,
    quality: u8,
}

impl ClientStream {
    async fn next_part(&mut self) -> Option<Bytes> {
        loop {
            if !self.config.borrow_and_update().enabled {
                return None;
            }

            let newer = self
                .frames
                .borrow_and_update()
                .clone()
                .filter(|frame| frame.seq > self.last_seq);

            if let Some(frame) = newer {
                self.last_seq = frame.seq;
                let quality = self.quality;
                let encoded =
                    tokio::task::spawn_blocking(move || encode_jpeg(&frame.image, quality)).await;
                if let Some(part) = encoded_part(encoded) {
                    return Some(part);
                }
                // Skip the frame and wait for the next one.
                continue;
            }

            tokio::select! {
                changed = self.frames.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                changed = self.config.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

fn encoded_part(encoded: std::result::Result<ImageResult<Bytes>, JoinError>) -> Option<Bytes> {
    match encoded {
        Ok(Ok(jpeg)) => Some(multipart_part(&jpeg)),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to encode frame for stream");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Encode task failed");
            None
        }
    }
}

/// One `multipart/x-mixed-replace` part.
pub fn multipart_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::decode_image;
    use crate::frame::tests::solid_jpeg;
    use crate::poller::tests::ScriptedCamera;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::time::sleep;

    fn controller(camera: Arc<ScriptedCamera>) -> StreamController {
        StreamController::new(camera, LatestFrame::new(), PollerSettings::default(), 95)
    }

    fn jpeg_payload(part: &[u8]) -> &[u8] {
        let start = part.windows(4).position(|w| w == b"\r\n\r\n").unwrap() + 4;
        &part[start..part.len() - 2]
    }

    #[test]
    fn part_layout() {
        let part = multipart_part(b"JPEG");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\nJPEG\r\n"
        );
    }

    #[tokio::test]
    async fn no_stream_without_camera_or_when_disabled() {
        let stream = controller(Arc::new(ScriptedCamera::new(vec![])));
        assert!(matches!(stream.open_stream(), Err(Error::NoActiveStream)));

        stream.start().await;
        assert!(stream.config().enabled);
        assert!(matches!(stream.open_stream(), Err(Error::NoActiveStream)));

        stream.select_camera(Ipv4Addr::new(10, 0, 0, 5)).await.unwrap();
        assert!(matches!(stream.open_stream(), Err(Error::NoActiveStream)));
    }

    #[tokio::test]
    async fn selecting_a_camera_resets_streaming() {
        let stream = controller(Arc::new(ScriptedCamera::new(vec![])));
        let url = stream.select_camera(Ipv4Addr::new(10, 0, 0, 5)).await.unwrap();
        assert_eq!(url.as_str(), "http://10.0.0.5/");

        stream.start().await;
        assert!(stream.config().is_active());

        stream.select_camera(Ipv4Addr::new(10, 0, 0, 7)).await.unwrap();
        let config = stream.config();
        assert!(!config.enabled);
        assert_eq!(config.generation, 2);
        assert_eq!(config.camera_base_url.unwrap().as_str(), "http://10.0.0.7/");
    }

    #[tokio::test(start_paused = true)]
    async fn clients_see_monotonic_frames_and_latest_is_last_decoded() {
        const FRAMES: u8 = 6;
        let camera = Arc::new(ScriptedCamera::new(
            (1..=FRAMES).map(|i| Ok(solid_jpeg(i * 40, 0, 0))).collect(),
        ));
        let stream = controller(Arc::clone(&camera));
        stream.select_camera(Ipv4Addr::new(10, 0, 0, 5)).await.unwrap();
        stream.start().await;

        let clients: Vec<_> = (0..2)
            .map(|_| {
                let parts = stream.open_stream().unwrap();
                tokio::spawn(parts.collect::<Vec<Bytes>>())
            })
            .collect();

        // Six good frames, then the camera keeps failing.
        sleep(Duration::from_secs(5)).await;
        assert_eq!(stream.stats().frames_published, u64::from(FRAMES));

        let latest = stream.latest.snapshot().unwrap();
        assert_eq!(latest.seq, u64::from(FRAMES));
        let red = latest.image.get_pixel(0, 0)[0];
        assert!(red.abs_diff(FRAMES * 40) <= 6, "red channel was {red}");

        stream.stop().await;

        for client in clients {
            let parts = client.await.unwrap();
            assert!(!parts.is_empty());
            let reds: Vec<u8> = parts
                .iter()
                .map(|part| decode_image(jpeg_payload(part)).unwrap().get_pixel(0, 0)[0])
                .collect();
            assert!(reds.windows(2).all(|w| w[0] < w[1]), "frames went backwards: {reds:?}");
        }
    }

    #[tokio::test]
    async fn crashed_encoder_yields_no_part() {
        let crashed = tokio::task::spawn_blocking(|| -> ImageResult<Bytes> {
            panic!("encoder crashed")
        })
        .await;
        assert!(crashed.is_err());
        assert!(encoded_part(crashed).is_none());
        assert!(encoded_part(Ok(Ok(Bytes::from_static(b"JPEG")))).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unencodable_frame_does_not_end_client_stream() {
        let stream = controller(Arc::new(ScriptedCamera::new(vec![])));
        stream.select_camera(Ipv4Addr::new(10, 0, 0, 5)).await.unwrap();
        stream.start().await;

        let mut parts = Box::pin(stream.open_stream().unwrap());
        // Too wide for a JPEG.
        stream.latest.publish(image::RgbImage::new(70_000, 1));
        let first = tokio::spawn(async move {
            let part = parts.next().await;
            (part, parts)
        });
        sleep(Duration::from_millis(10)).await;
        stream.latest.publish(crate::frame::tests::solid(0, 0, 250));

        let (part, _parts) = first.await.unwrap();
        let part = part.expect("client stream ended early");
        let blue = decode_image(jpeg_payload(&part)).unwrap().get_pixel(0, 0)[2];
        assert!(blue.abs_diff(250) <= 6, "blue channel was {blue}");
        stream.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_halts_fetching() {
        let camera = Arc::new(ScriptedCamera::new(
            (0..500).map(|_| Ok(solid_jpeg(9, 9, 9))).collect(),
        ));
        let stream = controller(Arc::clone(&camera));
        stream.select_camera(Ipv4Addr::new(10, 0, 0, 5)).await.unwrap();
        stream.start().await;

        sleep(Duration::from_secs(1)).await;
        stream.stop().await;
        let settled = camera.calls();
        assert!(settled > 0);

        sleep(Duration::from_secs(3)).await;
        assert_eq!(camera.calls(), settled);
        assert!(stream.latest.snapshot().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let camera = Arc::new(ScriptedCamera::new(vec![]));
        let stream = controller(Arc::clone(&camera));
        stream.select_camera(Ipv4Addr::new(10, 0, 0, 5)).await.unwrap();
        stream.start().await;
        stream.start().await;

        // A single failing poller fetches once per backoff.
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(camera.calls(), 3);
        stream.stop().await;
    }
}
