//! Single-slot latest-frame buffer shared by the poller, stream clients and
//! the capture path.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// A decoded camera image.
#[derive(Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
    /// Strictly increasing across the process lifetime.
    pub seq: u64,
}

/// Most-recent-wins frame storage. Cloning shares the slot.
#[derive(Clone)]
pub struct LatestFrame {
    slot: Arc<watch::Sender<Option<Arc<Frame>>>>,
    next_seq: Arc<AtomicU64>,
}

impl LatestFrame {
    pub fn new() -> Self {
        let (slot, _) = watch::channel(None);
        Self {
            slot: Arc::new(slot),
            next_seq: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Replaces the stored frame and returns its sequence number.
    pub fn publish(&self, image: RgbImage) -> u64 {
        let mut seq = 0;
        self.slot.send_modify(|slot| {
            seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            *slot = Some(Arc::new(Frame {
                image,
                captured_at: Utc::now(),
                seq,
            }));
        });
        seq
    }

    /// The current frame, if any has been published.
    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.slot.borrow().clone()
    }

    /// Drops the stored frame. Only used while streaming is disabled.
    pub fn clear(&self) {
        self.slot.send_replace(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<Frame>>> {
        self.slot.subscribe()
    }
}

impl Default for LatestFrame {
    fn default() -> Self {
        Self::new()
    }
}

pub fn decode_image(data: &[u8]) -> ImageResult<RgbImage> {
    Ok(image::load_from_memory(data)?.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> ImageResult<Bytes> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality).encode_image(image)?;
    Ok(Bytes::from(jpeg))
}
