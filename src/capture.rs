use crate::command::{self, CommandOutcome};
use crate::error::{Error, Result};
use crate::frame::{encode_jpeg, LatestFrame};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    pub seq: u64,
    pub captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<CommandOutcome>,
}

/// Writes the current frame to disk and passes it on for annotation.
#[derive(Clone)]
pub struct CaptureService {
    latest: LatestFrame,
    path: PathBuf,
    annotate_command: Option<String>,
    quality: u8,
}

impl CaptureService {
    pub fn new(
        latest: LatestFrame,
        path: PathBuf,
        annotate_command: Option<String>,
        quality: u8,
    ) -> Self {
        Self {
            latest,
            path,
            annotate_command,
            quality,
        }
    }

    pub async fn capture(&self) -> Result<CaptureOutcome> {
        let frame = self.latest.snapshot().ok_or(Error::NoFrame)?;

        let target = self.path.clone();
        let image = Arc::clone(&frame);
        let quality = self.quality;
        tokio::task::spawn_blocking(move || -> Result<()> {
            let jpeg = encode_jpeg(&image.image, quality)?;
            if let Some(dir) = target.parent().filter(|dir| !dir.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&target, jpeg)?;
            Ok(())
        })
        .await??;

        tracing::info!(path = %self.path.display(), seq = frame.seq, "Image captured");

        let annotation = match &self.annotate_command {
            Some(annotator) => Some(command::run(annotator, [&self.path]).await),
            None => None,
        };

        Ok(CaptureOutcome {
            path: self.path.clone(),
            seq: frame.seq,
            captured_at: frame.captured_at,
            annotation,
        })
    }
}
