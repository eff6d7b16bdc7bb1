use crate::error::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cmyk {
    pub c: f64,
    pub m: f64,
    pub y: f64,
    pub k: f64,
}

pub fn rgb_to_cmyk(r: u8, g: u8, b: u8) -> Cmyk {
    if (r, g, b) == (0, 0, 0) {
        return Cmyk {
            c: 0.0,
            m: 0.0,
            y: 0.0,
            k: 1.0,
        };
    }

    let c = 1.0 - f64::from(r) / 255.0;
    let m = 1.0 - f64::from(g) / 255.0;
    let y = 1.0 - f64::from(b) / 255.0;
    let k = c.min(m).min(y);
    // k < 1 for anything but pure black
    let scale = 1.0 - k;

    Cmyk {
        c: (c - k) / scale,
        m: (m - k) / scale,
        y: (y - k) / scale,
        k,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColorSample {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    #[serde(flatten)]
    pub cmyk: Cmyk,
}

/// Samples pixels of a reference image for the plotter's ink mix.
#[derive(Clone)]
pub struct ColorPicker {
    image_path: PathBuf,
    output_path: PathBuf,
}

impl ColorPicker {
    pub fn new(image_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            image_path,
            output_path,
        }
    }

    /// Reads pixel `(x, y)` and records its CMYK mix in the output file.
    pub async fn pick(&self, x: u32, y: u32) -> Result<ColorSample> {
        let path = self.image_path.clone();
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::NotFound(format!("image {}", path.display())));
        }

        let image = tokio::task::spawn_blocking(move || image::open(&path).map(|img| img.to_rgb8()))
            .await??;

        if x >= image.width() || y >= image.height() {
            return Err(Error::Validation(format!(
                "pixel ({x}, {y}) outside {}x{} image",
                image.width(),
                image.height()
            )));
        }

        let [r, g, b] = image.get_pixel(x, y).0;
        let cmyk = rgb_to_cmyk(r, g, b);

        tokio::fs::write(&self.output_path, format_cmyk(&cmyk)).await?;
        tracing::info!(x, y, r, g, b, output = %self.output_path.display(), "Picked color");

        Ok(ColorSample { r, g, b, cmyk })
    }
}

fn format_cmyk(cmyk: &Cmyk) -> String {
    format!(
        "C:{:.2}\nM:{:.2}\nY:{:.2}\nK:{:.2}\n",
        cmyk.c, cmyk.m, cmyk.y, cmyk.k
    )
}
