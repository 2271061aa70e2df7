//! Aspect-preserving downscale and JPEG re-encode of source images.

use crate::error::ProcessError;
use crate::models::Dimensions;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A written derivative file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Derivative {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub size: u64,
}

impl Derivative {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Output size for a `width`x`height` source constrained by `bbox`.
///
/// Sources that already fit are returned unchanged. Otherwise a source wider
/// than the box (by aspect ratio) is clamped on width, anything else on height.
/// An empty box yields `(0, 0)`.
pub fn fit_within(width: u32, height: u32, bbox: BoundingBox) -> (u32, u32) {
    if bbox.is_empty() {
        return (0, 0);
    }
    if width <= bbox.width && height <= bbox.height {
        return (width, height);
    }
    if width == 0 || height == 0 {
        return (width.min(bbox.width), height.min(bbox.height));
    }

    let ratio = width as f64 / height as f64;
    if ratio > bbox.aspect_ratio() {
        let derived = (bbox.width as f64 / ratio).round() as u32;
        (bbox.width, derived.clamp(1, bbox.height))
    } else {
        let derived = (bbox.height as f64 * ratio).round() as u32;
        (derived.clamp(1, bbox.width), bbox.height)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Resizer {
    quality: u8,
}

impl Resizer {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Decodes `source`, sniffing the format from its content. Animated
    /// sources yield their first frame.
    pub fn decode(&self, source: &Path) -> Result<DynamicImage, ProcessError> {
        ImageReader::open(source)
            .map_err(|e| ProcessError::unreadable(source, e))?
            .with_guessed_format()
            .map_err(|e| ProcessError::unreadable(source, e))?
            .decode()
            .map_err(|e| ProcessError::unreadable(source, e))
    }

    /// Decode + render in one call.
    pub fn resize(
        &self,
        source: &Path,
        bbox: BoundingBox,
        dest: &Path,
    ) -> Result<Derivative, ProcessError> {
        let img = self.decode(source)?;
        self.render(&img, bbox, dest)
    }

    /// Scales `img` into `bbox` and writes it to `dest` as JPEG. The file is
    /// staged next to `dest` and renamed so readers never see a partial image.
    pub fn render(
        &self,
        img: &DynamicImage,
        bbox: BoundingBox,
        dest: &Path,
    ) -> Result<Derivative, ProcessError> {
        if bbox.is_empty() {
            return Err(ProcessError::encode(dest, format!("empty bounding box {bbox}")));
        }
        let (src_w, src_h) = img.dimensions();
        let (width, height) = fit_within(src_w, src_h, bbox);

        let rgb = if (width, height) == (src_w, src_h) {
            flatten(img)
        } else {
            flatten(&img.resize_exact(width, height, FilterType::Lanczos3))
        };

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ProcessError::encode(dest, e))?;
        }
        let tmp = dest.with_extension("jpg.tmp");
        let written = self
            .write_jpeg(&rgb, &tmp)
            .and_then(|_| fs::rename(&tmp, dest).map_err(|e| e.to_string()));
        if let Err(reason) = written {
            let _ = fs::remove_file(&tmp);
            return Err(ProcessError::encode(dest, reason));
        }

        let size = fs::metadata(dest)
            .map_err(|e| ProcessError::encode(dest, e))?
            .len();
        Ok(Derivative {
            path: dest.to_path_buf(),
            width,
            height,
            size,
        })
    }

    fn write_jpeg(&self, rgb: &RgbImage, path: &Path) -> Result<(), String> {
        let file = fs::File::create(path).map_err(|e| e.to_string())?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode_image(rgb)
            .map_err(|e| e.to_string())?;
        writer.flush().map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// Drops the alpha channel by compositing onto white.
fn flatten(img: &DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }
    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (x, y, px) in rgba.enumerate_pixels() {
        let [r, g, b, a] = px.0;
        let alpha = a as u32;
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        out.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    out
}
