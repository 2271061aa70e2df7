use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Extension every derivative is written with.
pub const OUTPUT_EXTENSION: &str = "jpg";

pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSet {
    pub original: Dimensions,
    pub optimized: Dimensions,
    pub thumbnail: Dimensions,
}

/// One manifest entry per processed source image. Field names are part of the
/// JSON contract with the web layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub name: String,
    pub filename: String,
    pub extension: String,
    pub url: String,
    pub thumbnail_url: String,
    pub original_size: u64,
    pub optimized_size: u64,
    pub thumbnail_size: u64,
    pub dimensions: DimensionSet,
    pub compression: f64,
    pub processed: DateTime<Utc>,
}

/// Lowercases the file stem and collapses every run of non `[a-z0-9]`
/// characters into one hyphen, trimming hyphens at both ends.
pub fn normalize_name(file_name: &str) -> Option<String> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    let mut out = String::with_capacity(stem.len());
    let mut pending_hyphen = false;
    for c in stem.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    (!out.is_empty()).then_some(out)
}

/// Percentage saved going from `original` to `optimized` bytes, one decimal.
pub fn compression_percent(original: u64, optimized: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    round1((original as f64 - optimized as f64) / original as f64 * 100.0)
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
