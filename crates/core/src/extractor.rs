use crate::error::ProcessError;
use chrono::{DateTime, Utc};
use image::ImageReader;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct SourceMetadata {
    pub width: u32,
    pub height: u32,
    /// Lowercase format name sniffed from the file content, e.g. `png`.
    pub format: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub modified: DateTime<Utc>,
}

/// Reads intrinsic properties of an image without decoding its pixels.
pub fn extract(path: &Path) -> Result<SourceMetadata, ProcessError> {
    let meta = fs::metadata(path).map_err(|e| ProcessError::unreadable(path, e))?;
    if !meta.is_file() {
        return Err(ProcessError::unreadable(path, "not a regular file"));
    }

    let reader = ImageReader::open(path)
        .map_err(|e| ProcessError::unreadable(path, e))?
        .with_guessed_format()
        .map_err(|e| ProcessError::unreadable(path, e))?;
    let format = reader
        .format()
        .ok_or_else(|| ProcessError::unreadable(path, "unrecognized image format"))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ProcessError::unreadable(path, e))?;
    if width == 0 || height == 0 {
        return Err(ProcessError::unreadable(path, "image has no pixels"));
    }

    let modified = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .map_err(|e| ProcessError::unreadable(path, e))?;

    Ok(SourceMetadata {
        width,
        height,
        format: format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("unknown")
            .to_string(),
        size: meta.len(),
        created: meta.created().ok().map(DateTime::<Utc>::from),
        modified,
    })
}

/// Modification time of `path`, used by the skip guard.
pub fn file_modified(path: &Path) -> std::io::Result<DateTime<Utc>> {
    fs::metadata(path)?.modified().map(DateTime::<Utc>::from)
}
