use crate::resizer::BoundingBox;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub sizes: SizesConfig,
    pub encoding: EncodingConfig,
    pub urls: UrlConfig,
    pub watch: WatchConfig,
    pub scan: ScanConfig,
    pub manifest: ManifestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub input_dir: PathBuf,
    pub optimized_dir: PathBuf,
    pub thumbnail_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("uploads"),
            optimized_dir: PathBuf::from("public/images/optimized"),
            thumbnail_dir: PathBuf::from("public/images/thumbnails"),
            manifest_path: PathBuf::from("public/images/library.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizesConfig {
    pub optimized: BoundingBox,
    pub thumbnail: BoundingBox,
}

impl Default for SizesConfig {
    fn default() -> Self {
        Self {
            optimized: BoundingBox::new(1024, 768),
            thumbnail: BoundingBox::new(400, 300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// JPEG quality, 1-100.
    pub quality: u8,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self { quality: 85 }
    }
}

/// Public URL prefixes written into manifest records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlConfig {
    pub optimized_prefix: String,
    pub thumbnail_prefix: String,
}

impl Default for UrlConfig {
    fn default() -> Self {
        Self {
            optimized_prefix: "/images/optimized".to_string(),
            thumbnail_prefix: "/images/thumbnails".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode {
    #[default]
    Native,
    Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub mode: WatchMode,
    pub poll_interval_ms: u64,
    pub debounce_ms: u64,
    pub max_restarts: u32,
    pub concurrency: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::Native,
            poll_interval_ms: 2_000,
            debounce_ms: 500,
            max_restarts: 5,
            concurrency: 2,
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Glob patterns for files that never qualify for processing.
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    /// Drop records whose source file is gone during the startup sweep.
    pub prune_orphans: bool,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=100).contains(&self.encoding.quality) {
            anyhow::bail!(
                "encoding.quality must be between 1 and 100, got {}",
                self.encoding.quality
            );
        }
        for (label, bbox) in [
            ("sizes.optimized", &self.sizes.optimized),
            ("sizes.thumbnail", &self.sizes.thumbnail),
        ] {
            if bbox.width == 0 || bbox.height == 0 {
                anyhow::bail!("{label} must be non-zero, got {bbox}");
            }
        }
        Ok(())
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("INGEST")
            .separator("__")
            .try_parsing(true),
    );
    let cfg: AppConfig = settings.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}
