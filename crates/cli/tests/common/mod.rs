#![allow(dead_code)]

use image::{Rgb, RgbImage, Rgba, RgbaImage};
use ingest_core::config::AppConfig;
use ingest_core::resizer::BoundingBox;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Config rooted in `root` with small boxes so tests stay fast.
pub fn test_config(root: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.paths.input_dir = root.join("uploads");
    cfg.paths.optimized_dir = root.join("public/images/optimized");
    cfg.paths.thumbnail_dir = root.join("public/images/thumbnails");
    cfg.paths.manifest_path = root.join("public/images/library.json");
    cfg.sizes.optimized = BoundingBox::new(200, 150);
    cfg.sizes.thumbnail = BoundingBox::new(80, 60);
    cfg.watch.debounce_ms = 0;
    cfg.watch.concurrency = 2;
    cfg.watch.max_restarts = 3;
    std::fs::create_dir_all(&cfg.paths.input_dir).unwrap();
    cfg
}

pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

pub fn write_transparent_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 0]))
        .save_with_format(&path, image::ImageFormat::Png)
        .unwrap();
    path
}

pub fn write_garbage(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"\x89PNG\r\n\x1a\n but then nothing useful").unwrap();
    path
}

/// Pushes the file's mtime into the future so it reads as newer than any record.
pub fn touch_future(path: &Path) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();
}

pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
