//! Core library: configuration, metadata extraction, resizing, manifest
//! storage, directory watching, and the ingestion pipeline.

pub mod config;
pub mod error;
pub mod extractor;
pub mod manifest;
pub mod models;
pub mod pipeline;
pub mod resizer;
pub mod scanner;
pub mod watcher;
