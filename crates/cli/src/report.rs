use anyhow::Result;
use ingest_core::manifest::ManifestStats;
use ingest_core::pipeline::BatchSummary;

pub fn render_batch(mode: &str, summary: &BatchSummary, json: bool) -> Result<String> {
    if json {
        let value = serde_json::json!({
            "status": if summary.failed.is_empty() { "ok" } else { "partial" },
            "mode": mode,
            "processed": summary.processed,
            "skipped": summary.skipped,
            "ignored": summary.ignored,
            "failed": summary.failed,
        });
        return Ok(serde_json::to_string_pretty(&value)?);
    }

    let mut out = format!(
        "{mode}: processed {}, skipped {}, ignored {}, failed {}",
        summary.processed.len(),
        summary.skipped,
        summary.ignored,
        summary.failed.len()
    );
    for failure in &summary.failed {
        out.push_str(&format!("\n  failed {}: {}", failure.path.display(), failure.error));
    }
    Ok(out)
}

pub fn render_stats(stats: &ManifestStats, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(stats)?);
    }
    Ok(format!(
        "images: {}\noriginal: {} bytes\noptimized: {} bytes\nthumbnails: {} bytes\ncompression: {:.1}%",
        stats.count,
        stats.total_original_size,
        stats.total_optimized_size,
        stats.total_thumbnail_size,
        stats.avg_compression
    ))
}

pub fn render_pruned(removed: &[String], dry_run: bool, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(&serde_json::json!({
            "dry_run": dry_run,
            "removed": removed,
        }))?);
    }
    let verb = if dry_run { "would remove" } else { "removed" };
    let mut out = format!("{verb} {} orphaned records", removed.len());
    for name in removed {
        out.push_str(&format!("\n  {name}"));
    }
    Ok(out)
}
