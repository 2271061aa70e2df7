mod common;

use common::{test_config, touch_future, write_garbage, write_png, write_transparent_png};
use ingest_core::manifest::ManifestStore;
use ingest_core::models::Dimensions;
use ingest_core::pipeline::{FileOutcome, Pipeline};
use std::fs;

#[tokio::test]
async fn batch_produces_derivatives_and_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    let uploads = &cfg.paths.input_dir;
    write_png(uploads, "Funny Cat.PNG", 400, 300);
    write_png(uploads, "wide_one.png", 400, 200);
    write_png(uploads, "tiny.png", 100, 50);
    fs::write(uploads.join("notes.txt"), "not an image").unwrap();
    write_png(uploads, ".hidden.png", 10, 10);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    let summary = pipeline.process_all().await;

    assert_eq!(summary.processed, ["funny-cat", "tiny", "wide-one"]);
    assert!(summary.failed.is_empty());

    let cat = pipeline.record("funny-cat").await.unwrap();
    assert_eq!(cat.filename, "funny-cat.jpg");
    assert_eq!(cat.extension, ".jpg");
    assert_eq!(cat.url, "/images/optimized/funny-cat.jpg");
    assert_eq!(cat.thumbnail_url, "/images/thumbnails/funny-cat.jpg");
    assert_eq!(cat.dimensions.original, Dimensions::new(400, 300));
    assert_eq!(cat.dimensions.optimized, Dimensions::new(200, 150));
    assert_eq!(cat.dimensions.thumbnail, Dimensions::new(80, 60));
    assert_eq!(
        cat.original_size,
        fs::metadata(uploads.join("Funny Cat.PNG")).unwrap().len()
    );
    let optimized = cfg.paths.optimized_dir.join("funny-cat.jpg");
    let thumbnail = cfg.paths.thumbnail_dir.join("funny-cat.jpg");
    assert_eq!(cat.optimized_size, fs::metadata(&optimized).unwrap().len());
    assert_eq!(cat.thumbnail_size, fs::metadata(&thumbnail).unwrap().len());
    assert_eq!(image::image_dimensions(&optimized).unwrap(), (200, 150));
    assert_eq!(image::image_dimensions(&thumbnail).unwrap(), (80, 60));

    let wide = pipeline.record("wide-one").await.unwrap();
    assert_eq!(wide.dimensions.optimized, Dimensions::new(200, 100));
    assert_eq!(wide.dimensions.thumbnail, Dimensions::new(80, 40));

    // Already inside the optimized box: kept as is.
    let tiny = pipeline.record("tiny").await.unwrap();
    assert_eq!(tiny.dimensions.optimized, Dimensions::new(100, 50));
    assert_eq!(tiny.dimensions.thumbnail, Dimensions::new(80, 40));

    let on_disk: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&cfg.paths.manifest_path).unwrap()).unwrap();
    let names: Vec<&str> = on_disk
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["funny-cat", "tiny", "wide-one"]);
    assert_eq!(on_disk[0]["dimensions"]["optimized"]["height"], 150);
}

#[tokio::test]
async fn unchanged_files_are_skipped_on_second_run() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    write_png(&cfg.paths.input_dir, "doge.png", 300, 300);
    write_png(&cfg.paths.input_dir, "pepe.png", 120, 90);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    let first = pipeline.process_all().await;
    assert_eq!(first.processed.len(), 2);
    let before = pipeline.records().await;

    let second = pipeline.process_all().await;
    assert!(second.processed.is_empty());
    assert_eq!(second.skipped, 2);
    assert_eq!(pipeline.records().await, before);

    // A fresh process reading the persisted manifest skips too.
    let restarted = Pipeline::new(&cfg).await.unwrap();
    let third = restarted.process_all().await;
    assert_eq!(third.skipped, 2);
    assert_eq!(restarted.records().await, before);
}

#[tokio::test]
async fn modified_source_is_reprocessed_in_place() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    let src = write_png(&cfg.paths.input_dir, "meme.png", 400, 300);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    pipeline.process_all().await;
    let original = pipeline.record("meme").await.unwrap();

    write_png(&cfg.paths.input_dir, "meme.png", 300, 400);
    touch_future(&src);
    let outcome = pipeline.process_file(&src).await.unwrap();

    let FileOutcome::Processed(updated) = outcome else {
        panic!("expected reprocessing, got {outcome:?}");
    };
    assert_eq!(updated.dimensions.original, Dimensions::new(300, 400));
    assert_eq!(updated.dimensions.optimized, Dimensions::new(113, 150));
    assert!(updated.processed > original.processed);
    assert_eq!(pipeline.records().await.len(), 1);
}

#[tokio::test]
async fn corrupt_file_does_not_affect_the_rest_of_the_batch() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    let uploads = &cfg.paths.input_dir;
    write_png(uploads, "a.png", 160, 120);
    write_png(uploads, "b.png", 160, 120);
    write_garbage(uploads, "broken.png");
    write_png(uploads, "c.png", 160, 120);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    let summary = pipeline.process_all().await;

    assert_eq!(summary.processed, ["a", "b", "c"]);
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].path.ends_with("broken.png"));
    assert!(pipeline.record("broken").await.is_none());
    assert!(!cfg.paths.optimized_dir.join("broken.jpg").exists());

    let persisted = ManifestStore::load(&cfg.paths.manifest_path).await;
    assert_eq!(persisted.len(), 3);
}

#[tokio::test]
async fn failed_reprocess_keeps_previous_record() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    let src = write_png(&cfg.paths.input_dir, "cat.png", 160, 120);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    pipeline.process_all().await;
    let before = pipeline.record("cat").await.unwrap();

    write_garbage(&cfg.paths.input_dir, "cat.png");
    touch_future(&src);
    assert!(pipeline.process_file(&src).await.is_err());
    assert_eq!(pipeline.record("cat").await.unwrap(), before);
}

#[tokio::test]
async fn transparency_is_flattened_to_white() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    write_transparent_png(&cfg.paths.input_dir, "ghost.png", 40, 40);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    let summary = pipeline.process_all().await;
    assert_eq!(summary.processed, ["ghost"]);

    let thumb = image::open(cfg.paths.thumbnail_dir.join("ghost.jpg"))
        .unwrap()
        .to_rgb8();
    let px = thumb.get_pixel(20, 20).0;
    assert!(px.iter().all(|c| *c > 240), "expected near-white, got {px:?}");
}

#[tokio::test]
async fn explicit_paths_and_ignored_files() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    let good = write_png(&cfg.paths.input_dir, "good.png", 50, 50);
    let text = cfg.paths.input_dir.join("readme.txt");
    fs::write(&text, "hi").unwrap();
    let nameless = write_png(&cfg.paths.input_dir, "___.png", 50, 50);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    let summary = pipeline
        .process_paths(vec![good, text, nameless.clone()])
        .await;
    assert_eq!(summary.processed, ["good"]);
    assert_eq!(summary.ignored, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].path, nameless);
}

#[tokio::test]
async fn excluded_globs_never_qualify() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = test_config(temp.path());
    cfg.scan.exclude = vec!["**/*.partial.png".to_string()];
    write_png(&cfg.paths.input_dir, "upload.partial.png", 20, 20);
    write_png(&cfg.paths.input_dir, "done.png", 20, 20);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    let summary = pipeline.process_all().await;
    assert_eq!(summary.processed, ["done"]);
}

#[tokio::test]
async fn stats_and_prune_follow_the_manifest() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    let keep = write_png(&cfg.paths.input_dir, "keep.png", 200, 150);
    let gone = write_png(&cfg.paths.input_dir, "gone.png", 200, 150);

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    pipeline.process_all().await;
    let stats = pipeline.stats().await;
    assert_eq!(stats.count, 2);
    assert_eq!(
        stats.total_original_size,
        fs::metadata(&keep).unwrap().len() + fs::metadata(&gone).unwrap().len()
    );

    fs::remove_file(&gone).unwrap();
    assert_eq!(pipeline.find_orphans().await.unwrap(), ["gone"]);
    // Dry run leaves everything in place.
    assert_eq!(pipeline.stats().await.count, 2);

    assert_eq!(pipeline.prune(true).await, ["gone"]);
    assert!(pipeline.record("gone").await.is_none());
    assert!(pipeline.record("keep").await.is_some());
    assert!(!cfg.paths.optimized_dir.join("gone.jpg").exists());
    assert!(!cfg.paths.thumbnail_dir.join("gone.jpg").exists());
    assert!(cfg.paths.optimized_dir.join("keep.jpg").exists());

    let persisted = ManifestStore::load(&cfg.paths.manifest_path).await;
    assert_eq!(persisted.len(), 1);
}

#[tokio::test]
async fn missing_input_directory_is_reported_not_raised() {
    let temp = tempfile::tempdir().unwrap();
    let cfg = test_config(temp.path());
    fs::remove_dir_all(&cfg.paths.input_dir).unwrap();

    let pipeline = Pipeline::new(&cfg).await.unwrap();
    let summary = pipeline.process_all().await;
    assert!(summary.processed.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].path, cfg.paths.input_dir);
}

#[tokio::test]
async fn invalid_config_is_rejected_up_front() {
    let temp = tempfile::tempdir().unwrap();
    let mut cfg = test_config(temp.path());
    cfg.sizes.thumbnail = ingest_core::resizer::BoundingBox::new(80, 0);

    let err = Pipeline::new(&cfg).await.err().expect("zero-height box accepted");
    assert!(err.to_string().contains("sizes.thumbnail"));
}
