//! Metadata-driven dataset loading against covers written to a temp dir.

use std::io::Write;
use std::path::Path;

use covergan_core::DatasetConfig;
use covergan_data::{CoverDataset, CoverLoader, CoverSource, DataError};
use serial_test::serial;
use tempfile::TempDir;

fn write_cover(dir: &Path, name: &str, value: u8) {
    image::RgbImage::from_pixel(20, 20, image::Rgb([value, value, value]))
        .save(dir.join(name))
        .unwrap();
}

fn write_metadata(dir: &Path) -> std::path::PathBuf {
    write_cover(dir, "a.png", 0);
    write_cover(dir, "b.png", 255);
    write_cover(dir, "c.png", 51);

    let path = dir.join("meta.jsonl");
    let mut file = std::fs::File::create(&path).unwrap();
    let lines = [
        r#"{"file_path_64": "a.png", "file_path_300": "a.png", "album_release": 1990, "artist_name": "A"}"#,
        r#"{"file_path_64": "b.png", "file_path_300": "b.png", "album_release": "2010-01-01"}"#,
        r#"{"file_path_64": "c.png", "file_path_300": "c.png"}"#,
        r#"{"file_path_64": null, "file_path_300": "d.png", "album_release": 2000}"#,
    ];
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    path
}

fn config(dir: &TempDir, budget: u64) -> DatasetConfig {
    DatasetConfig {
        metadata_path: write_metadata(dir.path()),
        image_root: Some(dir.path().to_path_buf()),
        image_size: 16,
        preload_budget_bytes: budget,
        ..Default::default()
    }
}

#[test]
#[serial]
fn test_unconditional_keeps_records_with_images() {
    let dir = TempDir::new().unwrap();
    let dataset = CoverDataset::from_metadata(&config(&dir, 1 << 30), false).unwrap();
    assert_eq!(dataset.len(), 3);
    assert!(dataset.is_preloaded());
    assert_eq!(dataset.image_shape(), [3, 16, 16]);
    assert!(dataset.conditioning(0).is_none());

    let mut pixels = Vec::new();
    dataset.read_into(0, &mut pixels).unwrap();
    assert!(pixels.iter().all(|&v| (v + 1.0).abs() < 1e-6));
    pixels.clear();
    dataset.read_into(1, &mut pixels).unwrap();
    assert!(pixels.iter().all(|&v| (v - 1.0).abs() < 1e-6));
}

#[test]
#[serial]
fn test_conditional_drops_missing_years_and_standardizes() {
    let dir = TempDir::new().unwrap();
    let dataset = CoverDataset::from_metadata(&config(&dir, 1 << 30), true).unwrap();
    assert_eq!(dataset.len(), 2);
    let scaler = dataset.scaler().unwrap();
    assert!((scaler.mean - 2000.0).abs() < 1e-3);
    assert!((dataset.conditioning(0).unwrap() + 1.0).abs() < 1e-5);
    assert!((dataset.conditioning(1).unwrap() - 1.0).abs() < 1e-5);
}

#[test]
#[serial]
fn test_budget_overflow_falls_back_to_streaming() {
    let dir = TempDir::new().unwrap();
    let preloaded = CoverDataset::from_metadata(&config(&dir, 1 << 30), false).unwrap();
    let streaming = CoverDataset::from_metadata(&config(&dir, 16), false).unwrap();
    assert!(!streaming.is_preloaded());

    let mut a = Vec::new();
    let mut b = Vec::new();
    for i in 0..3 {
        preloaded.read_into(i, &mut a).unwrap();
        streaming.read_into(i, &mut b).unwrap();
    }
    assert_eq!(a, b);

    let mut loader = CoverLoader::new(Box::new(streaming), 2, true, 1).unwrap();
    let batch = loader.next_batch().unwrap();
    assert_eq!(batch.images.shape(), &[2, 3, 16, 16]);
}

#[test]
#[serial]
fn test_missing_metadata_is_an_error() {
    let config = DatasetConfig {
        metadata_path: "/nonexistent/meta.jsonl".into(),
        ..Default::default()
    };
    assert!(matches!(
        CoverDataset::from_metadata(&config, false),
        Err(DataError::Io(_))
    ));
}
