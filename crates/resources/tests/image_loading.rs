//! Integration tests for concurrent image decoding.

use std::path::PathBuf;

use cadence_resources::{ResourceError, load_images};

fn fixture_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("cadence-images-{}-{}", std::process::id(), name));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_png(dir: &PathBuf, index: u32) -> PathBuf {
    let path = dir.join(format!("image-{index}.png"));
    let size = 4 + index;
    let image = image::RgbaImage::from_pixel(size, size * 2, image::Rgba([index as u8, 0, 0, 255]));
    image.save(&path).unwrap();
    path
}

#[test]
fn test_load_many_images_on_several_workers() {
    let dir = fixture_dir("many");
    let paths: Vec<PathBuf> = (0..12).map(|i| write_png(&dir, i)).collect();

    let images = load_images(&paths, Some(3)).expect("Failed to decode images");

    assert_eq!(images.len(), paths.len());
    for (i, path) in paths.iter().enumerate() {
        let image = &images[&path.display().to_string()];
        let size = 4 + i as u32;
        assert_eq!(image.width, size);
        assert_eq!(image.height, size * 2);
        assert_eq!(image.pixels[0], i as u8);
    }

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_more_workers_than_files() {
    let dir = fixture_dir("few");
    let paths = vec![write_png(&dir, 0)];

    let images = load_images(&paths, Some(16)).unwrap();
    assert_eq!(images.len(), 1);

    std::fs::remove_dir_all(dir).ok();
}

#[test]
fn test_missing_file_fails_the_batch() {
    let dir = fixture_dir("missing");
    let paths = vec![
        write_png(&dir, 0),
        dir.join("does-not-exist.png"),
        write_png(&dir, 2),
    ];

    let result = load_images(&paths, None);
    assert!(matches!(result, Err(ResourceError::FileNotFound(_))));

    std::fs::remove_dir_all(dir).ok();
}
