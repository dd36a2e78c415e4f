//! Concurrent image decoding.
//!
//! [`load_images`] spreads a list of files across scoped worker threads.
//! Workers pull the next path from a shared counter and send each decoded
//! image back over a channel, so a slow file does not hold up the rest.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;

use tracing::{debug, info};

use crate::error::{ResourceError, ResourceResult};

/// Tightly packed RGBA8 pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// `width * height * 4` bytes, row-major.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// Size of the pixel data in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

/// Decodes one file to RGBA8.
pub fn decode_image(path: &Path) -> ResourceResult<DecodedImage> {
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let image = image::open(path)
        .map_err(|source| ResourceError::Decode {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgba8();

    let (width, height) = image.dimensions();
    debug!("Decoded {}: {}x{}", path.display(), width, height);

    Ok(DecodedImage {
        pixels: image.into_raw(),
        width,
        height,
    })
}

/// Decodes `paths` on up to `workers` threads.
///
/// `None` uses the available parallelism. The result maps each path's
/// display string to its image.
///
/// # Errors
///
/// Returns the first failure reported by any worker. All workers run to
/// completion before this returns.
pub fn load_images<P>(
    paths: &[P],
    workers: Option<usize>,
) -> ResourceResult<HashMap<String, DecodedImage>>
where
    P: AsRef<Path> + Sync,
{
    if paths.is_empty() {
        return Ok(HashMap::new());
    }

    let workers = workers
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
        .clamp(1, paths.len());

    let next = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel::<(usize, ResourceResult<DecodedImage>)>();

    let joined = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                let sender = sender.clone();
                let next = &next;
                scope.spawn(move || {
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(path) = paths.get(index) else {
                            break;
                        };
                        if sender.send((index, decode_image(path.as_ref()))).is_err() {
                            break;
                        }
                    }
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join())
            .collect::<Vec<_>>()
    });
    drop(sender);

    if joined.iter().any(|result| result.is_err()) {
        return Err(ResourceError::WorkerPanicked);
    }

    let mut images = HashMap::with_capacity(paths.len());
    let mut first_error: Option<(usize, ResourceError)> = None;
    for (index, result) in receiver {
        match result {
            Ok(image) => {
                images.insert(paths[index].as_ref().display().to_string(), image);
            }
            Err(e) => {
                if first_error.as_ref().is_none_or(|(first, _)| index < *first) {
                    first_error = Some((index, e));
                }
            }
        }
    }

    if let Some((_, e)) = first_error {
        return Err(e);
    }

    info!("Decoded {} images on {} workers", images.len(), workers);
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_png(name: &str, width: u32, height: u32) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "cadence-loader-{}-{}.png",
            std::process::id(),
            name
        ));
        let image = image::RgbaImage::from_fn(width, height, |x, y| {
            image::Rgba([x as u8, y as u8, 0x40, 0xff])
        });
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn test_decode_produces_rgba8() {
        let path = write_png("single", 5, 3);
        let decoded = decode_image(&path).unwrap();

        assert_eq!((decoded.width, decoded.height), (5, 3));
        assert_eq!(decoded.byte_len(), 5 * 3 * 4);
        let (x, y) = (2, 1);
        let offset = (y * 5 + x) * 4;
        assert_eq!(&decoded.pixels[offset..offset + 4], &[2, 1, 0x40, 0xff]);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file() {
        let result = decode_image(Path::new("/nonexistent/cadence/missing.png"));
        assert!(matches!(result, Err(ResourceError::FileNotFound(_))));
    }

    #[test]
    fn test_undecodable_file() {
        let path =
            std::env::temp_dir().join(format!("cadence-loader-{}-bad.png", std::process::id()));
        std::fs::write(&path, b"not an image").unwrap();

        let result = decode_image(&path);
        assert!(matches!(result, Err(ResourceError::Decode { .. })));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_empty_list() {
        let paths: Vec<PathBuf> = Vec::new();
        assert!(load_images(&paths, Some(4)).unwrap().is_empty());
    }
}
