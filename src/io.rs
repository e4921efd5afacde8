use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use rayon::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ComputeError, ComputeResult};
use crate::gpu::Pixel;
use crate::pipeline::{ImageSource, MapImage};

/// Extensions offered in the map image list (lowercase).
pub const MAP_IMAGE_EXTENSIONS: &[&str] = &["png", "jpg"];

// ============================================================================
// MAP IMAGE DIRECTORY SCAN
// ============================================================================

/// List the `*.png` / `*.jpg` files directly inside `dir`, sorted by path.
/// A missing directory yields an empty list.
pub fn scan_map_images(dir: &Path) -> Vec<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut found = Vec::new();
    for ext in MAP_IMAGE_EXTENSIONS {
        let pattern = format!("{escaped}/*.{ext}");
        let Ok(paths) = glob::glob(&pattern) else {
            tracing::warn!("invalid map image pattern {pattern}");
            continue;
        };
        found.extend(paths.filter_map(Result::ok).filter(|p| p.is_file()));
    }
    found.sort();
    tracing::info!("found {} map image(s) in {}", found.len(), dir.display());
    found
}

// ============================================================================
// MAP IMAGE DECODING
// ============================================================================

/// Decodes map images from disk with the `image` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiskImages;

impl ImageSource for DiskImages {
    fn load(&self, path: &Path) -> ComputeResult<MapImage> {
        let decoded = image::open(path).map_err(|e| ComputeError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = rgb.dimensions();
        let pixels = rgb
            .as_raw()
            .par_chunks_exact(3)
            .map(|p| Pixel::rgb(p[0], p[1], p[2]))
            .collect();
        Ok(MapImage {
            width: width as usize,
            height: height as usize,
            pixels,
        })
    }
}

// ============================================================================
// PIXEL BUFFER OUTPUT
// ============================================================================

/// Write a row-major pixel buffer as an RGBA PNG.
pub fn save_png(path: &Path, width: usize, height: usize, pixels: &[Pixel]) -> ComputeResult<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    let encoder = PngEncoder::new(&mut writer);
    #[allow(deprecated)]
    encoder.encode(
        bytemuck::cast_slice(pixels),
        width as u32,
        height as u32,
        image::ColorType::Rgba8,
    )?;
    Ok(())
}

// ============================================================================
// PRESET FILES (JSON)
// ============================================================================

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> ComputeResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)
        .map_err(|e| ComputeError::Preset(e.to_string()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> ComputeResult<T> {
    let file = File::open(path)
        .map_err(|e| ComputeError::Preset(format!("{}: {e}", path.display())))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| ComputeError::Preset(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.png", "a.jpg", "notes.txt", "c.jpeg"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let found = scan_map_images(dir.path());
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.jpg", "b.png"]);
    }

    #[test]
    fn scan_of_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_map_images(&dir.path().join("mimg")).is_empty());
    }

    #[test]
    fn decodes_rgb_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two.png");
        let mut img = image::RgbImage::new(2, 1);
        img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        img.put_pixel(1, 0, image::Rgb([0, 0, 255]));
        img.save(&path).unwrap();

        let map = DiskImages.load(&path).unwrap();
        assert_eq!((map.width, map.height), (2, 1));
        assert_eq!(map.pixels, [Pixel::rgb(255, 0, 0), Pixel::rgb(0, 0, 255)]);
    }

    #[test]
    fn undecodable_image_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = DiskImages.load(&path).unwrap_err();
        assert!(matches!(err, ComputeError::Decode { .. }));
        assert!(err.is_recoverable());
        assert!(DiskImages.load(&dir.path().join("gone.png")).is_err());
    }

    #[test]
    fn png_output_keeps_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let pixels = vec![Pixel::rgb(10, 20, 30); 6];
        save_png(&path, 3, 2, &pixels).unwrap();

        let back = image::open(&path).unwrap().to_rgba8();
        assert_eq!(back.dimensions(), (3, 2));
        assert_eq!(back.get_pixel(2, 1).0, [10, 20, 30, 255]);
    }
}
