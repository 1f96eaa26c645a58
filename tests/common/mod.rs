#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use facefind::extractor::decode_image;
use facefind::{Embedding, ExtractError, Extractor};
use image::{Rgb, RgbImage};

pub const RED: [u8; 3] = [220, 20, 20];
pub const GREEN: [u8; 3] = [20, 220, 20];
pub const BLUE: [u8; 3] = [20, 20, 220];
pub const ORANGE: [u8; 3] = [220, 120, 20];
pub const BLACK: [u8; 3] = [0, 0, 0];

/// Write a solid-color image; the encoder follows the extension.
pub fn write_face(path: &Path, color: [u8; 3]) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_pixel(16, 16, Rgb(color)).save(path).unwrap();
    path.to_path_buf()
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
    path.to_path_buf()
}

/// Stand-in for a face model: the "face" is the mean color, a near-black image has none.
#[derive(Debug, Default)]
pub struct ColorExtractor {
    pub calls: usize,
}

impl Extractor for ColorExtractor {
    fn model_id(&self) -> &str {
        "mean-color"
    }

    fn extract(&mut self, path: &Path) -> Result<Embedding, ExtractError> {
        self.calls += 1;
        let img = decode_image(path)?.to_rgb8();
        let count = (img.width() * img.height()).max(1) as f32;
        let mut sum = [0.0f32; 3];
        for pixel in img.pixels() {
            for c in 0..3 {
                sum[c] += pixel[c] as f32;
            }
        }
        let mean: Vec<f32> = sum.iter().map(|s| s / count).collect();
        if mean.iter().all(|&v| v < 8.0) {
            return Err(ExtractError::NoFace);
        }
        Ok(Embedding::normalized(mean))
    }
}
