use std::path::Path;

use anyhow::Result;
use facefind_vision::{Embedding, ModelPaths, Pipeline};
use image::{DynamicImage, ImageReader};

use crate::error::ExtractError;

/// Turns one image file into one face embedding.
///
/// Every embedding produced by a given extractor has the same length; `model_id` names the
/// model so cached embeddings are never mixed across models.
pub trait Extractor {
    fn model_id(&self) -> &str;

    fn extract(&mut self, path: &Path) -> Result<Embedding, ExtractError>;
}

impl<E: Extractor + ?Sized> Extractor for &mut E {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn extract(&mut self, path: &Path) -> Result<Embedding, ExtractError> {
        (**self).extract(path)
    }
}

/// Open and decode an image, folding every IO and codec failure into `Decode`.
pub fn decode_image(path: &Path) -> Result<DynamicImage, ExtractError> {
    ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| ExtractError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| ExtractError::Decode(e.to_string()))
}

/// YuNet + SFace extraction through ONNX Runtime.
pub struct OnnxExtractor {
    pipeline: Pipeline,
    model: String,
}

impl OnnxExtractor {
    pub fn new(
        model: impl Into<String>,
        paths: &ModelPaths,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self> {
        let pipeline = Pipeline::new(paths)?.with_thresholds(score_threshold, nms_threshold);
        Ok(Self {
            pipeline,
            model: model.into(),
        })
    }
}

impl Extractor for OnnxExtractor {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn extract(&mut self, path: &Path) -> Result<Embedding, ExtractError> {
        let img = decode_image(path)?;
        match self.pipeline.extract_embedding(&img) {
            Ok(Some(embedding)) => Ok(embedding),
            Ok(None) => Err(ExtractError::NoFace),
            Err(e) => Err(ExtractError::Model(format!("{:#}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_cover_missing_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            decode_image(&dir.path().join("gone.png")),
            Err(ExtractError::Decode(_))
        ));

        let junk = dir.path().join("junk.png");
        std::fs::write(&junk, b"\x89PNG but not really").unwrap();
        assert!(matches!(decode_image(&junk), Err(ExtractError::Decode(_))));
    }

    #[test]
    fn decodes_real_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("face.png");
        image::RgbImage::from_pixel(3, 2, image::Rgb([1, 2, 3]))
            .save(&path)
            .unwrap();
        let img = decode_image(&path).unwrap();
        assert_eq!((img.width(), img.height()), (3, 2));
    }

    #[test]
    fn onnx_extractor_needs_models() {
        let paths = ModelPaths {
            detector: "missing/detector.onnx".into(),
            recognizer: "missing/recognizer.onnx".into(),
        };
        assert!(OnnxExtractor::new("sface", &paths, 0.6, 0.3).is_err());
    }
}
