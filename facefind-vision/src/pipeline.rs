use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, Embedding, ALIGNED_SIZE};
use crate::model::{self, ModelPaths};

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Pipeline {
    pub fn new(paths: &ModelPaths) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            score_threshold: 0.6,
            nms_threshold: 0.3,
        })
    }

    pub fn with_thresholds(mut self, score_threshold: f32, nms_threshold: f32) -> Self {
        self.score_threshold = score_threshold;
        self.nms_threshold = nms_threshold;
        self
    }

    /// Detect the most prominent face and embed it.
    ///
    /// When several faces are found, the one with the highest detector score wins.
    /// Returns `Ok(None)` when no face clears the score threshold.
    pub fn process_image(&mut self, img: &DynamicImage) -> Result<Option<(Detection, Embedding)>> {
        let detections = face::detect_faces(
            &mut self.detector,
            img,
            self.score_threshold,
            self.nms_threshold,
        )
        .context("detecting faces")?;

        let found = detections.len();
        let Some(best) = detections
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
        else {
            return Ok(None);
        };
        log::debug!(
            "{} face(s) detected, using {:?} with score {:.3}",
            found,
            best.bbox,
            best.score
        );

        let face_img = face::align_face(img, &best, ALIGNED_SIZE).context("aligning face")?;
        let embedding = face::encode_face(&mut self.encoder, &face_img).context("encoding face")?;

        Ok(Some((best, embedding)))
    }

    /// Process and return only embedding (convenience method)
    pub fn extract_embedding(&mut self, img: &DynamicImage) -> Result<Option<Embedding>> {
        Ok(self.process_image(img)?.map(|(_detection, embedding)| embedding))
    }
}
