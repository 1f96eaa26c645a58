use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ort::{
    ep::{self, ExecutionProvider},
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
};

/// Default file names of the OpenCV zoo models the pipeline is built around.
pub const DEFAULT_DETECTOR: &str = "models/face_detection_yunet_2023mar.onnx";
pub const DEFAULT_RECOGNIZER: &str = "models/face_recognition_sface_2021dec.onnx";

/// Locations of the detector and recognizer ONNX files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self {
            detector: PathBuf::from(DEFAULT_DETECTOR),
            recognizer: PathBuf::from(DEFAULT_RECOGNIZER),
        }
    }
}

impl ModelPaths {
    /// True when both model files are present on disk.
    pub fn available(&self) -> bool {
        self.detector.is_file() && self.recognizer.is_file()
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn load_session(path: &Path, what: &str) -> Result<Session> {
    if !path.is_file() {
        anyhow::bail!("{} model not found at {}", what, path.display());
    }
    let session = session_builder()?
        .commit_from_file(path)
        .with_context(|| format!("load {} model {}", what, path.display()))?;
    log::info!("loaded {} model from {}", what, path.display());
    Ok(session)
}

pub fn recog_session(paths: &ModelPaths) -> Result<Session> {
    load_session(&paths.recognizer, "recognition")
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    load_session(&paths.detector, "detector")
}
