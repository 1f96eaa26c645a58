use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Why a single image could not be turned into an embedding.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExtractError {
    /// Unreadable, vanished or undecodable file.
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("no face detected")]
    NoFace,
    #[error("model failure: {0}")]
    Model(String),
}

/// Probe-side failures. These always reach the caller.
#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("could not read probe image {}: {reason}", path.display())]
    InvalidProbe { path: PathBuf, reason: String },
    #[error("no face found in probe image {}", path.display())]
    NoFaceInProbe { path: PathBuf },
    #[error("face extraction failed for probe image {}: {reason}", path.display())]
    ExtractionFailure { path: PathBuf, reason: String },
    #[error("identification cancelled")]
    Cancelled,
}

impl IdentifyError {
    /// Map an extraction failure on the probe to the error the caller sees.
    pub fn from_probe(path: PathBuf, err: ExtractError) -> Self {
        match err {
            ExtractError::Decode(reason) => IdentifyError::InvalidProbe { path, reason },
            ExtractError::NoFace => IdentifyError::NoFaceInProbe { path },
            ExtractError::Model(reason) => IdentifyError::ExtractionFailure { path, reason },
        }
    }
}

/// Why a corpus entry took no part in ranking.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    #[error("file has no identity directory (directly under the corpus root or not UTF-8)")]
    Unlabeled,
    #[error("{error}")]
    Extraction { error: ExtractError },
    #[error("embedding has {found} dimensions, probe has {expected}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("distance is not a finite number")]
    NonFiniteDistance,
}

impl From<ExtractError> for SkipReason {
    fn from(error: ExtractError) -> Self {
        SkipReason::Extraction { error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_errors_stay_distinct() {
        let path = PathBuf::from("probe.jpg");
        assert!(matches!(
            IdentifyError::from_probe(path.clone(), ExtractError::Decode("eof".into())),
            IdentifyError::InvalidProbe { .. }
        ));
        assert!(matches!(
            IdentifyError::from_probe(path.clone(), ExtractError::NoFace),
            IdentifyError::NoFaceInProbe { .. }
        ));
        assert!(matches!(
            IdentifyError::from_probe(path, ExtractError::Model("ort".into())),
            IdentifyError::ExtractionFailure { .. }
        ));
    }

    #[test]
    fn skip_reason_serializes_with_kind() {
        let json = serde_json::to_value(SkipReason::from(ExtractError::NoFace)).unwrap();
        assert_eq!(json["kind"], "extraction");
        assert_eq!(json["error"]["kind"], "no_face");
    }
}
