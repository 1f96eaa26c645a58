use std::path::Path;

use image::{ImageError, ImageReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Corrupt(String),
    /// A recognized format (or format feature) this build cannot decode. The file may be fine.
    Unsupported(String),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }
}

/// Fully decode the file at `path`. Missing, empty, truncated and non-image files are
/// all `Corrupt`; this never fails or panics.
pub fn validate(path: &Path) -> Verdict {
    let reader = match ImageReader::open(path).and_then(|r| r.with_guessed_format()) {
        Ok(reader) => reader,
        Err(e) => return Verdict::Corrupt(e.to_string()),
    };
    if reader.format().is_none() {
        return Verdict::Corrupt("unrecognized image format".to_string());
    }
    match reader.decode() {
        Ok(_) => Verdict::Valid,
        Err(e @ ImageError::Unsupported(_)) => Verdict::Unsupported(e.to_string()),
        Err(e) => Verdict::Corrupt(e.to_string()),
    }
}
