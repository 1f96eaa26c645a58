//! Identify a person from a photo by ranking a labeled corpus of face images.
//!
//! The corpus lives on disk as `<root>/<identity>/<image>`. Matching ([`Matcher::identify`])
//! only reads it; cleaning out undecodable files is a separate, explicit step
//! ([`corpus::prune`]).

pub mod cache;
pub mod config;
pub mod corpus;
pub mod error;
pub mod extractor;
pub mod matcher;
pub mod metric;
pub mod validator;

use std::path::Path;
use std::sync::atomic::AtomicBool;

// Re-export vision types for convenience
pub use facefind_vision::{Embedding, ModelPaths};

pub use error::{ExtractError, IdentifyError, SkipReason};
pub use extractor::{Extractor, OnnxExtractor};
pub use matcher::{Identification, MatchCandidate, MatchOptions, Matcher, Outcome};
pub use metric::DistanceMetric;

/// One-shot identification with default [`MatchOptions`] and no cache.
pub fn identify<E: Extractor>(
    extractor: &mut E,
    probe: &Path,
    corpus_root: &Path,
    top_k: usize,
) -> Result<Identification, IdentifyError> {
    let never = AtomicBool::new(false);
    Matcher::new(extractor, MatchOptions::default()).identify(probe, corpus_root, top_k, &never)
}
