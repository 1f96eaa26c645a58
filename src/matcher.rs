use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use facefind_vision::Embedding;
use log::{debug, info, warn};
use serde::Serialize;

use crate::cache::{CacheKey, EmbeddingCache};
use crate::config::Config;
use crate::corpus::{self, CorpusItem, ScanEntry};
use crate::error::{ExtractError, IdentifyError, SkipReason};
use crate::extractor::Extractor;
use crate::metric::DistanceMetric;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub metric: DistanceMetric,
    /// Candidates farther than this are dropped before ranking.
    pub max_distance: Option<f32>,
    pub euclidean_scale: f32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::Cosine,
            max_distance: None,
            euclidean_scale: 100.0,
        }
    }
}

impl MatchOptions {
    /// Cut off at the metric's published SFace verification threshold, turning ranking into
    /// verification: probes unlike everyone in the corpus come back `Unmatched`.
    pub fn with_recommended_cutoff(mut self) -> Self {
        self.max_distance = Some(self.metric.recommended_threshold());
        self
    }
}

impl From<&Config> for MatchOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            metric: cfg.metric,
            max_distance: cfg.max_distance,
            euclidean_scale: cfg.euclidean_scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub identity: String,
    pub distance: f32,
    /// Presentation score in `[0, 100]`; not a probability.
    pub confidence: f32,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "matches", rename_all = "snake_case")]
pub enum Outcome {
    /// Best candidates first, never empty.
    Matched(Vec<MatchCandidate>),
    Unmatched,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identification {
    pub outcome: Outcome,
    pub metric: DistanceMetric,
    /// Corpus files considered, skipped ones included.
    pub examined: usize,
    /// Usable candidates dropped by the distance cutoff.
    pub beyond_cutoff: usize,
    pub skipped: Vec<SkippedEntry>,
}

impl Identification {
    pub fn best(&self) -> Option<&MatchCandidate> {
        match &self.outcome {
            Outcome::Matched(candidates) => candidates.first(),
            Outcome::Unmatched => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self.outcome, Outcome::Matched(_))
    }
}

/// Sort ascending by distance, breaking ties by identity then path, and keep `top_k`.
pub fn rank(mut candidates: Vec<MatchCandidate>, top_k: usize) -> Vec<MatchCandidate> {
    candidates.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.identity.cmp(&b.identity))
            .then_with(|| a.path.cmp(&b.path))
    });
    candidates.truncate(top_k.max(1));
    candidates
}

/// Ranks corpus images against a probe image.
///
/// Matching only reads the corpus; cleaning it is [`corpus::prune`]'s job.
pub struct Matcher<E> {
    extractor: E,
    options: MatchOptions,
    cache: Option<Box<dyn EmbeddingCache>>,
}

impl<E: Extractor> Matcher<E> {
    pub fn new(extractor: E, options: MatchOptions) -> Self {
        Self {
            extractor,
            options,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Box<dyn EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn extractor_mut(&mut self) -> &mut E {
        &mut self.extractor
    }

    /// Persist the cache, if there is one.
    pub fn flush_cache(&mut self) -> anyhow::Result<()> {
        match self.cache.as_mut() {
            Some(cache) => cache.flush(),
            None => Ok(()),
        }
    }

    /// Identify the face in `probe` against the corpus at `root`.
    ///
    /// Probe failures are returned as errors. Corpus entries that cannot be used are listed
    /// in [`Identification::skipped`] and never fail the call. `cancel` is polled before each
    /// corpus entry.
    pub fn identify(
        &mut self,
        probe: &Path,
        root: &Path,
        top_k: usize,
        cancel: &AtomicBool,
    ) -> Result<Identification, IdentifyError> {
        if cancel.load(Ordering::Relaxed) {
            return Err(IdentifyError::Cancelled);
        }

        let probe_embedding = self
            .extractor
            .extract(probe)
            .map_err(|e| IdentifyError::from_probe(probe.to_path_buf(), e))?;
        info!(
            "probe {} embedded ({} dims), scanning {}",
            probe.display(),
            probe_embedding.len(),
            root.display()
        );

        let mut candidates = Vec::new();
        let mut skipped = Vec::new();
        let mut examined = 0;
        let mut beyond_cutoff = 0;

        for entry in corpus::scan(root) {
            if cancel.load(Ordering::Relaxed) {
                info!("identification of {} cancelled", probe.display());
                return Err(IdentifyError::Cancelled);
            }
            examined += 1;

            let item = match entry {
                ScanEntry::Labeled(item) => item,
                ScanEntry::Unlabeled(path) => {
                    skipped.push(skip(path, SkipReason::Unlabeled));
                    continue;
                }
            };

            match self.score(&probe_embedding, &item) {
                Ok(distance) => {
                    debug!(
                        "{} ({}): distance {:.4}",
                        item.path.display(),
                        item.identity,
                        distance
                    );
                    if self.options.max_distance.is_some_and(|max| distance > max) {
                        beyond_cutoff += 1;
                        continue;
                    }
                    candidates.push(MatchCandidate {
                        confidence: self
                            .options
                            .metric
                            .confidence(distance, self.options.euclidean_scale),
                        identity: item.identity,
                        distance,
                        path: item.path,
                    });
                }
                Err(reason) => skipped.push(skip(item.path, reason)),
            }
        }

        let outcome = if candidates.is_empty() {
            info!(
                "no match for {} ({} examined, {} skipped, {} beyond cutoff)",
                probe.display(),
                examined,
                skipped.len(),
                beyond_cutoff
            );
            Outcome::Unmatched
        } else {
            let ranked = rank(candidates, top_k);
            if let Some(best) = ranked.first() {
                info!(
                    "best match for {}: {} ({:.2}%)",
                    probe.display(),
                    best.identity,
                    best.confidence
                );
            }
            Outcome::Matched(ranked)
        };

        Ok(Identification {
            outcome,
            metric: self.options.metric,
            examined,
            beyond_cutoff,
            skipped,
        })
    }

    fn score(&mut self, probe: &Embedding, item: &CorpusItem) -> Result<f32, SkipReason> {
        let embedding = self.embed(&item.path)?;
        if embedding.len() != probe.len() {
            return Err(SkipReason::DimensionMismatch {
                expected: probe.len(),
                found: embedding.len(),
            });
        }
        let distance = self.options.metric.distance(probe, &embedding);
        if !distance.is_finite() {
            return Err(SkipReason::NonFiniteDistance);
        }
        Ok(distance.max(0.0))
    }

    fn embed(&mut self, path: &Path) -> Result<Embedding, ExtractError> {
        let key = self
            .cache
            .as_ref()
            .and_then(|_| CacheKey::for_file(path, self.extractor.model_id()));

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), key.as_ref()) {
            if let Some(hit) = cache.get(key) {
                return Ok(hit);
            }
        }

        let embedding = self.extractor.extract(path)?;
        if let (Some(cache), Some(key)) = (self.cache.as_mut(), key) {
            cache.put(key, embedding.clone());
        }
        Ok(embedding)
    }
}

fn skip(path: PathBuf, reason: SkipReason) -> SkippedEntry {
    warn!("skipping {}: {}", path.display(), reason);
    SkippedEntry { path, reason }
}
