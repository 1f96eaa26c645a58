use facefind_vision::Embedding;
use serde::{Deserialize, Serialize};

/// The single dissimilarity measure a deployment ranks with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`, in `[0, 2]`.
    Cosine,
    /// Plain Euclidean distance between the raw vectors.
    Euclidean,
    /// Euclidean distance between the unit-length vectors, in `[0, 2]`.
    EuclideanL2,
}

impl DistanceMetric {
    /// Distance between two embeddings of equal length. Never negative for finite input.
    pub fn distance(self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Cosine => {
                let denom = a.vector.dot(&a.vector).sqrt() * b.vector.dot(&b.vector).sqrt();
                let cos = if denom > 0.0 {
                    a.vector.dot(&b.vector) / denom
                } else {
                    0.0
                };
                1.0 - cos.clamp(-1.0, 1.0)
            }
            DistanceMetric::Euclidean => {
                let diff = &a.vector - &b.vector;
                diff.dot(&diff).sqrt()
            }
            DistanceMetric::EuclideanL2 => {
                let a = Embedding::normalized(a.to_vec());
                let b = Embedding::normalized(b.to_vec());
                let diff = &a.vector - &b.vector;
                diff.dot(&diff).sqrt()
            }
        }
    }

    /// Map a distance onto a `[0, 100]` higher-is-better score.
    ///
    /// `euclidean_scale` only applies to [`DistanceMetric::Euclidean`], whose range is open.
    pub fn confidence(self, distance: f32, euclidean_scale: f32) -> f32 {
        let score = match self {
            DistanceMetric::Cosine => (1.0 - distance) * 100.0,
            DistanceMetric::Euclidean => 100.0 - distance * euclidean_scale,
            DistanceMetric::EuclideanL2 => (1.0 - distance / 2.0) * 100.0,
        };
        if score.is_nan() {
            return 0.0;
        }
        score.clamp(0.0, 100.0)
    }

    /// Verification cutoff published for SFace with this metric.
    pub fn recommended_threshold(self) -> f32 {
        match self {
            DistanceMetric::Cosine => 0.593,
            DistanceMetric::Euclidean => 10.734,
            DistanceMetric::EuclideanL2 => 1.055,
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::EuclideanL2 => "euclidean_l2",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [DistanceMetric; 3] = [
        DistanceMetric::Cosine,
        DistanceMetric::Euclidean,
        DistanceMetric::EuclideanL2,
    ];

    fn emb(v: &[f32]) -> Embedding {
        Embedding::from_vec(v.to_vec())
    }

    #[test]
    fn identical_vectors_are_zero_apart() {
        let a = emb(&[0.3, 0.4, 0.5]);
        for metric in ALL {
            assert!(metric.distance(&a, &a).abs() < 1e-6, "{metric}");
            assert!((metric.confidence(0.0, 100.0) - 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn cosine_orthogonal_and_opposite() {
        let x = emb(&[1.0, 0.0]);
        let y = emb(&[0.0, 1.0]);
        let neg = emb(&[-1.0, 0.0]);
        assert!((DistanceMetric::Cosine.distance(&x, &y) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&x, &neg) - 2.0).abs() < 1e-6);
        assert_eq!(DistanceMetric::Cosine.confidence(2.0, 100.0), 0.0);
    }

    #[test]
    fn cosine_zero_vector_is_orthogonal() {
        let zero = emb(&[0.0, 0.0]);
        let x = emb(&[1.0, 0.0]);
        assert!((DistanceMetric::Cosine.distance(&zero, &x) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_variants() {
        let a = emb(&[3.0, 0.0]);
        let b = emb(&[0.0, 4.0]);
        assert!((DistanceMetric::Euclidean.distance(&a, &b) - 5.0).abs() < 1e-6);
        assert!((DistanceMetric::EuclideanL2.distance(&a, &b) - 2f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn confidence_is_monotone_and_bounded() {
        for metric in ALL {
            let mut previous = f32::INFINITY;
            for step in 0..=60 {
                let d = step as f32 * 0.05;
                let c = metric.confidence(d, 100.0);
                assert!((0.0..=100.0).contains(&c));
                assert!(c <= previous, "{metric} not monotone at {d}");
                previous = c;
            }
        }
    }

    #[test]
    fn euclidean_scale_controls_falloff() {
        let m = DistanceMetric::Euclidean;
        assert!((m.confidence(0.25, 100.0) - 75.0).abs() < 1e-4);
        assert!((m.confidence(0.25, 10.0) - 97.5).abs() < 1e-4);
    }

    #[test]
    fn nan_confidence_is_zero() {
        assert_eq!(DistanceMetric::Cosine.confidence(f32::NAN, 100.0), 0.0);
    }

    #[test]
    fn metric_names_match_config_spelling() {
        for metric in ALL {
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{metric}\""));
        }
    }
}
