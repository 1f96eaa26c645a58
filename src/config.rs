use anyhow::{Context, Result};
use facefind_vision::ModelPaths;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::metric::DistanceMetric;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("FACEFIND_CONFIG_PATH").unwrap_or("/usr/local/etc/facefind/config.toml"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the reference corpus, laid out as `<corpus>/<identity>/<image>`.
    pub corpus: PathBuf,
    pub metric: DistanceMetric,
    /// Candidates farther than this are not reported. `None` disables the cutoff.
    pub max_distance: Option<f32>,
    pub top_k: usize,
    /// Confidence lost per unit of plain Euclidean distance.
    pub euclidean_scale: f32,
    /// Minimum detector score for a face to count.
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// On-disk embedding cache. Matching is identical without it.
    pub cache: Option<PathBuf>,
    pub models: ModelConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Identifier stored alongside cached embeddings.
    pub name: String,
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus: PathBuf::from("dataset"),
            metric: DistanceMetric::Cosine,
            max_distance: None,
            top_k: 1,
            euclidean_scale: 100.0,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            cache: None,
            models: ModelConfig::default(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let paths = ModelPaths::default();
        Self {
            name: "sface_2021dec".to_string(),
            detector: paths.detector,
            recognizer: paths.recognizer,
        }
    }
}

impl ModelConfig {
    pub fn paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.detector.clone(),
            recognizer: self.recognizer.clone(),
        }
    }
}

impl Config {
    fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_distance {
            if !max.is_finite() || max < 0.0 {
                anyhow::bail!("max_distance must be a non-negative number, got {}", max);
            }
        }
        if !self.euclidean_scale.is_finite() || self.euclidean_scale <= 0.0 {
            anyhow::bail!(
                "euclidean_scale must be positive, got {}",
                self.euclidean_scale
            );
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "metric = \"euclidean_l2\"\ntop_k = 3\n\n[models]\nname = \"custom\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.metric, DistanceMetric::EuclideanL2);
        assert_eq!(cfg.top_k, 3);
        assert_eq!(cfg.models.name, "custom");
        assert_eq!(cfg.models.detector, ModelConfig::default().detector);
        assert_eq!(cfg.corpus, PathBuf::from("dataset"));
        assert!(cfg.max_distance.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let cfg = Config {
            max_distance: Some(0.4),
            cache: Some(PathBuf::from("/tmp/facefind.cache")),
            ..Config::default()
        };

        save_config(&cfg, Some(&path)).unwrap();
        assert_eq!(load_config(Some(&path)).unwrap(), cfg);
    }

    #[test]
    fn negative_cutoff_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_distance = -1.0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "top_k = [").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }
}
