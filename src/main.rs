use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facefind::cache::FileCache;
use facefind::{config, corpus, MatchOptions, Matcher, OnnxExtractor, Outcome};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "facefind")]
#[command(version, about = "Identify a person by matching a photo against a face corpus")]
struct Cli {
    /// Config file (defaults to the system-wide one)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a photo against the corpus
    Identify {
        /// Photo to identify
        probe: PathBuf,
        /// Corpus root laid out as <corpus>/<identity>/<image>
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Number of ranked matches to report
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
        /// Report "unknown" unless a face is within the model's recommended distance
        #[arg(long)]
        strict: bool,
    },
    /// Delete corpus files that are not decodable images
    Prune {
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Also delete images in which no face is detected
        #[arg(long)]
        faceless: bool,
    },
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Identify {
            probe,
            corpus,
            top_k,
            json,
            strict,
        } => {
            let root = corpus.unwrap_or_else(|| cfg.corpus.clone());
            let top_k = top_k.unwrap_or(cfg.top_k);
            let mut options = MatchOptions::from(&cfg);
            if strict {
                options = options.with_recommended_cutoff();
            }
            identify(&cfg, options, &probe, &root, top_k, json)
        }
        Commands::Prune { corpus, faceless } => {
            let root = corpus.unwrap_or_else(|| cfg.corpus.clone());
            prune(&cfg, &root, faceless)
        }
        Commands::Config => open_config(cli.config.as_deref()),
    }
}

fn load_extractor(cfg: &config::Config) -> Result<OnnxExtractor> {
    OnnxExtractor::new(
        cfg.models.name.clone(),
        &cfg.models.paths(),
        cfg.score_threshold,
        cfg.nms_threshold,
    )
    .context("Failed to initialize face recognition pipeline")
}

fn identify(
    cfg: &config::Config,
    options: MatchOptions,
    probe: &Path,
    root: &Path,
    top_k: usize,
    json: bool,
) -> Result<()> {
    info!("Identifying {} against {}", probe.display(), root.display());

    let mut matcher = Matcher::new(load_extractor(cfg)?, options);
    if let Some(path) = &cfg.cache {
        match FileCache::load(path) {
            Ok(mut cache) => {
                cache.retain_fresh();
                matcher = matcher.with_cache(Box::new(cache));
            }
            Err(e) => warn!("Running without embedding cache: {:#}", e),
        }
    }

    let cancel = AtomicBool::new(false);
    let result = matcher.identify(probe, root, top_k, &cancel)?;

    if let Err(e) = matcher.flush_cache() {
        warn!("Failed to save embedding cache: {:#}", e);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    for entry in &result.skipped {
        println!("skipped {}: {}", entry.path.display(), entry.reason);
    }
    match &result.outcome {
        Outcome::Matched(candidates) => {
            for (rank, c) in candidates.iter().enumerate() {
                println!(
                    "{}. {} {:.2}% (distance {:.4}, {})",
                    rank + 1,
                    c.identity,
                    c.confidence,
                    c.distance,
                    c.path.display()
                );
            }
        }
        Outcome::Unmatched => println!("unknown"),
    }
    Ok(())
}

fn prune(cfg: &config::Config, root: &Path, faceless: bool) -> Result<()> {
    info!("Pruning corpus {}", root.display());

    let report = if faceless {
        let mut extractor = load_extractor(cfg)?;
        corpus::prune_faceless(root, &mut extractor)
    } else {
        corpus::prune(root)
    };

    for removal in &report.removed {
        println!("removed {} ({})", removal.path.display(), removal.reason);
    }
    for failure in &report.failed {
        println!("could not remove {} ({})", failure.path.display(), failure.reason);
    }
    info!(
        "✓ {} file(s) checked, {} removed",
        report.examined,
        report.removed.len()
    );

    if !report.failed.is_empty() {
        anyhow::bail!("{} corrupt file(s) could not be removed", report.failed.len());
    }
    Ok(())
}

fn open_config(path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(&config::CONFIG_PATH);
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    if !config_path.exists() {
        config::save_config(&config::Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
