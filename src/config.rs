use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "labeler.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub mining: MiningConfig,
    pub labeling: LabelingConfig,
    pub import: ImportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Parameters of the outlier mining loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningConfig {
    /// Pool indices drawn per iteration; also the minimum pool size.
    pub batch_size: usize,
    /// DBSCAN neighbourhood radius.
    pub eps: f32,
    /// DBSCAN core point threshold, the point itself included.
    pub min_samples: usize,
    /// Selected points must be farther apart than this.
    pub diversity_radius: f32,
    /// Review set size requested by "start learning".
    pub target: usize,
    pub max_iterations: usize,
    /// Fixed RNG seed; entropy-seeded when absent.
    pub seed: Option<u64>,
}

/// Category vocabulary offered to reviewers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelingConfig {
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// JSON files or directories imported at start-up.
    pub paths: Vec<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://labeler.db".to_string(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            eps: 1.0,
            min_samples: 5,
            diversity_radius: 0.7,
            target: 300,
            max_iterations: 100,
            seed: None,
        }
    }
}

impl MiningConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("mining.batch_size must be > 0");
        }
        if !self.eps.is_finite() || self.eps <= 0.0 {
            bail!("mining.eps must be a positive finite number, got {}", self.eps);
        }
        if self.min_samples == 0 {
            bail!("mining.min_samples must be >= 1");
        }
        if !self.diversity_radius.is_finite() || self.diversity_radius < 0.0 {
            bail!(
                "mining.diversity_radius must be a non-negative finite number, got {}",
                self.diversity_radius
            );
        }
        if self.max_iterations == 0 {
            bail!("mining.max_iterations must be >= 1");
        }
        Ok(())
    }
}

impl Config {
    /// Loads `labeler.toml` (if present) and `LABELER__SECTION__KEY` overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let path = std::env::var("LABELER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load(Some(&path))
    }

    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix("LABELER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("labeling.categories")
                .with_list_parse_key("import.paths"),
        );

        let config: Config = builder
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.mining.validate()?;
        Ok(config)
    }
}
