use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DeskwatchConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub aggregate: AggregateConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub corpus_dir: String,
    pub result_dir: String,
    pub summary_path: String,
    pub image_extensions: Vec<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            corpus_dir: "images".to_string(),
            result_dir: "outputs".to_string(),
            summary_path: "simplified.json".to_string(),
            image_extensions: vec!["jpg".to_string()],
        }
    }
}

impl PathsConfig {
    pub fn corpus_path(&self) -> PathBuf {
        expand(&self.corpus_dir)
    }

    pub fn result_path(&self) -> PathBuf {
        expand(&self.result_dir)
    }

    pub fn summary_file(&self) -> PathBuf {
        expand(&self.summary_path)
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Dark-frame filter stage.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilterConfig {
    pub workers: usize,
    /// Frames whose pixel intensity standard deviation falls below this are discarded.
    pub std_threshold: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            std_threshold: 15.0,
        }
    }
}

/// Inference dispatch stage.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    pub workers: usize,
    pub api_url: String,
    pub workspace: String,
    pub workflow_id: String,
    pub use_cache: bool,
    pub timeout_seconds: u64,
    /// Maximum number of unresolved items taken per run. `None` means unlimited.
    pub batch_cap: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            api_url: "http://localhost:9001".to_string(),
            workspace: String::new(),
            workflow_id: String::new(),
            use_cache: true,
            timeout_seconds: 60,
            batch_cap: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregateConfig {
    pub bucket_minutes: u32,
    pub min_samples: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            bucket_minutes: 15,
            min_samples: 10,
        }
    }
}

impl DeskwatchConfig {
    /// Load from a TOML file, then apply `DESKWATCH__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("DESKWATCH").separator("__"))
            .build()?;
        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.filter.workers == 0 {
            return Err(ConfigError::Message("filter.workers must be at least 1".into()));
        }
        if self.dispatch.workers == 0 {
            return Err(ConfigError::Message("dispatch.workers must be at least 1".into()));
        }
        if !self.filter.std_threshold.is_finite() || self.filter.std_threshold < 0.0 {
            return Err(ConfigError::Message(
                "filter.std_threshold must be a non-negative number".into(),
            ));
        }
        let minutes = self.aggregate.bucket_minutes;
        if minutes == 0 || minutes > 60 || 60 % minutes != 0 {
            return Err(ConfigError::Message(format!(
                "aggregate.bucket_minutes must divide 60, got {}",
                minutes
            )));
        }
        if self.aggregate.min_samples == 0 {
            return Err(ConfigError::Message(
                "aggregate.min_samples must be at least 1".into(),
            ));
        }
        if self.paths.image_extensions.is_empty() {
            return Err(ConfigError::Message(
                "paths.image_extensions must name at least one extension".into(),
            ));
        }
        Ok(())
    }
}
