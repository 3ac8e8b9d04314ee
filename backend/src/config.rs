use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "VISUAL_SEARCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/visual_search.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pipeline: PipelineConfig,
    pub tasks: TaskConfig,
    pub inference: InferenceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            static_dir: None,
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

/// What the first event of a stream carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnounceMode {
    #[default]
    QueryText,
    GeneratedCaption,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_detection_threshold: f32,
    pub default_similarity_threshold: f32,
    /// Delay between consecutive score updates.
    pub update_interval_ms: u64,
    pub channel_capacity: usize,
    pub announce: AnnounceMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_detection_threshold: 0.1,
            default_similarity_threshold: 0.2,
            update_interval_ms: 50,
            channel_capacity: 32,
            announce: AnnounceMode::QueryText,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// 0 keeps tasks until they are streamed.
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbedderConfig {
    #[default]
    Remote,
    Histogram { bins: u32 },
    Torch { model_path: PathBuf, input_size: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub embedder: EmbedderConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8500".to_string(),
            timeout_secs: 120,
            embedder: EmbedderConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads `.env`, then the YAML file named by `VISUAL_SEARCH_CONFIG`
    /// (falling back to `config/visual_search.yaml` when present), then
    /// applies environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            Err(_) => {
                log::info!("No config file found, using built-in defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading configuration from {}", path.display());
        let config_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(config_str: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: "PORT", value: port })?;
        }
        if let Some(dir) = lookup("STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup("INFERENCE_URL") {
            self.inference.base_url = url;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.channel_capacity must be at least 1".into(),
            ));
        }
        if self.tasks.ttl_secs > 0 && self.tasks.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "tasks.sweep_interval_secs must be positive when a TTL is set".into(),
            ));
        }
        match &self.inference.embedder {
            EmbedderConfig::Histogram { bins } if *bins == 0 || *bins > 64 => Err(
                ConfigError::Invalid(format!("histogram bins must be in 1..=64, got {}", bins)),
            ),
            EmbedderConfig::Torch { input_size: 0, .. } => Err(ConfigError::Invalid(
                "torch embedder input_size must be positive".into(),
            )),
            EmbedderConfig::Torch { .. } if !cfg!(feature = "torch") => Err(ConfigError::Invalid(
                "torch embedder requested but the `torch` feature is not enabled".into(),
            )),
            _ => Ok(()),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
