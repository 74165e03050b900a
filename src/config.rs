use anyhow::{Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Main configuration structure that can be loaded from CLI, environment, or config file
///
/// Example configuration file content
/// # Media Converter Configuration
///
/// host = "127.0.0.1"
/// port = 3000
/// max_file_size = 1073741824
/// upload_dir = "./temp_uploads"
/// output_dir = "./temp_outputs"
/// permits = 4
///
/// # Comma separated, omit to allow any origin
/// cors_origins = "http://localhost:5173,https://convert.example.com"
///
/// # External tools
/// ffmpeg_path = "/usr/local/bin/ffmpeg"
/// ffprobe_path = "/usr/local/bin/ffprobe"
///
/// # Front-end assets (optional)
/// public_dir = "./public"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(version, about, long_about = None)]
#[serde(default)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum accepted upload size in bytes
    #[arg(short, long, env = "MAX_FILE_SIZE", default_value_t = 1_073_741_824)]
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Directory for uploaded input files
    #[arg(short, long, env = "TEMP_UPLOAD_DIR", default_value = "./temp_uploads")]
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,

    /// Directory for converted output files
    #[arg(short, long, env = "TEMP_OUTPUT_DIR", default_value = "./temp_outputs")]
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Allowed CORS origins, comma separated (any origin when unset)
    #[arg(long, env = "CORS_ORIGINS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origins: Option<String>,

    /// ffmpeg executable
    #[arg(long, env = "FFMPEG_PATH", default_value = "ffmpeg")]
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// ffprobe executable
    #[arg(long, env = "FFPROBE_PATH", default_value = "ffprobe")]
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Directory with static front-end files
    #[arg(long, env = "PUBLIC_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_dir: Option<PathBuf>,

    /// Number of concurrent ffmpeg processes
    #[arg(long, env = "CONVERT_PERMITS", default_value_t = default_permits())]
    #[serde(default = "default_permits")]
    pub permits: usize,

    /// Progress stream polling interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Seconds a finished job is kept before it and its output are removed (0 = forever)
    #[arg(long, default_value_t = 3600)]
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_file_size: default_max_file_size(),
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            cors_origins: None,
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            public_dir: None,
            permits: default_permits(),
            progress_interval_ms: default_progress_interval_ms(),
            job_ttl_secs: default_job_ttl_secs(),
            config: None,
        }
    }
}

impl Config {
    /// Load configuration from CLI args and environment, optionally merging with a config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = config.config.clone() {
            let file_config = Self::from_file(&config_path)?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        // If CLI value is default, use file value
        if self.host == default_host() {
            self.host = file_config.host;
        }
        if self.port == default_port() {
            self.port = file_config.port;
        }
        if self.max_file_size == default_max_file_size() {
            self.max_file_size = file_config.max_file_size;
        }
        if self.upload_dir == default_upload_dir() {
            self.upload_dir = file_config.upload_dir;
        }
        if self.output_dir == default_output_dir() {
            self.output_dir = file_config.output_dir;
        }
        if self.ffmpeg_path == default_ffmpeg_path() {
            self.ffmpeg_path = file_config.ffmpeg_path;
        }
        if self.ffprobe_path == default_ffprobe_path() {
            self.ffprobe_path = file_config.ffprobe_path;
        }
        if self.permits == default_permits() {
            self.permits = file_config.permits;
        }
        if self.progress_interval_ms == default_progress_interval_ms() {
            self.progress_interval_ms = file_config.progress_interval_ms;
        }
        if self.job_ttl_secs == default_job_ttl_secs() {
            self.job_ttl_secs = file_config.job_ttl_secs;
        }

        // For Option fields, CLI takes precedence if Some
        if self.cors_origins.is_none() {
            self.cors_origins = file_config.cors_origins;
        }
        if self.public_dir.is_none() {
            self.public_dir = file_config.public_dir;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            bail!("max_file_size must be greater than zero");
        }
        if self.permits == 0 {
            bail!("permits must be greater than zero");
        }
        if self.permits > Semaphore::MAX_PERMITS {
            bail!("permits must not exceed {}", Semaphore::MAX_PERMITS);
        }
        if self.progress_interval_ms == 0 {
            bail!("progress_interval_ms must be greater than zero");
        }
        if self.ffmpeg_path.as_os_str().is_empty() || self.ffprobe_path.as_os_str().is_empty() {
            bail!("ffmpeg and ffprobe paths cannot be empty");
        }

        if let Some(origins) = self.cors_origins() {
            for origin in origins {
                if origin.is_empty() {
                    bail!("CORS origins cannot contain empty entries");
                }
                if !origin.starts_with("http://") && !origin.starts_with("https://") {
                    bail!("CORS origin must start with http:// or https://: {origin}");
                }
            }
        }

        Ok(())
    }

    /// Allowed origins, `None` meaning any origin
    pub fn cors_origins(&self) -> Option<Vec<String>> {
        self.cors_origins.as_ref().map(|origins| {
            origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .collect()
        })
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn job_ttl(&self) -> Option<Duration> {
        (self.job_ttl_secs > 0).then(|| Duration::from_secs(self.job_ttl_secs))
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_file_size() -> u64 {
    1_073_741_824
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./temp_uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./temp_outputs")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_permits() -> usize {
    num_cpus::get()
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_job_ttl_secs() -> u64 {
    3600
}
