use crate::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub result_dir: PathBuf,
    pub model_dir: PathBuf,
    pub default_model: String,
    pub max_file_size: usize,
    pub retention_hours: u64,
    pub cleanup_interval_secs: u64,
    pub provider_base_url: String,
    pub provider_timeout_secs: u64,
    pub model_input_size: u32,
}

impl Config {
    /// Age after which stored files are swept
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 60 * 60)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Configuration rooted in `root`, used by tests
    #[cfg(test)]
    pub fn for_dir(root: &std::path::Path) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            upload_dir: root.join("uploads"),
            result_dir: root.join("results"),
            model_dir: root.join("models"),
            default_model: "segmenter.json".to_string(),
            max_file_size: 10 * 1024 * 1024,
            retention_hours: 24,
            cleanup_interval_secs: 0,
            provider_base_url: "http://127.0.0.1:9".to_string(),
            provider_timeout_secs: 2,
            model_input_size: 320,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            upload_dir: args.data_dir.join("uploads"),
            result_dir: args.data_dir.join("results"),
            model_dir: args.model_dir,
            default_model: args.default_model,
            max_file_size: args.max_file_size,
            retention_hours: args.retention_hours,
            cleanup_interval_secs: args.cleanup_interval_secs,
            provider_base_url: args.provider_base_url.trim_end_matches('/').to_string(),
            provider_timeout_secs: args.provider_timeout_secs,
            model_input_size: args.model_input_size,
        }
    }
}
