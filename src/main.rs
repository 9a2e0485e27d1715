use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;
mod error;
mod matting;
mod provider;
mod segmentation;
mod server;
mod storage;
mod watermark;

#[derive(Parser, Debug)]
#[command(name = "bgremove-server")]
#[command(about = "Background removal server with provider and local model backends")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "BGREMOVE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "BGREMOVE_PORT", default_value = "5000")]
    pub port: u16,

    /// Directory holding the uploads/ and results/ folders
    #[arg(long, env = "BGREMOVE_DATA_DIR", default_value = "static")]
    pub data_dir: PathBuf,

    /// Directory searched for segmentation models
    #[arg(long, env = "BGREMOVE_MODEL_DIR", default_value = "models")]
    pub model_dir: PathBuf,

    /// Model used by /process/local when the form names none
    #[arg(long, env = "BGREMOVE_DEFAULT_MODEL", default_value = "segmenter.json")]
    pub default_model: String,

    /// Maximum upload size in bytes (default: 10MB)
    #[arg(long, env = "BGREMOVE_MAX_FILE_SIZE", default_value = "10485760")]
    pub max_file_size: usize,

    /// Stored uploads and results older than this are deleted
    #[arg(long, env = "BGREMOVE_RETENTION_HOURS", default_value = "24")]
    pub retention_hours: u64,

    /// Run the cleanup sweep on this interval (0 = only when / is served)
    #[arg(long, env = "BGREMOVE_CLEANUP_INTERVAL_SECS", default_value = "0")]
    pub cleanup_interval_secs: u64,

    /// Base URL for provider requests, `{base}/{provider}/remove`
    #[arg(
        long,
        env = "BGREMOVE_PROVIDER_BASE_URL",
        default_value = "https://api.example.com"
    )]
    pub provider_base_url: String,

    /// Timeout for a single provider request
    #[arg(long, env = "BGREMOVE_PROVIDER_TIMEOUT_SECS", default_value = "15")]
    pub provider_timeout_secs: u64,

    /// Square input edge fed to ONNX segmentation models
    #[arg(long, env = "BGREMOVE_MODEL_INPUT_SIZE", default_value = "1024")]
    pub model_input_size: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write a luminance model descriptor into the model directory
    InitModel {
        /// File name of the descriptor
        #[arg(long, default_value = "segmenter.json")]
        name: String,

        /// Pixels brighter than mean * ratio are kept as subject
        #[arg(long, default_value = "0.9")]
        ratio: f32,

        /// Overwrite an existing descriptor
        #[arg(long)]
        force: bool,
    },
    /// Download a model file into the model directory
    FetchModel {
        /// Source URL of the model
        #[arg(long)]
        url: String,

        /// File name to store the model under (e.g. "u2net.onnx")
        #[arg(long)]
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let command = args.command.clone();
    let config = config::Config::from(args);

    if let Some(command) = command {
        return cli::run(command, &config).await;
    }

    tracing::info!("Starting bgremove-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Binding to {}:{}", config.host, config.port);

    server::run(config).await
}
