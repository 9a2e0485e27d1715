//! Model maintenance subcommands

use crate::config::Config;
use crate::segmentation::ModelDescriptor;
use crate::Command;
use anyhow::{bail, Context};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.model_dir)
        .with_context(|| format!("Failed to create {}", config.model_dir.display()))?;

    match command {
        Command::InitModel { name, ratio, force } => {
            let path = init_model(&config.model_dir, &name, ratio, force)?;
            println!("Wrote {} (luminance, ratio {})", path.display(), ratio);
        }
        Command::FetchModel { url, name } => {
            let path = model_path(&config.model_dir, &name)?;
            let target = path.clone();
            tokio::task::spawn_blocking(move || download_file(&url, &target))
                .await
                .context("Download task panicked")??;
            println!("Downloaded {}", path.display());
        }
    }

    Ok(())
}

/// Write a luminance descriptor, the stand-in model used before a real
/// network is available
pub fn init_model(model_dir: &Path, name: &str, ratio: f32, force: bool) -> anyhow::Result<PathBuf> {
    let path = model_path(model_dir, name)?;
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let descriptor = ModelDescriptor::Luminance { ratio };
    let body = serde_json::to_string_pretty(&descriptor)?;
    std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!("Wrote model descriptor {:?}", path);
    Ok(path)
}

fn model_path(model_dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        bail!("Model name must be a plain file name: {:?}", name);
    }
    Ok(model_dir.join(name))
}

/// Download a file from URL to path using ureq
fn download_file(url: &str, path: &Path) -> anyhow::Result<()> {
    tracing::info!("Downloading {} (this may take a moment)...", url);

    let response = ureq::get(url)
        .call()
        .with_context(|| format!("Failed to download {}", url))?;

    let buffer = response
        .into_body()
        .with_config()
        .limit(u64::MAX)
        .read_to_vec()
        .context("Failed to read response body")?;

    let mut file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(&buffer)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!("Downloaded {} bytes to {:?}", buffer.len(), path);
    Ok(())
}
