//! Segmentation models producing foreground masks
//!
//! Models live in the configured model directory. A `.json` file is a
//! descriptor naming one of the built-in segmenters and its parameters, an
//! `.onnx` file is a neural network run through tract (feature `model-onnx`).

pub mod heuristic;
pub mod luminance;

#[cfg(feature = "model-onnx")]
pub mod onnx;

pub use heuristic::CornerHeuristic;
pub use luminance::LuminanceSegmenter;

use crate::error::BgError;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Trait that all segmentation models must implement
pub trait Segmenter: Send + Sync {
    /// Returns the model identifier (e.g., "luminance", "onnx")
    fn name(&self) -> &'static str;

    /// Returns a human-readable description of the model
    fn description(&self) -> &'static str;

    /// Predict a mask for the image: 0 is background, 255 is subject
    fn predict(&self, image: &RgbImage) -> Result<GrayImage, BgError>;
}

/// Contents of a `.json` model descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelDescriptor {
    Luminance {
        #[serde(default = "luminance::default_ratio")]
        ratio: f32,
    },
    Corner {
        #[serde(default = "heuristic::default_threshold")]
        threshold: f32,
    },
}

impl ModelDescriptor {
    fn build(&self) -> Arc<dyn Segmenter> {
        match *self {
            ModelDescriptor::Luminance { ratio } => Arc::new(LuminanceSegmenter::new(ratio)),
            ModelDescriptor::Corner { threshold } => {
                Arc::new(CornerHeuristic::with_threshold(threshold))
            }
        }
    }
}

/// File extensions the registry knows how to load
pub fn supported_extensions() -> Vec<&'static str> {
    let mut exts = vec!["json"];
    if cfg!(feature = "model-onnx") {
        exts.push("onnx");
    }
    exts
}

/// Loads models from the model directory and caches them by name
pub struct ModelRegistry {
    model_dir: PathBuf,
    #[cfg_attr(not(feature = "model-onnx"), allow(dead_code))]
    input_size: u32,
    loaded: RwLock<HashMap<String, Arc<dyn Segmenter>>>,
}

impl ModelRegistry {
    pub fn new(model_dir: impl Into<PathBuf>, input_size: u32) -> Self {
        Self {
            model_dir: model_dir.into(),
            input_size,
            loaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Get a model by file name, loading it on first use
    pub fn get(&self, name: &str) -> Result<Arc<dyn Segmenter>, BgError> {
        if let Some(model) = self.cached(name) {
            return Ok(model);
        }

        let path = self.resolve(name)?;
        let model = self.load(&path)?;

        tracing::info!(
            "Loaded {} model from {:?} ({})",
            model.name(),
            path,
            model.description()
        );

        let mut loaded = self
            .loaded
            .write()
            .map_err(|_| BgError::Internal("model cache lock poisoned".to_string()))?;
        Ok(loaded.entry(name.to_string()).or_insert(model).clone())
    }

    fn cached(&self, name: &str) -> Option<Arc<dyn Segmenter>> {
        self.loaded.read().ok()?.get(name).cloned()
    }

    /// Map a model name onto a file inside the model directory
    fn resolve(&self, name: &str) -> Result<PathBuf, BgError> {
        let traversal = name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..");
        if traversal {
            return Err(BgError::ModelNotFound(name.to_string()));
        }

        let path = self.model_dir.join(name);
        if !path.is_file() {
            return Err(BgError::ModelNotFound(path.display().to_string()));
        }
        Ok(path)
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn Segmenter>, BgError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "json" => {
                let raw = std::fs::read_to_string(path)
                    .map_err(|e| BgError::ModelLoad(format!("Failed to read descriptor: {}", e)))?;
                let descriptor: ModelDescriptor = serde_json::from_str(&raw)
                    .map_err(|e| BgError::ModelLoad(format!("Invalid descriptor: {}", e)))?;
                Ok(descriptor.build())
            }
            #[cfg(feature = "model-onnx")]
            "onnx" => Ok(Arc::new(onnx::OnnxSegmenter::load(path, self.input_size)?)),
            _ => Err(BgError::ModelLoad(format!(
                "unsupported model format: {}",
                path.display()
            ))),
        }
    }

    /// List model files in the model directory that can be loaded
    pub fn available(&self) -> Vec<String> {
        let exts = supported_extensions();
        let Ok(entries) = std::fs::read_dir(&self.model_dir) else {
            return Vec::new();
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                name.rsplit_once('.')
                    .map(|(_, ext)| exts.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
            })
            .collect();
        names.sort();
        names
    }
}

/// Run the named model, falling back to the corner heuristic on model failure
///
/// Returns the mask and the label of whatever produced it.
pub fn segment_with_fallback(
    registry: &ModelRegistry,
    model_name: &str,
    image: &RgbImage,
) -> Result<(GrayImage, String), BgError> {
    let attempt = registry
        .get(model_name)
        .and_then(|model| model.predict(image));

    match attempt {
        Ok(mask) => Ok((mask, format!("model:{}", model_name))),
        Err(e) if e.is_model_failure() => {
            tracing::warn!("Model '{}' unavailable, using corner heuristic: {}", model_name, e);
            let mask = CornerHeuristic::default().predict(image)?;
            Ok((mask, "heuristic".to_string()))
        }
        Err(e) => Err(e),
    }
}
