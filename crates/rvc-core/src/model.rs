use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{PitchMethod, Result, RvcError};

/// A named model is the pair of weight and feature-index files on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub weights_path: PathBuf,
    pub index_path: PathBuf,
}

impl ModelConfig {
    /// Resolves `<dir>/<name>.pth` + `<dir>/<name>.index`, requiring both.
    pub fn locate(dir: &Path, name: &str) -> Result<Self> {
        let weights_path = dir.join(format!("{name}.pth"));
        let index_path = dir.join(format!("{name}.index"));
        if !weights_path.exists() {
            return Err(RvcError::Config(format!(
                "model weights not found: {}",
                weights_path.display()
            )));
        }
        if !index_path.exists() {
            return Err(RvcError::Config(format!(
                "model index not found: {}",
                index_path.display()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            weights_path,
            index_path,
        })
    }
}

/// Lists model names in `dir` that have both a `.pth` and an `.index` file.
pub fn available_models(dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| RvcError::Config(format!("cannot read model dir {}: {e}", dir.display())))?;
    let mut models = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| RvcError::Config(format!("cannot read model dir entry: {e}")))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pth") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if path.with_extension("index").exists() {
            models.push(stem.to_string());
        }
    }
    models.sort();
    Ok(models)
}

/// The neural conversion capability, treated as a black box.
///
/// `window_16k` carries `skip_head + return_length + ...` context frames at
/// 16 kHz; only `return_length` frames of converted audio come back, at the
/// model's native rate (`return_length * native_rate / 100` samples).
/// Dropping an implementor must release any accelerator memory it holds.
pub trait ConversionModel: Send {
    fn native_sample_rate(&self) -> u32;

    #[allow(clippy::too_many_arguments)]
    fn infer(
        &mut self,
        window_16k: &[f32],
        block_frame_16k: usize,
        skip_head: usize,
        return_length: usize,
        pitch: f32,
        method: PitchMethod,
    ) -> Result<Vec<f32>>;
}

/// Mono f32 audio output capability. Opening the device happens in the
/// implementor's constructor; `write` blocks until the samples are queued.
/// Deliberately not `Send`: device handles are built and used on the
/// delivery worker's own thread.
pub trait OutputSink {
    fn write(&mut self, samples: &[f32]) -> Result<()>;
}

impl<S: OutputSink + ?Sized> OutputSink for Box<S> {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        (**self).write(samples)
    }
}

/// Passthrough model: returns the requested slice of its input unchanged.
/// Used by tests and as a monitoring path that skips conversion.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityModel;

impl ConversionModel for IdentityModel {
    fn native_sample_rate(&self) -> u32 {
        16_000
    }

    fn infer(
        &mut self,
        window_16k: &[f32],
        _block_frame_16k: usize,
        skip_head: usize,
        return_length: usize,
        _pitch: f32,
        _method: PitchMethod,
    ) -> Result<Vec<f32>> {
        let start = 160 * skip_head;
        let end = 160 * (skip_head + return_length);
        if end > window_16k.len() {
            return Err(RvcError::Inference(format!(
                "identity window too short: {} < {end}",
                window_16k.len()
            )));
        }
        Ok(window_16k[start..end].to_vec())
    }
}
