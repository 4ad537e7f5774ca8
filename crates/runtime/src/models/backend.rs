//! Contract between the pipeline and a numeric model backend.
//!
//! A backend knows how to turn a directory, URL or hub identifier into a
//! model plus tokenizer. The pipeline only sees the traits below, so the
//! orchestration loop can be exercised without real weights.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::types::{InferenceError, LoadError};

/// Where a bundle was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    LocalPath,
    RemoteUrl,
    Cache,
    Hub,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSource::LocalPath => "local_path",
            ModelSource::RemoteUrl => "remote_url",
            ModelSource::Cache => "cache",
            ModelSource::Hub => "hub",
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options every backend load receives.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub device: String,
    pub cache_dir: PathBuf,
    pub trust_remote_code: bool,
    pub max_length: usize,
}

impl From<&PipelineConfig> for LoadOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            device: config.device.clone(),
            cache_dir: config.cache_dir.clone(),
            trust_remote_code: config.trust_remote_code,
            max_length: config.max_length,
        }
    }
}

/// Static facts about a loaded model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Architecture reported by the model's own config, if any.
    pub architecture: Option<String>,
    pub vocab_size: Option<usize>,
    pub hidden_size: Option<usize>,
    /// Output taxonomy, when the model declares one.
    pub labels: Option<Vec<String>>,
}

/// Token ids ready for a forward pass, truncated and padded to one length.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedInput {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub token_type_ids: Vec<u32>,
}

impl EncodedInput {
    /// Truncate to `max_length`, then right-pad with `pad_id`.
    pub fn from_ids(mut ids: Vec<u32>, max_length: usize, pad_id: u32) -> Self {
        ids.truncate(max_length);
        let real = ids.len();
        let mut attention_mask = vec![1; real];
        ids.resize(max_length, pad_id);
        attention_mask.resize(max_length, 0);
        Self {
            token_type_ids: vec![0; max_length],
            input_ids: ids,
            attention_mask,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Ids that are not padding.
    pub fn active_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.input_ids
            .iter()
            .zip(&self.attention_mask)
            .filter(|(_, mask)| **mask == 1)
            .map(|(id, _)| *id)
    }
}

/// Dense row-major tensor copied out of the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, InferenceError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(InferenceError::UnusableOutput {
                reason: format!(
                    "shape {:?} needs {} values, got {}",
                    shape,
                    expected,
                    data.len()
                ),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }
}

/// What a forward pass produced, by the kind of head that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum RawModelOutput {
    /// Per-token hidden states, `[batch, seq, hidden]`.
    Sequence(OutputTensor),
    /// Pooler output, `[batch, hidden]`.
    Pooled(OutputTensor),
    /// Classification logits, `[batch, labels]`.
    Logits(OutputTensor),
    /// Any other named outputs, in the order the backend returned them.
    Raw(Vec<(String, OutputTensor)>),
}

pub trait TextTokenizer: Send + Sync {
    /// Human-readable tokens for display.
    fn tokenize(&self, text: &str) -> Result<Vec<String>, InferenceError>;

    /// Model input ids, truncated and padded to `max_length`.
    fn encode(&self, text: &str, max_length: usize) -> Result<EncodedInput, InferenceError>;
}

pub trait LoadedModel: Send + Sync {
    fn forward(&self, input: &EncodedInput) -> Result<RawModelOutput, InferenceError>;
}

/// What a backend hands back from one successful load.
pub struct LoadedParts {
    pub model: Box<dyn LoadedModel>,
    pub tokenizer: Box<dyn TextTokenizer>,
    pub info: ModelInfo,
}

impl fmt::Debug for LoadedParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedParts")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// A resolved model ready for inference.
pub struct ModelBundle {
    pub model: Box<dyn LoadedModel>,
    pub tokenizer: Box<dyn TextTokenizer>,
    pub info: ModelInfo,
    /// `bert`, `gpt`, `t5` or `custom`, detected from the identifier.
    pub model_type: String,
    pub source: ModelSource,
    pub identifier: String,
    pub load_time: Duration,
}

impl fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBundle")
            .field("identifier", &self.identifier)
            .field("model_type", &self.model_type)
            .field("source", &self.source)
            .field("info", &self.info)
            .field("load_time", &self.load_time)
            .finish()
    }
}

/// A family of models the loader can resolve.
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Load from a directory or file on disk.
    fn load_local(&self, path: &Path, options: &LoadOptions) -> Result<LoadedParts, LoadError>;

    /// Load from an explicit `http(s)://` location.
    fn load_remote(&self, url: &str, options: &LoadOptions) -> Result<LoadedParts, LoadError>;

    /// Resolve a bare identifier against the backend's model hub.
    fn load_hub(&self, identifier: &str, options: &LoadOptions)
        -> Result<LoadedParts, LoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_input_pads_and_truncates() {
        let short = EncodedInput::from_ids(vec![5, 6], 4, 0);
        assert_eq!(short.input_ids, vec![5, 6, 0, 0]);
        assert_eq!(short.attention_mask, vec![1, 1, 0, 0]);
        assert_eq!(short.active_ids().collect::<Vec<_>>(), vec![5, 6]);

        let long = EncodedInput::from_ids(vec![1, 2, 3, 4, 5], 3, 0);
        assert_eq!(long.input_ids, vec![1, 2, 3]);
        assert_eq!(long.attention_mask, vec![1, 1, 1]);
        assert_eq!(long.token_type_ids.len(), 3);
    }

    #[test]
    fn test_output_tensor_checks_shape() {
        assert!(OutputTensor::new(vec![1, 3], vec![0.1, 0.2, 0.3]).is_ok());
        let err = OutputTensor::new(vec![2, 3], vec![0.1]).unwrap_err();
        assert!(matches!(err, InferenceError::UnusableOutput { .. }));
    }

    #[test]
    fn test_source_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(ModelSource::LocalPath).unwrap(),
            serde_json::json!("local_path")
        );
        assert_eq!(ModelSource::Hub.to_string(), "hub");
    }
}
