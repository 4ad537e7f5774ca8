//! BERT-family encoder backend on candle.
//!
//! A model directory holds `config.json`, `tokenizer.json` and
//! `model.safetensors`. Hub loads go through `hf-hub` into the configured
//! cache directory. Forward passes return the last hidden state.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use std::fs;
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use super::backend::{
    EncodedInput, LoadOptions, LoadedModel, LoadedParts, ModelBackend, ModelInfo, OutputTensor,
    RawModelOutput, TextTokenizer,
};
use crate::types::{InferenceError, LoadError};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const WEIGHTS_FILE: &str = "model.safetensors";

#[derive(Debug, Default, Clone, Copy)]
pub struct CandleBertBackend;

impl CandleBertBackend {
    pub fn new() -> Self {
        Self
    }

    fn load_files(
        identifier: &str,
        config_path: &Path,
        tokenizer_path: &Path,
        weights_path: &Path,
        options: &LoadOptions,
    ) -> Result<LoadedParts, LoadError> {
        let invalid = |reason: String| LoadError::InvalidModel {
            identifier: identifier.to_string(),
            reason,
        };

        let content = fs::read_to_string(config_path).map_err(|e| LoadError::io(config_path, e))?;
        let config: BertConfig =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        let raw: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        let tokenizer =
            Tokenizer::from_file(tokenizer_path).map_err(|e| invalid(e.to_string()))?;

        let device = select_device(&options.device);
        let weights = fs::read(weights_path).map_err(|e| LoadError::io(weights_path, e))?;
        let vb = VarBuilder::from_buffered_safetensors(weights, DTYPE, &device)
            .map_err(|e| invalid(e.to_string()))?;
        let model = BertModel::load(vb, &config).map_err(|e| invalid(e.to_string()))?;

        tracing::info!("Loaded BERT encoder {} on {:?}", identifier, device);

        let info = ModelInfo {
            architecture: raw
                .get("model_type")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            vocab_size: raw.get("vocab_size").and_then(|v| v.as_u64()).map(|v| v as usize),
            hidden_size: raw.get("hidden_size").and_then(|v| v.as_u64()).map(|v| v as usize),
            labels: labels_from_config(&raw),
        };

        Ok(LoadedParts {
            model: Box::new(CandleBertModel {
                name: identifier.to_string(),
                model,
                device,
            }),
            tokenizer: Box::new(CandleTokenizer { inner: tokenizer }),
            info,
        })
    }
}

impl ModelBackend for CandleBertBackend {
    fn name(&self) -> &str {
        "candle"
    }

    fn load_local(&self, path: &Path, options: &LoadOptions) -> Result<LoadedParts, LoadError> {
        let dir = model_dir(path).ok_or_else(|| LoadError::InvalidModel {
            identifier: path.display().to_string(),
            reason: format!("no {} found", CONFIG_FILE),
        })?;
        Self::load_files(
            &path.display().to_string(),
            &dir.join(CONFIG_FILE),
            &dir.join(TOKENIZER_FILE),
            &dir.join(WEIGHTS_FILE),
            options,
        )
    }

    fn load_remote(&self, url: &str, _options: &LoadOptions) -> Result<LoadedParts, LoadError> {
        Err(LoadError::Unsupported {
            identifier: url.to_string(),
            reason: "download the model into a local directory or use a hub identifier"
                .to_string(),
        })
    }

    fn load_hub(&self, identifier: &str, options: &LoadOptions) -> Result<LoadedParts, LoadError> {
        let download = |e: hf_hub::api::sync::ApiError| LoadError::Download {
            identifier: identifier.to_string(),
            reason: e.to_string(),
        };

        tracing::info!("Downloading/Loading {} from Hugging Face Hub", identifier);
        let api = ApiBuilder::new()
            .with_cache_dir(options.cache_dir.clone())
            .build()
            .map_err(download)?;
        let repo = api.repo(Repo::new(identifier.to_string(), RepoType::Model));

        let config_path = repo.get(CONFIG_FILE).map_err(download)?;
        let tokenizer_path = repo.get(TOKENIZER_FILE).map_err(download)?;
        let weights_path = repo.get(WEIGHTS_FILE).map_err(download)?;

        Self::load_files(identifier, &config_path, &tokenizer_path, &weights_path, options)
    }
}

/// The directory holding `config.json`: `path` itself, or the first snapshot
/// of a hub-layout cache entry.
fn model_dir(path: &Path) -> Option<PathBuf> {
    if path.join(CONFIG_FILE).is_file() {
        return Some(path.to_path_buf());
    }
    let snapshots = fs::read_dir(path.join("snapshots")).ok()?;
    snapshots
        .flatten()
        .map(|entry| entry.path())
        .find(|candidate| candidate.join(CONFIG_FILE).is_file())
}

/// `id2label` from a classification config, ordered by index.
fn labels_from_config(raw: &serde_json::Value) -> Option<Vec<String>> {
    let map = raw.get("id2label")?.as_object()?;
    let mut labels: Vec<(usize, String)> = map
        .iter()
        .filter_map(|(k, v)| Some((k.parse().ok()?, v.as_str()?.to_string())))
        .collect();
    labels.sort_by_key(|(index, _)| *index);
    if labels.is_empty() {
        None
    } else {
        Some(labels.into_iter().map(|(_, label)| label).collect())
    }
}

fn select_device(requested: &str) -> Device {
    let ordinal = requested
        .strip_prefix("cuda:")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);

    if requested.starts_with("cuda") && candle_core::utils::cuda_is_available() {
        match Device::new_cuda(ordinal) {
            Ok(device) => return device,
            Err(e) => tracing::warn!("CUDA device {} unavailable, using CPU: {}", ordinal, e),
        }
    } else if requested == "metal" && candle_core::utils::metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => return device,
            Err(e) => tracing::warn!("Metal device unavailable, using CPU: {}", e),
        }
    } else if requested != "cpu" {
        tracing::warn!("Device {} not available, using CPU", requested);
    }
    Device::Cpu
}

struct CandleTokenizer {
    inner: Tokenizer,
}

impl CandleTokenizer {
    fn encoding(&self, text: &str) -> Result<tokenizers::Encoding, InferenceError> {
        self.inner
            .encode(text, true)
            .map_err(|e| InferenceError::Tokenization {
                reason: e.to_string(),
            })
    }
}

impl TextTokenizer for CandleTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>, InferenceError> {
        Ok(self.encoding(text)?.get_tokens().to_vec())
    }

    fn encode(&self, text: &str, max_length: usize) -> Result<EncodedInput, InferenceError> {
        let encoding = self.encoding(text)?;
        let pad_id = self.inner.get_padding().map(|p| p.pad_id).unwrap_or(0);
        Ok(EncodedInput::from_ids(
            encoding.get_ids().to_vec(),
            max_length,
            pad_id,
        ))
    }
}

struct CandleBertModel {
    name: String,
    model: BertModel,
    device: Device,
}

impl CandleBertModel {
    fn row(&self, values: &[u32]) -> candle_core::Result<Tensor> {
        Tensor::new(values, &self.device)?.unsqueeze(0)
    }

    fn run(&self, input: &EncodedInput) -> candle_core::Result<OutputTensorParts> {
        let ids = self.row(&input.input_ids)?;
        let type_ids = self.row(&input.token_type_ids)?;
        let mask = self.row(&input.attention_mask)?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;
        let shape = hidden.dims().to_vec();
        let data = hidden.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        Ok((shape, data))
    }
}

type OutputTensorParts = (Vec<usize>, Vec<f32>);

impl LoadedModel for CandleBertModel {
    fn forward(&self, input: &EncodedInput) -> Result<RawModelOutput, InferenceError> {
        let (shape, data) = self.run(input).map_err(|e| InferenceError::Forward {
            model: self.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(RawModelOutput::Sequence(OutputTensor::new(shape, data)?))
    }
}
