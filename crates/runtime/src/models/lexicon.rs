//! Keyword-lexicon classifier backend.
//!
//! A lexicon model is a directory holding `lexicon.json`:
//!
//! ```json
//! {
//!   "labels": ["general", "technical"],
//!   "keywords": { "technical": ["server", "deploy"] },
//!   "scale": 2.5
//! }
//! ```
//!
//! Each label's logit is `scale` times the number of its keywords found in the
//! input. The hub is a small built-in catalog that gets materialized into the
//! cache directory on first use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use super::backend::{
    EncodedInput, LoadOptions, LoadedModel, LoadedParts, ModelBackend, ModelInfo, OutputTensor,
    RawModelOutput, TextTokenizer,
};
use super::loader::cache_candidates;
use crate::types::{InferenceError, LoadError};

pub const LEXICON_FILE: &str = "lexicon.json";

const PAD_ID: u32 = 0;
const UNK_ID: u32 = 1;
const FIRST_WORD_ID: u32 = 2;

/// Names served by the built-in catalog.
pub const BUILTIN_LEXICONS: &[&str] = &["geko-lexicon-base", "geko-lexicon-lite"];

type KeywordTable = &'static [(&'static str, &'static [&'static str])];

const BASE_KEYWORDS: KeywordTable = &[
    ("general", &["info", "information", "update", "news", "overview", "about", "today"]),
    (
        "technical",
        &[
            "software", "code", "api", "server", "database", "network", "system", "bug", "deploy",
            "deployment", "algorithm", "model", "data", "rust",
        ],
    ),
    (
        "social",
        &["friend", "friends", "family", "community", "share", "party", "team", "together", "chat"],
    ),
    (
        "warning",
        &[
            "warning", "error", "failure", "danger", "risk", "alert", "urgent", "critical", "breach",
            "outage",
        ],
    ),
    ("neutral", &["ok", "okay", "fine", "normal", "regular", "standard"]),
];

const LITE_KEYWORDS: KeywordTable = &[
    ("general", &["news", "update"]),
    ("technical", &["server", "code", "api", "data"]),
    ("social", &["friend", "team"]),
    ("warning", &["error", "alert", "risk"]),
    ("neutral", &["ok", "fine"]),
];

/// On-disk lexicon definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lexicon {
    pub labels: Vec<String>,
    #[serde(default)]
    pub keywords: BTreeMap<String, Vec<String>>,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl Lexicon {
    fn validate(&self, identifier: &str) -> Result<(), LoadError> {
        let invalid = |reason: String| LoadError::InvalidModel {
            identifier: identifier.to_string(),
            reason,
        };

        if self.labels.is_empty() {
            return Err(invalid("lexicon declares no labels".to_string()));
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(invalid(format!("scale must be positive, got {}", self.scale)));
        }
        if let Some(unknown) = self.keywords.keys().find(|k| !self.labels.contains(*k)) {
            return Err(invalid(format!("keywords reference unknown label '{}'", unknown)));
        }
        Ok(())
    }

    /// Built-in catalog entry by name.
    pub fn builtin(name: &str) -> Option<Self> {
        let (scale, keywords) = match name {
            "geko-lexicon-base" => (2.5, BASE_KEYWORDS),
            "geko-lexicon-lite" => (4.0, LITE_KEYWORDS),
            _ => return None,
        };

        Some(Self {
            labels: keywords.iter().map(|(label, _)| label.to_string()).collect(),
            keywords: keywords
                .iter()
                .map(|(label, words)| {
                    (label.to_string(), words.iter().map(|w| w.to_string()).collect())
                })
                .collect(),
            scale,
        })
    }

    fn into_parts(self) -> Result<LoadedParts, LoadError> {
        let mut vocab: HashMap<String, u32> = HashMap::new();
        let mut hits: Vec<Vec<usize>> = Vec::new();

        for (label_index, label) in self.labels.iter().enumerate() {
            let Some(words) = self.keywords.get(label) else {
                continue;
            };
            for word in words {
                let word = word.trim().to_lowercase();
                if word.is_empty() {
                    continue;
                }
                let next_id = FIRST_WORD_ID + vocab.len() as u32;
                let id = *vocab.entry(word).or_insert(next_id);
                let slot = (id - FIRST_WORD_ID) as usize;
                if slot == hits.len() {
                    hits.push(Vec::new());
                }
                if !hits[slot].contains(&label_index) {
                    hits[slot].push(label_index);
                }
            }
        }

        let word_pattern = Regex::new(r"\w+").map_err(|e| LoadError::InvalidModel {
            identifier: "lexicon".to_string(),
            reason: e.to_string(),
        })?;

        let info = ModelInfo {
            architecture: Some("lexicon".to_string()),
            vocab_size: Some(vocab.len() + FIRST_WORD_ID as usize),
            hidden_size: None,
            labels: Some(self.labels.clone()),
        };

        Ok(LoadedParts {
            model: Box::new(LexiconModel {
                hits,
                label_count: self.labels.len(),
                scale: self.scale,
            }),
            tokenizer: Box::new(LexiconTokenizer {
                vocab,
                word_pattern,
            }),
            info,
        })
    }
}

struct LexiconTokenizer {
    vocab: HashMap<String, u32>,
    word_pattern: Regex,
}

impl TextTokenizer for LexiconTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<String>, InferenceError> {
        Ok(self
            .word_pattern
            .find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect())
    }

    fn encode(&self, text: &str, max_length: usize) -> Result<EncodedInput, InferenceError> {
        if max_length == 0 {
            return Err(InferenceError::Tokenization {
                reason: "max_length must be > 0".to_string(),
            });
        }
        let ids = self
            .tokenize(text)?
            .iter()
            .map(|word| self.vocab.get(word).copied().unwrap_or(UNK_ID))
            .collect();
        Ok(EncodedInput::from_ids(ids, max_length, PAD_ID))
    }
}

struct LexiconModel {
    /// Labels each keyword id votes for, indexed by `id - FIRST_WORD_ID`.
    hits: Vec<Vec<usize>>,
    label_count: usize,
    scale: f32,
}

impl LoadedModel for LexiconModel {
    fn forward(&self, input: &EncodedInput) -> Result<RawModelOutput, InferenceError> {
        let mut logits = vec![0.0f32; self.label_count];
        for id in input.active_ids().filter(|id| *id >= FIRST_WORD_ID) {
            if let Some(labels) = self.hits.get((id - FIRST_WORD_ID) as usize) {
                for &label in labels {
                    logits[label] += self.scale;
                }
            }
        }
        Ok(RawModelOutput::Logits(OutputTensor::new(
            vec![1, self.label_count],
            logits,
        )?))
    }
}

/// Backend serving [`Lexicon`] models.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexiconBackend;

impl LexiconBackend {
    pub fn new() -> Self {
        Self
    }

    fn read(path: &Path) -> Result<Lexicon, LoadError> {
        let file = if path.is_dir() {
            path.join(LEXICON_FILE)
        } else {
            path.to_path_buf()
        };
        let identifier = path.display().to_string();

        let content = fs::read_to_string(&file).map_err(|e| LoadError::io(&file, e))?;
        let lexicon: Lexicon =
            serde_json::from_str(&content).map_err(|e| LoadError::InvalidModel {
                identifier: identifier.clone(),
                reason: e.to_string(),
            })?;
        lexicon.validate(&identifier)?;
        Ok(lexicon)
    }

    /// Persist a catalog entry into the flat cache layout.
    fn store_in_cache(identifier: &str, lexicon: &Lexicon, options: &LoadOptions) {
        let Some(dir) = cache_candidates(&options.cache_dir, identifier).into_iter().next() else {
            return;
        };
        let written = fs::create_dir_all(&dir).and_then(|_| {
            let json = serde_json::to_string_pretty(lexicon)?;
            fs::write(dir.join(LEXICON_FILE), json)
        });
        match written {
            Ok(()) => tracing::debug!("Cached lexicon {} at {}", identifier, dir.display()),
            Err(e) => tracing::warn!("Could not cache lexicon {}: {}", identifier, e),
        }
    }
}

impl ModelBackend for LexiconBackend {
    fn name(&self) -> &str {
        "lexicon"
    }

    fn load_local(&self, path: &Path, _options: &LoadOptions) -> Result<LoadedParts, LoadError> {
        Self::read(path)?.into_parts()
    }

    fn load_remote(&self, url: &str, _options: &LoadOptions) -> Result<LoadedParts, LoadError> {
        Err(LoadError::Unsupported {
            identifier: url.to_string(),
            reason: "lexicon models cannot be fetched from URLs".to_string(),
        })
    }

    fn load_hub(&self, identifier: &str, options: &LoadOptions) -> Result<LoadedParts, LoadError> {
        let lexicon = Lexicon::builtin(identifier).ok_or_else(|| LoadError::NotFound {
            identifier: identifier.to_string(),
        })?;
        Self::store_in_cache(identifier, &lexicon, options);
        lexicon.into_parts()
    }
}
