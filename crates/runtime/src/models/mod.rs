//! Model management for the Geko runtime
//!
//! - [`ModelRegistry`]: prioritized catalog of candidate models and the
//!   fallback policy over it
//! - [`ModelLoader`]: local path → remote URL → cache → hub resolution chain
//! - [`ModelBackend`]: the contract a numeric backend implements
//! - [`LexiconBackend`]: keyword classifier that needs no weights
//! - `CandleBertBackend`: BERT encoders on candle (feature `candle-backend`)

pub mod backend;
pub mod lexicon;
pub mod loader;
pub mod registry;

#[cfg(feature = "candle-backend")]
pub mod candle;

pub use backend::{
    EncodedInput, LoadOptions, LoadedModel, LoadedParts, ModelBackend, ModelBundle, ModelInfo,
    ModelSource, OutputTensor, RawModelOutput, TextTokenizer,
};
pub use lexicon::{Lexicon, LexiconBackend, BUILTIN_LEXICONS};
pub use loader::{detect_model_type, ModelLoader};
pub use registry::{
    FailureReason, FallbackDecision, ModelRegistry, ModelRegistryEntry, SharedRegistry,
};

#[cfg(feature = "candle-backend")]
pub use candle::CandleBertBackend;
