//! Text normalization and tokenization ahead of a forward pass.

use std::time::Instant;

use crate::models::{EncodedInput, TextTokenizer};
use crate::types::InferenceError;

/// Punctuation kept by [`normalize_text`] besides word characters and
/// whitespace.
const KEPT_PUNCTUATION: &str = ".,!?;:'\"-";

/// One input, ready for the active model.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub original_text: String,
    pub normalized_text: String,
    pub tokens: Vec<String>,
    pub inputs: EncodedInput,
    pub token_count: usize,
    /// Seconds spent normalizing and tokenizing.
    pub processing_time: f64,
}

/// Trim, drop characters outside `[\w\s.,!?;:'"-]`, collapse whitespace runs.
pub fn normalize_text(text: &str) -> String {
    let kept: String = text
        .trim()
        .chars()
        .filter(|c| {
            c.is_alphanumeric() || *c == '_' || c.is_whitespace() || KEPT_PUNCTUATION.contains(*c)
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn preprocess_text(
    text: &str,
    tokenizer: &dyn TextTokenizer,
    max_length: usize,
) -> Result<Preprocessed, InferenceError> {
    let start = Instant::now();
    let normalized_text = normalize_text(text);
    let tokens = tokenizer.tokenize(&normalized_text)?;
    let inputs = tokenizer.encode(&normalized_text, max_length)?;
    let processing_time = start.elapsed().as_secs_f64();

    tracing::debug!(
        "Pre-processing done in {:.4}s, {} tokens",
        processing_time,
        tokens.len()
    );

    Ok(Preprocessed {
        original_text: text.to_string(),
        normalized_text,
        token_count: tokens.len(),
        tokens,
        inputs,
        processing_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Whitespace;

    impl TextTokenizer for Whitespace {
        fn tokenize(&self, text: &str) -> Result<Vec<String>, InferenceError> {
            Ok(text.split_whitespace().map(str::to_string).collect())
        }

        fn encode(&self, text: &str, max_length: usize) -> Result<EncodedInput, InferenceError> {
            let ids = (1..=text.split_whitespace().count() as u32).collect();
            Ok(EncodedInput::from_ids(ids, max_length, 0))
        }
    }

    #[test]
    fn test_normalize_strips_and_collapses() {
        assert_eq!(
            normalize_text("  This is a test   sentence with special characters !@#$%  "),
            "This is a test sentence with special characters !"
        );
        assert_eq!(normalize_text("it's \"fine\" - ok?"), "it's \"fine\" - ok?");
        assert_eq!(normalize_text("snake_case\tand\nnewlines"), "snake_case and newlines");
        assert_eq!(normalize_text("caffè ñandú"), "caffè ñandú");
        assert_eq!(normalize_text("@#$"), "");
    }

    #[test]
    fn test_preprocess_keeps_original() {
        let pre = preprocess_text("  Hello,   world!!  ", &Whitespace, 4).unwrap();
        assert_eq!(pre.original_text, "  Hello,   world!!  ");
        assert_eq!(pre.normalized_text, "Hello, world!!");
        assert_eq!(pre.tokens, vec!["Hello,", "world!!"]);
        assert_eq!(pre.token_count, 2);
        assert_eq!(pre.inputs.input_ids, vec![1, 2, 0, 0]);
    }
}
