//! Turning a raw forward-pass output into class probabilities.

use crate::models::{OutputTensor, RawModelOutput};
use crate::types::InferenceError;

/// Taxonomy used when the model declares no labels.
pub const DEFAULT_CATEGORIES: [&str; 5] = ["general", "technical", "social", "warning", "neutral"];

/// Scores derived from one probability vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub predicted_category: String,
    pub relevance_score: f64,
    pub raw_scores: Vec<f64>,
}

/// Collapse the output to one score vector per batch row.
///
/// Hidden states are mean-pooled over the sequence; pooled outputs and logits
/// pass through; an unnamed output uses its first field, pooled when it still
/// carries a sequence dimension.
pub fn pooled(raw: &RawModelOutput) -> Result<OutputTensor, InferenceError> {
    match raw {
        RawModelOutput::Sequence(hidden) => mean_over_sequence(hidden),
        RawModelOutput::Pooled(tensor) | RawModelOutput::Logits(tensor) => Ok(tensor.clone()),
        RawModelOutput::Raw(fields) => {
            let (name, first) = fields.first().ok_or_else(|| InferenceError::UnusableOutput {
                reason: "model returned no outputs".to_string(),
            })?;
            tracing::debug!("Using first raw output field '{}'", name);
            if first.rank() > 2 {
                mean_over_sequence(first)
            } else {
                Ok(first.clone())
            }
        }
    }
}

/// Mean over axis 1: `[batch, seq, rest..]` becomes `[batch, rest..]`.
fn mean_over_sequence(tensor: &OutputTensor) -> Result<OutputTensor, InferenceError> {
    if tensor.rank() < 3 {
        return Err(InferenceError::UnusableOutput {
            reason: format!("expected [batch, seq, hidden], got {:?}", tensor.shape()),
        });
    }
    let (shape, values) = (tensor.shape(), tensor.data());
    let batch = shape[0];
    let seq = shape[1];
    if seq == 0 {
        return Err(InferenceError::UnusableOutput {
            reason: "empty sequence dimension".to_string(),
        });
    }
    let inner: usize = shape[2..].iter().product();

    let mut data = vec![0.0f32; batch * inner];
    for b in 0..batch {
        for s in 0..seq {
            let offset = (b * seq + s) * inner;
            for j in 0..inner {
                data[b * inner + j] += values[offset + j];
            }
        }
    }
    for value in &mut data {
        *value /= seq as f32;
    }

    let mut pooled_shape = vec![batch];
    pooled_shape.extend_from_slice(&shape[2..]);
    OutputTensor::new(pooled_shape, data)
}

/// Probabilities for the first batch row: softmax over the last dimension
/// when it is wider than one, sigmoid otherwise.
pub fn probabilities(raw: &RawModelOutput) -> Result<Vec<f64>, InferenceError> {
    let tensor = pooled(raw)?;
    let width = tensor.shape().last().copied().unwrap_or(0);
    if width == 0 || tensor.data().len() < width {
        return Err(InferenceError::UnusableOutput {
            reason: format!("no scores in output of shape {:?}", tensor.shape()),
        });
    }

    let row: Vec<f64> = tensor.data()[..width].iter().map(|v| *v as f64).collect();
    if row.iter().any(|v| !v.is_finite()) {
        return Err(InferenceError::UnusableOutput {
            reason: "non-finite values in model output".to_string(),
        });
    }

    if width > 1 {
        Ok(softmax(&row))
    } else {
        Ok(row.iter().map(|v| sigmoid(*v)).collect())
    }
}

fn softmax(row: &[f64]) -> Vec<f64> {
    let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = row.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Map probabilities onto `categories`.
///
/// The prediction is the argmax over the first `categories.len()` scores when
/// that many exist, otherwise the first category.
pub fn score(probabilities: &[f64], categories: &[String]) -> Scored {
    let n = categories.len();
    let top = if n > 0 && probabilities.len() >= n {
        probabilities[..n]
            .iter()
            .enumerate()
            .fold(0, |best, (i, p)| if *p > probabilities[best] { i } else { best })
    } else {
        0
    };

    let relevance_score = probabilities.iter().copied().fold(0.0, f64::max);

    Scored {
        predicted_category: categories.get(top).cloned().unwrap_or_default(),
        relevance_score: round4(relevance_score),
        raw_scores: probabilities.iter().take(n).map(|p| round4(*p)).collect(),
    }
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
