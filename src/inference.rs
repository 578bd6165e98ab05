//! Model loading and the forward pass.
//!
//! The model directory is an ONNX export of a speech emotion classifier plus
//! its `config.json` (labels) and optional `preprocessor_config.json`.
//! Everything is loaded once at startup; the resulting [`InferenceEngine`]
//! is immutable and shared across requests.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tract_onnx::prelude::*;

use crate::audio::SAMPLE_RATE;
use crate::error::AppError;
use crate::features::{FeatureExtractor, ModelInput};
use crate::models::{EmotionScore, PredictionResponse};

/// Something that maps extracted features to one logit per label.
pub trait Classifier: Send + Sync {
    fn labels(&self) -> &[String];
    fn logits(&self, input: &ModelInput) -> Result<Vec<f32>, AppError>;
}

#[derive(Debug, Deserialize)]
struct ModelConfig {
    id2label: HashMap<String, String>,
}

/// Turns an `id2label` map into a label list indexed by class id.
fn labels_from_id2label(id2label: HashMap<String, String>) -> Result<Vec<String>, AppError> {
    let mut indexed = Vec::with_capacity(id2label.len());
    for (id, label) in id2label {
        let id: usize = id
            .parse()
            .map_err(|_| AppError::ModelLoad(format!("non-numeric class id {:?}", id)))?;
        indexed.push((id, label));
    }
    indexed.sort_by_key(|(id, _)| *id);

    let mut labels: Vec<String> = Vec::with_capacity(indexed.len());
    for (expected, (id, label)) in indexed.into_iter().enumerate() {
        if id != expected {
            return Err(AppError::ModelLoad(format!(
                "class ids must be contiguous from 0, missing {}",
                expected
            )));
        }
        if labels.contains(&label) {
            return Err(AppError::ModelLoad(format!("duplicate label {:?}", label)));
        }
        labels.push(label);
    }

    if labels.is_empty() {
        return Err(AppError::ModelLoad("model declares no labels".to_string()));
    }
    Ok(labels)
}

pub fn load_labels(dir: &Path) -> Result<Vec<String>, AppError> {
    let path = dir.join("config.json");
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| AppError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    let config: ModelConfig = serde_json::from_str(&raw)
        .map_err(|e| AppError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    labels_from_id2label(config.id2label)
}

type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// tract-backed ONNX classifier.
pub struct OnnxClassifier {
    model: OnnxPlan,
    labels: Vec<String>,
    wants_mask: bool,
}

impl OnnxClassifier {
    pub fn load(dir: &Path, labels: Vec<String>) -> Result<Self, AppError> {
        let path = dir.join("model.onnx");
        if !path.exists() {
            return Err(AppError::ModelLoad(format!(
                "model not found at {}",
                path.display()
            )));
        }

        let model = tract_onnx::onnx()
            .model_for_path(&path)
            .map_err(|e| AppError::ModelLoad(format!("failed to parse ONNX model: {}", e)))?
            .into_optimized()
            .map_err(|e| AppError::ModelLoad(format!("failed to optimize ONNX model: {}", e)))?
            .into_runnable()
            .map_err(|e| AppError::ModelLoad(format!("failed to make model runnable: {}", e)))?;

        let wants_mask = model.model().inputs.len() > 1;
        log::info!(
            "Loaded {} ({} labels, {} inputs)",
            path.display(),
            labels.len(),
            model.model().inputs.len()
        );

        Ok(Self {
            model,
            labels,
            wants_mask,
        })
    }
}

impl Classifier for OnnxClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn logits(&self, input: &ModelInput) -> Result<Vec<f32>, AppError> {
        let mut inputs: TVec<TValue> = tvec!(input.input_values.clone().into_tensor().into());
        if self.wants_mask {
            inputs.push(input.attention_mask.clone().into_tensor().into());
        }

        let result = self
            .model
            .run(inputs)
            .map_err(|e| AppError::Inference(e.to_string()))?;

        let output = result
            .first()
            .ok_or_else(|| AppError::Inference("model produced no output".to_string()))?;
        let logits = output
            .to_array_view::<f32>()
            .map_err(|e| AppError::Inference(e.to_string()))?;

        // [1, labels]; take the single batch row.
        Ok(logits.iter().copied().collect())
    }
}

/// Feature extraction, forward pass and ranking for one clip.
pub struct InferenceEngine {
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
}

impl InferenceEngine {
    pub fn new(extractor: FeatureExtractor, classifier: Box<dyn Classifier>) -> Self {
        Self {
            extractor,
            classifier,
        }
    }

    /// Loads extractor, labels and ONNX graph from a model directory.
    pub fn load(dir: &Path) -> Result<Self, AppError> {
        if !dir.is_dir() {
            return Err(AppError::ModelLoad(format!(
                "model directory {} does not exist",
                dir.display()
            )));
        }
        let extractor = FeatureExtractor::from_dir(dir)?;
        log::debug!(
            "extractor: normalize={} attention_mask={}",
            extractor.config().do_normalize,
            extractor.config().return_attention_mask
        );
        let labels = load_labels(dir)?;
        let classifier = OnnxClassifier::load(dir, labels)?;
        Ok(Self::new(extractor, Box::new(classifier)))
    }

    pub fn labels(&self) -> &[String] {
        self.classifier.labels()
    }

    pub fn predict(&self, samples: &[f32]) -> Result<PredictionResponse, AppError> {
        let input = self.extractor.extract(samples, SAMPLE_RATE)?;
        let logits = self.classifier.logits(&input)?;

        let labels = self.classifier.labels();
        if logits.len() != labels.len() {
            return Err(AppError::Inference(format!(
                "logit count {} does not match {} labels",
                logits.len(),
                labels.len()
            )));
        }

        let probs = softmax(&logits);
        if probs.iter().any(|p| !p.is_finite()) {
            return Err(AppError::Inference("model produced non-finite scores".to_string()));
        }

        PredictionResponse::from_ranked(rank(labels, &probs))
            .ok_or_else(|| AppError::Inference("empty prediction".to_string()))
    }
}

pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .fold(f32::NEG_INFINITY, f32::max) as f64;
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Orders labels by descending probability. The sort is stable, so exact
/// ties stay in class-index order.
pub fn rank(labels: &[String], probs: &[f64]) -> Vec<EmotionScore> {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    order
        .into_iter()
        .map(|i| EmotionScore {
            label: labels[i].clone(),
            score: to_percent(probs[i]),
        })
        .collect()
}

/// Halves round away from zero; Python's `round` would pick the even digit.
fn to_percent(p: f64) -> f64 {
    (p * 100.0 * 100.0).round() / 100.0
}
