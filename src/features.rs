use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use serde::Deserialize;

use crate::audio::SAMPLE_RATE;
use crate::error::AppError;

const NORM_EPS: f32 = 1e-7;

/// Subset of a `preprocessor_config.json` the raw waveform extractor needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: u32,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default)]
    pub return_attention_mask: bool,
}

fn default_sampling_rate() -> u32 {
    SAMPLE_RATE
}

fn default_true() -> bool {
    true
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            sampling_rate: SAMPLE_RATE,
            do_normalize: true,
            return_attention_mask: false,
        }
    }
}

/// Model-ready tensors for a single clip, batch size one.
#[derive(Debug, Clone)]
pub struct ModelInput {
    pub input_values: Array2<f32>,
    pub attention_mask: Array2<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor {
    config: ExtractorConfig,
}

impl FeatureExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// Loads the extractor settings, falling back to defaults when the
    /// artifact ships without a preprocessor config.
    pub fn from_dir(dir: &Path) -> Result<Self, AppError> {
        let path = dir.join("preprocessor_config.json");
        if !path.exists() {
            log::warn!(
                "{} not found, using default extractor settings",
                path.display()
            );
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| AppError::ModelLoad(format!("{}: {}", path.display(), e)))?;
        let config: ExtractorConfig = serde_json::from_str(&raw)
            .map_err(|e| AppError::ModelLoad(format!("{}: {}", path.display(), e)))?;

        if config.sampling_rate != SAMPLE_RATE {
            return Err(AppError::ModelLoad(format!(
                "model expects {} Hz audio, decoder produces {} Hz",
                config.sampling_rate, SAMPLE_RATE
            )));
        }
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    pub fn extract(&self, samples: &[f32], sampling_rate: u32) -> Result<ModelInput, AppError> {
        if sampling_rate != self.config.sampling_rate {
            return Err(AppError::Inference(format!(
                "extractor configured for {} Hz, got {} Hz",
                self.config.sampling_rate, sampling_rate
            )));
        }

        let mut values = Array1::from(samples.to_vec());
        if self.config.do_normalize {
            normalize(&mut values);
        }

        let len = values.len();
        Ok(ModelInput {
            input_values: values.insert_axis(Axis(0)),
            attention_mask: Array2::ones((1, len)),
        })
    }
}

/// Zero mean, unit variance in place.
fn normalize(values: &mut Array1<f32>) {
    let mean = match values.mean() {
        Some(m) => m,
        None => return,
    };
    let var = values.var(0.0);
    let denom = (var + NORM_EPS).sqrt();
    values.mapv_inplace(|x| (x - mean) / denom);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_zero_mean_unit_variance() {
        let extractor = FeatureExtractor::default();
        let input = extractor
            .extract(&[0.1, 0.3, -0.2, 0.6, 0.0], SAMPLE_RATE)
            .unwrap();

        let values = input.input_values.row(0).to_owned();
        assert_eq!(input.input_values.shape(), &[1, 5]);
        assert!(values.mean().unwrap().abs() < 1e-5);
        assert!((values.var(0.0) - 1.0).abs() < 1e-3);
        assert_eq!(input.attention_mask.sum(), 5);
    }

    #[test]
    fn silence_stays_finite() {
        let extractor = FeatureExtractor::default();
        let input = extractor.extract(&[0.0; 16], SAMPLE_RATE).unwrap();
        assert!(input.input_values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn passthrough_without_normalization() {
        let extractor = FeatureExtractor::new(ExtractorConfig {
            do_normalize: false,
            ..ExtractorConfig::default()
        });
        let input = extractor.extract(&[0.5, -0.5], SAMPLE_RATE).unwrap();
        assert_eq!(input.input_values.as_slice().unwrap(), &[0.5, -0.5]);
    }

    #[test]
    fn empty_clip_is_passed_through() {
        let input = FeatureExtractor::default().extract(&[], SAMPLE_RATE).unwrap();
        assert_eq!(input.input_values.shape(), &[1, 0]);
    }

    #[test]
    fn wrong_rate_is_refused() {
        let err = FeatureExtractor::default()
            .extract(&[0.0; 4], 8_000)
            .unwrap_err();
        assert!(matches!(err, AppError::Inference(_)));
    }

    #[test]
    fn reads_preprocessor_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("preprocessor_config.json"),
            r#"{"do_normalize": false, "feature_extractor_type": "Wav2Vec2FeatureExtractor",
                "feature_size": 1, "padding_side": "right", "padding_value": 0.0,
                "return_attention_mask": true, "sampling_rate": 16000}"#,
        )
        .unwrap();

        let extractor = FeatureExtractor::from_dir(dir.path()).unwrap();
        assert!(!extractor.config().do_normalize);
        assert!(extractor.config().return_attention_mask);
    }

    #[test]
    fn missing_preprocessor_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = FeatureExtractor::from_dir(dir.path()).unwrap();
        assert!(extractor.config().do_normalize);
    }

    #[test]
    fn other_sampling_rate_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("preprocessor_config.json"),
            r#"{"sampling_rate": 22050}"#,
        )
        .unwrap();
        assert!(matches!(
            FeatureExtractor::from_dir(dir.path()),
            Err(AppError::ModelLoad(_))
        ));
    }
}
