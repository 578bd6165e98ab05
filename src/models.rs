use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EmotionScore {
    pub label: String,
    /// Percentage 0-100, two decimals.
    pub score: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PredictionResponse {
    pub primary: String,
    pub confidence: f64,
    pub emotions: Vec<EmotionScore>,
}

impl PredictionResponse {
    /// Takes an already ranked list; `None` when it is empty.
    pub fn from_ranked(emotions: Vec<EmotionScore>) -> Option<Self> {
        let top = emotions.first()?;
        Some(Self {
            primary: top.label.clone(),
            confidence: top.score,
            emotions,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}
