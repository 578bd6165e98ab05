use std::path::PathBuf;

use crate::error::AppError;

pub static AUDIO_MODEL: &str = "AUDIO_MODEL";
pub static MODEL_CACHE_DIR: &str = "MODEL_CACHE_DIR";
pub static HOST: &str = "HOST";
pub static PORT: &str = "PORT";
pub static FFMPEG_PATH: &str = "FFMPEG_PATH";

pub const DEFAULT_MODEL: &str = "superb/wav2vec2-large-superb-er";
const DEFAULT_CACHE_DIR: &str = "models";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_FFMPEG: &str = "ffmpeg";

#[derive(Debug, Clone)]
pub struct Config {
    pub model_name: String,
    pub cache_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub ffmpeg: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get(PORT) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                AppError::Config(format!("{} must be a port number, got {:?}: {}", PORT, raw, e))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            model_name: get(AUDIO_MODEL).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            cache_dir: get(MODEL_CACHE_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            host: get(HOST).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            ffmpeg: get(FFMPEG_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
        })
    }

    /// Directory holding `model.onnx`, `config.json` and `preprocessor_config.json`.
    pub fn model_dir(&self) -> PathBuf {
        self.cache_dir.join(&self.model_name)
    }

    pub fn bind_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.model_name, DEFAULT_MODEL);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8000);
        assert_eq!(config.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(
            config.model_dir(),
            PathBuf::from("models/superb/wav2vec2-large-superb-er")
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_lookup(lookup_from(&[
            (AUDIO_MODEL, "acme/ser-small"),
            (MODEL_CACHE_DIR, "/srv/models"),
            (PORT, "9001"),
            (FFMPEG_PATH, "/opt/bin/ffmpeg"),
        ]))
        .unwrap();
        assert_eq!(config.model_name, "acme/ser-small");
        assert_eq!(config.model_dir(), PathBuf::from("/srv/models/acme/ser-small"));
        assert_eq!(config.bind_addr(), ("0.0.0.0".to_string(), 9001));
        assert_eq!(config.ffmpeg, PathBuf::from("/opt/bin/ffmpeg"));
    }

    #[test]
    fn blank_model_falls_back_to_default() {
        let config = Config::from_lookup(lookup_from(&[(AUDIO_MODEL, "  ")])).unwrap();
        assert_eq!(config.model_name, DEFAULT_MODEL);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[(PORT, "eighty")])).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
