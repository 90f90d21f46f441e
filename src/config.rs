//! Configuration management for code-speaker-rs.
//!
//! Loads config from YAML files in standard locations; every section falls
//! back to its defaults when missing.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, SpeakerError};
use crate::pipeline::QueueMode;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 20202,
            log_level: "info".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub queue_mode: QueueMode,
    pub max_queue: usize,
    pub interrupt: bool,
    /// Seconds a clip must play before newer audio may interrupt it.
    pub min_duration: f64,
    pub interrupt_cue: bool,
    pub drop_cue: bool,
    /// Where synthesized clips are written. `None` = system temp dir.
    pub temp_dir: Option<PathBuf>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            queue_mode: QueueMode::Bounded,
            max_queue: 10,
            interrupt: true,
            min_duration: 1.5,
            interrupt_cue: true,
            drop_cue: true,
            temp_dir: None,
        }
    }
}

impl AudioConfig {
    pub fn audio_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub voice: String,
    pub speed: f32,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            voice: "af_heart".into(),
            speed: 1.0,
            model_path: String::new(),
            voices_path: String::new(),
            tokenizer_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SummarizerBackend {
    #[default]
    Ollama,
    Groq,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub backend: SummarizerBackend,
    pub ollama_url: String,
    pub ollama_model_large: String,
    pub ollama_model_small: String,
    pub groq_api_key: Option<String>,
    pub groq_model_large: String,
    pub groq_model_small: String,
    pub timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            backend: SummarizerBackend::Ollama,
            ollama_url: "http://localhost:11434".into(),
            ollama_model_large: "qwen3:4b-instruct-2507-q4_K_M".into(),
            ollama_model_small: "qwen3:4b-instruct-2507-q4_K_M".into(),
            groq_api_key: None,
            groq_model_large: "openai/gpt-oss-120b".into(),
            groq_model_small: "llama-3.1-8b-instant".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub tts: TtsConfig,
    pub summarizer: SummarizerConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/code-speaker/config.yaml
    /// 3. /etc/code-speaker/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/code-speaker/config.yaml")),
                Some(PathBuf::from("/etc/code-speaker/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yml::from_str(yaml).map_err(|e| SpeakerError::Config(e.to_string()))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.audio.max_queue == 0 {
            return Err(SpeakerError::Config("audio.max_queue must be at least 1".into()));
        }
        if !self.audio.min_duration.is_finite() || self.audio.min_duration < 0.0 {
            return Err(SpeakerError::Config(format!(
                "audio.min_duration must be a non-negative number of seconds, got {}",
                self.audio.min_duration
            )));
        }
        if self.summarizer.backend == SummarizerBackend::Groq
            && self
                .summarizer
                .groq_api_key
                .as_deref()
                .is_none_or(|k| k.trim().is_empty())
        {
            return Err(SpeakerError::Config(
                "summarizer.groq_api_key is required for the groq backend".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 20202);
        assert_eq!(config.audio.queue_mode, QueueMode::Bounded);
        assert_eq!(config.audio.max_queue, 10);
        assert!(config.audio.interrupt);
        assert_eq!(config.audio.min_duration, 1.5);
        assert_eq!(config.summarizer.backend, SummarizerBackend::Ollama);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = Config::parse(
            "audio:\n  queue_mode: latest_only\n  min_duration: 0.5\nsummarizer:\n  backend: groq\n  groq_api_key: gsk_test\n",
        )
        .unwrap();
        assert_eq!(config.audio.queue_mode, QueueMode::LatestOnly);
        assert_eq!(config.audio.min_duration, 0.5);
        assert_eq!(config.audio.max_queue, 10);
        assert_eq!(config.tts.voice, "af_heart");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_settings_rejected() {
        let mut config = Config::default();
        config.audio.max_queue = 0;
        assert!(matches!(config.validate(), Err(SpeakerError::Config(_))));

        let mut config = Config::default();
        config.audio.min_duration = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.summarizer.backend = SummarizerBackend::Groq;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("nope.yaml")));
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 9999\n").unwrap();
        assert_eq!(Config::load(Some(&path)).server.port, 9999);
    }
}
