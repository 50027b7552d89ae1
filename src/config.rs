use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),
}

/// How the session talks to the predictor. Fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// One HTTP request per flushed phrase.
    Request,
    /// Every key event is forwarded over a persistent websocket.
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: TransportMode,
    pub predictor_url: String,
    pub stream_url: String,
    pub request_timeout_ms: u64,
    pub debounce_ms: u64,
    pub long_phrase_ms: u64,
    /// Seconds added to "now" before placing predicted notes.
    pub latency_offset: f64,
    /// Seconds
    pub min_additional: f64,
    /// Seconds
    pub max_additional: f64,
    pub player_velocity: u8,
    pub export_dir: PathBuf,
    /// Substring of the MIDI input port name; first port when unset.
    pub midi_input: Option<String>,
    /// Substring of the MIDI output port name; no MIDI output when unset.
    pub midi_output: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Request,
            predictor_url: "http://127.0.0.1:8080/vae-genre".into(),
            stream_url: "ws://127.0.0.1:8080/socket.io/?EIO=4&transport=websocket".into(),
            request_timeout_ms: 10_000,
            debounce_ms: 600,
            long_phrase_ms: 6_000,
            latency_offset: 0.05,
            min_additional: 1.0,
            max_additional: 8.0,
            player_velocity: 100,
            export_dir: PathBuf::from("."),
            midi_input: None,
            midi_output: None,
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn long_phrase(&self) -> Duration {
        Duration::from_millis(self.long_phrase_ms)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let config: SessionConfig = ron::from_str(&ron_string)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SessionConfig = ron::from_str("(mode: Streaming, debounce_ms: 250)").unwrap();
        assert_eq!(config.mode, TransportMode::Streaming);
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert_eq!(config.long_phrase(), Duration::from_secs(6));
        assert_eq!(config.latency_offset, 0.05);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duet.ron");
        let config = SessionConfig {
            midi_output: Some("IAC".into()),
            ..SessionConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }
}
