use std::{fs, io, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::surface::SurfaceSpec;
use crate::CaptureAttributes;

/// Poll timeout for a single frame, after which the delivery loop re-waits
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 500;

/// Retry policy for input discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Number of queries before giving up, zero retries forever
    pub attempts: u32,
    /// Delay between two queries
    pub interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            attempts: 0,
            interval_ms: 5000,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// A session created at startup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub surface: SurfaceSpec,
    pub capture: CaptureAttributes,
    /// Start capturing right after creation
    pub autostart: bool,
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub frame_timeout_ms: u64,
    pub discovery: DiscoveryConfig,
    pub sessions: Vec<SessionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
            discovery: DiscoveryConfig::default(),
            sessions: Vec::new(),
        }
    }
}

impl Config {
    /// Reads a JSON configuration
    pub fn from_reader<R: io::Read>(reader: R) -> Result<Self, ConfigError> {
        Ok(serde_json::from_reader(reader)?)
    }

    /// Reads a JSON configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let file = fs::File::open(path)?;
        Self::from_reader(io::BufReader::new(file))
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InputId;
    use crate::FourCC;

    #[test]
    fn empty_document_uses_defaults() {
        let config: Config = "{}".parse().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.frame_timeout(), Duration::from_millis(500));
        assert_eq!(config.discovery.interval(), Duration::from_secs(5));
    }

    #[test]
    fn parses_sessions() {
        let json = r#"{
            "frame_timeout_ms": 250,
            "discovery": {"attempts": 3},
            "sessions": [{
                "surface": {"window_size": {"x": 0.6, "y": 0.4}, "display": 1},
                "capture": {"name": "tof", "input": 4, "format": "UYVY"},
                "autostart": true
            }]
        }"#;
        let config: Config = json.parse().unwrap();
        assert_eq!(config.frame_timeout_ms, 250);
        assert_eq!(config.discovery.attempts, 3);
        assert_eq!(config.discovery.interval_ms, 5000);

        let session = &config.sessions[0];
        assert!(session.autostart);
        assert_eq!(session.surface.display, 1);
        assert!(session.surface.visible);
        assert_eq!(session.capture.input, InputId(4));
        assert_eq!(session.capture.format, Some(FourCC::UYVY));
        assert_eq!(session.capture.buffer_count, 5);
    }

    #[test]
    fn rejects_bad_format() {
        let json = r#"{"sessions": [{"capture": {"format": "UYVY8"}}]}"#;
        assert!(matches!(json.parse::<Config>(), Err(ConfigError::Parse(_))));
    }
}
