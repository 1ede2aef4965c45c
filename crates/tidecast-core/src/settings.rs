//! Runtime configuration models.
//!
//! Typed settings consumed by the engine and the harbor. Documents are
//! deserialised from JSON; [`Settings::from_json`] applies the legacy-key
//! rewrites before handing the value to serde.

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid settings document: {source}")]
    Invalid {
        #[from]
        source: serde_json::Error,
    },
}

/// Top-level settings document.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub clock: ClockSettings,
    pub root: RootSettings,
    pub harbor: HarborSettings,
    pub audio: AudioSettings,
}

/// `clock.*` keys.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockSettings {
    /// Keep clocks running past source failures instead of requesting a
    /// global shutdown.
    pub allow_streaming_errors: bool,
}

/// `root.*` keys.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RootSettings {
    /// Seconds a wallclock may fall behind before active sources are reset.
    pub max_latency: f64,
}

/// `harbor.*` keys.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarborSettings {
    /// Addresses the harbor server listens on.
    pub bind_addrs: Vec<String>,
}

/// `audio.*` keys.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSettings {
    /// Samples per second of the internal PCM layout.
    pub sample_rate: u32,
    /// Samples per frame; one frame is produced per tick.
    pub frame_size: usize,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            allow_streaming_errors: false,
        }
    }
}

impl Default for RootSettings {
    fn default() -> Self {
        Self { max_latency: 60.0 }
    }
}

impl Default for HarborSettings {
    fn default() -> Self {
        Self {
            bind_addrs: vec!["0.0.0.0".to_string()],
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            frame_size: 1_764,
        }
    }
}

impl AudioSettings {
    /// Duration of one frame in seconds.
    pub fn frame_duration(&self) -> f64 {
        self.frame_size as f64 / self.sample_rate as f64
    }
}

impl Settings {
    /// Deserialise a settings document, rewriting legacy keys first.
    ///
    /// `harbor.bind_addr` (singular) is deprecated: it is logged and
    /// rewritten to a singleton `harbor.bind_addrs` unless the new key is
    /// also present.
    pub fn from_json(mut document: serde_json::Value) -> Result<Self, SettingsError> {
        if let Some(harbor) = document.get_mut("harbor").and_then(|v| v.as_object_mut()) {
            if let Some(addr) = harbor.remove("bind_addr") {
                if harbor.contains_key("bind_addrs") {
                    warn!("harbor.bind_addr is deprecated and ignored: harbor.bind_addrs is set");
                } else {
                    warn!("harbor.bind_addr is deprecated, use harbor.bind_addrs");
                    harbor.insert("bind_addrs".to_string(), serde_json::Value::Array(vec![addr]));
                }
            }
        }
        Ok(serde_json::from_value(document)?)
    }
}
