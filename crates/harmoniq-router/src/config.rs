use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How overlapping recording passes on the same port are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TakePolicy {
    /// A new region supersedes the regions it overlaps.
    #[default]
    Overwrite,
    /// Every pass becomes a new take stacked on top of earlier ones.
    NewTake,
}

/// Fault boundary used for plugin nodes unless a node asks for another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    #[default]
    Inline,
    Watchdog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Samples buffered between the audio thread and the region builder.
    pub audio_ring_frames: usize,
    pub header_capacity: usize,
    pub midi_capacity: usize,
    pub take_policy: TakePolicy,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            audio_ring_frames: 1 << 20,
            header_capacity: 4096,
            midi_capacity: 8192,
            take_policy: TakePolicy::Overwrite,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    /// Largest cycle the backend may request. Port buffers are sized for it.
    pub max_block: usize,
    /// Worker threads besides the audio thread. Zero runs every node on the
    /// audio thread.
    pub workers: usize,
    pub pin_workers: bool,
    pub max_nodes: usize,
    pub max_fan_in: usize,
    pub midi_capacity: usize,
    /// Longest delay inserted on one connection to align parallel paths.
    pub max_compensation_frames: usize,
    pub request_queue: usize,
    pub event_queue: usize,
    pub retire_queue: usize,
    pub metrics_history: usize,
    pub plugin_timeout_us: u64,
    pub plugin_isolation: IsolationMode,
    pub recording: RecordingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let phys = num_cpus::get_physical().max(2);
        Self {
            sample_rate: 48_000,
            max_block: 1024,
            workers: phys.saturating_sub(2).max(1),
            pin_workers: false,
            max_nodes: 1024,
            max_fan_in: 64,
            midi_capacity: 512,
            max_compensation_frames: 1 << 16,
            request_queue: 256,
            event_queue: 1024,
            retire_queue: 64,
            metrics_history: 256,
            plugin_timeout_us: 20_000,
            plugin_isolation: IsolationMode::Inline,
            recording: RecordingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8_000..=768_000).contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        let minimums = [
            ("max_block", self.max_block, 1),
            ("max_nodes", self.max_nodes, 1),
            ("max_fan_in", self.max_fan_in, 1),
            ("midi_capacity", self.midi_capacity, 1),
            ("request_queue", self.request_queue, 1),
            ("event_queue", self.event_queue, 16),
            ("retire_queue", self.retire_queue, 1),
            ("recording.audio_ring_frames", self.recording.audio_ring_frames, self.max_block),
            ("recording.header_capacity", self.recording.header_capacity, 64),
            ("recording.midi_capacity", self.recording.midi_capacity, 1),
        ];
        for (field, value, min) in minimums {
            if value < min {
                return Err(ConfigError::TooSmall { field, min });
            }
        }
        Ok(())
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_micros(self.plugin_timeout_us)
    }

    /// Wall-clock budget of one cycle of `frames` samples.
    pub fn period_ns(&self, frames: usize) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (frames as u64).saturating_mul(1_000_000_000) / u64::from(self.sample_rate)
    }
}
