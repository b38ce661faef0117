use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_VERSION: u32 = 1;

/// Smallest assembly buffer accepted; smaller values are clamped up.
pub const MIN_BUFFER_CAPACITY: usize = 16;

// ─── Delimiter ──────────────────────────────────────────────────────────────

/// Annex-B start code configured for a session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelimiterVariant {
    /// `00 00 01`
    ThreeByte,
    /// `00 00 00 01`
    #[default]
    FourByte,
}

impl DelimiterVariant {
    pub const fn bytes(self) -> &'static [u8] {
        match self {
            DelimiterVariant::ThreeByte => &[0x00, 0x00, 0x01],
            DelimiterVariant::FourByte => &[0x00, 0x00, 0x00, 0x01],
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub const fn len(self) -> usize {
        self.bytes().len()
    }
}

impl FromStr for DelimiterVariant {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "three-byte" | "three" | "3" => Ok(DelimiterVariant::ThreeByte),
            "four-byte" | "four" | "4" => Ok(DelimiterVariant::FourByte),
            other => Err(ConfigError::UnknownDelimiter(other.to_string())),
        }
    }
}

impl fmt::Display for DelimiterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DelimiterVariant::ThreeByte => f.write_str("three-byte"),
            DelimiterVariant::FourByte => f.write_str("four-byte"),
        }
    }
}

// ─── Raw TOML input ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfigInput {
    pub version: u32,
    pub stream: StreamConfigInput,
    pub decoder: DecoderConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StreamConfigInput {
    pub delimiter: Option<String>,
    pub buffer_capacity: Option<usize>,
    pub io_timeout_ms: Option<u64>,
    pub slot_acquire_timeout_ms: Option<u64>,
    pub output_dequeue_timeout_ms: Option<u64>,
    pub render: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DecoderConfigInput {
    pub input_slots: Option<usize>,
    pub slot_size: Option<usize>,
}

// ─── Resolved config ────────────────────────────────────────────────────────

/// Per-session settings for the demuxer and drain loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub delimiter: DelimiterVariant,
    /// Assembly buffer size. Must exceed the largest expected NAL unit.
    pub buffer_capacity: usize,
    /// Read deadline applied to the stream source.
    pub io_timeout: Duration,
    /// Bounded wait for a free decoder input slot.
    pub slot_acquire_timeout: Duration,
    /// Bounded wait for a ready decoder output slot.
    pub output_dequeue_timeout: Duration,
    /// Whether drained output slots are rendered or silently dropped.
    pub render: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            delimiter: DelimiterVariant::FourByte,
            buffer_capacity: 1024 * 1024,
            io_timeout: Duration::from_millis(5000),
            slot_acquire_timeout: Duration::from_millis(100),
            output_dequeue_timeout: Duration::from_millis(5000),
            render: true,
        }
    }
}

impl SessionConfig {
    /// Longest single bounded wait either loop performs; an upper bound on
    /// how long cancellation can take to be observed.
    pub fn max_wait(&self) -> Duration {
        self.io_timeout
            .max(self.slot_acquire_timeout)
            .max(self.output_dequeue_timeout)
    }
}

/// Slot pool dimensions for the in-process decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderPoolConfig {
    pub input_slots: usize,
    pub slot_size: usize,
}

impl Default for DecoderPoolConfig {
    fn default() -> Self {
        Self {
            input_slots: 8,
            slot_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub version: u32,
    pub session: SessionConfig,
    pub decoder: DecoderPoolConfig,
}

impl PipelineConfigInput {
    pub fn resolve(self) -> Result<PipelineConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = SessionConfig::default();
        let stream = self.stream;
        let delimiter = match stream.delimiter {
            Some(s) => s.parse()?,
            None => defaults.delimiter,
        };
        let ms = |value: Option<u64>, fallback: Duration, field: &'static str| {
            match value {
                Some(0) => Err(ConfigError::Zero { field }),
                Some(v) => Ok(Duration::from_millis(v)),
                None => Ok(fallback),
            }
        };

        let session = SessionConfig {
            delimiter,
            buffer_capacity: stream
                .buffer_capacity
                .unwrap_or(defaults.buffer_capacity)
                .max(MIN_BUFFER_CAPACITY),
            io_timeout: ms(stream.io_timeout_ms, defaults.io_timeout, "io_timeout_ms")?,
            slot_acquire_timeout: ms(
                stream.slot_acquire_timeout_ms,
                defaults.slot_acquire_timeout,
                "slot_acquire_timeout_ms",
            )?,
            output_dequeue_timeout: ms(
                stream.output_dequeue_timeout_ms,
                defaults.output_dequeue_timeout,
                "output_dequeue_timeout_ms",
            )?,
            render: stream.render.unwrap_or(defaults.render),
        };

        let pool_defaults = DecoderPoolConfig::default();
        let input_slots = self.decoder.input_slots.unwrap_or(pool_defaults.input_slots);
        if input_slots == 0 {
            return Err(ConfigError::Zero {
                field: "input_slots",
            });
        }
        let slot_size = self.decoder.slot_size.unwrap_or(pool_defaults.slot_size);
        if slot_size == 0 {
            return Err(ConfigError::Zero { field: "slot_size" });
        }

        Ok(PipelineConfig {
            version,
            session,
            decoder: DecoderPoolConfig {
                input_slots,
                slot_size,
            },
        })
    }
}

impl PipelineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(PipelineConfig {
                version: CONFIG_VERSION,
                ..PipelineConfig::default()
            });
        }
        let parsed: PipelineConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}
