//! Error types for the demuxer, the drain loop and the decoder ports.
//!
//! End-of-stream and read timeouts are not errors: they are reported through
//! [`ReadOutcome`](crate::source::ReadOutcome) and the loop termination enums.
//! Everything here is fatal to the loop that observes it.

use thiserror::Error;

// ── Decoder ─────────────────────────────────────────────────────────

/// Failure reported by a decoder port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecoderError {
    /// The decoder was stopped or released; no further port operations are valid.
    #[error("decoder is in an invalid state (stopped or released)")]
    InvalidState,
    /// A NAL unit did not fit into the input slot it was being written to.
    #[error("input slot {index} overflow: {needed} bytes needed, capacity {capacity}")]
    SlotOverflow {
        index: usize,
        needed: usize,
        capacity: usize,
    },
    /// A released output slot did not belong to this decoder.
    #[error("unknown output slot {0}")]
    UnknownSlot(usize),
}

// ── Demuxer ─────────────────────────────────────────────────────────

/// Fatal condition that terminated the demuxer loop.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Transport failure (connection reset, broken pipe, ...).
    #[error("stream I/O failure: {0}")]
    Io(#[from] std::io::Error),
    /// The assembly buffer filled up without a start code being found.
    #[error("assembly buffer exhausted: no start code within {capacity} bytes")]
    BufferExhausted { capacity: usize },
    /// The decoder rejected an input-side operation.
    #[error("decoder input port: {0}")]
    Decoder(#[from] DecoderError),
    #[error("demuxer thread panicked")]
    Panicked,
}

impl StreamError {
    /// Whether this error came from the decoder being stopped or released.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, StreamError::Decoder(DecoderError::InvalidState))
    }
}

// ── Drain loop ──────────────────────────────────────────────────────

/// Fatal condition that terminated the output drain loop.
#[derive(Debug, Error)]
pub enum DrainError {
    #[error("decoder output port: {0}")]
    Decoder(#[from] DecoderError),
    #[error("drain thread panicked")]
    Panicked,
}

impl DrainError {
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, DrainError::Decoder(DecoderError::InvalidState))
    }
}

// ── Session ─────────────────────────────────────────────────────────

/// Failure to bring a session up. Nothing is left running when returned.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("decoder refused to start: {0}")]
    Decoder(#[from] DecoderError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown delimiter variant '{0}' (expected \"three-byte\" or \"four-byte\")")]
    UnknownDelimiter(String),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
}
