//! # nalpipe-core
//!
//! Streaming H.264 Annex-B demuxer and decoder buffer-pool handshake.
//!
//! Bytes from a [`StreamSource`](source::StreamSource) are split on start
//! codes inside a fixed [`FrameAssemblyBuffer`](assembly::FrameAssemblyBuffer)
//! and written, one NAL unit per slot, into a decoder input port. A second
//! thread drains the decoder's output port and releases frames for display.
//!
//! ## Crate structure
//!
//! - [`scanner`] — Start code search
//! - [`assembly`] — Bounded scratch buffer with carry-over compaction
//! - [`demux`] — NAL demuxer loop (producer)
//! - [`drain`] — Output drain loop (consumer)
//! - [`port`] — Decoder input/output port contracts
//! - [`session`] — Two-thread session with ordered shutdown
//! - [`source`] — Bounded-wait stream input
//! - [`loopback`] — In-process pass-through decoder
//! - [`nal`] — NAL header classification
//! - [`config`] — TOML-backed session and pool configuration
//! - [`stats`] — Shared counters

pub mod assembly;
pub mod cancel;
pub mod config;
pub mod demux;
pub mod drain;
pub mod error;
pub mod loopback;
pub mod nal;
pub mod port;
pub mod scanner;
pub mod session;
pub mod source;
pub mod stats;

pub use cancel::CancellationToken;
pub use config::{DelimiterVariant, PipelineConfig, SessionConfig};
pub use error::{ConfigError, DecoderError, DrainError, SessionError, StreamError};
pub use session::{SessionReport, StreamSession};
