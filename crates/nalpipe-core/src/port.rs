//! # Decoder Ports
//!
//! The decoder is never shared between threads. It is split once into two
//! capability handles: the input port moves into the demuxer thread and the
//! output port into the drain thread. Each is `Send` but used by exactly
//! one owner, so no lock is needed around either.
//!
//! ```text
//!  demuxer ──acquire──▶ InputSlot ──write*──▶ submit ──▶ decoder
//!  drain   ◀──dequeue── OutputSlot ──release(render)──▶ display / pool
//! ```

use std::time::Duration;

use crate::error::DecoderError;

// ─── Input side ─────────────────────────────────────────────────────────────

/// A pool-owned write buffer lent to the demuxer.
///
/// Writes append. `submit` takes the slot by value, so a submitted slot
/// cannot be written again.
pub trait InputSlot: Send {
    /// Pool index of this slot.
    fn index(&self) -> usize;

    /// Append `bytes` to the unit being assembled in this slot.
    fn write(&mut self, bytes: &[u8]) -> Result<(), DecoderError>;

    /// Bytes written so far.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}

pub trait DecoderInputPort: Send {
    type Slot: InputSlot;

    /// Wait up to `timeout` for a free input slot. `Ok(None)` means none
    /// became available in time.
    fn acquire_input_slot(&mut self, timeout: Duration) -> Result<Option<Self::Slot>, DecoderError>;

    /// Hand the slot to the decoder with its accumulated length. Decoding is
    /// asynchronous and not observed here.
    fn submit(&mut self, slot: Self::Slot, end_of_stream: bool) -> Result<(), DecoderError>;
}

// ─── Output side ────────────────────────────────────────────────────────────

/// Metadata accompanying a ready output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub index: usize,
    pub size: usize,
    pub presentation_time_us: u64,
    pub end_of_stream: bool,
}

/// Stream format announced by the decoder before the first frame and
/// whenever the active SPS changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub profile_idc: u8,
    pub level_idc: u8,
}

#[derive(Debug)]
pub enum OutputEvent<S> {
    /// A decoded slot is ready and must be released.
    Ready(S, OutputInfo),
    /// Nothing became ready within the timeout.
    Empty,
    FormatChanged(OutputFormat),
    /// The decoder replaced its output buffer set.
    BuffersChanged,
}

pub trait DecoderOutputPort: Send {
    type Slot: Send;

    /// Wait up to `timeout` for the next output event.
    fn dequeue_output_slot(
        &mut self,
        timeout: Duration,
    ) -> Result<OutputEvent<Self::Slot>, DecoderError>;

    /// Return a slot to the decoder, rendering it to the display sink first
    /// when `render` is set.
    fn release(&mut self, slot: Self::Slot, render: bool) -> Result<(), DecoderError>;
}

// ─── Decoder lifecycle ──────────────────────────────────────────────────────

/// A started decoder owned by a session.
pub trait Decoder: Send + 'static {
    type Input: DecoderInputPort + 'static;
    type Output: DecoderOutputPort + 'static;

    /// Split into the two port handles. Can only succeed once.
    fn split(&mut self) -> Result<(Self::Input, Self::Output), DecoderError>;

    /// Stop and release the decoder. Port operations fail with
    /// [`DecoderError::InvalidState`] afterwards.
    fn release(self);
}
