//! # Loopback Decoder
//!
//! In-process pass-through decoder implementing both ports. A fixed pool of
//! input slots circulates through two bounded queues:
//!
//! ```text
//!   free ──acquire──▶ demuxer ──submit──▶ queued ──dequeue──▶ drain
//!     ▲                                                         │
//!     └───────────────────────── release ───────────────────────┘
//! ```
//!
//! "Decoding" hands the submitted bytes straight to the output side, so the
//! pool size bounds the number of units in flight and a stalled drain loop
//! back-pressures the demuxer through slot acquisition. An SPS with a new
//! profile/level produces a `FormatChanged` event ahead of its slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, info, trace};

use crate::config::DecoderPoolConfig;
use crate::error::DecoderError;
use crate::nal::{NalHeader, NalKind};
use crate::port::{
    Decoder, DecoderInputPort, DecoderOutputPort, InputSlot, OutputEvent, OutputFormat, OutputInfo,
};

struct Shared {
    stopped: AtomicBool,
    epoch: Instant,
}

impl Shared {
    fn check(&self) -> Result<(), DecoderError> {
        if self.stopped.load(Ordering::Relaxed) {
            Err(DecoderError::InvalidState)
        } else {
            Ok(())
        }
    }

    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

/// Slot storage circulating through the pool.
#[derive(Debug)]
struct SlotBuf {
    index: usize,
    data: Vec<u8>,
}

struct Submitted {
    buf: SlotBuf,
    presentation_time_us: u64,
    end_of_stream: bool,
}

/// A frame handed to the display sink.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    pub index: usize,
    pub presentation_time_us: u64,
    pub kind: Option<NalKind>,
    pub payload: Bytes,
}

// ─── Decoder ────────────────────────────────────────────────────────────────

pub struct LoopbackDecoder {
    shared: Arc<Shared>,
    // Held so that either queue stays connected while only one port is
    // alive; dropping the decoder disconnects them.
    free_tx: Sender<SlotBuf>,
    queue_tx: Sender<Submitted>,
    unsplit: Option<(Receiver<SlotBuf>, Receiver<Submitted>)>,
    slot_size: usize,
    display: Option<Sender<RenderedFrame>>,
}

impl LoopbackDecoder {
    pub fn new(pool: &DecoderPoolConfig) -> Self {
        let slots = pool.input_slots.max(1);
        let (free_tx, free_rx) = bounded(slots);
        let (queue_tx, queue_rx) = bounded(slots);
        // The free queue is sized to the pool, so seeding cannot fill it.
        // Slot capacity is reserved lazily by the first writes.
        let seeded = (0..slots).all(|index| {
            free_tx
                .try_send(SlotBuf {
                    index,
                    data: Vec::new(),
                })
                .is_ok()
        });
        debug_assert!(seeded, "free queue smaller than the slot pool");
        debug!(slots, slot_size = pool.slot_size, "loopback decoder created");

        Self {
            shared: Arc::new(Shared {
                stopped: AtomicBool::new(false),
                epoch: Instant::now(),
            }),
            free_tx,
            queue_tx,
            unsplit: Some((free_rx, queue_rx)),
            slot_size: pool.slot_size,
            display: None,
        }
    }

    /// Send rendered frames to `display`. Frames are dropped, not queued,
    /// when the display channel is full.
    pub fn with_display(mut self, display: Sender<RenderedFrame>) -> Self {
        self.display = Some(display);
        self
    }

    /// Handle that can stop the decoder from another thread, making every
    /// subsequent port call fail with `InvalidState`.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }
}

impl Decoder for LoopbackDecoder {
    type Input = LoopbackInput;
    type Output = LoopbackOutput;

    fn split(&mut self) -> Result<(LoopbackInput, LoopbackOutput), DecoderError> {
        self.shared.check()?;
        let (free_rx, queue_rx) = self.unsplit.take().ok_or(DecoderError::InvalidState)?;
        let input = LoopbackInput {
            shared: self.shared.clone(),
            free_rx,
            queue_tx: self.queue_tx.clone(),
            slot_size: self.slot_size,
        };
        let output = LoopbackOutput {
            shared: self.shared.clone(),
            queue_rx,
            free_tx: self.free_tx.clone(),
            display: self.display.take(),
            format: None,
            pending: None,
        };
        Ok((input, output))
    }

    fn release(self) {
        self.shared.stopped.store(true, Ordering::Relaxed);
        info!("loopback decoder released");
    }
}

#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Relaxed)
    }
}

// ─── Input port ─────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct LoopbackInputSlot {
    buf: SlotBuf,
    capacity: usize,
}

impl InputSlot for LoopbackInputSlot {
    fn index(&self) -> usize {
        self.buf.index
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), DecoderError> {
        let needed = self.buf.data.len() + bytes.len();
        if needed > self.capacity {
            return Err(DecoderError::SlotOverflow {
                index: self.buf.index,
                needed,
                capacity: self.capacity,
            });
        }
        self.buf.data.extend_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> usize {
        self.buf.data.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

pub struct LoopbackInput {
    shared: Arc<Shared>,
    free_rx: Receiver<SlotBuf>,
    queue_tx: Sender<Submitted>,
    slot_size: usize,
}

impl DecoderInputPort for LoopbackInput {
    type Slot = LoopbackInputSlot;

    fn acquire_input_slot(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<LoopbackInputSlot>, DecoderError> {
        self.shared.check()?;
        match self.free_rx.recv_timeout(timeout) {
            Ok(mut buf) => {
                buf.data.clear();
                Ok(Some(LoopbackInputSlot {
                    buf,
                    capacity: self.slot_size,
                }))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.shared.check()?;
                Ok(None)
            }
            Err(RecvTimeoutError::Disconnected) => Err(DecoderError::InvalidState),
        }
    }

    fn submit(&mut self, slot: LoopbackInputSlot, end_of_stream: bool) -> Result<(), DecoderError> {
        self.shared.check()?;
        let index = slot.buf.index;
        let submitted = Submitted {
            buf: slot.buf,
            presentation_time_us: self.shared.now_us(),
            end_of_stream,
        };
        // Only pool slots circulate, so the queue can never be full.
        match self.queue_tx.try_send(submitted) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DecoderError::UnknownSlot(index)),
            Err(TrySendError::Disconnected(_)) => Err(DecoderError::InvalidState),
        }
    }
}

// ─── Output port ────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct LoopbackOutputSlot {
    buf: SlotBuf,
    presentation_time_us: u64,
}

impl LoopbackOutputSlot {
    pub fn data(&self) -> &[u8] {
        &self.buf.data
    }
}

pub struct LoopbackOutput {
    shared: Arc<Shared>,
    queue_rx: Receiver<Submitted>,
    free_tx: Sender<SlotBuf>,
    display: Option<Sender<RenderedFrame>>,
    format: Option<OutputFormat>,
    /// Unit held back while its `FormatChanged` event is delivered.
    pending: Option<Submitted>,
}

impl LoopbackOutput {
    fn format_change(&mut self, unit: &[u8]) -> Option<OutputFormat> {
        let header = NalHeader::parse(unit)?;
        if header.kind != NalKind::Sps || unit.len() < 4 {
            return None;
        }
        // SPS payload: profile_idc, constraint flags, level_idc.
        let format = OutputFormat {
            profile_idc: unit[1],
            level_idc: unit[3],
        };
        if self.format == Some(format) {
            return None;
        }
        self.format = Some(format);
        Some(format)
    }

    fn ready(submitted: Submitted) -> OutputEvent<LoopbackOutputSlot> {
        let info = OutputInfo {
            index: submitted.buf.index,
            size: submitted.buf.data.len(),
            presentation_time_us: submitted.presentation_time_us,
            end_of_stream: submitted.end_of_stream,
        };
        OutputEvent::Ready(
            LoopbackOutputSlot {
                buf: submitted.buf,
                presentation_time_us: submitted.presentation_time_us,
            },
            info,
        )
    }
}

impl DecoderOutputPort for LoopbackOutput {
    type Slot = LoopbackOutputSlot;

    fn dequeue_output_slot(
        &mut self,
        timeout: Duration,
    ) -> Result<OutputEvent<LoopbackOutputSlot>, DecoderError> {
        self.shared.check()?;
        if let Some(submitted) = self.pending.take() {
            return Ok(Self::ready(submitted));
        }
        match self.queue_rx.recv_timeout(timeout) {
            Ok(submitted) => match self.format_change(&submitted.buf.data) {
                Some(format) => {
                    self.pending = Some(submitted);
                    Ok(OutputEvent::FormatChanged(format))
                }
                None => Ok(Self::ready(submitted)),
            },
            Err(RecvTimeoutError::Timeout) => {
                self.shared.check()?;
                Ok(OutputEvent::Empty)
            }
            Err(RecvTimeoutError::Disconnected) => Err(DecoderError::InvalidState),
        }
    }

    fn release(&mut self, slot: LoopbackOutputSlot, render: bool) -> Result<(), DecoderError> {
        self.shared.check()?;
        let LoopbackOutputSlot {
            mut buf,
            presentation_time_us,
        } = slot;

        if render {
            if let Some(display) = &self.display {
                let frame = RenderedFrame {
                    index: buf.index,
                    presentation_time_us,
                    kind: NalHeader::parse(&buf.data).map(|h| h.kind),
                    payload: Bytes::copy_from_slice(&buf.data),
                };
                if let Err(TrySendError::Full(_)) = display.try_send(frame) {
                    trace!(index = buf.index, "display busy, frame dropped");
                }
            }
        }

        let index = buf.index;
        buf.data.clear();
        match self.free_tx.try_send(buf) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DecoderError::UnknownSlot(index)),
            Err(TrySendError::Disconnected(_)) => Err(DecoderError::InvalidState),
        }
    }
}
