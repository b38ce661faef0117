//! # NAL Demuxer
//!
//! Turns a byte stream into NAL units and feeds them, one per slot, into a
//! decoder input port.
//!
//! Each refill cycle reads once into the [`FrameAssemblyBuffer`], scans the
//! region that cannot hide a partial start code (`[0, limit - (len - 1))`),
//! streams unit bytes into the held input slot, submits the slot whenever the
//! next start code is found, and finally compacts the unscanned tail to the
//! front of the buffer.
//!
//! Unit bytes are copied once: scratch buffer → decoder slot.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::assembly::FrameAssemblyBuffer;
use crate::cancel::CancellationToken;
use crate::config::SessionConfig;
use crate::error::{DecoderError, StreamError};
use crate::nal::NalHeader;
use crate::port::{DecoderInputPort, InputSlot};
use crate::scanner;
use crate::source::{ReadOutcome, StreamSource};
use crate::stats::StreamCounters;

/// How the demuxer loop ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxTermination {
    /// The peer closed the stream; the final unit and an end-of-stream
    /// marker were submitted.
    EndOfStream,
    /// Cancellation was observed; any pending unit was flushed.
    Cancelled,
}

pub struct NalDemuxer<S, P: DecoderInputPort> {
    source: S,
    input: P,
    buffer: FrameAssemblyBuffer,
    delimiter: &'static [u8],
    slot_timeout: Duration,
    /// Slot currently being filled, if any. At most one is ever held.
    slot: Option<P::Slot>,
    /// First byte of the unit in `slot`, kept for classification.
    unit_header: Option<u8>,
    /// Bytes classified since the last start code (or since stream start).
    since_delimiter: usize,
    /// A start code has been seen; later slot-less bytes are not leading.
    synced: bool,
    counters: Arc<StreamCounters>,
}

impl<S: StreamSource, P: DecoderInputPort> NalDemuxer<S, P> {
    pub fn new(source: S, input: P, config: &SessionConfig) -> Self {
        Self {
            source,
            input,
            buffer: FrameAssemblyBuffer::with_capacity(config.buffer_capacity),
            delimiter: config.delimiter.bytes(),
            slot_timeout: config.slot_acquire_timeout,
            slot: None,
            unit_header: None,
            since_delimiter: 0,
            synced: false,
            counters: Arc::new(StreamCounters::new()),
        }
    }

    /// Share counters with a session or another loop.
    pub fn with_counters(mut self, counters: Arc<StreamCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> &Arc<StreamCounters> {
        &self.counters
    }

    /// Give back the stream source so the owner decides when it is closed.
    pub fn into_source(self) -> S {
        self.source
    }

    /// Run until end-of-stream, cancellation, or a fatal error.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<DemuxTermination, StreamError> {
        info!(
            delimiter_len = self.delimiter.len(),
            capacity = self.buffer.capacity(),
            "demuxer started"
        );
        let result = self.run_loop(cancel);
        match &result {
            Ok(termination) => info!(?termination, "demuxer stopped"),
            Err(e) => error!(error = %e, "demuxer failed"),
        }
        result
    }

    fn run_loop(&mut self, cancel: &CancellationToken) -> Result<DemuxTermination, StreamError> {
        loop {
            if cancel.is_cancelled() {
                self.finish(cancel, false)?;
                return Ok(DemuxTermination::Cancelled);
            }

            match self.buffer.append_from(&mut self.source)? {
                ReadOutcome::Data(n) => self.counters.record_read(n),
                ReadOutcome::TimedOut => {
                    // Idle stream: only cancellation ends the loop.
                    self.counters.record_read_timeout();
                    continue;
                }
                ReadOutcome::EndOfStream => {
                    debug!("stream closed by peer");
                    self.finish(cancel, true)?;
                    return Ok(DemuxTermination::EndOfStream);
                }
            }

            if self.buffer.limit() < self.delimiter.len() {
                continue;
            }

            if !self.scan_pass(cancel)? {
                self.finish(cancel, false)?;
                return Ok(DemuxTermination::Cancelled);
            }
        }
    }

    /// One scan over the buffered bytes. Returns `false` if cancellation
    /// interrupted slot acquisition.
    fn scan_pass(&mut self, cancel: &CancellationToken) -> Result<bool, StreamError> {
        let len = self.delimiter.len();
        let limit = self.buffer.limit();
        let scan_end = limit - (len - 1);
        let mut cursor = 0;
        let mut found = 0usize;

        loop {
            match scanner::find(self.buffer.filled(), self.delimiter, cursor, scan_end) {
                None => {
                    // The unit may continue in the next refill; write what is
                    // safe and hold the slot.
                    if cursor < scan_end {
                        self.consume(cursor, scan_end)?;
                        cursor = scan_end;
                    }
                    break;
                }
                Some(pos) => {
                    found += 1;
                    self.consume(cursor, pos)?;
                    self.complete_unit()?;
                    self.since_delimiter = 0;
                    self.synced = true;
                    cursor = pos + len;
                    if self.slot.is_none() {
                        match self.acquire(cancel)? {
                            Some(slot) => self.slot = Some(slot),
                            None => {
                                // Drop what is already classified so the
                                // final flush only sees the unscanned tail.
                                self.buffer.compact(cursor);
                                return Ok(false);
                            }
                        }
                    }
                }
            }
        }

        let kept = self.buffer.compact(cursor);
        trace!(limit, found, kept, "scan pass");
        Ok(true)
    }

    /// Classify `buffer[start..end)` as part of the current unit: written to
    /// the held slot, or discarded if no start code has been seen yet.
    fn consume(&mut self, start: usize, end: usize) -> Result<(), StreamError> {
        if end <= start {
            return Ok(());
        }
        let n = end - start;
        self.since_delimiter += n;
        if self.since_delimiter + self.delimiter.len() > self.buffer.capacity() {
            return Err(StreamError::BufferExhausted {
                capacity: self.buffer.capacity(),
            });
        }

        let bytes = &self.buffer.filled()[start..end];
        match self.slot.as_mut() {
            Some(slot) => {
                if slot.is_empty() {
                    self.unit_header = bytes.first().copied();
                }
                let needed = slot.len() + n;
                if needed > slot.capacity() {
                    return Err(DecoderError::SlotOverflow {
                        index: slot.index(),
                        needed,
                        capacity: slot.capacity(),
                    }
                    .into());
                }
                slot.write(bytes)?;
            }
            None if !self.synced => self.counters.record_discarded(n),
            None => trace!(bytes = n, "no input slot held, bytes dropped"),
        }
        Ok(())
    }

    /// Submit the held slot if it contains a unit. An empty slot is kept:
    /// an empty span is "no unit yet", never a zero-length unit.
    fn complete_unit(&mut self) -> Result<(), StreamError> {
        match self.slot.take() {
            Some(slot) if !slot.is_empty() => self.submit_unit(slot),
            other => {
                self.slot = other;
                Ok(())
            }
        }
    }

    fn submit_unit(&mut self, slot: P::Slot) -> Result<(), StreamError> {
        let len = slot.len();
        let index = slot.index();
        let header = self.unit_header.take().and_then(|b| NalHeader::parse(&[b]));
        self.input.submit(slot, false)?;

        let parameter_set = header.is_some_and(|h| h.is_parameter_set());
        let idr = header.is_some_and(|h| h.is_idr());
        self.counters.record_unit(len, parameter_set, idr);
        debug!(
            slot = index,
            len,
            nal_type = header.map(|h| h.kind.nal_unit_type()),
            kind = ?header.map(|h| h.kind),
            "unit submitted"
        );
        Ok(())
    }

    /// Wait for a free input slot, retrying bounded waits until one arrives
    /// or cancellation is requested.
    fn acquire(&mut self, cancel: &CancellationToken) -> Result<Option<P::Slot>, StreamError> {
        loop {
            if let Some(slot) = self.input.acquire_input_slot(self.slot_timeout)? {
                return Ok(Some(slot));
            }
            self.counters.record_acquire_timeout();
            if cancel.is_cancelled() {
                return Ok(None);
            }
        }
    }

    /// Flush the unit in progress and submit the end-of-stream marker.
    ///
    /// `clean` is set on end-of-stream: the marker is then waited for until
    /// a slot frees up or cancellation arrives. After cancellation a single
    /// bounded attempt is made.
    fn finish(&mut self, cancel: &CancellationToken, clean: bool) -> Result<(), StreamError> {
        // With no more input coming, retained tail bytes can no longer be
        // the start of a delimiter; they close the current unit.
        let tail = self.buffer.limit();
        if tail > 0 {
            self.consume(0, tail)?;
            self.buffer.clear();
        }

        let marker = match self.slot.take() {
            Some(slot) if slot.is_empty() => Some(slot),
            Some(slot) => {
                self.submit_unit(slot)?;
                None
            }
            None => None,
        };
        let marker = match marker {
            Some(slot) => Some(slot),
            None if clean => self.acquire(cancel)?,
            None => self.input.acquire_input_slot(self.slot_timeout)?,
        };

        match marker {
            Some(slot) => {
                let index = slot.index();
                self.input.submit(slot, true)?;
                debug!(slot = index, "end-of-stream marker submitted");
            }
            None => warn!("no input slot available for end-of-stream marker"),
        }
        Ok(())
    }
}
