//! # Stream Session
//!
//! Owns one stream source and one decoder for their whole lifetime and runs
//! the two loops on dedicated threads:
//!
//! - `nalpipe-demux`: [`NalDemuxer`] with the decoder's input port
//! - `nalpipe-drain`: [`OutputDrainLoop`] with the decoder's output port
//!
//! Shutdown order is fixed: cancel both loops, join both threads, release
//! the decoder, close the source. Neither loop ever stops its sibling; a
//! fatal condition ends only its own thread and is reported on `stop()`.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::SessionConfig;
use crate::demux::{DemuxTermination, NalDemuxer};
use crate::drain::{DrainTermination, OutputDrainLoop};
use crate::error::{DrainError, SessionError, StreamError};
use crate::port::{Decoder, DecoderInputPort, DecoderOutputPort};
use crate::source::StreamSource;
use crate::stats::{StatsSnapshot, StreamCounters};

/// Final status of both loops.
#[derive(Debug)]
pub struct SessionReport {
    pub demux: Result<DemuxTermination, StreamError>,
    pub drain: Result<DrainTermination, DrainError>,
    pub stats: StatsSnapshot,
}

impl SessionReport {
    /// Both loops saw end-of-stream.
    pub fn is_clean(&self) -> bool {
        matches!(self.demux, Ok(DemuxTermination::EndOfStream))
            && matches!(self.drain, Ok(DrainTermination::EndOfStream))
    }

    /// Either loop ended on a fatal condition.
    pub fn is_failure(&self) -> bool {
        self.demux.is_err() || self.drain.is_err()
    }
}

type DemuxJoin<S> = JoinHandle<(Result<DemuxTermination, StreamError>, S)>;
type DrainJoin = JoinHandle<Result<DrainTermination, DrainError>>;

pub struct StreamSession<D: Decoder, S: StreamSource + 'static> {
    cancel: CancellationToken,
    counters: Arc<StreamCounters>,
    demux: Option<DemuxJoin<S>>,
    drain: Option<DrainJoin>,
    decoder: Option<D>,
}

impl<D: Decoder, S: StreamSource + 'static> StreamSession<D, S> {
    /// Split the decoder and start both loops.
    pub fn start(source: S, mut decoder: D, config: &SessionConfig) -> Result<Self, SessionError> {
        let (input, output) = decoder.split()?;
        let cancel = CancellationToken::new();
        let counters = Arc::new(StreamCounters::new());

        let demuxer = NalDemuxer::new(source, input, config).with_counters(counters.clone());
        let demux = spawn_demuxer(demuxer, cancel.clone())?;

        let drain_loop = OutputDrainLoop::new(output, config).with_counters(counters.clone());
        let drain = match spawn_drain(drain_loop, cancel.clone()) {
            Ok(handle) => handle,
            Err(e) => {
                cancel.cancel();
                let _ = demux.join();
                decoder.release();
                return Err(e);
            }
        };

        info!(
            delimiter = %config.delimiter,
            buffer_capacity = config.buffer_capacity,
            max_wait_ms = config.max_wait().as_millis() as u64,
            "stream session started"
        );

        Ok(Self {
            cancel,
            counters,
            demux: Some(demux),
            drain: Some(drain),
            decoder: Some(decoder),
        })
    }

    /// Live counters shared by both loops.
    pub fn stats(&self) -> StatsSnapshot {
        self.counters.snapshot()
    }

    pub fn demux_finished(&self) -> bool {
        self.demux.as_ref().map_or(true, |h| h.is_finished())
    }

    pub fn drain_finished(&self) -> bool {
        self.drain.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Both loops have returned.
    pub fn is_finished(&self) -> bool {
        self.demux_finished() && self.drain_finished()
    }

    /// Poll until both loops have returned or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Cancel, join both loops, release the decoder, then close the source.
    ///
    /// Returns `None` if the session was already stopped.
    pub fn stop(&mut self) -> Option<SessionReport> {
        let demux = self.demux.take()?;
        self.cancel.cancel();

        let (demux, source) = match demux.join() {
            Ok((result, source)) => (result, Some(source)),
            Err(_) => (Err(StreamError::Panicked), None),
        };
        let drain = match self.drain.take().map(|h| h.join()) {
            Some(Ok(result)) => result,
            Some(Err(_)) | None => Err(DrainError::Panicked),
        };

        if let Some(decoder) = self.decoder.take() {
            decoder.release();
        }
        drop(source);
        debug!("stream source closed");

        let report = SessionReport {
            demux,
            drain,
            stats: self.counters.snapshot(),
        };
        if report.is_failure() {
            warn!(demux = ?report.demux, drain = ?report.drain, "stream session stopped with failure");
        } else {
            info!(
                demux = ?report.demux,
                drain = ?report.drain,
                units = report.stats.units_submitted,
                frames = report.stats.frames_rendered,
                "stream session stopped"
            );
        }
        Some(report)
    }
}

impl<D: Decoder, S: StreamSource + 'static> Drop for StreamSession<D, S> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn spawn_demuxer<S, P>(
    mut demuxer: NalDemuxer<S, P>,
    cancel: CancellationToken,
) -> Result<DemuxJoin<S>, SessionError>
where
    S: StreamSource + 'static,
    P: DecoderInputPort + 'static,
{
    thread::Builder::new()
        .name("nalpipe-demux".into())
        .spawn(move || {
            let result = demuxer.run(&cancel);
            (result, demuxer.into_source())
        })
        .map_err(|source| SessionError::Spawn {
            name: "demux",
            source,
        })
}

fn spawn_drain<P>(
    mut drain: OutputDrainLoop<P>,
    cancel: CancellationToken,
) -> Result<DrainJoin, SessionError>
where
    P: DecoderOutputPort + 'static,
{
    thread::Builder::new()
        .name("nalpipe-drain".into())
        .spawn(move || drain.run(&cancel))
        .map_err(|source| SessionError::Spawn {
            name: "drain",
            source,
        })
}
