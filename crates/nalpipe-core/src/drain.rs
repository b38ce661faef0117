//! # Output Drain Loop
//!
//! Pulls ready output slots from the decoder and releases them to the
//! display sink. Runs on its own thread, concurrently with the demuxer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace};

use crate::cancel::CancellationToken;
use crate::config::SessionConfig;
use crate::error::DrainError;
use crate::port::{DecoderOutputPort, OutputEvent};
use crate::stats::StreamCounters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainTermination {
    /// The decoder delivered its end-of-stream slot.
    EndOfStream,
    Cancelled,
}

pub struct OutputDrainLoop<P> {
    output: P,
    timeout: Duration,
    render: bool,
    counters: Arc<StreamCounters>,
}

impl<P: DecoderOutputPort> OutputDrainLoop<P> {
    pub fn new(output: P, config: &SessionConfig) -> Self {
        Self {
            output,
            timeout: config.output_dequeue_timeout,
            render: config.render,
            counters: Arc::new(StreamCounters::new()),
        }
    }

    pub fn with_counters(mut self, counters: Arc<StreamCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn counters(&self) -> &Arc<StreamCounters> {
        &self.counters
    }

    /// Drain until the end-of-stream slot, cancellation, or a decoder fault.
    pub fn run(&mut self, cancel: &CancellationToken) -> Result<DrainTermination, DrainError> {
        info!(render = self.render, "drain loop started");
        let result = self.drain(cancel);
        match &result {
            Ok(termination) => info!(?termination, "drain loop stopped"),
            Err(e) => error!(error = %e, "drain loop failed"),
        }
        result
    }

    fn drain(&mut self, cancel: &CancellationToken) -> Result<DrainTermination, DrainError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(DrainTermination::Cancelled);
            }

            match self.output.dequeue_output_slot(self.timeout)? {
                OutputEvent::Empty => self.counters.record_empty_poll(),
                OutputEvent::FormatChanged(format) => {
                    self.counters.record_format_change();
                    info!(
                        profile = format.profile_idc,
                        level = format.level_idc,
                        "output format changed"
                    );
                }
                OutputEvent::BuffersChanged => debug!("output buffers changed"),
                OutputEvent::Ready(slot, info) => {
                    // The bare end-of-stream slot carries no picture.
                    let render = self.render && !(info.end_of_stream && info.size == 0);
                    self.output.release(slot, render)?;
                    self.counters.record_release(render);
                    trace!(
                        index = info.index,
                        size = info.size,
                        pts_us = info.presentation_time_us,
                        render,
                        "output released"
                    );
                    if info.end_of_stream {
                        return Ok(DrainTermination::EndOfStream);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecoderError;
    use crate::port::{OutputFormat, OutputInfo};
    use std::collections::VecDeque;

    /// Replays scripted events; records releases.
    struct ScriptedOutput {
        events: VecDeque<Result<OutputEvent<usize>, DecoderError>>,
        released: Vec<(usize, bool)>,
    }

    impl ScriptedOutput {
        fn new(events: Vec<Result<OutputEvent<usize>, DecoderError>>) -> Self {
            Self {
                events: events.into(),
                released: Vec::new(),
            }
        }
    }

    impl DecoderOutputPort for &mut ScriptedOutput {
        type Slot = usize;

        fn dequeue_output_slot(
            &mut self,
            _timeout: Duration,
        ) -> Result<OutputEvent<usize>, DecoderError> {
            self.events.pop_front().unwrap_or(Ok(OutputEvent::Empty))
        }

        fn release(&mut self, slot: usize, render: bool) -> Result<(), DecoderError> {
            self.released.push((slot, render));
            Ok(())
        }
    }

    fn ready(index: usize, size: usize, eos: bool) -> Result<OutputEvent<usize>, DecoderError> {
        Ok(OutputEvent::Ready(
            index,
            OutputInfo {
                index,
                size,
                presentation_time_us: 0,
                end_of_stream: eos,
            },
        ))
    }

    #[test]
    fn releases_until_end_of_stream() {
        let mut out = ScriptedOutput::new(vec![
            Ok(OutputEvent::Empty),
            Ok(OutputEvent::FormatChanged(OutputFormat {
                profile_idc: 66,
                level_idc: 31,
            })),
            ready(0, 100, false),
            Ok(OutputEvent::BuffersChanged),
            ready(1, 50, false),
            ready(2, 0, true),
            ready(3, 10, false),
        ]);
        let cfg = SessionConfig::default();
        let mut drain = OutputDrainLoop::new(&mut out, &cfg);

        let t = drain.run(&CancellationToken::new()).unwrap();
        assert_eq!(t, DrainTermination::EndOfStream);
        let snap = drain.counters().snapshot();
        assert_eq!(snap.frames_rendered, 2);
        assert_eq!(snap.frames_dropped, 1);
        assert_eq!(snap.format_changes, 1);
        assert_eq!(snap.empty_polls, 1);
        drop(drain);

        // Slot 3 is never dequeued; the empty end-of-stream slot is not rendered.
        assert_eq!(out.released, vec![(0, true), (1, true), (2, false)]);
    }

    #[test]
    fn render_disabled_drops_everything() {
        let mut out = ScriptedOutput::new(vec![ready(0, 10, false), ready(1, 0, true)]);
        let cfg = SessionConfig {
            render: false,
            ..SessionConfig::default()
        };
        OutputDrainLoop::new(&mut out, &cfg)
            .run(&CancellationToken::new())
            .unwrap();
        assert_eq!(out.released, vec![(0, false), (1, false)]);
    }

    #[test]
    fn invalid_state_stops_the_loop() {
        let mut out = ScriptedOutput::new(vec![
            ready(0, 10, false),
            Err(DecoderError::InvalidState),
            ready(1, 10, false),
        ]);
        let cfg = SessionConfig::default();
        let err = OutputDrainLoop::new(&mut out, &cfg)
            .run(&CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, DrainError::Decoder(DecoderError::InvalidState)));
        assert_eq!(out.released, vec![(0, true)]);
    }

    #[test]
    fn cancellation_is_polled_each_iteration() {
        let mut out = ScriptedOutput::new(vec![]);
        let cfg = SessionConfig::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let t = OutputDrainLoop::new(&mut out, &cfg).run(&cancel).unwrap();
        assert_eq!(t, DrainTermination::Cancelled);
        assert!(out.released.is_empty());
    }
}
