//! # Integration tests: source → demuxer → loopback decoder → drain
//!
//! Every test runs a full two-thread [`StreamSession`] against the in-process
//! loopback decoder. Sources are in-memory cursors, scripted stubs, or a real
//! localhost TCP socket.

use std::io::{self, Cursor, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use nalpipe_core::config::DecoderPoolConfig;
use nalpipe_core::demux::DemuxTermination;
use nalpipe_core::drain::DrainTermination;
use nalpipe_core::loopback::{LoopbackDecoder, RenderedFrame};
use nalpipe_core::nal::NalKind;
use nalpipe_core::source::{ReadOutcome, StreamSource, TimeoutReader};
use nalpipe_core::{DelimiterVariant, SessionConfig, StreamError, StreamSession};

// ─── Helpers ────────────────────────────────────────────────────────────────

const SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1F, 0x8C, 0x8D];
const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x21, 0xA0];
const SLICE: &[u8] = &[0x41, 0x9A, 0x02, 0x0C];

fn fast_config(delimiter: DelimiterVariant) -> SessionConfig {
    SessionConfig {
        delimiter,
        buffer_capacity: 256,
        io_timeout: Duration::from_millis(20),
        slot_acquire_timeout: Duration::from_millis(10),
        output_dequeue_timeout: Duration::from_millis(20),
        render: true,
    }
}

fn pool() -> DecoderPoolConfig {
    DecoderPoolConfig {
        input_slots: 4,
        slot_size: 1024,
    }
}

fn annexb(delimiter: DelimiterVariant, units: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(delimiter.bytes());
        out.extend_from_slice(unit);
    }
    out
}

fn loopback_with_display() -> (LoopbackDecoder, Receiver<RenderedFrame>) {
    let (tx, rx) = bounded(256);
    (LoopbackDecoder::new(&pool()).with_display(tx), rx)
}

/// Never produces data; each read blocks for its deadline.
struct IdleSource {
    deadline: Duration,
}

impl StreamSource for IdleSource {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<ReadOutcome> {
        thread::sleep(self.deadline);
        Ok(ReadOutcome::TimedOut)
    }
}

/// Repeats the same bytes forever.
struct EndlessSource {
    pattern: Vec<u8>,
    offset: usize,
}

impl StreamSource for EndlessSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        for byte in buf.iter_mut() {
            *byte = self.pattern[self.offset];
            self.offset = (self.offset + 1) % self.pattern.len();
        }
        Ok(ReadOutcome::Data(buf.len()))
    }
}

// ─── Clean end-of-stream ────────────────────────────────────────────────────

#[test]
fn clean_stream_renders_every_unit_in_order() {
    let units: Vec<&[u8]> = vec![SPS, PPS, IDR, SLICE, SLICE];
    let cfg = fast_config(DelimiterVariant::FourByte);
    let (decoder, display) = loopback_with_display();
    let source = TimeoutReader::new(Cursor::new(annexb(cfg.delimiter, &units)));

    let mut session = StreamSession::start(source, decoder, &cfg).unwrap();
    assert!(session.wait(Duration::from_secs(5)), "session did not finish");
    let report = session.stop().unwrap();

    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(report.stats.units_submitted, 5);
    assert_eq!(report.stats.parameter_sets, 2);
    assert_eq!(report.stats.idr_units, 1);
    assert_eq!(report.stats.frames_rendered, 5);
    // Only the empty end-of-stream slot is dropped.
    assert_eq!(report.stats.frames_dropped, 1);
    assert_eq!(report.stats.format_changes, 1);

    let frames: Vec<RenderedFrame> = display.try_iter().collect();
    let payloads: Vec<&[u8]> = frames.iter().map(|f| &f.payload[..]).collect();
    assert_eq!(payloads, units);
    assert_eq!(frames[0].kind, Some(NalKind::Sps));
    assert_eq!(frames[2].kind, Some(NalKind::IdrSlice));
}

#[test]
fn three_byte_delimiter_with_leading_garbage() {
    let cfg = fast_config(DelimiterVariant::ThreeByte);
    let (decoder, display) = loopback_with_display();
    let mut stream = vec![0xFF, 0xEE, 0xDD];
    stream.extend(annexb(cfg.delimiter, &[IDR, SLICE]));

    let mut session =
        StreamSession::start(TimeoutReader::new(Cursor::new(stream)), decoder, &cfg).unwrap();
    assert!(session.wait(Duration::from_secs(5)));
    let report = session.stop().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.stats.leading_bytes_discarded, 3);
    let payloads: Vec<Vec<u8>> = display.try_iter().map(|f| f.payload.to_vec()).collect();
    assert_eq!(payloads, vec![IDR.to_vec(), SLICE.to_vec()]);
}

#[test]
fn render_disabled_drops_all_frames() {
    let cfg = SessionConfig {
        render: false,
        ..fast_config(DelimiterVariant::FourByte)
    };
    let (decoder, display) = loopback_with_display();
    let source = TimeoutReader::new(Cursor::new(annexb(cfg.delimiter, &[IDR, SLICE])));

    let mut session = StreamSession::start(source, decoder, &cfg).unwrap();
    assert!(session.wait(Duration::from_secs(5)));
    let report = session.stop().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.stats.frames_rendered, 0);
    assert_eq!(report.stats.frames_dropped, 3);
    assert!(display.try_iter().next().is_none());
}

#[test]
fn more_units_than_slots_back_pressure_through_the_pool() {
    let cfg = fast_config(DelimiterVariant::FourByte);
    let units: Vec<&[u8]> = std::iter::repeat(SLICE).take(64).collect();
    let (decoder, display) = loopback_with_display();
    let source = TimeoutReader::new(Cursor::new(annexb(cfg.delimiter, &units)));

    let mut session = StreamSession::start(source, decoder, &cfg).unwrap();
    assert!(session.wait(Duration::from_secs(10)));
    let report = session.stop().unwrap();

    assert!(report.is_clean());
    assert_eq!(report.stats.units_submitted, 64);
    assert_eq!(display.try_iter().count(), 64);
}

// ─── TCP transport ──────────────────────────────────────────────────────────

#[test]
fn tcp_peer_close_is_end_of_stream() {
    let cfg = fast_config(DelimiterVariant::FourByte);
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let stream = annexb(cfg.delimiter, &[SPS, PPS, IDR]);

    let writer = thread::spawn(move || {
        let mut conn = TcpStream::connect(addr).unwrap();
        // Split mid-delimiter to exercise carry-over across reads.
        let (a, b) = stream.split_at(SPS.len() + 6);
        conn.write_all(a).unwrap();
        conn.flush().unwrap();
        thread::sleep(Duration::from_millis(30));
        conn.write_all(b).unwrap();
    });

    let (conn, _) = listener.accept().unwrap();
    let source = TimeoutReader::tcp(conn, cfg.io_timeout).unwrap();
    let (decoder, display) = loopback_with_display();
    let mut session = StreamSession::start(source, decoder, &cfg).unwrap();

    writer.join().unwrap();
    assert!(session.wait(Duration::from_secs(5)));
    let report = session.stop().unwrap();

    assert!(report.is_clean(), "unexpected report: {report:?}");
    assert_eq!(report.stats.bytes_read, report.stats.bytes_submitted + 12);
    let payloads: Vec<Vec<u8>> = display.try_iter().map(|f| f.payload.to_vec()).collect();
    assert_eq!(payloads, vec![SPS.to_vec(), PPS.to_vec(), IDR.to_vec()]);
}

// ─── Cancellation and failure ───────────────────────────────────────────────

#[test]
fn stop_on_idle_stream_returns_within_bounded_wait() {
    let cfg = fast_config(DelimiterVariant::FourByte);
    let source = IdleSource {
        deadline: cfg.io_timeout,
    };
    let (decoder, _display) = loopback_with_display();
    let mut session = StreamSession::start(source, decoder, &cfg).unwrap();

    thread::sleep(Duration::from_millis(60));
    assert!(!session.is_finished(), "timeouts alone must not end the session");

    let started = Instant::now();
    let report = session.stop().unwrap();
    let elapsed = started.elapsed();

    assert!(
        elapsed < cfg.max_wait() * 4 + Duration::from_millis(200),
        "stop took {elapsed:?}"
    );
    assert_eq!(report.demux.unwrap(), DemuxTermination::Cancelled);
    assert!(report.drain.is_ok());
    assert!(report.stats.read_timeouts >= 1);
    assert!(session.stop().is_none(), "second stop must be a no-op");
}

#[test]
fn stopped_decoder_ends_both_loops_with_invalid_state() {
    let cfg = fast_config(DelimiterVariant::FourByte);
    let source = EndlessSource {
        pattern: annexb(cfg.delimiter, &[SLICE]),
        offset: 0,
    };
    let (decoder, _display) = loopback_with_display();
    let stop = decoder.stop_handle();
    let mut session = StreamSession::start(source, decoder, &cfg).unwrap();

    thread::sleep(Duration::from_millis(30));
    stop.stop();
    assert!(session.wait(Duration::from_secs(5)), "loops kept running");

    let report = session.stop().unwrap();
    assert!(report.is_failure());
    assert!(report.demux.unwrap_err().is_invalid_state());
    assert!(report.drain.unwrap_err().is_invalid_state());
}

#[test]
fn oversized_unit_is_reported_as_buffer_exhausted() {
    let cfg = SessionConfig {
        buffer_capacity: 64,
        ..fast_config(DelimiterVariant::FourByte)
    };
    let oversized = vec![0xAB; 200];
    let source = TimeoutReader::new(Cursor::new(annexb(cfg.delimiter, &[&oversized, SLICE])));
    let (decoder, _display) = loopback_with_display();
    let mut session = StreamSession::start(source, decoder, &cfg).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !session.demux_finished() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    let report = session.stop().unwrap();

    match report.demux {
        Err(StreamError::BufferExhausted { capacity }) => assert_eq!(capacity, 64),
        other => panic!("expected buffer exhaustion, got {other:?}"),
    }
    // The drain loop is unaffected by its sibling's failure.
    assert_eq!(report.drain.unwrap(), DrainTermination::Cancelled);
    assert_eq!(report.stats.units_submitted, 0);
}
