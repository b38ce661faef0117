//! # nalpipe receiver
//!
//! Accepts one TCP connection carrying a raw Annex-B H.264 elementary
//! stream, demuxes it into the in-process loopback decoder and drains the
//! decoded output, logging stats as it goes. The final session report is
//! printed to stdout as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Listen on the default port, discard frames
//! nalpipe-receiver
//!
//! # Three-byte start codes, dump rendered units to a file
//! nalpipe-receiver --listen 127.0.0.1:6000 --delimiter three-byte --output out.h264
//!
//! # Settings from TOML, overridden per flag
//! nalpipe-receiver --config nalpipe.toml --io-timeout-ms 1000
//! ```

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::Receiver;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use nalpipe_core::config::PipelineConfig;
use nalpipe_core::loopback::{LoopbackDecoder, RenderedFrame};
use nalpipe_core::source::TimeoutReader;
use nalpipe_core::stats::StatsSnapshot;
use nalpipe_core::{DelimiterVariant, SessionReport, StreamSession};

const DISPLAY_QUEUE: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Annex-B H.264 TCP receiver.
#[derive(Parser, Debug)]
#[command(name = "nalpipe-receiver", about = "Demux an Annex-B H.264 stream from TCP")]
struct Cli {
    /// Address to accept the stream on.
    #[arg(long, default_value = "0.0.0.0:54596")]
    listen: SocketAddr,

    /// TOML config file (`[stream]` and `[decoder]` tables).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Start code variant: three-byte or four-byte.
    #[arg(long)]
    delimiter: Option<DelimiterVariant>,

    /// Assembly buffer size in bytes.
    #[arg(long)]
    buffer_capacity: Option<usize>,

    /// Socket read timeout.
    #[arg(long)]
    io_timeout_ms: Option<u64>,

    /// Bounded wait for a free decoder input slot.
    #[arg(long)]
    slot_timeout_ms: Option<u64>,

    /// Decoder input pool size.
    #[arg(long)]
    input_slots: Option<usize>,

    /// Decoder input slot size in bytes.
    #[arg(long)]
    slot_size: Option<usize>,

    /// Drop decoded frames instead of rendering them.
    #[arg(long, default_value_t = false)]
    no_render: bool,

    /// Write rendered units, re-framed with start codes, to this file.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Seconds between stats log lines.
    #[arg(long, default_value_t = 5)]
    stats_interval_secs: u64,
}

fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing::info!(
        listen = %cli.listen,
        delimiter = %config.session.delimiter,
        buffer_capacity = config.session.buffer_capacity,
        input_slots = config.decoder.input_slots,
        slot_size = config.decoder.slot_size,
        render = config.session.render,
        "nalpipe-receiver starting"
    );

    // ── Graceful shutdown ───────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutting down...");
            running.store(false, Ordering::Relaxed);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    // ── Accept ──────────────────────────────────────────────────
    let listener = TcpListener::bind(cli.listen)
        .with_context(|| format!("failed to bind {}", cli.listen))?;
    let Some((stream, peer)) = accept(&listener, &running)? else {
        tracing::info!("stopped before a peer connected");
        return Ok(());
    };
    tracing::info!(%peer, "stream connected");

    // ── Session ─────────────────────────────────────────────────
    let source = TimeoutReader::tcp(stream, config.session.io_timeout)
        .context("failed to configure socket")?;
    let (display_tx, display_rx) = crossbeam_channel::bounded(DISPLAY_QUEUE);
    let decoder = LoopbackDecoder::new(&config.decoder).with_display(display_tx);
    let display = spawn_display(display_rx, cli.output.clone(), config.session.delimiter)?;

    let mut session = StreamSession::start(source, decoder, &config.session)
        .context("failed to start stream session")?;

    // ── Monitor ─────────────────────────────────────────────────
    let stats_interval = Duration::from_secs(cli.stats_interval_secs.max(1));
    let grace = config.session.max_wait();
    let mut last_stats_log = Instant::now();
    let mut one_finished_at: Option<Instant> = None;

    while running.load(Ordering::Relaxed) {
        if session.is_finished() {
            break;
        }
        // A loop that ended alone is given one bounded wait for its sibling
        // to follow before the session is torn down.
        if session.demux_finished() || session.drain_finished() {
            let since = *one_finished_at.get_or_insert_with(Instant::now);
            if since.elapsed() > grace {
                tracing::warn!(
                    demux_finished = session.demux_finished(),
                    drain_finished = session.drain_finished(),
                    "one loop ended; stopping session"
                );
                break;
            }
        }

        if last_stats_log.elapsed() >= stats_interval {
            log_stats(&session.stats());
            last_stats_log = Instant::now();
        }
        thread::sleep(POLL_INTERVAL);
    }

    // ── Cleanup ─────────────────────────────────────────────────
    let report = session
        .stop()
        .context("stream session was already stopped")?;
    drop(session);
    let sink = match display.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("display thread panicked"),
    };

    let summary = RunSummary::new(peer, &report, sink);
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed to encode report")?
    );
    tracing::info!(
        clean = summary.clean,
        units = report.stats.units_submitted,
        frames = sink.frames,
        "nalpipe-receiver stopped"
    );
    Ok(())
}

// ─── Config ─────────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            PipelineConfig::from_toml_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => PipelineConfig::from_toml_str("")?,
    };

    let session = &mut config.session;
    if let Some(delimiter) = cli.delimiter {
        session.delimiter = delimiter;
    }
    if let Some(capacity) = cli.buffer_capacity {
        session.buffer_capacity = capacity.max(nalpipe_core::config::MIN_BUFFER_CAPACITY);
    }
    if let Some(ms) = cli.io_timeout_ms {
        anyhow::ensure!(ms > 0, "--io-timeout-ms must be greater than zero");
        session.io_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = cli.slot_timeout_ms {
        anyhow::ensure!(ms > 0, "--slot-timeout-ms must be greater than zero");
        session.slot_acquire_timeout = Duration::from_millis(ms);
    }
    if cli.no_render {
        session.render = false;
    }
    if let Some(slots) = cli.input_slots {
        anyhow::ensure!(slots > 0, "--input-slots must be greater than zero");
        config.decoder.input_slots = slots;
    }
    if let Some(size) = cli.slot_size {
        anyhow::ensure!(size > 0, "--slot-size must be greater than zero");
        config.decoder.slot_size = size;
    }
    Ok(config)
}

// ─── Accept ─────────────────────────────────────────────────────────────────

/// Wait for one peer, polling the shutdown flag between attempts.
fn accept(
    listener: &TcpListener,
    running: &AtomicBool,
) -> anyhow::Result<Option<(TcpStream, SocketAddr)>> {
    listener
        .set_nonblocking(true)
        .context("failed to make listener non-blocking")?;
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream
                    .set_nonblocking(false)
                    .context("failed to make stream blocking")?;
                return Ok(Some((stream, peer)));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(e).context("accept failed"),
        }
    }
    Ok(None)
}

// ─── Display sink ───────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, Serialize)]
struct SinkTotals {
    frames: u64,
    bytes: u64,
}

/// Consume rendered frames until the drain loop drops its sender.
fn spawn_display(
    frames: Receiver<RenderedFrame>,
    output: Option<PathBuf>,
    delimiter: DelimiterVariant,
) -> anyhow::Result<JoinHandle<anyhow::Result<SinkTotals>>> {
    let mut writer = match &output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => None,
    };

    let handle = thread::Builder::new()
        .name("nalpipe-display".into())
        .spawn(move || -> anyhow::Result<SinkTotals> {
            let mut totals = SinkTotals::default();
            for frame in frames.iter() {
                totals.frames += 1;
                totals.bytes += frame.payload.len() as u64;
                if let Some(w) = writer.as_mut() {
                    w.write_all(delimiter.bytes())?;
                    w.write_all(&frame.payload)?;
                }
            }
            if let Some(w) = writer.as_mut() {
                w.flush()?;
            }
            Ok(totals)
        })
        .context("failed to spawn display thread")?;
    Ok(handle)
}

// ─── Reporting ──────────────────────────────────────────────────────────────

fn log_stats(stats: &StatsSnapshot) {
    tracing::info!(
        bytes_read = stats.bytes_read,
        units = stats.units_submitted,
        parameter_sets = stats.parameter_sets,
        idr = stats.idr_units,
        rendered = stats.frames_rendered,
        dropped = stats.frames_dropped,
        read_timeouts = stats.read_timeouts,
        acquire_timeouts = stats.acquire_timeouts,
        "receiver stats"
    );
}

#[derive(Debug, Serialize)]
struct RunSummary {
    peer: String,
    clean: bool,
    demux: String,
    drain: String,
    stats: StatsSnapshot,
    sink: SinkTotals,
}

impl RunSummary {
    fn new(peer: SocketAddr, report: &SessionReport, sink: SinkTotals) -> Self {
        let outcome = |r: Result<String, String>| r.unwrap_or_else(|e| format!("error: {e}"));
        Self {
            peer: peer.to_string(),
            clean: report.is_clean(),
            demux: outcome(
                report
                    .demux
                    .as_ref()
                    .map(|t| format!("{t:?}"))
                    .map_err(|e| e.to_string()),
            ),
            drain: outcome(
                report
                    .drain
                    .as_ref()
                    .map(|t| format!("{t:?}"))
                    .map_err(|e| e.to_string()),
            ),
            stats: report.stats,
            sink,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("nalpipe-receiver").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn defaults_without_flags() {
        let cli = cli(&[]);
        assert_eq!(cli.listen.port(), 54596);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.session.delimiter, DelimiterVariant::FourByte);
        assert!(config.session.render);
    }

    #[test]
    fn flags_override_config() {
        let cli = cli(&[
            "--delimiter",
            "three-byte",
            "--buffer-capacity",
            "4",
            "--io-timeout-ms",
            "250",
            "--input-slots",
            "2",
            "--no-render",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.session.delimiter, DelimiterVariant::ThreeByte);
        assert_eq!(
            config.session.buffer_capacity,
            nalpipe_core::config::MIN_BUFFER_CAPACITY
        );
        assert_eq!(config.session.io_timeout, Duration::from_millis(250));
        assert_eq!(config.decoder.input_slots, 2);
        assert!(!config.session.render);
    }

    #[test]
    fn rejects_zero_and_unknown_values() {
        assert!(load_config(&cli(&["--slot-timeout-ms", "0"])).is_err());
        assert!(Cli::try_parse_from(["nalpipe-receiver", "--delimiter", "five"]).is_err());
    }
}
