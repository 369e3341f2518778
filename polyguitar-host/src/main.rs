//! # PolyGuitar - Real-Time Guitar to MIDI
//!
//! Command-line host for the polyphonic guitar-to-MIDI pipeline. It wires the
//! default audio input into a core `Session` and forwards the resulting note
//! events to a MIDI output port.
//!
//! ## Architecture
//! - **Audio Callback**: cpal driver thread, pushes 128-sample frames into the ring
//! - **Processing Thread**: owned by the session, analyses one window per frame
//! - **Main Thread**: sends events to MIDI, logs diagnostics, waits for Ctrl+C
//! - **Communication**: Crossbeam channels, multiplexed with `select!`

mod cli;
mod midi_out;
mod settings;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::{bounded, select, tick};
use polyguitar_core::tuning::note_name;
use polyguitar_core::{Diagnostics, Session, SessionStats, audio};

use cli::Cli;
use midi_out::MidiSink;
use settings::HostConfig;

/// How often the main loop checks session health.
const HEALTH_INTERVAL: Duration = Duration::from_millis(500);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Cli::parse()) {
        log::error!("[MAIN] {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default(),
    };
    cli.apply(&mut config);

    if cli.list_midi_ports {
        for (index, name) in midi_out::list_ports(&config.midi.client_name)?
            .iter()
            .enumerate()
        {
            println!("{index}: {name}");
        }
        return Ok(());
    }
    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    config
        .pipeline
        .validate()
        .context("invalid pipeline configuration")?;

    let channel = config.pipeline.midi_channel;
    let mut sink = if cli.dry_run {
        log::info!("[MIDI] Dry run, events are only logged");
        MidiSink::disabled(channel)
    } else {
        MidiSink::open(&config.midi, channel)?
    };

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("failed to install Ctrl+C handler")?;

    let (mut session, producer) = Session::start(config.pipeline.clone())?;
    let stream = audio::start_audio_capture(producer, &config.pipeline)
        .context("failed to start audio capture")?;
    log::info!("[MAIN] Listening. Press Ctrl+C to stop.");

    let health = tick(HEALTH_INTERVAL);
    let mut last_stats = SessionStats::default();
    loop {
        select! {
            recv(session.events()) -> msg => match msg {
                Ok(event) => sink.send_event(&event),
                Err(_) => break,
            },
            recv(session.diagnostics()) -> msg => match msg {
                Ok(report) => log_diagnostics(&report),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => {
                log::info!("[MAIN] Shutdown requested");
                break;
            },
            recv(health) -> _ => {
                if !session.is_running() {
                    log::warn!("[MAIN] Processing thread stopped");
                    break;
                }
                last_stats = report_health(session.stats(), last_stats);
            },
        }
    }

    log::info!("[MAIN] Stopping audio capture...");
    drop(stream);
    let stats = session.stop();
    for event in session.events().try_iter() {
        sink.send_event(&event);
    }
    sink.all_notes_off();

    let (sent, failed) = sink.counts();
    log::info!(
        "[MAIN] Session ended: {} steps, {} skipped, {} overruns, {} dropped events, {} MIDI messages sent to '{}' ({} failed)",
        stats.steps,
        stats.skipped_steps,
        stats.overruns,
        stats.dropped_events,
        sent,
        sink.port_name(),
        failed
    );

    if stats.malformed_frames > 0 {
        bail!(
            "audio driver delivered {} malformed frame(s)",
            stats.malformed_frames
        );
    }
    Ok(())
}

/// Warns about counters that grew since the last check.
fn report_health(current: SessionStats, previous: SessionStats) -> SessionStats {
    if current.overruns > previous.overruns {
        log::warn!(
            "[MAIN] Processing fell behind: {} overrun(s) since last check",
            current.overruns - previous.overruns
        );
    }
    if current.dropped_events > previous.dropped_events {
        log::warn!(
            "[MAIN] {} note event(s) dropped, the MIDI path is too slow",
            current.dropped_events - previous.dropped_events
        );
    }
    log::trace!(
        "[MAIN] {} steps, {} skipped, {} diagnostics dropped",
        current.steps,
        current.skipped_steps,
        current.dropped_diagnostics
    );
    current
}

fn log_diagnostics(report: &Diagnostics) {
    if report.note_count == 0 || !log::log_enabled!(log::Level::Debug) {
        return;
    }
    let notes = report
        .resolved()
        .iter()
        .map(|note| format!("{}({:+.1}c)", note_name(note.note), note.cents))
        .collect::<Vec<_>>()
        .join(" ");
    log::debug!(
        "[DIAG] step {} at {:.3}s: {} | dominant {} | flux {:.1}{}",
        report.step,
        report.timestamp_micros as f64 / 1e6,
        notes,
        report
            .dominant_frequency
            .map(|hz| format!("{hz:.1} Hz"))
            .unwrap_or_else(|| "-".to_string()),
        report.spectral_flux,
        if report.transient.detected { " | attack" } else { "" }
    );
}
