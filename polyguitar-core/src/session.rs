//! # Session Module
//!
//! Owns the processing thread and wires the stages together.
//!
//! ## Threads
//! - **Audio callback** (driver-owned): holds the `RingProducer` and pushes frames.
//! - **Processing thread** (spawned here): waits for a step, snapshots the
//!   newest window, runs the `Pipeline`, and forwards events and diagnostics
//!   through bounded channels. A full channel drops and counts.
//! - **Host** (caller): receives events and diagnostics and decides when to stop.
//!
//! A malformed frame from the driver stops the session. On any stop the
//! processing thread releases every sounding note before it exits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::Diagnostics;
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::notes::NoteEvent;
use crate::pipeline::Pipeline;
use crate::ring_buffer::{RingConsumer, RingMonitor, RingProducer, ring_buffer};

/// Room for one step's events, including a full release.
const EVENT_SCRATCH: usize = 256;

/// Counters describing a session's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    pub steps: u64,
    pub skipped_steps: u64,
    pub overruns: u64,
    pub malformed_frames: u64,
    pub dropped_events: u64,
    pub dropped_diagnostics: u64,
}

#[derive(Default)]
struct Counters {
    steps: AtomicU64,
    skipped_steps: AtomicU64,
    dropped_events: AtomicU64,
    dropped_diagnostics: AtomicU64,
}

/// A running pipeline.
pub struct Session {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    monitor: RingMonitor,
    events: Receiver<NoteEvent>,
    diagnostics: Receiver<Diagnostics>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Validates `config`, builds every stage, and starts the processing thread.
    ///
    /// # Returns
    /// * `Ok((session, producer))` - The session handle and the write end of
    ///   the ring, to be moved into the audio callback
    /// * `Err(e)` - Invalid configuration or thread spawn failure
    pub fn start(config: PipelineConfig) -> Result<(Session, RingProducer)> {
        let pipeline = Pipeline::new(config.clone())?;
        let (producer, consumer) = ring_buffer(&config);
        let monitor = consumer.monitor();

        let (event_tx, event_rx) = bounded(config.event_queue_capacity);
        let (diagnostics_tx, diagnostics_rx) = bounded(config.diagnostics_queue_capacity);
        let running = Arc::new(AtomicBool::new(true));
        let counters = Arc::new(Counters::default());

        let worker = {
            let running = Arc::clone(&running);
            let counters = Arc::clone(&counters);
            let poll = Duration::from_micros(config.poll_interval_micros.max(1));
            thread::Builder::new()
                .name("polyguitar-processing".into())
                .spawn(move || {
                    run_processing(
                        pipeline,
                        consumer,
                        event_tx,
                        diagnostics_tx,
                        running,
                        counters,
                        poll,
                    )
                })?
        };

        log::info!(
            "[SESSION] Started: {} Hz, {}-sample frames, {}-sample window, up to {} notes",
            config.sample_rate,
            config.frame_size,
            config.window_size,
            config.max_notes
        );

        Ok((
            Session {
                running,
                counters,
                monitor,
                events: event_rx,
                diagnostics: diagnostics_rx,
                worker: Some(worker),
            },
            producer,
        ))
    }

    /// Note events in emission order.
    pub fn events(&self) -> &Receiver<NoteEvent> {
        &self.events
    }

    /// One report per analysed step, best effort.
    pub fn diagnostics(&self) -> &Receiver<Diagnostics> {
        &self.diagnostics
    }

    /// False once `stop` was called or the processing thread ended on its own.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            steps: self.counters.steps.load(Ordering::Relaxed),
            skipped_steps: self.counters.skipped_steps.load(Ordering::Relaxed),
            overruns: self.monitor.overruns(),
            malformed_frames: self.monitor.malformed_frames(),
            dropped_events: self.counters.dropped_events.load(Ordering::Relaxed),
            dropped_diagnostics: self.counters.dropped_diagnostics.load(Ordering::Relaxed),
        }
    }

    /// Stops the processing thread and waits for it.
    ///
    /// The producer starts refusing frames immediately. Note-Off events for
    /// every sounding note are queued before the thread exits, so the caller
    /// should drain `events()` afterwards. Calling `stop` twice is harmless.
    pub fn stop(&mut self) -> SessionStats {
        self.running.store(false, Ordering::Release);
        self.monitor.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[SESSION] Processing thread panicked");
            }
        }
        self.stats()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_processing(
    mut pipeline: Pipeline,
    mut consumer: RingConsumer,
    events: Sender<NoteEvent>,
    diagnostics: Sender<Diagnostics>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    poll: Duration,
) {
    log::info!("[PROCESSING] Processing thread started");
    let mut pending: Vec<NoteEvent> = Vec::with_capacity(EVENT_SCRATCH);
    let mut last_position = 0;

    while consumer.wait_for_step(&running, poll) {
        let Some(window) = consumer.snapshot() else {
            continue;
        };
        last_position = window.end_position();

        pending.clear();
        let report = pipeline.process(window, &mut pending);
        counters.steps.fetch_add(1, Ordering::Relaxed);
        counters
            .skipped_steps
            .store(consumer.skipped_steps(), Ordering::Relaxed);

        forward_events(&events, &pending, &counters);
        if let Err(TrySendError::Full(_)) = diagnostics.try_send(report) {
            counters.dropped_diagnostics.fetch_add(1, Ordering::Relaxed);
        }
    }

    if consumer.malformed_frames() > 0 {
        log::error!("[PROCESSING] Malformed frame from the audio driver, stopping session");
    }
    running.store(false, Ordering::Release);
    consumer.monitor().close();

    pending.clear();
    log::debug!(
        "[PROCESSING] Releasing {} sounding note(s)",
        pipeline.notes().active_count()
    );
    let timestamp = pipeline.timestamp_micros(last_position);
    pipeline.release_all(timestamp, &mut pending);
    forward_events(&events, &pending, &counters);

    log::info!(
        "[PROCESSING] Processing thread stopped after {} steps ({} skipped)",
        pipeline.steps(),
        consumer.skipped_steps()
    );
}

fn forward_events(events: &Sender<NoteEvent>, pending: &[NoteEvent], counters: &Counters) {
    for event in pending {
        if let Err(TrySendError::Full(_)) = events.try_send(*event) {
            counters.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }
}
