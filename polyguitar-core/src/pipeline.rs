//! # Pipeline Module
//!
//! One analysis step, run on the processing thread for every new window:
//!
//! ```text
//! window ─┬─> transient detector ───────────────┐
//!         └─> silence gate ─> spectral analyzer ─> chord solver ─> note state machine ─> events
//! ```
//!
//! Silent windows skip the transform: the whitening floor relaxes instead, and
//! the first analysed step after silence holds new notes until the sound has
//! settled into the window.
//!
//! All stages and their scratch buffers are built in `Pipeline::new`. A step
//! allocates nothing as long as the caller's event vector has room.

use crate::chord::{ChordSolver, NoteCandidate};
use crate::config::PipelineConfig;
use crate::error::ConfigError;
use crate::notes::{NoteEvent, NoteStateMachine};
use crate::pitch;
use crate::ring_buffer::AnalysisWindow;
use crate::spectral::SpectralAnalyzer;
use crate::transient::{self, TransientDetector};
use crate::tuning;
use crate::{Diagnostics, ResolvedNote};

pub struct Pipeline {
    config: PipelineConfig,
    analyzer: SpectralAnalyzer,
    detector: TransientDetector,
    solver: ChordSolver,
    notes: NoteStateMachine,
    candidates: Vec<NoteCandidate>,
    silent: bool,
    steps: u64,
}

impl Pipeline {
    /// Validates `config` and builds every stage.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let analyzer = SpectralAnalyzer::new(&config);
        let solver = ChordSolver::new(&config, analyzer.lobe_profile());
        Ok(Self {
            detector: TransientDetector::new(&config),
            notes: NoteStateMachine::new(&config),
            candidates: Vec::with_capacity(config.max_notes),
            silent: true,
            steps: 0,
            analyzer,
            solver,
            config,
        })
    }

    pub fn notes(&self) -> &NoteStateMachine {
        &self.notes
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn timestamp_micros(&self, sample_position: u64) -> u64 {
        self.config.micros_at(sample_position)
    }

    /// Runs one step over `window` and appends note events to `events`.
    ///
    /// Windows quieter than the silence threshold skip the transform; the
    /// note state machine still runs so sustained notes are released.
    ///
    /// New notes are reported once their attack has settled, with the
    /// timestamp of the transient that started them when there was one.
    pub fn process(&mut self, window: AnalysisWindow<'_>, events: &mut Vec<NoteEvent>) -> Diagnostics {
        self.steps += 1;
        let timestamp = self.config.micros_at(window.frame_start());
        let transient = self.detector.process(window.newest_frame());

        let samples = window.samples();
        let analysed = &samples[samples.len().saturating_sub(self.config.analysis_length)..];

        self.candidates.clear();
        let mut dominant_frequency = None;
        let mut spectral_flux = 0.0;
        if transient::rms(analysed) >= self.config.silence_rms {
            if self.silent {
                self.notes.hold_onsets();
                self.silent = false;
            }
            let frame = self.analyzer.analyze(samples);
            self.solver.solve(frame, &mut self.candidates);
            spectral_flux = frame.spectral_flux();
            dominant_frequency = pitch::dominant_peak(
                frame,
                self.config.min_frequency_hz,
                self.config.max_frequency_hz,
            )
            .filter(|peak| peak.magnitude > self.config.noise_floor)
            .map(|peak| peak.frequency_hz);
        } else {
            self.analyzer.relax();
            self.silent = true;
        }

        self.notes.update(&self.candidates, transient, timestamp, events);

        let mut report = Diagnostics {
            step: self.steps,
            timestamp_micros: timestamp,
            dominant_frequency,
            spectral_flux,
            transient,
            active_notes: self.notes.active_count(),
            ..Diagnostics::default()
        };
        for candidate in &self.candidates {
            report.push(ResolvedNote {
                note: candidate.note,
                frequency_hz: candidate.frequency_hz,
                cents: tuning::calculate_cents_deviation(
                    candidate.frequency_hz,
                    tuning::midi_to_frequency(candidate.note),
                ),
                magnitude: candidate.magnitude,
            });
        }
        report
    }

    /// Emits Note-Off for everything still sounding.
    pub fn release_all(&mut self, timestamp_micros: u64, events: &mut Vec<NoteEvent>) {
        self.notes.release_all(timestamp_micros, events);
    }
}
