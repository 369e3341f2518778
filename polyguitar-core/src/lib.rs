// polyguitar-core/src/lib.rs

//! The core real-time pipeline for polyphonic guitar-to-MIDI conversion.
//! This crate captures audio into a lock-free ring, resolves chords by
//! iterative harmonic subtraction, and tracks note lifetimes. It is
//! completely headless; MIDI transport and configuration files belong to
//! the host binary.

pub mod audio;
pub mod chord;
pub mod config;
pub mod error;
pub mod midi;
pub mod notes;
pub mod pipeline;
pub mod pitch;
pub mod ring_buffer;
pub mod session;
pub mod spectral;
pub mod transient;
pub mod tuning;

pub use chord::{ChordSolver, NoteCandidate};
pub use config::{MAX_POLYPHONY, PipelineConfig};
pub use error::{AudioError, ConfigError, FrameError, PipelineError, Result};
pub use notes::{NoteEvent, NoteEventKind, NoteStateMachine};
pub use pipeline::Pipeline;
pub use ring_buffer::{AnalysisWindow, RingConsumer, RingMonitor, RingProducer, ring_buffer};
pub use session::{Session, SessionStats};
pub use spectral::{LobeProfile, SpectralAnalyzer, SpectralFrame};
pub use transient::{TransientDetector, TransientEvent};

/// One note the solver resolved in a step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResolvedNote {
    pub note: u8,
    /// Interpolated fundamental in Hz.
    pub frequency_hz: f32,
    /// Deviation from equal temperament.
    pub cents: f32,
    pub magnitude: f32,
}

/// Represents the result of a single analysis step.
///
/// Fixed-size and `Copy`, so it can cross a channel from the processing
/// thread without allocating.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Diagnostics {
    /// 1-based step counter.
    pub step: u64,
    /// Start of the newest frame, in microseconds since session start.
    pub timestamp_micros: u64,
    /// The strongest peak above the noise floor, in Hz.
    pub dominant_frequency: Option<f32>,
    pub notes: [ResolvedNote; MAX_POLYPHONY],
    pub note_count: usize,
    pub spectral_flux: f32,
    pub transient: TransientEvent,
    /// Notes sounding after this step.
    pub active_notes: usize,
}

impl Diagnostics {
    /// The notes resolved this step, loudest first.
    pub fn resolved(&self) -> &[ResolvedNote] {
        &self.notes[..self.note_count.min(MAX_POLYPHONY)]
    }

    fn push(&mut self, note: ResolvedNote) {
        if self.note_count < MAX_POLYPHONY {
            self.notes[self.note_count] = note;
            self.note_count += 1;
        }
    }
}
