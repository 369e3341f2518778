//! # Note State Module
//!
//! Turns per-step note candidates into Note-On / Note-Off events.
//!
//! ## Rules
//! - A candidate with no active note starts one and emits Note-On, unless new
//!   notes are being held (see below).
//! - An active note missing from the candidates counts absent steps; it is
//!   released once the count exceeds the debounce limit. Any reappearance
//!   resets the count and refreshes its magnitude.
//! - A transient within the last few steps that no note has claimed yet
//!   backdates the onset of the notes it precedes and drives their velocity.
//!   Flags raised while an attack is still settling belong to that attack.
//! - At most one active note per MIDI number; a note is never re-triggered
//!   while active.
//!
//! ## Onset settling
//! While an attack is only partly inside the analysis window the spectrum is
//! smeared: the main peak sits low and sidelobes rise above the noise floor.
//! New notes are therefore held for `onset_settle_steps` after a transient,
//! after the pipeline leaves silence, or after a candidate with no active note
//! first appears. When the hold ends, whatever is still a candidate starts.
//! Active notes keep updating during a hold.
//!
//! State lives in a fixed 128-slot table and a preallocated transient queue,
//! so `update` never allocates as long as `out` has capacity.

use std::collections::VecDeque;

use crate::chord::NoteCandidate;
use crate::config::PipelineConfig;
use crate::transient::TransientEvent;

const MIDI_NOTES: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteEventKind {
    On,
    Off,
}

/// A note boundary, timestamped in microseconds since session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub kind: NoteEventKind,
    pub note: u8,
    /// `1..=127` for Note-On, `0` for Note-Off.
    pub velocity: u8,
    pub timestamp_micros: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActiveNote {
    pub note: u8,
    /// Candidate magnitude from the most recent step that resolved it.
    pub magnitude: f32,
    pub onset_micros: u64,
    pub velocity: u8,
    pub frames_missing: u32,
}

#[derive(Debug, Clone, Copy)]
struct RecentTransient {
    /// Last step that flagged this attack.
    step: u64,
    /// Start of the first frame that flagged it.
    timestamp_micros: u64,
    rms: f32,
    claimed: bool,
}

pub struct NoteStateMachine {
    active: [Option<ActiveNote>; MIDI_NOTES],
    present: [bool; MIDI_NOTES],
    recent: VecDeque<RecentTransient>,
    step: u64,
    /// Last step of the current hold on new notes.
    settle_until: Option<u64>,
    settle_steps: u64,
    debounce: u32,
    lookback: u64,
    noise_floor: f32,
    velocity_floor_db: f32,
    velocity_range_db: f32,
}

impl NoteStateMachine {
    pub fn new(config: &PipelineConfig) -> Self {
        let lookback = config.transient_lookback_steps as usize;
        Self {
            active: [None; MIDI_NOTES],
            present: [false; MIDI_NOTES],
            recent: VecDeque::with_capacity(lookback + 1),
            step: 0,
            settle_until: None,
            settle_steps: config.onset_settle_steps as u64,
            debounce: config.note_off_debounce,
            lookback: config.transient_lookback_steps as u64,
            noise_floor: config.noise_floor,
            velocity_floor_db: config.velocity_floor_db,
            velocity_range_db: config.velocity_range_db,
        }
    }

    /// Advances one step and appends the resulting events to `out`.
    ///
    /// Releases are emitted before onsets within a step.
    ///
    /// # Arguments
    /// * `candidates` - This step's solver output, loudest first
    /// * `transient` - This step's transient detector output
    /// * `timestamp_micros` - Start of the newest frame of this step
    /// * `out` - Event sink; cleared by the caller
    pub fn update(
        &mut self,
        candidates: &[NoteCandidate],
        transient: TransientEvent,
        timestamp_micros: u64,
        out: &mut Vec<NoteEvent>,
    ) {
        self.step += 1;
        self.remember_transient(transient, timestamp_micros);

        self.present.fill(false);
        for candidate in candidates {
            self.present[candidate.note as usize & 0x7f] = true;
        }

        for slot in self.active.iter_mut() {
            let Some(active) = slot else { continue };
            if self.present[active.note as usize] {
                continue;
            }
            active.frames_missing += 1;
            if active.frames_missing > self.debounce {
                out.push(NoteEvent {
                    kind: NoteEventKind::Off,
                    note: active.note,
                    velocity: 0,
                    timestamp_micros,
                });
                *slot = None;
            }
        }

        let held = self.onsets_held(candidates);
        let mut onset: Option<(u64, f32)> = None;
        let mut onset_resolved = false;
        for candidate in candidates {
            let note = candidate.note & 0x7f;
            // Later duplicates of a note are quieter; the first one counts.
            if !std::mem::take(&mut self.present[note as usize]) {
                continue;
            }
            if let Some(active) = self.active[note as usize].as_mut() {
                active.frames_missing = 0;
                active.magnitude = candidate.magnitude;
                continue;
            }
            if held {
                continue;
            }

            if !onset_resolved {
                onset = self.claim_transient();
                onset_resolved = true;
            }
            let (onset_micros, velocity) = match onset {
                Some((at, rms)) => (at, self.velocity_from_rms(rms)),
                None => (timestamp_micros, self.velocity_from_magnitude(candidate.magnitude)),
            };

            self.active[note as usize] = Some(ActiveNote {
                note,
                magnitude: candidate.magnitude,
                onset_micros,
                velocity,
                frames_missing: 0,
            });
            out.push(NoteEvent {
                kind: NoteEventKind::On,
                note,
                velocity,
                timestamp_micros: onset_micros,
            });
        }
    }

    /// Holds new notes from the next step on, as after a transient.
    ///
    /// The pipeline calls this when a step is analysed after silence.
    pub fn hold_onsets(&mut self) {
        self.extend_settle(self.step + 1);
    }

    /// Whether new notes wait this step. Starts a hold when an unknown
    /// candidate shows up outside of one, and ends the hold on its last step.
    fn onsets_held(&mut self, candidates: &[NoteCandidate]) -> bool {
        if self.settle_steps == 0 {
            return false;
        }
        match self.settle_until {
            Some(until) if self.step < until => true,
            Some(_) => {
                self.settle_until = None;
                false
            }
            None => {
                let unknown = candidates.iter().any(|c| !self.is_active(c.note));
                if unknown {
                    self.settle_until = Some(self.step + self.settle_steps);
                }
                unknown
            }
        }
    }

    fn extend_settle(&mut self, from_step: u64) {
        if self.settle_steps == 0 {
            return;
        }
        let until = from_step + self.settle_steps;
        self.settle_until = Some(self.settle_until.map_or(until, |current| current.max(until)));
    }

    /// Releases every active note, in ascending note order.
    pub fn release_all(&mut self, timestamp_micros: u64, out: &mut Vec<NoteEvent>) {
        for slot in self.active.iter_mut() {
            if let Some(active) = slot.take() {
                out.push(NoteEvent {
                    kind: NoteEventKind::Off,
                    note: active.note,
                    velocity: 0,
                    timestamp_micros,
                });
            }
        }
        self.recent.clear();
        self.settle_until = None;
    }

    pub fn is_active(&self, note: u8) -> bool {
        self.active
            .get(note as usize)
            .is_some_and(|slot| slot.is_some())
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn active_notes(&self) -> impl Iterator<Item = &ActiveNote> {
        self.active.iter().flatten()
    }

    fn remember_transient(&mut self, transient: TransientEvent, timestamp_micros: u64) {
        while self
            .recent
            .front()
            .is_some_and(|t| t.step + self.lookback < self.step)
        {
            self.recent.pop_front();
        }
        if !transient.detected {
            return;
        }
        self.extend_settle(self.step);

        let same_attack = self
            .recent
            .back()
            .is_some_and(|last| !last.claimed && last.step + self.settle_steps >= self.step);
        if same_attack {
            if let Some(last) = self.recent.back_mut() {
                last.step = self.step;
                last.rms = last.rms.max(transient.magnitude_estimate);
            }
            return;
        }
        if self.recent.len() == self.recent.capacity() {
            self.recent.pop_front();
        }
        self.recent.push_back(RecentTransient {
            step: self.step,
            timestamp_micros,
            rms: transient.magnitude_estimate,
            claimed: false,
        });
    }

    /// Marks the newest unclaimed transient as used and returns its timestamp and RMS.
    fn claim_transient(&mut self) -> Option<(u64, f32)> {
        let recent = self.recent.iter_mut().rev().find(|t| !t.claimed)?;
        recent.claimed = true;
        Some((recent.timestamp_micros, recent.rms))
    }

    fn velocity_from_rms(&self, rms: f32) -> u8 {
        let db = 20.0 * rms.max(1e-9).log10();
        self.scale_velocity((db - self.velocity_floor_db) / self.velocity_range_db)
    }

    fn velocity_from_magnitude(&self, magnitude: f32) -> u8 {
        let db = 20.0 * (magnitude / self.noise_floor).max(1e-9).log10();
        self.scale_velocity(db / self.velocity_range_db)
    }

    fn scale_velocity(&self, normalized: f32) -> u8 {
        if !normalized.is_finite() {
            return 1;
        }
        (1.0 + normalized.clamp(0.0, 1.0) * 126.0).round() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(note: u8, magnitude: f32) -> NoteCandidate {
        NoteCandidate {
            frequency_hz: crate::tuning::midi_to_frequency(note),
            note,
            magnitude,
        }
    }

    fn immediate() -> PipelineConfig {
        PipelineConfig {
            onset_settle_steps: 0,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn velocity_is_clamped() {
        let machine = NoteStateMachine::new(&PipelineConfig::default());
        assert_eq!(machine.velocity_from_rms(0.0), 1);
        assert_eq!(machine.velocity_from_rms(2.0), 127);
        assert_eq!(machine.velocity_from_magnitude(8.0), 1);
        assert_eq!(machine.velocity_from_magnitude(1e6), 127);
        let soft = machine.velocity_from_rms(0.02);
        let loud = machine.velocity_from_rms(0.5);
        assert!(soft < loud);
    }

    #[test]
    fn duplicate_candidates_start_one_note() {
        let mut machine = NoteStateMachine::new(&immediate());
        let mut out = Vec::new();
        machine.update(
            &[candidate(64, 30.0), candidate(64, 20.0)],
            TransientEvent::default(),
            0,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(machine.active_count(), 1);
        assert_eq!(machine.active_notes().next().unwrap().magnitude, 30.0);
    }

    #[test]
    fn sustained_note_tracks_its_magnitude() {
        let mut machine = NoteStateMachine::new(&immediate());
        let mut out = Vec::new();
        machine.update(&[candidate(40, 30.0)], TransientEvent::default(), 0, &mut out);
        machine.update(&[candidate(40, 90.0)], TransientEvent::default(), 2_666, &mut out);

        assert_eq!(out.len(), 1);
        let e2 = machine.active_notes().next().unwrap();
        assert_eq!(e2.magnitude, 90.0);
        assert_eq!(e2.onset_micros, 0);
    }

    #[test]
    fn unknown_candidate_waits_for_the_settle_period() {
        let config = PipelineConfig::default();
        let settle = config.onset_settle_steps as u64;
        let mut machine = NoteStateMachine::new(&config);
        let mut out = Vec::new();

        // A sidelobe that comes and goes during the hold never starts.
        machine.update(
            &[candidate(52, 20.0), candidate(60, 9.0)],
            TransientEvent::default(),
            0,
            &mut out,
        );
        for step in 1..settle {
            machine.update(&[candidate(52, 20.0)], TransientEvent::default(), step, &mut out);
        }
        assert!(out.is_empty());
        assert_eq!(machine.active_count(), 0);

        machine.update(&[candidate(52, 20.0)], TransientEvent::default(), settle, &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!((out[0].kind, out[0].note), (NoteEventKind::On, 52));
        assert_eq!(out[0].timestamp_micros, settle);
    }

    #[test]
    fn release_all_empties_the_table() {
        let mut machine = NoteStateMachine::new(&immediate());
        let mut out = Vec::new();
        machine.update(
            &[candidate(52, 30.0), candidate(40, 40.0)],
            TransientEvent::default(),
            0,
            &mut out,
        );
        out.clear();
        machine.release_all(5_000, &mut out);
        let notes: Vec<u8> = out.iter().map(|e| e.note).collect();
        assert_eq!(notes, vec![40, 52]);
        assert!(out.iter().all(|e| e.kind == NoteEventKind::Off && e.velocity == 0));
        assert_eq!(machine.active_count(), 0);
    }
}
