//! # MIDI Encoding Module
//!
//! Raw channel-voice messages for note events. Transport (ports, virtual
//! devices) is the host's concern; the core only produces bytes.

use crate::notes::{NoteEvent, NoteEventKind};

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const CONTROL_CHANGE: u8 = 0xB0;
/// Channel-mode controller "All Notes Off".
pub const ALL_NOTES_OFF: u8 = 123;

impl NoteEvent {
    /// Encodes the event as a three-byte message on `channel` (0-15).
    ///
    /// Note-Off is sent as a true `0x80` message with release velocity 0.
    pub fn to_midi(&self, channel: u8) -> [u8; 3] {
        let status = match self.kind {
            NoteEventKind::On => NOTE_ON,
            NoteEventKind::Off => NOTE_OFF,
        };
        [status | (channel & 0x0f), self.note & 0x7f, self.velocity & 0x7f]
    }
}

/// "All Notes Off" controller message for `channel`.
pub fn all_notes_off(channel: u8) -> [u8; 3] {
    [CONTROL_CHANGE | (channel & 0x0f), ALL_NOTES_OFF, 0]
}
