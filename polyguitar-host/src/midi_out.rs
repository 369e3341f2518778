//! # MIDI Output Module
//!
//! Sends note events to a MIDI output port through `midir`.
//!
//! ## Port selection
//! 1. The configured port name, matched exactly
//! 2. The first port containing it, ignoring case
//! 3. The first available port
//! 4. A virtual port (ALSA/JACK/CoreMIDI only) when no port exists at all

use anyhow::{Result, anyhow};
use midir::{MidiOutput, MidiOutputConnection};
use polyguitar_core::midi;
use polyguitar_core::tuning::note_name;
use polyguitar_core::{NoteEvent, NoteEventKind};

use crate::settings::MidiSettings;

/// Lists the names of all MIDI output ports.
pub fn list_ports(client_name: &str) -> Result<Vec<String>> {
    let output = MidiOutput::new(client_name)?;
    Ok(output
        .ports()
        .iter()
        .filter_map(|port| output.port_name(port).ok())
        .collect())
}

/// Picks the index of the port to open among `names`.
///
/// # Arguments
/// * `names` - Available port names, in driver order
/// * `wanted` - Optional preferred name or name fragment
///
/// # Returns
/// * `Some(index)` - Exact match, else case-insensitive substring, else the first port
/// * `None` - No ports at all
pub fn select_port(names: &[String], wanted: Option<&str>) -> Option<usize> {
    if names.is_empty() {
        return None;
    }
    let Some(wanted) = wanted.filter(|w| !w.is_empty()) else {
        return Some(0);
    };
    if let Some(index) = names.iter().position(|name| name == wanted) {
        return Some(index);
    }
    let needle = wanted.to_lowercase();
    names
        .iter()
        .position(|name| name.to_lowercase().contains(&needle))
        .or(Some(0))
}

/// Where note events end up.
pub struct MidiSink {
    connection: Option<MidiOutputConnection>,
    port_name: String,
    channel: u8,
    sent: u64,
    failed: u64,
}

impl MidiSink {
    /// Opens the output port chosen by `settings`.
    pub fn open(settings: &MidiSettings, channel: u8) -> Result<Self> {
        let output = MidiOutput::new(&settings.client_name)?;
        let ports = output.ports();
        let names: Vec<String> = ports
            .iter()
            .map(|port| output.port_name(port).unwrap_or_default())
            .collect();
        log::info!("[MIDI] Available output ports: {:?}", names);

        let Some(index) = select_port(&names, settings.port.as_deref()) else {
            return Self::open_virtual(output, settings, channel);
        };

        let name = names[index].clone();
        if let Some(wanted) = settings.port.as_deref() {
            if !name.to_lowercase().contains(&wanted.to_lowercase()) {
                log::warn!("[MIDI] Port '{}' not found, using '{}'", wanted, name);
            }
        }

        let connection = output
            .connect(&ports[index], "polyguitar-out")
            .map_err(|e| anyhow!("failed to connect to MIDI port '{name}': {e}"))?;
        log::info!("[MIDI] Sending on '{}', channel {}", name, channel);

        Ok(Self::with_connection(Some(connection), name, channel))
    }

    #[cfg(unix)]
    fn open_virtual(output: MidiOutput, settings: &MidiSettings, channel: u8) -> Result<Self> {
        use midir::os::unix::VirtualOutput;

        let name = settings.virtual_port_name.clone();
        let connection = output
            .create_virtual(&name)
            .map_err(|e| anyhow!("failed to create virtual MIDI port '{name}': {e}"))?;
        log::info!("[MIDI] No output ports found, created virtual port '{}'", name);
        Ok(Self::with_connection(Some(connection), name, channel))
    }

    #[cfg(not(unix))]
    fn open_virtual(_output: MidiOutput, _settings: &MidiSettings, channel: u8) -> Result<Self> {
        log::warn!("[MIDI] No output ports found, MIDI output disabled");
        Ok(Self::disabled(channel))
    }

    /// A sink that only logs events.
    pub fn disabled(channel: u8) -> Self {
        Self::with_connection(None, "(none)".to_string(), channel)
    }

    fn with_connection(connection: Option<MidiOutputConnection>, port_name: String, channel: u8) -> Self {
        Self {
            connection,
            port_name,
            channel,
            sent: 0,
            failed: 0,
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Messages sent and messages the port refused.
    pub fn counts(&self) -> (u64, u64) {
        (self.sent, self.failed)
    }

    pub fn send_event(&mut self, event: &NoteEvent) {
        let kind = match event.kind {
            NoteEventKind::On => "On ",
            NoteEventKind::Off => "Off",
        };
        log::debug!(
            "[MIDI] {} {:>4} vel {:>3} at {:.3}s",
            kind,
            note_name(event.note),
            event.velocity,
            event.timestamp_micros as f64 / 1e6
        );
        self.send(&event.to_midi(self.channel));
    }

    /// Silences the channel, for shutdown.
    pub fn all_notes_off(&mut self) {
        self.send(&midi::all_notes_off(self.channel));
    }

    fn send(&mut self, message: &[u8]) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        match connection.send(message) {
            Ok(()) => self.sent += 1,
            Err(e) => {
                self.failed += 1;
                if self.failed == 1 {
                    log::warn!("[MIDI] Failed to send on '{}': {}", self.port_name, e);
                }
            }
        }
    }
}

impl Drop for MidiSink {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            log::info!("[MIDI] Port '{}' closed", self.port_name);
        }
    }
}
