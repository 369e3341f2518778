use clap::Parser;
use std::path::PathBuf;

use crate::settings::HostConfig;

#[derive(Parser, Debug, Default)]
#[command(name = "polyguitar", about = "Real-time polyphonic guitar to MIDI converter")]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// MIDI output port to use (exact name or substring)
    #[arg(short = 'p', long)]
    pub midi_port: Option<String>,

    /// MIDI channel (0-15)
    #[arg(long)]
    pub channel: Option<u8>,

    /// Maximum simultaneous notes per step (1-8)
    #[arg(long)]
    pub max_notes: Option<usize>,

    /// Peak threshold in whitened units
    #[arg(long)]
    pub noise_floor: Option<f32>,

    /// Steps a note may go missing before it is released
    #[arg(long)]
    pub debounce: Option<u32>,

    /// Log note events instead of sending them to a MIDI port
    #[arg(long)]
    pub dry_run: bool,

    /// List available MIDI output ports and exit
    #[arg(long)]
    pub list_midi_ports: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Overrides file values with whatever was given on the command line.
    pub fn apply(&self, config: &mut HostConfig) {
        if let Some(port) = &self.midi_port {
            config.midi.port = Some(port.clone());
        }
        if let Some(channel) = self.channel {
            config.pipeline.midi_channel = channel;
        }
        if let Some(max_notes) = self.max_notes {
            config.pipeline.max_notes = max_notes;
        }
        if let Some(noise_floor) = self.noise_floor {
            config.pipeline.noise_floor = noise_floor;
        }
        if let Some(debounce) = self.debounce {
            config.pipeline.note_off_debounce = debounce;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file_values() {
        let cli = Cli::parse_from([
            "polyguitar",
            "--midi-port",
            "loopMIDI",
            "--channel",
            "3",
            "--max-notes",
            "4",
        ]);
        let mut config = HostConfig::default();
        config.pipeline.noise_floor = 5.0;
        cli.apply(&mut config);

        assert_eq!(config.midi.port.as_deref(), Some("loopMIDI"));
        assert_eq!(config.pipeline.midi_channel, 3);
        assert_eq!(config.pipeline.max_notes, 4);
        assert_eq!(config.pipeline.noise_floor, 5.0);
    }

    #[test]
    fn no_flags_leave_defaults() {
        let cli = Cli::parse_from(["polyguitar"]);
        let mut config = HostConfig::default();
        cli.apply(&mut config);
        assert_eq!(config, HostConfig::default());
        assert!(!cli.dry_run);
    }
}
