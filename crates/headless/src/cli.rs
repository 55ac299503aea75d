use clap::{Parser, ValueEnum};
use sc55::romset::Romset;
use std::path::PathBuf;

/// Standard reset message sent before playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Reset {
    /// Roland GS reset.
    Gs,
    /// General MIDI system on.
    Gm,
}

impl Reset {
    pub fn message(self) -> &'static [u8] {
        match self {
            Self::Gs => &[
                0xF0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7,
            ],
            Self::Gm => &[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7],
        }
    }
}

fn parse_romset(s: &str) -> Result<Romset, String> {
    s.parse()
        .map_err(|_| format!("unknown romset '{s}'"))
}

/// SC-55 emulator: renders the unit's output to a raw PCM file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding the ROM images.
    #[arg(short, long, default_value = ".")]
    pub rom_dir: PathBuf,
    /// Romset to boot. Detected from the ROM directory when absent.
    ///
    /// One of mk2, st, mk1, cm300, jv880, scb55, rlp3237, sc155, sc155mk2.
    #[arg(long, value_parser = parse_romset)]
    pub romset: Option<Romset>,
    /// Number of stereo samples to render.
    #[arg(short, long, default_value_t = 66207 * 5)]
    pub samples: usize,
    /// File of raw MIDI bytes to play, paced at the MIDI wire rate.
    #[arg(short, long)]
    pub midi: Option<PathBuf>,
    /// Reset message to send once the unit has booted.
    #[arg(long, value_enum)]
    pub reset: Option<Reset>,
    /// Where to write the interleaved 16 bit little endian samples.
    #[arg(short, long, default_value = "out.raw")]
    pub output: PathBuf,
}
