mod cli;

use bytesize::ByteSize;
use clap::Parser;
use eyre_pretty::eyre::Result;
use sc55::{
    Config, Emulator, RomError,
    romset::{RomImages, Romset},
};
use std::time::Instant;
use zerocopy::{IntoBytes, byteorder::little_endian::I16};

/// Samples rendered between two rounds of MIDI input.
const BLOCK: usize = 256;
/// Bytes per second on a MIDI wire: 31250 baud, ten bits per byte.
const MIDI_RATE: f64 = 3125.0;
/// Time the firmware is given to boot before any MIDI is sent, in seconds.
const BOOT_TIME: f64 = 0.5;

fn setup_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or(EnvFilter::new("headless=info,sc55=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Text currently shown on the two LCD lines.
fn lcd_lines(emulator: &Emulator) -> [String; 2] {
    let ddram = emulator.lcd().ddram();
    let line = |start: usize| {
        ddram[start..start + 24]
            .iter()
            .map(|&c| if c.is_ascii_graphic() || c == b' ' { c as char } else { '?' })
            .collect::<String>()
    };

    [line(0x00), line(0x40)]
}

fn main() -> Result<()> {
    eyre_pretty::install()?;
    setup_tracing();

    let args = cli::Args::parse();
    let romset = match args.romset {
        Some(romset) => romset,
        None => Romset::detect(&args.rom_dir).ok_or(RomError::NoRomset)?,
    };

    let images = RomImages::load(&args.rom_dir, romset)?;
    let mut emulator = Emulator::new(Config { romset }, images);
    let rate = emulator.sample_rate() as f64;

    let mut midi = match &args.midi {
        Some(path) => std::fs::read(path)?,
        None => vec![],
    }
    .into_iter();

    let boot = (rate * BOOT_TIME) as usize;
    let mut reset = args.reset;
    let mut credit = 0.0;

    let start = Instant::now();
    let mut output = Vec::with_capacity(args.samples * 2);
    while output.len() < args.samples * 2 {
        let rendered = output.len() / 2;
        if rendered >= boot {
            if let Some(reset) = reset.take() {
                tracing::info!("sending {reset:?} reset");
                emulator.post_uart_all(reset.message());
            }

            credit += BLOCK as f64 * MIDI_RATE / rate;
            while credit >= 1.0 {
                let Some(byte) = midi.next() else {
                    break;
                };

                emulator.post_uart(byte);
                credit -= 1.0;
            }
        }

        let count = BLOCK.min(args.samples - rendered);
        emulator.update(count, &mut |left: i16, right: i16| {
            output.push(I16::new(left));
            output.push(I16::new(right));
        })?;
    }

    output.truncate(args.samples * 2);

    let elapsed = start.elapsed();
    tracing::info!(
        "rendered {} samples in {:.2?} ({:.2}x realtime)",
        args.samples,
        elapsed,
        args.samples as f64 / rate / elapsed.as_secs_f64()
    );

    for line in lcd_lines(&emulator) {
        tracing::info!("lcd: {line}");
    }

    let bytes = output.as_bytes();
    std::fs::write(&args.output, bytes)?;
    tracing::info!(
        "wrote {} to {} ({} Hz stereo)",
        ByteSize(bytes.len() as u64),
        args.output.display(),
        emulator.sample_rate()
    );

    Ok(())
}
