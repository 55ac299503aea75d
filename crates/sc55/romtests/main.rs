//! Boots real firmware. ROM images are looked up in the directory named by `SC55_ROM_DIR`,
//! romsets whose files are missing are reported as ignored.

use libtest_mimic::{Arguments, Failed, Trial};
use sc55::{
    Config, Emulator,
    romset::{RomImages, Romset},
};
use std::path::{Path, PathBuf};
use strum::VariantArray;

const GS_RESET: [u8; 11] = [
    0xF0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7,
];

fn boot(dir: &Path, romset: Romset) -> Result<Emulator, Failed> {
    let images = RomImages::load(dir, romset).map_err(|e| Failed::from(e.to_string()))?;
    Ok(Emulator::new(Config { romset }, images))
}

/// Runs for `seconds` of output, returning the peak absolute sample.
fn run(emulator: &mut Emulator, seconds: f64) -> Result<i16, Failed> {
    let samples = (emulator.sample_rate() as f64 * seconds) as usize;
    let mut peak = 0i16;
    emulator
        .update(samples, &mut |left: i16, right: i16| {
            peak = peak.max(left.saturating_abs()).max(right.saturating_abs());
        })
        .map_err(|e| Failed::from(e.to_string()))?;

    Ok(peak)
}

fn boots_to_lcd(dir: &Path, romset: Romset) -> Result<(), Failed> {
    let mut emulator = boot(dir, romset)?;
    run(&mut emulator, 2.0)?;

    let lcd = emulator.lcd();
    if !lcd.display_on() {
        return Err(Failed::from("display never turned on"));
    }

    if lcd.ddram().iter().all(|&c| c == b' ' || c == 0) {
        return Err(Failed::from("nothing written to the display"));
    }

    Ok(())
}

fn plays_a_note(dir: &Path, romset: Romset) -> Result<(), Failed> {
    let mut emulator = boot(dir, romset)?;
    run(&mut emulator, 2.0)?;

    emulator.post_uart_all(&GS_RESET);
    run(&mut emulator, 0.5)?;

    let silence = run(&mut emulator, 0.1)?;
    emulator.post_uart_all(&[0x90, 60, 100]);
    let note = run(&mut emulator, 0.5)?;

    if note <= silence {
        return Err(Failed::from(format!(
            "note on left the output silent (peak {note}, idle {silence})"
        )));
    }

    Ok(())
}

fn reset_restarts_firmware(dir: &Path, romset: Romset) -> Result<(), Failed> {
    let mut emulator = boot(dir, romset)?;
    let start = emulator.mcu.address();
    run(&mut emulator, 0.2)?;

    emulator.reset();
    if emulator.mcu.address() != start || emulator.system.cycles != 0 {
        return Err(Failed::from("reset did not return to the reset vector"));
    }

    run(&mut emulator, 0.2)?;
    Ok(())
}

fn main() {
    let args = Arguments::from_args();
    let dir = std::env::var_os("SC55_ROM_DIR").map(PathBuf::from);

    type Check = fn(&Path, Romset) -> Result<(), Failed>;
    let checks: [(&str, Check); 3] = [
        ("boots_to_lcd", boots_to_lcd),
        ("plays_a_note", plays_a_note),
        ("reset_restarts_firmware", reset_restarts_firmware),
    ];

    let mut tests = vec![];
    for &romset in Romset::VARIANTS {
        let present = dir
            .as_deref()
            .is_some_and(|dir| RomImages::load(dir, romset).is_ok());

        for (name, check) in checks {
            let dir = dir.clone().unwrap_or_default();
            let romset_name: &'static str = romset.into();
            tests.push(
                Trial::test(format!("{romset_name}::{name}"), move || check(&dir, romset))
                    .with_ignored_flag(!present),
            );
        }
    }

    libtest_mimic::run(&args, tests).exit();
}
