//! Emulation of the Roland SC-55 family of sound modules.
//!
//! An [`Emulator`] couples the main core with the [`System`] it drives. The host feeds it MIDI
//! bytes and panel buttons, and pulls stereo samples out of it.

pub mod irq;
pub mod lcd;
pub mod mcu;
pub mod pcm;
pub mod romset;
pub mod sub;
pub mod system;
pub mod timer;

use crate::{
    lcd::Lcd,
    mcu::Mcu,
    pcm::SampleSink,
    romset::{RomImages, Romset},
    system::{System, ports::Button},
};
use easyerr::Error;

pub use crate::romset::{Model, RomError};

/// Main core cycles taken by every step.
pub const STEP_CYCLES: u64 = 12;

/// How many steps [`Emulator::update`] may run per requested sample before giving up.
const STALL_LIMIT: u64 = 0x10000;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub romset: Romset,
}

#[derive(Debug, Error)]
pub enum StallError {
    #[error("no sample produced after {steps} steps (pc {address:05X})")]
    NoSamples { steps: u64, address: u32 },
}

/// Counts the samples going through to the host sink.
struct Counted<'a, S> {
    sink: &'a mut S,
    count: usize,
}

impl<S: SampleSink> SampleSink for Counted<'_, S> {
    #[inline(always)]
    fn post_sample(&mut self, left: i16, right: i16) {
        self.count += 1;
        self.sink.post_sample(left, right);
    }
}

/// The emulator.
pub struct Emulator {
    pub config: Config,
    pub mcu: Mcu,
    pub system: System,
}

impl Emulator {
    /// Builds an emulator booting from `images` and resets it.
    pub fn new(config: Config, images: RomImages) -> Self {
        let mut system = System::new(config.romset.model(), images);
        let mut mcu = Mcu::default();
        mcu.reset(&mut system);

        tracing::info!(
            "booting {} at {:05X}",
            config.romset.name(),
            mcu.address()
        );

        Self {
            config,
            mcu,
            system,
        }
    }

    /// Power-on reset of the whole unit. Pressed buttons are kept.
    pub fn reset(&mut self) {
        self.mcu.reset(&mut self.system);
    }

    /// Output sample rate in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.system.model.sample_rate()
    }

    /// Runs one core step and catches every peripheral up with it.
    pub fn step(&mut self, sink: &mut impl SampleSink) {
        self.mcu.step(&mut self.system);
        self.system.cycles += STEP_CYCLES;
        self.system.update_peripherals(sink);
    }

    /// Runs until at least `samples` stereo samples have been posted to `sink`.
    pub fn update(&mut self, samples: usize, sink: &mut impl SampleSink) -> Result<(), StallError> {
        let mut counted = Counted { sink, count: 0 };
        let limit = STALL_LIMIT * samples.max(1) as u64;

        let mut steps = 0;
        while counted.count < samples {
            if steps >= limit {
                return Err(StallError::NoSamples {
                    steps,
                    address: self.mcu.address(),
                });
            }

            self.step(&mut counted);
            steps += 1;
        }

        Ok(())
    }

    /// Runs until the main core cycle counter reaches `cycles`, posting every produced sample
    /// to `sink`.
    pub fn run(&mut self, cycles: u64, sink: &mut impl SampleSink) {
        while self.system.cycles < cycles {
            self.step(sink);
        }
    }

    /// Queues a byte on the MIDI input. Message boundaries are left to the firmware.
    pub fn post_uart(&mut self, byte: u8) {
        self.system.uart.post(byte);
    }

    pub fn post_uart_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.post_uart(byte);
        }
    }

    pub fn set_buttons(&mut self, buttons: &[Button]) {
        let mask = buttons.iter().fold(0, |acc, b| acc | b.mask());
        self.system.ports.set_buttons(mask);
    }

    pub fn lcd(&self) -> &Lcd {
        &self.system.lcd
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pcm::WaveRoms;

    /// Writes `data` to `address` with a byte immediate move.
    fn store(address: u16, data: u8) -> [u8; 5] {
        let [high, low] = address.to_be_bytes();
        [0x15, high, low, 0x06, data]
    }

    fn emulator(program: &[u8]) -> Emulator {
        let mut rom1 = vec![0; 0x8000];
        rom1[..4].copy_from_slice(&0x1000u32.to_be_bytes());
        rom1[0x1000..][..program.len()].copy_from_slice(program);

        let images = RomImages {
            rom1,
            rom2: vec![0; 0x80000],
            waves: WaveRoms::default(),
            sub: None,
        };

        Emulator::new(Config { romset: Romset::Scb55 }, images)
    }

    #[test]
    fn firmware_drives_lcd() {
        let mut program = vec![];
        for command in [0x38, 0x0C, 0x06, 0x80] {
            program.extend(store(0xE404, command));
        }
        for &c in b"OK" {
            program.extend(store(0xE405, c));
        }
        // sleep
        program.push(0x1A);

        let mut emu = emulator(&program);
        let mut samples = vec![];
        emu.update(64, &mut |l: i16, r: i16| samples.push((l, r))).unwrap();

        assert!(samples.len() >= 64);
        assert!(emu.mcu.sleep);
        assert!(emu.lcd().display_on());
        assert_eq!(&emu.lcd().ddram()[..2], b"OK");
    }

    #[test]
    fn reset_is_idempotent() {
        let mut emu = emulator(&[0x1A]);
        emu.set_buttons(&[Button::Power]);
        emu.post_uart_all(&[0x90, 0x40, 0x7F]);
        emu.update(16, &mut |_: i16, _: i16| ()).unwrap();

        emu.reset();
        let first = (emu.mcu.clone(), emu.system.cycles, emu.system.mem.clone());
        emu.reset();
        let second = (emu.mcu.clone(), emu.system.cycles, emu.system.mem.clone());

        assert_eq!(first, second);
        assert_eq!(emu.system.ports.buttons(), Button::Power.mask());
        assert!(!emu.system.uart.has_pending());
    }

    #[test]
    fn sample_rates() {
        let emu = emulator(&[0x1A]);
        assert_eq!(emu.sample_rate(), 66207);
    }

    #[test]
    fn run_reaches_target_cycle() {
        let mut emu = emulator(&[0x1A]);
        let mut count = 0;
        emu.run(1000, &mut |_: i16, _: i16| count += 1);

        assert!(emu.system.cycles >= 1000);
        assert!(emu.system.cycles < 1000 + STEP_CYCLES);
        // one sample per 50 cycles in the reset configuration, until the engine passes 1008
        assert_eq!(count, 21);
    }

    #[test]
    fn update_of_zero_samples_returns() {
        let mut emu = emulator(&[0x1A]);
        emu.update(0, &mut |_: i16, _: i16| ()).unwrap();
        assert_eq!(emu.system.cycles, 0);
    }
}
