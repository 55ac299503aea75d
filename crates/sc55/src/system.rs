//! State of the unit: memory and every peripheral around the main core.

pub mod bus;
pub mod device;
pub mod gate_array;
pub mod ports;
pub mod uart;

use crate::{
    irq::Interrupts,
    lcd::Lcd,
    pcm::{Pcm, SampleSink},
    romset::{Model, ROM1_LEN, RomImages},
    sub::{SubBus, SubCore},
    system::{device::Device, gate_array::GateArray, ports::Ports, uart::Uart},
    timer::Timers,
};
use util::boxed_array;

pub const RAM_LEN: usize = 0x400;
pub const SRAM_LEN: usize = 0x8000;

/// Memory of the main core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    pub rom1: Box<[u8; ROM1_LEN]>,
    /// Paged program ROM.
    pub rom2: Vec<u8>,
    pub rom2_mask: usize,
    /// On-chip RAM, mapped while enabled through RAME.
    pub ram: Box<[u8; RAM_LEN]>,
    /// External static RAM.
    pub sram: Box<[u8; SRAM_LEN]>,
}

impl Memory {
    fn new(rom1: &[u8], rom2: Vec<u8>) -> Self {
        let mut image: Box<[u8; ROM1_LEN]> = boxed_array(0);
        let len = rom1.len().min(ROM1_LEN);
        image[..len].copy_from_slice(&rom1[..len]);

        let rom2_mask = rom2.len().next_power_of_two().saturating_sub(1);
        Self {
            rom1: image,
            rom2,
            rom2_mask,
            ram: boxed_array(0),
            sram: boxed_array(0),
        }
    }

    fn clear(&mut self) {
        self.ram.fill(0);
        self.sram.fill(0);
    }
}

/// System state.
pub struct System {
    /// Variant of the board.
    pub model: Model,
    /// Main core cycle counter. Every peripheral is clocked from it.
    pub cycles: u64,
    pub mem: Memory,
    /// On-chip peripheral registers.
    pub device: Device,
    pub timers: Timers,
    /// Pending interrupt lines of the main core.
    pub irq: Interrupts,
    pub pcm: Pcm,
    pub lcd: Lcd,
    pub gate_array: GateArray,
    pub ports: Ports,
    /// Incoming MIDI.
    pub uart: Uart,
    /// The sub-core, absent on boards where the main core receives MIDI itself.
    pub sub: Option<SubCore>,
}

impl System {
    pub fn new(model: Model, images: RomImages) -> Self {
        let RomImages {
            rom1,
            rom2,
            waves,
            sub,
        } = images;

        let mut system = Self {
            model,
            cycles: 0,
            mem: Memory::new(&rom1, rom2),
            device: Device::default(),
            timers: Timers::default(),
            irq: Interrupts::default(),
            pcm: Pcm::new(model, waves),
            lcd: Lcd::default(),
            gate_array: GateArray::default(),
            ports: Ports::default(),
            uart: Uart::default(),
            sub: sub.map(|rom| SubCore::new(&rom)),
        };

        system.reset();
        system
    }

    /// Brings every peripheral and memory back to its power-on state. ROMs and the pressed
    /// buttons are kept.
    pub fn reset(&mut self) {
        let buttons = self.ports.buttons();

        self.cycles = 0;
        self.mem.clear();
        self.device.reset();
        self.timers.reset();
        self.irq.reset();
        self.pcm.reset();
        self.lcd = Lcd::default();
        self.gate_array = GateArray::default();
        self.ports = Ports::default();
        self.ports.set_buttons(buttons);
        self.uart.reset();

        if let Some(sub) = &mut self.sub {
            sub.power_on();
        }
    }

    /// Advances every peripheral up to the current cycle count, in hardware order.
    pub fn update_peripherals(&mut self, sink: &mut impl SampleSink) {
        self.pcm.update(self.cycles, &mut self.irq, sink);
        self.timers.clock(self.cycles, self.model.mk1, &mut self.irq);

        match &mut self.sub {
            Some(sub) => {
                let mut bus = SubBus {
                    ports: &mut self.ports,
                    gate_array: &mut self.gate_array,
                    uart: &mut self.uart,
                    irq: &mut self.irq,
                };

                sub.update(&mut bus, self.cycles);
            }
            None => {
                self.update_serial_rx();
                self.update_serial_tx();
            }
        }

        self.update_analog();
    }
}
