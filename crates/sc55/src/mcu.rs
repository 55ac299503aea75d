//! The main core: a 16 bit processor with eight general registers, a paged 20 bit address space
//! and a two level exception/interrupt scheme.

mod exec;
mod operand;

use crate::system::System;
use bitos::{bitos, integer::u3};

/// Bits of the status register that are implemented.
const SR_MASK: u16 = 0x870F;

/// Exception vector numbers. The vector table holds one 32 bit address per vector at
/// `vector * 4`.
pub mod vector {
    pub const RESET: u8 = 0;
    pub const INVALID_INSTRUCTION: u8 = 2;
    pub const ADDRESS_ERROR: u8 = 8;
    pub const TRACE: u8 = 9;
    pub const NMI: u8 = 11;
    pub const TRAPA: u8 = 16;
}

#[bitos(16)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    #[bits(0)]
    pub carry: bool,
    #[bits(1)]
    pub overflow: bool,
    #[bits(2)]
    pub zero: bool,
    #[bits(3)]
    pub negative: bool,
    #[bits(8..11)]
    pub interrupt_mask: u3,
    #[bits(15)]
    pub trace: bool,
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

impl Eq for Status {}

/// Synchronous exceptions, in decreasing priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Exception {
    AddressError,
    InvalidInstruction,
    Trace,
}

impl Exception {
    pub fn vector(self) -> u8 {
        match self {
            Self::AddressError => vector::ADDRESS_ERROR,
            Self::InvalidInstruction => vector::INVALID_INSTRUCTION,
            Self::Trace => vector::TRACE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mcu {
    /// General registers. `r[7]` is the stack pointer.
    pub r: [u16; 8],
    pub pc: u16,
    pub sr: Status,
    /// Code page.
    pub cp: u8,
    /// Data page.
    pub dp: u8,
    /// Extended page.
    pub ep: u8,
    /// Stack page.
    pub tp: u8,
    /// Base register for short absolute addressing.
    pub br: u8,
    pub sleep: bool,
    /// Skips the interrupt check before the next instruction.
    ex_ignore: bool,
    exception: Option<Exception>,
    /// One bit per pending TRAPA vector.
    trapa: u16,
}

impl Mcu {
    /// Resets the core and the system it drives, then jumps to the reset vector.
    pub fn reset(&mut self, sys: &mut System) {
        sys.reset();

        *self = Self {
            sr: Status::from_bits(0x0700),
            ..Default::default()
        };

        let address = sys.read32(vector::RESET as u32 * 4);
        self.cp = (address >> 16) as u8;
        self.pc = address as u16;
    }

    #[inline(always)]
    pub fn mask(&self) -> u8 {
        self.sr.interrupt_mask().value()
    }

    #[inline(always)]
    fn set_sr(&mut self, value: u16) {
        self.sr = Status::from_bits(value & SR_MASK);
    }

    #[inline(always)]
    fn set_mask(&mut self, mask: u8) {
        let bits = self.sr.to_bits() & !0x0700;
        self.set_sr(bits | ((mask as u16 & 7) << 8));
    }

    /// Current program address.
    #[inline(always)]
    pub fn address(&self) -> u32 {
        ((self.cp as u32) << 16) | self.pc as u32
    }

    #[inline(always)]
    pub fn pending_exception(&self) -> Option<Exception> {
        self.exception
    }

    /// Marks an exception as pending. A lower priority exception never replaces a pending
    /// one.
    pub fn raise(&mut self, exception: Exception) {
        self.exception = Some(match self.exception {
            Some(pending) => pending.min(exception),
            None => exception,
        });
    }

    /// Logs an instruction the core does not implement. Execution continues.
    fn error_trap(&self) {
        tracing::warn!("error trap at {:02X}:{:04X}", self.cp, self.pc);
    }

    fn fetch(&mut self, sys: &mut System) -> u8 {
        let value = sys.read(self.address());
        self.pc = self.pc.wrapping_add(1);
        value
    }

    fn fetch16(&mut self, sys: &mut System) -> u16 {
        let high = self.fetch(sys);
        let low = self.fetch(sys);
        u16::from_be_bytes([high, low])
    }

    pub fn push(&mut self, sys: &mut System, data: u16) {
        if self.r[7] & 1 != 0 {
            self.raise(Exception::AddressError);
        }

        self.r[7] = self.r[7].wrapping_sub(2);
        sys.write16(self.r[7] as u32, data);
    }

    pub fn pop(&mut self, sys: &mut System) -> u16 {
        if self.r[7] & 1 != 0 {
            self.raise(Exception::AddressError);
        }

        let value = sys.read16(self.r[7] as u32);
        self.r[7] = self.r[7].wrapping_add(2);
        value
    }

    /// Page used for indirect accesses through a register.
    #[inline(always)]
    fn page_for(&self, reg: u8) -> u8 {
        match reg {
            6.. => self.tp,
            4.. => self.ep,
            _ => self.dp,
        }
    }

    fn read_control(&self, reg: u8, word: bool) -> u16 {
        let wide = |value: u8| value as u16 | (value as u16) << 8;
        match (word, reg) {
            (true, 0) => self.sr.to_bits(),
            (true, 3) => wide(self.br),
            (true, 4) => wide(self.ep),
            (true, 5) => wide(self.dp),
            (false, 1) => self.sr.to_bits() & 0xFF,
            (false, 3) => self.br as u16,
            (false, 4) => self.ep as u16,
            (false, 5) => self.dp as u16,
            (false, 7) => self.tp as u16,
            _ => {
                self.error_trap();
                0
            }
        }
    }

    fn write_control(&mut self, reg: u8, word: bool, data: u16) {
        let byte = data as u8;
        match (word, reg) {
            (true, 0) => self.set_sr(data),
            (true, 3) | (false, 3) => self.br = byte,
            (true, 4) | (false, 4) => self.ep = byte,
            (true, 5) | (false, 5) => self.dp = byte,
            (false, 1) => self.set_sr((self.sr.to_bits() & !0xFF) | (data & 0xFF)),
            (false, 7) => self.tp = byte,
            _ => self.error_trap(),
        }
    }

    /// Enters an exception handler: saves the context on the stack and jumps through the given
    /// vector. `mask` raises the interrupt mask when given.
    fn start_vector(&mut self, sys: &mut System, vector: u8, mask: Option<u8>) {
        let address = sys.read32(vector as u32 * 4);

        self.push(sys, self.pc);
        self.push(sys, self.cp as u16);
        self.push(sys, self.sr.to_bits());

        self.sr.set_trace(false);
        if let Some(mask) = mask {
            self.set_mask(mask);
        }
        self.sleep = false;

        self.cp = (address >> 16) as u8;
        self.pc = address as u16;
    }

    /// Services the highest priority pending event, if any: TRAPA, then synchronous
    /// exceptions, then NMI, then maskable interrupts above the current mask.
    fn handle_interrupt(&mut self, sys: &mut System) {
        if self.trapa != 0 {
            let index = self.trapa.trailing_zeros() as u8;
            self.trapa &= !(1 << index);
            self.start_vector(sys, vector::TRAPA + index, None);
            return;
        }

        if let Some(exception) = self.exception.take() {
            self.start_vector(sys, exception.vector(), None);
            return;
        }

        // the NMI line is level triggered and never acknowledged
        if sys.irq.is_pending(crate::irq::Source::Nmi) {
            self.start_vector(sys, vector::NMI, Some(7));
            return;
        }

        let priorities = sys.device.priorities();
        if let Some(pending) = sys.irq.select(&priorities, self.mask()) {
            self.start_vector(sys, pending.vector, Some(pending.level));
        }
    }

    /// Runs one core step: the interrupt check, then one instruction unless asleep. Cycle
    /// accounting is left to the caller.
    pub fn step(&mut self, sys: &mut System) {
        if self.ex_ignore {
            self.ex_ignore = false;
        } else {
            self.handle_interrupt(sys);
        }

        if !self.sleep {
            self.execute(sys);
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{
        irq::{InterruptSink, Source},
        pcm::WaveRoms,
        romset::{RomImages, Romset},
    };

    /// Base of test programs in ROM1.
    pub const ORIGIN: u16 = 0x1000;
    /// Initial stack pointer set by [`rig`].
    pub const STACK: u16 = 0xFE00;

    /// Builds a system whose ROM1 holds `program` at [`ORIGIN`] and whose vectors all point to
    /// `handler`, then resets the core into the program.
    pub fn rig_with(program: &[u8], handler: u16) -> (Mcu, System) {
        let mut rom1 = vec![0; 0x8000];
        for vector in 0..64 {
            rom1[vector * 4..][..4].copy_from_slice(&(handler as u32).to_be_bytes());
        }
        rom1[..4].copy_from_slice(&(ORIGIN as u32).to_be_bytes());
        rom1[ORIGIN as usize..][..program.len()].copy_from_slice(program);
        // a handler that loops on itself
        rom1[handler as usize..][..2].copy_from_slice(&[0x20, 0xFE]);

        let images = RomImages {
            rom1,
            rom2: vec![0; 0x80000],
            waves: WaveRoms::default(),
            sub: None,
        };

        let mut sys = System::new(Romset::Mk2.model(), images);
        let mut mcu = Mcu::default();
        mcu.reset(&mut sys);
        mcu.r[7] = STACK;

        (mcu, sys)
    }

    pub fn rig(program: &[u8]) -> (Mcu, System) {
        rig_with(program, 0x2000)
    }

    #[test]
    fn reset_state() {
        let (mcu, _) = rig(&[]);
        assert_eq!(mcu.pc, ORIGIN);
        assert_eq!(mcu.cp, 0);
        assert_eq!(mcu.mask(), 7);
        assert_eq!(mcu.pending_exception(), None);
    }

    #[test]
    fn reset_is_idempotent() {
        let (mut mcu, mut sys) = rig(&[0x58, 0x12, 0x34]);
        mcu.step(&mut sys);
        sys.write(0x8000, 0xAA);

        mcu.reset(&mut sys);
        let first = (mcu.clone(), sys.mem.clone(), sys.device.clone());
        mcu.reset(&mut sys);
        assert_eq!(first, (mcu, sys.mem.clone(), sys.device.clone()));
        assert_eq!(sys.read(0x8000), 0);
    }

    #[test]
    fn exceptions_keep_highest_priority() {
        let mut mcu = Mcu::default();
        mcu.raise(Exception::Trace);
        mcu.raise(Exception::AddressError);
        mcu.raise(Exception::InvalidInstruction);
        assert_eq!(mcu.pending_exception(), Some(Exception::AddressError));
    }

    #[test]
    fn odd_stack_raises_address_error() {
        let (mut mcu, mut sys) = rig(&[]);
        mcu.r[7] = 0xFE01;
        mcu.push(&mut sys, 0x1234);
        assert_eq!(mcu.pending_exception(), Some(Exception::AddressError));
        assert_eq!(mcu.r[7], 0xFDFF);
    }

    #[test]
    fn interrupt_entry_and_return() {
        // nop, nop, then the handler: rte
        let (mut mcu, mut sys) = rig_with(&[0x00, 0x00], 0x3000);
        sys.mem.rom1[0x3000] = 0x0A;

        mcu.set_mask(0);
        sys.device.regs[0x7C] = 0x40; // enable IRQ1
        sys.device.regs[0x70] = 0x05; // IRQ1 at level 5
        sys.irq.request(Source::Irq1, true);

        mcu.step(&mut sys);
        // the handler's rte already ran
        assert_eq!(mcu.sr.to_bits() & 0x0700, 0);
        assert_eq!(mcu.pc, ORIGIN);
        assert_eq!(mcu.r[7], STACK);
        assert_eq!(sys.read16(STACK as u32 - 2), ORIGIN);
        assert_eq!(sys.read16(STACK as u32 - 6), 0);

        // rte suppresses the next interrupt check
        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 1);
    }

    #[test]
    fn masked_interrupt_waits() {
        let (mut mcu, mut sys) = rig(&[0x00, 0x00]);
        sys.device.regs[0x7C] = 0x40;
        sys.device.regs[0x70] = 0x05;
        sys.irq.request(Source::Irq1, true);

        // mask 7 blocks every level
        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 1);

        mcu.set_mask(4);
        // the handler is a branch to itself
        mcu.step(&mut sys);
        assert_eq!(mcu.pc, 0x2000);
        assert_eq!(mcu.mask(), 5);
    }

    #[test]
    fn sleep_wakes_on_interrupt() {
        let (mut mcu, mut sys) = rig(&[0x1A, 0x00]);
        mcu.set_mask(0);
        mcu.step(&mut sys);
        assert!(mcu.sleep);

        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 1);

        sys.irq.request(Source::Nmi, true);
        mcu.step(&mut sys);
        assert!(!mcu.sleep);
        assert_eq!(mcu.mask(), 7);
    }

    #[test]
    fn control_registers() {
        let mut mcu = Mcu::default();
        mcu.write_control(5, true, 0x1234);
        assert_eq!(mcu.dp, 0x34);
        assert_eq!(mcu.read_control(5, true), 0x3434);

        mcu.write_control(0, true, 0xFFFF);
        assert_eq!(mcu.sr.to_bits(), SR_MASK);

        mcu.write_control(1, false, 0x00);
        assert_eq!(mcu.sr.to_bits(), 0x8700);
        assert_eq!(mcu.read_control(7, false), 0);
    }
}
