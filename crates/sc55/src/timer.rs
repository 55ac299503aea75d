//! The three free running timers (FRT) and the 8 bit compare timer (TMR).
//!
//! Status flags follow a read-then-clear protocol: writing 0 to a flag only clears it if the
//! flag was observed as set by a previous status read.

use crate::irq::{InterruptSink, Source};

mod frt_reg {
    pub const TCR: u8 = 0x0;
    pub const TCSR: u8 = 0x1;
    pub const FRCH: u8 = 0x2;
    pub const FRCL: u8 = 0x3;
    pub const OCRAH: u8 = 0x4;
    pub const OCRAL: u8 = 0x5;
    pub const OCRBH: u8 = 0x6;
    pub const OCRBL: u8 = 0x7;
    pub const ICRH: u8 = 0x8;
    pub const ICRL: u8 = 0x9;
}

mod tmr_reg {
    pub const TCR: u8 = 0x50;
    pub const TCSR: u8 = 0x51;
    pub const TCORA: u8 = 0x52;
    pub const TCORB: u8 = 0x53;
    pub const TCNT: u8 = 0x54;
}

/// A 16 bit free running timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frt {
    pub tcr: u8,
    pub tcsr: u8,
    pub frc: u16,
    pub ocra: u16,
    pub ocrb: u16,
    pub icr: u16,
    status_rd: u8,
}

/// The 8 bit compare timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tmr {
    pub tcr: u8,
    pub tcsr: u8,
    pub tcora: u8,
    pub tcorb: u8,
    pub tcnt: u8,
    status_rd: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timers {
    cycles: u64,
    /// Latch shared by every 16 bit register of the FRTs.
    tempreg: u8,
    pub frt: [Frt; 3],
    pub tmr: Tmr,
}

/// Clears each flag in `flags` that was written as 0 after having been read as 1, returning
/// which ones were cleared.
#[inline(always)]
fn shadow_clear(tcsr: &mut u8, status_rd: &mut u8, data: u8, flags: u8) -> u8 {
    let cleared = !data & *status_rd & flags;
    *tcsr &= !cleared;
    *status_rd &= !cleared;
    cleared
}

impl Timers {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Writes to a FRT register given its device offset (`0x10..0x40`).
    pub fn write_frt(&mut self, offset: u8, data: u8, irq: &mut impl InterruptSink) {
        let Some(index) = (offset >> 4).checked_sub(1).filter(|&t| t < 3) else {
            return;
        };

        let index = index as usize;
        let tempreg = self.tempreg;
        let timer = &mut self.frt[index];
        match offset & 0xF {
            frt_reg::TCR => timer.tcr = data,
            frt_reg::TCSR => {
                timer.tcsr = (timer.tcsr & !0xF) | (data & 0xF);

                let cleared = shadow_clear(&mut timer.tcsr, &mut timer.status_rd, data, 0x70);
                if cleared & 0x10 != 0 {
                    irq.request(Source::FOVI[index], false);
                }
                if cleared & 0x20 != 0 {
                    irq.request(Source::OCIA[index], false);
                }
                if cleared & 0x40 != 0 {
                    irq.request(Source::OCIB[index], false);
                }
            }
            frt_reg::FRCH | frt_reg::OCRAH | frt_reg::OCRBH | frt_reg::ICRH => self.tempreg = data,
            frt_reg::FRCL => timer.frc = u16::from_be_bytes([tempreg, data]),
            frt_reg::OCRAL => timer.ocra = u16::from_be_bytes([tempreg, data]),
            frt_reg::OCRBL => timer.ocrb = u16::from_be_bytes([tempreg, data]),
            frt_reg::ICRL => timer.icr = u16::from_be_bytes([tempreg, data]),
            _ => (),
        }
    }

    /// Reads from a FRT register given its device offset (`0x10..0x40`).
    pub fn read_frt(&mut self, offset: u8) -> u8 {
        let Some(index) = (offset >> 4).checked_sub(1).filter(|&t| t < 3) else {
            return 0xFF;
        };

        let timer = &mut self.frt[index as usize];
        let tempreg = &mut self.tempreg;
        let mut latch = |value: u16| {
            *tempreg = value as u8;
            (value >> 8) as u8
        };

        match offset & 0xF {
            frt_reg::TCR => timer.tcr,
            frt_reg::TCSR => {
                timer.status_rd |= timer.tcsr & 0xF0;
                timer.tcsr
            }
            frt_reg::FRCH => latch(timer.frc),
            frt_reg::OCRAH => latch(timer.ocra),
            frt_reg::OCRBH => latch(timer.ocrb),
            frt_reg::ICRH => latch(timer.icr),
            frt_reg::FRCL | frt_reg::OCRAL | frt_reg::OCRBL | frt_reg::ICRL => *tempreg,
            _ => 0xFF,
        }
    }

    /// Writes to a TMR register given its device offset (`0x50..0x55`).
    pub fn write_tmr(&mut self, offset: u8, data: u8, irq: &mut impl InterruptSink) {
        let timer = &mut self.tmr;
        match offset {
            tmr_reg::TCR => timer.tcr = data,
            tmr_reg::TCSR => {
                timer.tcsr = (timer.tcsr & !0xF) | (data & 0xF);

                let cleared = shadow_clear(&mut timer.tcsr, &mut timer.status_rd, data, 0xE0);
                if cleared & 0x20 != 0 {
                    irq.request(Source::TimerOvi, false);
                }
                if cleared & 0x40 != 0 {
                    irq.request(Source::TimerCmia, false);
                }
                if cleared & 0x80 != 0 {
                    irq.request(Source::TimerCmib, false);
                }
            }
            tmr_reg::TCORA => timer.tcora = data,
            tmr_reg::TCORB => timer.tcorb = data,
            tmr_reg::TCNT => timer.tcnt = data,
            _ => (),
        }
    }

    /// Reads from a TMR register given its device offset (`0x50..0x55`).
    pub fn read_tmr(&mut self, offset: u8) -> u8 {
        let timer = &mut self.tmr;
        match offset {
            tmr_reg::TCR => timer.tcr,
            tmr_reg::TCSR => {
                timer.status_rd |= timer.tcsr & 0xE0;
                timer.tcsr
            }
            tmr_reg::TCORA => timer.tcora,
            tmr_reg::TCORB => timer.tcorb,
            tmr_reg::TCNT => timer.tcnt,
            _ => 0xFF,
        }
    }

    fn tick_frt(&mut self, index: usize, mk1: bool, irq: &mut impl InterruptSink) {
        let timer = &mut self.frt[index];
        let divider_mask = match timer.tcr & 3 {
            0 => 3,
            1 => 7,
            2 => 31,
            _ if mk1 => 3,
            _ => 1,
        };

        if self.cycles & divider_mask != 0 {
            return;
        }

        let value = timer.frc as u32;
        let match_a = value == timer.ocra as u32;
        let match_b = value == timer.ocrb as u32;
        let value = if timer.tcsr & 1 != 0 && match_a {
            0
        } else {
            value + 1
        };

        timer.frc = value as u16;
        if value >> 16 != 0 {
            timer.tcsr |= 0x10;
        }
        if match_a {
            timer.tcsr |= 0x20;
        }
        if match_b {
            timer.tcsr |= 0x40;
        }

        let raised = timer.tcr & timer.tcsr;
        if raised & 0x10 != 0 {
            irq.request(Source::FOVI[index], true);
        }
        if raised & 0x20 != 0 {
            irq.request(Source::OCIA[index], true);
        }
        if raised & 0x40 != 0 {
            irq.request(Source::OCIB[index], true);
        }
    }

    fn tick_tmr(&mut self, mk1: bool, irq: &mut impl InterruptSink) {
        let timer = &mut self.tmr;
        let divider_mask = match timer.tcr & 7 {
            0 | 4 => return,
            1 => 7,
            2 => 63,
            3 => 1023,
            _ if mk1 => 3,
            _ => 1,
        };

        if self.cycles & divider_mask != 0 {
            return;
        }

        let value = timer.tcnt as u32;
        let match_a = value == timer.tcora as u32;
        let match_b = value == timer.tcorb as u32;
        let value = match timer.tcr & 0x18 {
            0x08 if match_a => 0,
            0x10 if match_b => 0,
            _ => value + 1,
        };

        timer.tcnt = value as u8;
        if value >> 8 != 0 {
            timer.tcsr |= 0x20;
        }
        if match_a {
            timer.tcsr |= 0x40;
        }
        if match_b {
            timer.tcsr |= 0x80;
        }

        let raised = timer.tcr & timer.tcsr;
        if raised & 0x20 != 0 {
            irq.request(Source::TimerOvi, true);
        }
        if raised & 0x40 != 0 {
            irq.request(Source::TimerCmia, true);
        }
        if raised & 0x80 != 0 {
            irq.request(Source::TimerCmib, true);
        }
    }

    /// Advances the timers until they catch up with the main core cycle counter. Timers run at
    /// half the rate of the main core.
    pub fn clock(&mut self, cycles: u64, mk1: bool, irq: &mut impl InterruptSink) {
        while self.cycles * 2 < cycles {
            for index in 0..3 {
                self.tick_frt(index, mk1, irq);
            }

            self.tick_tmr(mk1, irq);
            self.cycles += 1;
        }
    }
}
