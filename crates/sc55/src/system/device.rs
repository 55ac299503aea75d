//! On-chip peripheral register file of the main core, mapped at `0xFF80..=0xFFFF`.

use super::System;
use crate::irq::{InterruptSink, Priorities, Source};
use strum::FromRepr;

/// Cycles the serial channel stays busy after a status flag is acknowledged.
const SERIAL_DELAY: u64 = 3000;
/// Conversion time of the A/D converter, in cycles.
const ANALOG_CONVERSION: u64 = 200;
/// Level reported by every analog input.
const ANALOG_LEVEL: u16 = 0x3FF;

/// Device registers with behaviour beyond plain storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Reg {
    Scr = 0x5A,
    Tdr = 0x5B,
    Ssr = 0x5C,
    Rdr = 0x5D,
    AddraH = 0x60,
    Adcsr = 0x68,
    Ipra = 0x70,
    Iprb = 0x71,
    Iprc = 0x72,
    Iprd = 0x73,
    Rame = 0x79,
    P1cr = 0x7C,
    P9ddr = 0x7E,
    P9dr = 0x7F,
}

mod ssr {
    pub const TDRE: u8 = 0x80;
    pub const RDRF: u8 = 0x40;
    pub const ORER: u8 = 0x20;
    pub const FER: u8 = 0x10;
}

mod scr {
    pub const TIE: u8 = 0x80;
    pub const RIE: u8 = 0x40;
    pub const TE: u8 = 0x20;
    pub const RE: u8 = 0x10;
}

mod adcsr {
    pub const ADF: u8 = 0x80;
    pub const ADIE: u8 = 0x40;
    pub const ADST: u8 = 0x20;
    pub const SCAN: u8 = 0x10;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub regs: [u8; 0x80],
    /// Whether the A/D end flag was observed as set.
    adf_rd: bool,
    /// Serial status flags observed as set.
    ssr_rd: u8,
    /// Cycle at which the running conversion completes, zero when idle.
    analog_end: u64,
}

impl Default for Device {
    fn default() -> Self {
        let mut device = Self {
            regs: [0; 0x80],
            adf_rd: false,
            ssr_rd: 0,
            analog_end: 0,
        };

        device.reset();
        device
    }
}

impl Device {
    pub fn reset(&mut self) {
        self.regs = [0; 0x80];
        self.regs[Reg::Rame as usize] = 0x80;
        self.adf_rd = false;
        self.ssr_rd = 0;
        self.analog_end = 0;
    }

    #[inline(always)]
    pub fn reg(&self, reg: Reg) -> u8 {
        self.regs[reg as usize]
    }

    #[inline(always)]
    fn reg_mut(&mut self, reg: Reg) -> &mut u8 {
        &mut self.regs[reg as usize]
    }

    /// Whether the on-chip RAM window is mapped.
    #[inline(always)]
    pub fn ram_enabled(&self) -> bool {
        self.reg(Reg::Rame) & 0x80 != 0
    }

    pub fn priorities(&self) -> Priorities {
        Priorities {
            ipra: self.reg(Reg::Ipra),
            iprb: self.reg(Reg::Iprb),
            iprc: self.reg(Reg::Iprc),
            iprd: self.reg(Reg::Iprd),
            p1cr: self.reg(Reg::P1cr),
        }
    }

    fn sample(&mut self, channel: u8) {
        let dest = Reg::AddraH as usize + ((channel as usize) << 1 & 6);
        self.regs[dest] = (ANALOG_LEVEL >> 2) as u8;
        self.regs[dest + 1] = (ANALOG_LEVEL << 6) as u8 & 0xC0;
    }
}

impl System {
    /// Reads a device register given its offset (`0x00..0x80`).
    pub fn device_read(&mut self, offset: u8) -> u8 {
        let offset = offset & 0x7F;
        match offset {
            0x10..0x40 => return self.timers.read_frt(offset),
            0x50..0x55 => return self.timers.read_tmr(offset),
            0x00 => return 0xFF,
            _ => (),
        }

        let value = self.device.regs[offset as usize];
        match Reg::from_repr(offset) {
            Some(Reg::P9dr) => {
                // board configuration straps
                let cfg = if self.model.mk1 || self.model.sc155 {
                    0
                } else {
                    2
                };

                let ddr = self.device.reg(Reg::P9ddr);
                (cfg & !ddr) | (value & ddr)
            }
            Some(Reg::Adcsr) => {
                self.device.adf_rd = value & adcsr::ADF != 0;
                value
            }
            Some(Reg::Rdr) => self.uart.rx_byte,
            Some(Reg::Ssr) => {
                self.device.ssr_rd = value;
                value
            }
            _ => value,
        }
    }

    /// Writes a device register given its offset (`0x00..0x80`).
    pub fn device_write(&mut self, offset: u8, data: u8) {
        let offset = offset & 0x7F;
        match offset {
            0x10..0x40 => return self.timers.write_frt(offset, data, &mut self.irq),
            0x50..0x55 => return self.timers.write_tmr(offset, data, &mut self.irq),
            _ => (),
        }

        match Reg::from_repr(offset) {
            Some(Reg::Adcsr) => {
                let adf_rd = self.device.adf_rd;
                let reg = self.device.reg_mut(Reg::Adcsr);
                *reg = (*reg & adcsr::ADF) | (data & 0x7F);

                if data & adcsr::ADF == 0 && adf_rd {
                    *reg &= !adcsr::ADF;
                    self.irq.request(Source::Analog, false);
                }

                if data & adcsr::ADIE == 0 {
                    self.irq.request(Source::Analog, false);
                }
            }
            Some(Reg::Ssr) => {
                let observed = !data & self.device.ssr_rd;
                let cleared = observed & (ssr::TDRE | ssr::RDRF | ssr::ORER | ssr::FER);
                *self.device.reg_mut(Reg::Ssr) &= !cleared;
                self.device.ssr_rd &= !cleared;

                if cleared & ssr::TDRE != 0 {
                    self.uart.tx_delay = self.cycles + SERIAL_DELAY;
                    self.irq.request(Source::UartTx, false);
                }

                if cleared & ssr::RDRF != 0 {
                    self.uart.rx_delay = self.cycles + SERIAL_DELAY;
                    self.irq.request(Source::UartRx, false);
                }
            }
            _ => self.device.regs[offset as usize] = data,
        }
    }

    /// Moves the next incoming byte into the receive register of the on-chip serial channel.
    /// Used on boards without a sub-core.
    pub fn update_serial_rx(&mut self) {
        let scr = self.device.reg(Reg::Scr);
        if scr & scr::RE == 0
            || !self.uart.has_pending()
            || self.device.reg(Reg::Ssr) & ssr::RDRF != 0
            || self.cycles < self.uart.rx_delay
        {
            return;
        }

        self.uart.receive();
        *self.device.reg_mut(Reg::Ssr) |= ssr::RDRF;
        self.irq.request(Source::UartRx, scr & scr::RIE != 0);
    }

    /// Signals an empty transmit register. Transmitted bytes go nowhere.
    pub fn update_serial_tx(&mut self) {
        let scr = self.device.reg(Reg::Scr);
        if scr & scr::TE == 0
            || self.device.reg(Reg::Ssr) & ssr::TDRE != 0
            || self.cycles < self.uart.tx_delay
        {
            return;
        }

        *self.device.reg_mut(Reg::Ssr) |= ssr::TDRE;
        self.irq.request(Source::UartTx, scr & scr::TIE != 0);
    }

    /// Advances the A/D converter.
    pub fn update_analog(&mut self) {
        let ctrl = self.device.reg(Reg::Adcsr);
        if ctrl & adcsr::ADST == 0 {
            self.device.analog_end = 0;
            return;
        }

        if self.device.analog_end == 0 {
            self.device.analog_end = self.cycles + ANALOG_CONVERSION;
            return;
        }

        if self.device.analog_end >= self.cycles {
            return;
        }

        if ctrl & adcsr::SCAN != 0 {
            let base = ctrl & 4;
            for channel in 0..=(ctrl & 3) {
                self.device.sample(base + channel);
            }

            self.device.analog_end = self.cycles + ANALOG_CONVERSION;
        } else {
            self.device.sample(ctrl & 7);
            *self.device.reg_mut(Reg::Adcsr) &= !adcsr::ADST;
            self.device.analog_end = 0;
        }

        *self.device.reg_mut(Reg::Adcsr) |= adcsr::ADF;
        if ctrl & adcsr::ADIE != 0 {
            self.irq.request(Source::Analog, true);
        }
    }
}
