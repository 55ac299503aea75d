//! Address decoding of the main core.
//!
//! Addresses are 20 bits wide: the top nibble selects a page, the low 16 bits an offset in it.
//! Page 0 holds ROM1 in its lower half and the I/O region in its upper half.

use super::{RAM_LEN, System};

/// Start of the on-chip RAM window.
const RAM_BASE: u16 = 0xFB80;
/// Start of the on-chip device registers.
const DEVICE_BASE: u16 = 0xFF80;

#[inline(always)]
fn page(address: u32) -> u8 {
    ((address >> 16) & 0xF) as u8
}

/// Offset into ROM2 of a paged address.
#[inline(always)]
fn rom2_offset(address: u32) -> usize {
    let mut offset = address & 0x3FFFF;
    if address & 0x80000 != 0 {
        offset |= 0x40000;
    }

    offset as usize
}

impl System {
    #[inline(always)]
    fn ram_enabled(&self) -> bool {
        self.device.ram_enabled()
    }

    /// Base of the PCM and gate array windows.
    #[inline(always)]
    fn io_base(&self) -> u16 {
        if self.model.jv880 { 0xF000 } else { 0xE000 }
    }

    pub fn read(&mut self, address: u32) -> u8 {
        let offset = address as u16;
        match page(address) {
            0 if offset < 0x8000 => self.mem.rom1[offset as usize],
            0 if self.model.mk1 => self.read_io_mk1(offset),
            0 => self.read_io(offset),
            1..=4 | 8 | 9 | 14 | 15 => {
                let index = rom2_offset(address) & self.mem.rom2_mask;
                self.mem.rom2.get(index).copied().unwrap_or(0xFF)
            }
            10 => self.mem.sram[offset as usize & 0x7FFF],
            _ => 0x00,
        }
    }

    fn read_io(&mut self, offset: u16) -> u8 {
        let base = self.io_base();
        match offset {
            o if (base..base + 0x400).contains(&o) => self.pcm.read(o as u8, &mut self.irq),
            0xEC00..0xF000 if self.sub.is_some() => match &mut self.sub {
                Some(sub) => sub.sys_read(offset as u8, &self.ports),
                None => 0xFF,
            },
            DEVICE_BASE.. => self.device_read(offset as u8 & 0x7F),
            RAM_BASE.. if self.ram_enabled() => {
                self.mem.ram[(offset - RAM_BASE) as usize & (RAM_LEN - 1)]
            }
            0x8000..0xE000 => self.mem.sram[offset as usize & 0x7FFF],
            o if o == base | 0x402 => self.gate_array.read_trigger(&mut self.irq),
            _ => {
                tracing::warn!("unknown read from {offset:04X}");
                0xFF
            }
        }
    }

    fn read_io_mk1(&mut self, offset: u16) -> u8 {
        match offset {
            0xE000..0xE040 => self.pcm.read(offset as u8, &mut self.irq),
            DEVICE_BASE.. => self.device_read(offset as u8 & 0x7F),
            RAM_BASE.. if self.ram_enabled() => {
                self.mem.ram[(offset - RAM_BASE) as usize & (RAM_LEN - 1)]
            }
            0x8000..0xE000 => self.mem.sram[offset as usize & 0x7FFF],
            0xF000..0xF100 => {
                // reading latches the low address byte as the I/O select
                self.gate_array.io_sd = offset as u8;
                if !self.model.cm300 {
                    self.lcd.set_enabled(offset & 0x08 != 0);
                }

                0xFF
            }
            0xF106 => self.gate_array.read_trigger(&mut self.irq),
            _ => {
                tracing::warn!("unknown read from {offset:04X}");
                0xFF
            }
        }
    }

    /// Reads a big endian halfword. The address is aligned down.
    pub fn read16(&mut self, address: u32) -> u16 {
        let address = address & !1;
        u16::from_be_bytes([self.read(address), self.read(address + 1)])
    }

    /// Reads a big endian word. The address is aligned down.
    pub fn read32(&mut self, address: u32) -> u32 {
        let address = address & !3;
        u32::from_be_bytes([
            self.read(address),
            self.read(address + 1),
            self.read(address + 2),
            self.read(address + 3),
        ])
    }

    pub fn write(&mut self, address: u32, data: u8) {
        let offset = address as u16;
        match page(address) {
            0 if offset < 0x8000 => {
                tracing::warn!("write to rom at {offset:04X} ({data:02X})");
            }
            0 if self.model.mk1 => self.write_io_mk1(offset, data),
            0 => self.write_io(offset, data),
            10 => self.mem.sram[offset as usize & 0x7FFF] = data,
            _ => tracing::warn!("unknown write to {address:05X} ({data:02X})"),
        }
    }

    fn write_io(&mut self, offset: u16, data: u8) {
        let base = self.io_base();
        match offset {
            o if (base + 0x400..base + 0x800).contains(&o) => match o & 0x3FF {
                0x001 => {
                    self.gate_array.io_sd = data;
                    self.lcd.set_enabled(data & 1 == 0);
                }
                0x002 => self.gate_array.write_enable(data),
                0x004 | 0x005 => self.lcd.write(o as u8 & 1, data),
                _ => tracing::warn!("unknown write to {offset:04X} ({data:02X})"),
            },
            o if (base..base + 0x400).contains(&o) => self.pcm.write(o as u8, data),
            0xEC00..0xF000 if self.sub.is_some() => {
                if let Some(sub) = &mut self.sub {
                    sub.sys_write(offset as u8, data, &mut self.ports);
                }
            }
            DEVICE_BASE.. => self.device_write(offset as u8 & 0x7F, data),
            RAM_BASE.. if self.ram_enabled() => {
                self.mem.ram[(offset - RAM_BASE) as usize & (RAM_LEN - 1)] = data;
            }
            0x8000..0xE000 => self.mem.sram[offset as usize & 0x7FFF] = data,
            _ => tracing::warn!("unknown write to {offset:04X} ({data:02X})"),
        }
    }

    fn write_io_mk1(&mut self, offset: u16, data: u8) {
        match offset {
            0xE000..0xE040 => self.pcm.write(offset as u8, data),
            0xF104 | 0xF105 => self.lcd.write(offset as u8 & 1, data),
            0xF106 => self.gate_array.write_enable(data),
            0xF107 => self.gate_array.io_sd = data,
            DEVICE_BASE.. => self.device_write(offset as u8 & 0x7F, data),
            RAM_BASE.. if self.ram_enabled() => {
                self.mem.ram[(offset - RAM_BASE) as usize & (RAM_LEN - 1)] = data;
            }
            0x8000..0xE000 => self.mem.sram[offset as usize & 0x7FFF] = data,
            _ => tracing::warn!("unknown write to {offset:04X} ({data:02X})"),
        }
    }

    /// Writes a big endian halfword. The address is aligned down.
    pub fn write16(&mut self, address: u32, data: u16) {
        let address = address & !1;
        let [high, low] = data.to_be_bytes();
        self.write(address, high);
        self.write(address + 1, low);
    }

    /// Sets the level of a gate array input line.
    pub fn set_gate_line(&mut self, line: u8, value: bool) {
        self.gate_array.set_line(line, value, &mut self.irq);
    }
}

#[cfg(test)]
pub(crate) mod test {
    use crate::{
        pcm::WaveRoms,
        romset::{Model, RomImages, Romset},
        system::System,
    };

    pub(crate) fn images() -> RomImages {
        let mut rom1 = vec![0; 0x8000];
        rom1[0x1234] = 0x5A;

        let mut rom2 = vec![0; 0x80000];
        rom2[0x10000] = 0x11;
        rom2[0x40001] = 0x22;

        RomImages {
            rom1,
            rom2,
            waves: WaveRoms::default(),
            sub: Some(vec![0; 0x1000]),
        }
    }

    fn system(model: Model) -> System {
        System::new(model, images())
    }

    #[test]
    fn rom_pages() {
        let mut sys = system(Romset::Mk2.model());
        assert_eq!(sys.read(0x01234), 0x5A);
        assert_eq!(sys.read(0x10000), 0x11);
        // bit 19 of the address selects the upper half of rom2
        assert_eq!(sys.read(0x80001), 0x22);
        assert_eq!(sys.read16(0x10001), 0x1100);
        // unmapped page
        assert_eq!(sys.read(0x50000), 0x00);
    }

    #[test]
    fn ram_follows_rame() {
        let mut sys = system(Romset::Mk2.model());
        sys.write(0xFB80, 0x42);
        assert_eq!(sys.read(0xFB80), 0x42);

        // disable on-chip RAM: the window falls through
        sys.write(0xFFF9, 0x00);
        assert_eq!(sys.read(0xFB80), 0xFF);

        sys.write(0xFFF9, 0x80);
        assert_eq!(sys.read(0xFB80), 0x42);
    }

    #[test]
    fn sram_and_page_10_alias() {
        let mut sys = system(Romset::Mk2.model());
        sys.write16(0x8001, 0xBEEF);
        assert_eq!(sys.read(0xA0000), 0xBE);
        assert_eq!(sys.read(0xA0001), 0xEF);
        assert_eq!(sys.read32(0x8002), 0xBEEF_0000);
    }

    #[test]
    fn lcd_window() {
        let mut sys = system(Romset::Mk2.model());
        // function set, display on, increment, ddram address 0
        sys.write(0xE404, 0x38);
        sys.write(0xE404, 0x0C);
        sys.write(0xE404, 0x06);
        sys.write(0xE404, 0x80);
        sys.write(0xE405, b'S');
        sys.write(0xE405, b'C');
        assert_eq!(&sys.lcd.ddram()[..2], b"SC");

        sys.write(0xE401, 0x01);
        assert!(!sys.lcd.enabled());
        sys.write(0xE401, 0x00);
        assert!(sys.lcd.enabled());
    }

    #[test]
    fn sub_window_depends_on_model() {
        let mut sys = system(Romset::Mk2.model());
        sys.write(0xEC10, 0x99);
        assert_eq!(sys.read(0xEC10), 0x99);

        let mut images = images();
        images.sub = None;
        let mut sys = System::new(Romset::Scb55.model(), images);
        sys.write(0xEC10, 0x99);
        assert_eq!(sys.read(0xEC10), 0xFF);
    }

    #[test]
    fn gate_array_trigger() {
        let mut sys = system(Romset::Mk2.model());
        sys.write(0xE402, 1 << 3);
        sys.set_gate_line(4, true);
        assert!(sys.irq.is_pending(crate::irq::Source::Irq1));

        assert_eq!(sys.read(0xE402), 4);
        assert!(!sys.irq.is_pending(crate::irq::Source::Irq1));
        assert_eq!(sys.read(0xE402), 0);
    }
}
