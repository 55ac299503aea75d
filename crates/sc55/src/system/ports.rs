//! GPIO ports shared between the cores, used to scan the front panel buttons.

use strum::{EnumCount, FromRepr, VariantArray};

/// A front panel button. The discriminant is the bit index in the button mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, EnumCount, VariantArray)]
#[repr(u8)]
pub enum Button {
    Power = 0,
    InstL = 3,
    InstR = 4,
    InstMute = 5,
    InstAll = 6,
    MidiChL = 8,
    MidiChR = 9,
    ChorusL = 10,
    ChorusR = 11,
    PanL = 12,
    PanR = 13,
    PartR = 14,
    KeyShiftL = 16,
    KeyShiftR = 17,
    ReverbL = 18,
    ReverbR = 19,
    LevelL = 20,
    LevelR = 21,
    PartL = 22,
}

impl Button {
    #[inline(always)]
    pub fn mask(self) -> u32 {
        1 << self as u8
    }
}

/// Port latches and the current button state.
#[derive(Debug, Clone, Default)]
pub struct Ports {
    p0: u8,
    p1: u8,
    buttons: u32,
}

impl Ports {
    pub fn read_p0(&self) -> u8 {
        0xFF
    }

    /// Reads port 1: each low bit of the port 0 latch that is clear selects a group of seven
    /// buttons, pressed buttons read as zero.
    pub fn read_p1(&self) -> u8 {
        let mut data = 0xFF;
        for group in 0..3 {
            if self.p0 & (1 << group) == 0 {
                let pressed = (self.buttons >> (7 * group)) as u8 & 0x7F;
                data &= 0x80 | (pressed ^ 0x7F);
            }
        }

        data
    }

    pub fn write_p0(&mut self, data: u8) {
        self.p0 = data;
    }

    pub fn write_p1(&mut self, data: u8) {
        self.p1 = data;
    }

    pub fn p1(&self) -> u8 {
        self.p1
    }

    pub fn buttons(&self) -> u32 {
        self.buttons
    }

    pub fn set_buttons(&mut self, buttons: u32) {
        self.buttons = buttons;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scan_groups() {
        let mut ports = Ports::default();
        ports.set_buttons(Button::InstL.mask() | Button::MidiChR.mask() | Button::ReverbR.mask());

        // nothing selected
        ports.write_p0(0xFF);
        assert_eq!(ports.read_p1(), 0xFF);

        ports.write_p0(!1);
        assert_eq!(ports.read_p1(), !(1 << 3));

        ports.write_p0(!2);
        assert_eq!(ports.read_p1(), !(1 << 2));

        ports.write_p0(!4);
        assert_eq!(ports.read_p1(), !(1 << 5));

        // groups combine
        ports.write_p0(!3);
        assert_eq!(ports.read_p1(), !((1 << 3) | (1 << 2)));
    }
}
