//! HD44780 compatible character LCD controller.
//!
//! Only the controller state is emulated: rendering the character RAM is left to frontends.

pub const DDRAM_LEN: usize = 80;
pub const CGRAM_LEN: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum RamMode {
    #[default]
    Character,
    Display,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lcd {
    two_lines: bool,
    display_on: bool,
    increment: bool,
    dd_address: u8,
    cg_address: u8,
    mode: RamMode,
    ddram: [u8; DDRAM_LEN],
    cgram: [u8; CGRAM_LEN],
    enabled: bool,
}

impl Default for Lcd {
    fn default() -> Self {
        Self {
            two_lines: false,
            display_on: false,
            increment: false,
            dd_address: 0,
            cg_address: 0,
            mode: RamMode::Character,
            ddram: [0; DDRAM_LEN],
            cgram: [0; CGRAM_LEN],
            enabled: true,
        }
    }
}

impl Lcd {
    /// Display data RAM, 40 characters per line.
    pub fn ddram(&self) -> &[u8; DDRAM_LEN] {
        &self.ddram
    }

    /// Character generator RAM, 8 rows of 5 pixels per custom character.
    pub fn cgram(&self) -> &[u8; CGRAM_LEN] {
        &self.cgram
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn display_on(&self) -> bool {
        self.display_on
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn command(&mut self, data: u8) {
        if data & 0xE0 == 0x20 {
            self.two_lines = data & 0x08 != 0;
        } else if data & 0xF8 == 0x08 {
            self.display_on = data & 0x04 != 0;
        } else if data == 0x01 {
            self.dd_address = 0;
            self.increment = true;
            self.ddram.fill(b' ');
        } else if data == 0x02 {
            self.dd_address = 0;
        } else if data & 0xFC == 0x04 {
            // display shift is not emulated
            self.increment = data & 0x02 != 0;
        } else if data & 0xC0 == 0x40 {
            self.cg_address = data & 0x3F;
            self.mode = RamMode::Character;
        } else if data & 0x80 != 0 {
            self.dd_address = data & 0x7F;
            self.mode = RamMode::Display;
        } else {
            tracing::debug!("ignoring lcd command {data:02X}");
        }
    }

    fn step(&self, address: u8) -> u8 {
        if self.increment {
            address.wrapping_add(1)
        } else {
            address.wrapping_sub(1)
        }
    }

    fn data(&mut self, data: u8) {
        match self.mode {
            RamMode::Character => {
                self.cgram[self.cg_address as usize] = data & 0x1F;
                self.cg_address = self.step(self.cg_address) & 0x3F;
            }
            RamMode::Display => {
                let column = (self.dd_address & 0x3F) as usize;
                let index = if !self.two_lines {
                    Some(self.dd_address as usize).filter(|&i| i < DDRAM_LEN)
                } else if self.dd_address & 0x40 != 0 {
                    (column < 40).then_some(column + 40)
                } else {
                    (column < 40).then_some(column)
                };

                if let Some(index) = index {
                    self.ddram[index] = data;
                }

                self.dd_address = self.step(self.dd_address) & 0x7F;
            }
        }
    }

    /// Writes to the controller: `port` 0 is the command register, 1 is the data register.
    pub fn write(&mut self, port: u8, data: u8) {
        if port & 1 == 0 {
            self.command(data);
        } else {
            self.data(data);
        }
    }
}
