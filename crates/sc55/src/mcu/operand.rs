//! Effective address resolution of general format instructions.

use super::{Exception, Mcu};
use crate::system::System;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Register(u8),
    Memory { page: u8, address: u16 },
    Immediate(u16),
}

/// A resolved general operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operand {
    pub target: Target,
    pub word: bool,
}

/// A decoded general format instruction: its operand and the operation applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct General {
    pub operand: Operand,
    /// Operation code, the top five bits of the operation byte.
    pub op: u8,
    /// Register field of the operation byte.
    pub reg: u8,
    /// Whether the operation byte was preceded by a zero byte.
    pub extended: bool,
}

impl Operand {
    #[inline(always)]
    pub fn is_memory(&self) -> bool {
        matches!(self.target, Target::Memory { .. })
    }

    #[inline(always)]
    pub fn is_immediate(&self) -> bool {
        matches!(self.target, Target::Immediate(_))
    }

    /// Mask of the operand width.
    #[inline(always)]
    pub fn mask(&self) -> u16 {
        if self.word { 0xFFFF } else { 0xFF }
    }
}

impl Mcu {
    /// Decodes the addressing byte `mode` and the operation byte that follows it.
    pub(super) fn resolve(&mut self, sys: &mut System, mode: u8) -> General {
        let word = mode & 0x08 != 0;
        let reg = mode & 0x07;

        let mut target = Target::Register(reg);
        let mut indirect = None;
        match mode & 0xF0 {
            0xA0 => (),
            0xD0 => indirect = Some((0, 0)),
            0xE0 => indirect = Some((self.fetch(sys) as i8 as u16, 0)),
            0xF0 => indirect = Some((self.fetch16(sys), 0)),
            0xB0 => indirect = Some((0, -1)),
            0xC0 => indirect = Some((0, 1)),
            0x00 if reg == 5 => {
                let low = self.fetch(sys);
                target = Target::Memory {
                    page: 0,
                    address: u16::from_be_bytes([self.br, low]),
                };
            }
            0x00 if reg == 4 => {
                let data = if word {
                    self.fetch16(sys)
                } else {
                    self.fetch(sys) as u16
                };
                target = Target::Immediate(data);
            }
            0x10 if reg == 5 => {
                target = Target::Memory {
                    page: self.dp,
                    address: self.fetch16(sys),
                };
            }
            _ => (),
        }

        if let Some((disp, direction)) = indirect {
            let step = if word || reg == 7 { 2 } else { 1 };
            let r = &mut self.r[reg as usize];
            if direction < 0 {
                *r = r.wrapping_sub(step);
            }

            let address = r.wrapping_add(disp);
            if direction > 0 {
                *r = r.wrapping_add(step);
            }

            target = Target::Memory {
                page: self.page_for(reg),
                address,
            };
        }

        let mut code = self.fetch(sys);
        let extended = code == 0;
        if extended {
            code = self.fetch(sys);
        }

        General {
            operand: Operand { target, word },
            op: code >> 3,
            reg: code & 7,
            extended,
        }
    }

    pub(super) fn read_operand(&mut self, sys: &mut System, operand: Operand) -> u16 {
        match operand.target {
            Target::Register(reg) => self.r[reg as usize] & operand.mask(),
            Target::Memory { page, address } => {
                let full = ((page as u32) << 16) | address as u32;
                if operand.word {
                    if address & 1 != 0 {
                        self.raise(Exception::AddressError);
                    }

                    sys.read16(full)
                } else {
                    sys.read(full) as u16
                }
            }
            Target::Immediate(data) => data,
        }
    }

    pub(super) fn write_operand(&mut self, sys: &mut System, operand: Operand, data: u16) {
        match operand.target {
            Target::Register(reg) => {
                let r = &mut self.r[reg as usize];
                *r = if operand.word {
                    data
                } else {
                    (*r & 0xFF00) | (data & 0xFF)
                };
            }
            Target::Memory { page, address } => {
                let full = ((page as u32) << 16) | address as u32;
                if operand.word {
                    if address & 1 != 0 {
                        self.raise(Exception::AddressError);
                    }

                    sys.write16(full, data);
                } else {
                    sys.write(full, data as u8);
                }
            }
            Target::Immediate(_) => self.raise(Exception::InvalidInstruction),
        }
    }
}
