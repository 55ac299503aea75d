use super::{
    Exception, Mcu, Status,
    operand::{General, Operand, Target},
};
use crate::system::System;
use strum::FromRepr;
use util::{sext8, sign_extend};

/// Operations of the general format, selected by the top five bits of the operation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
enum Op {
    MovImmediate = 0x00,
    Addq = 0x01,
    Clr = 0x02,
    Shift = 0x03,
    Add = 0x04,
    Adds = 0x05,
    Sub = 0x06,
    Subs = 0x07,
    Or = 0x08,
    OrcBset = 0x09,
    And = 0x0A,
    AndcBclr = 0x0B,
    Xor = 0x0C,
    Cmp = 0x0E,
    Btst = 0x0F,
    MovLoad = 0x10,
    Ldc = 0x11,
    MovStore = 0x12,
    Stc = 0x13,
    Addx = 0x14,
    Mulxu = 0x15,
    Subx = 0x16,
    Divxu = 0x17,
    BsetLow = 0x18,
    BsetHigh = 0x19,
    BclrLow = 0x1A,
    BclrHigh = 0x1B,
    BtstLow = 0x1E,
    BtstHigh = 0x1F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Arith {
    Add,
    Sub,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitOp {
    Set,
    Clear,
    Test,
}

impl Mcu {
    /// Sets N and Z from `value` at the given width and clears V. C is left untouched.
    fn set_status(&mut self, value: u16, word: bool) {
        let (value, sign) = if word {
            (value, 0x8000)
        } else {
            (value & 0xFF, 0x80)
        };

        self.sr.set_negative(value & sign != 0);
        self.sr.set_zero(value == 0);
        self.sr.set_overflow(false);
    }

    /// Adds or subtracts with carry at the given width, setting every flag.
    fn arith(&mut self, op: Arith, t1: u16, t2: u16, carry: bool, word: bool) -> u16 {
        let bits = if word { 16 } else { 8 };
        let mask = (1u32 << bits) - 1;
        let (u1, u2) = (t1 as u32 & mask, t2 as u32 & mask);
        let (s1, s2) = (sign_extend(t1 as u32, bits), sign_extend(t2 as u32, bits));
        let c = carry as u32;

        let (raw, signed) = match op {
            Arith::Add => (u1 + u2 + c, s1 + s2 + c as i32),
            Arith::Sub => (
                u1.wrapping_sub(u2).wrapping_sub(c),
                s1 - s2 - c as i32,
            ),
        };

        let result = raw & mask;
        let limit = 1i32 << (bits - 1);

        self.sr.set_negative(result >> (bits - 1) != 0);
        self.sr.set_zero(result == 0);
        self.sr.set_carry((raw >> bits) & 1 != 0);
        self.sr.set_overflow(!(-limit..limit).contains(&signed));

        result as u16
    }

    #[inline(always)]
    fn add(&mut self, t1: u16, t2: u16, carry: bool, word: bool) -> u16 {
        self.arith(Arith::Add, t1, t2, carry, word)
    }

    #[inline(always)]
    fn sub(&mut self, t1: u16, t2: u16, carry: bool, word: bool) -> u16 {
        self.arith(Arith::Sub, t1, t2, carry, word)
    }

    /// Writes `value` to a general register at the operand width: byte writes only replace the
    /// low byte.
    #[inline(always)]
    fn set_reg(&mut self, reg: u8, value: u16, word: bool) {
        let r = &mut self.r[reg as usize];
        *r = if word {
            value
        } else {
            (*r & 0xFF00) | (value & 0xFF)
        };
    }

    #[inline(always)]
    fn condition(&self, cond: u8) -> bool {
        let n = self.sr.negative();
        let z = self.sr.zero();
        let v = self.sr.overflow();
        let c = self.sr.carry();

        match cond & 0xF {
            0x0 => true,
            0x1 => false,
            0x2 => !(c | z),
            0x3 => c | z,
            0x4 => !c,
            0x5 => c,
            0x6 => !z,
            0x7 => z,
            0x8 => !v,
            0x9 => v,
            0xA => !n,
            0xB => n,
            0xC => !(n ^ v),
            0xD => n ^ v,
            0xE => !(z | (n ^ v)),
            _ => z | (n ^ v),
        }
    }

    /// Fetches and executes a single instruction.
    pub(super) fn execute(&mut self, sys: &mut System) {
        let opcode = self.fetch(sys);
        match opcode {
            0x00 => (),
            0x01 | 0x06 | 0x07 | 0x10 | 0x11 => self.jmp(sys, opcode),
            0x02 => self.ldm(sys),
            0x03 => self.pjsr(sys),
            0x04 | 0x05 | 0x0C | 0x0D | 0x15 | 0x1D | 0xA0..=0xFF => {
                let general = self.resolve(sys, opcode);
                self.general(sys, general);
            }
            0x08 => self.trapa(sys),
            0x0A => self.rte(sys),
            0x0E | 0x1E => self.bsr(sys, opcode),
            0x12 => self.stm(sys),
            0x13 => self.pjmp(sys),
            0x18 => self.jsr(sys),
            0x19 => self.pc = self.pop(sys),
            0x1A => self.sleep = true,
            0x20..=0x3F => self.bcc(sys, opcode),
            0x40..=0x4F => self.cmp_short(sys, opcode),
            0x50..=0x57 => self.mov_e(sys, opcode),
            0x58..=0x5F => self.mov_i(sys, opcode),
            0x60..=0x6F => self.mov_l(sys, opcode),
            0x70..=0x7F => self.mov_s(sys, opcode),
            _ => self.error_trap(),
        }

        if self.sr.trace() {
            self.raise(Exception::Trace);
        }
    }

    fn ldm(&mut self, sys: &mut System) {
        let list = self.fetch(sys);
        for i in 0..8 {
            if list & (1 << i) != 0 {
                let value = self.pop(sys);
                if i != 7 {
                    self.r[i] = value;
                }
            }
        }
    }

    fn stm(&mut self, sys: &mut System) {
        let list = self.fetch(sys);
        for i in (0..8).rev() {
            if list & (1 << i) != 0 {
                let mut value = self.r[i];
                if i == 7 {
                    value = value.wrapping_sub(2);
                }

                self.push(sys, value);
            }
        }
    }

    fn trapa(&mut self, sys: &mut System) {
        let code = self.fetch(sys);
        if code & 0xF0 == 0x10 {
            self.trapa |= 1 << (code & 0xF);
        } else {
            self.error_trap();
        }
    }

    fn rte(&mut self, sys: &mut System) {
        self.sr = Status::from_bits(self.pop(sys));
        self.cp = self.pop(sys) as u8;
        self.pc = self.pop(sys);
        self.ex_ignore = true;
    }

    fn pjsr(&mut self, sys: &mut System) {
        let page = self.fetch(sys);
        let address = self.fetch16(sys);
        self.push(sys, self.pc);
        self.push(sys, self.cp as u16);
        self.cp = page;
        self.pc = address;
    }

    fn pjmp(&mut self, sys: &mut System) {
        let page = self.fetch(sys);
        let address = self.fetch16(sys);
        self.cp = page;
        self.pc = address;
    }

    fn jsr(&mut self, sys: &mut System) {
        let address = self.fetch16(sys);
        self.push(sys, self.pc);
        self.pc = address;
    }

    fn bsr(&mut self, sys: &mut System, opcode: u8) {
        let disp = if opcode == 0x0E {
            sext8(self.fetch(sys))
        } else {
            self.fetch16(sys)
        };

        self.push(sys, self.pc);
        self.pc = self.pc.wrapping_add(disp);
    }

    fn bcc(&mut self, sys: &mut System, opcode: u8) {
        let disp = if opcode & 0x10 != 0 {
            self.fetch16(sys)
        } else {
            sext8(self.fetch(sys))
        };

        if self.condition(opcode) {
            self.pc = self.pc.wrapping_add(disp);
        }
    }

    /// Decrements a register and branches while it has not wrapped below zero.
    fn scb(&mut self, sys: &mut System, run: impl FnOnce(&Self) -> bool) {
        let code = self.fetch(sys);
        if code >> 3 != 0x17 {
            self.error_trap();
            return;
        }

        let reg = (code & 7) as usize;
        let disp = sext8(self.fetch(sys));
        if !run(self) {
            return;
        }

        self.r[reg] = self.r[reg].wrapping_sub(1);
        if self.r[reg] != 0xFFFF {
            self.pc = self.pc.wrapping_add(disp);
        }
    }

    fn jmp(&mut self, sys: &mut System, opcode: u8) {
        match opcode {
            0x01 => self.scb(sys, |_| true),
            0x06 => self.scb(sys, |mcu| mcu.sr.zero()),
            0x07 => self.scb(sys, |mcu| !mcu.sr.zero()),
            0x10 => self.pc = self.fetch16(sys),
            _ => {
                let code = self.fetch(sys);
                let reg = (code & 7) as usize;
                if code == 0x19 {
                    self.cp = self.pop(sys) as u8;
                    self.pc = self.pop(sys);
                    return;
                }

                match code >> 3 {
                    0x1A => self.pc = self.r[reg],
                    0x1B => {
                        self.push(sys, self.pc);
                        self.pc = self.r[reg];
                    }
                    _ => self.error_trap(),
                }
            }
        }
    }

    fn cmp_short(&mut self, sys: &mut System, opcode: u8) {
        let reg = (opcode & 7) as usize;
        let word = opcode & 0x08 != 0;
        let data = if word {
            self.fetch16(sys)
        } else {
            self.fetch(sys) as u16
        };

        self.sub(self.r[reg], data, false, word);
    }

    fn mov_e(&mut self, sys: &mut System, opcode: u8) {
        let data = self.fetch(sys) as u16;
        self.set_reg(opcode & 7, data, false);
        self.set_status(data, false);
    }

    fn mov_i(&mut self, sys: &mut System, opcode: u8) {
        let data = self.fetch16(sys);
        self.r[(opcode & 7) as usize] = data;
        self.set_status(data, true);
    }

    /// Address of a short absolute access, always on page 0.
    fn short_address(&mut self, sys: &mut System, word: bool) -> u32 {
        let address = u16::from_be_bytes([self.br, self.fetch(sys)]);
        if word && address & 1 != 0 {
            self.raise(Exception::AddressError);
        }

        address as u32
    }

    fn mov_l(&mut self, sys: &mut System, opcode: u8) {
        let word = opcode & 0x08 != 0;
        let address = self.short_address(sys, word);
        let data = if word {
            sys.read16(address)
        } else {
            sys.read(address) as u16
        };

        self.set_reg(opcode & 7, data, word);
        self.set_status(data, word);
    }

    fn mov_s(&mut self, sys: &mut System, opcode: u8) {
        let word = opcode & 0x08 != 0;
        let address = self.short_address(sys, word);
        let data = self.r[(opcode & 7) as usize];
        if word {
            sys.write16(address, data);
        } else {
            sys.write(address, data as u8);
        }

        self.set_status(data, word);
    }

    fn general(&mut self, sys: &mut System, general: General) {
        let General {
            operand,
            op,
            reg,
            extended,
        } = general;

        let Some(op) = Op::from_repr(op) else {
            self.error_trap();
            return;
        };

        let word = operand.word;
        let r = reg as usize;
        match op {
            Op::MovImmediate => self.mov_immediate(sys, operand, reg),
            Op::Addq => {
                let t2 = match reg {
                    0 => 1,
                    1 => 2,
                    4 => 0xFFFF,
                    5 => 0xFFFE,
                    _ => {
                        self.error_trap();
                        0
                    }
                };

                let t1 = self.read_operand(sys, operand);
                let result = self.add(t1, t2, false, word);
                self.write_operand(sys, operand, result);
            }
            Op::Clr => self.clr_group(sys, operand, reg),
            Op::Shift => self.shift(sys, operand, reg),
            Op::Add | Op::Sub | Op::Addx | Op::Subx => {
                let t2 = self.read_operand(sys, operand);
                let zero = self.sr.zero();
                let carry = matches!(op, Op::Addx | Op::Subx) && self.sr.carry();
                let result = if matches!(op, Op::Add | Op::Addx) {
                    self.add(self.r[r], t2, carry, word)
                } else {
                    self.sub(self.r[r], t2, carry, word)
                };

                // extended additions can only clear Z
                if op == Op::Addx && !zero {
                    self.sr.set_zero(false);
                }

                self.set_reg(reg, result, word);
            }
            Op::Adds => {
                let data = self.read_operand(sys, operand);
                let data = if word { data } else { sext8(data as u8) };
                self.r[r] = self.r[r].wrapping_add(data);
            }
            Op::Subs => {
                let data = self.read_operand(sys, operand);
                let data = if word { data } else { sext8(data as u8) };
                self.r[r] = self.r[r].wrapping_sub(data);
            }
            Op::Or => {
                let data = self.read_operand(sys, operand);
                self.r[r] |= data;
                self.set_status(self.r[r], word);
            }
            Op::And => {
                let data = self.r[r] & self.read_operand(sys, operand);
                self.set_reg(reg, data, word);
                self.set_status(self.r[r], word);
            }
            Op::Xor => {
                let data = self.read_operand(sys, operand);
                self.r[r] ^= data;
                self.set_status(self.r[r], word);
            }
            Op::OrcBset | Op::AndcBclr if operand.is_immediate() => {
                let data = self.read_operand(sys, operand);
                let current = self.read_control(reg, word);
                let value = if op == Op::OrcBset {
                    current | data
                } else {
                    current & data
                };

                self.write_control(reg, word, value);
                if reg >= 2 {
                    self.set_status(value, word);
                }

                self.ex_ignore = true;
            }
            Op::OrcBset => self.bit_op(sys, operand, self.r[r] & 0xF, BitOp::Set),
            Op::AndcBclr => self.bit_op(sys, operand, self.r[r] & 0xF, BitOp::Clear),
            Op::Btst => self.bit_op(sys, operand, self.r[r] & 0xF, BitOp::Test),
            Op::BsetLow | Op::BsetHigh => {
                self.bit_op(sys, operand, immediate_bit(op, reg), BitOp::Set)
            }
            Op::BclrLow | Op::BclrHigh => {
                self.bit_op(sys, operand, immediate_bit(op, reg), BitOp::Clear)
            }
            Op::BtstLow | Op::BtstHigh => {
                self.bit_op(sys, operand, immediate_bit(op, reg), BitOp::Test)
            }
            Op::Cmp => {
                let t2 = self.read_operand(sys, operand);
                self.sub(self.r[r], t2, false, word);
            }
            Op::MovLoad | Op::MovStore if extended => self.error_trap(),
            Op::MovStore => match operand.target {
                Target::Register(other) if word => self.r.swap(r, other as usize),
                Target::Register(_) => self.error_trap(),
                _ => {
                    let data = self.r[r];
                    self.write_operand(sys, operand, data);
                    self.set_status(data, word);
                }
            },
            Op::MovLoad => {
                let data = self.read_operand(sys, operand);
                self.set_reg(reg, data, word);
                self.set_status(data, word);
            }
            Op::Ldc => {
                let data = self.read_operand(sys, operand);
                self.write_control(reg, word, data);
                self.ex_ignore = true;
            }
            Op::Stc => {
                let data = self.read_control(reg, word);
                self.write_operand(sys, operand, data);
            }
            Op::Mulxu => self.mulxu(sys, operand, reg),
            Op::Divxu => self.divxu(sys, operand, reg),
        }
    }

    fn mov_immediate(&mut self, sys: &mut System, operand: Operand, reg: u8) {
        if !operand.is_memory() {
            self.error_trap();
            return;
        }

        let word = operand.word;
        match reg {
            6 | 7 => {
                let data = if reg == 6 {
                    sext8(self.fetch(sys))
                } else {
                    self.fetch16(sys)
                };

                self.write_operand(sys, operand, data);
                self.set_status(data, word);
            }
            4 => {
                let t1 = self.read_operand(sys, operand);
                let t2 = self.fetch(sys) as u16;
                self.sub(t1, t2, false, word);
            }
            5 => {
                let t1 = self.read_operand(sys, operand);
                let t2 = self.fetch16(sys);
                self.sub(t1, t2, false, word);
            }
            _ => self.error_trap(),
        }
    }

    fn clr_group(&mut self, sys: &mut System, operand: Operand, reg: u8) {
        let word = operand.word;
        let direct_byte = match operand.target {
            Target::Register(index) if !word => Some(index as usize),
            _ => None,
        };

        if operand.is_immediate() {
            self.error_trap();
            return;
        }

        match (reg, direct_byte) {
            (3, _) => {
                self.write_operand(sys, operand, 0);
                self.sr.set_negative(false);
                self.sr.set_zero(true);
                self.sr.set_overflow(false);
                self.sr.set_carry(false);
            }
            (6, _) => {
                let data = self.read_operand(sys, operand);
                self.set_status(data, word);
                self.sr.set_carry(false);
            }
            (5, _) => {
                let data = !self.read_operand(sys, operand);
                self.write_operand(sys, operand, data);
                self.set_status(data, word);
            }
            (4, _) => {
                let data = self.read_operand(sys, operand);
                let result = self.sub(0, data, false, word);
                self.write_operand(sys, operand, result);
            }
            // extu
            (2, Some(index)) => {
                let data = self.r[index] & 0xFF;
                self.r[index] = data;
                self.sr.set_negative(false);
                self.sr.set_zero(data == 0);
                self.sr.set_overflow(false);
                self.sr.set_carry(false);
            }
            // swap
            (0, Some(index)) => {
                let data = self.r[index].swap_bytes();
                self.r[index] = data;
                self.set_status(data, false);
            }
            // exts, flags come from the value before extension
            (1, Some(index)) => {
                let data = self.r[index];
                self.r[index] = sext8(data as u8);
                self.set_status(data, true);
            }
            _ => self.error_trap(),
        }
    }

    fn shift(&mut self, sys: &mut System, operand: Operand, reg: u8) {
        if operand.is_immediate() || !matches!(reg, 0 | 2 | 3 | 4 | 6) {
            self.error_trap();
            return;
        }

        let word = operand.word;
        let top = if word { 0x8000 } else { 0x80 };
        let data = self.read_operand(sys, operand);

        let (result, carry) = match reg {
            3 => (data >> 1, data & 1 != 0),
            6 => ((data << 1) | self.sr.carry() as u16, data & top != 0),
            4 => ((data << 1) | (data & top != 0) as u16, data & top != 0),
            _ => (data << 1, data & top != 0),
        };

        self.write_operand(sys, operand, result);
        self.sr.set_carry(carry);
        self.set_status(result, word);
    }

    fn bit_op(&mut self, sys: &mut System, operand: Operand, bit: u16, op: BitOp) {
        if operand.is_immediate() {
            self.error_trap();
            return;
        }

        let data = self.read_operand(sys, operand);
        let mask = 1u16 << bit;
        self.sr.set_zero(data & mask == 0);

        match op {
            BitOp::Set => self.write_operand(sys, operand, data | mask),
            BitOp::Clear => self.write_operand(sys, operand, data & !mask),
            BitOp::Test => (),
        }
    }

    fn mulxu(&mut self, sys: &mut System, operand: Operand, reg: u8) {
        let t1 = self.read_operand(sys, operand) as u32;
        let word = operand.word;
        let mut t2 = self.r[reg as usize] as u32;
        if !word {
            t2 &= 0xFF;
        }

        let mut product = t1 * t2;
        let negative = if word {
            let pair = (reg & !1) as usize;
            self.r[pair] = (product >> 16) as u16;
            self.r[pair | 1] = product as u16;
            product & 0x8000_0000 != 0
        } else {
            product &= 0xFFFF;
            self.r[reg as usize] = product as u16;
            product & 0x8000 != 0
        };

        self.sr.set_negative(negative);
        self.sr.set_zero(product == 0);
        self.sr.set_overflow(false);
        self.sr.set_carry(false);
    }

    fn divxu(&mut self, sys: &mut System, operand: Operand, reg: u8) {
        let divisor = self.read_operand(sys, operand) as u32;
        if divisor == 0 {
            self.error_trap();
            self.sr.set_negative(false);
            self.sr.set_zero(true);
            self.sr.set_overflow(false);
            self.sr.set_carry(false);
            return;
        }

        let word = operand.word;
        let pair = (reg & !1) as usize;
        let dividend = if word {
            (self.r[pair] as u32) << 16 | self.r[pair | 1] as u32
        } else {
            self.r[reg as usize] as u32
        };

        let (quotient, remainder) = (dividend / divisor, dividend % divisor);
        let limit = if word { 0xFFFF } else { 0xFF };
        if quotient > limit {
            self.sr.set_negative(false);
            self.sr.set_zero(false);
            self.sr.set_overflow(true);
            self.sr.set_carry(false);
            return;
        }

        if word {
            self.r[pair] = remainder as u16;
            self.r[pair | 1] = quotient as u16;
        } else {
            self.r[reg as usize] = ((remainder & 0xFF) << 8 | quotient) as u16;
        }

        self.set_status(quotient as u16, word);
        self.sr.set_carry(false);
    }
}

/// Bit number encoded in the operation byte of the immediate bit operations.
#[inline(always)]
fn immediate_bit(op: Op, reg: u8) -> u16 {
    (reg | ((op as u8 & 1) << 3)) as u16
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mcu::test::{ORIGIN, STACK, rig};

    fn flags(mcu: &Mcu) -> (bool, bool, bool, bool) {
        (
            mcu.sr.negative(),
            mcu.sr.zero(),
            mcu.sr.overflow(),
            mcu.sr.carry(),
        )
    }

    #[test]
    fn add_and_sub_flags() {
        let mut mcu = Mcu::default();

        assert_eq!(mcu.add(0x7F, 0x01, false, false), 0x80);
        assert_eq!(flags(&mcu), (true, false, true, false));

        assert_eq!(mcu.add(0xFF, 0x01, false, false), 0x00);
        assert_eq!(flags(&mcu), (false, true, false, true));

        assert_eq!(mcu.sub(0x0000, 0x0001, false, true), 0xFFFF);
        assert_eq!(flags(&mcu), (true, false, false, true));

        assert_eq!(mcu.sub(0x8000, 0x0001, false, true), 0x7FFF);
        assert_eq!(flags(&mcu), (false, false, true, false));

        // only the low byte takes part in byte operations
        assert_eq!(mcu.add(0x12FF, 0x3401, true, false), 0x01);
        assert_eq!(flags(&mcu), (false, false, false, true));
    }

    #[test]
    fn byte_flags_ignore_high_byte() {
        let operands = [(0x00, 0x00), (0x7F, 0x01), (0xFF, 0x01), (0x80, 0xFF), (0x01, 0x02)];
        let highs = [0x0000, 0x1200, 0x8000, 0xFF00, 0x5A00];

        for (a, b) in operands {
            for carry in [false, true] {
                let mut reference = Mcu::default();
                let sum = reference.add(a, b, carry, false);
                let sum_flags = flags(&reference);
                let diff = reference.sub(a, b, carry, false);
                let diff_flags = flags(&reference);

                for high in highs {
                    for other in highs {
                        let mut mcu = Mcu::default();
                        assert_eq!(mcu.add(high | a, other | b, carry, false), sum);
                        assert_eq!(flags(&mcu), sum_flags, "add {a:02X} {b:02X} {high:04X}");
                        assert_eq!(mcu.sub(high | a, other | b, carry, false), diff);
                        assert_eq!(flags(&mcu), diff_flags, "sub {a:02X} {b:02X} {high:04X}");
                    }
                }
            }
        }
    }

    #[test]
    fn status_leaves_carry() {
        let mut mcu = Mcu::default();
        mcu.sr.set_carry(true);
        mcu.sr.set_overflow(true);
        mcu.set_status(0x1200, false);
        assert_eq!(flags(&mcu), (false, true, false, true));
    }

    #[test]
    fn branches() {
        // bne +2 (taken), then beq -4 (not taken)
        let (mut mcu, mut sys) = rig(&[0x26, 0x02, 0x00, 0x00, 0x27, 0xFC]);
        mcu.sr.set_zero(false);

        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 4);
        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 6);

        // bgt with N != V falls through
        let (mut mcu, mut sys) = rig(&[0x2E, 0x10]);
        mcu.sr.set_negative(true);
        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 2);
    }

    #[test]
    fn loop_counter_branch() {
        // mov:i r1, 2; scb/f r1, -2
        let (mut mcu, mut sys) = rig(&[0x59, 0x00, 0x02, 0x01, 0xB9, 0xFD]);
        mcu.step(&mut sys);

        mcu.step(&mut sys);
        assert_eq!((mcu.r[1], mcu.pc), (1, ORIGIN + 3));
        mcu.step(&mut sys);
        assert_eq!((mcu.r[1], mcu.pc), (0, ORIGIN + 3));
        mcu.step(&mut sys);
        assert_eq!((mcu.r[1], mcu.pc), (0xFFFF, ORIGIN + 6));
    }

    #[test]
    fn subroutines() {
        // jsr 0x1010; ... 0x1010: rts
        let mut program = vec![0x18, 0x10, 0x10];
        program.resize(0x10, 0x00);
        program.push(0x19);

        let (mut mcu, mut sys) = rig(&program);
        mcu.step(&mut sys);
        assert_eq!(mcu.pc, 0x1010);
        assert_eq!(mcu.r[7], STACK - 2);
        assert_eq!(sys.read16((STACK - 2) as u32), ORIGIN + 3);

        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 3);
        assert_eq!(mcu.r[7], STACK);
    }

    #[test]
    fn stm_and_ldm() {
        // stm (r0, r1, r7); ldm (r0, r1, r7)
        let (mut mcu, mut sys) = rig(&[0x12, 0x83, 0x02, 0x83]);
        mcu.r[0] = 0x1111;
        mcu.r[1] = 0x2222;

        mcu.step(&mut sys);
        assert_eq!(mcu.r[7], STACK - 6);
        assert_eq!(sys.read16((STACK - 2) as u32), STACK - 2);
        assert_eq!(sys.read16((STACK - 6) as u32), 0x1111);

        mcu.r[0] = 0;
        mcu.r[1] = 0;
        mcu.step(&mut sys);
        assert_eq!((mcu.r[0], mcu.r[1], mcu.r[7]), (0x1111, 0x2222, STACK));
    }

    #[test]
    fn short_moves() {
        // mov:e r0, 0x80; mov:s.w r0 -> @0xFB00 + 0x80; mov:l.b r2 <- @0xFB80
        let (mut mcu, mut sys) = rig(&[0x50, 0x80, 0x78, 0x80, 0x62, 0x80]);
        mcu.r[0] = 0x1200;
        mcu.r[2] = 0xAA00;
        mcu.br = 0xFB;

        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x1280);
        assert!(mcu.sr.negative());

        mcu.step(&mut sys);
        assert_eq!(sys.read16(0xFB80), 0x1280);
        assert!(!mcu.sr.negative());

        mcu.step(&mut sys);
        assert_eq!(mcu.r[2], 0xAA12);
    }

    #[test]
    fn short_word_access_to_odd_address() {
        let (mut mcu, mut sys) = rig(&[0x68, 0x81]);
        mcu.br = 0xFB;
        mcu.step(&mut sys);
        assert_eq!(mcu.pending_exception(), Some(Exception::AddressError));
    }

    #[test]
    fn general_add_and_cmp() {
        // add.w r1, r0; cmp.b #0x34, r0
        let (mut mcu, mut sys) = rig(&[0xA9, 0x20, 0x04, 0x34, 0x70]);
        mcu.r[0] = 0x1000;
        mcu.r[1] = 0x0234;

        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x1234);

        mcu.step(&mut sys);
        assert!(mcu.sr.zero());
        assert!(!mcu.sr.carry());
    }

    #[test]
    fn byte_add_keeps_high_byte() {
        // add.b r1, r0
        let (mut mcu, mut sys) = rig(&[0xA1, 0x20]);
        mcu.r[0] = 0x12FF;
        mcu.r[1] = 0x0001;
        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x1200);
        assert!(mcu.sr.carry());
        assert!(mcu.sr.zero());
    }

    #[test]
    fn memory_operands() {
        // mov:g.w #0x1234, @r4; mov:g.w @r4+, r2
        let (mut mcu, mut sys) = rig(&[0xDC, 0x07, 0x12, 0x34, 0xCC, 0x82]);
        mcu.r[4] = 0x8000;

        mcu.step(&mut sys);
        assert_eq!(sys.read16(0x8000), 0x1234);

        mcu.step(&mut sys);
        assert_eq!(mcu.r[2], 0x1234);
        assert_eq!(mcu.r[4], 0x8002);
    }

    #[test]
    fn write_to_immediate_raises() {
        // mov:g.w r0 -> #0x0000
        let (mut mcu, mut sys) = rig(&[0x0C, 0x00, 0x00, 0x90]);
        mcu.step(&mut sys);
        assert_eq!(
            mcu.pending_exception(),
            Some(Exception::InvalidInstruction)
        );
    }

    #[test]
    fn multiply() {
        // mulxu.w r2, r0
        let (mut mcu, mut sys) = rig(&[0xAA, 0xA8]);
        mcu.r[0] = 0x1234;
        mcu.r[2] = 0x0100;
        mcu.step(&mut sys);
        assert_eq!((mcu.r[0], mcu.r[1]), (0x0012, 0x3400));
        assert!(!mcu.sr.zero());

        // mulxu.b r2, r3
        let (mut mcu, mut sys) = rig(&[0xA2, 0xAB]);
        mcu.r[2] = 0x00FF;
        mcu.r[3] = 0xAB02;
        mcu.step(&mut sys);
        assert_eq!(mcu.r[3], 0x01FE);
        assert!(!mcu.sr.zero());

        // Z follows the product, not the operand
        let (mut mcu, mut sys) = rig(&[0xA2, 0xAB]);
        mcu.r[2] = 0x0005;
        mcu.r[3] = 0x0000;
        mcu.step(&mut sys);
        assert_eq!(mcu.r[3], 0x0000);
        assert!(mcu.sr.zero());

        let (mut mcu, mut sys) = rig(&[0xAA, 0xA8]);
        mcu.r[0] = 0x0000;
        mcu.r[2] = 0x1234;
        mcu.step(&mut sys);
        assert_eq!((mcu.r[0], mcu.r[1]), (0, 0));
        assert!(mcu.sr.zero());
    }

    #[test]
    fn divide() {
        // divxu.w r2, r0
        let (mut mcu, mut sys) = rig(&[0xAA, 0xB8]);
        mcu.r[0] = 0x0001;
        mcu.r[1] = 0x0005;
        mcu.r[2] = 0x0010;
        mcu.step(&mut sys);
        assert_eq!((mcu.r[0], mcu.r[1]), (0x0005, 0x1000));
        assert_eq!(flags(&mcu), (false, false, false, false));

        // quotient overflow leaves the registers untouched
        let (mut mcu, mut sys) = rig(&[0xAA, 0xB8]);
        mcu.r[0] = 0x0010;
        mcu.r[2] = 0x0001;
        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x0010);
        assert!(mcu.sr.overflow());

        // divxu.b r2, r3
        let (mut mcu, mut sys) = rig(&[0xA2, 0xBB]);
        mcu.r[2] = 0x0007;
        mcu.r[3] = 0x0017;
        mcu.step(&mut sys);
        assert_eq!(mcu.r[3], 0x0203);

        // division by zero
        let (mut mcu, mut sys) = rig(&[0xA2, 0xBB]);
        mcu.r[3] = 0x0017;
        mcu.step(&mut sys);
        assert_eq!(mcu.r[3], 0x0017);
        assert_eq!(flags(&mcu), (false, true, false, false));
    }

    #[test]
    fn bit_operations() {
        // bset #9, r0; btst #9, r0; bclr r1, r0
        let (mut mcu, mut sys) = rig(&[0xA8, 0xC9, 0xA8, 0xF9, 0xA8, 0x59]);
        mcu.r[1] = 9;

        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x0200);
        assert!(mcu.sr.zero());

        mcu.step(&mut sys);
        assert!(!mcu.sr.zero());

        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0);
        assert!(!mcu.sr.zero());
    }

    #[test]
    fn clr_group() {
        // swap r0; exts r1; neg.b r2; clr.w r3
        let (mut mcu, mut sys) = rig(&[0xA0, 0x10, 0xA1, 0x11, 0xA2, 0x14, 0xAB, 0x13]);
        mcu.r[0] = 0x1234;
        mcu.r[1] = 0x0080;
        mcu.r[2] = 0x0001;
        mcu.r[3] = 0xFFFF;

        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x3412);

        mcu.step(&mut sys);
        assert_eq!(mcu.r[1], 0xFF80);

        mcu.step(&mut sys);
        assert_eq!(mcu.r[2], 0x00FF);
        assert!(mcu.sr.carry());

        mcu.step(&mut sys);
        assert_eq!(mcu.r[3], 0);
        assert_eq!(flags(&mcu), (false, true, false, false));
    }

    #[test]
    fn shifts() {
        // shll.b r0; rotxl.b r0
        let (mut mcu, mut sys) = rig(&[0xA0, 0x1A, 0xA0, 0x1E]);
        mcu.r[0] = 0x00C1;

        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x0082);
        assert!(mcu.sr.carry());

        mcu.step(&mut sys);
        assert_eq!(mcu.r[0], 0x0005);
        assert!(mcu.sr.carry());
    }

    #[test]
    fn control_register_transfer() {
        // ldc.b #0x12, br; stc.b br, r5; andc.w #0xF8FF, sr
        let (mut mcu, mut sys) = rig(&[0x04, 0x12, 0x8B, 0xA5, 0x9B, 0x0C, 0xF8, 0xFF, 0x58]);
        mcu.step(&mut sys);
        assert_eq!(mcu.br, 0x12);

        mcu.step(&mut sys);
        assert_eq!(mcu.r[5] & 0xFF, 0x12);

        mcu.step(&mut sys);
        assert_eq!(mcu.mask(), 0);
    }

    #[test]
    fn trapa_vectors() {
        let (mut mcu, mut sys) = rig(&[0x08, 0x13]);
        sys.mem.rom1[(16 + 3) * 4..][..4].copy_from_slice(&0x3000u32.to_be_bytes());

        mcu.step(&mut sys);
        assert_eq!(mcu.pc, ORIGIN + 2);

        mcu.step(&mut sys);
        assert_eq!(sys.read16((STACK - 2) as u32), ORIGIN + 2);
        assert_eq!(mcu.mask(), 7);
        assert_eq!(mcu.pc, 0x3001);
    }

    #[test]
    fn trace_raises_after_instruction() {
        let (mut mcu, mut sys) = rig(&[0x00]);
        mcu.sr.set_trace(true);
        mcu.step(&mut sys);
        assert_eq!(mcu.pending_exception(), Some(Exception::Trace));
    }
}
