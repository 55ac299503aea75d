use super::{SubBus, SubCore};

/// Addressing modes. Immediate operands are addressed through the program counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Imm,
    Zp,
    /// Zero page indexed by X, wrapping within the zero page.
    ZpX,
    /// Zero page indexed by X, allowed to leave the zero page.
    ZpXLong,
    ZpY,
    Abs,
    AbsX,
    AbsY,
    /// `(zp, X)`
    IndX,
    /// `(zp), Y`
    IndY,
}

/// Operations on the accumulator which take a memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Logic {
    Or,
    And,
}

impl SubCore {
    #[inline(always)]
    fn fetch(&mut self, bus: &mut SubBus) -> u8 {
        let value = self.read(bus, self.pc);
        self.pc = self.pc.wrapping_add(1);
        value
    }

    #[inline(always)]
    fn fetch16(&mut self, bus: &mut SubBus) -> u16 {
        let low = self.fetch(bus);
        let high = self.fetch(bus);
        u16::from_le_bytes([low, high])
    }

    /// Reads a pointer. Both bytes come from the same address.
    #[inline(always)]
    fn read16(&mut self, bus: &mut SubBus, address: u16) -> u16 {
        let low = self.read(bus, address);
        let high = self.read(bus, address);
        u16::from_le_bytes([low, high])
    }

    pub(super) fn push(&mut self, bus: &mut SubBus, data: u8) {
        self.write(bus, self.s as u16, data);
        self.s = self.s.wrapping_sub(1);
    }

    fn pop(&mut self, bus: &mut SubBus) -> u8 {
        self.s = self.s.wrapping_add(1);
        self.read(bus, self.s as u16)
    }

    fn pop16(&mut self, bus: &mut SubBus) -> u16 {
        let low = self.pop(bus);
        let high = self.pop(bus);
        u16::from_le_bytes([low, high])
    }

    #[inline(always)]
    fn set_nz(&mut self, value: u8) {
        self.status.set_zero(value == 0);
        self.status.set_negative(value & 0x80 != 0);
    }

    fn address(&mut self, bus: &mut SubBus, mode: Mode) -> u16 {
        match mode {
            Mode::Imm => {
                let address = self.pc;
                self.pc = self.pc.wrapping_add(1);
                address
            }
            Mode::Zp => self.fetch(bus) as u16,
            Mode::ZpX => self.fetch(bus).wrapping_add(self.x) as u16,
            Mode::ZpXLong => self.fetch(bus) as u16 + self.x as u16,
            Mode::ZpY => self.fetch(bus).wrapping_add(self.y) as u16,
            Mode::Abs => self.fetch16(bus),
            Mode::AbsX => self.fetch16(bus).wrapping_add(self.x as u16),
            Mode::AbsY => self.fetch16(bus).wrapping_add(self.y as u16),
            Mode::IndX => {
                let pointer = self.fetch(bus).wrapping_add(self.x);
                self.read16(bus, pointer as u16)
            }
            Mode::IndY => {
                let pointer = self.fetch(bus);
                self.read16(bus, pointer as u16)
                    .wrapping_add(self.y as u16)
            }
        }
    }

    #[inline(always)]
    fn operand(&mut self, bus: &mut SubBus, mode: Mode) -> u8 {
        let address = self.address(bus, mode);
        self.read(bus, address)
    }

    fn branch(&mut self, bus: &mut SubBus, condition: bool) {
        let disp = self.fetch(bus) as i8;
        if condition {
            self.pc = self.pc.wrapping_add_signed(disp as i16);
        }
    }

    fn compare(&mut self, bus: &mut SubBus, register: u8, mode: Mode) {
        let operand = self.operand(bus, mode);
        let diff = register as i32 - operand as i32;
        self.status.set_carry(diff & 0x100 == 0);
        self.set_nz(diff as u8);
    }

    fn lda(&mut self, bus: &mut SubBus, mode: Mode) {
        let value = self.operand(bus, mode);
        if self.status.memory_mode() {
            self.write(bus, self.x as u16, value);
        } else {
            self.a = value;
            self.set_nz(value);
        }
    }

    fn logic(&mut self, bus: &mut SubBus, op: Logic, mode: Mode) {
        let memory_mode = self.status.memory_mode();
        let lhs = if memory_mode {
            self.read(bus, self.x as u16)
        } else {
            self.a
        };

        let rhs = self.operand(bus, mode);
        let value = match op {
            Logic::Or => lhs | rhs,
            Logic::And => lhs & rhs,
        };

        if memory_mode {
            self.write(bus, self.x as u16, value);
        } else {
            self.a = value;
            self.set_nz(value);
        }
    }

    fn store(&mut self, bus: &mut SubBus, value: u8, mode: Mode) {
        let address = self.address(bus, mode);
        self.write(bus, address, value);
    }

    /// Increments or decrements a byte in memory.
    fn step_memory(&mut self, bus: &mut SubBus, mode: Mode, delta: i8) {
        let address = self.address(bus, mode);
        let value = self.read(bus, address).wrapping_add_signed(delta);
        self.write(bus, address, value);
        self.set_nz(value);
    }

    /// `BBC`/`BBS`: branch on the state of a bit of the accumulator or of a zero page byte.
    fn branch_on_bit(&mut self, bus: &mut SubBus, opcode: u8) {
        let zp = opcode & 0x04 != 0;
        let bit = (opcode >> 5) & 7;
        let branch_if_clear = opcode & 0x10 != 0;

        let value = if zp {
            let address = self.fetch(bus);
            self.read(bus, address as u16)
        } else {
            self.a
        };

        let set = value & (1 << bit) != 0;
        self.branch(bus, set != branch_if_clear);
    }

    /// `SEB`/`CLB`: set or clear a bit of the accumulator or of a zero page byte.
    fn modify_bit(&mut self, bus: &mut SubBus, opcode: u8) {
        let zp = opcode & 0x04 != 0;
        let mask = 1u8 << ((opcode >> 5) & 7);
        let clear = opcode & 0x10 != 0;
        let apply = |value: u8| if clear { value & !mask } else { value | mask };

        if zp {
            let address = self.fetch(bus) as u16;
            let value = apply(self.read(bus, address));
            self.write(bus, address, value);
        } else {
            self.a = apply(self.a);
        }
    }

    fn call(&mut self, bus: &mut SubBus, target: u16) {
        let [high, low] = self.pc.to_be_bytes();
        self.push(bus, high);
        self.push(bus, low);
        self.pc = target;
    }

    /// Fetches and executes a single instruction.
    pub(super) fn step(&mut self, bus: &mut SubBus) {
        let opcode = self.fetch(bus);
        match opcode {
            // loads
            0xA9 => self.lda(bus, Mode::Imm),
            0xA5 => self.lda(bus, Mode::Zp),
            0xB5 => self.lda(bus, Mode::ZpX),
            0xAD => self.lda(bus, Mode::Abs),
            0xBD => self.lda(bus, Mode::AbsX),
            0xB9 => self.lda(bus, Mode::AbsY),
            0xA1 => self.lda(bus, Mode::IndX),
            0xB1 => self.lda(bus, Mode::IndY),
            0xA2 | 0xA6 | 0xB6 | 0xAE | 0xBE => {
                let mode = match opcode {
                    0xA2 => Mode::Imm,
                    0xA6 => Mode::Zp,
                    0xB6 => Mode::ZpY,
                    0xAE => Mode::Abs,
                    _ => Mode::AbsY,
                };

                self.x = self.operand(bus, mode);
                self.set_nz(self.x);
            }
            0xA0 | 0xA4 | 0xB4 | 0xAC | 0xBC => {
                let mode = match opcode {
                    0xA0 => Mode::Imm,
                    0xA4 => Mode::Zp,
                    0xB4 => Mode::ZpX,
                    0xAC => Mode::Abs,
                    _ => Mode::AbsX,
                };

                self.y = self.operand(bus, mode);
                self.set_nz(self.y);
            }
            0x3C => {
                let value = self.fetch(bus);
                let address = self.fetch(bus);
                self.write(bus, address as u16, value);
            }

            // stores
            0x85 => self.store(bus, self.a, Mode::Zp),
            0x95 => self.store(bus, self.a, Mode::ZpXLong),
            0x8D => self.store(bus, self.a, Mode::Abs),
            0x9D => self.store(bus, self.a, Mode::AbsX),
            0x99 => self.store(bus, self.a, Mode::AbsY),
            0x81 => self.store(bus, self.a, Mode::IndX),
            0x91 => self.store(bus, self.a, Mode::IndY),
            0x86 => self.store(bus, self.x, Mode::Zp),
            0x96 => self.store(bus, self.x, Mode::ZpXLong),
            0x8E => self.store(bus, self.x, Mode::Abs),
            0x84 => self.store(bus, self.y, Mode::Zp),
            0x94 => self.store(bus, self.y, Mode::ZpX),
            0x8C => self.store(bus, self.y, Mode::Abs),

            // transfers
            0x9A => self.s = self.x,
            0x8A => {
                self.a = self.x;
                self.set_nz(self.a);
            }
            0xAA => {
                self.x = self.a;
                self.set_nz(self.x);
            }

            // arithmetic and logic
            0xE8 => {
                self.x = self.x.wrapping_add(1);
                self.set_nz(self.x);
            }
            0xC8 => {
                self.y = self.y.wrapping_add(1);
                self.set_nz(self.y);
            }
            0x1A => {
                self.a = self.a.wrapping_sub(1);
                self.set_nz(self.a);
            }
            0x3A => {
                self.a = self.a.wrapping_add(1);
                self.set_nz(self.a);
            }
            0xC6 => self.step_memory(bus, Mode::Zp, -1),
            0xD6 => self.step_memory(bus, Mode::ZpX, -1),
            0xCE => self.step_memory(bus, Mode::Abs, -1),
            0xDE => self.step_memory(bus, Mode::AbsX, -1),
            0xE6 => self.step_memory(bus, Mode::Zp, 1),
            0xF6 => self.step_memory(bus, Mode::ZpX, 1),
            0xEE => self.step_memory(bus, Mode::Abs, 1),
            0xFE => self.step_memory(bus, Mode::AbsX, 1),
            0x09 => self.logic(bus, Logic::Or, Mode::Imm),
            0x05 => self.logic(bus, Logic::Or, Mode::Zp),
            0x15 => self.logic(bus, Logic::Or, Mode::ZpX),
            0x0D => self.logic(bus, Logic::Or, Mode::Abs),
            0x1D => self.logic(bus, Logic::Or, Mode::AbsX),
            0x19 => self.logic(bus, Logic::Or, Mode::AbsY),
            0x01 => self.logic(bus, Logic::Or, Mode::IndX),
            0x11 => self.logic(bus, Logic::Or, Mode::IndY),
            0x29 => self.logic(bus, Logic::And, Mode::Imm),
            0x25 => self.logic(bus, Logic::And, Mode::Zp),
            0x35 => self.logic(bus, Logic::And, Mode::ZpX),
            0x2D => self.logic(bus, Logic::And, Mode::Abs),
            0x3D => self.logic(bus, Logic::And, Mode::AbsX),
            0x39 => self.logic(bus, Logic::And, Mode::AbsY),
            0x21 => self.logic(bus, Logic::And, Mode::IndX),
            0x31 => self.logic(bus, Logic::And, Mode::IndY),

            // compares
            0xC9 => self.compare(bus, self.a, Mode::Imm),
            0xC5 => self.compare(bus, self.a, Mode::Zp),
            0xD5 => self.compare(bus, self.a, Mode::ZpX),
            0xCD => self.compare(bus, self.a, Mode::Abs),
            0xDD => self.compare(bus, self.a, Mode::AbsX),
            0xD9 => self.compare(bus, self.a, Mode::AbsY),
            0xC1 => self.compare(bus, self.a, Mode::IndX),
            0xD1 => self.compare(bus, self.a, Mode::IndY),
            0xE0 => self.compare(bus, self.x, Mode::Imm),
            0xE4 => self.compare(bus, self.x, Mode::Zp),
            0xEC => self.compare(bus, self.x, Mode::Abs),
            0xC0 => self.compare(bus, self.y, Mode::Imm),
            0xC4 => self.compare(bus, self.y, Mode::Zp),
            0xCC => self.compare(bus, self.y, Mode::Abs),

            // branches
            0x80 => self.branch(bus, true),
            0xF0 => self.branch(bus, self.status.zero()),
            0xD0 => self.branch(bus, !self.status.zero()),
            0xB0 => self.branch(bus, self.status.carry()),
            0x90 => self.branch(bus, !self.status.carry()),
            0x10 => self.branch(bus, !self.status.negative()),
            op if op & 0x0B == 0x03 => self.branch_on_bit(bus, op),
            op if op & 0x0B == 0x0B => self.modify_bit(bus, op),

            // control flow
            0x20 => {
                let target = self.fetch16(bus);
                self.call(bus, target);
            }
            0x02 => {
                let pointer = self.fetch(bus);
                let target = self.read16(bus, pointer as u16);
                self.call(bus, target);
            }
            0x22 => {
                let target = 0xFF00 | self.fetch(bus) as u16;
                self.call(bus, target);
            }
            0x60 => self.pc = self.pop16(bus),
            0x40 => {
                let status = self.pop(bus);
                self.status = super::Status::from_bits(status);
                self.pc = self.pop16(bus);
            }
            0x4C => self.pc = self.fetch16(bus),
            0x6C => {
                let pointer = self.fetch16(bus);
                self.pc = self.read16(bus, pointer);
            }
            0xB2 => {
                let pointer = self.fetch(bus);
                self.pc = self.read16(bus, pointer as u16);
            }

            // stack
            0x48 => self.push(bus, self.a),
            0x68 => {
                self.a = self.pop(bus);
                self.set_nz(self.a);
            }

            // flags
            0x58 => self.status.set_interrupt_disable(false),
            0x78 => self.status.set_interrupt_disable(true),
            0xD8 => self.status.set_decimal(false),
            0x12 => self.status.set_memory_mode(false),
            0x38 => self.status.set_carry(true),
            0x18 => self.status.set_carry(false),

            0x42 => self.sleep = true,
            0xEA => (),
            _ => tracing::warn!(
                pc = self.pc.wrapping_sub(1),
                "unimplemented sub-core opcode {opcode:02X}"
            ),
        }
    }
}
