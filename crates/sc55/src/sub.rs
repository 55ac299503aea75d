//! The sub-core: a small 8 bit processor which receives MIDI and hands it over to the main core
//! through a window of shared memory.

mod exec;

use crate::{
    irq::Interrupts,
    system::{gate_array::GateArray, ports::Ports, uart::Uart},
};
use bitos::bitos;
use util::boxed_array;

pub const ROM_LEN: usize = 0x1000;
pub const RAM_LEN: usize = 0x80;
pub const SHARED_LEN: usize = 0xC0;
const ACCESS_LEN: usize = SHARED_LEN / 8;
const DEVICE_LEN: usize = 0x20;

/// Sub-core cycles per main core cycle.
pub const CLOCK_RATIO: u64 = 5;
/// Sub-core cycles per instruction.
const INSTRUCTION_CYCLES: u64 = 48;
/// Sub-core cycles between received bytes.
const RX_DELAY: u64 = 12000;

/// Offsets into the device register block.
pub mod reg {
    pub const P1_DATA: usize = 0x00;
    pub const P1_DIR: usize = 0x01;
    pub const RAM_DIR: usize = 0x02;
    pub const UART1_MODE_STATUS: usize = 0x05;
    pub const UART1_CTRL: usize = 0x06;
    pub const UART2_DATA: usize = 0x08;
    pub const UART2_MODE_STATUS: usize = 0x09;
    pub const UART2_CTRL: usize = 0x0A;
    pub const UART3_MODE_STATUS: usize = 0x0D;
    pub const UART3_CTRL: usize = 0x0E;
    pub const IPCM0: usize = 0x10;
    pub const IPCE0: usize = 0x14;
    pub const SEMAPHORE: usize = 0x19;
    pub const COLLISION: usize = 0x1A;
    pub const INT_ENABLE: usize = 0x1B;
    pub const INT_REQUEST: usize = 0x1C;
    pub const PRESCALER: usize = 0x1D;
    pub const TIMER: usize = 0x1E;
    pub const TIMER_CTRL: usize = 0x1F;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vector {
    Uart3Tx = 0,
    Uart2Tx = 1,
    Uart1Tx = 2,
    Collision = 3,
    TimerX = 4,
    Ipcm0 = 5,
    Uart3Rx = 6,
    Uart2Rx = 7,
    Uart1Rx = 8,
    Reset = 9,
}

#[bitos(8)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    #[bits(0)]
    pub carry: bool,
    #[bits(1)]
    pub zero: bool,
    #[bits(2)]
    pub interrupt_disable: bool,
    #[bits(3)]
    pub decimal: bool,
    #[bits(4)]
    pub brk: bool,
    /// Makes accumulator operations work on the zero page byte pointed to by X.
    #[bits(5)]
    pub memory_mode: bool,
    #[bits(6)]
    pub overflow: bool,
    #[bits(7)]
    pub negative: bool,
}

/// The parts of the unit the sub-core is wired to.
pub struct SubBus<'a> {
    pub ports: &'a mut Ports,
    pub gate_array: &'a mut GateArray,
    pub uart: &'a mut Uart,
    /// Main core interrupt lines, reached through the gate array.
    pub irq: &'a mut Interrupts,
}

pub struct SubCore {
    rom: Box<[u8; ROM_LEN]>,
    ram: [u8; RAM_LEN],
    shared: [u8; SHARED_LEN],
    /// One bit per shared byte: set by writes, cleared by reads from the opposite side.
    access: [u8; ACCESS_LEN],
    device: [u8; DEVICE_LEN],

    pub pc: u16,
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub s: u8,
    pub status: Status,
    pub sleep: bool,
    cycles: u64,

    timer_cycles: u64,
    timer_prescaler: u8,
    timer_counter: u8,
    p0_dir: u8,
    p1_dir: u8,
    rx_ready: bool,
    /// Clear-to-send inputs of the three serial channels. Nothing drives them.
    cts: u8,
}

impl SubCore {
    pub fn new(rom: &[u8]) -> Self {
        let mut image: Box<[u8; ROM_LEN]> = boxed_array(0);
        let len = rom.len().min(ROM_LEN);
        image[..len].copy_from_slice(&rom[..len]);

        Self {
            rom: image,
            ram: [0; RAM_LEN],
            shared: [0; SHARED_LEN],
            access: [0; ACCESS_LEN],
            device: [0; DEVICE_LEN],
            pc: 0,
            a: 0,
            x: 0,
            y: 0,
            s: 0,
            status: Status::default(),
            sleep: false,
            cycles: 0,
            timer_cycles: 0,
            timer_prescaler: 0,
            timer_counter: 0,
            p0_dir: 0,
            p1_dir: 0,
            rx_ready: false,
            cts: 0,
        }
    }

    /// Resets the core. Only the processor state is reinitialized, memory and devices keep their
    /// contents.
    pub fn reset(&mut self) {
        self.pc = self.vector_address(Vector::Reset);
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.s = 0;
        self.status = Status::from_bits(0);
        self.cycles = 0;
        self.sleep = false;
    }

    /// Clears everything, including memory, then resets.
    pub fn power_on(&mut self) {
        let rom = std::mem::replace(&mut self.rom, boxed_array(0));
        *self = Self {
            rom,
            ..Self::new(&[])
        };

        self.reset();
    }

    #[inline(always)]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn shared(&self) -> &[u8; SHARED_LEN] {
        &self.shared
    }

    /// Whether the access flag of a shared byte is set.
    pub fn access_flag(&self, index: u8) -> bool {
        let index = index as usize;
        self.access[index >> 3] & (1 << (index & 7)) != 0
    }

    #[inline(always)]
    fn set_access(&mut self, index: usize) {
        self.access[index >> 3] |= 1 << (index & 7);
    }

    #[inline(always)]
    fn clear_access(&mut self, index: usize) {
        self.access[index >> 3] &= !(1 << (index & 7));
    }

    fn vector_address(&self, vector: Vector) -> u16 {
        let offset = 0xFEC + vector as usize * 2;
        u16::from_le_bytes([self.rom[offset], self.rom[offset + 1]])
    }

    pub fn read(&mut self, bus: &mut SubBus, address: u16) -> u8 {
        let address = address & 0x1FFF;
        match address {
            0x1000.. => self.rom[address as usize & 0xFFF],
            0x00..0x80 => self.ram[address as usize],
            0xC0..0xD8 => self.access[address as usize & 0x1F],
            0xE0..0x100 => {
                let index = address as usize & 0x1F;
                match index {
                    reg::UART2_DATA => {
                        self.rx_ready = false;
                        bus.uart.rx_byte
                    }
                    reg::UART1_MODE_STATUS | reg::UART3_MODE_STATUS => 0x05,
                    reg::UART2_MODE_STATUS => ((self.rx_ready as u8) << 1) | 0x05,
                    reg::P1_DATA => bus.ports.read_p1(),
                    reg::P1_DIR => self.p1_dir,
                    reg::PRESCALER => self.timer_prescaler,
                    reg::TIMER => self.timer_counter,
                    _ => self.device[index],
                }
            }
            0x200..0x2C0 => {
                let index = address as usize & 0xFF;
                if self.device[reg::RAM_DIR] & (1 << (index >> 5)) != 0 {
                    self.clear_access(index);
                }

                self.shared[index]
            }
            _ => {
                tracing::warn!(pc = self.pc, "sub-core read from unknown address {address:04X}");
                0
            }
        }
    }

    pub fn write(&mut self, bus: &mut SubBus, address: u16, data: u8) {
        let address = address & 0x1FFF;
        match address {
            0x00..0x80 => self.ram[address as usize] = data,
            0xE0..0x100 => {
                let index = address as usize & 0x1F;
                match index {
                    reg::P1_DATA => bus.ports.write_p1(data),
                    reg::P1_DIR => self.p1_dir = data,
                    reg::INT_REQUEST => self.device[index] &= data,
                    reg::COLLISION => {
                        let collision = &mut self.device[index];
                        *collision = (*collision & !0x7F) | (data & 0x7F);
                        if data & 0x80 == 0 {
                            *collision &= !0x80;
                        }
                    }
                    _ => self.device[index] = data,
                }

                if index == reg::UART3_MODE_STATUS || index == reg::UART3_CTRL {
                    let line = self.device[reg::UART3_MODE_STATUS] & 0x80 != 0
                        && self.device[reg::UART3_CTRL] & 0x20 == 0;
                    bus.gate_array.set_line(5, line, bus.irq);
                }
            }
            0x200..0x2C0 => {
                let index = address as usize & 0xFF;
                self.set_access(index);
                self.shared[index] = data;
            }
            _ => tracing::warn!(
                pc = self.pc,
                "sub-core write to unknown address {address:04X} ({data:02X})"
            ),
        }
    }

    /// Reads from the sub-core window as seen by the main core.
    pub fn sys_read(&mut self, address: u8, ports: &Ports) -> u8 {
        match address {
            0x00..0xC0 => {
                let index = address as usize;
                if self.device[reg::RAM_DIR] & (1 << (index >> 5)) == 0 {
                    self.clear_access(index);
                }

                self.shared[index]
            }
            0xF8..0xFC => {
                let channel = address as usize & 3;
                if channel == 0 {
                    self.device[reg::INT_REQUEST] |= 0x10;
                }

                std::mem::take(&mut self.device[reg::IPCE0 + channel])
            }
            0xFF => self.device[reg::SEMAPHORE],
            0xF5 => ports.read_p1(),
            0xF6 => ports.read_p0(),
            0xF7 => self.p0_dir,
            _ => {
                tracing::warn!("unknown sub-core window read {address:02X}");
                0
            }
        }
    }

    /// Writes to the sub-core window as seen by the main core.
    pub fn sys_write(&mut self, address: u8, data: u8, ports: &mut Ports) {
        match address {
            0x00..0xC0 => {
                let index = address as usize;
                self.set_access(index);
                self.shared[index] = data;
            }
            0xF8..0xFC => {
                let channel = address as usize & 3;
                self.device[reg::IPCM0 + channel] = data;
                if channel == 0 {
                    self.device[reg::INT_REQUEST] |= 0x10;
                    self.device[reg::SEMAPHORE] &= !0x80;
                }
            }
            0xFF => {
                let semaphore = &mut self.device[reg::SEMAPHORE];
                *semaphore = (*semaphore & !0x1F) | (data & 0x1F);
            }
            0xF5 => ports.write_p1(data),
            0xF6 => ports.write_p0(data),
            0xF7 => self.p0_dir = data,
            _ => tracing::warn!("unknown sub-core window write {address:02X} ({data:02X})"),
        }
    }

    fn start_vector(&mut self, bus: &mut SubBus, vector: Vector) {
        let [high, low] = self.pc.to_be_bytes();
        self.push(bus, high);
        self.push(bus, low);
        self.push(bus, self.status.to_bits());

        self.status.set_interrupt_disable(true);
        self.sleep = false;
        self.pc = self.vector_address(vector);
    }

    /// Returns the highest priority pending interrupt, acknowledging it.
    fn take_interrupt(&mut self) -> Option<Vector> {
        let cts = self.cts;
        let dev = &mut self.device;
        let requested = |dev: &[u8; DEVICE_LEN], bit: u8| {
            dev[reg::INT_ENABLE] & bit != 0 && dev[reg::INT_REQUEST] & bit != 0
        };

        let receivers = [
            (dev[reg::UART1_CTRL] & 0x08 != 0, 0x80, Vector::Uart1Rx),
            (dev[reg::UART2_CTRL] & 0x08 != 0, 0x40, Vector::Uart2Rx),
            (dev[reg::UART3_CTRL] & 0x08 != 0, 0x20, Vector::Uart3Rx),
            (dev[reg::TIMER_CTRL] & 0x80 != 0, 0x10, Vector::Ipcm0),
            (dev[reg::TIMER_CTRL] & 0x40 != 0, 0x08, Vector::TimerX),
        ];

        for (enabled, bit, vector) in receivers {
            if enabled && requested(dev, bit) {
                dev[reg::INT_REQUEST] &= !bit;
                return Some(vector);
            }
        }

        if dev[reg::COLLISION] & 0xC0 == 0xC0 {
            dev[reg::COLLISION] &= !0x80;
            return Some(Vector::Collision);
        }

        let clear = |ctrl: usize, line: u8| dev[ctrl] & 0x10 == 0 || cts & line != 0;
        let transmitters = [
            (clear(reg::UART1_CTRL, 1), 0x04, Vector::Uart1Tx),
            (clear(reg::UART2_CTRL, 2), 0x02, Vector::Uart2Tx),
            (clear(reg::UART3_CTRL, 4), 0x01, Vector::Uart3Tx),
        ];

        for (enabled, bit, vector) in transmitters {
            if enabled && requested(dev, bit) {
                dev[reg::INT_REQUEST] &= !bit;
                return Some(vector);
            }
        }

        None
    }

    fn handle_interrupt(&mut self, bus: &mut SubBus) {
        if self.status.interrupt_disable() {
            return;
        }

        if let Some(vector) = self.take_interrupt() {
            self.start_vector(bus, vector);
        }
    }

    fn update_timer(&mut self) {
        while self.timer_cycles < self.cycles {
            if self.device[reg::TIMER_CTRL] & 0x20 == 0 && !self.sleep {
                if self.timer_prescaler == 0 {
                    self.timer_prescaler = self.device[reg::PRESCALER];
                    if self.timer_counter == 0 {
                        self.timer_counter = self.device[reg::TIMER];
                        self.device[reg::INT_REQUEST] |= 0x08;
                    } else {
                        self.timer_counter -= 1;
                    }
                } else {
                    self.timer_prescaler -= 1;
                }
            }

            self.timer_cycles += 16;
        }
    }

    fn update_uart(&mut self, uart: &mut Uart) {
        if self.device[reg::UART1_CTRL] & 0x04 == 0
            || self.rx_ready
            || !uart.has_pending()
            || self.cycles < uart.rx_delay
        {
            return;
        }

        if uart.receive().is_some() {
            self.rx_ready = true;
            self.device[reg::INT_REQUEST] |= 0x40;
            uart.rx_delay = self.cycles + RX_DELAY;
        }
    }

    /// Runs the sub-core until it catches up with the given main core cycle count.
    pub fn update(&mut self, bus: &mut SubBus, main_cycles: u64) {
        while self.cycles < main_cycles * CLOCK_RATIO {
            self.handle_interrupt(bus);
            if !self.sleep {
                self.step(bus);
            }

            self.cycles += INSTRUCTION_CYCLES;
            self.update_timer();
            self.update_uart(bus.uart);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    pub(super) struct Rig {
        pub ports: Ports,
        pub gate_array: GateArray,
        pub uart: Uart,
        pub irq: Interrupts,
    }

    impl Rig {
        pub fn new() -> Self {
            Self {
                ports: Ports::default(),
                gate_array: GateArray::default(),
                uart: Uart::default(),
                irq: Interrupts::default(),
            }
        }

        pub fn bus(&mut self) -> SubBus<'_> {
            SubBus {
                ports: &mut self.ports,
                gate_array: &mut self.gate_array,
                uart: &mut self.uart,
                irq: &mut self.irq,
            }
        }
    }

    /// Builds a core whose ROM holds `program` at 0x1000 and whose vectors all point to it,
    /// except for the ones given.
    pub(super) fn core(program: &[u8], vectors: &[(Vector, u16)]) -> SubCore {
        let mut rom = vec![0xEA; ROM_LEN];
        rom[..program.len()].copy_from_slice(program);
        for vector in 0..10 {
            rom[0xFEC + vector * 2..][..2].copy_from_slice(&0x1000u16.to_le_bytes());
        }
        for &(vector, address) in vectors {
            rom[0xFEC + vector as usize * 2..][..2].copy_from_slice(&address.to_le_bytes());
        }

        let mut core = SubCore::new(&rom);
        core.reset();
        core
    }

    #[test]
    fn shared_memory_access_handoff() {
        let mut rig = Rig::new();
        let mut core = core(&[], &[]);

        // sub-core writes byte 0x21
        core.write(&mut rig.bus(), 0x221, 0x5A);
        assert!(core.access_flag(0x21));

        // main core reads it with the direction bit of that block clear
        assert_eq!(core.sys_read(0x21, &rig.ports), 0x5A);
        assert!(!core.access_flag(0x21));

        // main core writes, sub-core reads with the direction bit set
        core.sys_write(0x40, 0x77, &mut rig.ports);
        assert!(core.access_flag(0x40));
        core.write(&mut rig.bus(), 0xE0 + reg::RAM_DIR as u16, 1 << 2);
        assert_eq!(core.read(&mut rig.bus(), 0x240), 0x77);
        assert!(!core.access_flag(0x40));

        // with the direction bit set, main core reads keep the flag
        core.sys_write(0x41, 0x01, &mut rig.ports);
        core.sys_read(0x41, &rig.ports);
        assert!(core.access_flag(0x41));

        // flags are visible to the sub-core
        assert_eq!(core.read(&mut rig.bus(), 0xC8), 0b0000_0010);
    }

    #[test]
    fn mailbox_raises_ipc_interrupt() {
        let mut rig = Rig::new();
        let mut core = core(&[0x58, 0x42], &[(Vector::Ipcm0, 0x1080)]);
        core.write(&mut rig.bus(), 0xE0 + reg::INT_ENABLE as u16, 0x10);
        core.write(&mut rig.bus(), 0xE0 + reg::TIMER_CTRL as u16, 0x80 | 0x20);
        core.write(&mut rig.bus(), 0xE0 + reg::SEMAPHORE as u16, 0x80);
        core.s = 0x7F;

        // CLI, STP
        core.update(&mut rig.bus(), 20);
        assert!(core.sleep);
        assert_eq!(core.pc, 0x1002);

        core.sys_write(0xF8, 0x33, &mut rig.ports);
        assert_eq!(core.device[reg::SEMAPHORE], 0x00);

        core.update(&mut rig.bus(), 30);
        assert!(core.status.interrupt_disable());
        assert!(core.pc > 0x1080);
        assert_eq!(core.device[reg::IPCM0], 0x33);

        // return address and status were pushed
        assert_eq!(core.ram[0x7F], 0x10);
        assert_eq!(core.ram[0x7E], 0x02);
        assert_eq!(core.s, 0x7C);
    }

    #[test]
    fn uart_reception_is_paced() {
        let mut rig = Rig::new();
        let mut core = core(&[0x80, 0xFE], &[]);
        core.write(&mut rig.bus(), 0xE0 + reg::UART1_CTRL as u16, 0x04);

        rig.uart.post(0x90);
        rig.uart.post(0x40);

        core.update(&mut rig.bus(), 10);
        assert_eq!(core.read(&mut rig.bus(), 0xE0 + reg::UART2_MODE_STATUS as u16), 0x07);
        assert_eq!(core.device[reg::INT_REQUEST] & 0x40, 0x40);
        assert_eq!(core.read(&mut rig.bus(), 0xE8), 0x90);
        assert_eq!(core.read(&mut rig.bus(), 0xE0 + reg::UART2_MODE_STATUS as u16), 0x05);

        // the next byte only arrives after the receive delay
        core.update(&mut rig.bus(), 20);
        assert!(rig.uart.has_pending());
        core.update(&mut rig.bus(), 2500);
        assert!(!rig.uart.has_pending());
        assert_eq!(rig.uart.rx_byte, 0x40);
    }

    #[test]
    fn uart3_status_drives_gate_array() {
        let mut rig = Rig::new();
        let mut core = core(&[], &[]);
        rig.gate_array.write_enable(1 << 4);

        core.write(&mut rig.bus(), 0xE0 + reg::UART3_MODE_STATUS as u16, 0x80);
        assert!(rig.irq.is_pending(crate::irq::Source::Irq1));
        assert_eq!(rig.gate_array.read_trigger(&mut rig.irq), 5);
    }

    #[test]
    fn timer_requests_interrupt() {
        let mut rig = Rig::new();
        let mut core = core(&[0x80, 0xFE], &[]);
        core.write(&mut rig.bus(), 0xE0 + reg::PRESCALER as u16, 1);
        core.write(&mut rig.bus(), 0xE0 + reg::TIMER as u16, 2);

        core.update(&mut rig.bus(), 1);
        assert_eq!(core.device[reg::INT_REQUEST] & 0x08, 0x08);

        // stopped timer
        core.write(&mut rig.bus(), 0xE0 + reg::INT_REQUEST as u16, 0);
        core.write(&mut rig.bus(), 0xE0 + reg::TIMER_CTRL as u16, 0x20);
        core.update(&mut rig.bus(), 100);
        assert_eq!(core.device[reg::INT_REQUEST], 0);
    }

    #[test]
    fn reset_keeps_memory() {
        let mut rig = Rig::new();
        let mut core = core(&[], &[]);
        core.write(&mut rig.bus(), 0x10, 0xAA);
        core.a = 5;
        core.reset();

        assert_eq!(core.a, 0);
        assert_eq!(core.pc, 0x1000);
        assert_eq!(core.ram[0x10], 0xAA);

        core.power_on();
        assert_eq!(core.ram[0x10], 0);
        assert_eq!(core.pc, 0x1000);
    }
}
