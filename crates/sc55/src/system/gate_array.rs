//! Gate array interrupt multiplexer feeding IRQ1 of the main core.

use crate::irq::{InterruptSink, Source};

#[derive(Debug, Clone, Default)]
pub struct GateArray {
    lines: [bool; 8],
    enable: u16,
    trigger: u8,
    /// Miscellaneous I/O select latch.
    pub io_sd: u8,
}

impl GateArray {
    /// Sets the level of an input line. A rising edge on an enabled line latches it as the
    /// trigger.
    pub fn set_line(&mut self, line: u8, value: bool, irq: &mut impl InterruptSink) {
        let index = line as usize & 7;
        if value && !self.lines[index] && self.enable & (1 << index) != 0 {
            self.trigger = line;
        }

        self.lines[index] = value;
        irq.request(Source::Irq1, self.trigger != 0);
    }

    pub fn write_enable(&mut self, data: u8) {
        self.enable = (data as u16) << 1;
    }

    /// Reads and acknowledges the latched trigger.
    pub fn read_trigger(&mut self, irq: &mut impl InterruptSink) -> u8 {
        let trigger = std::mem::take(&mut self.trigger);
        irq.request(Source::Irq1, false);
        trigger
    }
}
