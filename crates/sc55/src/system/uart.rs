//! Incoming MIDI byte queue.

use std::collections::VecDeque;

pub const QUEUE_LEN: usize = 8192;

#[derive(Debug, Clone)]
pub struct Uart {
    queue: VecDeque<u8>,
    /// Last received byte.
    pub rx_byte: u8,
    /// Cycle before which no new byte is received.
    pub rx_delay: u64,
    /// Cycle before which the transmitter stays busy.
    pub tx_delay: u64,
}

impl Default for Uart {
    fn default() -> Self {
        Self {
            queue: VecDeque::with_capacity(QUEUE_LEN),
            rx_byte: 0,
            rx_delay: 0,
            tx_delay: 0,
        }
    }
}

impl Uart {
    /// Queues a byte for reception. Bytes arriving while the queue is full are dropped.
    pub fn post(&mut self, byte: u8) {
        if self.queue.len() >= QUEUE_LEN {
            tracing::warn!("uart queue full, dropping {byte:02X}");
            return;
        }

        self.queue.push_back(byte);
    }

    #[inline(always)]
    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Moves the next queued byte into the receive register.
    pub fn receive(&mut self) -> Option<u8> {
        let byte = self.queue.pop_front()?;
        self.rx_byte = byte;
        Some(byte)
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.rx_byte = 0;
        self.rx_delay = 0;
        self.tx_delay = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overflow_keeps_oldest() {
        let mut uart = Uart::default();
        for i in 0..QUEUE_LEN + 10 {
            uart.post(i as u8);
        }

        assert_eq!(uart.receive(), Some(0));
        assert_eq!(uart.rx_byte, 0);
        assert_eq!(uart.receive(), Some(1));

        let mut count = 2;
        while uart.receive().is_some() {
            count += 1;
        }

        assert_eq!(count, QUEUE_LEN);
        assert_eq!(uart.rx_byte, (QUEUE_LEN - 1) as u8);
    }
}
