//! Interrupt lines of the main core.

use strum::{EnumCount, FromRepr, VariantArray};

/// An interrupt source of the main core. The declaration order is the scan order used when
/// two sources share a priority level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, EnumCount, VariantArray)]
#[repr(u8)]
pub enum Source {
    Nmi,
    /// PCM voice interrupt.
    Irq0,
    /// Gate array interrupt.
    Irq1,
    Frt0Ici,
    Frt0Ocia,
    Frt0Ocib,
    Frt0Fovi,
    Frt1Ici,
    Frt1Ocia,
    Frt1Ocib,
    Frt1Fovi,
    Frt2Ici,
    Frt2Ocia,
    Frt2Ocib,
    Frt2Fovi,
    TimerCmia,
    TimerCmib,
    TimerOvi,
    Analog,
    UartRx,
    UartTx,
}

impl Source {
    pub const OCIA: [Source; 3] = [Source::Frt0Ocia, Source::Frt1Ocia, Source::Frt2Ocia];
    pub const OCIB: [Source; 3] = [Source::Frt0Ocib, Source::Frt1Ocib, Source::Frt2Ocib];
    pub const FOVI: [Source; 3] = [Source::Frt0Fovi, Source::Frt1Fovi, Source::Frt2Fovi];
}

/// Something that interrupt requests can be posted to.
pub trait InterruptSink {
    /// Asserts or deasserts the line of the given source.
    fn request(&mut self, source: Source, asserted: bool);
}

/// Priority configuration of the interrupt controller, as found in the device registers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Priorities {
    pub ipra: u8,
    pub iprb: u8,
    pub iprc: u8,
    pub iprd: u8,
    pub p1cr: u8,
}

/// A maskable interrupt ready to be serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pending {
    pub source: Source,
    pub vector: u8,
    pub level: u8,
}

impl Priorities {
    /// Returns the vector and priority level of a source, or `None` if the source can't be
    /// serviced with the current configuration.
    pub fn route(&self, source: Source) -> Option<(u8, u8)> {
        let high = |r: u8| (r >> 4) & 7;
        let low = |r: u8| r & 7;

        Some(match source {
            Source::Irq0 if self.p1cr & 0x20 != 0 => (32, high(self.ipra)),
            Source::Irq1 if self.p1cr & 0x40 != 0 => (33, low(self.ipra)),
            Source::Frt0Ocia => (37, high(self.iprb)),
            Source::Frt0Ocib => (38, high(self.iprb)),
            Source::Frt0Fovi => (39, high(self.iprb)),
            Source::Frt1Ocia => (41, low(self.iprb)),
            Source::Frt1Ocib => (42, low(self.iprb)),
            Source::Frt1Fovi => (43, low(self.iprb)),
            Source::Frt2Ocia => (45, high(self.iprc)),
            Source::Frt2Ocib => (46, high(self.iprc)),
            Source::Frt2Fovi => (47, high(self.iprc)),
            Source::TimerCmia => (48, low(self.iprc)),
            Source::TimerCmib => (49, low(self.iprc)),
            Source::TimerOvi => (50, low(self.iprc)),
            Source::UartRx => (53, high(self.iprd)),
            Source::UartTx => (54, high(self.iprd)),
            Source::Analog => (56, low(self.iprd)),
            _ => return None,
        })
    }
}

/// Pending state of every interrupt line. Lines are only cleared by the peripheral that raised
/// them (or by firmware acknowledging it), never by the controller.
#[derive(Debug, Clone, Default)]
pub struct Interrupts {
    pending: [bool; Source::COUNT],
}

impl Interrupts {
    #[inline(always)]
    pub fn is_pending(&self, source: Source) -> bool {
        self.pending[source as usize]
    }

    pub fn reset(&mut self) {
        self.pending = [false; Source::COUNT];
    }

    /// Selects the maskable interrupt to service given the current interrupt mask: the pending
    /// source with the highest level above `mask`, ties going to the earliest source.
    pub fn select(&self, priorities: &Priorities, mask: u8) -> Option<Pending> {
        let mut best: Option<Pending> = None;
        for &source in &Source::VARIANTS[1..] {
            if !self.is_pending(source) {
                continue;
            }

            let Some((vector, level)) = priorities.route(source) else {
                continue;
            };

            if level <= mask || best.is_some_and(|b| b.level >= level) {
                continue;
            }

            best = Some(Pending {
                source,
                vector,
                level,
            });
        }

        best
    }
}

impl InterruptSink for Interrupts {
    #[inline(always)]
    fn request(&mut self, source: Source, asserted: bool) {
        self.pending[source as usize] = asserted;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn priorities() -> Priorities {
        Priorities {
            ipra: 0x52,
            iprb: 0x30,
            iprc: 0x06,
            iprd: 0x44,
            p1cr: 0x60,
        }
    }

    #[test]
    fn higher_level_wins() {
        let mut irq = Interrupts::default();
        irq.request(Source::Irq1, true);
        irq.request(Source::TimerCmia, true);

        let chosen = irq.select(&priorities(), 0).unwrap();
        assert_eq!(chosen.source, Source::TimerCmia);
        assert_eq!(chosen.vector, 48);
        assert_eq!(chosen.level, 6);

        // the loser stays pending
        assert!(irq.is_pending(Source::Irq1));
    }

    #[test]
    fn ties_go_to_earliest_source() {
        let mut irq = Interrupts::default();
        irq.request(Source::UartRx, true);
        irq.request(Source::Analog, true);

        let chosen = irq.select(&priorities(), 0).unwrap();
        assert_eq!(chosen.source, Source::Analog);
        assert_eq!(chosen.vector, 56);
    }

    #[test]
    fn masked_and_disabled_sources_are_skipped() {
        let mut irq = Interrupts::default();
        irq.request(Source::Irq0, true);
        irq.request(Source::Frt0Ocia, true);

        // IRQ0 is level 5, FRT0 is level 3
        assert_eq!(irq.select(&priorities(), 4).unwrap().source, Source::Irq0);
        assert_eq!(irq.select(&priorities(), 5), None);

        let disabled = Priorities {
            p1cr: 0,
            ..priorities()
        };
        assert_eq!(irq.select(&disabled, 0).unwrap().source, Source::Frt0Ocia);
    }

    #[test]
    fn input_capture_is_never_serviced() {
        let mut irq = Interrupts::default();
        irq.request(Source::Frt0Ici, true);
        assert_eq!(irq.select(&priorities(), 0), None);
    }
}
