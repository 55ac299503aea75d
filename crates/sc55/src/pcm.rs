//! The PCM voice engine.
//!
//! Every slot owns two register banks: `ram1`, holding 20 bit addresses and filter state, and
//! `ram2`, holding 16 bit voice parameters. The arithmetic below mirrors the chip's 20 bit
//! datapath, including its saturation and truncation quirks.

use crate::{
    irq::{InterruptSink, Source},
    romset::Model,
};
use seq_macro::seq;

pub const SLOTS: usize = 32;

/// Receives the stereo samples produced by the engine, one pair per synthesis tick.
pub trait SampleSink {
    fn post_sample(&mut self, left: i16, right: i16);
}

impl<F> SampleSink for F
where
    F: FnMut(i16, i16),
{
    #[inline(always)]
    fn post_sample(&mut self, left: i16, right: i16) {
        self(left, right)
    }
}

/// Adds two 20 bit values plus a carry in, saturating to the 20 bit signed range.
#[inline(always)]
pub fn addclip20(add1: i32, add2: i32, cin: i32) -> i32 {
    let sum = add1.wrapping_add(add2).wrapping_add(cin) & 0xF_FFFF;
    let sign = |x: i32| x & 0x8_0000 != 0;

    if sign(add1) && sign(add2) && !sign(sum) {
        0x8_0000
    } else if !sign(add1) && !sign(add2) && sign(sum) {
        0x7_FFFF
    } else {
        sum
    }
}

/// Multiplies a 20 bit signed value by an 8 bit signed value. The multiplier is truncated to
/// its low 8 bits.
#[inline(always)]
pub fn multi(val1: i32, val2: i32) -> i32 {
    let val1 = if val1 & 0x8_0000 != 0 {
        val1 | !0xF_FFFF
    } else {
        val1 & 0x7_FFFF
    };

    let product = val1.wrapping_mul(val2 as i8 as i32);
    if product & 0x800_0000 != 0 {
        product | !0x1FF_FFFF
    } else {
        product & 0x1FF_FFFF
    }
}

#[rustfmt::skip]
static INTERP_LUT: [[i32; 128]; 3] = [
    [
        3385, 3401, 3417, 3432, 3448, 3463, 3478, 3492, 3506, 3521, 3534, 3548, 3562, 3575, 3588, 3601,
        3614, 3626, 3638, 3650, 3662, 3673, 3685, 3696, 3707, 3718, 3728, 3739, 3749, 3759, 3768, 3778,
        3787, 3796, 3805, 3814, 3823, 3831, 3839, 3847, 3855, 3863, 3870, 3878, 3885, 3892, 3899, 3905,
        3912, 3918, 3924, 3930, 3936, 3942, 3948, 3953, 3958, 3963, 3968, 3973, 3978, 3983, 3987, 3991,
        3995, 4000, 4004, 4007, 4011, 4015, 4018, 4022, 4025, 4028, 4031, 4034, 4037, 4040, 4042, 4045,
        4047, 4050, 4052, 4054, 4057, 4059, 4061, 4063, 4064, 4066, 4068, 4070, 4071, 4073, 4074, 4076,
        4077, 4078, 4079, 4081, 4082, 4083, 4084, 4085, 4086, 4086, 4087, 4088, 4089, 4089, 4090, 4091,
        4091, 4092, 4092, 4093, 4093, 4094, 4094, 4094, 4094, 4095, 4095, 4095, 4095, 4095, 4095, 4095,
    ],
    [
        710, 726, 742, 758, 775, 792, 809, 826, 844, 861, 879, 897, 915, 933, 952, 971,
        990, 1009, 1028, 1047, 1067, 1087, 1106, 1126, 1147, 1167, 1188, 1208, 1229, 1250, 1271, 1292,
        1314, 1335, 1357, 1379, 1400, 1423, 1445, 1467, 1489, 1512, 1534, 1557, 1580, 1602, 1625, 1648,
        1671, 1695, 1718, 1741, 1764, 1788, 1811, 1835, 1858, 1882, 1906, 1929, 1953, 1977, 2000, 2024,
        2048, 2069, 2095, 2119, 2143, 2166, 2190, 2214, 2237, 2261, 2284, 2308, 2331, 2355, 2378, 2401,
        2425, 2448, 2471, 2494, 2517, 2539, 2562, 2585, 2607, 2630, 2652, 2674, 2696, 2718, 2740, 2762,
        2783, 2805, 2826, 2847, 2868, 2889, 2910, 2931, 2951, 2971, 2991, 3011, 3031, 3051, 3070, 3089,
        3108, 3127, 3146, 3164, 3182, 3200, 3218, 3236, 3253, 3271, 3288, 3304, 3321, 3338, 3354, 3370,
    ],
    [
        0, 0, 0, 1, 1, 1, 2, 2, 3, 3, 3, 4, 4, 5, 5, 6,
        6, 7, 8, 8, 9, 10, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19,
        20, 22, 23, 24, 26, 27, 29, 30, 32, 34, 36, 38, 40, 42, 44, 46,
        49, 51, 53, 56, 59, 62, 65, 68, 71, 74, 77, 81, 84, 88, 92, 96,
        100, 104, 109, 113, 118, 122, 127, 132, 137, 143, 148, 154, 160, 165, 171, 178,
        184, 191, 197, 204, 211, 219, 226, 234, 241, 249, 257, 266, 274, 283, 292, 301,
        310, 319, 329, 339, 349, 359, 369, 380, 391, 402, 413, 424, 436, 448, 460, 472,
        484, 497, 510, 523, 536, 549, 563, 577, 591, 605, 619, 634, 648, 663, 679, 694,
    ],
];

/// Wave ROM images, already unscrambled.
#[derive(Debug, Clone, Default)]
pub struct WaveRoms {
    pub rom1: Vec<u8>,
    pub rom2: Vec<u8>,
    pub rom3: Vec<u8>,
    /// JV-880 expansion card.
    pub expansion: Vec<u8>,
}

#[inline(always)]
fn byte(rom: &[u8], index: usize) -> u8 {
    rom.get(index).copied().unwrap_or(0)
}

#[inline(always)]
fn same_nibble(a: i32, b: i32) -> bool {
    (a & 0xF_FFF0) == (b & 0xF_FFF0)
}

#[inline(always)]
fn same_address(a: i32, b: i32) -> bool {
    (a & 0xF_FFFF) == (b & 0xF_FFFF)
}

/// Applies a DPCM delta nibble to a sample, returning the shifted difference. Bit 0 of the
/// result is the carry into the accumulator.
#[inline(always)]
fn dpcm_shift(value: i32, nibble: i32) -> i32 {
    let shift = (10 - nibble) & 15;
    (value << 1) >> shift
}

/// Derives the low bits added to an envelope level and whether the level is written back this
/// tick, given the envelope update class.
#[inline(always)]
fn envelope_timing(kind: i32, tv_counter: i32, active: bool) -> (i32, bool) {
    let (top, period) = if kind & 4 != 0 {
        (0x8, None)
    } else {
        match kind & 3 {
            0 => (0x20, Some(3)),
            1 => (0x80, Some(15)),
            2 => (0x200, Some(63)),
            _ => (0x800, Some(127)),
        }
    };

    let mut addlow = 0;
    seq! {
        B in 0..4 {
            if tv_counter & (top >> B) != 0 {
                addlow |= 1 << B;
            }
        }
    }

    let write = !active || period.is_none_or(|p| tv_counter & p == 0);
    (addlow, write)
}

pub struct Pcm {
    model: Model,
    roms: WaveRoms,

    ram1: [[u32; 8]; SLOTS],
    ram2: [[u16; 16]; SLOTS],
    select_channel: u8,
    voice_mask: u32,
    voice_mask_pending: u32,
    voice_mask_updating: bool,
    write_latch: u32,
    read_latch: u32,
    wave_read_address: u32,
    wave_byte_latch: u8,
    config_3c: u8,
    config_3d: u8,
    irq_channel: u8,
    irq_assert: bool,
    /// Whether the first synthesis tick after reset has already happened.
    nfs: bool,
    tv_counter: i32,
    cycles: u64,
    effect_sends: [i32; 2],
}

impl Pcm {
    pub fn new(model: Model, roms: WaveRoms) -> Self {
        Self {
            model,
            roms,
            ram1: [[0; 8]; SLOTS],
            ram2: [[0; 16]; SLOTS],
            select_channel: 0,
            voice_mask: 0,
            voice_mask_pending: 0,
            voice_mask_updating: false,
            write_latch: 0,
            read_latch: 0,
            wave_read_address: 0,
            wave_byte_latch: 0,
            config_3c: 0,
            config_3d: 0,
            irq_channel: 0,
            irq_assert: false,
            nfs: false,
            tv_counter: 0,
            cycles: 0,
            effect_sends: [0; 2],
        }
    }

    pub fn reset(&mut self) {
        let roms = std::mem::take(&mut self.roms);
        *self = Self::new(self.model, roms);
    }

    /// Number of synthesis cycles elapsed.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Summed reverb and chorus sends of the last tick.
    pub fn effect_sends(&self) -> [i32; 2] {
        self.effect_sends
    }

    fn read_rom(&self, address: u32) -> u8 {
        let bank = if self.config_3d & 0x20 != 0 {
            (address >> 21) & 7
        } else {
            (address >> 19) & 7
        };

        let address = address as usize;
        let roms = &self.roms;
        match bank {
            0 if self.model.mk1 => byte(&roms.rom1, address & 0xF_FFFF),
            0 => byte(&roms.rom1, address & 0x1F_FFFF),
            1 if self.model.jv880 => byte(&roms.rom2, address & 0x1F_FFFF),
            1 => byte(&roms.rom2, address & 0xF_FFFF),
            // expansion card slot
            2 if self.model.jv880 => 0,
            2 => byte(&roms.rom3, address & 0xF_FFFF),
            3..=6 if self.model.jv880 => byte(
                &roms.expansion,
                (address & 0x1F_FFFF) + (bank as usize - 3) * 0x20_0000,
            ),
            _ => 0,
        }
    }

    fn ram1_index(offset: u8) -> usize {
        let mut index = 0;
        if offset & 0x20 != 0 {
            index |= 1;
        }
        if offset & 0x08 == 0 {
            index |= 4;
        }
        if offset & 0x04 == 0 {
            index |= 2;
        }

        index
    }

    fn ram2_index(offset: u8) -> usize {
        let index = (offset as usize >> 1) & 7;
        if offset & 0x20 != 0 { index | 8 } else { index }
    }

    /// Writes to a register of the engine.
    pub fn write(&mut self, offset: u8, data: u8) {
        let offset = offset & 0x3F;
        let data = data as u32;
        match offset {
            0x00..=0x03 => {
                let (shift, mask) = match offset {
                    0 => (24, 0xF),
                    1 => (16, 0xFF),
                    2 => (8, 0xFF),
                    _ => (0, 0xFF),
                };

                self.voice_mask_pending &= !(mask << shift);
                self.voice_mask_pending |= (data & mask) << shift;
                self.voice_mask_updating = true;
            }
            0x20..=0x23 => match offset & 3 {
                1 => self.wave_read_address = (self.wave_read_address & !0xFF_0000) | data << 16,
                2 => self.wave_read_address = (self.wave_read_address & !0xFF00) | data << 8,
                3 => {
                    self.wave_read_address = (self.wave_read_address & !0xFF) | data;
                    self.wave_byte_latch = self.read_rom(self.wave_read_address);
                }
                _ => (),
            },
            0x3C => self.config_3c = data as u8,
            0x3D => self.config_3d = data as u8,
            0x3E => self.select_channel = data as u8 & 0x1F,
            0x04..=0x0F | 0x24..=0x2F => {
                match offset & 3 {
                    1 => self.write_latch = (self.write_latch & !0xF_0000) | (data & 0xF) << 16,
                    2 => self.write_latch = (self.write_latch & !0xFF00) | data << 8,
                    3 => self.write_latch = (self.write_latch & !0xFF) | data,
                    _ => (),
                }

                if offset & 3 == 3 {
                    let index = Self::ram1_index(offset);
                    self.ram1[self.select_channel as usize][index] = self.write_latch;
                }
            }
            0x10..=0x1F | 0x30..=0x37 => {
                if offset & 1 == 0 {
                    self.write_latch = (self.write_latch & !0xFF00) | data << 8;
                } else {
                    self.write_latch = (self.write_latch & !0xFF) | data;

                    let index = Self::ram2_index(offset);
                    self.ram2[self.select_channel as usize][index] = self.write_latch as u16;
                }
            }
            _ => tracing::debug!("unknown pcm write {offset:02X} = {data:02X}"),
        }
    }

    /// Reads from a register of the engine.
    pub fn read(&mut self, offset: u8, irq: &mut impl InterruptSink) -> u8 {
        let offset = offset & 0x3F;
        match offset {
            0x00..=0x03 => {
                if self.voice_mask_updating {
                    self.voice_mask = self.voice_mask_pending;
                }

                self.voice_mask_updating = false;
                0
            }
            0x3C | 0x3E => {
                if offset == 0x3E && self.irq_assert {
                    self.irq_assert = false;
                    irq.request(Source::Irq0, false);
                }

                let updating = if self.voice_mask_updating { 0x20 } else { 0 };
                self.irq_channel | updating
            }
            0x3F => self.wave_byte_latch,
            0x04..=0x0F | 0x24..=0x2F => {
                if offset & 3 == 1 {
                    let index = Self::ram1_index(offset);
                    self.read_latch = self.ram1[self.select_channel as usize][index];
                }

                0
            }
            0x10..=0x1F | 0x30..=0x37 => {
                if offset & 1 == 0 {
                    let index = Self::ram2_index(offset);
                    self.read_latch = self.ram2[self.select_channel as usize][index] as u32;
                }

                0
            }
            0x39 => ((self.read_latch >> 16) & 0xF) as u8,
            0x3A => (self.read_latch >> 8) as u8,
            0x3B => self.read_latch as u8,
            _ => 0,
        }
    }

    #[inline(always)]
    fn sample(&self, hiaddr: i32, address: i32) -> i32 {
        self.read_rom(((hiaddr << 20) | address) as u32) as i8 as i32
    }

    fn step_noise(&mut self) {
        let shifter = &mut self.ram2[30][10];
        let step = |s: u16| {
            let feedback = (s ^ (s >> 1) ^ (s >> 7) ^ (s >> 12)) & 1;
            (s >> 1) | (feedback << 15)
        };

        *shifter = step(*shifter);
        if self.config_3c & 0x40 != 0 {
            *shifter = step(*shifter);
        }
    }

    /// Runs one slot through the pipeline: address generation, DPCM decoding, interpolation,
    /// filtering, envelopes and panning into the stereo accumulator.
    fn voice(&mut self, slot: usize, key: bool, irq: &mut impl InterruptSink) {
        let r7 = self.ram2[slot][7];
        let okey = r7 & 0x20 != 0;
        let active = okey && key;
        let kon = key && !okey;

        // address generator
        let b15 = self.ram2[slot][8] & 0x8000 != 0;
        let b6 = r7 & 0x40 != 0;
        let b7 = r7 & 0x80 != 0;
        let hiaddr = ((r7 >> 8) & 15) as i32;
        let old_nibble = ((r7 >> 12) & 15) as i32;

        let address = self.ram1[slot][4] as i32;
        let address_end = self.ram1[slot][0] as i32;
        let address_loop = self.ram1[slot][2] as i32;

        let cmp1 = if b15 { address_loop } else { address_end };
        let nibble_cmp1 = same_nibble(cmp1, address);

        let crossed = if kon {
            (cmp1 + address_loop) & 0x10_0000 != 0
        } else {
            (address + (address_loop.wrapping_neg() & 0xF_FFFF)) & 0x10_0000 != 0
        };
        let irq_flag = crossed ^ b7;

        let nibble_address = if !b6 && nibble_cmp1 {
            address_loop
        } else {
            address
        };

        let address_b4 = nibble_address & 0x10 != 0;
        let xor2 = address_b4 ^ b7;
        let check1 = xor2 && active;
        let xor1 = b15 ^ !nibble_cmp1;
        let nibble_add = if b6 {
            check1 && xor1
        } else {
            !nibble_cmp1 && check1
        };
        let nibble_subtract = b6 && !xor1 && active && !xor2;

        let wave_address =
            ((nibble_address >> 5) + nibble_add as i32 - nibble_subtract as i32) & 0xF_FFFF;
        let nibble_byte = self.read_rom(((hiaddr << 20) | wave_address) as u32) as i32;
        let new_nibble = if address_b4 ^ ((b6 || !nibble_cmp1) && okey) {
            (nibble_byte >> 4) & 15
        } else {
            nibble_byte & 15
        };

        let pitch = self.ram2[(r7 & 31) as usize][0] as i32;
        let sub_phase = (self.ram2[slot][8] & 0x3FFF) as i32;
        let interp_ratio = ((sub_phase >> 7) & 127) as usize;
        let sub_phase = sub_phase + pitch;
        let sub_phase_of = (sub_phase >> 14) & 7;
        self.ram2[slot][8] = (self.ram2[slot][8] & !0x3FFF) | (sub_phase & 0x3FFF) as u16;

        // walk up to four samples ahead, remembering where the voice ends up this tick
        let mut samples = [0i32; 4];
        let mut nibble_cmp = [false; 5];
        let mut counter = address;
        let mut counter_b15 = b15;

        samples[0] = self.sample(hiaddr, counter);
        nibble_cmp[0] = same_nibble(address, counter);
        let mut address_cmp = same_address(
            if counter_b15 { address_loop } else { address_end },
            counter,
        );

        let mut next_address = counter;
        let mut use_new = !nibble_cmp[0];
        let mut next_b15 = counter_b15;

        for step in 1..5 {
            let wrap = !b6 && address_cmp;
            let base = if wrap { address_loop } else { counter };
            let add = (!address_cmp && b6 && !counter_b15) || (!address_cmp && !b6);
            let sub = !address_cmp && b6 && counter_b15;
            let delta = add as i32 - sub as i32;
            let next = if b7 { base - delta } else { base + delta };
            counter = next & 0xF_FFFF;

            if step < 4 {
                counter_b15 = b6 && (counter_b15 ^ address_cmp);
                samples[step] = self.sample(hiaddr, counter);
            }

            nibble_cmp[step] = same_nibble(address, counter);
            if step < 4 {
                address_cmp = same_address(
                    if counter_b15 { address_loop } else { address_end },
                    counter,
                );
            }

            if sub_phase_of >= step as i32 {
                next_address = counter;
                use_new = !nibble_cmp[step];
                if step < 4 {
                    next_b15 = counter_b15;
                }
            }
        }

        if active && self.nfs {
            self.ram1[slot][4] = next_address as u32;
        }

        self.ram2[slot][8] = (self.ram2[slot][8] & !0x8000) | (next_b15 as u16) << 15;

        // dpcm
        let nibble = |i: usize| if nibble_cmp[i] { old_nibble } else { new_nibble };
        let mut reference = self.ram1[slot][5] as i32;
        for (i, &sample) in samples.iter().enumerate() {
            let shifted = dpcm_shift(sample << 10, nibble(i));
            if sub_phase_of > i as i32 {
                reference = addclip20(reference, shifted >> 1, shifted & 1);
            }
        }

        // interpolation
        let mut interpolated = self.ram1[slot][5] as i32;
        seq! {
            N in 0..3 {
                let step = multi(INTERP_LUT[N][interp_ratio] << 6, samples[N]) >> 8;
                let step = dpcm_shift(step, nibble(N));
                interpolated = addclip20(interpolated, step >> 1, step & 1);
            }
        }

        // filter
        let reg1 = self.ram1[slot][1] as i32;
        let reg3 = self.ram1[slot][3] as i32;
        let resonance = ((self.ram2[slot][6] >> 8) & 127) as i32;
        let filter = self.ram2[slot][11] as i32;

        let mult1 = multi(reg1, filter >> 8);
        let mult2 = multi(reg1, (filter >> 1) & 127);
        let mult3 = multi(reg1, resonance);
        let v2 = addclip20(reg3, mult1 >> 6, (mult1 >> 5) & 1);
        let v1 = addclip20(v2, mult2 >> 13, (mult2 >> 12) & 1);
        let subvar = addclip20(v1, mult3 >> 6, (mult3 >> 5) & 1);
        self.ram1[slot][3] = v1 as u32;

        let v3 = addclip20(interpolated, subvar ^ 0xF_FFFF, 1);
        let mult4 = multi(v3, filter >> 8);
        let mult5 = multi(v3, (filter >> 1) & 127);
        let v4 = addclip20(reg1, mult4 >> 6, (mult4 >> 5) & 1);
        let v5 = addclip20(v4, mult5 >> 13, (mult5 >> 12) & 1);
        self.ram1[slot][5] = reference as u32;
        self.ram1[slot][1] = v5 as u32;

        let nibble = if use_new || kon { new_nibble } else { old_nibble };
        self.ram2[slot][7] = (self.ram2[slot][7] & !0xF000) | (nibble as u16) << 12;

        if active
            && self.ram2[slot][6] & 1 != 0
            && self.ram2[slot][8] & 0x4000 == 0
            && !self.irq_assert
            && irq_flag
        {
            self.ram2[slot][8] |= 0x4000;
            self.irq_assert = true;
            self.irq_channel = slot as u8;
            irq.request(Source::Irq0, true);
        }

        // envelopes
        let mut volmul = [0i32; 2];
        for e in 0..3 {
            let adjust = self.ram2[slot][3 + e] as i32;
            let level = (self.ram2[slot][9 + e] & 0x7FFF) as i32;
            let speed = adjust & 0xFF;
            let target = (adjust >> 8) & 0xFF;

            let w1 = speed & 0xF0 == 0;
            let w2 = w1 || speed & 0x10 != 0;
            let w3 = self.nfs
                && (speed & 0x80 == 0
                    || (speed & 0x40 == 0 && (!w2 || speed & 0x20 == 0)));

            let mut kind = w2 as i32 | (w3 as i32) << 3;
            if speed & 0x20 != 0 {
                kind |= 2;
            }
            if speed & 0x80 == 0 || speed & 0x40 == 0 {
                kind |= 4;
            }

            let (addlow, write) = envelope_timing(kind, self.tv_counter, active);
            let tracks = e != 2 || active;

            if kind & 8 == 0 {
                let shift = (10 - (speed & 15)) & 15;
                let mut sum1 = target << 11;
                if tracks {
                    sum1 -= level << 4;
                }

                let shifted = (sum1 >> shift) - sum1;
                let sum2 = (target << 11) + addlow + shifted;
                if write {
                    self.ram2[slot][9 + e] = ((sum2 >> 4) & 0x7FFF) as u16;
                }

                if e < 2 {
                    volmul[e] = (sum2 >> 4) & 0x7FFE;
                }
            } else {
                let shift = (10 - (((speed >> 4) & 14) | w2 as i32)) & 15;
                let mut sum1 = target << 11;
                if tracks {
                    sum1 -= level << 4;
                }

                let neg = sum1 & 0x8_0000 != 0;
                let mut preshift = (speed & 15) << 9;
                if !w1 {
                    preshift |= 0x2000;
                }
                if neg {
                    preshift ^= !0x3F;
                }

                let mut sum2 = preshift >> shift;
                if tracks {
                    sum2 += (level << 4) | addlow;
                }

                let sum2_l = sum2 >> 4;
                let sum3 = (target << 11) - (sum2_l << 4);
                let neg2 = sum3 & 0x8_0000 != 0;
                let reached = neg2 == neg;

                if write {
                    self.ram2[slot][9 + e] = if reached {
                        (sum2_l & 0x7FFF) as u16
                    } else {
                        (target << 7) as u16
                    };
                }

                if e == 0 {
                    volmul[0] = sum2_l & 0x7FFE;
                } else if e == 1 {
                    volmul[1] = if reached { sum2_l & 0x7FFE } else { target << 7 };
                }
            }
        }

        // volume
        let sample = if self.ram2[slot][6] & 2 == 0 {
            self.ram1[slot][3] as i32
        } else {
            v3
        };

        let mut sample = sample;
        for volmul in volmul {
            let high = multi(sample, volmul >> 8);
            let low = multi(sample, (volmul >> 1) & 127);
            sample = addclip20(high >> 6, low >> 13, ((low >> 12) | (high >> 5)) & 1);
        }

        // pan and effect sends
        let pan = if active { self.ram2[slot][1] as i32 } else { 0 };
        let sends = if active { self.ram2[slot][2] as i32 } else { 0 };

        let left = multi(sample, (pan >> 8) & 255);
        let right = multi(sample, pan & 255);
        for (i, send) in [(sends >> 8) & 255, sends & 255].into_iter().enumerate() {
            let send = multi(sample, send);
            self.effect_sends[i] = addclip20(self.effect_sends[i], send >> 6, (send >> 5) & 1);
        }

        let acc = &mut self.ram1[31];
        acc[1] = addclip20(acc[1] as i32, left >> 6, (left >> 5) & 1) as u32;
        acc[3] = addclip20(acc[3] as i32, right >> 6, (right >> 5) & 1) as u32;

        self.ram2[slot][7] = (self.ram2[slot][7] & !0x20) | (key as u16) << 5;
        if !active {
            if self.nfs {
                self.ram1[slot][1] = 0;
                self.ram1[slot][3] = 0;
                self.ram1[slot][5] = 0;
            }

            self.ram2[slot][8] = 0;
            self.ram2[slot][9] = 0;
            self.ram2[slot][10] = 0;
        }
    }

    /// Runs synthesis ticks until the engine catches up with the main core cycle counter,
    /// posting one stereo sample per tick.
    pub fn update(
        &mut self,
        cycles: u64,
        irq: &mut impl InterruptSink,
        sink: &mut impl SampleSink,
    ) {
        let slots = (self.config_3d & 31) as usize + 1;
        let voice_active = self.voice_mask & self.voice_mask_pending;

        while self.cycles < cycles {
            self.step_noise();

            // global envelope counter
            if !self.nfs {
                self.tv_counter = self.ram2[31][8] as i32;
            }
            self.tv_counter = (self.tv_counter + 1) & 0x3FFF;

            self.ram1[31][1] = 0;
            self.ram1[31][3] = 0;
            self.effect_sends = [0; 2];

            for slot in 0..slots {
                let key = (voice_active >> slot) & 1 != 0;
                self.voice(slot, key, irq);
            }

            let output = |acc: u32| {
                let value = (((acc << 12) as i32) >> 16) << 2;
                value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
            };

            sink.post_sample(output(self.ram1[31][1]), output(self.ram1[31][3]));

            self.nfs = true;
            self.cycles += (slots as u64 + 1) * 25;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::irq::Interrupts;

    #[test]
    fn addclip20_saturates() {
        assert_eq!(addclip20(0x7_FFFF, 1, 0), 0x7_FFFF);
        assert_eq!(addclip20(0x8_0000, 0xF_FFFF, 0), 0x8_0000);
        assert_eq!(addclip20(0x8_0000, 0x8_0000, 0), 0x8_0000);
        assert_eq!(addclip20(0x7_FFFE, 0, 1), 0x7_FFFF);
        assert_eq!(addclip20(0xF_FFFF, 1, 0), 0);
        assert_eq!(addclip20(0x1234, -0x34, 0), 0x1200);
    }

    #[test]
    fn addclip20_is_commutative() {
        let values = [0, 1, 0x3_FFFF, 0x7_FFFF, 0x8_0000, 0xC_0000, 0xF_FFFF, -5, 0x1_2345];
        for &a in &values {
            for &b in &values {
                for cin in 0..2 {
                    assert_eq!(addclip20(a, b, cin), addclip20(b, a, cin), "{a:X} {b:X}");
                }
            }
        }
    }

    #[test]
    fn multi_truncates_and_sign_extends() {
        assert_eq!(multi(2, 3), 6);
        assert_eq!(multi(0xF_FFFF, 3), -3);
        // multiplier is truncated to 8 bits
        assert_eq!(multi(2, 0x180), -256);
        assert_eq!(multi(0x7_FFFF, 127), 0x7_FFFF * 127 & 0x1FF_FFFF);
    }

    #[test]
    fn envelope_timing_classes() {
        assert_eq!(envelope_timing(4, 0b1010, true), (0b0101, true));
        assert_eq!(envelope_timing(0, 0x25, true), (0b1001, false));
        assert_eq!(envelope_timing(0, 0x25, false), (0b1001, true));
        assert_eq!(envelope_timing(3, 0x880, true), (0b0001, true));
    }

    #[test]
    fn register_interface() {
        let mut pcm = Pcm::new(Model::default(), WaveRoms::default());
        let mut irq = Interrupts::default();

        pcm.write(0x3E, 5);
        pcm.write(0x05, 0x0A);
        pcm.write(0x06, 0xBC);
        pcm.write(0x07, 0xDE);
        assert_eq!(pcm.ram1[5][Pcm::ram1_index(0x07)], 0xA_BCDE);

        pcm.read(0x05, &mut irq);
        assert_eq!(pcm.read(0x39, &mut irq), 0x0A);
        assert_eq!(pcm.read(0x3A, &mut irq), 0xBC);
        assert_eq!(pcm.read(0x3B, &mut irq), 0xDE);

        pcm.write(0x36, 0x12);
        pcm.write(0x37, 0x34);
        assert_eq!(pcm.ram2[5][11], 0x1234);

        pcm.write(0x03, 0x81);
        assert_eq!(pcm.read(0x3C, &mut irq), 0x20);
        pcm.read(0x00, &mut irq);
        assert_eq!(pcm.voice_mask, 0x81);
        assert_eq!(pcm.read(0x3C, &mut irq), 0x00);
    }

    #[test]
    fn wave_rom_latch() {
        let roms = WaveRoms {
            rom1: (0..=255).collect(),
            ..Default::default()
        };

        let mut pcm = Pcm::new(Model::default(), roms);
        let mut irq = Interrupts::default();
        pcm.write(0x21, 0x00);
        pcm.write(0x22, 0x00);
        pcm.write(0x23, 0x42);
        assert_eq!(pcm.read(0x3F, &mut irq), 0x42);

        // second bank is empty
        pcm.write(0x21, 0x08);
        pcm.write(0x23, 0x42);
        assert_eq!(pcm.read(0x3F, &mut irq), 0x00);
    }

    fn write_ram2(pcm: &mut Pcm, index: u8, value: u16) {
        let offset = if index < 8 {
            0x10 + index * 2
        } else {
            0x30 + (index - 8) * 2
        };

        let [high, low] = value.to_be_bytes();
        pcm.write(offset, high);
        pcm.write(offset + 1, low);
    }

    #[test]
    fn keyed_voice_produces_output() {
        let roms = WaveRoms {
            rom1: vec![0x11; 0x100],
            ..Default::default()
        };

        let mut pcm = Pcm::new(Model::default(), roms);
        let mut irq = Interrupts::default();
        let mut samples = vec![];
        let mut sink = |l: i16, r: i16| samples.push((l, r));

        // single slot, voice 0: pitch of one sample per tick, instant envelopes at full level,
        // centered pan and unfiltered output
        pcm.write(0x3D, 0x00);
        pcm.write(0x3E, 0x00);
        write_ram2(&mut pcm, 0, 0x4000);
        write_ram2(&mut pcm, 1, 0x4040);
        write_ram2(&mut pcm, 3, 0xFFCA);
        write_ram2(&mut pcm, 4, 0xFFCA);
        write_ram2(&mut pcm, 6, 0x0002);

        pcm.write(0x03, 0x01);
        pcm.read(0x00, &mut irq);

        pcm.update(64 * 50, &mut irq, &mut sink);
        drop(sink);
        assert_eq!(samples.len(), 64);

        let (left, right) = *samples.last().unwrap();
        assert_ne!(left, 0);
        assert_eq!(left, right);
        assert!(!irq.is_pending(Source::Irq0));

        // key off
        pcm.write(0x03, 0x00);
        pcm.read(0x00, &mut irq);

        samples.clear();
        let mut sink = |l: i16, r: i16| samples.push((l, r));
        pcm.update(70 * 50, &mut irq, &mut sink);
        drop(sink);
        assert_eq!(samples.len(), 6);
        assert!(samples.iter().all(|&s| s == (0, 0)));
    }

    #[test]
    fn reset_keeps_roms() {
        let roms = WaveRoms {
            rom1: vec![0x42; 16],
            ..Default::default()
        };

        let mut pcm = Pcm::new(Model::default(), roms);
        pcm.write(0x3C, 0x40);
        pcm.reset();
        assert_eq!(pcm.config_3c, 0);
        assert_eq!(pcm.read_rom(3), 0x42);
    }
}
