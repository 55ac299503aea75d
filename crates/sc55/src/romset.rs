//! Supported hardware variants and their ROM images.

use crate::pcm::WaveRoms;
use bytesize::ByteSize;
use easyerr::{Error, ResultExt};
use std::path::Path;
use strum::{EnumString, IntoStaticStr, VariantArray};

pub const ROM1_LEN: usize = 0x8000;
pub const ROM2_LEN: usize = 0x80000;
pub const SUB_ROM_LEN: usize = crate::sub::ROM_LEN;

const MIB: usize = 0x100000;

/// A hardware variant, identified by the set of ROM files it needs.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, VariantArray, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Romset {
    #[default]
    Mk2,
    St,
    Mk1,
    Cm300,
    Jv880,
    Scb55,
    Rlp3237,
    Sc155,
    Sc155Mk2,
}

/// Board level differences between variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Model {
    /// First generation board: alternate I/O decoding, three 1 MiB wave ROMs and MIDI through
    /// the main core serial port.
    pub mk1: bool,
    pub cm300: bool,
    pub st: bool,
    pub jv880: bool,
    /// No sub-core, the second wave ROM lands in the third bank.
    pub scb55: bool,
    pub sc155: bool,
}

impl Model {
    /// Output sample rate in Hz.
    pub fn sample_rate(self) -> u32 {
        if self.mk1 || self.jv880 { 64000 } else { 66207 }
    }
}

/// Role of a file in a romset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Rom1,
    Rom2,
    Wave1,
    Wave2,
    /// Third wave ROM, JV-880 expansion card or sub-core ROM depending on the variant.
    Extra,
}

impl Romset {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mk2 => "SC-55mk2",
            Self::St => "SC-55st",
            Self::Mk1 => "SC-55mk1",
            Self::Cm300 => "CM-300/SCC-1",
            Self::Jv880 => "JV-880",
            Self::Scb55 => "SCB-55",
            Self::Rlp3237 => "RLP-3237",
            Self::Sc155 => "SC-155",
            Self::Sc155Mk2 => "SC-155mk2",
        }
    }

    /// Files of this romset, in slot order.
    fn files(self) -> [Option<&'static str>; 5] {
        match self {
            Self::Mk2 | Self::Sc155Mk2 => [
                Some("rom1.bin"),
                Some("rom2.bin"),
                Some("waverom1.bin"),
                Some("waverom2.bin"),
                Some("rom_sm.bin"),
            ],
            Self::St => [
                Some("rom1.bin"),
                Some("rom2_st.bin"),
                Some("waverom1.bin"),
                Some("waverom2.bin"),
                Some("rom_sm.bin"),
            ],
            Self::Mk1 => [
                Some("sc55_rom1.bin"),
                Some("sc55_rom2.bin"),
                Some("sc55_waverom1.bin"),
                Some("sc55_waverom2.bin"),
                Some("sc55_waverom3.bin"),
            ],
            Self::Cm300 => [
                Some("cm300_rom1.bin"),
                Some("cm300_rom2.bin"),
                Some("cm300_waverom1.bin"),
                Some("cm300_waverom2.bin"),
                Some("cm300_waverom3.bin"),
            ],
            Self::Jv880 => [
                Some("jv880_rom1.bin"),
                Some("jv880_rom2.bin"),
                Some("jv880_waverom1.bin"),
                Some("jv880_waverom2.bin"),
                Some("jv880_waverom_expansion.bin"),
            ],
            Self::Scb55 => [
                Some("scb55_rom1.bin"),
                Some("scb55_rom2.bin"),
                Some("scb55_waverom1.bin"),
                Some("scb55_waverom2.bin"),
                None,
            ],
            Self::Rlp3237 => [
                Some("rlp3237_rom1.bin"),
                Some("rlp3237_rom2.bin"),
                Some("rlp3237_waverom1.bin"),
                None,
                None,
            ],
            Self::Sc155 => [
                Some("sc155_rom1.bin"),
                Some("sc155_rom2.bin"),
                Some("sc155_waverom1.bin"),
                Some("sc155_waverom2.bin"),
                Some("sc155_waverom3.bin"),
            ],
        }
    }

    pub fn model(self) -> Model {
        let mut model = Model::default();
        match self {
            Self::Mk2 => (),
            Self::Sc155Mk2 => model.sc155 = true,
            Self::St => model.st = true,
            Self::Mk1 => model.mk1 = true,
            Self::Sc155 => {
                model.mk1 = true;
                model.sc155 = true;
            }
            Self::Cm300 => {
                model.mk1 = true;
                model.cm300 = true;
            }
            Self::Jv880 => model.jv880 = true,
            Self::Scb55 | Self::Rlp3237 => model.scb55 = true,
        }

        model
    }

    /// Returns the first romset whose files are all present in `dir`.
    pub fn detect(dir: &Path) -> Option<Self> {
        let found = Self::VARIANTS.iter().copied().find(|romset| {
            romset
                .files()
                .into_iter()
                .flatten()
                .all(|file| dir.join(file).is_file())
        });

        if let Some(romset) = found {
            tracing::info!("detected romset {}", romset.name());
        }

        found
    }
}

#[derive(Debug, Error)]
pub enum RomError {
    #[error("no romset found")]
    NoRomset,
    #[error("missing required ROM files: {files}")]
    Missing { files: String },
    #[error("{file} is too small: expected {expected}, found {found}")]
    Size {
        file: String,
        expected: ByteSize,
        found: ByteSize,
    },
    #[error(transparent)]
    Io { source: std::io::Error },
}

/// Fixed address line permutation of the wave ROMs.
const ADDRESS_LINES: [u32; 20] = [
    2, 0, 3, 4, 1, 9, 13, 10, 18, 17, 6, 15, 11, 16, 8, 5, 12, 7, 14, 19,
];

/// Fixed data line permutation of the wave ROMs.
const DATA_LINES: [u32; 8] = [2, 0, 4, 5, 7, 6, 3, 1];

/// Undoes the address and data line scrambling of a wave ROM. Address bits above the low 20
/// are kept as they are.
pub fn unscramble(src: &[u8]) -> Vec<u8> {
    (0..src.len())
        .map(|i| {
            let mut address = i & !0xF_FFFF;
            for (bit, line) in ADDRESS_LINES.iter().enumerate() {
                if i & (1 << bit) != 0 {
                    address |= 1 << line;
                }
            }

            let raw = src.get(address).copied().unwrap_or(0);
            let mut data = 0;
            for (bit, line) in DATA_LINES.iter().enumerate() {
                if raw & (1 << line) != 0 {
                    data |= 1 << bit;
                }
            }

            data
        })
        .collect()
}

/// Every image a unit boots from.
#[derive(Debug, Clone)]
pub struct RomImages {
    pub rom1: Vec<u8>,
    /// Paged program ROM. Its length is a power of two.
    pub rom2: Vec<u8>,
    pub waves: WaveRoms,
    pub sub: Option<Vec<u8>>,
}

/// Truncates `data` to `len` bytes, failing if it is shorter.
fn exact(file: &str, mut data: Vec<u8>, len: usize) -> Result<Vec<u8>, RomError> {
    if data.len() < len {
        return Err(RomError::Size {
            file: file.to_owned(),
            expected: ByteSize(len as u64),
            found: ByteSize(data.len() as u64),
        });
    }

    data.truncate(len);
    Ok(data)
}

impl RomImages {
    /// Loads the images of `romset` from `dir`.
    pub fn load(dir: &Path, romset: Romset) -> Result<Self, RomError> {
        let model = romset.model();
        let slots = [Slot::Rom1, Slot::Rom2, Slot::Wave1, Slot::Wave2, Slot::Extra];

        let mut missing = vec![];
        let mut files: [Option<(&str, Vec<u8>)>; 5] = Default::default();
        for ((slot, file), loaded) in slots.into_iter().zip(romset.files()).zip(&mut files) {
            let Some(file) = file else {
                continue;
            };

            let path = dir.join(file);
            if !path.is_file() {
                let optional = model.jv880 && slot == Slot::Extra;
                if !optional {
                    missing.push(path.display().to_string());
                }

                continue;
            }

            *loaded = Some((file, std::fs::read(&path).context(RomCtx::Io)?));
        }

        if !missing.is_empty() {
            return Err(RomError::Missing {
                files: missing.join(", "),
            });
        }

        let [rom1, rom2, wave1, wave2, extra] = files;
        let Some((rom1_file, rom1)) = rom1 else {
            unreachable!("rom1 is always required")
        };
        let Some((rom2_file, mut rom2)) = rom2 else {
            unreachable!("rom2 is always required")
        };

        let rom1 = exact(rom1_file, rom1, ROM1_LEN)?;
        rom2.truncate(ROM2_LEN);
        if rom2.len() != ROM2_LEN && rom2.len() != ROM2_LEN / 2 {
            return Err(RomError::Size {
                file: rom2_file.to_owned(),
                expected: ByteSize(ROM2_LEN as u64),
                found: ByteSize(rom2.len() as u64),
            });
        }

        let wave = |loaded: Option<(&str, Vec<u8>)>, len: usize| -> Result<Vec<u8>, RomError> {
            match loaded {
                Some((file, data)) => Ok(unscramble(&exact(file, data, len)?)),
                None => Ok(vec![]),
            }
        };

        let mut waves = WaveRoms::default();
        let mut sub = None;
        if model.mk1 {
            waves.rom1 = wave(wave1, MIB)?;
            waves.rom2 = wave(wave2, MIB)?;
            waves.rom3 = wave(extra, MIB)?;
        } else if model.jv880 {
            waves.rom1 = wave(wave1, 2 * MIB)?;
            waves.rom2 = wave(wave2, 2 * MIB)?;
            match extra {
                Some((_, mut data)) => {
                    data.resize(8 * MIB, 0);
                    waves.expansion = unscramble(&data);
                }
                None => tracing::info!("no expansion wave ROM, skipping it"),
            }
        } else {
            waves.rom1 = wave(wave1, 2 * MIB)?;
            let second = wave(wave2, MIB)?;
            if model.scb55 {
                waves.rom3 = second;
            } else {
                waves.rom2 = second;
            }

            if let Some((file, data)) = extra {
                sub = Some(exact(file, data, SUB_ROM_LEN)?);
            }
        }

        tracing::info!(
            "loaded {} (rom2: {})",
            romset.name(),
            ByteSize(rom2.len() as u64)
        );

        Ok(Self {
            rom1,
            rom2,
            waves,
            sub,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unscramble_golden() {
        let mut src = vec![0; 2 * MIB];
        src[0] = 0xFF;
        // address bit 0 is wired to line 2, data line 2 to bit 0
        src[4] = 0b0000_0100;
        // address bit 19 is unchanged, data line 7 goes to bit 4
        src[0x80000] = 0x80;
        // address bit 4 is wired to line 1, data line 1 to bit 7
        src[0x2] = 0b0000_0010;
        // upper address bits are kept
        src[MIB + 4] = 0b0000_0001;

        let dst = unscramble(&src);
        assert_eq!(dst.len(), src.len());
        assert_eq!(dst[0], 0xFF);
        assert_eq!(dst[1], 0x01);
        assert_eq!(dst[0x80000], 0x10);
        assert_eq!(dst[0x10], 0x80);
        assert_eq!(dst[MIB + 1], 0x02);
        assert_eq!(dst.iter().filter(|&&b| b != 0).count(), 5);
    }

    #[test]
    fn unscramble_is_a_permutation() {
        let src: Vec<u8> = (0..MIB).map(|i| (i * 7 + (i >> 8)) as u8).collect();
        let dst = unscramble(&src);

        let mut src_hist = [0usize; 8];
        let mut dst_hist = [0usize; 8];
        for (s, d) in src.iter().zip(&dst) {
            src_hist[s.count_ones() as usize % 8] += 1;
            dst_hist[d.count_ones() as usize % 8] += 1;
        }

        assert_eq!(src_hist, dst_hist);
        assert_ne!(src, dst);
    }

    #[test]
    fn models() {
        assert!(Romset::Sc155.model().mk1);
        assert!(Romset::Sc155.model().sc155);
        assert!(Romset::Cm300.model().cm300);
        assert!(Romset::Rlp3237.model().scb55);
        assert!(!Romset::Mk2.model().mk1);

        assert_eq!(Romset::Jv880.model().sample_rate(), 64000);
        assert_eq!(Romset::St.model().sample_rate(), 66207);
        assert_eq!("sc155mk2".parse::<Romset>().ok(), Some(Romset::Sc155Mk2));
    }

    #[test]
    fn missing_files_are_collected() {
        let dir = std::env::temp_dir().join("sc55-romset-missing");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("scb55_rom1.bin"), vec![0; ROM1_LEN]).unwrap();

        let Err(RomError::Missing { files }) = RomImages::load(&dir, Romset::Scb55) else {
            panic!("expected missing files");
        };

        assert!(files.contains("scb55_rom2.bin"));
        assert!(files.contains("scb55_waverom2.bin"));
        assert!(!files.contains("scb55_rom1.bin"));
        assert_eq!(files.matches(", ").count(), 2);
    }
}
