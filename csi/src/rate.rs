//! The `rate_n_flags` word (firmware API version 2).
//!
//! The same 32-bit layout is reported in every CSI capture header and is
//! handed to the driver when injecting frames:
//!
//! | Bits  | Meaning                                                    |
//! |-------|------------------------------------------------------------|
//! | 3:0   | MCS (bits 2:0 for legacy and HT, 3:0 for VHT/HE/EHT)       |
//! | 4     | second spatial stream (HT/VHT/HE/EHT)                      |
//! | 10:8  | format: CCK, legacy OFDM, HT, VHT, HE, EHT                 |
//! | 13:11 | channel width: 20, 40, 80, 160, 320 MHz                    |
//! | 15:14 | antenna mask                                               |
//! | 16    | LDPC (HT/VHT/HE/EHT)                                       |
//! | 22:20 | guard interval (HT/VHT: bit 20 only) or HE LTF/GI code     |
//! | 24:23 | HE PPDU type                                               |
//!
//! [Kernel source](https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git/tree/drivers/net/wireless/intel/iwlwifi/fw/api/rs.h)

use std::{fmt, str::FromStr};

use crate::ieee80211::Bandwidth;

const MCS_MASK: u32 = 0xf;
const NSS_MSK: u32 = 1 << 4;
const FORMAT_POS: u32 = 8;
const FORMAT_MASK: u32 = 0x7 << FORMAT_POS;
const WIDTH_POS: u32 = 11;
const WIDTH_MASK: u32 = 0x7 << WIDTH_POS;
const ANT_POS: u32 = 14;
const ANT_MASK: u32 = 0x3 << ANT_POS;
const LDPC_MSK: u32 = 1 << 16;
const GI_LTF_POS: u32 = 20;
const GI_LTF_MASK: u32 = 0x7 << GI_LTF_POS;
const SGI_MSK: u32 = 1 << GI_LTF_POS;
const HE_TYPE_POS: u32 = 23;
const HE_TYPE_MASK: u32 = 0x3 << HE_TYPE_POS;

/// Error returned when decoding a `rate_n_flags` word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unknown format tag {0}")]
    UnknownFormat(u32),
    #[error("unknown channel width code {0}")]
    UnknownWidth(u32),
    /// The HE LTF/GI field holds one of the reserved codes 5..=7.
    #[error("unknown HE LTF/GI code {0}")]
    UnknownHeLtf(u32),
}

/// Frame format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Format {
    Cck,
    /// Legacy OFDM (802.11a/g), called `NOHT` on the command line.
    LegacyOfdm,
    /// 802.11n.
    Ht,
    /// 802.11ac.
    Vht,
    /// 802.11ax.
    He,
    /// 802.11be.
    Eht,
}

impl Format {
    pub const fn tag(self) -> u32 {
        match self {
            Format::Cck => 0,
            Format::LegacyOfdm => 1,
            Format::Ht => 2,
            Format::Vht => 3,
            Format::He => 4,
            Format::Eht => 5,
        }
    }

    pub const fn from_tag(tag: u32) -> Option<Self> {
        Some(match tag {
            0 => Format::Cck,
            1 => Format::LegacyOfdm,
            2 => Format::Ht,
            3 => Format::Vht,
            4 => Format::He,
            5 => Format::Eht,
            _ => return None,
        })
    }

    /// Mask of the MCS field for this format.
    pub const fn mcs_mask(self) -> u8 {
        match self {
            Format::Cck | Format::LegacyOfdm | Format::Ht => 0x7,
            Format::Vht | Format::He | Format::Eht => 0xf,
        }
    }

    /// Whether the spatial stream and LDPC bits are defined.
    pub const fn is_mimo(self) -> bool {
        !matches!(self, Format::Cck | Format::LegacyOfdm)
    }
}

/// Error returned when parsing a format, LTF kind or coding name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} {name:?}")]
pub struct ParseError {
    kind: &'static str,
    name: String,
}

impl FromStr for Format {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NOHT" => Ok(Format::LegacyOfdm),
            "HT" => Ok(Format::Ht),
            "VHT" => Ok(Format::Vht),
            "HESU" | "HE" => Ok(Format::He),
            "EHT" => Ok(Format::Eht),
            _ => Err(ParseError {
                kind: "format",
                name: s.to_owned(),
            }),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Cck => "CCK",
            Format::LegacyOfdm => "NOHT",
            Format::Ht => "HT",
            Format::Vht => "VHT",
            Format::He => "HESU",
            Format::Eht => "EHT",
        })
    }
}

bitflags::bitflags! {
    /// Transmit antenna mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Antennas: u8 {
        const A = 0b01;
        const B = 0b10;
    }
}

/// Guard interval of HT and VHT frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum GuardInterval {
    /// 0.8 µs.
    Long,
    /// 0.4 µs.
    Short,
}

impl GuardInterval {
    pub const fn from_ns(ns: u16) -> Option<Self> {
        match ns {
            800 => Some(GuardInterval::Long),
            400 => Some(GuardInterval::Short),
            _ => None,
        }
    }

    pub const fn ns(self) -> u16 {
        match self {
            GuardInterval::Long => 800,
            GuardInterval::Short => 400,
        }
    }
}

/// HE long training field size and guard interval.
///
/// This is one enumerated value. `4xLTF+3.2` and `4xLTF+0.8` share the LTF
/// size and differ only in the top bit of the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum HeLtf {
    Ltf1xGi08,
    Ltf2xGi08,
    Ltf2xGi16,
    Ltf4xGi32,
    Ltf4xGi08,
}

impl HeLtf {
    const NAMES: [(HeLtf, &'static str); 5] = [
        (HeLtf::Ltf1xGi08, "1xLTF+0.8"),
        (HeLtf::Ltf2xGi08, "2xLTF+0.8"),
        (HeLtf::Ltf2xGi16, "2xLTF+1.6"),
        (HeLtf::Ltf4xGi32, "4xLTF+3.2"),
        (HeLtf::Ltf4xGi08, "4xLTF+0.8"),
    ];

    pub const fn code(self) -> u32 {
        match self {
            HeLtf::Ltf1xGi08 => 0,
            HeLtf::Ltf2xGi08 => 1,
            HeLtf::Ltf2xGi16 => 2,
            HeLtf::Ltf4xGi32 => 3,
            HeLtf::Ltf4xGi08 => 4,
        }
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => HeLtf::Ltf1xGi08,
            1 => HeLtf::Ltf2xGi08,
            2 => HeLtf::Ltf2xGi16,
            3 => HeLtf::Ltf4xGi32,
            4 => HeLtf::Ltf4xGi08,
            _ => return None,
        })
    }
}

impl FromStr for HeLtf {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(ltf, _)| *ltf)
            .ok_or_else(|| ParseError {
                kind: "LTF",
                name: s.to_owned(),
            })
    }
}

impl fmt::Display for HeLtf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, name) = Self::NAMES[self.code() as usize];
        f.write_str(name)
    }
}

/// HE PPDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum HeType {
    Su,
    ExtSu,
    Mu,
    Trigger,
}

impl HeType {
    const fn code(self) -> u32 {
        match self {
            HeType::Su => 0,
            HeType::ExtSu => 1,
            HeType::Mu => 2,
            HeType::Trigger => 3,
        }
    }

    const fn from_code(code: u32) -> Self {
        match code & 0x3 {
            0 => HeType::Su,
            1 => HeType::ExtSu,
            2 => HeType::Mu,
            _ => HeType::Trigger,
        }
    }
}

/// Forward error correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Coding {
    Bcc,
    Ldpc,
}

impl FromStr for Coding {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BCC" => Ok(Coding::Bcc),
            "LDPC" => Ok(Coding::Ldpc),
            _ => Err(ParseError {
                kind: "coding",
                name: s.to_owned(),
            }),
        }
    }
}

/// Meaning of bits 22:20, which depends on the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Guard {
    /// CCK, legacy OFDM and EHT. The field is not decoded.
    Unspecified,
    /// HT and VHT.
    Gi(GuardInterval),
    /// HE.
    He { ltf: HeLtf, kind: HeType },
}

/// Decoded `rate_n_flags`.
///
/// ```
/// # use csi::{ieee80211::Bandwidth, rate::*};
/// let rate = RateDescriptor {
///     format: Format::Vht,
///     mcs: 9,
///     antennas: Antennas::A | Antennas::B,
///     bandwidth: Bandwidth::Bw80,
///     streams: 2,
///     guard: Guard::Gi(GuardInterval::Short),
///     coding: Coding::Ldpc,
/// };
/// let word = rate.encode();
/// assert_eq!(word, 0x0001_d319 | 1 << 20);
/// assert_eq!(RateDescriptor::decode(word), Ok(rate));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct RateDescriptor {
    pub format: Format,
    /// MCS index, or the rate index for legacy formats.
    pub mcs: u8,
    pub antennas: Antennas,
    pub bandwidth: Bandwidth,
    /// Number of spatial streams, 1 or 2. Always 1 for legacy formats.
    pub streams: u8,
    pub guard: Guard,
    /// Always [`Coding::Bcc`] for legacy formats.
    pub coding: Coding,
}

/// Extracts the format without decoding anything else.
pub const fn format_of(word: u32) -> Option<Format> {
    Format::from_tag((word & FORMAT_MASK) >> FORMAT_POS)
}

/// Extracts the channel width without decoding anything else.
pub const fn bandwidth_of(word: u32) -> Option<Bandwidth> {
    bandwidth_from_code((word & WIDTH_MASK) >> WIDTH_POS)
}

const fn bandwidth_code(bw: Bandwidth) -> u32 {
    match bw {
        Bandwidth::Bw20 => 0,
        Bandwidth::Bw40 => 1,
        Bandwidth::Bw80 => 2,
        Bandwidth::Bw160 => 3,
        Bandwidth::Bw320 => 4,
    }
}

const fn bandwidth_from_code(code: u32) -> Option<Bandwidth> {
    Some(match code {
        0 => Bandwidth::Bw20,
        1 => Bandwidth::Bw40,
        2 => Bandwidth::Bw80,
        3 => Bandwidth::Bw160,
        4 => Bandwidth::Bw320,
        _ => return None,
    })
}

impl RateDescriptor {
    /// Encodes into a `rate_n_flags` word.
    ///
    /// The MCS is masked to the width of the format's MCS field, so an
    /// out-of-range index is silently truncated. A guard that does not belong
    /// to the format is not encoded.
    pub fn encode(&self) -> u32 {
        let mut word = self.format.tag() << FORMAT_POS;
        word |= (self.mcs & self.format.mcs_mask()) as u32;
        word |= (self.antennas.bits() as u32) << ANT_POS & ANT_MASK;
        word |= bandwidth_code(self.bandwidth) << WIDTH_POS;

        if self.format.is_mimo() {
            if self.streams >= 2 {
                word |= NSS_MSK;
            }
            if self.coding == Coding::Ldpc {
                word |= LDPC_MSK;
            }
        }

        match (self.format, self.guard) {
            (Format::Ht | Format::Vht, Guard::Gi(GuardInterval::Short)) => word |= SGI_MSK,
            (Format::He, Guard::He { ltf, kind }) => {
                word |= ltf.code() << GI_LTF_POS & GI_LTF_MASK;
                word |= kind.code() << HE_TYPE_POS;
            }
            _ => {}
        }

        word
    }

    /// Decodes a `rate_n_flags` word.
    ///
    /// The format tag is read first and decides which of the remaining bits
    /// are looked at.
    pub fn decode(word: u32) -> Result<Self, Error> {
        let tag = (word & FORMAT_MASK) >> FORMAT_POS;
        let format = Format::from_tag(tag).ok_or(Error::UnknownFormat(tag))?;
        let width = (word & WIDTH_MASK) >> WIDTH_POS;
        let bandwidth = bandwidth_from_code(width).ok_or(Error::UnknownWidth(width))?;
        let antennas = Antennas::from_bits_truncate(((word & ANT_MASK) >> ANT_POS) as u8);
        let mcs = (word & MCS_MASK) as u8 & format.mcs_mask();

        let (streams, coding) = if format.is_mimo() {
            (
                if word & NSS_MSK != 0 { 2 } else { 1 },
                if word & LDPC_MSK != 0 {
                    Coding::Ldpc
                } else {
                    Coding::Bcc
                },
            )
        } else {
            (1, Coding::Bcc)
        };

        let guard = match format {
            Format::Ht | Format::Vht => Guard::Gi(if word & SGI_MSK != 0 {
                GuardInterval::Short
            } else {
                GuardInterval::Long
            }),
            Format::He => {
                let code = (word & GI_LTF_MASK) >> GI_LTF_POS;
                Guard::He {
                    ltf: HeLtf::from_code(code).ok_or(Error::UnknownHeLtf(code))?,
                    kind: HeType::from_code((word & HE_TYPE_MASK) >> HE_TYPE_POS),
                }
            }
            Format::Cck | Format::LegacyOfdm | Format::Eht => Guard::Unspecified,
        };

        Ok(Self {
            format,
            mcs,
            antennas,
            bandwidth,
            streams,
            guard,
            coding,
        })
    }
}

impl From<RateDescriptor> for u32 {
    fn from(value: RateDescriptor) -> Self {
        value.encode()
    }
}

impl TryFrom<u32> for RateDescriptor {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::decode(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ht20() -> RateDescriptor {
        RateDescriptor {
            format: Format::Ht,
            mcs: 3,
            antennas: Antennas::A,
            bandwidth: Bandwidth::Bw20,
            streams: 1,
            guard: Guard::Gi(GuardInterval::Long),
            coding: Coding::Bcc,
        }
    }

    #[test]
    fn ht20_inject_word() {
        let word = ht20().encode();
        assert_eq!(word, 0x4203);
        assert_eq!(word & WIDTH_MASK, 0, "no 40 MHz bit");
        assert_eq!(word & LDPC_MSK, 0, "no LDPC bit");
        assert_eq!(RateDescriptor::decode(word), Ok(ht20()));
    }

    #[test]
    fn round_trip() {
        let cases = [
            RateDescriptor {
                format: Format::LegacyOfdm,
                mcs: 7,
                antennas: Antennas::B,
                bandwidth: Bandwidth::Bw20,
                streams: 1,
                guard: Guard::Unspecified,
                coding: Coding::Bcc,
            },
            RateDescriptor {
                format: Format::Vht,
                mcs: 9,
                antennas: Antennas::all(),
                bandwidth: Bandwidth::Bw160,
                streams: 2,
                guard: Guard::Gi(GuardInterval::Short),
                coding: Coding::Ldpc,
            },
            RateDescriptor {
                format: Format::He,
                mcs: 11,
                antennas: Antennas::A,
                bandwidth: Bandwidth::Bw80,
                streams: 1,
                guard: Guard::He {
                    ltf: HeLtf::Ltf4xGi08,
                    kind: HeType::Su,
                },
                coding: Coding::Ldpc,
            },
            RateDescriptor {
                format: Format::He,
                mcs: 0,
                antennas: Antennas::all(),
                bandwidth: Bandwidth::Bw40,
                streams: 2,
                guard: Guard::He {
                    ltf: HeLtf::Ltf2xGi16,
                    kind: HeType::Mu,
                },
                coding: Coding::Bcc,
            },
            RateDescriptor {
                format: Format::Eht,
                mcs: 13,
                antennas: Antennas::A,
                bandwidth: Bandwidth::Bw320,
                streams: 2,
                guard: Guard::Unspecified,
                coding: Coding::Ldpc,
            },
        ];

        for rate in cases {
            assert_eq!(RateDescriptor::decode(rate.encode()), Ok(rate), "{rate:?}");
        }
    }

    #[test]
    fn he_4x_ltf_variants_are_distinct() {
        let make = |ltf| RateDescriptor {
            format: Format::He,
            guard: Guard::He {
                ltf,
                kind: HeType::Su,
            },
            ..ht20()
        };
        let long = make(HeLtf::Ltf4xGi32).encode();
        let short = make(HeLtf::Ltf4xGi08).encode();
        assert_eq!((long & GI_LTF_MASK) >> GI_LTF_POS, 3);
        assert_eq!((short & GI_LTF_MASK) >> GI_LTF_POS, 4);
        assert_ne!(
            RateDescriptor::decode(long).unwrap().guard,
            RateDescriptor::decode(short).unwrap().guard
        );
    }

    #[test]
    fn mcs_is_masked() {
        let rate = RateDescriptor { mcs: 9, ..ht20() };
        assert_eq!(rate.encode() & 0xf, 1);
    }

    #[test]
    fn legacy_ignores_mimo_bits() {
        // legacy OFDM with stray NSS, LDPC and SGI bits set
        let word = 1 << FORMAT_POS | NSS_MSK | LDPC_MSK | SGI_MSK | 5;
        let rate = RateDescriptor::decode(word).unwrap();
        assert_eq!(rate.streams, 1);
        assert_eq!(rate.coding, Coding::Bcc);
        assert_eq!(rate.guard, Guard::Unspecified);
        assert_eq!(rate.mcs, 5);
    }

    #[test]
    fn reserved_codes() {
        assert_eq!(
            RateDescriptor::decode(6 << FORMAT_POS),
            Err(Error::UnknownFormat(6))
        );
        assert_eq!(
            RateDescriptor::decode(2 << FORMAT_POS | 5 << WIDTH_POS),
            Err(Error::UnknownWidth(5))
        );
        assert_eq!(
            RateDescriptor::decode(4 << FORMAT_POS | 6 << GI_LTF_POS),
            Err(Error::UnknownHeLtf(6))
        );
    }

    #[test]
    fn names() {
        assert_eq!("hesu".parse(), Ok(Format::He));
        assert_eq!("NOHT".parse(), Ok(Format::LegacyOfdm));
        assert!("OFDM".parse::<Format>().is_err());
        assert_eq!("4xLTF+0.8".parse(), Ok(HeLtf::Ltf4xGi08));
        assert_eq!(HeLtf::Ltf2xGi16.to_string(), "2xLTF+1.6");
        assert_eq!("bcc".parse(), Ok(Coding::Bcc));
    }
}
