//! IEEE 802.11 definitions.
//!
//! References:
//! - [802.11ac: A Survival Guide](https://www.oreilly.com/library/view/80211ac-a-survival/9781449357702/ch02.html)
//! - [List of WLAN channels (Wikipedia)](https://en.wikipedia.org/wiki/List_of_WLAN_channels)

use crate::rate::Format;

/// Bandwidth.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub enum Bandwidth {
    /// 20 MHz.
    Bw20,
    /// 40 MHz.
    Bw40,
    /// 80 MHz.
    Bw80,
    /// 160 MHz.
    Bw160,
    /// 320 MHz.
    Bw320,
}

impl Bandwidth {
    /// Returns the bandwidth in MHz.
    pub const fn mhz(&self) -> u16 {
        match self {
            Bandwidth::Bw20 => 20,
            Bandwidth::Bw40 => 40,
            Bandwidth::Bw80 => 80,
            Bandwidth::Bw160 => 160,
            Bandwidth::Bw320 => 320,
        }
    }

    pub const fn from_mhz(mhz: u16) -> Option<Self> {
        Some(match mhz {
            20 => Bandwidth::Bw20,
            40 => Bandwidth::Bw40,
            80 => Bandwidth::Bw80,
            160 => Bandwidth::Bw160,
            320 => Bandwidth::Bw320,
            _ => return None,
        })
    }
}

const LEGACY_20_PILOTS: &[u32] = &[5, 19, 32, 46];
const HT_VHT_20_PILOTS: &[u32] = &[7, 21, 34, 48];
const HT_VHT_40_PILOTS: &[u32] = &[5, 33, 47, 66, 80, 108];
const VHT_80_PILOTS: &[u32] = &[19, 47, 83, 111, 130, 158, 194, 222];
const VHT_160_PILOTS: &[u32] = &[
    19, 47, 83, 111, 130, 158, 194, 222, 261, 289, 325, 353, 372, 400, 436, 464,
];
const HE_20_PILOTS: &[u32] = &[6, 32, 74, 100, 141, 167, 209, 235];
const HE_40_PILOTS: &[u32] = &[
    6, 32, 74, 100, 140, 166, 208, 234, 249, 275, 317, 343, 383, 409, 451, 477,
];
const HE_80_PILOTS: &[u32] = &[
    32, 100, 166, 234, 274, 342, 408, 476, 519, 587, 653, 721, 761, 829, 895, 963,
];
const HE_160_PILOTS: &[u32] = &[
    32, 100, 166, 234, 274, 342, 408, 476, 519, 587, 653, 721, 761, 829, 895, 963, 1028, 1096,
    1162, 1230, 1270, 1338, 1404, 1472, 1515, 1583, 1649, 1717, 1757, 1825, 1891, 1959,
];

/// Returns the positions of the pilot tones within one antenna pair's
/// subcarriers, as reported by the firmware.
///
/// Combinations without a known table, such as CCK or EHT, give an empty
/// slice; check for emptiness before indexing.
///
/// ```
/// # use csi::{ieee80211::{pilot_indices, Bandwidth}, rate::Format};
/// assert_eq!(pilot_indices(Format::Ht, Bandwidth::Bw20), &[7, 21, 34, 48]);
/// assert!(pilot_indices(Format::Eht, Bandwidth::Bw320).is_empty());
/// ```
pub fn pilot_indices(format: Format, bandwidth: Bandwidth) -> &'static [u32] {
    use Bandwidth::*;
    use Format::*;

    match (format, bandwidth) {
        (LegacyOfdm, _) => LEGACY_20_PILOTS,
        (Ht | Vht, Bw20) => HT_VHT_20_PILOTS,
        (Ht | Vht, Bw40) => HT_VHT_40_PILOTS,
        (Vht, Bw80) => VHT_80_PILOTS,
        (Vht, Bw160) => VHT_160_PILOTS,
        (He, Bw20) => HE_20_PILOTS,
        (He, Bw40) => HE_40_PILOTS,
        (He, Bw80) => HE_80_PILOTS,
        (He, Bw160) => HE_160_PILOTS,
        _ => &[],
    }
}

/// Contiguous runs of reported tones, as (first tone, length).
fn tone_blocks(format: Format, bandwidth: Bandwidth) -> Option<&'static [(i16, u16)]> {
    use Bandwidth::*;
    use Format::*;

    Some(match (format, bandwidth) {
        (LegacyOfdm, _) => &[(-26, 26), (1, 26)],
        (Ht | Vht, Bw20) => &[(-28, 28), (1, 28)],
        (Ht | Vht, Bw40) => &[(-58, 57), (2, 57)],
        (Vht, Bw80) | (He, Bw20) => &[(-122, 121), (2, 121)],
        (Vht, Bw160) => &[(-250, 121), (-126, 121), (6, 121), (130, 121)],
        (He, Bw40) => &[(-244, 242), (3, 242)],
        (He, Bw80) => &[(-500, 498), (3, 498)],
        (He, Bw160) => &[(-1012, 498), (-509, 498), (12, 498), (515, 498)],
        _ => return None,
    })
}

/// Number of subcarriers the firmware reports per antenna pair.
///
/// ```
/// # use csi::{ieee80211::{subcarrier_count, Bandwidth}, rate::Format};
/// assert_eq!(subcarrier_count(Format::Vht, Bandwidth::Bw160), Some(484));
/// assert_eq!(subcarrier_count(Format::He, Bandwidth::Bw160), Some(1992));
/// ```
pub fn subcarrier_count(format: Format, bandwidth: Bandwidth) -> Option<usize> {
    tone_blocks(format, bandwidth).map(|blocks| blocks.iter().map(|&(_, n)| n as usize).sum())
}

/// Maps a position in the reported subcarrier list to the tone index
/// relative to the channel center.
///
/// ```
/// # use csi::{ieee80211::{tone, Bandwidth}, rate::Format};
/// assert_eq!(tone(Format::Ht, Bandwidth::Bw20, 0), Some(-28));
/// assert_eq!(tone(Format::Ht, Bandwidth::Bw20, 28), Some(1));
/// assert_eq!(tone(Format::Ht, Bandwidth::Bw20, 56), None);
/// ```
pub fn tone(format: Format, bandwidth: Bandwidth, index: usize) -> Option<i16> {
    let mut index = index;
    for &(first, len) in tone_blocks(format, bandwidth)? {
        if index < len as usize {
            return Some(first + index as i16);
        }
        index -= len as usize;
    }
    None
}

/// Converts a center frequency in MHz to a channel number.
///
/// Returns `None` outside the 2.4, 4.9, 5, 6 and 60 GHz ranges.
///
/// ```
/// # use csi::ieee80211::freq_to_channel;
/// assert_eq!(freq_to_channel(2412), Some(1));
/// assert_eq!(freq_to_channel(5180), Some(36));
/// assert_eq!(freq_to_channel(5955), Some(1));
/// ```
pub fn freq_to_channel(mhz: u32) -> Option<u32> {
    Some(match mhz {
        2484 => 14,
        5935 => 2,
        1000..=2483 => mhz.checked_sub(2407)? / 5,
        4910..=4980 => (mhz - 4000) / 5,
        2485..=5949 => mhz.checked_sub(5000)? / 5,
        5950..=45000 => (mhz - 5950) / 5,
        58320..=70200 => (mhz - 56160) / 2160,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// OFDM subcarriers can be either pilot, data or zero/null.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum SubcarrierType {
        /// Pilot subcarrier.
        Pilot,
        /// Data subcarrier.
        Data,
        /// Zero/null (unused) subcarrier.
        Zero,
    }

    /// Subcarrier type for 802.11n/802.11ac, 20 MHz.
    const fn subcarrier_type_20mhz(i: i16) -> SubcarrierType {
        match i {
            -21 | -7 | 7 | 21 => SubcarrierType::Pilot,
            -28..=-1 | 1..=28 => SubcarrierType::Data,
            _ => SubcarrierType::Zero,
        }
    }

    /// Subcarrier type for 802.11n/802.11ac, 40 MHz.
    const fn subcarrier_type_40mhz(i: i16) -> SubcarrierType {
        match i {
            -53 | -25 | -11 | 11 | 25 | 53 => SubcarrierType::Pilot,
            -58..=-2 | 2..=58 => SubcarrierType::Data,
            _ => SubcarrierType::Zero,
        }
    }

    /// Subcarrier type for 802.11ac, 80 MHz.
    const fn subcarrier_type_80mhz(i: i16) -> SubcarrierType {
        match i {
            -103 | -75 | -39 | -11 | 11 | 39 | 75 | 103 => SubcarrierType::Pilot,
            -122..=-2 | 2..=122 => SubcarrierType::Data,
            _ => SubcarrierType::Zero,
        }
    }

    /// Subcarrier type for 802.11ac, 160 MHz.
    const fn subcarrier_type_160mhz(i: i16) -> SubcarrierType {
        match i {
            -231 | -203 | -167 | -139 | -117 | -89 | -53 | -25 | 25 | 53 | 89 | 117 | 139 | 167
            | 203 | 231 => SubcarrierType::Pilot,
            -250..=-130 | -126..=-6 | 6..=126 | 130..=250 => SubcarrierType::Data,
            _ => SubcarrierType::Zero,
        }
    }

    const MAPPED: [(Format, Bandwidth); 10] = [
        (Format::LegacyOfdm, Bandwidth::Bw20),
        (Format::Ht, Bandwidth::Bw20),
        (Format::Ht, Bandwidth::Bw40),
        (Format::Vht, Bandwidth::Bw20),
        (Format::Vht, Bandwidth::Bw40),
        (Format::Vht, Bandwidth::Bw80),
        (Format::Vht, Bandwidth::Bw160),
        (Format::He, Bandwidth::Bw20),
        (Format::He, Bandwidth::Bw40),
        (Format::He, Bandwidth::Bw80),
    ];

    #[test]
    fn pilot_tables_are_complete() {
        for (format, bw) in MAPPED
            .into_iter()
            .chain([(Format::He, Bandwidth::Bw160)])
        {
            let pilots = pilot_indices(format, bw);
            let count = subcarrier_count(format, bw).unwrap();
            assert!(!pilots.is_empty(), "{format:?} {bw:?}");
            assert!(pilots.windows(2).all(|w| w[0] < w[1]), "{format:?} {bw:?}");
            assert!(pilots.iter().all(|&p| (p as usize) < count), "{format:?} {bw:?}");
        }
    }

    #[test]
    fn unmapped_tables_are_empty() {
        assert!(pilot_indices(Format::Cck, Bandwidth::Bw20).is_empty());
        assert!(pilot_indices(Format::Ht, Bandwidth::Bw80).is_empty());
        assert!(pilot_indices(Format::Eht, Bandwidth::Bw20).is_empty());
        assert_eq!(subcarrier_count(Format::Eht, Bandwidth::Bw320), None);
    }

    fn subcarrier_type(bw: Bandwidth) -> fn(i16) -> SubcarrierType {
        match bw {
            Bandwidth::Bw20 => subcarrier_type_20mhz,
            Bandwidth::Bw40 => subcarrier_type_40mhz,
            Bandwidth::Bw80 => subcarrier_type_80mhz,
            _ => subcarrier_type_160mhz,
        }
    }

    #[test]
    fn ht_vht_pilots_land_on_pilot_tones() {
        for (format, bw) in MAPPED.into_iter().filter(|(f, _)| *f != Format::He) {
            let kind = subcarrier_type(bw);
            for &p in pilot_indices(format, bw) {
                let t = tone(format, bw, p as usize).unwrap();
                assert_eq!(kind(t), SubcarrierType::Pilot, "{format:?} {bw:?} {p}");
            }
        }
    }

    #[test]
    fn ht_vht_reported_tones_are_never_null() {
        for (format, bw) in MAPPED.into_iter().filter(|(f, _)| *f != Format::He) {
            let kind = subcarrier_type(bw);
            let kinds: Vec<_> = (0..subcarrier_count(format, bw).unwrap())
                .map(|i| kind(tone(format, bw, i).unwrap()))
                .collect();
            assert!(!kinds.contains(&SubcarrierType::Zero), "{format:?} {bw:?}");

            let pilots = kinds.iter().filter(|&&k| k == SubcarrierType::Pilot).count();
            assert_eq!(pilots, pilot_indices(format, bw).len(), "{format:?} {bw:?}");
        }
    }

    #[test]
    fn he_pilots_are_symmetric() {
        for bw in [Bandwidth::Bw20, Bandwidth::Bw40, Bandwidth::Bw80, Bandwidth::Bw160] {
            let mut tones: Vec<i16> = pilot_indices(Format::He, bw)
                .iter()
                .map(|&p| tone(Format::He, bw, p as usize).unwrap())
                .collect();
            let mirrored: Vec<i16> = tones.iter().rev().map(|t| -t).collect();
            assert_eq!(tones, mirrored, "{bw:?}");
            tones.retain(|t| *t == 0);
            assert!(tones.is_empty());
        }
    }

    #[test]
    fn channels() {
        assert_eq!(freq_to_channel(2484), Some(14));
        assert_eq!(freq_to_channel(2462), Some(11));
        assert_eq!(freq_to_channel(4920), Some(184));
        assert_eq!(freq_to_channel(5825), Some(165));
        assert_eq!(freq_to_channel(5935), Some(2));
        assert_eq!(freq_to_channel(7115), Some(233));
        assert_eq!(freq_to_channel(60480), Some(2));
        assert_eq!(freq_to_channel(500), None);
        assert_eq!(freq_to_channel(50000), None);
    }

    #[test]
    fn bandwidth_mhz() {
        for bw in [Bandwidth::Bw20, Bandwidth::Bw160, Bandwidth::Bw320] {
            assert_eq!(Bandwidth::from_mhz(bw.mhz()), Some(bw));
        }
        assert_eq!(Bandwidth::from_mhz(60), None);
    }
}
