//! CSI records reported by `iwlwifi` firmware.
//!
//! Every record is a fixed 272-byte capture header followed by the raw
//! samples. The header is a packed little-endian structure, of which only a
//! few fields are understood:
//!
//! ```c
//! struct csi_hdr {
//!     uint32 csi_data_size; // payload bytes following the header
//!     uint32 reserved;
//!     uint32 ftm_clock;
//!     uint64 timestamp;
//!     uint8  reserved[26];
//!     uint8  num_rx;
//!     uint8  num_tx;
//!     uint8  reserved[4];
//!     uint32 num_subcarriers;
//!     uint8  reserved[4];
//!     uint32 rssi[2];
//!     uint8  src_mac[6];
//!     uint8  reserved[18];
//!     uint32 rate_n_flags;
//!     uint32 reserved[44];
//! } __attribute__((packed));
//! ```
//!
//! The payload holds one little-endian `int16` real part followed by one
//! `int16` imaginary part per sample, ordered by receive antenna, then
//! transmit antenna, then subcarrier. Records are concatenated without any
//! separator when saved, so readers rely on `csi_data_size` alone.

use std::io::{self, Read, Write};

use macaddr::MacAddr6;
use ndarray::Array3;
use num_complex::Complex;

use crate::{
    cursor::{self, Cursor},
    ieee80211::{subcarrier_count, Bandwidth},
    rate::{self, Format, RateDescriptor},
};

/// Length of the capture header.
pub const HEADER_LEN: usize = 272;

/// Largest payload accepted when reading records from a stream.
pub const MAX_PAYLOAD_LEN: usize = 1 << 20;

const PAYLOAD_LEN_OFFSET: usize = 0;
const FTM_CLOCK_OFFSET: usize = 8;
const TIMESTAMP_OFFSET: usize = 12;
const NUM_RX_OFFSET: usize = 46;
const NUM_TX_OFFSET: usize = 47;
const NUM_SUBCARRIERS_OFFSET: usize = 52;
const RSSI_OFFSET: usize = 60;
const SOURCE_MAC_OFFSET: usize = 68;
const RATE_OFFSET: usize = 92;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("truncated capture: {0}")]
    NotEnoughBytes(#[from] cursor::Error),
    #[error("header declares {declared} payload bytes but only {available} are present")]
    Truncated { declared: usize, available: usize },
    #[error("payload of {0} bytes is too large")]
    Oversized(usize),
    #[error("capture reports no antennas")]
    NoAntennas,
    /// The payload size disagrees with the subcarrier and antenna counts.
    #[error("payload is {payload_len} bytes, expected 4 x {num_subcarriers} subcarriers x {num_rx} rx x {num_tx} tx")]
    SizeMismatch {
        payload_len: usize,
        num_subcarriers: u32,
        num_rx: u8,
        num_tx: u8,
    },
    /// The 160 MHz correction did not produce the expected subcarrier count.
    #[error("cannot correct 160 MHz capture: {actual} subcarriers per antenna pair, expected {expected}")]
    Uncorrectable { expected: usize, actual: usize },
}

/// The fixed header preceding every CSI payload.
///
/// Bytes that are not decoded are kept, so [`CaptureHeader::to_bytes`]
/// reproduces the firmware's header with only the decoded fields
/// rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureHeader {
    /// Number of payload bytes following the header.
    pub payload_len: u32,
    pub ftm_clock: u32,
    /// Hardware timestamp.
    pub timestamp: u64,
    pub num_rx: u8,
    pub num_tx: u8,
    /// Subcarriers per antenna pair.
    pub num_subcarriers: u32,
    pub rssi: [u32; 2],
    /// Transmitter MAC address.
    pub source_mac: MacAddr6,
    /// Raw `rate_n_flags` word; see [`RateDescriptor`].
    pub rate: u32,
    raw: Box<[u8; HEADER_LEN]>,
}

impl CaptureHeader {
    pub fn from_slice(b: &[u8]) -> Result<Self, Error> {
        let mut c = Cursor::new(b);
        let raw: [u8; HEADER_LEN] = c.array()?;

        let mut c = Cursor::new(&raw);
        let payload_len = c.u32_le()?;
        c.skip(FTM_CLOCK_OFFSET - 4)?;
        let ftm_clock = c.u32_le()?;
        let timestamp = c.u64_le()?;
        c.skip(NUM_RX_OFFSET - TIMESTAMP_OFFSET - 8)?;
        let num_rx = c.u8()?;
        let num_tx = c.u8()?;
        c.skip(NUM_SUBCARRIERS_OFFSET - NUM_TX_OFFSET - 1)?;
        let num_subcarriers = c.u32_le()?;
        c.skip(RSSI_OFFSET - NUM_SUBCARRIERS_OFFSET - 4)?;
        let rssi = [c.u32_le()?, c.u32_le()?];
        let mac: [u8; 6] = c.array()?;
        c.skip(RATE_OFFSET - SOURCE_MAC_OFFSET - 6)?;
        let rate = c.u32_le()?;

        Ok(Self {
            payload_len,
            ftm_clock,
            timestamp,
            num_rx,
            num_tx,
            num_subcarriers,
            rssi,
            source_mac: mac.into(),
            rate,
            raw: Box::new(raw),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut b = *self.raw;
        let mut put = |offset: usize, bytes: &[u8]| {
            b[offset..offset + bytes.len()].copy_from_slice(bytes);
        };
        put(PAYLOAD_LEN_OFFSET, &self.payload_len.to_le_bytes());
        put(FTM_CLOCK_OFFSET, &self.ftm_clock.to_le_bytes());
        put(TIMESTAMP_OFFSET, &self.timestamp.to_le_bytes());
        put(NUM_RX_OFFSET, &[self.num_rx, self.num_tx]);
        put(NUM_SUBCARRIERS_OFFSET, &self.num_subcarriers.to_le_bytes());
        put(RSSI_OFFSET, &self.rssi[0].to_le_bytes());
        put(RSSI_OFFSET + 4, &self.rssi[1].to_le_bytes());
        put(SOURCE_MAC_OFFSET, self.source_mac.as_bytes());
        put(RATE_OFFSET, &self.rate.to_le_bytes());
        b
    }

    /// Decodes the `rate_n_flags` word.
    pub fn rate_descriptor(&self) -> Result<RateDescriptor, rate::Error> {
        RateDescriptor::decode(self.rate)
    }

    pub fn format(&self) -> Option<Format> {
        rate::format_of(self.rate)
    }

    pub fn bandwidth(&self) -> Option<Bandwidth> {
        rate::bandwidth_of(self.rate)
    }

    /// Payload size implied by the subcarrier and antenna counts.
    pub fn expected_payload_len(&self) -> usize {
        4 * self.num_subcarriers as usize * self.num_rx as usize * self.num_tx as usize
    }
}

/// Removes the dead zone that some firmware versions insert into 160 MHz
/// VHT and HE captures.
///
/// Per antenna pair, subcarrier slots 242..=255 (VHT) or 996..=1023 (HE) are
/// dropped and the header is rewritten to the full 484 (VHT) or 1992 (HE)
/// subcarriers. The number of slots per pair is taken from the payload
/// itself, since the header's count is unreliable in this case. Captures
/// that already report the full count, or that are not 160 MHz VHT/HE, are
/// returned unchanged.
pub fn correct_160mhz(header: &mut CaptureHeader, payload: Vec<u8>) -> Result<Vec<u8>, Error> {
    if header.bandwidth() != Some(Bandwidth::Bw160) {
        return Ok(payload);
    }

    let (format, dead) = match header.format() {
        Some(f @ Format::Vht) => (f, 242..256),
        Some(f @ Format::He) => (f, 996..1024),
        _ => return Ok(payload),
    };
    let Some(expected) = subcarrier_count(format, Bandwidth::Bw160) else {
        return Ok(payload);
    };

    if header.num_subcarriers as usize == expected {
        return Ok(payload);
    }

    let pairs = header.num_rx as usize * header.num_tx as usize;
    if pairs == 0 {
        return Err(Error::NoAntennas);
    }

    let slots = payload.len() / 4;
    let per_pair = slots / pairs;
    if slots % pairs != 0 || per_pair - dead.len().min(per_pair) != expected {
        return Err(Error::Uncorrectable {
            expected,
            actual: per_pair.saturating_sub(dead.len()),
        });
    }

    let mut fixed = Vec::with_capacity(expected * 4 * pairs);
    for pair in payload.chunks_exact(per_pair * 4) {
        for (n, sample) in pair.chunks_exact(4).enumerate() {
            if !dead.contains(&n) {
                fixed.extend_from_slice(sample);
            }
        }
    }

    header.num_subcarriers = expected as u32;
    header.payload_len = fixed.len() as u32;

    Ok(fixed)
}

/// One decoded CSI capture.
///
/// Samples are indexed by `[rx, tx, subcarrier]`. Magnitude and phase are
/// kept alongside and are what the processing passes in
/// [`crate::proc`] operate on.
#[derive(Debug, Clone)]
pub struct CsiRecord {
    header: CaptureHeader,
    payload: Vec<u8>,
    pub(crate) csi: Array3<Complex<f64>>,
    pub(crate) magnitude: Array3<f64>,
    pub(crate) phase: Array3<f64>,
    pub(crate) backup: Option<Array3<Complex<f64>>>,
}

impl CsiRecord {
    /// Decodes a record from a header immediately followed by its payload.
    /// Bytes after the payload are ignored.
    pub fn from_slice(b: &[u8]) -> Result<Self, Error> {
        let mut c = Cursor::new(b);
        let header = c.bytes(HEADER_LEN)?;
        let declared = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let payload = c.bytes(declared).map_err(|_| Error::Truncated {
            declared,
            available: c.remaining(),
        })?;
        Self::from_parts(header, payload)
    }

    /// Decodes a record from separately delivered header and payload.
    pub fn from_parts(header: &[u8], payload: &[u8]) -> Result<Self, Error> {
        let mut header = CaptureHeader::from_slice(header)?;
        let declared = header.payload_len as usize;
        let payload = payload.get(..declared).ok_or(Error::Truncated {
            declared,
            available: payload.len(),
        })?;

        let payload = correct_160mhz(&mut header, payload.to_vec())?;

        if header.num_rx == 0 || header.num_tx == 0 {
            return Err(Error::NoAntennas);
        }
        if payload.len() != header.expected_payload_len() {
            return Err(Error::SizeMismatch {
                payload_len: payload.len(),
                num_subcarriers: header.num_subcarriers,
                num_rx: header.num_rx,
                num_tx: header.num_tx,
            });
        }

        let samples = payload
            .chunks_exact(4)
            .map(|b| {
                Complex::new(
                    i16::from_le_bytes([b[0], b[1]]) as f64,
                    i16::from_le_bytes([b[2], b[3]]) as f64,
                )
            })
            .collect::<Vec<_>>();

        let shape = (
            header.num_rx as usize,
            header.num_tx as usize,
            header.num_subcarriers as usize,
        );
        let csi = Array3::from_shape_vec(shape, samples).map_err(|_| Error::SizeMismatch {
            payload_len: payload.len(),
            num_subcarriers: header.num_subcarriers,
            num_rx: header.num_rx,
            num_tx: header.num_tx,
        })?;

        Ok(Self {
            magnitude: csi.mapv(|c| c.norm()),
            phase: csi.mapv(|c| c.arg()),
            csi,
            header,
            payload,
            backup: None,
        })
    }

    pub fn header(&self) -> &CaptureHeader {
        &self.header
    }

    /// The corrected raw payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn csi(&self) -> &Array3<Complex<f64>> {
        &self.csi
    }

    pub fn magnitude(&self) -> &Array3<f64> {
        &self.magnitude
    }

    pub fn phase(&self) -> &Array3<f64> {
        &self.phase
    }

    pub fn num_subcarriers(&self) -> usize {
        self.csi.shape()[2]
    }

    /// Size of the record once encoded.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Encodes the header and corrected payload, as saved to disk.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        w.write_all(&self.header.to_bytes())?;
        w.write_all(&self.payload)
    }
}

/// Error returned by [`RecordReader`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Decode(#[from] Error),
}

/// Reads concatenated records, such as a saved capture file.
///
/// ```
/// # use csi::frame::RecordReader;
/// let records = RecordReader::new(std::io::empty());
/// assert_eq!(records.count(), 0);
/// ```
#[derive(Debug)]
pub struct RecordReader<R> {
    inner: R,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next record, or `None` at a clean end of input.
    pub fn next_record(&mut self) -> Result<Option<CsiRecord>, ReadError> {
        let mut header = [0; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            match self.inner.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_LEN {
            return Err(Error::NotEnoughBytes(cursor::Error {
                offset: 0,
                needed: HEADER_LEN,
                remaining: filled,
            })
            .into());
        }

        let declared = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if declared > MAX_PAYLOAD_LEN {
            return Err(Error::Oversized(declared).into());
        }

        let mut payload = Vec::with_capacity(declared);
        (&mut self.inner)
            .take(declared as u64)
            .read_to_end(&mut payload)?;

        Ok(Some(CsiRecord::from_parts(&header, &payload)?))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<CsiRecord, ReadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a header for the given `rate_n_flags` and dimensions.
    pub(crate) fn header(rate: u32, num_rx: u8, num_tx: u8, num_subcarriers: u32, payload_len: usize) -> Vec<u8> {
        let mut b = vec![0; HEADER_LEN];
        b[0..4].copy_from_slice(&(payload_len as u32).to_le_bytes());
        b[12..20].copy_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
        b[46] = num_rx;
        b[47] = num_tx;
        b[52..56].copy_from_slice(&num_subcarriers.to_le_bytes());
        b[60..64].copy_from_slice(&(-40i32 as u32).to_le_bytes());
        b[68..74].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        b[92..96].copy_from_slice(&rate.to_le_bytes());
        b[200] = 0x5a;
        b
    }

    /// Payload whose samples encode their slot number as the real part.
    fn numbered(slots: usize) -> Vec<u8> {
        (0..slots)
            .flat_map(|n| {
                let re = (n % 1024) as i16;
                let im = -(n as i16 / 1024);
                [re.to_le_bytes(), im.to_le_bytes()].concat()
            })
            .collect()
    }

    const HT20: u32 = 0x4203;
    // VHT, 160 MHz
    const VHT160: u32 = 3 << 8 | 3 << 11;
    // HE, 160 MHz
    const HE160: u32 = 4 << 8 | 3 << 11;

    #[test]
    fn decode_header_fields() {
        let mut b = header(HT20, 2, 1, 56, 2 * 56 * 4);
        b.extend(numbered(2 * 56));
        let record = CsiRecord::from_slice(&b).unwrap();
        let h = record.header();
        assert_eq!(h.num_rx, 2);
        assert_eq!(h.num_tx, 1);
        assert_eq!(h.num_subcarriers, 56);
        assert_eq!(h.timestamp, 0x0102_0304_0506_0708);
        assert_eq!(h.rssi[0] as i32, -40);
        assert_eq!(h.source_mac, MacAddr6::new(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff));
        assert_eq!(h.rate_descriptor().unwrap().mcs, 3);
        assert_eq!(record.csi().shape(), &[2, 1, 56]);
        assert_eq!(record.csi()[[1, 0, 0]], Complex::new(56., 0.));
        assert_eq!(record.to_bytes(), b);
    }

    #[test]
    fn samples_are_signed() {
        let mut b = header(HT20, 1, 1, 1, 4);
        b.extend([0xff, 0xff, 0x00, 0x80]);
        let record = CsiRecord::from_slice(&b).unwrap();
        let c = record.csi()[[0, 0, 0]];
        assert_eq!(c, Complex::new(-1., -32768.));
        assert_eq!(record.magnitude()[[0, 0, 0]], c.norm());
        assert_eq!(record.phase()[[0, 0, 0]], c.arg());
    }

    #[test]
    fn vht160_dead_zone_is_removed() {
        // header claims 468 subcarriers, the payload carries 484 + 14
        let payload = numbered(498);
        let mut b = header(VHT160, 1, 1, 468, payload.len());
        b.extend(&payload);

        let record = CsiRecord::from_slice(&b).unwrap();
        assert_eq!(record.header().num_subcarriers, 484);
        assert_eq!(record.header().payload_len as usize, 484 * 4);
        assert_eq!(record.payload().len(), 484 * 4);
        assert_eq!(record.csi()[[0, 0, 241]].re, 241.);
        assert_eq!(record.csi()[[0, 0, 242]].re, 256.);
        assert_eq!(record.csi()[[0, 0, 483]].re, 497.);
    }

    #[test]
    fn he160_dead_zone_is_removed_per_pair() {
        let payload = numbered(4 * 2020);
        let mut b = header(HE160, 2, 2, 2020, payload.len());
        b.extend(&payload);

        let record = CsiRecord::from_slice(&b).unwrap();
        assert_eq!(record.header().num_subcarriers, 1992);
        assert_eq!(record.payload().len(), 1992 * 4 * 4);
        // second pair starts at slot 2020
        let first = record.csi()[[0, 1, 0]];
        assert_eq!((first.re, first.im), (((2020 % 1024) as f64), -1.));
    }

    #[test]
    fn correction_is_idempotent() {
        let payload = numbered(498);
        let mut h = CaptureHeader::from_slice(&header(VHT160, 1, 1, 468, payload.len())).unwrap();
        let once = correct_160mhz(&mut h, payload).unwrap();
        let after_once = h.clone();
        let twice = correct_160mhz(&mut h, once.clone()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(h, after_once);
    }

    #[test]
    fn other_captures_are_not_corrected() {
        let payload = numbered(242);
        // VHT, 80 MHz
        let mut h = CaptureHeader::from_slice(&header(3 << 8 | 2 << 11, 1, 1, 242, payload.len())).unwrap();
        assert_eq!(correct_160mhz(&mut h, payload.clone()).unwrap(), payload);
        assert_eq!(h.num_subcarriers, 242);
    }

    #[test]
    fn uncorrectable_160mhz() {
        let payload = numbered(470);
        let mut b = header(VHT160, 1, 1, 468, payload.len());
        b.extend(&payload);
        assert!(matches!(
            CsiRecord::from_slice(&b),
            Err(Error::Uncorrectable { expected: 484, .. })
        ));
    }

    #[test]
    fn truncated_payload() {
        let mut b = header(HT20, 1, 1, 56, 56 * 4);
        b.extend(numbered(50));
        assert_eq!(
            CsiRecord::from_slice(&b).unwrap_err(),
            Error::Truncated {
                declared: 224,
                available: 200
            }
        );
        assert!(matches!(
            CsiRecord::from_slice(&b[..100]),
            Err(Error::NotEnoughBytes(_))
        ));
    }

    #[test]
    fn size_mismatch() {
        let mut b = header(HT20, 1, 1, 56, 55 * 4);
        b.extend(numbered(55));
        assert!(matches!(
            CsiRecord::from_slice(&b),
            Err(Error::SizeMismatch { payload_len: 220, .. })
        ));
    }

    #[test]
    fn read_concatenated_records() {
        let mut file = Vec::new();
        for n in [56, 114] {
            file.extend(header(HT20, 1, 1, n, n as usize * 4));
            file.extend(numbered(n as usize));
        }

        let records = RecordReader::new(file.as_slice())
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].num_subcarriers(), 114);

        let mut reader = RecordReader::new(&file[..file.len() - 1]);
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(ReadError::Decode(Error::Truncated { .. }))
        ));
    }
}
