//! Frame injection on the monitor interface.
//!
//! Every injected frame is a minimal radiotap header that carries the
//! `rate_n_flags` word for the driver, a fixed 802.11 header and an empty
//! body. The receiving end only needs the frame to exist to measure CSI on
//! it.

use std::{
    num::NonZeroU32,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use csi::{
    ieee80211::Bandwidth,
    rate::{Antennas, Coding, Format, Guard, GuardInterval, HeLtf, HeType, RateDescriptor},
};
use pcap::{Active, Capture};
use tracing::{debug, info, warn};

use crate::{control::MONITOR_INTERFACE, Result};

const RADIOTAP_LEN: u16 = 13;
/// Present bitmask: only the flags field, the rate word follows as
/// driver-specific data.
const RADIOTAP_PRESENT: u32 = 1 << 1;
const RADIOTAP_FLAGS: u8 = 0x80;

const IEEE80211_HEADER: [u8; 28] = [
    0xe0, 0x80, 0x00, 0x00, 0x00, 0x16, 0xea, 0x12, 0x34, 0x56, 0x00, 0x16, 0xea, 0x12, 0x34,
    0x56, 0x98, 0x59, 0x7a, 0x8b, 0x34, 0x3b, 0x00, 0x00, 0x15, 0x03, 0x15, 0x20,
];

/// Builds the frame injected for `rate`.
///
/// ```
/// let f = iwlctl::inject::frame(0x4203);
/// assert_eq!(f.len(), 13 + 28);
/// assert_eq!(&f[..4], &[0, 0, 13, 0]);
/// assert_eq!(&f[9..13], &0x4203u32.to_le_bytes());
/// ```
pub fn frame(rate: u32) -> Vec<u8> {
    let mut f = Vec::with_capacity(RADIOTAP_LEN as usize + IEEE80211_HEADER.len());
    f.extend_from_slice(&[0, 0]);
    f.extend_from_slice(&RADIOTAP_LEN.to_le_bytes());
    f.extend_from_slice(&RADIOTAP_PRESENT.to_le_bytes());
    f.push(RADIOTAP_FLAGS);
    f.extend_from_slice(&rate.to_le_bytes());
    f.extend_from_slice(&IEEE80211_HEADER);
    f
}

/// Physical layer settings of injected frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectParams {
    pub format: Format,
    pub mcs: u8,
    pub antennas: Antennas,
    pub bandwidth: Bandwidth,
    pub streams: u8,
    pub guard_interval: GuardInterval,
    pub ltf: HeLtf,
    pub coding: Coding,
}

impl InjectParams {
    /// The rate descriptor handed to the driver.
    ///
    /// Settings a format cannot use are dropped: legacy frames are always
    /// 20 MHz single stream, HT frames at most 40 MHz, and HE frames always
    /// use LDPC. Two streams need both antennas.
    pub fn rate(&self) -> RateDescriptor {
        let mimo = self.format.is_mimo();
        let streams = if mimo && self.streams >= 2 { 2 } else { 1 };
        let antennas = if streams == 2 {
            Antennas::A | Antennas::B
        } else {
            self.antennas
        };

        let bandwidth = match (self.format, self.bandwidth) {
            (Format::Cck | Format::LegacyOfdm, _) => Bandwidth::Bw20,
            (Format::Ht, Bandwidth::Bw40) => Bandwidth::Bw40,
            (Format::Ht, _) => Bandwidth::Bw20,
            (_, Bandwidth::Bw320) => Bandwidth::Bw20,
            (_, bw) => bw,
        };

        let (guard, coding) = match self.format {
            Format::Ht | Format::Vht => (Guard::Gi(self.guard_interval), self.coding),
            Format::He => (
                Guard::He {
                    ltf: self.ltf,
                    kind: HeType::Su,
                },
                Coding::Ldpc,
            ),
            _ => (Guard::Unspecified, Coding::Bcc),
        };

        RateDescriptor {
            format: self.format,
            mcs: self.mcs,
            antennas,
            bandwidth,
            streams,
            guard,
            coding,
        }
    }
}

/// Something that transmits raw frames.
pub trait Radio {
    /// Sends one frame. `Ok(false)` reports a failure worth retrying.
    fn transmit(&mut self, frame: &[u8]) -> Result<bool>;
}

/// Transmits through a libpcap handle, opened on first use and reopened
/// after a failed send.
pub struct Pcap {
    device: String,
    capture: Option<Capture<Active>>,
}

impl std::fmt::Debug for Pcap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pcap")
            .field("device", &self.device)
            .field("open", &self.capture.is_some())
            .finish()
    }
}

impl Default for Pcap {
    fn default() -> Self {
        Self::new(MONITOR_INTERFACE)
    }
}

impl Pcap {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            capture: None,
        }
    }

    fn open(&mut self) -> Result<&mut Capture<Active>> {
        let c = match self.capture.take() {
            Some(c) => c,
            None => {
                debug!(device = %self.device, "opening capture handle");
                Capture::from_device(self.device.as_str())?
                    .promisc(true)
                    .snaplen(800)
                    .timeout(20)
                    .open()?
            }
        };
        Ok(self.capture.insert(c))
    }
}

impl Radio for Pcap {
    fn transmit(&mut self, frame: &[u8]) -> Result<bool> {
        match self.open()?.sendpacket(frame) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(%e, "injection failed, reopening");
                self.capture = None;
                Ok(false)
            }
        }
    }
}

/// Sends the same frame repeatedly.
#[derive(Debug)]
pub struct Injector<R = Pcap> {
    radio: R,
    frame: Vec<u8>,
}

/// Counters of a finished [`Injector::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InjectStats {
    pub sent: u64,
    pub failed: u64,
}

impl<R: Radio> Injector<R> {
    pub fn new(radio: R, rate: &RateDescriptor) -> Self {
        Self {
            radio,
            frame: frame(rate.encode()),
        }
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// Injects `repeat` frames, or until `stop` is set when `repeat` is
    /// `None`, sleeping `delay` after each.
    pub fn run(
        &mut self,
        repeat: Option<NonZeroU32>,
        delay: Duration,
        stop: &AtomicBool,
    ) -> Result<InjectStats> {
        let mut stats = InjectStats::default();
        let mut remaining = repeat.map(NonZeroU32::get);
        info!(?repeat, ?delay, "injecting");

        while !stop.load(Ordering::Relaxed) {
            match remaining.as_mut() {
                Some(0) => break,
                Some(n) => *n -= 1,
                None => {}
            }
            if self.radio.transmit(&self.frame)? {
                stats.sent += 1;
            } else {
                stats.failed += 1;
            }
            thread::sleep(delay);
        }

        info!(?stats, "injection finished");
        Ok(stats)
    }
}
