//! Fine timing measurement results.

use uom::si::{
    f64::{Length, Time},
    length::millimeter,
    time::picosecond,
};

use crate::cursor::{self, Cursor};

/// One completed FTM burst towards a peer, as saved to disk.
///
/// The encoded form is a packed 79-byte little-endian structure in field
/// order. Attributes the kernel leaves out of a result are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "arbitrary", derive(arbitrary::Arbitrary))]
pub struct FtmMeasurement {
    pub burst_index: u32,
    pub attempts: u32,
    pub successes: u32,
    pub bursts_exponent: u32,
    pub burst_duration: u8,
    pub ftms_per_burst: u8,
    pub rssi_avg: u8,
    pub rssi_spread: u32,
    /// Round trip times, in picoseconds.
    pub rtt_avg: u64,
    pub rtt_variance: u64,
    pub rtt_spread: u64,
    /// Distances, in millimetres.
    pub dist_avg: u64,
    pub dist_variance: u64,
    pub dist_spread: u64,
    /// Wall clock time of the result, in microseconds since the Unix epoch.
    pub timestamp: u64,
}

impl FtmMeasurement {
    pub const ENCODED_LEN: usize = 79;

    pub fn from_slice(b: &[u8]) -> Result<Self, cursor::Error> {
        let mut c = Cursor::new(b);
        Ok(Self {
            burst_index: c.u32_le()?,
            attempts: c.u32_le()?,
            successes: c.u32_le()?,
            bursts_exponent: c.u32_le()?,
            burst_duration: c.u8()?,
            ftms_per_burst: c.u8()?,
            rssi_avg: c.u8()?,
            rssi_spread: c.u32_le()?,
            rtt_avg: c.u64_le()?,
            rtt_variance: c.u64_le()?,
            rtt_spread: c.u64_le()?,
            dist_avg: c.u64_le()?,
            dist_variance: c.u64_le()?,
            dist_spread: c.u64_le()?,
            timestamp: c.u64_le()?,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0; Self::ENCODED_LEN];
        let fields: [&[u8]; 13] = [
            &self.burst_index.to_le_bytes(),
            &self.attempts.to_le_bytes(),
            &self.successes.to_le_bytes(),
            &self.bursts_exponent.to_le_bytes(),
            &[self.burst_duration, self.ftms_per_burst, self.rssi_avg],
            &self.rssi_spread.to_le_bytes(),
            &self.rtt_avg.to_le_bytes(),
            &self.rtt_variance.to_le_bytes(),
            &self.rtt_spread.to_le_bytes(),
            &self.dist_avg.to_le_bytes(),
            &self.dist_variance.to_le_bytes(),
            &self.dist_spread.to_le_bytes(),
            &self.timestamp.to_le_bytes(),
        ];
        let mut at = 0;
        for f in fields {
            out[at..at + f.len()].copy_from_slice(f);
            at += f.len();
        }
        out
    }

    /// Average round trip time.
    ///
    /// ```
    /// # use csi::FtmMeasurement;
    /// # use uom::si::time::nanosecond;
    /// let m = FtmMeasurement { rtt_avg: 66_700, ..Default::default() };
    /// assert!((m.rtt().get::<nanosecond>() - 66.7).abs() < 1e-9);
    /// ```
    pub fn rtt(&self) -> Time {
        Time::new::<picosecond>(self.rtt_avg as f64)
    }

    pub fn rtt_spread(&self) -> Time {
        Time::new::<picosecond>(self.rtt_spread as f64)
    }

    /// Average distance to the peer.
    pub fn distance(&self) -> Length {
        Length::new::<millimeter>(self.dist_avg as f64)
    }

    pub fn distance_spread(&self) -> Length {
        Length::new::<millimeter>(self.dist_spread as f64)
    }

    /// Whether any of the burst's exchanges succeeded.
    pub fn is_success(&self) -> bool {
        self.successes > 0
    }
}
