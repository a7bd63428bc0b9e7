//! Post-processing of decoded CSI.
//!
//! All passes work on the magnitude and phase of a [`CsiRecord`], one
//! antenna pair at a time, and recompose the complex samples afterwards.

use std::{
    f64::consts::{PI, TAU},
    fmt,
    str::FromStr,
};

use ndarray::{Array1, ArrayViewMut1, Axis, Zip};
use num_complex::Complex;

use crate::{
    frame::{CsiRecord, HEADER_LEN},
    ieee80211::pilot_indices,
};

/// Kernel used to fill in pilot subcarriers from their neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interpolation {
    Linear,
    Cosine,
    Cubic,
}

impl Interpolation {
    pub const ALL: [Self; 3] = [Self::Linear, Self::Cosine, Self::Cubic];

    /// Estimates `lane[i]` halfway between its neighbours, or `None` if the
    /// kernel would need a neighbour outside of the lane.
    fn estimate(self, lane: &ArrayViewMut1<f64>, i: usize) -> Option<f64> {
        const MU: f64 = 0.5;

        let reach = match self {
            Self::Linear | Self::Cosine => 1,
            Self::Cubic => 2,
        };
        if i < reach || i + reach >= lane.len() {
            return None;
        }

        Some(match self {
            Self::Linear => linear(lane[i - 1], lane[i + 1], MU),
            Self::Cosine => cosine(lane[i - 1], lane[i + 1], MU),
            Self::Cubic => cubic(lane[i - 2], lane[i - 1], lane[i + 1], lane[i + 2], MU),
        })
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Linear => "linear",
            Self::Cosine => "cosine",
            Self::Cubic => "cubic",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown interpolation {0:?}")]
pub struct UnknownInterpolation(String);

impl FromStr for Interpolation {
    type Err = UnknownInterpolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|i| i.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownInterpolation(s.to_owned()))
    }
}

pub fn linear(y1: f64, y2: f64, mu: f64) -> f64 {
    y1 * (1. - mu) + y2 * mu
}

pub fn cosine(y1: f64, y2: f64, mu: f64) -> f64 {
    let mu2 = (1. - (mu * PI).cos()) / 2.;
    y1 * (1. - mu2) + y2 * mu2
}

/// Cubic interpolation between `y1` and `y2`.
pub fn cubic(y0: f64, y1: f64, y2: f64, y3: f64, mu: f64) -> f64 {
    let a0 = y3 - y2 - y0 + y1;
    let a1 = y0 - y1 - a0;
    let a2 = y2 - y0;
    let a3 = y1;
    a0 * mu.powi(3) + a1 * mu.powi(2) + a2 * mu + a3
}

/// Unwraps a phase sequence in place so that no two adjacent values differ
/// by more than π.
///
/// ```
/// # use ndarray::array;
/// let mut phase = array![3.0, -3.0, 3.1];
/// csi::proc::unwrap(phase.view_mut());
/// assert!((phase[1] - (2. * std::f64::consts::PI - 3.)).abs() < 1e-12);
/// ```
pub fn unwrap(mut phase: ArrayViewMut1<f64>) {
    for i in 1..phase.len() {
        let prev = phase[i - 1];
        let delta = (phase[i] - prev + PI).rem_euclid(TAU) - PI;
        phase[i] = prev + delta;
    }
}

/// Subcarrier positions relative to the centre of a segment of `n` values,
/// skipping zero: `-n/2..=-1` followed by `1..=n - n/2`.
fn centred_positions(n: usize) -> Array1<f64> {
    let half = (n / 2) as i64;
    (-half..0)
        .chain(1..=(n as i64 - half))
        .map(|k| k as f64)
        .collect()
}

impl CsiRecord {
    /// Keeps a copy of the current samples, unless one is already held.
    pub fn backup(&mut self) {
        if self.backup.is_none() {
            self.backup = Some(self.csi.clone());
        }
    }

    /// Returns to the samples saved by [`CsiRecord::backup`].
    pub fn restore(&mut self) {
        if let Some(backup) = &self.backup {
            self.csi.assign(backup);
            self.magnitude = self.csi.mapv(|c| c.norm());
            self.phase = self.csi.mapv(|c| c.arg());
        }
    }

    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// Rebuilds the complex samples from magnitude and phase.
    fn recompose(&mut self) {
        Zip::from(&mut self.csi)
            .and(&self.magnitude)
            .and(&self.phase)
            .for_each(|c, &m, &p| *c = Complex::from_polar(m, p));
    }

    pub fn unwrap_phase(&mut self) {
        for lane in self.phase.lanes_mut(Axis(2)) {
            unwrap(lane);
        }
    }

    /// Replaces the pilot subcarriers' magnitude and phase with values
    /// interpolated from the neighbouring data subcarriers.
    ///
    /// Captures of unknown format or bandwidth have no pilot table and are
    /// left untouched, as are pilots too close to the edge for the kernel.
    pub fn interpolate(&mut self, kind: Interpolation) {
        let (Some(format), Some(bandwidth)) = (self.header().format(), self.header().bandwidth())
        else {
            return;
        };
        let pilots = pilot_indices(format, bandwidth);
        if pilots.is_empty() {
            return;
        }

        for values in [&mut self.magnitude, &mut self.phase] {
            for mut lane in values.lanes_mut(Axis(2)) {
                for &p in pilots {
                    let p = p as usize;
                    if let Some(v) = kind.estimate(&lane, p) {
                        lane[p] = v;
                    }
                }
            }
        }

        self.recompose();
    }

    /// Removes the linear phase trend (sampling time and frequency offset)
    /// from every antenna pair.
    ///
    /// The phase is unwrapped first. Then, with subcarriers numbered around
    /// the centre of the segment, the slope between the first and last
    /// subcarrier and the mean phase are subtracted.
    pub fn calibrate_phase(&mut self) {
        self.unwrap_phase();

        let n = self.num_subcarriers();
        if n < 2 {
            return;
        }
        let positions = centred_positions(n);
        let span = positions[n - 1] - positions[0];

        for mut lane in self.phase.lanes_mut(Axis(2)) {
            let slope = (lane[n - 1] - lane[0]) / span;
            let offset = lane.mean().unwrap_or_default();
            Zip::from(&mut lane)
                .and(&positions)
                .for_each(|p, &k| *p -= slope * k + offset);
        }

        self.recompose();
    }

    /// Encodes the processed samples after the capture header, whose payload
    /// size is rewritten to match. Each sample is stored as little-endian
    /// `f64` real and imaginary parts.
    pub fn processed_bytes(&self) -> Vec<u8> {
        let mut header = self.header().clone();
        header.payload_len = (self.csi.len() * 16) as u32;

        let mut out = Vec::with_capacity(HEADER_LEN + self.csi.len() * 16);
        out.extend_from_slice(&header.to_bytes());
        for c in &self.csi {
            out.extend_from_slice(&c.re.to_le_bytes());
            out.extend_from_slice(&c.im.to_le_bytes());
        }
        out
    }
}

/// A sequence of processing passes applied to each record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pipeline {
    pub interpolation: Option<Interpolation>,
    pub calibrate: bool,
}

impl Pipeline {
    /// Applies the passes starting from the record's original samples, so
    /// running a pipeline twice gives the same result as running it once.
    pub fn apply(&self, record: &mut CsiRecord) {
        record.backup();
        record.restore();
        if let Some(kind) = self.interpolation {
            record.interpolate(kind);
        }
        if self.calibrate {
            record.calibrate_phase();
        }
    }

    pub fn is_noop(&self) -> bool {
        self.interpolation.is_none() && !self.calibrate
    }
}
