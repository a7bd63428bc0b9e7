//! Control of Intel `iwlwifi` adapters through nl80211: interface and
//! channel management, CSI capture, FTM ranging and frame injection.

pub mod attr;
pub mod capture;
pub mod control;
mod error;
pub mod ftm;
pub mod inject;
pub mod nl80211;
pub mod queue;
pub mod transport;

pub use capture::{CsiFilter, Debugfs};
pub use control::{Channel, ChannelMode, WifiController};
pub use error::{Error, Result};
pub use ftm::{FtmOutcome, FtmRequest};
pub use inject::{InjectParams, Injector};
pub use queue::RecordQueue;
pub use transport::Transport;

#[cfg(test)]
mod fixtures {
    use csi::frame::HEADER_LEN;

    /// A capture header describing a payload of `num_subcarriers` samples
    /// per antenna pair.
    pub fn raw_header(rate: u32, num_rx: u8, num_tx: u8, num_subcarriers: u32) -> Vec<u8> {
        let mut h = vec![0; HEADER_LEN];
        let payload_len = 4 * num_subcarriers * num_rx as u32 * num_tx as u32;
        h[..4].copy_from_slice(&payload_len.to_le_bytes());
        h[12..20].copy_from_slice(&1_000_000u64.to_le_bytes());
        h[46] = num_rx;
        h[47] = num_tx;
        h[52..56].copy_from_slice(&num_subcarriers.to_le_bytes());
        h[92..96].copy_from_slice(&rate.to_le_bytes());
        h
    }
}
