//! Codecs and signal processing for channel state information reported by
//! Intel `iwlwifi` firmware.

pub mod cursor;
pub mod frame;
pub mod ftm;
pub mod ieee80211;
pub mod proc;
pub mod rate;

pub use frame::{CaptureHeader, CsiRecord};
pub use ftm::FtmMeasurement;
pub use rate::RateDescriptor;
