//! Command and attribute numbers from `<linux/nl80211.h>`.

pub const FAMILY_NAME: &str = "nl80211";

pub(crate) const NLMSG_ERROR: u16 = 2;
pub(crate) const NLMSG_DONE: u16 = 3;

pub mod cmd {
    pub const GET_WIPHY: u8 = 1;
    pub const SET_WIPHY: u8 = 2;
    pub const GET_INTERFACE: u8 = 5;
    pub const SET_INTERFACE: u8 = 6;
    pub const NEW_INTERFACE: u8 = 7;
    pub const DEL_INTERFACE: u8 = 8;
    pub const NEW_BEACON: u8 = 15;
    pub const VENDOR: u8 = 103;
    pub const PEER_MEASUREMENT_START: u8 = 131;
    pub const PEER_MEASUREMENT_RESULT: u8 = 132;
    pub const PEER_MEASUREMENT_COMPLETE: u8 = 133;
}

pub mod attr {
    pub const WIPHY: u16 = 1;
    pub const IFINDEX: u16 = 3;
    pub const IFNAME: u16 = 4;
    pub const IFTYPE: u16 = 5;
    pub const MAC: u16 = 6;
    pub const BEACON_INTERVAL: u16 = 12;
    pub const DTIM_PERIOD: u16 = 13;
    pub const BEACON_HEAD: u16 = 14;
    pub const WIPHY_FREQ: u16 = 38;
    pub const WIPHY_CHANNEL_TYPE: u16 = 39;
    pub const SSID: u16 = 52;
    pub const AUTH_TYPE: u16 = 53;
    pub const WIPHY_TX_POWER_SETTING: u16 = 97;
    pub const WIPHY_TX_POWER_LEVEL: u16 = 98;
    pub const HIDDEN_SSID: u16 = 126;
    pub const WDEV: u16 = 153;
    pub const CHANNEL_WIDTH: u16 = 159;
    pub const CENTER_FREQ1: u16 = 160;
    pub const CENTER_FREQ2: u16 = 161;
    pub const VENDOR_ID: u16 = 195;
    pub const VENDOR_SUBCMD: u16 = 196;
    pub const VENDOR_DATA: u16 = 197;
    pub const SOCKET_OWNER: u16 = 204;
    pub const FTM_RESPONDER: u16 = 270;
    pub const PEER_MEASUREMENTS: u16 = 271;
    pub const WIPHY_FREQ_OFFSET: u16 = 290;
}

/// `enum nl80211_iftype`
pub mod iftype {
    pub const AP: u32 = 3;
    pub const MONITOR: u32 = 6;
}

/// `enum nl80211_chan_width`
pub mod chan_width {
    pub const W20_NOHT: u32 = 0;
    pub const W20: u32 = 1;
    pub const W40: u32 = 2;
    pub const W80: u32 = 3;
    pub const W80P80: u32 = 4;
    pub const W160: u32 = 5;
    pub const W320: u32 = 13;
}

/// `enum nl80211_channel_type`
pub mod channel_type {
    pub const NO_HT: u32 = 0;
    pub const HT20: u32 = 1;
    pub const HT40_MINUS: u32 = 2;
    pub const HT40_PLUS: u32 = 3;
}

pub const TX_POWER_FIXED: u32 = 2;

/// Peer measurement attributes, nested below [`attr::PEER_MEASUREMENTS`].
pub mod pmsr {
    pub const PEERS: u16 = 5;

    pub const PEER_ADDR: u16 = 1;
    pub const PEER_CHAN: u16 = 2;
    pub const PEER_REQ: u16 = 3;
    pub const PEER_RESP: u16 = 4;

    pub const REQ_DATA: u16 = 1;
    pub const RESP_DATA: u16 = 1;

    pub const TYPE_FTM: u16 = 1;

    pub const FTM_REQ_ASAP: u16 = 1;
    pub const FTM_REQ_PREAMBLE: u16 = 2;
    pub const FTM_REQ_NUM_BURSTS_EXP: u16 = 3;
    pub const FTM_REQ_BURST_PERIOD: u16 = 4;
    pub const FTM_REQ_BURST_DURATION: u16 = 5;
    pub const FTM_REQ_FTMS_PER_BURST: u16 = 6;

    pub const FTM_RESP_FAIL_REASON: u16 = 1;
    pub const FTM_RESP_BURST_INDEX: u16 = 2;
    pub const FTM_RESP_NUM_FTMR_ATTEMPTS: u16 = 3;
    pub const FTM_RESP_NUM_FTMR_SUCCESSES: u16 = 4;
    pub const FTM_RESP_NUM_BURSTS_EXP: u16 = 6;
    pub const FTM_RESP_BURST_DURATION: u16 = 7;
    pub const FTM_RESP_FTMS_PER_BURST: u16 = 8;
    pub const FTM_RESP_RSSI_AVG: u16 = 9;
    pub const FTM_RESP_RSSI_SPREAD: u16 = 10;
    pub const FTM_RESP_RTT_AVG: u16 = 13;
    pub const FTM_RESP_RTT_VARIANCE: u16 = 14;
    pub const FTM_RESP_RTT_SPREAD: u16 = 15;
    pub const FTM_RESP_DIST_AVG: u16 = 16;
    pub const FTM_RESP_DIST_VARIANCE: u16 = 17;
    pub const FTM_RESP_DIST_SPREAD: u16 = 18;

    /// `enum nl80211_preamble`
    pub const PREAMBLE_LEGACY: u32 = 0;
    pub const PREAMBLE_HT: u32 = 1;
    pub const PREAMBLE_VHT: u32 = 2;
    pub const PREAMBLE_HE: u32 = 4;
}

pub const FTM_RESPONDER_ENABLED: u16 = 1;

/// Intel's OUI and the `iwlmvm` vendor command that streams CSI.
pub mod vendor {
    pub const INTEL_OUI: u32 = 0x00_1735;
    pub const CSI_SUBCMD: u32 = 0x24;
    pub const ATTR_CSI_HDR: u16 = 0x4d;
    pub const ATTR_CSI_DATA: u16 = 0x4e;
}
