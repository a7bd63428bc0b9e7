//! Interface and channel management.
//!
//! [`WifiController`] drives the adapter through the states a capture needs:
//! existing interfaces are removed and remembered, a monitor interface is
//! created and tuned, and for FTM the adapter is toggled between the monitor
//! interface and an access point interface. On shutdown the remembered
//! interfaces are put back.

use std::{
    ffi::CString,
    fmt,
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
    str::FromStr,
    thread,
    time::Duration,
};

use csi::ieee80211::Bandwidth;
use macaddr::MacAddr6;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    attr::{AttrWriter, Attrs},
    nl80211::{attr, chan_width, channel_type, cmd, TX_POWER_FIXED},
    transport::{Command, Flow, Identify, Link, Nl80211, Transport},
    Error, Result,
};

pub const MONITOR_INTERFACE: &str = "mon0";
pub const AP_INTERFACE: &str = "ap0";

/// Interface type, `enum nl80211_iftype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IfType {
    Unspecified,
    Adhoc,
    Station,
    Ap,
    ApVlan,
    Wds,
    Monitor,
    MeshPoint,
    P2pClient,
    P2pGo,
    P2pDevice,
    Ocb,
    Nan,
    Other(u32),
}

impl IfType {
    const KNOWN: [IfType; 13] = [
        IfType::Unspecified,
        IfType::Adhoc,
        IfType::Station,
        IfType::Ap,
        IfType::ApVlan,
        IfType::Wds,
        IfType::Monitor,
        IfType::MeshPoint,
        IfType::P2pClient,
        IfType::P2pGo,
        IfType::P2pDevice,
        IfType::Ocb,
        IfType::Nan,
    ];

    pub fn code(self) -> u32 {
        match self {
            IfType::Other(code) => code,
            known => Self::KNOWN
                .iter()
                .position(|&t| t == known)
                .unwrap_or_default() as u32,
        }
    }

    pub fn from_code(code: u32) -> Self {
        Self::KNOWN
            .get(code as usize)
            .copied()
            .unwrap_or(IfType::Other(code))
    }
}

impl fmt::Display for IfType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IfType::Unspecified => "unspecified",
            IfType::Adhoc => "IBSS",
            IfType::Station => "managed",
            IfType::Ap => "AP",
            IfType::ApVlan => "AP/VLAN",
            IfType::Wds => "WDS",
            IfType::Monitor => "monitor",
            IfType::MeshPoint => "mesh point",
            IfType::P2pClient => "P2P-client",
            IfType::P2pGo => "P2P-GO",
            IfType::P2pDevice => "P2P-device",
            IfType::Ocb => "outside context of a BSS",
            IfType::Nan => "NAN",
            IfType::Other(code) => return write!(f, "unknown ({code})"),
        })
    }
}

/// Channel width and position of the secondary channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    /// 20 MHz without HT.
    NoHt,
    Ht20,
    /// 40 MHz with the secondary channel above the control channel.
    Ht40Plus,
    /// 40 MHz with the secondary channel below the control channel.
    Ht40Minus,
    Vht80,
    Vht160,
    Eht320,
}

// start frequencies of the 80, 160 and 320 MHz channels
const BW80_STARTS: [u32; 20] = [
    5180, 5260, 5500, 5580, 5660, 5745, 5955, 6035, 6115, 6195, 6275, 6355, 6435, 6515, 6595,
    6675, 6755, 6835, 6915, 6995,
];
const BW160_STARTS: [u32; 9] = [5180, 5500, 5955, 6115, 6275, 6435, 6595, 6755, 6915];
const BW320_STARTS: [u32; 6] = [5955, 6115, 6275, 6435, 6595, 6755];

impl ChannelMode {
    /// `enum nl80211_chan_width`.
    pub const fn width(self) -> u32 {
        match self {
            ChannelMode::NoHt => chan_width::W20_NOHT,
            ChannelMode::Ht20 => chan_width::W20,
            ChannelMode::Ht40Plus | ChannelMode::Ht40Minus => chan_width::W40,
            ChannelMode::Vht80 => chan_width::W80,
            ChannelMode::Vht160 => chan_width::W160,
            ChannelMode::Eht320 => chan_width::W320,
        }
    }

    pub const fn bandwidth(self) -> Bandwidth {
        match self {
            ChannelMode::NoHt | ChannelMode::Ht20 => Bandwidth::Bw20,
            ChannelMode::Ht40Plus | ChannelMode::Ht40Minus => Bandwidth::Bw40,
            ChannelMode::Vht80 => Bandwidth::Bw80,
            ChannelMode::Vht160 => Bandwidth::Bw160,
            ChannelMode::Eht320 => Bandwidth::Bw320,
        }
    }

    /// Center frequency of the whole channel whose control channel is at
    /// `freq`.
    ///
    /// ```
    /// # use iwlctl::control::ChannelMode;
    /// assert_eq!(ChannelMode::Ht40Minus.center_freq1(5200), 5190);
    /// assert_eq!(ChannelMode::Vht80.center_freq1(5200), 5210);
    /// assert_eq!(ChannelMode::Vht160.center_freq1(5955), 6025);
    /// // no 80 MHz channel starts below 5180
    /// assert_eq!(ChannelMode::Vht80.center_freq1(2412), 2412);
    /// ```
    pub fn center_freq1(self, freq: u32) -> u32 {
        let lookup = |starts: &[u32], span: u32, offset: u32| {
            starts
                .iter()
                .find(|&&s| (s..s + span).contains(&freq))
                .map_or(freq, |s| s + offset)
        };
        match self {
            ChannelMode::NoHt | ChannelMode::Ht20 => freq,
            ChannelMode::Ht40Plus => freq + 10,
            ChannelMode::Ht40Minus => freq.saturating_sub(10),
            ChannelMode::Vht80 => lookup(&BW80_STARTS, 80, 30),
            ChannelMode::Vht160 => lookup(&BW160_STARTS, 160, 70),
            ChannelMode::Eht320 => lookup(&BW320_STARTS, 160, 150),
        }
    }

    /// Legacy `enum nl80211_channel_type`, for widths that have one.
    pub fn channel_type(self, freq: u32) -> Option<u32> {
        match self {
            ChannelMode::NoHt => Some(channel_type::NO_HT),
            ChannelMode::Ht20 => Some(channel_type::HT20),
            ChannelMode::Ht40Plus | ChannelMode::Ht40Minus => {
                Some(if freq > self.center_freq1(freq) {
                    channel_type::HT40_MINUS
                } else {
                    channel_type::HT40_PLUS
                })
            }
            _ => None,
        }
    }
}

/// Error returned for an unknown channel mode name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown channel width {0:?}, expected one of 20, 40, HT40-, HT40+, NOHT, 80, 160, 320")]
pub struct UnknownChannelMode(String);

impl FromStr for ChannelMode {
    type Err = UnknownChannelMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "20" => ChannelMode::Ht20,
            "40" | "HT40+" => ChannelMode::Ht40Plus,
            "HT40-" => ChannelMode::Ht40Minus,
            "NOHT" => ChannelMode::NoHt,
            "80" => ChannelMode::Vht80,
            "160" => ChannelMode::Vht160,
            "320" | "320MHZ" => ChannelMode::Eht320,
            _ => return Err(UnknownChannelMode(s.to_owned())),
        })
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelMode::NoHt => "NOHT",
            ChannelMode::Ht20 => "20",
            ChannelMode::Ht40Plus => "40",
            ChannelMode::Ht40Minus => "HT40-",
            ChannelMode::Vht80 => "80",
            ChannelMode::Vht160 => "160",
            ChannelMode::Eht320 => "320",
        })
    }
}

/// A control channel frequency in MHz and how wide the channel around it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel {
    pub freq: u32,
    pub mode: ChannelMode,
}

impl Channel {
    pub fn new(freq: u32, mode: ChannelMode) -> Self {
        Self { freq, mode }
    }

    /// Full channel definition, as `SET_WIPHY` takes it.
    pub(crate) fn write_wiphy(&self, w: &mut AttrWriter) -> Result<()> {
        w.put_u32(attr::WIPHY_FREQ, self.freq)?;
        w.put_u32(attr::WIPHY_FREQ_OFFSET, 0)?;
        w.put_u32(attr::CHANNEL_WIDTH, self.mode.width())?;
        if let Some(t) = self.mode.channel_type(self.freq) {
            w.put_u32(attr::WIPHY_CHANNEL_TYPE, t)?;
        }
        let cf1 = self.mode.center_freq1(self.freq);
        if cf1 != 0 {
            w.put_u32(attr::CENTER_FREQ1, cf1)?;
        }
        Ok(())
    }

    /// Frequency and width only, as beacons and measurement requests take it.
    pub(crate) fn write_short(&self, w: &mut AttrWriter) -> Result<()> {
        w.put_u32(attr::WIPHY_FREQ, self.freq)?;
        w.put_u32(
            attr::CHANNEL_WIDTH,
            match self.mode.bandwidth() {
                Bandwidth::Bw20 => chan_width::W20,
                Bandwidth::Bw40 => chan_width::W40,
                Bandwidth::Bw80 => chan_width::W80,
                Bandwidth::Bw160 => chan_width::W160,
                Bandwidth::Bw320 => chan_width::W320,
            },
        )
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MHz", self.freq)?;
        if let Some(ch) = csi::ieee80211::freq_to_channel(self.freq) {
            write!(f, " (channel {ch})")?;
        }
        write!(f, ", width {}", self.mode)
    }
}

/// State of one wireless interface, as reported by `GET_INTERFACE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub name: String,
    pub ifindex: Option<u32>,
    pub wdev: Option<u64>,
    pub mac: Option<MacAddr6>,
    pub ssid: Option<String>,
    pub iftype: IfType,
    pub phy: Option<u32>,
    /// Control channel frequency, in MHz.
    pub freq: Option<u32>,
    pub width: Option<u32>,
    pub center_freq1: Option<u32>,
    pub center_freq2: Option<u32>,
    /// Only reported when the channel width is not.
    pub channel_type: Option<u32>,
    /// In dBm.
    pub tx_power: Option<u32>,
}

impl Default for InterfaceInfo {
    fn default() -> Self {
        Self {
            name: "Unnamed/non-netdev interface".to_owned(),
            ifindex: None,
            wdev: None,
            mac: None,
            ssid: None,
            iftype: IfType::Unspecified,
            phy: None,
            freq: None,
            width: None,
            center_freq1: None,
            center_freq2: None,
            channel_type: None,
            tx_power: None,
        }
    }
}

impl InterfaceInfo {
    pub fn from_attrs(attrs: Attrs<'_>) -> Result<Self> {
        let mut info = Self::default();
        for a in attrs.clone() {
            match a.kind {
                attr::IFNAME => info.name = a.str()?.to_owned(),
                attr::IFINDEX => info.ifindex = Some(a.u32()?),
                attr::WDEV => info.wdev = Some(a.u64()?),
                attr::MAC => info.mac = Some(a.mac()?),
                attr::SSID => info.ssid = Some(String::from_utf8_lossy(a.payload).into_owned()),
                attr::IFTYPE => info.iftype = IfType::from_code(a.u32()?),
                attr::WIPHY => info.phy = Some(a.u32()?),
                attr::WIPHY_FREQ => info.freq = Some(a.u32()?),
                attr::WIPHY_TX_POWER_LEVEL => info.tx_power = Some(a.u32()? / 100),
                _ => {}
            }
        }

        if let Some(width) = attrs.get(attr::CHANNEL_WIDTH) {
            info.width = Some(width.u32()?);
            info.center_freq1 = attrs.get(attr::CENTER_FREQ1).map(|a| a.u32()).transpose()?;
            info.center_freq2 = attrs.get(attr::CENTER_FREQ2).map(|a| a.u32()).transpose()?;
        } else if let Some(t) = attrs.get(attr::WIPHY_CHANNEL_TYPE) {
            info.channel_type = Some(t.u32()?);
        }
        Ok(info)
    }
}

impl fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.iftype)?;
        if let Some(phy) = self.phy {
            write!(f, " on phy#{phy}")?;
        }
        if let Some(freq) = self.freq {
            write!(f, " at {freq} MHz")?;
        }
        Ok(())
    }
}

/// Operations on network devices that go through `ioctl` rather than
/// netlink.
pub trait NetDevice {
    /// Kernel interface index of `name`.
    fn index(&self, name: &str) -> Result<u32>;

    /// Brings `name` up or down.
    fn set_up(&self, name: &str, up: bool) -> Result<()>;
}

/// [`NetDevice`] backed by `if_nametoindex` and `SIOCSIFFLAGS`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ioctl;

fn ifname(name: &str) -> Result<CString> {
    if name.len() >= libc::IFNAMSIZ {
        return Err(Error::NoInterface(name.to_owned()));
    }
    CString::new(name).map_err(|_| Error::NoInterface(name.to_owned()))
}

impl NetDevice for Ioctl {
    fn index(&self, name: &str) -> Result<u32> {
        let c = ifname(name)?;
        // SAFETY: `c` is a valid NUL-terminated string for the duration of the call.
        match unsafe { libc::if_nametoindex(c.as_ptr()) } {
            0 => Err(Error::NoInterface(name.to_owned())),
            index => Ok(index),
        }
    }

    fn set_up(&self, name: &str, up: bool) -> Result<()> {
        let c = ifname(name)?;

        // SAFETY: plain socket creation, ownership moves into `OwnedFd`.
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: `fd` is a fresh descriptor nobody else owns.
        let sock = unsafe { OwnedFd::from_raw_fd(fd) };

        // SAFETY: `ifreq` is plain old data, all zeroes is a valid value.
        let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
        for (dst, &src) in req.ifr_name.iter_mut().zip(c.as_bytes()) {
            *dst = src as libc::c_char;
        }

        // SAFETY: `req` is a valid `ifreq` for both requests.
        unsafe {
            if libc::ioctl(sock.as_raw_fd(), libc::SIOCGIFFLAGS as _, &mut req as *mut libc::ifreq) < 0 {
                return Err(io::Error::last_os_error().into());
            }
            if up {
                req.ifr_ifru.ifru_flags |= libc::IFF_UP as libc::c_short;
            } else {
                req.ifr_ifru.ifru_flags &= !(libc::IFF_UP as libc::c_short);
            }
            if libc::ioctl(sock.as_raw_fd(), libc::SIOCSIFFLAGS as _, &req as *const libc::ifreq) < 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        Ok(())
    }
}

/// How often and how patiently a state transition is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retry {
    pub attempts: u32,
    pub interval: Duration,
    /// Pause after creating an interface before reconfiguring it.
    pub settle: Duration,
}

impl Default for Retry {
    fn default() -> Self {
        Self {
            attempts: 50,
            interval: Duration::from_millis(200),
            settle: Duration::from_millis(100),
        }
    }
}

/// Manages the adapter's interfaces over nl80211.
#[derive(Debug)]
pub struct WifiController<L = Nl80211, D = Ioctl> {
    transport: Transport<L>,
    netdev: D,
    mac: MacAddr6,
    phys: Vec<u32>,
    removed: Vec<InterfaceInfo>,
    retry: Retry,
}

impl<L: Link, D: NetDevice> WifiController<L, D> {
    /// Interfaces created by this controller get `mac`.
    pub fn new(transport: Transport<L>, netdev: D, mac: MacAddr6) -> Self {
        Self {
            transport,
            netdev,
            mac,
            phys: Vec::new(),
            removed: Vec::new(),
            retry: Retry::default(),
        }
    }

    pub fn with_retry(mut self, retry: Retry) -> Self {
        self.retry = retry;
        self
    }

    pub fn transport_mut(&mut self) -> &mut Transport<L> {
        &mut self.transport
    }

    pub fn netdev(&self) -> &D {
        &self.netdev
    }

    /// Interfaces removed by [`Self::take_over`], waiting to be restored.
    pub fn removed(&self) -> &[InterfaceInfo] {
        &self.removed
    }

    /// Lists every wireless interface that has a netdev.
    pub fn enumerate_interfaces(&mut self) -> Result<Vec<InterfaceInfo>> {
        let mut found = Vec::new();
        self.transport
            .execute(Command::new(cmd::GET_INTERFACE).dump().on_reply(|r| {
                let info = InterfaceInfo::from_attrs(r.attrs())?;
                if info.ifindex.is_some() {
                    found.push(info);
                }
                Ok(Flow::Continue)
            }))?;
        debug!(count = found.len(), "enumerated interfaces");
        Ok(found)
    }

    /// Lists physical devices and remembers them for interface creation.
    pub fn enumerate_phys(&mut self) -> Result<&[u32]> {
        let mut phys = Vec::new();
        self.transport
            .execute(Command::new(cmd::GET_WIPHY).dump().on_reply(|r| {
                if let Some(a) = r.attrs().get(attr::WIPHY) {
                    let phy = a.u32()?;
                    // split dumps describe one device over several messages
                    if !phys.contains(&phy) {
                        phys.push(phy);
                    }
                }
                Ok(Flow::Continue)
            }))?;
        debug!(?phys, "enumerated physical devices");
        self.phys = phys;
        Ok(&self.phys)
    }

    /// Current state of the interface called `name`.
    pub fn refresh(&mut self, name: &str) -> Result<InterfaceInfo> {
        let ifindex = self.netdev.index(name)?;
        let mut info = None;
        self.transport.execute(
            Command::new(cmd::GET_INTERFACE)
                .identify(Identify::NetDev(ifindex))
                .on_reply(|r| {
                    if info.is_none() {
                        info = Some(InterfaceInfo::from_attrs(r.attrs())?);
                    }
                    Ok(Flow::Continue)
                }),
        )?;
        info.ok_or_else(|| Error::NoInterface(name.to_owned()))
    }

    /// Creates `name` on the first physical device.
    pub fn create_interface(&mut self, name: &str, iftype: IfType) -> Result<()> {
        let mac = self.mac;
        self.new_interface(name, iftype, mac)
    }

    fn new_interface(&mut self, name: &str, iftype: IfType, mac: MacAddr6) -> Result<()> {
        if self.phys.is_empty() {
            self.enumerate_phys()?;
        }
        let phy = *self.phys.first().ok_or(Error::NoPhy)?;
        info!(name, %iftype, phy, "creating interface");
        self.transport.execute(
            Command::new(cmd::NEW_INTERFACE)
                .identify(Identify::Phy(phy))
                .attrs(|w| {
                    w.put_str(attr::IFNAME, name)?;
                    w.put_u32(attr::IFTYPE, iftype.code())?;
                    w.put_mac(attr::MAC, mac)
                }),
        )
    }

    pub fn remove_interface(&mut self, ifindex: u32) -> Result<()> {
        self.transport
            .execute(Command::new(cmd::DEL_INTERFACE).identify(Identify::NetDev(ifindex)))
    }

    /// Removes `name` if it exists. Returns whether it did.
    pub fn remove_named(&mut self, name: &str) -> Result<bool> {
        match self.netdev.index(name) {
            Ok(ifindex) => {
                info!(name, "removing interface");
                self.remove_interface(ifindex)?;
                Ok(true)
            }
            Err(Error::NoInterface(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn set_up(&self, name: &str, up: bool) -> Result<()> {
        debug!(name, up, "setting link state");
        self.netdev.set_up(name, up)
    }

    #[instrument(skip(self))]
    pub fn set_channel(&mut self, name: &str, channel: Channel) -> Result<()> {
        let ifindex = self.netdev.index(name)?;
        debug!(%channel, "tuning");
        self.transport.execute(
            Command::new(cmd::SET_WIPHY)
                .identify(Identify::NetDev(ifindex))
                .attrs(|w| channel.write_wiphy(w)),
        )
    }

    /// Fixes the transmit power of the device behind `name`, in dBm.
    pub fn set_tx_power(&mut self, name: &str, dbm: u32) -> Result<()> {
        let ifindex = self.netdev.index(name)?;
        debug!(name, dbm, "setting tx power");
        self.transport.execute(
            Command::new(cmd::SET_WIPHY)
                .identify(Identify::NetDev(ifindex))
                .attrs(|w| {
                    w.put_u32(attr::WIPHY_TX_POWER_SETTING, TX_POWER_FIXED)?;
                    w.put_u32(attr::WIPHY_TX_POWER_LEVEL, dbm * 100)
                }),
        )
    }

    pub fn set_iftype(&mut self, name: &str, iftype: IfType) -> Result<()> {
        let ifindex = self.netdev.index(name)?;
        self.transport.execute(
            Command::new(cmd::SET_INTERFACE)
                .identify(Identify::NetDev(ifindex))
                .attrs(|w| w.put_u32(attr::IFTYPE, iftype.code())),
        )
    }

    /// Repeats `attempt` until it reports success. Failed attempts are
    /// expected while the device settles and are only logged.
    fn converge(
        &mut self,
        what: &str,
        mut attempt: impl FnMut(&mut Self) -> Result<bool>,
    ) -> Result<()> {
        for n in 1..=self.retry.attempts {
            if self.transport.is_stopped() {
                return Err(Error::Cancelled);
            }
            match attempt(self) {
                Ok(true) => {
                    debug!(what, attempts = n, "converged");
                    return Ok(());
                }
                Ok(false) => trace!(what, attempt = n, "not there yet"),
                Err(e) => trace!(what, attempt = n, %e, "attempt failed"),
            }
            thread::sleep(self.retry.interval);
        }
        Err(Error::Convergence {
            what: what.to_owned(),
            attempts: self.retry.attempts,
        })
    }

    /// Brings the monitor interface up on `channel`, creating it if needed.
    pub fn enter_monitor(&mut self, channel: Channel, tx_power: u32) -> Result<()> {
        if self.netdev.index(MONITOR_INTERFACE).is_err() {
            self.create_interface(MONITOR_INTERFACE, IfType::Monitor)?;
        }
        self.converge("monitor channel", |c| {
            c.set_up(MONITOR_INTERFACE, true)?;
            c.set_channel(MONITOR_INTERFACE, channel)?;
            Ok(c.refresh(MONITOR_INTERFACE)?.freq == Some(channel.freq))
        })?;
        self.set_tx_power(MONITOR_INTERFACE, tx_power)
    }

    /// Replaces the running monitor interface with an access point
    /// interface.
    pub fn enter_ap(&mut self, tx_power: u32) -> Result<()> {
        if self.netdev.index(AP_INTERFACE).is_err() {
            self.create_interface(AP_INTERFACE, IfType::Monitor)?;
            thread::sleep(self.retry.settle);
        }
        self.converge("access point mode", |c| {
            c.set_up(MONITOR_INTERFACE, false)?;
            c.set_iftype(AP_INTERFACE, IfType::Ap)?;
            Ok(c.refresh(AP_INTERFACE)?.iftype == IfType::Ap)
        })?;
        self.set_up(AP_INTERFACE, true)?;
        self.set_tx_power(AP_INTERFACE, tx_power)
    }

    /// Takes the access point interface down again.
    pub fn leave_ap(&mut self) -> Result<()> {
        self.remove_named(AP_INTERFACE).map(drop)
    }

    /// Removes every wireless interface, remembering each so
    /// [`Self::restore`] can recreate it, then creates the monitor
    /// interface on `channel`.
    #[instrument(skip(self))]
    pub fn take_over(&mut self, channel: Channel, tx_power: u32) -> Result<()> {
        let existing = self.enumerate_interfaces()?;
        self.enumerate_phys()?;

        for iface in existing {
            let Some(ifindex) = iface.ifindex else {
                continue;
            };
            info!(name = %iface.name, "removing interface");
            self.remove_interface(ifindex)?;
            self.removed.push(iface);
        }

        self.create_interface(MONITOR_INTERFACE, IfType::Monitor)?;
        self.set_up(MONITOR_INTERFACE, true)?;
        self.set_channel(MONITOR_INTERFACE, channel)?;
        thread::sleep(self.retry.settle * 5);
        self.set_tx_power(MONITOR_INTERFACE, tx_power)
    }

    /// Deletes the interfaces this controller created and recreates the ones
    /// it removed, with their original types. Runs every step even when an
    /// earlier one fails and reports the first failure.
    pub fn restore(&mut self) -> Result<()> {
        let mut first = None;
        let mut note = |r: Result<()>| {
            if let Err(e) = r {
                warn!(%e, "restore step failed");
                first.get_or_insert(e);
            }
        };

        for name in [MONITOR_INTERFACE, AP_INTERFACE] {
            note(self.remove_named(name).map(drop));
        }

        for iface in std::mem::take(&mut self.removed) {
            info!(name = %iface.name, iftype = %iface.iftype, "recovering interface");
            let mac = iface.mac.unwrap_or(self.mac);
            note(self.new_interface(&iface.name, iface.iftype, mac));
        }

        first.map_or(Ok(()), Err)
    }
}
