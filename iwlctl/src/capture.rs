//! Live CSI capture through the `iwlmvm` vendor command.
//!
//! CSI reporting is switched on per device in debugfs. Once it is, sending
//! the vendor command on the monitor interface subscribes the socket to a
//! stream of vendor events, each carrying one capture header and its raw
//! samples.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use csi::{frame::HEADER_LEN, ieee80211::Bandwidth, rate::Format, CaptureHeader, CsiRecord};
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    attr::Attrs,
    nl80211::{attr, cmd, vendor},
    transport::{Command, Flow, Identify, Link, Reply, Transport},
    Error, Result,
};

pub const DEBUGFS_ROOT: &str = "/sys/kernel/debug/iwlwifi";

/// The `csi_enabled` switches of every `iwlwifi` device.
#[derive(Debug, Clone)]
pub struct Debugfs {
    root: PathBuf,
}

impl Default for Debugfs {
    fn default() -> Self {
        Self::new(DEBUGFS_ROOT)
    }
}

impl Debugfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn error(&self, reason: impl Into<String>) -> Error {
        Error::Debugfs {
            path: self.root.clone(),
            reason: reason.into(),
        }
    }

    /// Writes the switch of every device that has one. Returns how many
    /// were written.
    pub fn set_csi(&self, enabled: bool) -> Result<usize> {
        if !self.root.is_dir() {
            return Err(self.error("not a directory, is iwlwifi built with debugfs?"));
        }

        let mut written = 0;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path().join("iwlmvm").join("csi_enabled");
            if !path.exists() {
                continue;
            }
            fs::write(&path, if enabled { "1\n" } else { "0\n" })?;
            debug!(path = %path.display(), enabled, "wrote CSI switch");
            written += 1;
        }

        if written == 0 {
            return Err(self.error("no device exposes iwlmvm/csi_enabled"));
        }
        Ok(written)
    }

    /// Enables CSI until the returned guard is dropped.
    pub fn enable(&self) -> Result<CsiEnabled<'_>> {
        info!("enabling CSI measurement");
        self.set_csi(true)?;
        Ok(CsiEnabled { debugfs: self })
    }
}

/// Disables CSI reporting when dropped.
#[derive(Debug)]
#[must_use = "CSI is disabled again as soon as this is dropped"]
pub struct CsiEnabled<'a> {
    debugfs: &'a Debugfs,
}

impl Drop for CsiEnabled<'_> {
    fn drop(&mut self) {
        info!("disabling CSI measurement");
        if let Err(e) = self.debugfs.set_csi(false) {
            warn!(%e, "failed to disable CSI");
        }
    }
}

/// Which captures to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsiFilter {
    pub bandwidth: Bandwidth,
    pub format: Format,
    /// Only keep captures with this MCS.
    pub mcs: Option<u8>,
}

impl CsiFilter {
    pub fn accepts(&self, header: &CaptureHeader) -> bool {
        if header.bandwidth() != Some(self.bandwidth) || header.format() != Some(self.format) {
            return false;
        }
        match self.mcs {
            Some(mcs) => (header.rate & 0xf) as u8 & self.format.mcs_mask() == mcs,
            None => true,
        }
    }
}

/// Extracts the capture from one vendor event.
///
/// Events without a header, or with a header of the wrong size, are not
/// captures and yield `None`.
pub fn decode_event(reply: &Reply) -> Result<Option<CsiRecord>> {
    // the payload is normally nested in the vendor data attribute
    let attrs = match reply.attrs().get(attr::VENDOR_DATA) {
        Some(data) => data.nested(),
        None => reply.attrs(),
    };
    decode_attrs(attrs)
}

fn decode_attrs(attrs: Attrs<'_>) -> Result<Option<CsiRecord>> {
    let Some(header) = attrs.get(vendor::ATTR_CSI_HDR) else {
        return Ok(None);
    };
    if header.payload.len() != HEADER_LEN {
        trace!(len = header.payload.len(), "skipping header of unexpected size");
        return Ok(None);
    }
    let Some(data) = attrs.get(vendor::ATTR_CSI_DATA) else {
        return Ok(None);
    };
    Ok(Some(CsiRecord::from_parts(header.payload, data.payload)?))
}

/// Counters of a finished [`listen`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenStats {
    pub events: u64,
    pub kept: u64,
    pub filtered: u64,
    pub malformed: u64,
}

/// Streams captures from the monitor interface `ifindex` into `on_record`
/// until the transport is stopped or `until` has passed.
///
/// Captures that fail to decode are logged and skipped. An error from
/// `on_record` ends the capture.
#[instrument(skip_all, fields(ifindex = ifindex))]
pub fn listen<L: Link>(
    transport: &mut Transport<L>,
    ifindex: u32,
    filter: &CsiFilter,
    until: Option<Instant>,
    mut on_record: impl FnMut(CsiRecord) -> Result<()>,
) -> Result<ListenStats> {
    let mut stats = ListenStats::default();
    info!(?filter, "listening for CSI");

    transport.execute(
        Command::new(cmd::VENDOR)
            .identify(Identify::NetDev(ifindex))
            .streaming()
            .attrs(|w| {
                w.put_u32(attr::VENDOR_ID, vendor::INTEL_OUI)?;
                w.put_u32(attr::VENDOR_SUBCMD, vendor::CSI_SUBCMD)
            })
            .on_reply(|reply| {
                stats.events += 1;
                match decode_event(reply) {
                    Ok(Some(record)) if filter.accepts(record.header()) => {
                        let h = record.header();
                        debug!(
                            subcarriers = h.num_subcarriers,
                            rx = h.num_rx,
                            tx = h.num_tx,
                            width = h.bandwidth().map(|b| b.mhz()),
                            format = ?h.format(),
                            "CSI"
                        );
                        stats.kept += 1;
                        on_record(record)?;
                    }
                    Ok(Some(_)) => stats.filtered += 1,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(%e, "dropping malformed capture");
                        stats.malformed += 1;
                    }
                }

                Ok(match until {
                    Some(t) if Instant::now() >= t => Flow::Stop,
                    _ => Flow::Continue,
                })
            }),
    )?;

    info!(?stats, "stopped listening");
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        attr::AttrWriter,
        fixtures::raw_header,
        transport::{testing::transport, Event},
    };

    const HT20: u32 = 0x4203;
    const VHT80: u32 = 0x1_5309;

    fn event(w: &mut AttrWriter, rate: u32) -> Result<()> {
        let header = raw_header(rate, 1, 1, 4);
        w.nest(attr::VENDOR_DATA, |w| {
            w.put(vendor::ATTR_CSI_HDR, &header)?;
            w.put(vendor::ATTR_CSI_DATA, &[7; 16])
        })
    }

    fn ht20() -> CsiFilter {
        CsiFilter {
            bandwidth: Bandwidth::Bw20,
            format: Format::Ht,
            mcs: None,
        }
    }

    #[test]
    fn debugfs_switches() {
        let dir = std::env::temp_dir().join(format!("iwlctl-debugfs-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        for dev in ["0000:00:14.3", "0000:02:00.0"] {
            fs::create_dir_all(dir.join(dev).join("iwlmvm")).unwrap();
            fs::write(dir.join(dev).join("iwlmvm/csi_enabled"), "").unwrap();
        }
        fs::create_dir_all(dir.join("other")).unwrap();

        let debugfs = Debugfs::new(&dir);
        {
            let _on = debugfs.enable().unwrap();
            let s = fs::read_to_string(dir.join("0000:00:14.3/iwlmvm/csi_enabled")).unwrap();
            assert_eq!(s, "1\n");
        }
        let s = fs::read_to_string(dir.join("0000:02:00.0/iwlmvm/csi_enabled")).unwrap();
        assert_eq!(s, "0\n");
        assert_eq!(debugfs.set_csi(true).unwrap(), 2);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn debugfs_missing() {
        let debugfs = Debugfs::new("/nonexistent/iwlwifi");
        assert!(matches!(debugfs.set_csi(true), Err(Error::Debugfs { .. })));

        let empty = std::env::temp_dir().join(format!("iwlctl-empty-{}", std::process::id()));
        fs::create_dir_all(&empty).unwrap();
        assert!(matches!(
            Debugfs::new(&empty).set_csi(true),
            Err(Error::Debugfs { .. })
        ));
        fs::remove_dir_all(&empty).unwrap();
    }

    #[test]
    fn filter() {
        let header = |rate| CaptureHeader::from_slice(&raw_header(rate, 1, 1, 4)).unwrap();
        assert!(ht20().accepts(&header(HT20)));
        assert!(!ht20().accepts(&header(VHT80)));

        let vht = CsiFilter {
            bandwidth: Bandwidth::Bw80,
            format: Format::Vht,
            mcs: Some(9),
        };
        assert!(vht.accepts(&header(VHT80)));
        assert!(!CsiFilter { mcs: Some(8), ..vht }.accepts(&header(VHT80)));
        // HT MCS 3 is also bits 2:0 of this word
        assert!(CsiFilter { mcs: Some(3), ..ht20() }.accepts(&header(HT20)));
    }

    #[test]
    fn decode_nested_and_flat() {
        let mut w = AttrWriter::new();
        event(&mut w, HT20).unwrap();
        let r = decode_event(&Reply::new(cmd::VENDOR, w.into_bytes()))
            .unwrap()
            .unwrap();
        assert_eq!(r.num_subcarriers(), 4);

        let mut w = AttrWriter::new();
        w.put(vendor::ATTR_CSI_HDR, &raw_header(HT20, 1, 1, 4)).unwrap();
        w.put(vendor::ATTR_CSI_DATA, &[0; 16]).unwrap();
        assert!(decode_event(&Reply::new(cmd::VENDOR, w.into_bytes()))
            .unwrap()
            .is_some());
    }

    #[test]
    fn wrong_header_size_is_skipped() {
        let mut w = AttrWriter::new();
        w.put(vendor::ATTR_CSI_HDR, &[0; 100]).unwrap();
        w.put(vendor::ATTR_CSI_DATA, &[0; 16]).unwrap();
        assert!(decode_event(&Reply::new(cmd::VENDOR, w.into_bytes()))
            .unwrap()
            .is_none());
    }

    #[test]
    fn listen_filters_and_stops() {
        let mut t = transport();
        t.link_mut()
            .push(Event::Ack)
            .reply(cmd::VENDOR, |w| event(w, HT20))
            .reply(cmd::VENDOR, |w| event(w, VHT80))
            .reply(cmd::VENDOR, |w| {
                w.nest(attr::VENDOR_DATA, |w| {
                    w.put(vendor::ATTR_CSI_HDR, &raw_header(HT20, 1, 1, 4))?;
                    w.put(vendor::ATTR_CSI_DATA, &[0; 3])
                })
            })
            .push(Event::Idle)
            .reply(cmd::VENDOR, |w| event(w, HT20));
        t.link_mut().push(Event::Idle);
        let stop = t.stop_flag().clone();

        let mut kept = Vec::new();
        let stats = listen(&mut t, 9, &ht20(), None, |r| {
            kept.push(r);
            if kept.len() == 2 {
                stop.store(true, std::sync::atomic::Ordering::Relaxed);
            }
            Ok(())
        })
        .unwrap();

        assert_eq!(kept.len(), 2);
        assert_eq!(
            stats,
            ListenStats {
                events: 4,
                kept: 2,
                filtered: 1,
                malformed: 1,
            }
        );

        let sent = &t.link().sent[0];
        assert_eq!(sent.cmd, cmd::VENDOR);
        let attrs = sent.attrs();
        assert_eq!(attrs.get(attr::IFINDEX).unwrap().u32().unwrap(), 9);
        assert_eq!(
            attrs.get(attr::VENDOR_ID).unwrap().u32().unwrap(),
            vendor::INTEL_OUI
        );
        assert_eq!(
            attrs.get(attr::VENDOR_SUBCMD).unwrap().u32().unwrap(),
            vendor::CSI_SUBCMD
        );
    }

    #[test]
    fn listen_deadline() {
        let mut t = transport();
        t.link_mut()
            .reply(cmd::VENDOR, |w| event(w, HT20))
            .reply(cmd::VENDOR, |w| event(w, HT20));
        let past = Instant::now() - Duration::from_millis(1);
        let stats = listen(&mut t, 9, &ht20(), Some(past), |_| Ok(())).unwrap();
        assert_eq!(stats.events, 1);
    }

    #[test]
    fn sink_error_ends_capture() {
        let mut t = transport();
        t.link_mut().reply(cmd::VENDOR, |w| event(w, HT20));
        let err = listen(&mut t, 9, &ht20(), None, |_| {
            Err(Error::Io(std::io::ErrorKind::BrokenPipe.into()))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
