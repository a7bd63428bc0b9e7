//! Fine timing measurement through nl80211 peer measurements.
//!
//! An initiator asks the kernel to range against one peer; results arrive
//! as asynchronous `PEER_MEASUREMENT_RESULT` messages followed by a
//! `PEER_MEASUREMENT_COMPLETE`. A responder is an access point that
//! advertises FTM support in its beacons.

use std::time::{SystemTime, UNIX_EPOCH};

use csi::{rate::Format, FtmMeasurement};
use macaddr::MacAddr6;
use tracing::{debug, info, instrument};

use crate::{
    attr::{Attr, AttrWriter, Attrs},
    control::Channel,
    nl80211::{attr, cmd, pmsr, FTM_RESPONDER_ENABLED},
    transport::{Command, Flow, Identify, Link, Reply, Transport},
    Result,
};

/// Start of the beacon frame, up to and including the DS parameter set.
const BEACON_HEAD: [u8; 58] = [
    0x80, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xea, 0xb9, 0xcc, 0xc2, 0x4a,
    0xaf, 0xea, 0xb9, 0xcc, 0xc2, 0x4a, 0xaf, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x64, 0x00, 0x01, 0x04, 0x00, 0x07, 0x46, 0x65, 0x69, 0x74, 0x43, 0x53, 0x49,
    0x01, 0x08, 0x82, 0x84, 0x8b, 0x96, 0x0c, 0x12, 0x18, 0x24, 0x03, 0x01, 0x01,
];
pub const RESPONDER_SSID: &str = "FeitCSI";
const BEACON_INTERVAL: u32 = 100;
const DTIM_PERIOD: u32 = 2;
const HIDDEN_SSID_NOT_IN_USE: u32 = 0;
const AUTHTYPE_OPEN_SYSTEM: u32 = 0;

/// `enum nl80211_preamble` for frames of `format`.
fn preamble(format: Format) -> Option<u32> {
    match format {
        Format::LegacyOfdm => Some(pmsr::PREAMBLE_LEGACY),
        Format::Ht => Some(pmsr::PREAMBLE_HT),
        Format::Vht => Some(pmsr::PREAMBLE_VHT),
        Format::He => Some(pmsr::PREAMBLE_HE),
        Format::Cck | Format::Eht => None,
    }
}

/// A ranging request towards one peer.
///
/// Burst parameters left at zero are not sent, so the kernel picks its
/// defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FtmRequest {
    pub target: MacAddr6,
    pub channel: Channel,
    pub format: Format,
    pub asap: bool,
    pub bursts_exponent: u8,
    pub burst_period: u16,
    pub burst_duration: u8,
    pub ftms_per_burst: u8,
}

impl FtmRequest {
    pub fn new(target: MacAddr6, channel: Channel, format: Format) -> Self {
        Self {
            target,
            channel,
            format,
            asap: false,
            bursts_exponent: 0,
            burst_period: 0,
            burst_duration: 0,
            ftms_per_burst: 0,
        }
    }

    fn write(&self, w: &mut AttrWriter) -> Result<()> {
        w.nest(attr::PEER_MEASUREMENTS, |w| {
            w.nest(pmsr::PEERS, |w| {
                w.nest(1, |w| {
                    w.put_mac(pmsr::PEER_ADDR, self.target)?;
                    w.nest(pmsr::PEER_REQ, |w| {
                        w.nest(pmsr::REQ_DATA, |w| {
                            w.nest(pmsr::TYPE_FTM, |w| self.write_ftm(w))
                        })
                    })?;
                    w.nest(pmsr::PEER_CHAN, |w| self.channel.write_short(w))
                })
            })
        })
    }

    fn write_ftm(&self, w: &mut AttrWriter) -> Result<()> {
        if self.bursts_exponent != 0 {
            w.put_u8(pmsr::FTM_REQ_NUM_BURSTS_EXP, self.bursts_exponent)?;
        }
        if self.burst_period != 0 {
            w.put_u16(pmsr::FTM_REQ_BURST_PERIOD, self.burst_period)?;
        }
        if self.burst_duration != 0 {
            w.put_u8(pmsr::FTM_REQ_BURST_DURATION, self.burst_duration)?;
        }
        if self.ftms_per_burst != 0 {
            w.put_u8(pmsr::FTM_REQ_FTMS_PER_BURST, self.ftms_per_burst)?;
        }
        if self.asap {
            w.put_flag(pmsr::FTM_REQ_ASAP)?;
        }
        if let Some(p) = preamble(self.format) {
            w.put_u32(pmsr::FTM_REQ_PREAMBLE, p)?;
        }
        Ok(())
    }
}

/// What one result message said about a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtmOutcome {
    Measured {
        peer: MacAddr6,
        measurement: FtmMeasurement,
    },
    /// The peer could not be measured, `enum nl80211_peer_measurement_ftm_failure_reasons`.
    Failed { peer: MacAddr6, reason: u32 },
}

impl FtmOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FtmOutcome::Measured { .. })
    }
}

/// Microseconds since the Unix epoch.
pub fn unix_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_micros() as u64)
}

fn nested<'a>(attrs: &Attrs<'a>, kind: u16) -> Option<Attrs<'a>> {
    attrs.get(kind).map(|a| a.nested())
}

/// Decodes the first peer of a result message, stamping it with
/// `timestamp`.
///
/// Messages that do not carry an FTM response yield `None`. Result fields
/// the kernel leaves out are zero.
pub fn parse_result(reply: &Reply, timestamp: u64) -> Result<Option<FtmOutcome>> {
    let Some(peer) = nested(&reply.attrs(), attr::PEER_MEASUREMENTS)
        .and_then(|m| nested(&m, pmsr::PEERS))
        .and_then(|mut peers| peers.next())
        .map(|p| p.nested())
    else {
        return Ok(None);
    };
    let Some(addr) = peer.get(pmsr::PEER_ADDR) else {
        return Ok(None);
    };
    let addr = addr.mac()?;
    let Some(ftm) = nested(&peer, pmsr::PEER_RESP)
        .and_then(|r| nested(&r, pmsr::RESP_DATA))
        .and_then(|d| nested(&d, pmsr::TYPE_FTM))
    else {
        return Ok(None);
    };

    if let Some(reason) = ftm.get(pmsr::FTM_RESP_FAIL_REASON) {
        return Ok(Some(FtmOutcome::Failed {
            peer: addr,
            reason: reason.uint()? as u32,
        }));
    }

    let field = |kind: u16| -> Result<u64> { ftm.get(kind).as_ref().map_or(Ok(0), Attr::uint) };
    let measurement = FtmMeasurement {
        burst_index: field(pmsr::FTM_RESP_BURST_INDEX)? as u32,
        attempts: field(pmsr::FTM_RESP_NUM_FTMR_ATTEMPTS)? as u32,
        successes: field(pmsr::FTM_RESP_NUM_FTMR_SUCCESSES)? as u32,
        bursts_exponent: field(pmsr::FTM_RESP_NUM_BURSTS_EXP)? as u32,
        burst_duration: field(pmsr::FTM_RESP_BURST_DURATION)? as u8,
        ftms_per_burst: field(pmsr::FTM_RESP_FTMS_PER_BURST)? as u8,
        // signed dBm, the record keeps the low byte
        rssi_avg: field(pmsr::FTM_RESP_RSSI_AVG)? as u8,
        rssi_spread: field(pmsr::FTM_RESP_RSSI_SPREAD)? as u32,
        rtt_avg: field(pmsr::FTM_RESP_RTT_AVG)?,
        rtt_variance: field(pmsr::FTM_RESP_RTT_VARIANCE)?,
        rtt_spread: field(pmsr::FTM_RESP_RTT_SPREAD)?,
        dist_avg: field(pmsr::FTM_RESP_DIST_AVG)?,
        dist_variance: field(pmsr::FTM_RESP_DIST_VARIANCE)?,
        dist_spread: field(pmsr::FTM_RESP_DIST_SPREAD)?,
        timestamp,
    };
    Ok(Some(FtmOutcome::Measured {
        peer: addr,
        measurement,
    }))
}

/// Runs one ranging request from the access point interface `ifindex` and
/// hands every outcome to `on_outcome` until the kernel reports the
/// measurement complete.
#[instrument(skip_all, fields(ifindex = ifindex, target = %request.target))]
pub fn measure<L: Link>(
    transport: &mut Transport<L>,
    ifindex: u32,
    request: &FtmRequest,
    mut on_outcome: impl FnMut(FtmOutcome) -> Result<()>,
) -> Result<()> {
    transport.execute(
        Command::new(cmd::PEER_MEASUREMENT_START)
            .identify(Identify::NetDev(ifindex))
            .streaming()
            .attrs(|w| request.write(w))
            .on_reply(|reply| match reply.cmd {
                cmd::PEER_MEASUREMENT_RESULT => {
                    match parse_result(reply, unix_micros())? {
                        Some(outcome) => {
                            match &outcome {
                                FtmOutcome::Measured { measurement, .. } => {
                                    debug!(rtt_ps = measurement.rtt_avg, "FTM result")
                                }
                                FtmOutcome::Failed { reason, .. } => {
                                    debug!(reason, "FTM failed to measure")
                                }
                            }
                            on_outcome(outcome)?;
                        }
                        None => debug!("result without FTM data"),
                    }
                    Ok(Flow::Continue)
                }
                cmd::PEER_MEASUREMENT_COMPLETE => Ok(Flow::Stop),
                _ => Ok(Flow::Continue),
            }),
    )
}

/// Starts beaconing as an FTM responder on the access point interface
/// `ifindex`.
pub fn start_responder<L: Link>(
    transport: &mut Transport<L>,
    ifindex: u32,
    channel: Channel,
) -> Result<()> {
    info!(%channel, ssid = RESPONDER_SSID, "starting FTM responder");
    transport.execute(
        Command::new(cmd::NEW_BEACON)
            .identify(Identify::NetDev(ifindex))
            .attrs(|w| {
                w.put(attr::BEACON_HEAD, &BEACON_HEAD)?;
                w.put_u32(attr::BEACON_INTERVAL, BEACON_INTERVAL)?;
                w.put_u32(attr::DTIM_PERIOD, DTIM_PERIOD)?;
                w.put(attr::SSID, RESPONDER_SSID.as_bytes())?;
                w.put_u32(attr::HIDDEN_SSID, HIDDEN_SSID_NOT_IN_USE)?;
                w.put_u32(attr::AUTH_TYPE, AUTHTYPE_OPEN_SYSTEM)?;
                w.nest(attr::FTM_RESPONDER, |w| w.put_flag(FTM_RESPONDER_ENABLED))?;
                channel.write_short(w)?;
                w.put_flag(attr::SOCKET_OWNER)
            }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        control::ChannelMode,
        nl80211::chan_width,
        transport::{testing::transport, Event},
        Error,
    };

    const PEER: MacAddr6 = MacAddr6::new(0x02, 0x11, 0x22, 0x33, 0x44, 0x55);

    fn result(ftm: impl FnOnce(&mut AttrWriter) -> Result<()>) -> Reply {
        let mut w = AttrWriter::new();
        w.nest(attr::PEER_MEASUREMENTS, |w| {
            w.nest(pmsr::PEERS, |w| {
                w.nest(1, |w| {
                    w.put_mac(pmsr::PEER_ADDR, PEER)?;
                    w.nest(pmsr::PEER_RESP, |w| {
                        w.nest(pmsr::RESP_DATA, |w| w.nest(pmsr::TYPE_FTM, ftm))
                    })
                })
            })
        })
        .unwrap();
        Reply::new(cmd::PEER_MEASUREMENT_RESULT, w.into_bytes())
    }

    fn full(w: &mut AttrWriter) -> Result<()> {
        w.put_u32(pmsr::FTM_RESP_BURST_INDEX, 2)?;
        w.put_u32(pmsr::FTM_RESP_NUM_FTMR_ATTEMPTS, 8)?;
        w.put_u32(pmsr::FTM_RESP_NUM_FTMR_SUCCESSES, 7)?;
        w.put_u8(pmsr::FTM_RESP_NUM_BURSTS_EXP, 1)?;
        w.put_u8(pmsr::FTM_RESP_BURST_DURATION, 11)?;
        w.put_u8(pmsr::FTM_RESP_FTMS_PER_BURST, 4)?;
        w.put_u32(pmsr::FTM_RESP_RSSI_AVG, -60i32 as u32)?;
        w.put_u32(pmsr::FTM_RESP_RSSI_SPREAD, 5)?;
        w.put_u64(pmsr::FTM_RESP_RTT_AVG, 33_356)?;
        w.put_u64(pmsr::FTM_RESP_RTT_VARIANCE, 100)?;
        w.put_u64(pmsr::FTM_RESP_RTT_SPREAD, 40)?;
        w.put_u64(pmsr::FTM_RESP_DIST_AVG, 5_000)?;
        w.put_u64(pmsr::FTM_RESP_DIST_VARIANCE, 9)?;
        w.put_u64(pmsr::FTM_RESP_DIST_SPREAD, 6)
    }

    fn request() -> FtmRequest {
        FtmRequest {
            asap: true,
            ftms_per_burst: 4,
            ..FtmRequest::new(
                PEER,
                Channel::new(5180, ChannelMode::Vht80),
                Format::Vht,
            )
        }
    }

    #[test]
    fn request_nesting() {
        let mut w = AttrWriter::new();
        request().write(&mut w).unwrap();
        let top = Attrs::new(w.as_bytes());
        let peer = top
            .get(attr::PEER_MEASUREMENTS)
            .unwrap()
            .nested()
            .get(pmsr::PEERS)
            .unwrap()
            .nested()
            .get(1)
            .unwrap()
            .nested();
        assert_eq!(peer.get(pmsr::PEER_ADDR).unwrap().mac().unwrap(), PEER);

        let chan = peer.get(pmsr::PEER_CHAN).unwrap().nested();
        assert_eq!(chan.get(attr::WIPHY_FREQ).unwrap().u32().unwrap(), 5180);
        assert_eq!(
            chan.get(attr::CHANNEL_WIDTH).unwrap().u32().unwrap(),
            chan_width::W80
        );

        let ftm = peer
            .get(pmsr::PEER_REQ)
            .unwrap()
            .nested()
            .get(pmsr::REQ_DATA)
            .unwrap()
            .nested()
            .get(pmsr::TYPE_FTM)
            .unwrap()
            .nested();
        let kinds: Vec<_> = ftm.clone().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            [
                pmsr::FTM_REQ_FTMS_PER_BURST,
                pmsr::FTM_REQ_ASAP,
                pmsr::FTM_REQ_PREAMBLE
            ]
        );
        assert_eq!(
            ftm.get(pmsr::FTM_REQ_PREAMBLE).unwrap().u32().unwrap(),
            pmsr::PREAMBLE_VHT
        );
        assert_eq!(
            ftm.get(pmsr::FTM_REQ_FTMS_PER_BURST).unwrap().u8().unwrap(),
            4
        );
    }

    #[test]
    fn zero_burst_parameters_are_omitted() {
        let mut w = AttrWriter::new();
        FtmRequest::new(PEER, Channel::new(2412, ChannelMode::NoHt), Format::LegacyOfdm)
            .write_ftm(&mut w)
            .unwrap();
        let attrs: Vec<_> = Attrs::new(w.as_bytes()).collect();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].u32().unwrap(), pmsr::PREAMBLE_LEGACY);
    }

    #[test]
    fn full_result() {
        let outcome = parse_result(&result(full), 42).unwrap().unwrap();
        let FtmOutcome::Measured { peer, measurement } = outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert_eq!(peer, PEER);
        assert_eq!(
            measurement,
            FtmMeasurement {
                burst_index: 2,
                attempts: 8,
                successes: 7,
                bursts_exponent: 1,
                burst_duration: 11,
                ftms_per_burst: 4,
                rssi_avg: 0xc4,
                rssi_spread: 5,
                rtt_avg: 33_356,
                rtt_variance: 100,
                rtt_spread: 40,
                dist_avg: 5_000,
                dist_variance: 9,
                dist_spread: 6,
                timestamp: 42,
            }
        );
    }

    #[test]
    fn absent_rssi_spread_is_zero() {
        let reply = result(|w| {
            w.put_u32(pmsr::FTM_RESP_NUM_FTMR_SUCCESSES, 3)?;
            w.put_u64(pmsr::FTM_RESP_RTT_AVG, 1_000)
        });
        let Some(FtmOutcome::Measured { measurement, .. }) = parse_result(&reply, 0).unwrap()
        else {
            panic!("not measured");
        };
        assert_eq!(measurement.rssi_spread, 0);
        assert_eq!(measurement.dist_avg, 0);
        assert_eq!(measurement.rtt_avg, 1_000);
        assert!(measurement.is_success());
    }

    #[test]
    fn failure_reason() {
        let reply = result(|w| {
            w.put_u32(pmsr::FTM_RESP_FAIL_REASON, 4)?;
            w.put_u64(pmsr::FTM_RESP_RTT_AVG, 1_000)
        });
        assert_eq!(
            parse_result(&reply, 0).unwrap(),
            Some(FtmOutcome::Failed {
                peer: PEER,
                reason: 4
            })
        );
    }

    #[test]
    fn results_without_data_are_ignored() {
        let empty = Reply::new(cmd::PEER_MEASUREMENT_RESULT, Vec::new());
        assert_eq!(parse_result(&empty, 0).unwrap(), None);

        let mut w = AttrWriter::new();
        w.nest(attr::PEER_MEASUREMENTS, |w| {
            w.nest(pmsr::PEERS, |w| w.nest(1, |w| w.put_mac(pmsr::PEER_ADDR, PEER)))
        })
        .unwrap();
        let no_resp = Reply::new(cmd::PEER_MEASUREMENT_RESULT, w.into_bytes());
        assert_eq!(parse_result(&no_resp, 0).unwrap(), None);
    }

    #[test]
    fn odd_sized_field_is_malformed() {
        let reply = result(|w| w.put(pmsr::FTM_RESP_RTT_AVG, &[1, 2, 3]));
        assert!(matches!(parse_result(&reply, 0), Err(Error::Malformed(_))));
    }

    #[test]
    fn measure_until_complete() {
        let mut t = transport();
        t.link_mut()
            .push(Event::Ack)
            .push(Event::Reply(result(full)))
            .push(Event::Reply(result(|w| w.put_u32(pmsr::FTM_RESP_FAIL_REASON, 1))))
            .reply(cmd::PEER_MEASUREMENT_COMPLETE, |_| Ok(()))
            .push(Event::Reply(result(full)));

        let mut outcomes = Vec::new();
        measure(&mut t, 10, &request(), |o| {
            outcomes.push(o);
            Ok(())
        })
        .unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        // the result after completion was never read
        assert_eq!(t.link().events.len(), 1);

        let sent = &t.link().sent[0];
        assert_eq!(sent.cmd, cmd::PEER_MEASUREMENT_START);
        assert_eq!(sent.attrs().get(attr::IFINDEX).unwrap().u32().unwrap(), 10);
    }

    #[test]
    fn responder_beacon() {
        let mut t = transport();
        start_responder(&mut t, 10, Channel::new(2412, ChannelMode::Ht20)).unwrap();

        let sent = &t.link().sent[0];
        assert_eq!(sent.cmd, cmd::NEW_BEACON);
        let attrs = sent.attrs();
        let head = attrs.get(attr::BEACON_HEAD).unwrap().payload;
        assert_eq!(head.len(), 58);
        // the SSID element inside the head matches the SSID attribute
        assert_eq!(&head[38..45], b"FeitCSI");
        assert_eq!(attrs.get(attr::SSID).unwrap().payload, b"FeitCSI");
        assert_eq!(attrs.get(attr::BEACON_INTERVAL).unwrap().u32().unwrap(), 100);
        assert_eq!(attrs.get(attr::DTIM_PERIOD).unwrap().u32().unwrap(), 2);
        assert!(attrs
            .get(attr::FTM_RESPONDER)
            .unwrap()
            .nested()
            .get(FTM_RESPONDER_ENABLED)
            .is_some());
        assert_eq!(
            attrs.get(attr::CHANNEL_WIDTH).unwrap().u32().unwrap(),
            chan_width::W20
        );
        assert!(attrs.get(attr::SOCKET_OWNER).is_some());
    }
}
