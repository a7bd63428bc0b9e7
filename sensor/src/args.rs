use std::{
    num::NonZeroU32,
    path::PathBuf,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::ensure;
use clap::{Args, Parser, ValueEnum};
use csi::{
    ieee80211::Bandwidth,
    rate::{Antennas, Coding, Format, GuardInterval, HeLtf},
};
use iwlctl::{
    control::{Channel, ChannelMode},
    CsiFilter, FtmRequest, InjectParams,
};
use macaddr::MacAddr6;

/// What the adapter does while the program runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Capture CSI.
    Measure,
    /// Inject frames.
    Inject,
    /// Capture CSI and inject frames.
    #[value(name = "measureinject")]
    MeasureInject,
    /// Capture CSI and range with FTM.
    #[value(name = "measureftm")]
    MeasureFtm,
    /// Range with FTM.
    Ftm,
    /// Act as an FTM responder.
    #[value(name = "ftmres")]
    FtmResponder,
    /// Act as an FTM responder and inject frames between beacons.
    #[value(name = "injectftmres")]
    InjectFtmResponder,
}

impl Mode {
    pub fn measures(self) -> bool {
        matches!(self, Mode::Measure | Mode::MeasureInject | Mode::MeasureFtm)
    }

    /// Whether frames are injected on their own thread.
    pub fn injects(self) -> bool {
        matches!(self, Mode::Inject | Mode::MeasureInject)
    }

    pub fn initiates_ftm(self) -> bool {
        matches!(self, Mode::MeasureFtm | Mode::Ftm)
    }

    pub fn responds_ftm(self) -> bool {
        matches!(self, Mode::FtmResponder | Mode::InjectFtmResponder)
    }
}

fn parse_antennas(s: &str) -> Result<Antennas, String> {
    match s.to_ascii_uppercase().as_str() {
        "A" | "1" => Ok(Antennas::A),
        "B" | "2" => Ok(Antennas::B),
        "AB" | "12" => Ok(Antennas::A | Antennas::B),
        _ => Err(format!("unknown antenna {s:?}, expected A, B or AB")),
    }
}

fn parse_guard_interval(s: &str) -> Result<GuardInterval, String> {
    s.parse()
        .ok()
        .and_then(GuardInterval::from_ns)
        .ok_or_else(|| format!("unknown guard interval {s:?}, expected 400 or 800"))
}

fn parse_format(s: &str) -> Result<Format, String> {
    match s.parse() {
        Ok(f @ (Format::LegacyOfdm | Format::Ht | Format::Vht | Format::He)) => Ok(f),
        _ => Err(format!("unsupported format {s:?}, expected NOHT, HT, VHT or HESU")),
    }
}

/// Options of one run, given on the command line or in a control datagram.
#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Frequency to measure or inject on, in MHz
    #[arg(short, long, default_value_t = 2412, value_parser = clap::value_parser!(u32).range(1..))]
    pub frequency: u32,

    /// Channel width: 20, 40, HT40-, HT40+, NOHT, 80, 160 or 320
    #[arg(short = 'w', long, default_value = "20")]
    pub channel_width: ChannelMode,

    #[arg(short, long, value_enum, default_value_t = Mode::Measure)]
    pub mode: Mode,

    /// Frame format: NOHT, HT, VHT or HESU
    #[arg(long, default_value = "HT", value_parser = parse_format)]
    pub format: Format,

    /// MCS index
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=11))]
    pub mcs: u8,

    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=2))]
    pub spatial_streams: u8,

    /// Transmit power, in dBm
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..=22))]
    pub tx_power: u32,

    /// Transmit antennas: A, B or AB
    #[arg(long, default_value = "A", value_parser = parse_antennas)]
    pub antenna: Antennas,

    /// Guard interval, in ns
    #[arg(long, default_value = "400", value_parser = parse_guard_interval)]
    pub guard_interval: GuardInterval,

    /// Coding scheme: LDPC or BCC
    #[arg(long, default_value = "LDPC")]
    pub coding: Coding,

    /// HE LTF and guard interval: 1xLTF+0.8, 2xLTF+0.8, 2xLTF+1.6, 4xLTF+3.2 or 4xLTF+0.8
    #[arg(long, default_value = "1xLTF+0.8")]
    pub ltf: HeLtf,

    /// Delay between injected frames, in µs
    #[arg(long, default_value_t = 100_000, value_parser = clap::value_parser!(u64).range(1..))]
    pub inject_delay: u64,

    /// Number of frames to inject, 0 for no limit
    #[arg(long, default_value_t = 0)]
    pub inject_repeat: u32,

    /// Time spent in each of the monitor and access point modes, in ms
    #[arg(long, default_value_t = 3000, value_parser = clap::value_parser!(u64).range(1..))]
    pub mode_delay: u64,

    /// Ask the responder to start bursts as soon as possible
    #[arg(long)]
    pub ftm_asap: bool,

    /// Exponent of the number of FTM bursts
    #[arg(long, default_value_t = 0)]
    pub ftm_burst_exp: u8,

    /// FTM frames per burst
    #[arg(long, default_value_t = 0)]
    pub ftm_per_burst: u8,

    /// Time between FTM bursts, in units of 100 ms
    #[arg(long, default_value_t = 0)]
    pub ftm_burst_period: u16,

    /// FTM burst duration code
    #[arg(long, default_value_t = 0)]
    pub ftm_burst_duration: u8,

    /// MAC address of the FTM responder to range with
    #[arg(long)]
    pub ftm_target: Option<MacAddr6>,

    /// MAC address of created interfaces
    #[arg(long, default_value = "00:11:22:33:44:55")]
    pub mac: MacAddr6,

    /// CSI output file, FTM results go to the same name prefixed with FTM_
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only keep CSI of frames sent with the configured MCS
    #[arg(long)]
    pub strict: bool,

    /// Listen for control datagrams on this UDP port
    #[arg(long)]
    pub udp_port: Option<u16>,

    /// Keep the latest record for a live consumer
    #[arg(long)]
    pub plot: bool,

    /// Log every state transition and protocol exchange
    #[arg(short, long)]
    pub verbose: bool,
}

/// Wrapper parsing a control datagram, which carries no program name.
#[derive(Debug, Parser)]
#[command(no_binary_name = true)]
struct Datagram {
    #[command(flatten)]
    args: RunArgs,
}

impl RunArgs {
    /// Parses whitespace separated options, as sent over the control
    /// channel.
    pub fn from_datagram(text: &str) -> anyhow::Result<Self> {
        let args = Datagram::try_parse_from(text.split_whitespace())?.args;
        args.validate()?;
        Ok(args)
    }

    /// Checks constraints between options.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.mcs <= self.format.mcs_mask().min(11),
            "MCS {} is out of range for {}",
            self.mcs,
            self.format
        );
        if self.mode.initiates_ftm() {
            ensure!(
                self.ftm_target.is_some(),
                "mode {:?} needs --ftm-target",
                self.mode
            );
        }
        Ok(())
    }

    pub fn channel(&self) -> Channel {
        Channel::new(self.frequency, self.channel_width)
    }

    pub fn bandwidth(&self) -> Bandwidth {
        self.channel_width.bandwidth()
    }

    pub fn csi_filter(&self) -> CsiFilter {
        CsiFilter {
            bandwidth: self.bandwidth(),
            format: self.format,
            mcs: self.strict.then_some(self.mcs),
        }
    }

    pub fn inject_params(&self) -> InjectParams {
        InjectParams {
            format: self.format,
            mcs: self.mcs,
            antennas: self.antenna,
            bandwidth: self.bandwidth(),
            streams: self.spatial_streams,
            guard_interval: self.guard_interval,
            ltf: self.ltf,
            coding: self.coding,
        }
    }

    /// The ranging request, if a target was given.
    pub fn ftm_request(&self) -> Option<FtmRequest> {
        let target = self.ftm_target?;
        Some(FtmRequest {
            asap: self.ftm_asap,
            bursts_exponent: self.ftm_burst_exp,
            burst_period: self.ftm_burst_period,
            burst_duration: self.ftm_burst_duration,
            ftms_per_burst: self.ftm_per_burst,
            ..FtmRequest::new(target, self.channel(), self.format)
        })
    }

    pub fn inject_delay(&self) -> Duration {
        Duration::from_micros(self.inject_delay)
    }

    pub fn inject_repeat(&self) -> Option<NonZeroU32> {
        NonZeroU32::new(self.inject_repeat)
    }

    pub fn mode_delay(&self) -> Duration {
        Duration::from_millis(self.mode_delay)
    }

    /// The CSI output file, named after the current time unless given.
    pub fn output(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let secs = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| d.as_secs());
            PathBuf::from(format!("csi_{secs}.dat"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> anyhow::Result<RunArgs> {
        RunArgs::from_datagram(text)
    }

    #[test]
    fn defaults() {
        let args = parse("").unwrap();
        assert_eq!(args.frequency, 2412);
        assert_eq!(args.channel_width, ChannelMode::Ht20);
        assert_eq!(args.mode, Mode::Measure);
        assert_eq!(args.format, Format::Ht);
        assert_eq!(args.guard_interval, GuardInterval::Short);
        assert_eq!(args.coding, Coding::Ldpc);
        assert_eq!(args.ltf, HeLtf::Ltf1xGi08);
        assert_eq!(args.tx_power, 10);
        assert_eq!(args.inject_repeat(), None);
        assert_eq!(args.mode_delay(), Duration::from_secs(3));
        assert_eq!(args.mac, MacAddr6::new(0, 0x11, 0x22, 0x33, 0x44, 0x55));
        assert!(args.output().to_string_lossy().starts_with("csi_"));
    }

    #[test]
    fn full_command() {
        let args = parse(
            "-f 5180 -w 80 -m measureinject --format VHT --mcs 9 --spatial-streams 2 \
             --antenna 12 --guard-interval 800 --coding BCC --inject-repeat 5 -o out.dat --strict",
        )
        .unwrap();
        assert_eq!(args.channel(), Channel::new(5180, ChannelMode::Vht80));
        assert!(args.mode.measures() && args.mode.injects());
        assert_eq!(args.antenna, Antennas::A | Antennas::B);
        assert_eq!(args.inject_repeat(), NonZeroU32::new(5));
        assert_eq!(args.output(), PathBuf::from("out.dat"));
        assert_eq!(args.csi_filter().mcs, Some(9));

        let rate = args.inject_params().rate();
        assert_eq!(rate.bandwidth, Bandwidth::Bw80);
        assert_eq!(rate.streams, 2);
        assert_eq!(rate.guard, csi::rate::Guard::Gi(GuardInterval::Long));
    }

    #[test]
    fn rejects_bad_values() {
        for bad in [
            "--mcs 12",
            "--format HT --mcs 8",
            "--format EHT",
            "--guard-interval 600",
            "--tx-power 23",
            "--tx-power 0",
            "--spatial-streams 3",
            "--antenna C",
            "-w 30",
            "-f 0",
            "--inject-delay 0",
            "--mode-delay 0",
            "-m sleep",
            "--ltf 3xLTF+0.8",
            "-m ftm",
        ] {
            assert!(parse(bad).is_err(), "{bad} was accepted");
        }
    }

    #[test]
    fn ftm_request() {
        let args = parse(
            "-m measureftm --ftm-target 02:11:22:33:44:55 --ftm-per-burst 4 --ftm-asap -f 5180",
        )
        .unwrap();
        assert!(args.mode.initiates_ftm() && args.mode.measures());
        let request = args.ftm_request().unwrap();
        assert_eq!(request.target, MacAddr6::new(2, 0x11, 0x22, 0x33, 0x44, 0x55));
        assert_eq!(request.ftms_per_burst, 4);
        assert!(request.asap);
        assert_eq!(request.bursts_exponent, 0);
        assert_eq!(request.channel.freq, 5180);
    }

    #[test]
    fn modes() {
        let responder = parse("-m injectftmres").unwrap().mode;
        assert!(responder.responds_ftm());
        assert!(!responder.injects());
        assert!(!responder.measures());
    }
}
