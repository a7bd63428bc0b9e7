//! The running program: a session of activities on the adapter, started
//! from the command line or over the control channel, and torn down once.

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::Context as _;
use csi::CsiRecord;
use iwlctl::{
    capture::{self, Debugfs},
    control::{Ioctl, NetDevice, AP_INTERFACE, MONITOR_INTERFACE},
    ftm::{self, FtmOutcome},
    inject::Pcap,
    Injector, RecordQueue, Transport, WifiController,
};
use tracing::{debug, error, info, warn};

use crate::{
    args::{Mode, RunArgs},
    control::{ControlChannel, Request},
    sink::Output,
};

/// How often the latest record is reported in plot mode.
const REPORT_INTERVAL: Duration = Duration::from_secs(1);
/// Granularity of interruptible sleeps.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub enum Event {
    Interrupted,
    Control(Request, SocketAddr),
    Finished(&'static str),
}

/// Whether `e` only reports that a stop was requested.
fn is_cancelled(e: &anyhow::Error) -> bool {
    e.chain()
        .any(|c| matches!(
            c.downcast_ref::<iwlctl::Error>(),
            Some(iwlctl::Error::Cancelled)
        ))
}

/// Frames that fit into one injection window of a responder.
fn frames_per_window(window: Duration, delay: Duration) -> Option<NonZeroU32> {
    let n = window.as_micros() / delay.as_micros().max(1);
    NonZeroU32::new(n.clamp(1, u32::MAX as u128) as u32)
}

/// What every activity of a session shares.
#[derive(Debug, Clone)]
struct Context {
    args: Arc<RunArgs>,
    stop: Arc<AtomicBool>,
    output: Output,
    queue: Arc<RecordQueue>,
}

impl Context {
    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Sleeps for `d` or until stopped. Returns whether the full time
    /// passed.
    fn pause(&self, d: Duration) -> bool {
        let end = Instant::now() + d;
        loop {
            if self.is_stopped() {
                return false;
            }
            let left = end.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return true;
            }
            thread::sleep(left.min(PAUSE_SLICE));
        }
    }

    /// A controller with its own socket, for activities that switch modes.
    fn controller(&self) -> anyhow::Result<WifiController> {
        Ok(WifiController::new(
            Transport::connect(self.stop.clone())?,
            Ioctl,
            self.args.mac,
        ))
    }
}

fn measure_csi(ctx: &Context) -> anyhow::Result<()> {
    let debugfs = Debugfs::default();
    let _enabled = debugfs.enable().context("enabling CSI")?;
    let mut transport = Transport::connect(ctx.stop.clone())?;
    let ifindex = Ioctl.index(MONITOR_INTERFACE)?;
    let mut sink = ctx
        .output
        .csi()
        .with_context(|| format!("opening {}", ctx.output.path().display()))?;

    let stats = capture::listen(
        &mut transport,
        ifindex,
        &ctx.args.csi_filter(),
        None,
        |record| {
            let header = record.header();
            debug!(
                timestamp = header.timestamp,
                rssi = ?header.rssi,
                source = %header.source_mac,
                "CSI"
            );
            sink.write(&record.to_bytes())?;
            if ctx.args.plot {
                ctx.queue.push(record);
            }
            Ok(())
        },
    )?;
    info!(?stats, "CSI capture ended");
    Ok(())
}

fn inject(ctx: &Context) -> anyhow::Result<()> {
    let rate = ctx.args.inject_params().rate();
    info!(?rate, word = %format_args!("{:#x}", rate.encode()), "injection rate");
    Injector::new(Pcap::default(), &rate).run(
        ctx.args.inject_repeat(),
        ctx.args.inject_delay(),
        &ctx.stop,
    )?;
    Ok(())
}

fn ftm_initiator(ctx: &Context) -> anyhow::Result<()> {
    let request = ctx.args.ftm_request().context("no FTM target")?;
    let (channel, tx_power) = (ctx.args.channel(), ctx.args.tx_power);
    let mut controller = ctx.controller()?;
    let mut sink = ctx.output.ftm().context("opening FTM output")?;

    while !ctx.is_stopped() {
        controller.enter_ap(tx_power)?;
        let ifindex = controller.netdev().index(AP_INTERFACE)?;
        ftm::measure(controller.transport_mut(), ifindex, &request, |outcome| {
            match outcome {
                FtmOutcome::Measured { peer, measurement } => {
                    info!(
                        %peer,
                        distance_mm = measurement.dist_avg,
                        rtt_ps = measurement.rtt_avg,
                        successes = measurement.successes,
                        "FTM"
                    );
                    sink.write(&measurement.to_bytes())?;
                }
                FtmOutcome::Failed { peer, reason } => warn!(%peer, reason, "FTM failed"),
            }
            Ok(())
        })?;
        controller.leave_ap()?;
        controller.enter_monitor(channel, tx_power)?;
        ctx.pause(ctx.args.mode_delay());
    }
    Ok(())
}

/// Beacons as an FTM responder. With injection, alternates between beacon
/// and injection windows.
fn ftm_responder(ctx: &Context) -> anyhow::Result<()> {
    let (channel, tx_power) = (ctx.args.channel(), ctx.args.tx_power);
    let window = ctx.args.mode_delay();
    let mut controller = ctx.controller()?;
    let mut injector = (ctx.args.mode == Mode::InjectFtmResponder)
        .then(|| Injector::new(Pcap::default(), &ctx.args.inject_params().rate()));

    loop {
        controller.enter_ap(tx_power)?;
        let ifindex = controller.netdev().index(AP_INTERFACE)?;
        ftm::start_responder(controller.transport_mut(), ifindex, channel)?;

        let Some(injector) = injector.as_mut() else {
            while ctx.pause(window) {}
            return Ok(());
        };
        if !ctx.pause(window) {
            return Ok(());
        }

        controller.leave_ap()?;
        controller.enter_monitor(channel, tx_power)?;
        let delay = ctx.args.inject_delay();
        injector.run(frames_per_window(window, delay), delay, &ctx.stop)?;
        if ctx.is_stopped() {
            return Ok(());
        }
    }
}

type Activity = fn(&Context) -> anyhow::Result<()>;

/// The adapter taken over for one set of run options.
#[derive(Debug)]
pub struct Session {
    stop: Arc<AtomicBool>,
    controller: WifiController,
    activities: Vec<(&'static str, JoinHandle<()>)>,
}

impl Session {
    /// Reconfigures the adapter and starts the activities of `args.mode`.
    pub fn start(
        args: RunArgs,
        output: Output,
        queue: Arc<RecordQueue>,
        events: &Sender<Event>,
    ) -> anyhow::Result<Self> {
        let args = Arc::new(args);
        info!(mode = ?args.mode, channel = %args.channel(), "starting session");

        // teardown must still work after activities were told to stop
        let mut controller =
            WifiController::new(Transport::connect(Arc::default())?, Ioctl, args.mac);
        if let Err(e) = controller.take_over(args.channel(), args.tx_power) {
            if let Err(e) = controller.restore() {
                warn!(%e, "could not restore interfaces");
            }
            return Err(e).context("configuring the adapter");
        }

        let mut session = Self {
            stop: Arc::default(),
            controller,
            activities: Vec::new(),
        };
        let ctx = Context {
            args: args.clone(),
            stop: session.stop.clone(),
            output,
            queue,
        };

        let mode = args.mode;
        let wanted: [(bool, &'static str, Activity); 4] = [
            (mode.measures(), "csi", measure_csi),
            (mode.injects(), "inject", inject),
            (mode.initiates_ftm(), "ftm", ftm_initiator),
            (mode.responds_ftm(), "ftm-responder", ftm_responder),
        ];
        for (_, name, activity) in wanted.into_iter().filter(|(on, ..)| *on) {
            if let Err(e) = session.spawn(name, &ctx, events, activity) {
                if let Err(e) = session.shutdown() {
                    warn!(%e, "could not restore interfaces");
                }
                return Err(e);
            }
        }
        Ok(session)
    }

    fn spawn(
        &mut self,
        name: &'static str,
        ctx: &Context,
        events: &Sender<Event>,
        activity: Activity,
    ) -> anyhow::Result<()> {
        let (ctx, events) = (ctx.clone(), events.clone());
        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                match activity(&ctx) {
                    Ok(()) => info!(activity = name, "finished"),
                    Err(e) if is_cancelled(&e) => debug!(activity = name, "cancelled"),
                    Err(e) => error!(activity = name, "{e:#}"),
                }
                // the receiver is gone when the program is exiting anyway
                let _ = events.send(Event::Finished(name));
            })
            .with_context(|| format!("spawning {name}"))?;
        debug!(activity = name, "started");
        self.activities.push((name, handle));
        Ok(())
    }

    /// Number of activities started.
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    /// Stops and joins every activity, then gives the adapter back.
    pub fn shutdown(mut self) -> iwlctl::Result<()> {
        info!("shutting down session");
        self.stop.store(true, Ordering::Relaxed);
        for (name, handle) in self.activities.drain(..) {
            if handle.join().is_err() {
                error!(activity = name, "panicked");
            }
        }
        self.controller.restore()
    }
}

fn report(record: &CsiRecord) {
    let header = record.header();
    info!(
        format = ?header.format(),
        bandwidth = ?header.bandwidth(),
        subcarriers = record.num_subcarriers(),
        rssi = ?header.rssi,
        mean_magnitude = record.magnitude().mean().unwrap_or_default(),
        "latest CSI"
    );
}

/// Top level of a run.
#[derive(Debug)]
pub struct App {
    args: RunArgs,
    queue: Arc<RecordQueue>,
    sender: Sender<Event>,
    events: Receiver<Event>,
}

impl App {
    pub fn new(args: RunArgs) -> Self {
        let (sender, events) = mpsc::channel();
        Self {
            args,
            queue: Arc::default(),
            sender,
            events,
        }
    }

    /// Runs until every activity finished or the program is interrupted.
    /// With a control port, runs sessions on request until interrupted.
    pub fn run(self) -> anyhow::Result<()> {
        let interrupt = self.sender.clone();
        ctrlc::set_handler(move || {
            let _ = interrupt.send(Event::Interrupted);
        })
        .context("installing the interrupt handler")?;

        match self.args.udp_port {
            Some(port) => self.serve(port),
            None => self.run_once(),
        }
    }

    /// Waits for the next event, reporting the latest record in plot mode
    /// while nothing happens.
    fn next_event(&self) -> Option<Event> {
        loop {
            match self.events.recv_timeout(REPORT_INTERVAL) {
                Ok(event) => return Some(event),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(record) = self.queue.take_latest() {
                        report(&record);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    fn run_once(self) -> anyhow::Result<()> {
        let output = Output::file(self.args.output());
        let session = Session::start(
            self.args.clone(),
            output,
            self.queue.clone(),
            &self.sender,
        )?;

        let mut running = session.len();
        while running > 0 {
            match self.next_event() {
                Some(Event::Finished(_)) => running -= 1,
                Some(Event::Control(..)) => {}
                Some(Event::Interrupted) | None => {
                    info!("interrupted");
                    break;
                }
            }
        }
        session.shutdown().context("restoring interfaces")
    }

    fn serve(self, port: u16) -> anyhow::Result<()> {
        let channel =
            ControlChannel::bind(port).with_context(|| format!("binding UDP port {port}"))?;
        let socket = channel.socket().clone();
        let closing = Arc::new(AtomicBool::new(false));
        let listener = {
            let (closing, sender) = (closing.clone(), self.sender.clone());
            thread::Builder::new()
                .name("control".to_owned())
                .spawn(move || {
                    let served = channel.serve(&closing, |request, peer| {
                        let _ = sender.send(Event::Control(request, peer));
                    });
                    if let Err(e) = served {
                        error!(%e, "control channel failed");
                    }
                })?
        };

        let mut session: Option<Session> = None;
        let end = |session: Session| {
            if let Err(e) = session.shutdown() {
                error!(%e, "could not restore interfaces");
            }
        };

        while let Some(event) = self.next_event() {
            match event {
                Event::Control(Request::Stop, peer) => {
                    info!(%peer, "stop requested");
                    if let Some(s) = session.take() {
                        end(s);
                    }
                }
                Event::Control(Request::Run(args), peer) => {
                    info!(%peer, mode = ?args.mode, "run requested");
                    if let Some(s) = session.take() {
                        end(s);
                    }
                    let output = Output::udp(args.output(), socket.clone(), peer);
                    match Session::start(*args, output, self.queue.clone(), &self.sender) {
                        Ok(s) => session = Some(s),
                        Err(e) => error!("{e:#}"),
                    }
                }
                Event::Finished(name) => debug!(activity = name, "activity ended"),
                Event::Interrupted => {
                    info!("interrupted");
                    break;
                }
            }
        }

        closing.store(true, Ordering::Relaxed);
        if listener.join().is_err() {
            error!("control channel panicked");
        }
        match session {
            Some(s) => s.shutdown().context("restoring interfaces"),
            None => Ok(()),
        }
    }
}
