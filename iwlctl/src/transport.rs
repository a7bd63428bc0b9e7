//! Request/response exchanges with nl80211.
//!
//! A [`Command`] describes one request: the command number, how the target
//! device is identified, extra attributes, and a validator that sees every
//! reply. [`Transport::execute`] sends it and drives the receive loop until
//! the kernel acknowledges the request, ends a dump, reports an error, or the
//! validator asks to stop.
//!
//! The socket itself sits behind the [`Link`] trait so the loop can be
//! exercised without a kernel.

use std::{
    io,
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use neli::{
    consts::{
        nl::{NlmF, NlmFFlags},
        socket::NlFamily,
    },
    err::NlError,
    genl::{Genlmsghdr, Nlattr},
    nl::{NlPayload, Nlmsghdr},
    socket::NlSocketHandle,
    types::GenlBuffer,
};
use tracing::{debug, instrument, trace, warn, Span};

use crate::{
    attr::{AttrWriter, Attrs},
    nl80211::{self, attr},
    Error, Result,
};

/// How often a blocked receive wakes up to look at the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Device a command is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identify {
    None,
    /// A physical device (`wiphy`) index.
    Phy(u32),
    /// A network interface index.
    NetDev(u32),
    /// A wireless device handle, for interfaces without a netdev.
    WirelessDev(u64),
}

/// Returned by a reply validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// A generic netlink message received in answer to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub cmd: u8,
    attrs: Vec<u8>,
}

impl Reply {
    pub fn new(cmd: u8, attrs: Vec<u8>) -> Self {
        Self { cmd, attrs }
    }

    pub fn attrs(&self) -> Attrs<'_> {
        Attrs::new(&self.attrs)
    }
}

type Writer<'a> = Box<dyn FnOnce(&mut AttrWriter) -> Result<()> + 'a>;
type Validator<'a> = Box<dyn FnMut(&Reply) -> Result<Flow> + 'a>;

/// One request to the kernel.
pub struct Command<'a> {
    pub cmd: u8,
    pub identify: Identify,
    dump: bool,
    streaming: bool,
    writer: Option<Writer<'a>>,
    validator: Option<Validator<'a>>,
}

impl<'a> Command<'a> {
    pub fn new(cmd: u8) -> Self {
        Self {
            cmd,
            identify: Identify::None,
            dump: false,
            streaming: false,
            writer: None,
            validator: None,
        }
    }

    pub fn identify(mut self, identify: Identify) -> Self {
        self.identify = identify;
        self
    }

    /// Requests every matching object; the kernel ends the dump with a done
    /// message.
    pub fn dump(mut self) -> Self {
        self.dump = true;
        self
    }

    /// Keeps receiving after the acknowledgement, until the validator
    /// returns [`Flow::Stop`] or the transport is stopped.
    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn attrs(mut self, f: impl FnOnce(&mut AttrWriter) -> Result<()> + 'a) -> Self {
        self.writer = Some(Box::new(f));
        self
    }

    pub fn on_reply(mut self, f: impl FnMut(&Reply) -> Result<Flow> + 'a) -> Self {
        self.validator = Some(Box::new(f));
        self
    }

    /// Writes the identification attribute followed by the caller's.
    fn encode(&mut self) -> Result<AttrWriter> {
        let mut w = AttrWriter::new();
        match self.identify {
            Identify::None => {}
            Identify::Phy(phy) => w.put_u32(attr::WIPHY, phy)?,
            Identify::NetDev(ifindex) => w.put_u32(attr::IFINDEX, ifindex)?,
            Identify::WirelessDev(wdev) => w.put_u64(attr::WDEV, wdev)?,
        }
        if let Some(f) = self.writer.take() {
            f(&mut w)?;
        }
        Ok(w)
    }

    fn deliver(&mut self, reply: &Reply) -> Result<Flow> {
        match &mut self.validator {
            Some(f) => f(reply),
            None => Ok(Flow::Continue),
        }
    }
}

/// What a [`Link`] received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Reply(Reply),
    /// An error message with code zero.
    Ack,
    /// End of a dump.
    Done,
    /// An error message with a negative errno.
    Error(i32),
    /// Nothing arrived within the poll interval.
    Idle,
}

/// A generic netlink socket bound to the nl80211 family.
pub trait Link {
    fn send(&mut self, cmd: u8, dump: bool, attrs: &[u8]) -> Result<()>;

    fn recv(&mut self) -> Result<Event>;
}

/// Runs commands over a [`Link`].
#[derive(Debug)]
pub struct Transport<L = Nl80211> {
    link: L,
    stop: Arc<AtomicBool>,
}

impl Transport<Nl80211> {
    /// Connects to nl80211. Receives give up once `stop` is set.
    pub fn connect(stop: Arc<AtomicBool>) -> Result<Self> {
        Ok(Self::new(Nl80211::connect()?, stop))
    }
}

impl<L: Link> Transport<L> {
    pub fn new(link: L, stop: Arc<AtomicBool>) -> Self {
        Self { link, stop }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    pub fn stop_flag(&self) -> &Arc<AtomicBool> {
        &self.stop
    }

    /// Sends `command` and processes replies until it completes.
    ///
    /// Setting the stop flag ends the exchange early without an error.
    #[instrument(skip_all, fields(cmd = command.cmd, device))]
    pub fn execute(&mut self, mut command: Command<'_>) -> Result<()> {
        Span::current().record("device", tracing::field::debug(command.identify));

        let attrs = command.encode()?;
        self.link.send(command.cmd, command.dump, attrs.as_bytes())?;
        trace!(len = attrs.as_bytes().len(), "sent");

        loop {
            match self.link.recv()? {
                Event::Reply(reply) => {
                    trace!(cmd = reply.cmd, "reply");
                    if command.deliver(&reply)? == Flow::Stop {
                        debug!("stopped by validator");
                        return Ok(());
                    }
                }
                Event::Ack if command.streaming => trace!("ack"),
                Event::Ack | Event::Done => return Ok(()),
                Event::Error(errno) => {
                    let err = Error::kernel(command.cmd, errno);
                    debug!(%err);
                    return Err(err);
                }
                Event::Idle => {
                    if self.is_stopped() {
                        debug!("stop requested");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// The kernel's nl80211 interface, reached through `neli`.
pub struct Nl80211 {
    socket: NlSocketHandle,
    family: u16,
}

impl std::fmt::Debug for Nl80211 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nl80211")
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl Nl80211 {
    pub fn connect() -> Result<Self> {
        let mut socket = open()?;
        let family = socket
            .resolve_genl_family(nl80211::FAMILY_NAME)
            .map_err(|e| Error::Resolve(e.to_string()))?;
        debug!(family, "connected to nl80211");
        Ok(Self::with_socket(socket, family))
    }

    /// Talks to the generic netlink family with id `family`.
    fn with_socket(socket: NlSocketHandle, family: u16) -> Self {
        set_recv_timeout(&socket, POLL_INTERVAL);
        Self { socket, family }
    }
}

fn open() -> Result<NlSocketHandle> {
    NlSocketHandle::connect(NlFamily::Generic, None, &[]).map_err(Error::Connect)
}

fn set_recv_timeout(socket: &NlSocketHandle, timeout: Duration) {
    let tv = libc::timeval {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_usec: timeout.subsec_micros() as libc::suseconds_t,
    };
    // SAFETY: the descriptor is owned by `socket` and `tv` outlives the call.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_RCVTIMEO,
            &tv as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::timeval>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        warn!(
            "failed to set receive timeout: {}",
            io::Error::last_os_error()
        );
    }
}

impl Link for Nl80211 {
    fn send(&mut self, cmd: u8, dump: bool, attrs: &[u8]) -> Result<()> {
        let mut buf = GenlBuffer::new();
        for a in Attrs::new(attrs) {
            buf.push(
                Nlattr::new(a.nested, false, a.kind, a.payload.to_vec())
                    .map_err(|e| Error::Netlink(e.to_string()))?,
            );
        }

        // a dump ends with a done message, an ack after it would leak into
        // the next command
        let flags = if dump {
            [NlmF::Request, NlmF::Dump]
        } else {
            [NlmF::Request, NlmF::Ack]
        };
        let msg = Nlmsghdr::new(
            None,
            self.family,
            NlmFFlags::new(&flags),
            None,
            None,
            NlPayload::Payload(Genlmsghdr::new(cmd, 1, buf)),
        );

        self.socket
            .send(msg)
            .map_err(|e| Error::Netlink(e.to_string()))
    }

    fn recv(&mut self) -> Result<Event> {
        let msg: Nlmsghdr<u16, Genlmsghdr<u8, u16>> = match self.socket.recv() {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(Event::Idle),
            // neli hands error messages back as errors, not as payloads
            Err(NlError::Nlmsgerr(e)) => return Ok(Event::Error(e.error)),
            Err(e) => return Err(Error::Netlink(e.to_string())),
        };

        if msg.nl_type == nl80211::NLMSG_DONE {
            return Ok(Event::Done);
        }

        match msg.nl_payload {
            NlPayload::Ack(_) => Ok(Event::Ack),
            NlPayload::Payload(genl) => {
                let mut w = AttrWriter::with_capacity(usize::MAX);
                for a in genl.get_attr_handle().iter() {
                    w.put_raw(
                        a.nla_type.nla_type,
                        a.nla_type.nla_nested,
                        a.nla_payload.as_ref(),
                    )?;
                }
                Ok(Event::Reply(Reply::new(genl.cmd, w.into_bytes())))
            }
            _ if msg.nl_type == nl80211::NLMSG_ERROR => {
                Err(Error::malformed("error message without a payload"))
            }
            _ => Ok(Event::Idle),
        }
    }
}
