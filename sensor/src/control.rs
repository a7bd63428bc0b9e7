//! Remote control over UDP.
//!
//! A datagram holding `stop` ends the current run. Any other datagram is a
//! list of run options; the sender becomes the peer the new run streams its
//! records to.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::args::RunArgs;

const MAX_DATAGRAM: usize = 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub enum Request {
    Stop,
    Run(Box<RunArgs>),
}

impl Request {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if text == "stop" {
            return Ok(Request::Stop);
        }
        Ok(Request::Run(Box::new(RunArgs::from_datagram(text)?)))
    }
}

#[derive(Debug)]
pub struct ControlChannel {
    socket: Arc<UdpSocket>,
}

impl ControlChannel {
    /// Listens on `port` on every IPv4 address.
    pub fn bind(port: u16) -> io::Result<Self> {
        Self::from_socket(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?)
    }

    pub fn from_socket(socket: UdpSocket) -> io::Result<Self> {
        socket.set_read_timeout(Some(POLL_INTERVAL))?;
        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    /// The socket records are streamed from.
    pub fn socket(&self) -> &Arc<UdpSocket> {
        &self.socket
    }

    /// Hands every valid request to `on_request` until `stop` is set.
    pub fn serve(
        &self,
        stop: &AtomicBool,
        mut on_request: impl FnMut(Request, SocketAddr),
    ) -> io::Result<()> {
        info!(addr = %self.socket.local_addr()?, "listening for control datagrams");
        let mut buf = [0; MAX_DATAGRAM];

        while !stop.load(Ordering::Relaxed) {
            let (n, peer) = match self.socket.recv_from(&mut buf) {
                Ok(r) => r,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue
                }
                Err(e) => return Err(e),
            };

            let text = String::from_utf8_lossy(&buf[..n]);
            debug!(%peer, %text, "control datagram");
            match Request::parse(&text) {
                Ok(request) => on_request(request, peer),
                Err(e) => warn!(%peer, "rejected control datagram: {e:#}"),
            }
        }
        Ok(())
    }
}
