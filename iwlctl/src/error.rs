use std::{io, path::PathBuf};

/// Errors raised while talking to the kernel or the adapter.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open netlink socket: {0}")]
    Connect(#[source] io::Error),
    #[error("failed to resolve the nl80211 family: {0}")]
    Resolve(String),
    #[error("message exceeds the {0} byte netlink buffer")]
    MessageOverflow(usize),
    #[error("netlink: {0}")]
    Netlink(String),
    /// The kernel answered with a negative error code.
    #[error("command {cmd} rejected: {message} (errno {errno})")]
    Kernel { cmd: u8, errno: i32, message: String },
    #[error("malformed reply: {0}")]
    Malformed(String),
    #[error("no wireless physical device found")]
    NoPhy,
    #[error("interface {0:?} not found")]
    NoInterface(String),
    /// A retried state transition never reached the target state.
    #[error("{what} did not converge after {attempts} attempts")]
    Convergence { what: String, attempts: u32 },
    /// The stop flag was raised while waiting for the device.
    #[error("cancelled")]
    Cancelled,
    #[error("CSI debugfs control unavailable at {}: {reason}", path.display())]
    Debugfs { path: PathBuf, reason: String },
    #[error(transparent)]
    Pcap(#[from] pcap::Error),
    #[error(transparent)]
    Decode(#[from] csi::frame::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn kernel(cmd: u8, errno: i32) -> Self {
        let errno = errno.abs();
        Self::Kernel {
            cmd,
            errno,
            message: io::Error::from_raw_os_error(errno).to_string(),
        }
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
