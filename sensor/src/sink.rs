//! Where captured records go: appended to a file, or streamed to the peer
//! that started the run over the control channel.

use std::{
    fs::{self, File, OpenOptions, Permissions},
    io::{self, Write},
    net::{SocketAddr, UdpSocket},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, warn};

/// Read and write for everyone, never executable.
const MODE: u32 = 0o666;

/// Path of the FTM results kept next to the CSI file at `output`.
pub fn ftm_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    output.with_file_name(format!("FTM_{name}"))
}

/// Destination of one run's records.
#[derive(Debug, Clone)]
pub struct Output {
    path: PathBuf,
    peer: Option<(Arc<UdpSocket>, SocketAddr)>,
}

impl Output {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            peer: None,
        }
    }

    /// Streams to `peer` through `socket` instead of writing files.
    pub fn udp(path: impl Into<PathBuf>, socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            path: path.into(),
            peer: Some((socket, peer)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn csi(&self) -> io::Result<Sink> {
        self.open(&self.path)
    }

    pub fn ftm(&self) -> io::Result<Sink> {
        self.open(&ftm_path(&self.path))
    }

    fn open(&self, path: &Path) -> io::Result<Sink> {
        match &self.peer {
            Some((socket, peer)) => Ok(Sink::Udp {
                socket: socket.clone(),
                peer: *peer,
            }),
            None => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .mode(MODE)
                    .open(path)?;
                // the umask applies on creation only
                fs::set_permissions(path, Permissions::from_mode(MODE))?;
                debug!(path = %path.display(), "opened output");
                Ok(Sink::File(file))
            }
        }
    }
}

/// An open destination for encoded records.
#[derive(Debug)]
pub enum Sink {
    File(File),
    Udp {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
}

impl Sink {
    /// Writes one encoded record.
    ///
    /// Datagrams that fail to send are dropped with a warning, the next
    /// record may well get through.
    pub fn write(&mut self, record: &[u8]) -> io::Result<()> {
        match self {
            Sink::File(f) => f.write_all(record),
            Sink::Udp { socket, peer } => {
                match socket.send_to(record, *peer) {
                    Ok(n) if n == record.len() => {}
                    Ok(n) => warn!(%peer, sent = n, len = record.len(), "short datagram"),
                    Err(e) => warn!(%peer, %e, "could not send record"),
                }
                Ok(())
            }
        }
    }
}
