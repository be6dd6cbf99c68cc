//! Client slots.
//!
//! The server talks to at most one control client and one data client. A
//! new connection for a role tears down the previous one before it is
//! installed, so a socket is never leaked and a stale client can never
//! receive data meant for its replacement.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Bytes read from the control client per readiness event.
pub const READ_BUFFER_LEN: usize = 1024;

/// Result of waiting on the control client.
#[derive(Debug)]
pub enum ControlEvent {
    /// One read worth of input, treated as one command.
    Command(String),
    /// The peer closed the connection.
    Closed,
    /// The read failed.
    Failed(io::Error),
}

/// The connection on the command listener.
pub struct ControlClient {
    stream: TcpStream,
    peer: SocketAddr,
    buf: Box<[u8; READ_BUFFER_LEN]>,
}

impl ControlClient {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            buf: Box::new([0u8; READ_BUFFER_LEN]),
        }
    }

    /// Wait for the next read.
    ///
    /// Commands are not reassembled: whatever one read returns is one
    /// command. Clients are expected to send a whole line per packet.
    async fn read_command(&mut self) -> ControlEvent {
        match self.stream.read(&mut self.buf[..]).await {
            Ok(0) => ControlEvent::Closed,
            Ok(n) => ControlEvent::Command(String::from_utf8_lossy(&self.buf[..n]).into_owned()),
            Err(e) => ControlEvent::Failed(e),
        }
    }
}

/// The connection on the sample stream listener.
pub struct DataClient {
    stream: TcpStream,
    peer: SocketAddr,
}

impl DataClient {
    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// Current control and data clients.
#[derive(Default)]
pub struct Session {
    control: Option<ControlClient>,
    data: Option<DataClient>,
}

impl Session {
    /// Empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a control client is connected.
    pub fn has_control(&self) -> bool {
        self.control.is_some()
    }

    /// Whether a data client is connected.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Address of the data client, if any.
    pub fn data_peer(&self) -> Option<SocketAddr> {
        self.data.as_ref().map(DataClient::peer)
    }

    /// Replace the control client. The previous one is closed first.
    pub fn install_control(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Some(old) = self.control.take() {
            info!(old = %old.peer, new = %peer, "Replacing control client");
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Could not set TCP_NODELAY on control client");
        }
        info!(%peer, "Control client connected");
        self.control = Some(ControlClient::new(stream, peer));
    }

    /// Replace the data client. The previous one is closed first.
    pub fn install_data(&mut self, stream: TcpStream, peer: SocketAddr) {
        if let Some(old) = self.data.take() {
            info!(old = %old.peer, new = %peer, "Replacing data client");
        }
        info!(%peer, "Data client connected");
        self.data = Some(DataClient { stream, peer });
    }

    /// Drop the control client.
    pub fn clear_control(&mut self) {
        if let Some(old) = self.control.take() {
            info!(peer = %old.peer, "Control client disconnected");
        }
    }

    /// Drop the data client.
    pub fn clear_data(&mut self) {
        if let Some(old) = self.data.take() {
            info!(peer = %old.peer, "Data client disconnected");
        }
    }

    /// Wait for input from the control client.
    ///
    /// Never resolves while no control client is connected. Cancel safe.
    pub async fn next_command(&mut self) -> ControlEvent {
        match self.control.as_mut() {
            Some(client) => client.read_command().await,
            None => std::future::pending().await,
        }
    }

    /// Send a reply line to the control client.
    ///
    /// A failed or timed out write drops the client.
    pub async fn reply(&mut self, text: &str, limit: Duration) {
        let Some(client) = self.control.as_mut() else {
            return;
        };
        if let Err(e) = write_bounded(&mut client.stream, text.as_bytes(), limit).await {
            warn!(peer = %client.peer, error = %e, "Failed to write reply");
            self.clear_control();
        }
    }

    /// Push one sample buffer to the data client, best-effort.
    ///
    /// Returns whether the samples were written. Without a data client the
    /// samples are discarded. A failed or timed out write drops the client.
    pub async fn send_samples(&mut self, payload: &[u8], limit: Duration) -> bool {
        let Some(client) = self.data.as_mut() else {
            debug!(bytes = payload.len(), "No data client, discarding samples");
            return false;
        };
        match write_bounded(&mut client.stream, payload, limit).await {
            Ok(()) => {
                debug!(peer = %client.peer, bytes = payload.len(), "Samples sent");
                true
            }
            Err(e) => {
                warn!(peer = %client.peer, error = %e, "Failed to send samples");
                self.clear_data();
                false
            }
        }
    }
}

async fn write_bounded(stream: &mut TcpStream, bytes: &[u8], limit: Duration) -> io::Result<()> {
    match timeout(limit, stream.write_all(bytes)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
    }
}
