//! Shared harness for server integration tests.
//!
//! Starts a `ScopeServer` on ephemeral localhost ports, driven by a
//! manual-completion `MockScope`, so each test decides when captures finish.

#![allow(dead_code)]

use picoscpi::channels::ChannelConfigStore;
use picoscpi::config::ServerConfig;
use picoscpi::hardware::mock::{DriverCall, MockScope};
use picoscpi::network::ScopeServer;
use picoscpi::ServerResult;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

/// Pause that lets the server consume one read before the next write.
pub const SETTLE: Duration = Duration::from_millis(50);

pub struct Harness {
    pub scope: Arc<MockScope>,
    pub control_addr: SocketAddr,
    pub data_addr: SocketAddr,
    pub handle: JoinHandle<ServerResult<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.server.bind_address = "127.0.0.1".parse().unwrap();
    config.server.control_port = 0;
    config.server.data_port = 0;
    config.server.client_write_timeout_ms = 1000;
    config.capture.buffer_samples = 64 * 1024;
    config
}

pub async fn start(scope: MockScope) -> Harness {
    let scope = Arc::new(scope);
    let config = test_config();
    let store = ChannelConfigStore::new(scope.clone());
    let server = ScopeServer::bind(&config, scope.clone(), store)
        .await
        .expect("server should bind");

    let control_addr = server.control_addr().unwrap();
    let data_addr = server.data_addr().unwrap();
    let (tx, rx) = oneshot::channel();
    let handle = tokio::spawn(server.run_until(async {
        let _ = rx.await;
    }));

    Harness {
        scope,
        control_addr,
        data_addr,
        handle,
        shutdown: Some(tx),
    }
}

impl Harness {
    pub async fn connect_control(&self) -> TcpStream {
        let stream = TcpStream::connect(self.control_addr).await.unwrap();
        stream.set_nodelay(true).unwrap();
        stream
    }

    pub async fn connect_data(&self) -> TcpStream {
        TcpStream::connect(self.data_addr).await.unwrap()
    }

    /// Stop the server and return its result.
    pub async fn stop(mut self) -> ServerResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        timeout(WAIT, self.handle)
            .await
            .expect("server should stop")
            .expect("server task should not panic")
    }

    pub fn start_captures(&self) -> usize {
        self.scope
            .count_calls(|c| matches!(c, DriverCall::StartCapture(_)))
    }

    pub fn fetches(&self) -> usize {
        self.scope
            .count_calls(|c| matches!(c, DriverCall::FetchSamples(_)))
    }

    pub fn channel_pushes(&self) -> Vec<DriverCall> {
        self.scope
            .calls()
            .into_iter()
            .filter(|c| matches!(c, DriverCall::ConfigureChannel(..)))
            .collect()
    }
}

/// Poll `condition` until it holds or `WAIT` elapses.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Send one command and give the server time to read it on its own.
pub async fn send_command(stream: &mut TcpStream, command: &str) {
    stream.write_all(command.as_bytes()).await.unwrap();
    sleep(SETTLE).await;
}

/// Send `*IDN?` and read the reply line.
pub async fn query_identity(stream: &mut TcpStream) -> String {
    stream.write_all(b"*IDN?\n").await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(WAIT, reader.read_line(&mut line))
        .await
        .expect("identity reply should arrive")
        .unwrap();
    line
}

/// Read exactly `len` bytes.
pub async fn read_samples(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("samples should arrive")
        .unwrap();
    buf
}

/// Whether the peer has closed the stream.
pub async fn is_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 64];
    loop {
        match timeout(WAIT, stream.read(&mut buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) => return true,
            // Drain anything queued before the close
            Ok(Ok(_)) => continue,
            Err(_) => return false,
        }
    }
}

/// Whether any byte arrives within `within`.
pub async fn receives_more(stream: &mut TcpStream, within: Duration) -> bool {
    let mut buf = [0u8; 1];
    matches!(timeout(within, stream.read(&mut buf)).await, Ok(Ok(n)) if n > 0)
}
