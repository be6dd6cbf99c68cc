//! The session reactor.
//!
//! One task owns both listeners, the client slots, the channel store and the
//! capture coordinator. Each loop iteration waits on, in priority order:
//!
//! 1. the shutdown future
//! 2. a new control connection
//! 3. a new data connection
//! 4. input from the control client
//! 5. a capture completion posted by the driver thread
//!
//! Handlers never block for longer than the configured write timeout. Any
//! hardware error or listener failure ends the loop with an error; the caller
//! is expected to close the device.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, warn};

use crate::capture::{ArmOutcome, CaptureCompletion, CaptureCoordinator, WakeupReceiver};
use crate::channels::ChannelConfigStore;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::hardware::bring_up;
use crate::hardware::driver::ScopeDriver;
use crate::network::dispatcher::CommandDispatcher;
use crate::network::session::{ControlEvent, Session};

/// Pending connections queued by the kernel per listener.
const LISTEN_BACKLOG: u32 = 8;

/// Single-threaded server for one control client and one data client.
pub struct ScopeServer {
    control_listener: TcpListener,
    data_listener: TcpListener,
    session: Session,
    store: ChannelConfigStore,
    dispatcher: CommandDispatcher,
    coordinator: CaptureCoordinator,
    wakeup_rx: WakeupReceiver,
    write_timeout: Duration,
}

impl ScopeServer {
    /// Bind both listeners. `store` must already reflect the device state.
    pub async fn bind(
        config: &ServerConfig,
        driver: Arc<dyn ScopeDriver>,
        store: ChannelConfigStore,
    ) -> ServerResult<Self> {
        let control_listener = listen("control", config.server.control_addr())?;
        let data_listener = listen("data", config.server.data_addr())?;

        let (coordinator, wakeup_rx) = CaptureCoordinator::new(
            Arc::clone(&driver),
            config.capture.request(),
            config.capture.buffer_samples,
        );

        let server = Self {
            control_listener,
            data_listener,
            session: Session::new(),
            store,
            dispatcher: CommandDispatcher::new(driver, config.trigger),
            coordinator,
            wakeup_rx,
            write_timeout: config.server.client_write_timeout(),
        };
        info!(
            control = %server.control_addr()?,
            data = %server.data_addr()?,
            "Listening"
        );
        Ok(server)
    }

    /// Bound address of the command listener.
    pub fn control_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.control_listener.local_addr()?)
    }

    /// Bound address of the sample stream listener.
    pub fn data_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.data_listener.local_addr()?)
    }

    /// Run until a fatal error.
    pub async fn run(self) -> ServerResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves or a fatal error occurs.
    pub async fn run_until<F>(mut self, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    return Ok(());
                }

                accepted = self.control_listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|source| ServerError::Accept { role: "control", source })?;
                    self.session.install_control(stream, peer);
                }

                accepted = self.data_listener.accept() => {
                    let (stream, peer) = accepted
                        .map_err(|source| ServerError::Accept { role: "data", source })?;
                    self.session.install_data(stream, peer);
                    self.arm_capture()?;
                }

                event = self.session.next_command() => {
                    self.handle_control_event(event).await?;
                }

                completion = self.wakeup_rx.recv() => {
                    match completion {
                        Some(completion) => self.handle_completion(completion).await?,
                        None => {
                            // The coordinator owns a sender for the server's lifetime
                            error!("Capture completion channel closed");
                            return Err(ServerError::Io(std::io::Error::new(
                                std::io::ErrorKind::BrokenPipe,
                                "capture completion channel closed",
                            )));
                        }
                    }
                }
            }
        }
    }

    async fn handle_control_event(&mut self, event: ControlEvent) -> ServerResult<()> {
        match event {
            ControlEvent::Command(line) => {
                if let Some(reply) = self.dispatcher.dispatch(&line, &mut self.store)? {
                    self.session.reply(&reply, self.write_timeout).await;
                }
            }
            ControlEvent::Closed => self.session.clear_control(),
            ControlEvent::Failed(e) => {
                warn!(error = %e, "Control client read failed");
                self.session.clear_control();
            }
        }
        Ok(())
    }

    async fn handle_completion(&mut self, completion: CaptureCompletion) -> ServerResult<()> {
        if self.coordinator.complete(completion)?.is_none() {
            return Ok(());
        }
        if let Some(payload) = self.coordinator.take_payload() {
            self.session.send_samples(&payload, self.write_timeout).await;
        }

        if self.session.has_data() {
            self.arm_capture()?;
        } else {
            debug!("No data client, capture idle until the next connection");
        }
        Ok(())
    }

    fn arm_capture(&mut self) -> ServerResult<()> {
        match self.coordinator.arm()? {
            ArmOutcome::Started(sequence) => debug!(sequence, "Capture started"),
            ArmOutcome::Busy(state) => {
                info!(?state, "Capture already running, result goes to the current data client")
            }
        }
        Ok(())
    }
}

fn listen(role: &'static str, addr: SocketAddr) -> ServerResult<TcpListener> {
    let bind_error = |source| ServerError::Bind { role, addr, source };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)
}

/// Bring the device up, serve until `shutdown` or a fatal error, then close
/// the device.
pub async fn serve<F>(
    config: &ServerConfig,
    driver: Arc<dyn ScopeDriver>,
    shutdown: F,
) -> ServerResult<()>
where
    F: Future<Output = ()>,
{
    let result = serve_inner(config, Arc::clone(&driver), shutdown).await;
    if let Err(e) = &result {
        error!(error = %e, "Server stopped");
    }
    driver.close();
    info!("Device closed");
    result
}

async fn serve_inner<F>(
    config: &ServerConfig,
    driver: Arc<dyn ScopeDriver>,
    shutdown: F,
) -> ServerResult<()>
where
    F: Future<Output = ()>,
{
    let mut store = ChannelConfigStore::new(Arc::clone(&driver));
    bring_up::initialize(
        driver.as_ref(),
        &mut store,
        &config.device,
        &config.generator,
        &config.trigger,
    )?;

    let server = ScopeServer::bind(config, driver, store).await?;
    server.run_until(shutdown).await
}
