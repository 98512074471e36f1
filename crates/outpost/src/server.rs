//! `OutpostServer` builder and server loop.
//!
//! This is the entry point for running a dedicated server. It ties the
//! layers together: transport → protocol → session → core. The loop is
//! single-threaded on purpose: drain the socket, run one frame, send what
//! the frame produced, then sleep until the next tick is due or a packet
//! or console line arrives.

use std::net::SocketAddr;
use std::time::Duration;

use outpost_transport::{DatagramTransport, TransportError, UdpTransport};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::OutpostError;
use crate::config::{CvarTable, ServerConfig};
use crate::frame::{FrameOutcome, ServerCore};
use crate::master::{Resolve, SystemResolver};
use crate::simulation::{NullSimulation, Simulation};

/// Poll interval while no map is loaded or the game is paused.
const IDLE_POLL: Duration = Duration::from_millis(100);

/// Queued console lines before senders wait.
const CONSOLE_QUEUE: usize = 64;

/// Builder for configuring and starting an Outpost server.
///
/// # Example
///
/// ```rust,ignore
/// use outpost::prelude::*;
///
/// let mut server = OutpostServer::builder()
///     .bind("0.0.0.0:27960")
///     .build(NullSimulation::default())
///     .await?;
/// server.core_mut().spawn_map("q3dm1")?;
/// server.run().await
/// ```
pub struct OutpostServerBuilder {
    config: ServerConfig,
    resolver: Option<Box<dyn Resolve>>,
}

impl OutpostServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            resolver: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Resolves master and authorization server names with `resolver`
    /// instead of the system's name lookup.
    pub fn resolver(mut self, resolver: impl Resolve) -> Self {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Binds the socket and builds the server around `simulation`.
    ///
    /// No map is loaded yet; call [`ServerCore::spawn_map`] before
    /// [`OutpostServer::run`].
    pub async fn build<S: Simulation>(self, simulation: S) -> Result<OutpostServer<S>, OutpostError> {
        let transport = UdpTransport::bind(&self.config.bind).await?;
        let resolver = self.resolver.unwrap_or_else(|| Box::new(SystemResolver::new()));
        let core = ServerCore::with_parts(
            Box::new(CvarTable::from_config(&self.config)),
            simulation,
            resolver,
        );
        Ok(OutpostServer::from_parts(transport, core))
    }
}

impl Default for OutpostServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Outpost server.
///
/// Call [`run()`](Self::run) to start serving.
pub struct OutpostServer<S: Simulation, T: DatagramTransport<Error = TransportError> = UdpTransport> {
    transport: T,
    core: ServerCore<S>,
    console_rx: Option<mpsc::Receiver<String>>,
}

impl OutpostServer<NullSimulation> {
    /// Creates a new builder. The simulation type is chosen by
    /// [`OutpostServerBuilder::build`], not by this impl.
    pub fn builder() -> OutpostServerBuilder {
        OutpostServerBuilder::new()
    }
}

impl<S, T> OutpostServer<S, T>
where
    S: Simulation,
    T: DatagramTransport<Error = TransportError>,
{
    /// Assembles a server from a transport and a core.
    pub fn from_parts(transport: T, core: ServerCore<S>) -> Self {
        Self {
            transport,
            core,
            console_rx: None,
        }
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, OutpostError> {
        Ok(self.transport.local_addr()?)
    }

    /// The server core.
    pub fn core(&self) -> &ServerCore<S> {
        &self.core
    }

    /// Mutable access to the server core.
    pub fn core_mut(&mut self) -> &mut ServerCore<S> {
        &mut self.core
    }

    /// A sender for console lines, executed between frames. Replaces any
    /// earlier console input.
    pub fn console_input(&mut self) -> mpsc::Sender<String> {
        let (tx, rx) = mpsc::channel(CONSOLE_QUEUE);
        self.console_rx = Some(rx);
        tx
    }

    /// Runs the server loop until the server is killed.
    ///
    /// # Errors
    /// Only when waiting on the socket fails; send and receive errors on
    /// single datagrams are logged and skipped.
    pub async fn run(mut self) -> Result<(), OutpostError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "Outpost server running");
        let mut last = Instant::now();

        loop {
            self.drain_socket();
            self.drain_console();

            let elapsed = last.elapsed().as_millis();
            let msec = i32::try_from(elapsed).unwrap_or(i32::MAX);
            last += Duration::from_millis(msec as u64);

            let outcome = self.core.run_frame(msec);
            self.flush().await;

            let wait = match outcome {
                FrameOutcome::Killed => {
                    let metrics = self.core.tick_metrics();
                    tracing::info!(
                        ticks = metrics.total_ticks,
                        overruns = metrics.total_overruns,
                        max_tick = ?metrics.max_tick_time,
                        "server killed, exiting"
                    );
                    return Ok(());
                }
                FrameOutcome::Idle(idle) => idle,
                FrameOutcome::Stopped | FrameOutcome::Paused => IDLE_POLL,
                FrameOutcome::Restarted | FrameOutcome::Ran { .. } => {
                    self.core.idle_time().unwrap_or(Duration::ZERO)
                }
            };
            self.wait(wait).await?;
        }
    }

    fn drain_socket(&mut self) {
        loop {
            match self.transport.try_recv() {
                Ok(Some(datagram)) => self.core.handle_datagram(datagram.from, &datagram.data),
                Ok(None) => break,
                Err(e) => {
                    // e.g. ICMP port unreachable surfacing on the next read
                    tracing::debug!(error = %e, "receive failed");
                    break;
                }
            }
        }
    }

    fn drain_console(&mut self) {
        let Some(rx) = self.console_rx.as_mut() else {
            return;
        };
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        for line in lines {
            self.core.execute(&line);
        }
    }

    async fn flush(&mut self) {
        for out in self.core.take_outbox() {
            if let Err(e) = self.transport.send_to(&out.data, out.to).await {
                tracing::debug!(to = %out.to, error = %e, "send failed");
            }
        }
    }

    /// Sleeps for `timeout`, waking early for a packet or a console line.
    async fn wait(&mut self, timeout: Duration) -> Result<(), OutpostError> {
        if timeout.is_zero() {
            tokio::task::yield_now().await;
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            ready = self.transport.readable() => ready?,
            line = next_line(&mut self.console_rx) => match line {
                Some(line) => self.core.execute(&line),
                None => self.console_rx = None,
            },
        }
        Ok(())
    }
}

async fn next_line(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
