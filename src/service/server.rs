//! RCON server: accept loop, per-connection workers and liveness.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::ServerConfig;
use crate::core::codec::RconCodec;
use crate::core::packet::{Packet, ReceivedPacket, SERVERDATA_RESPONSE_VALUE};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{CommandHandler, DispatchOutcome, Dispatcher};
use crate::protocol::handshake;
use crate::protocol::message::{ConnectionId, ConnectionInfo, UNSOLICITED_ID};
use crate::service::heartbeat::Heartbeat;
use crate::service::registry::{ConnectionRegistry, ConnectionState};
use crate::transport::classify::report_error;
use crate::transport::tcp::{self, FrameRead};
use crate::utils::logging::{EventLog, LogHook};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout;

/// Pause after a failed `accept()` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Everything a connection worker needs, shared by `Arc`.
struct ConnectionContext {
    config: ServerConfig,
    log: EventLog,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
}

/// An RCON server.
///
/// Construct with [`RconServer::new`], register a command handler, then call
/// [`RconServer::start`]. Each accepted connection gets its own worker task
/// that authenticates the peer, dispatches its commands and keeps it alive.
///
/// ```no_run
/// # async fn run() -> rcon_protocol::error::Result<()> {
/// use rcon_protocol::config::ServerConfig;
/// use rcon_protocol::protocol::message::ConnectionInfo;
/// use rcon_protocol::service::server::RconServer;
///
/// let server = RconServer::new(ServerConfig::new("0.0.0.0:27015", "changeme"));
/// server.on_command(|_: &ConnectionInfo, cmd: &str| format!("ran {cmd}"))?;
/// server.start(false).await?;
/// # Ok(())
/// # }
/// ```
pub struct RconServer {
    config: ServerConfig,
    log: EventLog,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    online: Arc<AtomicBool>,
    shutdown: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl RconServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            log: EventLog::default(),
            dispatcher: Arc::new(Dispatcher::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            metrics: Arc::new(Metrics::new()),
            online: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            local_addr: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// Forward every diagnostic line to `hook` as well as to `tracing`.
    pub fn with_log_hook(mut self, hook: LogHook) -> Self {
        self.log = EventLog::new(Some(hook));
        self
    }

    /// Set the handler for authenticated commands. May be called while
    /// online; later commands use the new handler.
    pub fn on_command<H>(&self, handler: H) -> Result<()>
    where
        H: CommandHandler,
    {
        self.dispatcher.register(handler)
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// The bound address, once started. Useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.lock().ok().and_then(|addr| *addr)
    }

    /// Snapshot of every connection in the table, ordered by id.
    pub fn connections(&self) -> Result<Vec<ConnectionInfo>> {
        self.registry.snapshot()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len().unwrap_or(0)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind, listen and start accepting connections.
    ///
    /// With `return_after == false` this keeps running until
    /// [`RconServer::shutdown`] is called (or Ctrl-C, when enabled).
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub async fn start(&self, return_after: bool) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        if self.is_online() {
            self.log.warn("Server is already online.");
            return Ok(());
        }

        if let Err(e) = self.config.validate_strict() {
            self.log.error(&e.to_string());
            return Err(e);
        }

        self.log.info("Attempting to startup an RCON server...");

        let listener = match tcp::bind_listener(&self.config.address) {
            Ok(listener) => listener,
            Err(e) => {
                report_error(&e, &self.log);
                self.log
                    .error("RCON is aborting as it failed to initiate server.");
                return Err(e);
            }
        };

        let bound = listener.local_addr()?;
        if let Ok(mut addr) = self.local_addr.lock() {
            *addr = Some(bound);
        }
        self.online.store(true, Ordering::Release);
        self.log
            .info("Server is now listening, initiating runners...");

        let ctx = Arc::new(ConnectionContext {
            config: self.config.clone(),
            log: self.log.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            registry: Arc::clone(&self.registry),
            metrics: Arc::clone(&self.metrics),
        });
        let accept = tokio::spawn(accept_loop(ctx, listener, self.shutdown.clone()));
        if let Ok(mut task) = self.accept_task.lock() {
            *task = Some(accept);
        }

        info!(address = %bound, "RCON server ready");
        self.log.info("Server is now ready!");

        if !return_after {
            self.wait_for_shutdown().await;
        }
        Ok(())
    }

    async fn wait_for_shutdown(&self) {
        if self.config.shutdown_on_ctrl_c {
            tokio::select! {
                _ = self.shutdown.cancelled() => {}
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        self.log.info("Received CTRL+C signal, shutting down");
                    }
                    self.shutdown().await;
                }
            }
        } else {
            self.shutdown.cancelled().await;
        }
    }

    /// Close a client's connection.
    ///
    /// Waits for its worker to finish, bounded by the shutdown timeout, and
    /// erases the table entry when `remove_after` is set. Returns `false`
    /// when no such connection exists. Safe to call repeatedly.
    pub async fn disconnect_client(&self, id: ConnectionId, remove_after: bool) -> Result<bool> {
        let Some(state) = self.registry.get(id)? else {
            return Ok(false);
        };

        state.mark_pending_disconnect();
        state.cancel_token().cancel();

        if let Some(worker) = self.registry.take_worker(id)? {
            let abort = worker.abort_handle();
            if with_timeout(worker, self.config.shutdown_timeout)
                .await
                .is_err()
            {
                warn!(client = id, "Connection worker did not stop in time; aborting");
                abort.abort();
            }
        }
        state.mark_closed();

        if remove_after {
            self.registry.remove(id)?;
        }

        self.log
            .info(&format!("Client [{}] has been disconnected.", state.peer_addr));
        Ok(true)
    }

    /// Stop accepting, disconnect every client and go offline.
    pub async fn shutdown(&self) {
        let was_online = self.online.swap(false, Ordering::AcqRel);
        self.shutdown.cancel();
        if !was_online {
            return;
        }

        self.log.info("Shutting down server...");

        let accept = self.accept_task.lock().ok().and_then(|mut t| t.take());
        if let Some(accept) = accept {
            let _ = accept.await;
        }

        match self.registry.ids() {
            Ok(ids) => {
                for id in ids {
                    if let Err(e) = self.disconnect_client(id, false).await {
                        warn!(client = id, error = %e, "Failed to disconnect client");
                    }
                }
            }
            Err(e) => warn!(error = %e, "Failed to list connections"),
        }
        if let Err(e) = self.registry.clear() {
            warn!(error = %e, "Failed to clear connection table");
        }

        self.metrics.log_summary();
        self.log.info("Server is now offline.");
    }
}

impl Drop for RconServer {
    fn drop(&mut self) {
        self.online.store(false, Ordering::Release);
        self.shutdown.cancel();
        if let Ok(mut task) = self.accept_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

async fn accept_loop(ctx: Arc<ConnectionContext>, listener: TcpListener, shutdown: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                ctx.metrics.connection_error();
                ctx.log.warn("A client failed to connect.");
                report_error(&ProtocolError::Io(e), &ctx.log);
                if !accept_backoff(&shutdown).await {
                    break;
                }
                continue;
            }
        };

        if ctx.registry.len().unwrap_or(0) >= ctx.config.max_connections {
            ctx.metrics.connection_refused();
            ctx.log.warn(&format!(
                "Client [{peer}] refused: connection limit ({}) reached.",
                ctx.config.max_connections
            ));
            drop(stream);
            continue;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = ctx.registry.next_id();
        let state = Arc::new(ConnectionState::new(id, peer, shutdown.child_token()));
        if let Err(e) = ctx.registry.insert(Arc::clone(&state)) {
            ctx.log.error(&format!("Failed to register client [{peer}]: {e}"));
            continue;
        }
        ctx.metrics.connection_established();
        ctx.log
            .info(&format!("Client [{peer}] has connected to the server."));

        let framed = Framed::new(stream, RconCodec::new(ctx.config.max_packet_size));
        let worker = tokio::spawn(run_connection(Arc::clone(&ctx), state, framed));
        if let Err(e) = ctx.registry.attach_worker(id, worker) {
            warn!(client = id, error = %e, "Failed to record connection worker");
        }
    }

    debug!("Accept loop stopped");
}

/// Wait out [`ACCEPT_BACKOFF`]. Errors such as EMFILE persist until a
/// descriptor frees up. Returns false if shutdown fired meanwhile.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

/// Per-connection worker. Processes frames strictly in arrival order until
/// the connection is flagged for disconnect or cancelled from outside.
#[instrument(skip_all, fields(client = state.id, peer = %state.peer_addr))]
async fn run_connection<T>(
    ctx: Arc<ConnectionContext>,
    state: Arc<ConnectionState>,
    mut framed: Framed<T, RconCodec>,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut heartbeat = Heartbeat::new(ctx.config.heartbeat_interval);

    while !state.is_pending_disconnect() {
        let read = tokio::select! {
            _ = state.cancel_token().cancelled() => break,
            read = tcp::next_frame(&mut framed, ctx.config.poll_interval) => read,
        };

        match read {
            FrameRead::Packet(packet) if packet.has_payload() => {
                ctx.metrics.packet_received(packet.data.len() as u64 + 4);
                heartbeat.touch();
                handle_packet(&ctx, &state, &mut framed, &packet).await;
            }
            FrameRead::Packet(packet) => {
                debug!(size = packet.size, "Ignoring undersized frame");
            }
            FrameRead::TimedOut => {}
            FrameRead::Closed => {
                ctx.log.info(&format!(
                    "Client [{}] has disconnected from the server.",
                    state.peer_addr
                ));
                state.mark_pending_disconnect();
            }
            FrameRead::Failed(e) => {
                ctx.metrics.connection_error();
                ctx.log.warn(&format!(
                    "Failed to get a packet from client [{}]: {e}",
                    state.peer_addr
                ));
                report_error(&e, &ctx.log);
                state.mark_pending_disconnect();
            }
        }

        if !state.is_pending_disconnect() && state.is_authenticated() && heartbeat.is_due() {
            send_heartbeat(&ctx, &state, &mut framed, &mut heartbeat).await;
        }
    }

    drop(framed);
    state.mark_closed();
    ctx.metrics.connection_closed();

    // An outside disconnect decides itself whether the entry is erased.
    if !state.is_cancelled() {
        if let Err(e) = ctx.registry.remove(state.id) {
            warn!(error = %e, "Failed to remove connection");
        }
    }
    debug!("Connection worker finished");
}

async fn handle_packet<T>(
    ctx: &ConnectionContext,
    state: &ConnectionState,
    framed: &mut Framed<T, RconCodec>,
    packet: &ReceivedPacket,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let Some(id) = packet.id() else {
        return;
    };

    let reply = if !state.is_authenticated() {
        let accepted = handshake::verify_password(&ctx.config.password, packet.body());
        if accepted {
            state.set_authenticated();
            ctx.metrics.auth_succeeded();
            ctx.log
                .info(&format!("Client [{}] has authenticated.", state.peer_addr));
        } else {
            ctx.metrics.auth_rejected();
            ctx.log.warn(&format!(
                "Client [{}] sent an incorrect password.",
                state.peer_addr
            ));
        }
        handshake::auth_response(id, accepted)
    } else {
        match ctx.dispatcher.dispatch(&state.info(), packet) {
            Ok((reply, outcome)) => {
                log_dispatch(ctx, state, &outcome);
                reply
            }
            Err(e) => {
                ctx.log
                    .error(&format!("Failed to dispatch packet {id}: {e}"));
                Packet::new(id, SERVERDATA_RESPONSE_VALUE, Vec::new())
            }
        }
    };

    match tcp::write_packet(framed, reply).await {
        Ok(written) => ctx.metrics.packet_sent(written as u64),
        Err(e) => {
            ctx.metrics.connection_error();
            ctx.log.warn(&format!("{}!", constants::ERR_SEND_FAILED));
            report_error(&e, &ctx.log);
        }
    }
}

fn log_dispatch(ctx: &ConnectionContext, state: &ConnectionState, outcome: &DispatchOutcome) {
    match outcome {
        DispatchOutcome::Executed(command) | DispatchOutcome::Unhandled(command) => {
            ctx.metrics.command_executed();
            ctx.log.info(&format!(
                "Client [{}] has asked to execute the command: \"{command}\"",
                state.peer_addr
            ));
        }
        DispatchOutcome::InvalidType(packet_type) => {
            ctx.metrics.protocol_violation();
            ctx.log.warn(&format!(
                "Invalid packet type ({packet_type}) sent by [{}]. Double check your packets.",
                state.peer_addr
            ));
        }
    }
}

/// Send an empty value packet to an idle client. A failed send flags the
/// connection; the loop tears it down on its next check.
async fn send_heartbeat<T>(
    ctx: &ConnectionContext,
    state: &ConnectionState,
    framed: &mut Framed<T, RconCodec>,
    heartbeat: &mut Heartbeat,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let keep_alive = Packet::new(UNSOLICITED_ID, SERVERDATA_RESPONSE_VALUE, Vec::new());
    match tcp::write_packet(framed, keep_alive).await {
        Ok(written) => {
            heartbeat.touch();
            ctx.metrics.heartbeat_sent();
            ctx.metrics.packet_sent(written as u64);
            debug!("Heartbeat sent");
        }
        Err(e) => {
            ctx.log.warn(&format!(
                "Heartbeat to client [{}] failed; disconnecting.",
                state.peer_addr
            ));
            report_error(&e, &ctx.log);
            state.mark_pending_disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A peer that never sends and refuses every write.
    struct DeadPeer;

    impl AsyncRead for DeadPeer {
        fn poll_read(
            self: Pin<&mut Self>,
            _: &mut Context<'_>,
            _: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Pending
        }
    }

    impl AsyncWrite for DeadPeer {
        fn poll_write(self: Pin<&mut Self>, _: &mut Context<'_>, _: &[u8]) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn context(heartbeat: Duration) -> Arc<ConnectionContext> {
        let mut config = ServerConfig::new("127.0.0.1:0", "pw");
        config.heartbeat_interval = heartbeat;
        config.poll_interval = Duration::from_millis(10);
        Arc::new(ConnectionContext {
            config,
            log: EventLog::default(),
            dispatcher: Arc::new(Dispatcher::new()),
            registry: Arc::new(ConnectionRegistry::new()),
            metrics: Arc::new(Metrics::new()),
        })
    }

    #[tokio::test]
    async fn failed_heartbeat_removes_connection() {
        let ctx = context(Duration::from_millis(50));
        let state = Arc::new(ConnectionState::new(
            ctx.registry.next_id(),
            "127.0.0.1:40000".parse().unwrap(),
            CancellationToken::new(),
        ));
        state.set_authenticated();
        ctx.registry.insert(Arc::clone(&state)).unwrap();
        ctx.metrics.connection_established();

        let framed = Framed::new(DeadPeer, RconCodec::default());
        with_timeout(run_connection(Arc::clone(&ctx), Arc::clone(&state), framed), Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(ctx.registry.len().unwrap(), 0);
        assert!(!state.is_connected());
        let snapshot = ctx.metrics.snapshot();
        assert_eq!(snapshot.heartbeats_sent, 0);
        assert_eq!(snapshot.connections_active, 0);
    }

    #[tokio::test]
    async fn unauthenticated_connection_gets_no_heartbeat() {
        let ctx = context(Duration::from_millis(20));
        let state = Arc::new(ConnectionState::new(
            ctx.registry.next_id(),
            "127.0.0.1:40001".parse().unwrap(),
            CancellationToken::new(),
        ));
        ctx.registry.insert(Arc::clone(&state)).unwrap();

        let framed = Framed::new(DeadPeer, RconCodec::default());
        let worker = tokio::spawn(run_connection(Arc::clone(&ctx), Arc::clone(&state), framed));
        tokio::time::sleep(Duration::from_millis(150)).await;

        // A heartbeat attempt would have failed and torn the worker down.
        assert!(!worker.is_finished());
        assert_eq!(ctx.registry.len().unwrap(), 1);

        state.cancel_token().cancel();
        with_timeout(worker, Duration::from_secs(1)).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn accept_backoff_waits_unless_shutting_down() {
        let shutdown = CancellationToken::new();
        let started = tokio::time::Instant::now();
        assert!(accept_backoff(&shutdown).await);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);

        shutdown.cancel();
        let started = tokio::time::Instant::now();
        assert!(!accept_backoff(&shutdown).await);
        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }
}
