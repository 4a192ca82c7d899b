//! RCON client session.
//!
//! One TCP connection, authenticated once at start. Requests go out either
//! directly through [`RconClient::send_sync`] or through a FIFO queue that a
//! single drain worker serves one request at a time; the wire protocol has
//! no multiplexing, so at most one exchange is ever in flight.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::ClientConfig;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::handshake::{self, AuthStep, CommandStep};
use crate::protocol::message::{
    OutgoingRequest, RequestKind, Response, ResponseCallback, AUTH_REQUEST_ID,
};
use crate::transport::classify::report_error;
use crate::transport::tcp::{self, FrameRead, RconFramed};
use crate::utils::logging::{EventLog, LogHook};
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::timeout::with_timeout;

/// Lifecycle of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Disconnected = 0,
    Connecting = 1,
    Authenticating = 2,
    Ready = 3,
    Closed = 4,
}

impl ClientState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ClientState::Connecting,
            2 => ClientState::Authenticating,
            3 => ClientState::Ready,
            4 => ClientState::Closed,
            _ => ClientState::Disconnected,
        }
    }
}

/// What the correlation loop concluded.
enum Correlation {
    Answer(Response),
    AuthRejected,
    NoResponse,
    /// The stream is unusable; the session drops it.
    Lost(ProtocolError),
}

/// State shared between the caller-facing client and its drain worker.
struct Session {
    config: ClientConfig,
    log: EventLog,
    state: AtomicU8,
    // Held for a whole write-then-correlate exchange, which serializes
    // direct `send_sync` callers with the drain worker.
    stream: tokio::sync::Mutex<Option<RconFramed>>,
    metrics: Metrics,
    shutdown: CancellationToken,
}

impl Session {
    fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_ready(&self) -> bool {
        self.state() == ClientState::Ready
    }

    async fn exchange(&self, body: &str, id: i32, kind: RequestKind, feedback: bool) -> Response {
        match self.transact(body, id, kind, feedback).await {
            Correlation::Answer(response) => response,
            Correlation::AuthRejected | Correlation::NoResponse | Correlation::Lost(_) => {
                Response::no_response()
            }
        }
    }

    async fn transact(&self, body: &str, id: i32, kind: RequestKind, feedback: bool) -> Correlation {
        if !self.is_ready() && kind != RequestKind::Auth {
            self.log.warn(constants::ERR_NOT_CONNECTED);
            return Correlation::NoResponse;
        }

        let _timer = Timer::start("rcon_exchange");
        let mut guard = self.stream.lock().await;
        let Some(framed) = guard.as_mut() else {
            self.log.warn(constants::ERR_NOT_CONNECTED);
            return Correlation::NoResponse;
        };

        let packet = Packet::new(id, kind.packet_type(), body.as_bytes());
        let outcome = match tcp::write_packet(framed, packet).await {
            Ok(written) => {
                self.metrics.packet_sent(written as u64);
                if !feedback {
                    return Correlation::NoResponse;
                }
                tokio::select! {
                    _ = self.shutdown.cancelled() => Correlation::NoResponse,
                    outcome = self.correlate(framed, id, kind) => outcome,
                }
            }
            // Rejected before any byte was written; the stream is intact.
            Err(e @ ProtocolError::OversizedPacket(_)) => {
                self.log.warn(&format!("{}! {e}", constants::ERR_OVERSIZED_PACKET));
                return Correlation::NoResponse;
            }
            Err(e) => {
                self.log.warn(&format!("{}! {e}", constants::ERR_SEND_FAILED));
                report_error(&e, &self.log);
                Correlation::Lost(ProtocolError::SendFailure(e.to_string()))
            }
        };

        if let Correlation::Lost(e) = &outcome {
            self.metrics.connection_error();
            self.log.warn(&format!("Connection to RCON server lost: {e}"));
            if guard.take().is_some() {
                self.metrics.connection_closed();
            }
            let _ = self.state.compare_exchange(
                ClientState::Ready as u8,
                ClientState::Disconnected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        outcome
    }

    /// Read frames until one answers `id`, spending one unit of the retry
    /// budget per frame or per receive timeout. Frames for other ids are
    /// discarded. EOF or a read error ends the wait at once.
    async fn correlate(&self, framed: &mut RconFramed, id: i32, kind: RequestKind) -> Correlation {
        for _ in 0..self.config.max_receive_retries {
            let packet = match tcp::next_frame(framed, self.config.receive_timeout).await {
                FrameRead::Packet(packet) => packet,
                FrameRead::TimedOut => {
                    self.log.debug("Did not receive a packet in time. Still waiting...");
                    continue;
                }
                FrameRead::Closed => return Correlation::Lost(ProtocolError::PeerDisconnected),
                FrameRead::Failed(e) => {
                    report_error(&e, &self.log);
                    return Correlation::Lost(e);
                }
            };
            self.metrics.packet_received(packet.data.len() as u64 + 4);

            match kind {
                RequestKind::Auth => match handshake::auth_outcome(&packet, id) {
                    AuthStep::Skip => continue,
                    AuthStep::Accepted => return Correlation::Answer(Response::responded("")),
                    AuthStep::Rejected => return Correlation::AuthRejected,
                },
                RequestKind::ExecCommand => match handshake::command_outcome(&packet, id) {
                    CommandStep::Skip => {
                        debug!(expected = id, got = ?packet.id(), "Discarding unrelated packet");
                    }
                    CommandStep::Matched(response) => {
                        self.metrics.command_executed();
                        return Correlation::Answer(response);
                    }
                },
            }
        }

        self.log.warn("Retry budget spent without a matching response.");
        Correlation::NoResponse
    }

    async fn close_stream(&self) {
        if self.stream.lock().await.take().is_some() {
            self.metrics.connection_closed();
        }
    }
}

/// An RCON client.
///
/// ```no_run
/// # async fn run() -> rcon_protocol::error::Result<()> {
/// use rcon_protocol::config::ClientConfig;
/// use rcon_protocol::protocol::message::RequestKind;
/// use rcon_protocol::service::client::RconClient;
///
/// let client = RconClient::new(ClientConfig::new("127.0.0.1:27015", "changeme"));
/// client.start(true).await?;
/// let status = client.send_sync("status", 3, RequestKind::ExecCommand, true).await;
/// println!("{}", status.data);
/// client.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RconClient {
    session: Arc<Session>,
    queue: mpsc::UnboundedSender<OutgoingRequest>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<OutgoingRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RconClient {
    /// Build an unconnected client. No I/O happens until [`RconClient::start`].
    pub fn new(config: ClientConfig) -> Self {
        Self::build(config, EventLog::default())
    }

    /// Like [`RconClient::new`], also forwarding diagnostics to `hook`.
    pub fn with_log_hook(config: ClientConfig, hook: LogHook) -> Self {
        Self::build(config, EventLog::new(Some(hook)))
    }

    fn build(config: ClientConfig, log: EventLog) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        Self {
            session: Arc::new(Session {
                config,
                log,
                state: AtomicU8::new(ClientState::Disconnected as u8),
                stream: tokio::sync::Mutex::new(None),
                metrics: Metrics::new(),
                shutdown: CancellationToken::new(),
            }),
            queue,
            pending: Mutex::new(Some(pending)),
            worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ClientState {
        self.session.state()
    }

    /// True once authenticated and until shutdown.
    pub fn is_connected(&self) -> bool {
        self.session.is_ready()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.session.metrics
    }

    pub fn config(&self) -> &ClientConfig {
        &self.session.config
    }

    /// Connect, authenticate and start the drain worker.
    ///
    /// Fails with `ConfigError`, `ConnectError`, `AuthRejected` or
    /// `AuthTimeout`; on failure the client stays disconnected and inert.
    /// A client whose connection was lost may be started again.
    /// With `return_after == false` this then waits until
    /// [`RconClient::shutdown`] is called.
    #[instrument(skip(self), fields(address = %self.session.config.address))]
    pub async fn start(&self, return_after: bool) -> Result<()> {
        let session = &self.session;
        match session.state() {
            ClientState::Disconnected => {}
            ClientState::Closed => return Err(ProtocolError::ConnectionClosed),
            _ => {
                session.log.warn("Client is already started.");
                return Ok(());
            }
        }

        if let Err(e) = session.config.validate_strict() {
            session.log.error(&e.to_string());
            return Err(e);
        }

        session.log.info("Attempting connection to RCON server...");
        session.set_state(ClientState::Connecting);

        let framed = match tcp::connect_with_timeout(
            &session.config.address,
            session.config.connection_timeout,
            session.config.max_packet_size,
        )
        .await
        {
            Ok(framed) => framed,
            Err(e) => {
                session.metrics.connection_error();
                session.set_state(ClientState::Disconnected);
                session.log.error(&format!(
                    "RCON is aborting as it failed to initiate client: {e}"
                ));
                return Err(e);
            }
        };
        *session.stream.lock().await = Some(framed);
        session.metrics.connection_established();

        session
            .log
            .info("Connected successfully! Sending login data...");
        session.set_state(ClientState::Authenticating);

        let outcome = session
            .transact(
                &session.config.password,
                AUTH_REQUEST_ID,
                RequestKind::Auth,
                true,
            )
            .await;

        let failure = match outcome {
            Correlation::Answer(_) => None,
            Correlation::AuthRejected => Some(ProtocolError::AuthRejected),
            Correlation::NoResponse | Correlation::Lost(_) => Some(ProtocolError::AuthTimeout),
        };
        if let Some(e) = failure {
            session.metrics.auth_rejected();
            session.close_stream().await;
            session.set_state(ClientState::Disconnected);
            let reason = match &e {
                ProtocolError::AuthRejected => constants::ERR_AUTH_REJECTED,
                _ => constants::ERR_AUTH_NO_RESPONSE,
            };
            session
                .log
                .error(&format!("{reason}. RCON will now abort."));
            return Err(e);
        }

        session.metrics.auth_succeeded();
        session.set_state(ClientState::Ready);
        session.log.info("Authenticated with RCON server.");

        let pending = self.pending.lock().ok().and_then(|mut p| p.take());
        if let Some(pending) = pending {
            let worker = tokio::spawn(drain_queue(Arc::clone(session), pending));
            if let Ok(mut slot) = self.worker.lock() {
                *slot = Some(worker);
            }
        }

        if !return_after {
            session.shutdown.cancelled().await;
        }
        Ok(())
    }

    /// Queue a request for the drain worker. Never blocks and performs no I/O.
    ///
    /// With a callback the worker waits for the matching response and hands
    /// it over; without one the request is sent without waiting for a reply.
    pub fn send_async(
        &self,
        body: impl Into<String>,
        id: i32,
        kind: RequestKind,
        on_complete: Option<ResponseCallback>,
    ) {
        let request = OutgoingRequest {
            id,
            kind,
            body: body.into(),
            on_complete,
        };
        if let Err(mpsc::error::SendError(request)) = self.queue.send(request) {
            warn!(id = request.id, "Request queue closed; dropping request");
        }
    }

    /// Send one packet and, if `feedback` is set, wait for its answer.
    ///
    /// Returns `("", false)` without any I/O when not connected (auth
    /// packets excepted), when the send fails, when the connection drops,
    /// when the retry budget runs out without a matching frame, or
    /// immediately after sending when `feedback` is false.
    pub async fn send_sync(&self, body: &str, id: i32, kind: RequestKind, feedback: bool) -> Response {
        self.session.exchange(body, id, kind, feedback).await
    }

    /// Bar new sends, stop the drain worker and close the socket.
    pub async fn shutdown(&self) {
        let session = &self.session;
        session.set_state(ClientState::Closed);
        session.shutdown.cancel();

        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            let abort = worker.abort_handle();
            if with_timeout(worker, session.config.receive_timeout)
                .await
                .is_err()
            {
                abort.abort();
            }
        }

        session.close_stream().await;
        session.log.info("Client shut down.");
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        self.session.set_state(ClientState::Closed);
        self.session.shutdown.cancel();
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(worker) = worker.take() {
                worker.abort();
            }
        }
    }
}

/// Serve the request queue: wait for work, take everything queued so far,
/// and run it strictly in order.
async fn drain_queue(session: Arc<Session>, mut queue: mpsc::UnboundedReceiver<OutgoingRequest>) {
    loop {
        let first = tokio::select! {
            _ = session.shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        let mut batch = vec![first];
        while let Ok(request) = queue.try_recv() {
            batch.push(request);
        }

        for request in batch {
            let OutgoingRequest {
                id,
                kind,
                body,
                on_complete,
            } = request;
            match on_complete {
                Some(callback) => callback(session.exchange(&body, id, kind, true).await),
                None => {
                    session.exchange(&body, id, kind, false).await;
                }
            }
        }
    }

    debug!("Drain worker stopped");
}
