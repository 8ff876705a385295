//! Client facade.
//!
//! Composes the transport, the handshake, the command channel and the event
//! worker into one session object. The facade is the only writer of
//! [`SessionState`], and every write goes through `Shared::transition`. The
//! event worker checks the state under its lock before deciding to tear the
//! session down, which keeps a server-side close racing an application
//! `disconnect` down to a single notification. Callers that lose that race
//! wait on `settled` until the winner reaches `Disconnected`.
//!
//! Lock order is `state` before `session`.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::Bytes;
use daemonlink_core::{Handshake, HandshakeAction, SessionState};
use daemonlink_proto::{
    Codec, Message, MessageKind, Reply, WireMode,
    wire::{CONTROL_TERMINATOR, EVENT_TERMINATOR, QUIT_COMMAND, SET_GZIP_COMMAND},
};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::{
    command::CommandChannel,
    config::{ClientConfig, ConnectionDescriptor},
    error::{ClientError, TransportError},
    event::{EventWorker, WorkerExit, on_worker_thread},
    observer::{DisconnectReason, EventFilter, ObserverHandle, Observers},
    payload::{JsonPayloads, PayloadCodec},
    transport::{Channel, CloseHandle, MessageIo},
};

/// Client for one daemon session at a time.
///
/// All methods take `&self`; share the client between threads with an `Arc`.
/// Dropping the client disconnects it.
pub struct Client {
    shared: Arc<Shared>,
}

struct Shared {
    config: ClientConfig,
    state: Mutex<SessionState>,
    settled: Condvar,
    session: Mutex<Option<Session>>,
    observers: Arc<Observers>,
    payloads: RwLock<Arc<dyn PayloadCodec>>,
    generations: AtomicU64,
}

struct Session {
    generation: u64,
    commands: Arc<CommandChannel>,
    control: CloseHandle,
    events: CloseHandle,
    worker: EventWorker,
    gate: Option<oneshot::Sender<()>>,
    server_version: String,
    peer: SocketAddr,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("peer", &self.peer())
            .field("observers", &self.shared.observers)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Disconnected client with `config`, decoding event payloads as JSON
    pub fn new(config: ClientConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(SessionState::Disconnected),
                settled: Condvar::new(),
                session: Mutex::new(None),
                observers: Arc::new(Observers::new()),
                payloads: RwLock::new(Arc::new(JsonPayloads)),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// Decode event payloads with `codec` from the next connect on
    #[must_use]
    pub fn with_payload_codec(self, codec: impl PayloadCodec + 'static) -> Self {
        *write(&self.shared.payloads) = Arc::new(codec);
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *lock(&self.shared.state)
    }

    /// True while the session accepts commands
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Version the server reported during login. `None` when disconnected.
    pub fn server_version(&self) -> Option<String> {
        lock(&self.shared.session).as_ref().map(|s| s.server_version.clone())
    }

    /// Address of the control connection. `None` when disconnected.
    pub fn peer(&self) -> Option<SocketAddr> {
        lock(&self.shared.session).as_ref().map(|s| s.peer)
    }

    /// Open a session with the configured connect timeout.
    ///
    /// # Errors
    ///
    /// See [`Client::connect_with_timeout`].
    pub fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<(), ClientError> {
        self.connect_with_timeout(descriptor, self.shared.config.connect_timeout)
    }

    /// Open the control socket, log in, open the event socket and start the
    /// event worker, all within `timeout`.
    ///
    /// On failure every socket opened so far is closed and the state is back
    /// to `Disconnected`. Nothing is retried.
    ///
    /// # Errors
    ///
    /// - `ClientError::InvalidState` unless currently `Disconnected`
    /// - `ClientError::Connect` if a socket cannot be opened
    /// - `ClientError::Auth` / `ClientError::Version` if the server refuses
    ///   the login
    /// - `ClientError::Protocol` on an unexpected prompt or framing violation
    /// - `ClientError::Timeout` if `timeout` passes first
    pub fn connect_with_timeout(
        &self,
        descriptor: &ConnectionDescriptor,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        {
            let mut state = lock(&self.shared.state);
            if *state != SessionState::Disconnected {
                return Err(ClientError::InvalidState { state: *state, operation: "connect" });
            }
            self.shared.transition(&mut state, SessionState::Connecting);
        }

        let deadline = Instant::now() + timeout;
        let result = self.shared.establish(descriptor, deadline);
        if let Err(e) = &result {
            tracing::warn!(
                host = %descriptor.host,
                port = descriptor.port,
                error = %e,
                "connect failed"
            );
            self.shared.transition(&mut lock(&self.shared.state), SessionState::Disconnected);
        }
        result
    }

    /// Send one command and return the raw reply.
    ///
    /// # Errors
    ///
    /// - `ClientError::Closed` when not connected
    /// - `ClientError::Disconnected` / `ClientError::Timeout` if the control
    ///   channel broke; the session is torn down
    /// - `ClientError::Protocol` if the request cannot be framed
    pub fn send_command(&self, request: &[u8]) -> Result<Bytes, ClientError> {
        let (generation, commands) = self.shared.commands()?;
        let result = commands.call(request);
        self.shared.after_call(generation, &commands, result)
    }

    /// [`Client::send_command`] with an explicit reply deadline
    pub fn send_command_with_timeout(
        &self,
        request: &[u8],
        timeout: Duration,
    ) -> Result<Bytes, ClientError> {
        let (generation, commands) = self.shared.commands()?;
        let result = commands.call_with_timeout(request, Some(timeout));
        self.shared.after_call(generation, &commands, result)
    }

    /// Send a batch of commands, each expecting an acknowledgement, without
    /// letting other callers interleave.
    ///
    /// # Errors
    ///
    /// - `ClientError::Rejected` with the server's message on the first
    ///   negative acknowledgement; later requests are not sent
    /// - any error of [`Client::send_command`]
    pub fn send_commands<I, R>(&self, requests: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let (generation, commands) = self.shared.commands()?;
        let result = commands.call_all(requests);
        self.shared.after_call(generation, &commands, result)
    }

    /// Send a command whose reply carries data.
    ///
    /// An acknowledgement yields empty data.
    ///
    /// # Errors
    ///
    /// - `ClientError::Rejected` if the server answered with a warning or error
    /// - any error of [`Client::send_command`]
    pub fn query(&self, request: &[u8]) -> Result<Bytes, ClientError> {
        match Reply::parse(self.send_command(request)?) {
            Reply::Data(data) => Ok(data),
            Reply::Ack | Reply::Bye => Ok(Bytes::new()),
            Reply::Warning(reason) | Reply::Error(reason) => Err(ClientError::Rejected(reason)),
        }
    }

    /// End the session.
    ///
    /// Sends `exit` (best effort, bounded by the disconnect timeout), closes
    /// both sockets and stops the event worker. Observers see exactly one
    /// `Disconnected`. If another thread is already tearing the session down,
    /// waits until it finishes. Does nothing while disconnected or
    /// connecting.
    pub fn disconnect(&self) {
        self.shared.teardown(None, DisconnectReason::Requested, None);
    }

    /// Observe events passing `filter`; `"*"` is the wildcard
    pub fn on<F>(&self, filter: impl Into<EventFilter>, callback: F) -> ObserverHandle
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.shared.observers.on(filter, callback)
    }

    /// Observe successful connects; receives the server version
    pub fn on_connected<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.shared.observers.on_connected(callback)
    }

    /// Observe session ends
    pub fn on_disconnected<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(DisconnectReason) + Send + Sync + 'static,
    {
        self.shared.observers.on_disconnected(callback)
    }

    /// Observe errors that forced a teardown
    pub fn on_error<F>(&self, callback: F) -> ObserverHandle
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.shared.observers.on_error(callback)
    }

    /// Remove any registration. Returns `false` if it was already gone.
    pub fn off(&self, handle: ObserverHandle) -> bool {
        self.shared.observers.off(handle)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Shared {
    fn establish(
        self: &Arc<Self>,
        descriptor: &ConnectionDescriptor,
        deadline: Instant,
    ) -> Result<(), ClientError> {
        let config = &self.config;

        let mut control = Channel::open(
            &descriptor.host,
            descriptor.port,
            Some(remaining(deadline)?),
            Codec::delimited(CONTROL_TERMINATOR).with_max_message_size(config.max_message_size),
            MessageKind::Reply,
        )?;
        self.transition(&mut lock(&self.state), SessionState::Authenticating);

        let server_version = authenticate(&mut control, descriptor, deadline)?;
        if config.compressed_framing {
            negotiate_framing(&mut control, deadline)?;
        }
        control.set_timeout(None)?;

        let events = Channel::open(
            &descriptor.host,
            descriptor.port,
            Some(remaining(deadline)?),
            Codec::delimited(EVENT_TERMINATOR).with_max_message_size(config.max_message_size),
            MessageKind::Event,
        )?;

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let peer = control.peer();
        let control_handle = control.close_handle();
        let events_handle = events.close_handle();
        let commands = Arc::new(CommandChannel::new(control, config.command_timeout));

        let (gate, wait) = oneshot::channel();
        let payloads = Arc::clone(&*read(&self.payloads));
        let weak: Weak<Self> = Arc::downgrade(self);
        let worker = EventWorker::spawn(
            format!("daemonlink-events-{generation}"),
            events,
            Arc::clone(&self.observers),
            payloads,
            wait,
            move |exit| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_worker_exit(generation, exit);
                }
            },
        )
        .map_err(|e| ClientError::Io(format!("cannot start event worker: {e}")))?;

        {
            let mut state = lock(&self.state);
            *lock(&self.session) = Some(Session {
                generation,
                commands,
                control: control_handle,
                events: events_handle,
                worker,
                gate: Some(gate),
                server_version: server_version.clone(),
                peer,
            });
            self.transition(&mut state, SessionState::Connected);
        }

        tracing::info!(
            %peer,
            %server_version,
            compressed = config.compressed_framing,
            "connected"
        );
        self.observers.notify_connected(&server_version);

        // An observer may already have disconnected, taking the gate with it
        let gate = lock(&self.session)
            .as_mut()
            .filter(|s| s.generation == generation)
            .and_then(|s| s.gate.take());
        if let Some(gate) = gate {
            let _ = gate.send(());
        }
        Ok(())
    }

    fn commands(&self) -> Result<(u64, Arc<CommandChannel>), ClientError> {
        let state = lock(&self.state);
        if !state.is_connected() {
            return Err(ClientError::Closed);
        }
        lock(&self.session)
            .as_ref()
            .map(|s| (s.generation, Arc::clone(&s.commands)))
            .ok_or(ClientError::Closed)
    }

    fn after_call<T>(
        &self,
        generation: u64,
        commands: &CommandChannel,
        result: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        if let Err(e) = &result
            && commands.is_broken()
        {
            let reason = match e {
                ClientError::Timeout => DisconnectReason::Timeout,
                _ => DisconnectReason::ControlBroken,
            };
            tracing::error!(error = %e, %reason, "control channel lost, tearing down");
            self.teardown(Some(generation), reason, Some(e.clone()));
        }
        result
    }

    fn on_worker_exit(&self, generation: u64, exit: WorkerExit) {
        {
            let state = lock(&self.state);
            if matches!(*state, SessionState::Disconnecting | SessionState::Disconnected) {
                return;
            }
        }
        match &exit.error {
            Some(e) => tracing::error!(error = %e, "event channel lost, tearing down"),
            None => tracing::info!("server closed the event channel"),
        }
        self.teardown(Some(generation), exit.reason, exit.error);
    }

    /// Single exit path of a connected session.
    ///
    /// `generation` pins the teardown to one session so that a stale failure
    /// cannot end a newer one; `None` matches any. A caller that finds another
    /// teardown in progress waits for it, unless it runs on the event worker
    /// that teardown is about to join.
    fn teardown(
        &self,
        generation: Option<u64>,
        reason: DisconnectReason,
        error: Option<ClientError>,
    ) {
        let session = {
            let mut state = lock(&self.state);
            let current = *state;
            match current {
                SessionState::Connected => {},
                SessionState::Disconnecting => {
                    if !on_worker_thread() {
                        let _settled = self
                            .settled
                            .wait_while(state, |s| *s == SessionState::Disconnecting)
                            .unwrap_or_else(PoisonError::into_inner);
                    }
                    return;
                },
                other => {
                    if reason == DisconnectReason::Requested && other.is_establishing() {
                        tracing::debug!(state = %other, "disconnect ignored while connecting");
                    }
                    return;
                },
            }
            let mut slot = lock(&self.session);
            let owner = slot.as_ref().map(|s| s.generation);
            if owner.is_none() || generation.is_some_and(|g| Some(g) != owner) {
                return;
            }
            let session = slot.take();
            self.transition(&mut state, SessionState::Disconnecting);
            session
        };
        let Some(session) = session else {
            return;
        };

        let Session { commands, control, events, worker, gate, .. } = session;
        drop(gate);

        if reason == DisconnectReason::Requested {
            self.say_goodbye(&commands);
        }
        control.close();
        events.close();
        worker.join();

        self.transition(&mut lock(&self.state), SessionState::Disconnected);
        tracing::info!(%reason, "disconnected");

        if let Some(e) = &error {
            self.observers.notify_error(e);
        }
        if self.observers.notify_disconnected(reason) == 0 {
            tracing::warn!(%reason, "session ended with no disconnect observer");
        }
    }

    /// Move the guarded state to `next` and wake waiters on `settled`.
    fn transition(&self, state: &mut SessionState, next: SessionState) {
        debug_assert!(
            state.can_transition_to(next),
            "illegal session transition {state} -> {next}"
        );
        tracing::debug!(from = %state, to = %next, "session state");
        *state = next;
        self.settled.notify_all();
    }

    fn say_goodbye(&self, commands: &CommandChannel) {
        let timeout = Some(self.config.disconnect_timeout);
        match commands.try_call_with_timeout(QUIT_COMMAND, timeout) {
            Some(Ok(reply)) if Reply::parse(reply.clone()) == Reply::Bye => {},
            Some(Ok(reply)) => {
                tracing::warn!(reply = %String::from_utf8_lossy(&reply), "unexpected quit reply");
            },
            Some(Err(e)) => tracing::warn!(error = %e, "quit failed"),
            None => tracing::warn!("control channel busy, skipping quit"),
        }
    }
}

/// Run the login sequence on `io`, each receive bounded by what is left of
/// the deadline. Returns the server version.
fn authenticate<T: MessageIo>(
    io: &mut T,
    descriptor: &ConnectionDescriptor,
    deadline: Instant,
) -> Result<String, ClientError> {
    let mut handshake =
        Handshake::new(descriptor.display.clone(), descriptor.login.clone(), &descriptor.secret);

    loop {
        io.set_timeout(Some(remaining(deadline)?))?;
        let message = io.receive().map_err(|e| match e {
            TransportError::Closed => ClientError::Protocol(format!(
                "server closed the connection in {:?}",
                handshake.state()
            )),
            other => other.into(),
        })?;

        for action in handshake.handle_message(&message.payload)? {
            match action {
                HandshakeAction::Send(response) => io.send(&Message::command(response))?,
                HandshakeAction::Complete { server_version } => return Ok(server_version),
            }
        }
    }
}

/// Ask the server for compressed framing and switch the channel over.
fn negotiate_framing<T: MessageIo>(io: &mut T, deadline: Instant) -> Result<(), ClientError> {
    io.set_timeout(Some(remaining(deadline)?))?;
    io.send(&Message::command(Bytes::from_static(SET_GZIP_COMMAND)))?;

    match Reply::parse(io.receive()?.payload) {
        Reply::Ack => {
            // Only replies are compressed; requests stay delimited
            io.set_inbound_mode(WireMode::Framed);
            tracing::debug!("control replies switched to compressed framing");
            Ok(())
        },
        Reply::Warning(reason) | Reply::Error(reason) => Err(ClientError::Rejected(reason)),
        other => Err(ClientError::Protocol(format!("unexpected reply to set_gzip: {other:?}"))),
    }
}

fn remaining(deadline: Instant) -> Result<Duration, ClientError> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() { Err(ClientError::Timeout) } else { Ok(left) }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
