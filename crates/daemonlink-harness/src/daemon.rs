//! Loopback mock of the instrument-control daemon.
//!
//! One acceptor thread plus one thread per socket. The first connection is a
//! control connection; after a login is accepted, the next connection is taken
//! as that session's event connection.

use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use daemonlink_proto::{
    Codec, WireMode,
    wire::{
        ACK, BYE, CONTROL_TERMINATOR, DISPLAY_PROMPT, LOGIN_PROMPT, PASSWORD_PROMPT,
        QUIT_COMMAND, SET_GZIP_COMMAND, VERSION_COMMAND,
    },
};

use crate::config::{Acceptance, CommandReplies, MockConfig};

/// One control-channel message as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEntry {
    /// Message read from the client
    Received(Bytes),
    /// Message written to the client
    Sent(Bytes),
}

impl WireEntry {
    /// Payload regardless of direction
    pub fn payload(&self) -> &Bytes {
        match self {
            Self::Received(bytes) | Self::Sent(bytes) => bytes,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    open_control: usize,
    open_event: usize,
    event_connections: usize,
    pending_event_slots: usize,
}

struct Inner {
    config: MockConfig,
    log: Mutex<Vec<WireEntry>>,
    script: Mutex<VecDeque<Bytes>>,
    counters: Mutex<Counters>,
    changed: Condvar,
    controls: Mutex<Vec<TcpStream>>,
    event_stream: Mutex<Option<TcpStream>>,
    stopping: AtomicBool,
}

/// Scripted daemon listening on `127.0.0.1`.
///
/// Dropping the mock stops the acceptor and shuts every open socket down.
pub struct MockDaemon {
    addr: SocketAddr,
    inner: Arc<Inner>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockDaemon {
    /// Start a mock with the default configuration
    pub fn start() -> io::Result<Self> {
        Self::with_config(MockConfig::default())
    }

    /// Start a mock with `config`
    pub fn with_config(config: MockConfig) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;

        let script = match &config.replies {
            CommandReplies::Script(replies) => replies.iter().cloned().collect(),
            _ => VecDeque::new(),
        };

        let inner = Arc::new(Inner {
            config,
            log: Mutex::new(Vec::new()),
            script: Mutex::new(script),
            counters: Mutex::new(Counters::default()),
            changed: Condvar::new(),
            controls: Mutex::new(Vec::new()),
            event_stream: Mutex::new(None),
            stopping: AtomicBool::new(false),
        });

        let acceptor = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("mock-daemon-accept".to_string())
                .spawn(move || accept_loop(&inner, &listener))?
        };

        tracing::debug!(%addr, "mock daemon listening");
        Ok(Self { addr, inner, acceptor: Some(acceptor) })
    }

    /// Listening address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Listening port
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every control-channel message in wire order
    pub fn wire_log(&self) -> Vec<WireEntry> {
        lock(&self.inner.log).clone()
    }

    /// Control-channel messages received from clients, in order
    pub fn received(&self) -> Vec<Bytes> {
        lock(&self.inner.log)
            .iter()
            .filter_map(|entry| match entry {
                WireEntry::Received(bytes) => Some(bytes.clone()),
                WireEntry::Sent(_) => None,
            })
            .collect()
    }

    /// Write `line` plus the newline terminator on the current event socket
    pub fn push_event(&self, line: &[u8]) -> io::Result<()> {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line);
        framed.push(b'\n');
        self.push_raw_event(&framed)
    }

    /// Write raw bytes on the current event socket
    pub fn push_raw_event(&self, bytes: &[u8]) -> io::Result<()> {
        let mut guard = lock(&self.inner.event_stream);
        let stream = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no event connection"))?;
        stream.write_all(bytes)
    }

    /// Close the current event socket from the server side
    pub fn close_events(&self) {
        if let Some(stream) = lock(&self.inner.event_stream).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Close every control socket from the server side
    pub fn close_control(&self) {
        for stream in lock(&self.inner.controls).drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    /// Number of event connections accepted so far
    pub fn event_connections(&self) -> usize {
        lock(&self.inner.counters).event_connections
    }

    /// Number of sockets, of either kind, the client still holds open
    pub fn open_connections(&self) -> usize {
        let counters = lock(&self.inner.counters);
        counters.open_control + counters.open_event
    }

    /// Block until an event connection is open, or `timeout` passes
    pub fn wait_for_event_connection(&self, timeout: Duration) -> bool {
        self.inner.wait_until(timeout, |c| c.open_event > 0)
    }

    /// Block until the client closed every socket, or `timeout` passes
    pub fn wait_for_all_closed(&self, timeout: Duration) -> bool {
        self.inner.wait_until(timeout, |c| c.open_control == 0 && c.open_event == 0)
    }

    /// Block until `count` control messages were received, or `timeout` passes
    pub fn wait_for_received(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.received().len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for MockDaemon {
    fn drop(&mut self) {
        self.inner.stopping.store(true, Ordering::SeqCst);
        // Wake the blocking accept
        let _ = TcpStream::connect(self.addr);
        self.close_control();
        self.close_events();
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

impl Inner {
    fn wait_until(&self, timeout: Duration, done: impl Fn(&Counters) -> bool) -> bool {
        let guard = lock(&self.counters);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |c| !done(c))
            .unwrap_or_else(PoisonError::into_inner);
        done(&guard)
    }

    fn update(&self, f: impl FnOnce(&mut Counters)) {
        f(&mut lock(&self.counters));
        self.changed.notify_all();
    }

    fn record(&self, entry: WireEntry) {
        lock(&self.log).push(entry);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn accept_loop(inner: &Arc<Inner>, listener: &TcpListener) {
    for stream in listener.incoming() {
        if inner.stopping.load(Ordering::SeqCst) {
            break;
        }
        let Ok(stream) = stream else {
            continue;
        };

        let is_event = {
            let mut counters = lock(&inner.counters);
            if counters.pending_event_slots > 0 {
                counters.pending_event_slots -= 1;
                true
            } else {
                false
            }
        };

        let inner = Arc::clone(inner);
        let name = if is_event { "mock-daemon-event" } else { "mock-daemon-control" };
        let spawned = thread::Builder::new().name(name.to_string()).spawn(move || {
            if is_event {
                serve_events(&inner, stream);
            } else {
                serve_control(&inner, stream);
            }
        });
        if let Err(e) = spawned {
            tracing::warn!(error = %e, "mock daemon could not spawn connection thread");
        }
    }
}

fn serve_events(inner: &Inner, stream: TcpStream) {
    let Ok(writer) = stream.try_clone() else {
        return;
    };
    *lock(&inner.event_stream) = Some(writer);
    inner.update(|c| {
        c.open_event += 1;
        c.event_connections += 1;
    });
    tracing::debug!("mock event connection open");

    // Clients never write here; reading only detects the close
    let mut reader = stream;
    let mut sink = [0u8; 256];
    while matches!(reader.read(&mut sink), Ok(n) if n > 0) {}

    inner.update(|c| c.open_event -= 1);
    tracing::debug!("mock event connection closed");
}

fn serve_control(inner: &Inner, stream: TcpStream) {
    if let Ok(clone) = stream.try_clone() {
        lock(&inner.controls).push(clone);
    }
    inner.update(|c| c.open_control += 1);

    let mut conn = ControlConn::new(stream);
    let accepted = run_session(inner, &mut conn).unwrap_or(false);
    conn.hang_up();

    if accepted {
        // The daemon stops the event sender when its control handler ends
        if let Some(events) = lock(&inner.event_stream).take() {
            let _ = events.shutdown(Shutdown::Both);
        }
    }
    inner.update(|c| c.open_control -= 1);
    tracing::debug!(accepted, "mock control connection closed");
}

/// Returns whether the login was accepted.
fn run_session(inner: &Inner, conn: &mut ControlConn) -> io::Result<bool> {
    match inner.config.acceptance {
        Acceptance::Silent => {
            conn.drain()?;
            return Ok(false);
        },
        Acceptance::Trickle { interval } => {
            conn.trickle(interval)?;
            return Ok(false);
        },
        _ => {},
    }

    for prompt in [DISPLAY_PROMPT, LOGIN_PROMPT, PASSWORD_PROMPT] {
        conn.send(inner, prompt)?;
        if conn.receive(inner)?.is_none() {
            return Ok(false);
        }
    }

    match inner.config.acceptance {
        Acceptance::Accept => {
            inner.update(|c| c.pending_event_slots += 1);
            conn.send(inner, ACK)?;
        },
        Acceptance::InvalidCredentials => {
            conn.send(inner, b"NICOSD WARNING: Invalid login\n")?;
            return Ok(false);
        },
        Acceptance::VersionMismatch => {
            conn.send(inner, b"NICOSD ERROR: version mismatch\n")?;
            return Ok(false);
        },
        Acceptance::Silent | Acceptance::Trickle { .. } => return Ok(false),
    }

    while let Some(command) = conn.receive(inner)? {
        match command.as_ref() {
            VERSION_COMMAND => {
                let banner = format!(
                    "nicosd version: {} (mockd), supports protocol {}\n",
                    inner.config.server_version, inner.config.protocol
                );
                conn.send(inner, banner.as_bytes())?;
            },
            SET_GZIP_COMMAND => {
                // The ack goes out uncompressed; requests stay delimited
                conn.send(inner, ACK)?;
                conn.writer.set_mode(WireMode::Framed);
            },
            QUIT_COMMAND if inner.config.ignore_exit => {
                conn.drain()?;
                break;
            },
            QUIT_COMMAND => {
                conn.send(inner, BYE)?;
                break;
            },
            _ => reply(inner, conn, &command)?,
        }
    }
    Ok(true)
}

fn reply(inner: &Inner, conn: &mut ControlConn, command: &Bytes) -> io::Result<()> {
    match &inner.config.replies {
        CommandReplies::Echo { latency } => {
            if !latency.is_zero() {
                thread::sleep(*latency);
            }
            conn.send(inner, command)
        },
        CommandReplies::Ack => conn.send(inner, ACK),
        CommandReplies::Script(_) => {
            let next = lock(&inner.script).pop_front();
            match next {
                Some(reply) => conn.send(inner, &reply),
                None => conn.send(inner, ACK),
            }
        },
        CommandReplies::Silent => Ok(()),
        CommandReplies::Trickle { interval } => conn.trickle(*interval),
    }
}

struct ControlConn {
    stream: TcpStream,
    reader: Codec,
    writer: Codec,
    buf: BytesMut,
}

impl ControlConn {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            reader: Codec::delimited(CONTROL_TERMINATOR),
            writer: Codec::delimited(CONTROL_TERMINATOR),
            buf: BytesMut::with_capacity(1024),
        }
    }

    fn send(&mut self, inner: &Inner, payload: &[u8]) -> io::Result<()> {
        let mut out = Vec::with_capacity(payload.len() + 8);
        self.writer.encode(payload, &mut out).map_err(io::Error::other)?;
        inner.record(WireEntry::Sent(Bytes::copy_from_slice(payload)));
        self.stream.write_all(&out)
    }

    /// `None` once the client closed the socket.
    fn receive(&mut self, inner: &Inner) -> io::Result<Option<Bytes>> {
        loop {
            if let Some(message) = self.reader.decode(&mut self.buf).map_err(io::Error::other)? {
                inner.record(WireEntry::Received(message.clone()));
                return Ok(Some(message));
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Write one byte per `interval` until the client hangs up.
    fn trickle(&mut self, interval: Duration) -> io::Result<()> {
        loop {
            self.stream.write_all(b".")?;
            thread::sleep(interval);
        }
    }

    fn drain(&mut self) -> io::Result<()> {
        let mut sink = [0u8; 256];
        while self.stream.read(&mut sink)? > 0 {}
        Ok(())
    }

    fn hang_up(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
