//! Blocking TCP transport.
//!
//! All socket I/O lives here. A [`Channel`] owns one TCP connection and moves
//! whole messages through a [`Codec`]; everything above it works against the
//! [`MessageIo`] trait so that it can run over an in-memory substitute.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bytes::BytesMut;
use daemonlink_proto::{Codec, Message, MessageKind, WireMode};

use crate::error::TransportError;

/// Bytes requested from the socket per read.
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Whole-message I/O over one connection.
///
/// Implemented by [`Channel`] for TCP. Tests substitute in-memory fakes.
pub trait MessageIo {
    /// Send one message.
    ///
    /// # Errors
    ///
    /// - `TransportError::Framing` if the codec rejects the payload; nothing
    ///   was written and the channel stays usable
    /// - any other variant closes the channel
    fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Block until one whole message arrives.
    ///
    /// # Errors
    ///
    /// - `TransportError::Closed` if the peer closed between messages
    /// - `TransportError::Framing` if the peer closed in the middle of a
    ///   message
    /// - `TransportError::Timeout` if the deadline passed, whether or not part
    ///   of a message had arrived
    fn receive(&mut self) -> Result<Message, TransportError>;

    /// Bound every later send and receive by a deadline `timeout` from now.
    /// `None` blocks forever.
    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Switch the encoding of received messages. Sent messages keep theirs.
    fn set_inbound_mode(&mut self, mode: WireMode);

    /// True once the channel closed itself or was closed
    fn is_closed(&self) -> bool;
}

/// One TCP connection plus its codecs.
///
/// Outbound and inbound encodings are tracked separately: the daemon
/// compresses its replies after `set_gzip` but keeps reading delimited
/// requests. Any I/O failure, timeouts included, marks the channel closed;
/// every later operation returns `TransportError::Closed`.
#[derive(Debug)]
pub struct Channel {
    stream: Arc<TcpStream>,
    peer: SocketAddr,
    encoder: Codec,
    decoder: Codec,
    kind: MessageKind,
    buf: BytesMut,
    deadline: Option<Instant>,
    closed: Arc<AtomicBool>,
}

impl Channel {
    /// Connect to `host:port`, trying every resolved address in turn.
    ///
    /// Both directions start with `codec`. Received messages are tagged with
    /// `kind`.
    ///
    /// # Errors
    ///
    /// - `TransportError::Timeout` if `timeout` passed before any address
    ///   accepted
    /// - `TransportError::Connect` if every address failed
    pub fn open(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        codec: Codec,
        kind: MessageKind,
    ) -> Result<Self, TransportError> {
        let display_addr = format!("{host}:{port}");
        let connect_error = |reason: String| TransportError::Connect {
            addr: display_addr.clone(),
            reason,
        };

        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_error(e.to_string()))?
            .collect();

        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut last_error = connect_error("no addresses resolved".to_string());

        for addr in addrs {
            let attempt = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(TransportError::Timeout);
                    }
                    TcpStream::connect_timeout(&addr, remaining)
                },
                None => TcpStream::connect(addr),
            };

            match attempt {
                Ok(stream) => return Self::from_stream(stream, codec, kind),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    tracing::debug!(%addr, "connect attempt timed out");
                    last_error = TransportError::Timeout;
                },
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "connect attempt failed");
                    last_error = connect_error(e.to_string());
                },
            }
        }

        Err(last_error)
    }

    /// Wrap an already connected stream.
    pub fn from_stream(
        stream: TcpStream,
        codec: Codec,
        kind: MessageKind,
    ) -> Result<Self, TransportError> {
        let peer = stream.peer_addr().map_err(|e| TransportError::from_io(&e))?;
        stream.set_nodelay(true).map_err(|e| TransportError::from_io(&e))?;
        tracing::debug!(%peer, mode = ?codec.mode(), "channel open");

        Ok(Self {
            stream: Arc::new(stream),
            peer,
            encoder: codec.clone(),
            decoder: codec,
            kind,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            deadline: None,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Remote address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Encoding of received messages
    pub fn inbound_mode(&self) -> WireMode {
        self.decoder.mode()
    }

    /// Encoding of sent messages
    pub fn outbound_mode(&self) -> WireMode {
        self.encoder.mode()
    }

    /// Handle that closes this channel from another thread.
    ///
    /// Closing shuts the socket down, which wakes a blocked `receive`.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle { stream: Arc::clone(&self.stream), closed: Arc::clone(&self.closed) }
    }

    /// Close the socket. Idempotent.
    pub fn close(&self) {
        self.close_handle().close();
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    /// Time left before the deadline. `Ok(None)` without a deadline.
    fn remaining(&self) -> Result<Option<Duration>, TransportError> {
        let Some(deadline) = self.deadline else {
            return Ok(None);
        };
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() { Err(TransportError::Timeout) } else { Ok(Some(left)) }
    }

    fn fail(&self, error: TransportError) -> TransportError {
        tracing::debug!(peer = %self.peer, %error, "channel failed");
        self.close();
        error
    }
}

impl MessageIo for Channel {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.ensure_open()?;

        let mut out = BytesMut::with_capacity(message.len() + 8);
        self.encoder.encode(&message.payload, &mut out)?;

        if let Some(left) = self.remaining().map_err(|e| self.fail(e))? {
            self.stream
                .set_write_timeout(Some(left))
                .map_err(|e| self.fail(TransportError::from_io(&e)))?;
        }
        (&*self.stream).write_all(&out).map_err(|e| self.fail(TransportError::from_io(&e)))?;
        tracing::debug!(kind = ?message.kind, len = message.len(), "sent");
        Ok(())
    }

    fn receive(&mut self) -> Result<Message, TransportError> {
        self.ensure_open()?;

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.decoder.decode(&mut self.buf) {
                Ok(Some(payload)) => {
                    tracing::debug!(kind = ?self.kind, len = payload.len(), "received");
                    return Ok(Message::new(self.kind, payload));
                },
                Ok(None) => {},
                Err(e) => return Err(self.fail(e.into())),
            }

            // Re-armed before every read so that a peer trickling bytes
            // cannot stretch the deadline
            if let Some(left) = self.remaining().map_err(|e| self.fail(e))? {
                self.stream
                    .set_read_timeout(Some(left))
                    .map_err(|e| self.fail(TransportError::from_io(&e)))?;
            }

            match (&*self.stream).read(&mut chunk) {
                Ok(0) if self.buf.is_empty() => return Err(self.fail(TransportError::Closed)),
                Ok(0) => {
                    let partial = self.decoder.incomplete(&self.buf);
                    return Err(self.fail(partial.into()));
                },
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    // A local close surfaces as a read error on some platforms
                    let error = if self.closed.load(Ordering::Acquire) {
                        TransportError::Closed
                    } else {
                        TransportError::from_io(&e)
                    };
                    return Err(self.fail(error));
                },
            }
        }
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        if self.deadline.is_none() {
            self.stream.set_read_timeout(None).map_err(|e| TransportError::from_io(&e))?;
            self.stream.set_write_timeout(None).map_err(|e| TransportError::from_io(&e))?;
        }
        Ok(())
    }

    fn set_inbound_mode(&mut self, mode: WireMode) {
        tracing::debug!(peer = %self.peer, ?mode, "inbound wire mode switched");
        self.decoder.set_mode(mode);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Closes a [`Channel`] owned by another thread.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    stream: Arc<TcpStream>,
    closed: Arc<AtomicBool>,
}

impl CloseHandle {
    /// Mark the channel closed and shut its socket down. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    /// True once the channel is closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use daemonlink_proto::wire::{CONTROL_TERMINATOR, EVENT_TERMINATOR};

    use super::*;

    fn pair(codec: Codec) -> (Channel, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let timeout = Some(Duration::from_secs(5));
        let channel =
            Channel::open("127.0.0.1", port, timeout, codec, MessageKind::Reply).unwrap();
        let (server, _) = listener.accept().unwrap();
        (channel, server)
    }

    #[test]
    fn send_writes_terminated_message() {
        let (mut channel, mut server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        channel.send(&Message::command("status")).unwrap();

        let mut wire = [0u8; 7];
        server.read_exact(&mut wire).unwrap();
        assert_eq!(&wire, b"status\x04");
    }

    #[test]
    fn receive_reassembles_split_messages() {
        let (mut channel, mut server) = pair(Codec::delimited(EVENT_TERMINATOR));
        let writer = thread::spawn(move || {
            server.write_all(b"foo ").unwrap();
            thread::sleep(Duration::from_millis(20));
            server.write_all(b"42\nbar 1\n").unwrap();
            server
        });

        assert_eq!(channel.receive().unwrap().payload.as_ref(), b"foo 42");
        assert_eq!(channel.receive().unwrap().payload.as_ref(), b"bar 1");
        drop(writer.join().unwrap());
    }

    #[test]
    fn rejected_payload_leaves_channel_open() {
        let (mut channel, _server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        let err = channel.send(&Message::command(&b"bad\x04payload"[..])).unwrap_err();

        assert!(matches!(err, TransportError::Framing(_)));
        assert!(!channel.is_closed());
        channel.send(&Message::command("fine")).unwrap();
    }

    #[test]
    fn peer_close_between_messages_is_closed() {
        let (mut channel, server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        drop(server);

        assert_eq!(channel.receive().unwrap_err(), TransportError::Closed);
        assert!(channel.is_closed());
        assert_eq!(channel.send(&Message::command("x")).unwrap_err(), TransportError::Closed);
    }

    #[test]
    fn peer_close_mid_message_is_framing_error() {
        let (mut channel, mut server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        server.write_all(b"half a mess").unwrap();
        drop(server);

        assert!(matches!(channel.receive().unwrap_err(), TransportError::Framing(_)));
        assert!(channel.is_closed());
    }

    #[test]
    fn read_deadline_is_timeout_and_closes() {
        let (mut channel, _server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        channel.set_timeout(Some(Duration::from_millis(50))).unwrap();

        let started = Instant::now();
        assert_eq!(channel.receive().unwrap_err(), TransportError::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(channel.is_closed());
    }

    #[test]
    fn deadline_with_partial_frame_is_timeout() {
        let (mut channel, mut server) = pair(Codec::framed());
        server.write_all(&[0, 0, 0, 9, 1, 2]).unwrap();
        channel.set_timeout(Some(Duration::from_millis(50))).unwrap();

        assert_eq!(channel.receive().unwrap_err(), TransportError::Timeout);
        assert!(channel.is_closed());
    }

    #[test]
    fn trickling_peer_cannot_stretch_the_deadline() {
        let (mut channel, mut server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        let trickler = thread::spawn(move || {
            while server.write_all(b"d").is_ok() {
                thread::sleep(Duration::from_millis(10));
            }
        });
        channel.set_timeout(Some(Duration::from_millis(100))).unwrap();

        let started = Instant::now();
        assert_eq!(channel.receive().unwrap_err(), TransportError::Timeout);
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_millis(300), "deadline overrun: {elapsed:?}");
        assert!(channel.is_closed());

        drop(channel);
        trickler.join().unwrap();
    }

    #[test]
    fn clearing_the_deadline_blocks_again() {
        let (mut channel, mut server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        channel.set_timeout(Some(Duration::from_millis(20))).unwrap();
        channel.set_timeout(None).unwrap();

        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            server.write_all(b"late\x04").unwrap();
            server
        });
        assert_eq!(channel.receive().unwrap().payload.as_ref(), b"late");
        drop(writer.join().unwrap());
    }

    #[test]
    fn inbound_mode_switch_leaves_requests_delimited() {
        let (mut channel, mut server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        channel.set_inbound_mode(WireMode::Framed);
        assert_eq!(channel.inbound_mode(), WireMode::Framed);
        assert_eq!(channel.outbound_mode(), Codec::delimited(CONTROL_TERMINATOR).mode());

        channel.send(&Message::command("get_version")).unwrap();
        let mut wire = [0u8; 12];
        server.read_exact(&mut wire).unwrap();
        assert_eq!(&wire, b"get_version\x04");

        let mut reply = Vec::new();
        Codec::framed().encode(b"nicosd version: 2.4.1\n", &mut reply).unwrap();
        server.write_all(&reply).unwrap();
        assert_eq!(channel.receive().unwrap().payload.as_ref(), b"nicosd version: 2.4.1\n");
    }

    #[test]
    fn close_handle_wakes_blocked_receive() {
        let (mut channel, _server) = pair(Codec::delimited(CONTROL_TERMINATOR));
        let handle = channel.close_handle();

        let reader = thread::spawn(move || channel.receive());
        thread::sleep(Duration::from_millis(20));
        handle.close();

        assert_eq!(reader.join().unwrap().unwrap_err(), TransportError::Closed);
        assert!(handle.is_closed());
    }

    #[test]
    fn refused_port_is_connect_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = Channel::open(
            "127.0.0.1",
            port,
            Some(Duration::from_secs(1)),
            Codec::delimited(CONTROL_TERMINATOR),
            MessageKind::Reply,
        )
        .unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
