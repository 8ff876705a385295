//! Synchronous request/reply exchange on the control channel.
//!
//! One lock spans "write request, read reply", so at most one request is in
//! flight and every caller gets the reply to its own request.

use std::{
    sync::{
        Mutex, MutexGuard, PoisonError, TryLockError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use daemonlink_proto::{Message, Reply};

use crate::{
    error::{ClientError, TransportError},
    transport::{Channel, MessageIo},
};

/// Serializes concurrent callers over one [`MessageIo`].
///
/// Once an exchange fails in a way that closes the underlying channel the
/// command channel is broken for good; [`CommandChannel::is_broken`] reports
/// it without waiting for the lock.
#[derive(Debug)]
pub struct CommandChannel<T = Channel> {
    io: Mutex<T>,
    default_timeout: Option<Duration>,
    broken: AtomicBool,
}

impl<T: MessageIo> CommandChannel<T> {
    /// Wrap `io`; `default_timeout` bounds every call that does not pass its
    /// own deadline
    pub fn new(io: T, default_timeout: Option<Duration>) -> Self {
        Self { io: Mutex::new(io), default_timeout, broken: AtomicBool::new(false) }
    }

    /// Send `request` and return the raw reply.
    ///
    /// # Errors
    ///
    /// - `ClientError::Closed` if the channel was already closed
    /// - `ClientError::Protocol` if the request cannot be framed (the channel
    ///   stays usable) or the reply violates framing (the channel breaks)
    /// - `ClientError::Timeout` if no reply arrived in time (the channel breaks)
    /// - `ClientError::Disconnected` if the socket failed mid-exchange
    pub fn call(&self, request: &[u8]) -> Result<Bytes, ClientError> {
        self.call_with_timeout(request, self.default_timeout)
    }

    /// [`CommandChannel::call`] with an explicit deadline
    pub fn call_with_timeout(
        &self,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Bytes, ClientError> {
        let mut io = self.lock();
        self.exchange(&mut io, request, timeout)
    }

    /// Like [`CommandChannel::call_with_timeout`] but gives up immediately,
    /// returning `None`, if another call holds the channel.
    pub fn try_call_with_timeout(
        &self,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Option<Result<Bytes, ClientError>> {
        let mut io = match self.io.try_lock() {
            Ok(io) => io,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(self.exchange(&mut io, request, timeout))
    }

    /// Send every request in order, each expecting a positive acknowledgement.
    ///
    /// The lock is held for the whole batch, so no other caller's request is
    /// interleaved. The first negative acknowledgement aborts the rest of the
    /// batch.
    ///
    /// # Errors
    ///
    /// - `ClientError::Rejected` with the server's message on the first
    ///   warning or error reply
    /// - `ClientError::Protocol` if a reply is neither acknowledgement nor
    ///   rejection
    /// - any error of [`CommandChannel::call`]
    pub fn call_all<I, R>(&self, requests: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let mut io = self.lock();
        for (index, request) in requests.into_iter().enumerate() {
            let reply = self.exchange(&mut io, request.as_ref(), self.default_timeout)?;
            match Reply::parse(reply) {
                Reply::Ack => {},
                Reply::Warning(reason) | Reply::Error(reason) => {
                    tracing::debug!(index, %reason, "batch aborted by rejection");
                    return Err(ClientError::Rejected(reason));
                },
                other => {
                    return Err(ClientError::Protocol(format!(
                        "request {index} of batch: expected acknowledgement, got {other:?}"
                    )));
                },
            }
        }
        Ok(())
    }

    /// True once a failed exchange closed the underlying channel
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.io.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exchange(
        &self,
        io: &mut T,
        request: &[u8],
        timeout: Option<Duration>,
    ) -> Result<Bytes, ClientError> {
        if io.is_closed() {
            return Err(ClientError::Closed);
        }

        let result = round_trip(io, request, timeout);
        if result.is_err() && io.is_closed() {
            self.broken.store(true, Ordering::Release);
        }
        result
    }
}

fn round_trip<T: MessageIo>(
    io: &mut T,
    request: &[u8],
    timeout: Option<Duration>,
) -> Result<Bytes, ClientError> {
    io.set_timeout(timeout).map_err(classify)?;
    io.send(&Message::command(Bytes::copy_from_slice(request))).map_err(classify)?;
    let reply = io.receive().map_err(classify)?;
    Ok(reply.payload)
}

fn classify(error: TransportError) -> ClientError {
    match error {
        TransportError::Timeout => ClientError::Timeout,
        TransportError::Framing(e) => ClientError::Protocol(e.to_string()),
        other => ClientError::Disconnected(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{collections::VecDeque, sync::Arc, thread};

    use daemonlink_proto::{ProtocolError, WireMode, wire::CONTROL_TERMINATOR};

    use super::*;

    /// In-memory peer. Replies are queued up front; an `Err` entry fails the
    /// receive and closes the fake, as would a real socket.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedIo {
        pub sent: Vec<Bytes>,
        pub replies: VecDeque<Result<Bytes, TransportError>>,
        pub closed: bool,
        pub mode: Option<WireMode>,
    }

    impl ScriptedIo {
        pub(crate) fn with_replies(replies: &[&'static [u8]]) -> Self {
            Self {
                replies: replies.iter().map(|r| Ok(Bytes::from_static(*r))).collect(),
                ..Self::default()
            }
        }
    }

    impl MessageIo for ScriptedIo {
        fn send(&mut self, message: &Message) -> Result<(), TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            if message.payload.contains(&CONTROL_TERMINATOR) {
                return Err(TransportError::Framing(ProtocolError::TerminatorInPayload {
                    terminator: CONTROL_TERMINATOR,
                    position: 0,
                }));
            }
            self.sent.push(message.payload.clone());
            Ok(())
        }

        fn receive(&mut self) -> Result<Message, TransportError> {
            if self.closed {
                return Err(TransportError::Closed);
            }
            match self.replies.pop_front() {
                Some(Ok(payload)) => Ok(Message::reply(payload)),
                Some(Err(e)) => {
                    self.closed = true;
                    Err(e)
                },
                None => {
                    self.closed = true;
                    Err(TransportError::Closed)
                },
            }
        }

        fn set_timeout(&mut self, _timeout: Option<Duration>) -> Result<(), TransportError> {
            Ok(())
        }

        fn set_inbound_mode(&mut self, mode: WireMode) {
            self.mode = Some(mode);
        }

        fn is_closed(&self) -> bool {
            self.closed
        }
    }

    #[test]
    fn call_returns_reply() {
        let channel = CommandChannel::new(ScriptedIo::with_replies(&[b"NICOSD OK\n"]), None);
        assert_eq!(channel.call(b"start").unwrap().as_ref(), b"NICOSD OK\n");
        assert!(!channel.is_broken());
    }

    #[test]
    fn unframeable_request_does_not_break_channel() {
        let channel = CommandChannel::new(ScriptedIo::with_replies(&[b"ok"]), None);
        let err = channel.call(b"bad\x04").unwrap_err();

        assert!(matches!(err, ClientError::Protocol(_)));
        assert!(!channel.is_broken());
        assert_eq!(channel.call(b"good").unwrap().as_ref(), b"ok");
    }

    #[test]
    fn lost_peer_is_disconnected_and_breaks() {
        let channel = CommandChannel::new(ScriptedIo::default(), None);
        let err = channel.call(b"status").unwrap_err();

        assert!(matches!(err, ClientError::Disconnected(_)));
        assert!(channel.is_broken());
        assert_eq!(channel.call(b"status").unwrap_err(), ClientError::Closed);
    }

    #[test]
    fn timeout_breaks_channel() {
        let mut io = ScriptedIo::default();
        io.replies.push_back(Err(TransportError::Timeout));
        let channel = CommandChannel::new(io, Some(Duration::from_millis(10)));

        assert_eq!(channel.call(b"status").unwrap_err(), ClientError::Timeout);
        assert!(channel.is_broken());
    }

    #[test]
    fn batch_stops_at_first_rejection() {
        let io = ScriptedIo::with_replies(&[
            b"NICOSD OK\n",
            b"NICOSD WARNING: a script is running\n",
            b"NICOSD OK\n",
        ]);
        let channel = CommandChannel::new(io, None);

        let err = channel.call_all(["a", "b", "c"]).unwrap_err();
        assert_eq!(err, ClientError::Rejected("a script is running".to_string()));

        let io = channel.io.into_inner().unwrap();
        assert_eq!(io.sent, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert_eq!(io.replies.len(), 1);
    }

    #[test]
    fn batch_rejects_data_reply() {
        let channel = CommandChannel::new(ScriptedIo::with_replies(&[b"42"]), None);
        assert!(matches!(channel.call_all(["a"]).unwrap_err(), ClientError::Protocol(_)));
    }

    #[test]
    fn empty_batch_sends_nothing() {
        let channel = CommandChannel::new(ScriptedIo::default(), None);
        channel.call_all(Vec::<&[u8]>::new()).unwrap();
        assert!(channel.io.into_inner().unwrap().sent.is_empty());
    }

    #[test]
    fn try_call_skips_busy_channel() {
        let channel = CommandChannel::new(ScriptedIo::with_replies(&[b"x"]), None);
        let guard = channel.lock();
        assert!(channel.try_call_with_timeout(b"exit", None).is_none());
        drop(guard);
        assert!(channel.try_call_with_timeout(b"exit", None).is_some());
    }

    #[test]
    fn concurrent_callers_each_get_a_reply() {
        let io = ScriptedIo::with_replies(&[&b"r"[..]; 16]);
        let channel = Arc::new(CommandChannel::new(io, None));

        let callers: Vec<_> = (0..16)
            .map(|i| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || channel.call(format!("req-{i}").as_bytes()))
            })
            .collect();
        for caller in callers {
            assert!(caller.join().unwrap().is_ok());
        }

        let channel = Arc::into_inner(channel).unwrap();
        assert_eq!(channel.io.into_inner().unwrap().sent.len(), 16);
    }
}
