//! Event channel receive loop.
//!
//! One worker thread per session reads `<name> <payload>` lines, decodes the
//! payload and dispatches to observers. Malformed lines are logged and
//! skipped; only the loss of the socket ends the loop.

use std::{
    cell::Cell,
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use daemonlink_proto::split_event_line;
use tokio::sync::oneshot;

use crate::{
    error::{ClientError, TransportError},
    observer::{DisconnectReason, Observers},
    payload::PayloadCodec,
    transport::MessageIo,
};

thread_local! {
    static EVENT_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// True on an event worker thread, observer callbacks included.
pub(crate) fn on_worker_thread() -> bool {
    EVENT_WORKER.with(Cell::get)
}

/// How the receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WorkerExit {
    pub reason: DisconnectReason,
    pub error: Option<ClientError>,
}

/// Handle to a running event worker.
#[derive(Debug)]
pub(crate) struct EventWorker {
    handle: Option<JoinHandle<()>>,
}

impl EventWorker {
    /// Start the worker.
    ///
    /// Nothing is read until `gate` fires, so no event reaches observers before
    /// the session is announced. If the gate is dropped instead, the worker
    /// exits without calling `on_exit`.
    pub(crate) fn spawn<T, F>(
        name: String,
        mut io: T,
        observers: Arc<Observers>,
        payloads: Arc<dyn PayloadCodec>,
        gate: oneshot::Receiver<()>,
        on_exit: F,
    ) -> io::Result<Self>
    where
        T: MessageIo + Send + 'static,
        F: FnOnce(WorkerExit) + Send + 'static,
    {
        let handle = thread::Builder::new().name(name).spawn(move || {
            EVENT_WORKER.with(|flag| flag.set(true));
            if gate.blocking_recv().is_err() {
                tracing::debug!("event worker cancelled before start");
                return;
            }
            let exit = receive_loop(&mut io, &observers, payloads.as_ref());
            tracing::debug!(reason = %exit.reason, "event worker stopped");
            on_exit(exit);
        })?;
        Ok(Self { handle: Some(handle) })
    }

    /// Wait for the worker to finish.
    ///
    /// Called from the worker itself (an observer disconnecting the client),
    /// this returns at once and the thread finishes on its own.
    pub(crate) fn join(mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("event worker panicked");
        }
    }
}

pub(crate) fn receive_loop<T: MessageIo>(
    io: &mut T,
    observers: &Observers,
    payloads: &dyn PayloadCodec,
) -> WorkerExit {
    loop {
        match io.receive() {
            Ok(message) => deliver(&message.payload, observers, payloads),
            Err(TransportError::Closed) => {
                return WorkerExit { reason: DisconnectReason::ServerClosed, error: None };
            },
            Err(e) => {
                return WorkerExit { reason: DisconnectReason::EventBroken, error: Some(e.into()) };
            },
        }
    }
}

fn deliver(line: &[u8], observers: &Observers, payloads: &dyn PayloadCodec) {
    let (name, raw) = match split_event_line(line) {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!(error = %e, len = line.len(), "skipping malformed event line");
            return;
        },
    };

    let value = match payloads.decode(raw) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(event = name, error = %e, "skipping undecodable event payload");
            return;
        },
    };

    let delivered = observers.dispatch_event(name, &value);
    tracing::debug!(event = name, delivered, "event dispatched");
}
