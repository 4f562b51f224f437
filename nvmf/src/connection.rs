// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-queue connection state.

use crate::session::Session;
use crate::transport::Transport;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::Ordering;

/// Queue class of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QueueType {
    /// The admin queue (fabrics queue ID 0).
    Admin,
    /// An I/O queue.
    Io,
}

/// One fabrics queue connection.
///
/// Created by the transport when a queue is accepted and pinned to a single
/// poller for its lifetime. The session reference is null until a Connect
/// command succeeds and never changes again afterwards.
pub struct Connection {
    transport: Arc<dyn Transport>,
    queue_type: QueueType,
    sq_depth: u16,
    sq_head: AtomicU16,
    session: Mutex<Option<Arc<Session>>>,
}

impl Connection {
    /// Creates a connection over `transport` with a submission queue of
    /// `sq_depth` entries.
    pub fn new(transport: Arc<dyn Transport>, queue_type: QueueType, sq_depth: u16) -> Arc<Self> {
        Arc::new(Self {
            transport,
            queue_type,
            sq_depth: sq_depth.max(1),
            sq_head: AtomicU16::new(0),
            session: Mutex::new(None),
        })
    }

    /// The connection's queue class.
    pub fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    /// The session this connection is bound to, if Connect has completed.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    /// Binds the connection to its session. Called exactly once, from the
    /// Connect hand-off on the session's poller.
    pub(crate) fn bind_session(&self, session: Arc<Session>) {
        let prev = self.session.lock().replace(session);
        debug_assert!(prev.is_none(), "connection already bound to a session");
    }

    /// The current submission queue head, reported in every completion.
    pub fn sq_head(&self) -> u16 {
        self.sq_head.load(Ordering::Relaxed)
    }

    /// Advances the submission queue head past one consumed entry, wrapping
    /// at the queue depth. Called by the transport as it ingests capsules.
    pub fn advance_sq_head(&self) {
        let head = self.sq_head.load(Ordering::Relaxed);
        let next = if head + 1 == self.sq_depth { 0 } else { head + 1 };
        self.sq_head.store(next, Ordering::Relaxed);
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    struct NullTransport;

    impl Transport for NullTransport {
        fn complete(&self, _req: crate::Request) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn sq_head_wraps_at_depth() {
        let conn = Connection::new(Arc::new(NullTransport), QueueType::Admin, 4);
        assert_eq!(conn.sq_head(), 0);
        for _ in 0..4 {
            conn.advance_sq_head();
        }
        assert_eq!(conn.sq_head(), 0);
        conn.advance_sq_head();
        assert_eq!(conn.sq_head(), 1);
    }
}
