//! Scripted actions and the byte sinks used to write them.
//!
//! A script is an ordered queue of [Action]s. Writes to the expected and
//! response streams append to the tail action when it has the same kind and
//! open a new action otherwise, so the interleaving of the two streams is
//! preserved exactly as written.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::Arc;

use crate::server::state::Shared;

/// Direction of a scripted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    /// Bytes the server must receive from the peer.
    Expected,
    /// Bytes the server sends to the peer.
    Response,
}

/// One contiguous run of scripted bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Action {
    pub(crate) kind: ActionKind,
    pub(crate) payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct ActionQueue {
    actions: VecDeque<Action>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` to the tail action if it has the same kind, otherwise opens a new action.
    /// Empty writes create nothing.
    pub fn push(&mut self, kind: ActionKind, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        match self.actions.back_mut() {
            Some(tail) if tail.kind == kind => tail.payload.extend_from_slice(bytes),
            _ => self.actions.push_back(Action {
                kind,
                payload: bytes.to_vec(),
            }),
        }
    }

    pub fn front_kind(&self) -> Option<ActionKind> {
        self.actions.front().map(|action| action.kind)
    }

    pub fn pop_front(&mut self) -> Option<Action> {
        self.actions.pop_front()
    }

    /// Removes the head action only if it is of the given kind.
    pub fn pop_if(&mut self, kind: ActionKind) -> Option<Action> {
        if self.front_kind() == Some(kind) {
            self.actions.pop_front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Write handle for one side of the script.
///
/// Obtained from [MockServer::expected](crate::MockServer::expected) or
/// [MockServer::response](crate::MockServer::response). Handles are cheap to
/// clone and may be moved to other threads.
///
/// ```no_run
/// use std::io::Write;
///
/// let server = mockwire::MockServer::bind(0).unwrap();
///
/// write!(server.expected(), "PING\r\n").unwrap();
/// server.response().send(b"PONG\r\n");
/// ```
#[derive(Clone)]
pub struct ScriptStream {
    shared: Arc<Shared>,
    kind: ActionKind,
}

impl ScriptStream {
    pub(crate) fn new(shared: Arc<Shared>, kind: ActionKind) -> Self {
        Self { shared, kind }
    }

    /// The kind of action this stream appends to.
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Appends `bytes` to the script. Never fails; mismatches surface at verification.
    pub fn send(&self, bytes: impl AsRef<[u8]>) {
        self.shared.push_action(self.kind, bytes.as_ref());
    }
}

impl io::Write for ScriptStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ScriptStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptStream").field("kind", &self.kind).finish()
    }
}
