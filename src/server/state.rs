//! State shared between the scripting caller, the reader loop and the matcher.

use std::collections::VecDeque;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, trace};

use crate::errors::Error;
use crate::script::{ActionKind, ActionQueue};

/// Termination notices sent by the background threads to the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    ReaderStopped,
    MatcherStopped,
}

/// An expected action being matched against received bytes.
#[derive(Debug)]
pub(crate) struct Expectation {
    payload: Vec<u8>,
    position: usize,
}

impl Expectation {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload, position: 0 }
    }

    pub fn peek(&self) -> Option<u8> {
        self.payload.get(self.position).copied()
    }

    pub fn advance(&mut self) {
        self.position += 1;
    }

    pub fn remaining(&self) -> &[u8] {
        &self.payload[self.position..]
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.payload.len()
    }
}

#[derive(Debug)]
pub(crate) struct State {
    pub actions: ActionQueue,
    // bytes read from the peer, not yet compared
    pub received: VecDeque<u8>,
    pub current: Option<Expectation>,
    // position within the flat stream of expected bytes
    pub offset: usize,
    pub failure: Option<Error>,
    pub reader_active: bool,
}

impl State {
    fn new() -> Self {
        Self {
            actions: ActionQueue::new(),
            received: VecDeque::new(),
            current: None,
            offset: 0,
            failure: None,
            reader_active: true,
        }
    }

    /// Compares buffered bytes against queued expectations until the buffer runs dry,
    /// the queue head stops being an expectation, or a byte differs.
    pub fn match_received(&mut self) -> Result<(), Error> {
        while !self.received.is_empty() {
            if self.current.as_ref().map_or(true, Expectation::is_finished) {
                match self.actions.pop_if(ActionKind::Expected) {
                    Some(action) => {
                        trace!("matching expectation of {} byte(s)", action.payload.len());
                        self.current = Some(Expectation::new(action.payload));
                    }
                    None => return Ok(()),
                }
            }

            let Some(expectation) = self.current.as_mut() else {
                return Ok(());
            };

            while let Some(expected) = expectation.peek() {
                let Some(actual) = self.received.pop_front() else {
                    break;
                };

                if actual != expected {
                    return Err(Error::Mismatch {
                        offset: self.offset,
                        expected,
                        actual,
                    });
                }

                expectation.advance();
                self.offset += 1;
            }
        }

        Ok(())
    }

    pub fn is_script_consumed(&self) -> bool {
        self.actions.is_empty() && self.current.as_ref().map_or(true, Expectation::is_finished)
    }

    /// Checks that nothing was left over once both background loops have stopped.
    pub fn check_consumed(&mut self) -> Result<(), Error> {
        if !self.received.is_empty() {
            return Err(Error::UnexpectedBytes(self.received.drain(..).collect()));
        }

        if let Some(expectation) = self.current.as_ref().filter(|expectation| !expectation.is_finished()) {
            return Err(Error::UnfinishedExpectation(expectation.remaining().to_vec()));
        }

        if !self.actions.is_empty() {
            return Err(Error::PendingActions(self.actions.len()));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    stopping: AtomicBool,
    connection: Mutex<Option<Arc<TcpStream>>>,
}

impl Shared {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            wake: Condvar::new(),
            stopping: AtomicBool::new(false),
            connection: Mutex::new(None),
        }
    }

    // Background threads never panic while holding the lock, so a poisoned
    // guard still holds consistent data.
    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait<'a>(&self, guard: MutexGuard<'a, State>, timeout: Duration) -> MutexGuard<'a, State> {
        match self.wake.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// Wakes the matcher. Taking the lock first means a matcher between its
    /// checks and its wait cannot miss the notification.
    pub fn notify(&self) {
        let _state = self.lock();
        self.wake.notify_all();
    }

    pub fn push_action(&self, kind: ActionKind, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let mut state = self.lock();
        state.actions.push(kind, bytes);
        self.wake.notify_all();
    }

    pub fn push_received(&self, bytes: &[u8]) {
        let mut state = self.lock();
        state.received.extend(bytes);
        self.wake.notify_all();
    }

    pub fn reader_stopped(&self) {
        let mut state = self.lock();
        state.reader_active = false;
        self.wake.notify_all();
    }

    /// Keeps the first failure; later ones are only logged.
    pub fn record_failure(&self, failure: Error) {
        {
            let mut state = self.lock();
            if state.failure.is_none() {
                error!("mock server failure: {failure}");
                state.failure = Some(failure);
            } else {
                debug!("suppressing subsequent failure: {failure}");
            }
        }
        self.request_stop();
    }

    pub fn request_stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            debug!("stop requested");
        }
        self.notify();
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    fn connection_guard(&self) -> MutexGuard<'_, Option<Arc<TcpStream>>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_connection(&self, stream: Arc<TcpStream>) {
        *self.connection_guard() = Some(stream);
        self.notify();
    }

    pub fn connection(&self) -> Option<Arc<TcpStream>> {
        self.connection_guard().clone()
    }

    pub fn has_connection(&self) -> bool {
        self.connection_guard().is_some()
    }

    /// Shuts down one or both directions; errors mean the peer already closed and are ignored.
    pub fn shutdown_connection(&self, how: Shutdown) {
        if let Some(stream) = self.connection_guard().as_ref() {
            if let Err(err) = stream.shutdown(how) {
                debug!("shutdown({how:?}) ignored: {err}");
            }
        }
    }

    /// Closes the connection and forgets it. Other holders of the stream see their calls fail.
    pub fn close_connection(&self) {
        let stream = self.connection_guard().take();
        if let Some(stream) = stream {
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                debug!("close ignored: {err}");
            }
            debug!("connection closed");
        }
    }
}
