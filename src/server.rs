//! The mock server and the shutdown/verification protocol.

use std::fmt;
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::errors::Error;
use crate::recorder::SessionRecorder;
use crate::script::{ActionKind, ScriptStream};

use listener::ReaderOptions;
use state::{Shared, Signal};

mod listener;
mod matcher;
pub(crate) mod state;

/// Default period for read polls and shutdown re-signalling.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Default time pending responses get to flush once shutdown begins.
pub const DEFAULT_LINGER: Duration = Duration::from_secs(1);
const DEFAULT_HOST: &str = "127.0.0.1";

/// A scripted mock server for exactly one TCP connection.
///
/// The server binds on construction and accepts the first peer that
/// connects. Bytes written to [expected](MockServer::expected) must arrive
/// from the peer in order; bytes written to [response](MockServer::response)
/// are sent once every expectation scripted before them has been met.
///
/// ```no_run
/// use std::io::{Read, Write};
/// use std::net::TcpStream;
///
/// let server = mockwire::MockServer::bind(0).unwrap();
/// server.expected().send(b"GET / HTTP/1.1\r\n");
/// server.response().send(b"HTTP/1.1 200 OK\r\n");
///
/// let mut peer = TcpStream::connect(server.local_addr()).unwrap();
/// peer.write_all(b"GET / HTTP/1.1\r\n").unwrap();
/// let mut reply = [0; 17];
/// peer.read_exact(&mut reply).unwrap();
///
/// server.verify().unwrap();
/// ```
pub struct MockServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    signals: Receiver<Signal>,
    stopped: Vec<Signal>,
    handles: Vec<JoinHandle<()>>,
    poll_interval: Duration,
    linger: Duration,
}

impl MockServer {
    /// Binds 127.0.0.1 on the given port (0 picks a free port) and starts listening.
    pub fn bind(port: u16) -> Result<MockServer, Error> {
        MockServerBuilder::new().port(port).bind()
    }

    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stream of bytes the server must receive.
    pub fn expected(&self) -> ScriptStream {
        ScriptStream::new(Arc::clone(&self.shared), ActionKind::Expected)
    }

    /// Stream of bytes the server sends back.
    pub fn response(&self) -> ScriptStream {
        ScriptStream::new(Arc::clone(&self.shared), ActionKind::Response)
    }

    /// True once a peer has connected, until shutdown.
    pub fn is_connected(&self) -> bool {
        self.shared.has_connection() && !self.shared.is_stopping()
    }

    /// True if no peer has connected yet or the connection has been closed.
    pub fn is_closed(&self) -> bool {
        !self.shared.has_connection()
    }

    /// Blocks until every scripted action has been consumed (responses dequeued
    /// for sending, expectations fully matched), a failure is captured, or
    /// `timeout` elapses. Returns true only in the first case.
    ///
    /// The last response may still be in flight when this returns; `verify`
    /// waits for it.
    pub fn wait_for_script(&self, timeout: Duration) -> bool {
        // a timeout too large to represent never expires
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.shared.lock();

        loop {
            if state.failure.is_some() {
                return false;
            }
            if state.is_script_consumed() {
                return true;
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    (deadline - now).min(self.poll_interval)
                }
                None => self.poll_interval,
            };
            state = self.shared.wait(state, wait);
        }
    }

    /// Stops the server and checks the exchange.
    ///
    /// Returns the first match or I/O failure captured during the session.
    /// Otherwise fails if received bytes were left unmatched, an expectation
    /// was only partly met, or scripted actions were never consumed.
    pub fn verify(mut self) -> Result<(), Error> {
        self.shutdown();

        let mut state = self.shared.lock();
        if let Some(failure) = state.failure.take() {
            return Err(failure);
        }

        state.check_consumed()
    }

    // Safe to call repeatedly; only the first call does any work.
    fn shutdown(&mut self) {
        let handles = std::mem::take(&mut self.handles);
        if handles.is_empty() {
            return;
        }

        debug!("shutting down mock server on {}", self.local_addr);

        self.shared.request_stop();
        self.shared.shutdown_connection(Shutdown::Read);

        self.wait_for(Signal::ReaderStopped, None);

        // a linger too large to represent means waiting for the matcher indefinitely
        let deadline = Instant::now().checked_add(self.linger);
        self.wait_for(Signal::MatcherStopped, deadline);
        self.shared.close_connection();

        for handle in handles {
            if let Err(e) = handle.join() {
                warn!("could not join thread: {e:?}");
            }
        }
    }

    // Waits for a background thread to report termination, waking the matcher
    // on every poll. Past the deadline the connection is closed so a write
    // blocked on an unresponsive peer fails instead of hanging.
    fn wait_for(&mut self, target: Signal, deadline: Option<Instant>) {
        while !self.stopped.contains(&target) {
            match self.signals.recv_timeout(self.poll_interval) {
                Ok(signal) => self.stopped.push(signal),
                Err(RecvTimeoutError::Timeout) => {
                    debug!("still waiting for {target:?}");
                    self.shared.notify();
                    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        self.shared.close_connection();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServer")
            .field("local_addr", &self.local_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for a [MockServer] with non-default settings.
#[derive(Debug, Clone)]
pub struct MockServerBuilder {
    host: String,
    port: u16,
    poll_interval: Duration,
    linger: Duration,
    tcp_no_delay: bool,
    recorder: Option<SessionRecorder>,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self {
            host: String::from(DEFAULT_HOST),
            port: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
            linger: DEFAULT_LINGER,
            tcp_no_delay: true,
            recorder: None,
        }
    }
}

impl MockServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interface to listen on. Defaults to 127.0.0.1.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Port to listen on. Defaults to 0, an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// How often blocked reads and shutdown waits wake up to check for a stop request.
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Upper bound on how long shutdown waits for pending responses to be written.
    pub fn linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn tcp_no_delay(mut self, tcp_no_delay: bool) -> Self {
        self.tcp_no_delay = tcp_no_delay;
        self
    }

    /// Transcript recorder. Defaults to [SessionRecorder::from_env].
    pub fn recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Binds the listener and starts the reader and matcher threads.
    pub fn bind(self) -> Result<MockServer, Error> {
        let listener = TcpListener::bind((self.host.as_str(), self.port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        debug!("mock server listening on {local_addr}");

        let recorder = self.recorder.unwrap_or_else(SessionRecorder::from_env);
        let shared = Arc::new(Shared::new());
        let (signals_send, signals_recv) = channel::unbounded();

        let options = ReaderOptions {
            poll_interval: self.poll_interval,
            tcp_no_delay: self.tcp_no_delay,
        };
        let reader = listener::spawn(listener, Arc::clone(&shared), options, recorder.clone(), signals_send.clone())?;

        let name = format!("mockwire-matcher-{}", local_addr.port());
        let matcher = match matcher::spawn(name, Arc::clone(&shared), self.poll_interval, recorder, signals_send) {
            Ok(handle) => handle,
            Err(err) => {
                shared.request_stop();
                if reader.join().is_err() {
                    warn!("reader thread panicked");
                }
                return Err(err.into());
            }
        };

        Ok(MockServer {
            shared,
            local_addr,
            signals: signals_recv,
            stopped: Vec::new(),
            handles: vec![reader, matcher],
            poll_interval: self.poll_interval,
            linger: self.linger,
        })
    }
}

/// Reports a background thread's termination when dropped, including on unwind,
/// so shutdown never waits on a thread that is gone.
pub(crate) struct StopGuard {
    shared: Arc<Shared>,
    signals: Sender<Signal>,
    signal: Signal,
}

impl StopGuard {
    pub fn new(shared: Arc<Shared>, signals: Sender<Signal>, signal: Signal) -> Self {
        Self { shared, signals, signal }
    }
}

impl Drop for StopGuard {
    fn drop(&mut self) {
        if self.signal == Signal::ReaderStopped {
            self.shared.reader_stopped();
        }
        if let Err(e) = self.signals.send(self.signal) {
            debug!("no one waiting for {:?}: {e}", self.signal);
        }
    }
}
