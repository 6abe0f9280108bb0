//! Accepts the single peer connection and feeds everything it sends into the receive buffer.

use std::io::{self, Read};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;
use log::{debug, info, warn};

use super::state::{Shared, Signal};
use super::StopGuard;
use crate::error_handler::{is_disconnect_error, is_interrupted, is_timeout_error};
use crate::recorder::SessionRecorder;

// Pause between polls of the non-blocking listener.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(5);
const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone)]
pub(crate) struct ReaderOptions {
    pub poll_interval: Duration,
    pub tcp_no_delay: bool,
}

pub(crate) fn spawn(
    listener: TcpListener,
    shared: Arc<Shared>,
    options: ReaderOptions,
    recorder: SessionRecorder,
    signals: Sender<Signal>,
) -> io::Result<JoinHandle<()>> {
    let port = listener.local_addr()?.port();

    thread::Builder::new().name(format!("mockwire-reader-{port}")).spawn(move || {
        let _guard = StopGuard::new(Arc::clone(&shared), signals, Signal::ReaderStopped);

        let stream = match accept(&listener, &shared) {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                debug!("listener closed before a peer connected");
                return;
            }
            Err(err) => {
                warn!("accept failed: {err}");
                return;
            }
        };

        // Only one connection per session.
        drop(listener);

        match configure(&stream, &options) {
            Ok(()) => {
                let stream = Arc::new(stream);
                shared.set_connection(Arc::clone(&stream));
                read_loop(&stream, &shared, &recorder);
            }
            Err(err) => warn!("could not configure accepted connection: {err}"),
        }

        debug!("reader thread finished");
    })
}

// Polls until a peer connects or a stop is requested. A peer already waiting
// in the backlog when the stop arrives is still accepted.
fn accept(listener: &TcpListener, shared: &Shared) -> io::Result<Option<TcpStream>> {
    loop {
        let stopping = shared.is_stopping();

        match listener.accept() {
            Ok((stream, peer)) => {
                info!("accepted connection from {peer}");
                return Ok(Some(stream));
            }
            Err(ref err) if is_timeout_error(err) => {
                if stopping {
                    return Ok(None);
                }
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(ref err) if is_interrupted(err) => {}
            Err(err) => return Err(err),
        }
    }
}

fn configure(stream: &TcpStream, options: &ReaderOptions) -> io::Result<()> {
    // accepted sockets inherit non-blocking mode on some platforms
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(options.poll_interval))?;
    stream.set_nodelay(options.tcp_no_delay)?;
    Ok(())
}

// Any read error ends the loop quietly; a peer hanging up is the normal end of a session.
fn read_loop(stream: &TcpStream, shared: &Shared, recorder: &SessionRecorder) {
    let mut buffer = [0_u8; READ_BUFFER_SIZE];
    let mut reader = stream;

    loop {
        match reader.read(&mut buffer) {
            Ok(0) => {
                debug!("peer closed the connection");
                return;
            }
            Ok(n) => {
                debug!("<- {n} byte(s)");
                recorder.record_received(&buffer[..n]);
                shared.push_received(&buffer[..n]);
            }
            Err(ref err) if is_timeout_error(err) => {
                if shared.is_stopping() {
                    debug!("read loop stopping");
                    return;
                }
            }
            Err(ref err) if is_interrupted(err) => {}
            Err(ref err) if is_disconnect_error(err) => {
                debug!("peer disconnected: {err}");
                return;
            }
            Err(err) => {
                warn!("read loop terminated by unexpected error: {err}");
                return;
            }
        }
    }
}
