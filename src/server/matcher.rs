//! The matcher compares received bytes against the expected script and sends
//! scripted responses as soon as they reach the head of the queue.

use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::Sender;
use log::{debug, trace, warn};

use super::state::{Shared, Signal};
use super::StopGuard;
use crate::errors::Error;
use crate::recorder::SessionRecorder;
use crate::script::ActionKind;

pub(crate) fn spawn(
    name: String,
    shared: Arc<Shared>,
    poll_interval: Duration,
    recorder: SessionRecorder,
    signals: Sender<Signal>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new().name(name).spawn(move || {
        let _guard = StopGuard::new(Arc::clone(&shared), signals, Signal::MatcherStopped);
        let matcher = Matcher {
            shared: &shared,
            recorder: &recorder,
        };

        if let Err(failure) = matcher.run(poll_interval) {
            shared.record_failure(failure);
            matcher.drain();
        }

        debug!("matcher thread finished");
    })
}

struct Matcher<'a> {
    shared: &'a Shared,
    recorder: &'a SessionRecorder,
}

impl Matcher<'_> {
    // Runs until a failure, or until a stop was requested, the reader has
    // finished and one last pass over the received bytes has been made.
    fn run(&self, poll_interval: Duration) -> Result<(), Error> {
        loop {
            let mut state = self.shared.lock();

            state.match_received()?;

            let response = if self.shared.has_connection() {
                state.actions.pop_if(ActionKind::Response)
            } else {
                None
            };

            if let Some(response) = response {
                // never write while holding the lock, the reader must keep buffering
                drop(state);
                self.write_response(&response.payload)?;
                continue;
            }

            if self.shared.is_stopping() && !state.reader_active {
                return Ok(());
            }

            let _state = self.shared.wait(state, poll_interval);
        }
    }

    fn write_response(&self, payload: &[u8]) -> io::Result<()> {
        let stream = self
            .shared
            .connection()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed before response was sent"))?;

        let mut writer = &*stream;
        writer.write_all(payload)?;
        writer.flush()?;

        debug!("-> {} byte(s)", payload.len());
        self.recorder.record_sent(payload);
        Ok(())
    }

    // After a failure the rest of the script is flushed: expectations are
    // dropped, responses are still sent so the peer is not left waiting.
    fn drain(&self) {
        loop {
            let action = self.shared.lock().actions.pop_front();
            let Some(action) = action else {
                return;
            };

            match action.kind {
                ActionKind::Expected => trace!("discarding expectation of {} byte(s)", action.payload.len()),
                ActionKind::Response => {
                    if let Err(err) = self.write_response(&action.payload) {
                        warn!("could not send response while draining: {err}");
                    }
                }
            }
        }
    }
}
