//! The SessionRecorder is used to log the raw bytes exchanged between a mock
//! server and its peer.
//! The recorder is enabled by setting the environment variable MOCKWIRE_RECORDING_DIR
//! MOCKWIRE_RECORDING_DIR is set to the path to store transcripts
//! e.g.  set to /tmp/logs
//! /tmp/logs/2026-10-19-09-30-0/0001-received.bin
//! /tmp/logs/2026-10-19-09-30-0/0002-sent.bin

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, warn};
use time::macros::format_description;
use time::OffsetDateTime;

pub(crate) const RECORDING_DIR_VAR: &str = "MOCKWIRE_RECORDING_DIR";

static RECORDING_SEQ: AtomicUsize = AtomicUsize::new(0);
static RECORDER_ID: AtomicUsize = AtomicUsize::new(0);

/// Writes a transcript of a session to disk, one file per chunk received or response sent.
#[derive(Clone, Debug, Default)]
pub struct SessionRecorder {
    recording_dir: Option<PathBuf>,
}

impl SessionRecorder {
    /// A recorder that writes nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Records into a new timestamped directory below `dir`.
    ///
    /// Falls back to a disabled recorder if the directory cannot be created.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let format = format_description!("[year]-[month]-[day]-[hour]-[minute]");
        let now = OffsetDateTime::now_utc();
        let instance_id = RECORDER_ID.fetch_add(1, Ordering::SeqCst);

        let timestamp = match now.format(&format) {
            Ok(timestamp) => timestamp,
            Err(err) => {
                warn!("could not format recording timestamp: {err}");
                String::from("session")
            }
        };

        let recording_dir = dir.as_ref().join(format!("{timestamp}-{instance_id}"));
        match fs::create_dir_all(&recording_dir) {
            Ok(()) => {
                debug!("recording session to {}", recording_dir.display());
                Self {
                    recording_dir: Some(recording_dir),
                }
            }
            Err(err) => {
                warn!("could not create recording directory {}: {err}", recording_dir.display());
                Self::disabled()
            }
        }
    }

    /// Enabled when MOCKWIRE_RECORDING_DIR is set to a non-empty path.
    pub fn from_env() -> Self {
        match env::var(RECORDING_DIR_VAR) {
            Ok(dir) if !dir.is_empty() => Self::in_dir(dir),
            _ => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.recording_dir.is_some()
    }

    /// Directory transcripts are written to, if enabled.
    pub fn recording_dir(&self) -> Option<&Path> {
        self.recording_dir.as_deref()
    }

    pub(crate) fn record_received(&self, bytes: &[u8]) {
        self.record("received", bytes);
    }

    pub(crate) fn record_sent(&self, bytes: &[u8]) {
        self.record("sent", bytes);
    }

    fn record(&self, direction: &str, bytes: &[u8]) {
        let Some(dir) = &self.recording_dir else {
            return;
        };

        let record_id = RECORDING_SEQ.fetch_add(1, Ordering::SeqCst);
        let file = dir.join(format!("{record_id:04}-{direction}.bin"));
        if let Err(err) = fs::write(&file, bytes) {
            warn!("could not record {direction} bytes to {}: {err}", file.display());
        }
    }
}
