pub mod summary;

use crate::error::SyncError;
use crate::models::{ConnectionState, ConnectionStatus, RemoteStatus};
use crate::store::PollReader;
use log::{debug, error, info, warn};

/// Presentation-side sink. Called from the session task; implementations should return quickly.
/// The same logical change may be reported more than once.
pub trait SyncObserver: Send + Sync {
    fn connection_changed(&self, status: &ConnectionStatus);

    // The poll store changed; re-read it through a `PollReader`
    fn store_changed(&self);

    fn remote_status_changed(&self, _status: &RemoteStatus) {}

    fn refresh_failed(&self, _error: &SyncError) {}
}

pub struct LogObserver {
    reader: PollReader,
}

impl LogObserver {
    pub fn new(reader: PollReader) -> Self {
        Self { reader }
    }
}

impl SyncObserver for LogObserver {
    fn connection_changed(&self, status: &ConnectionStatus) {
        match status.state {
            ConnectionState::Connected => info!("Push channel connected"),
            ConnectionState::Connecting => debug!("Connecting push channel..."),
            ConnectionState::Disconnected if status.retries_exhausted => error!(
                "Push channel down, {} failed attempts",
                status.failed_attempts
            ),
            ConnectionState::Disconnected => warn!("Push channel disconnected. Retrying connection..."),
        }
    }

    fn store_changed(&self) {
        let polls = self.reader.snapshot();
        info!("Poll store now holds {} poll(s)", polls.len());
        for (_, record) in &polls {
            debug!("{}\n{}", self.reader.label(record), summary::results_summary(record));
        }
    }

    fn remote_status_changed(&self, status: &RemoteStatus) {
        match status {
            RemoteStatus::Ready => info!("Remote client is READY"),
            RemoteStatus::QrPending => warn!("Remote client waiting for pairing"),
            RemoteStatus::LoggedOut => warn!("Remote client logged out, local polls cleared"),
            other => warn!("Remote client status: {}", other),
        }
    }

    fn refresh_failed(&self, error: &SyncError) {
        warn!("Poll refresh failed, keeping last known data: {}", error);
    }
}
