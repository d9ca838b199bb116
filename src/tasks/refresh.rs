use crate::error::SyncError;
use crate::models::RemoteStatus;
use crate::remote::PollSource;
use crate::sync::engine::SessionEvent;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Connected,
    Requested,
    UnknownPoll,
    Announcement,
    Periodic,
}

// Result of one pull, handed back to the session task
#[derive(Debug)]
pub struct PullOutcome {
    pub reason: RefreshReason,
    // Scheduler generation the pull was started in
    pub generation: u64,
    pub status: Option<RemoteStatus>,
    pub polls: Result<Value, SyncError>,
}

// Owned by the session task; results come back through the session queue
pub struct RefreshScheduler {
    source: Arc<dyn PollSource>,
    limit: Duration,
    events: mpsc::Sender<SessionEvent>,
    in_flight: bool,
    // Trigger that arrived while a pull was running
    pending: Option<RefreshReason>,
    generation: u64,
}

impl RefreshScheduler {
    pub fn new(source: Arc<dyn PollSource>, limit: Duration, events: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            source,
            limit,
            events,
            in_flight: false,
            pending: None,
            generation: 0,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    // Orphan the running pull and drop any queued trigger. Outcomes started
    // before this call carry a stale generation
    pub fn invalidate(&mut self) {
        self.generation += 1;
        if self.pending.take().is_some() {
            debug!("Dropped queued refresh after session reset");
        }
    }

    pub fn trigger(&mut self, reason: RefreshReason) {
        if self.in_flight {
            debug!("Pull already running, queueing {:?} refresh", reason);
            // A queued connect refresh also checks remote status, keep it
            if self.pending != Some(RefreshReason::Connected) {
                self.pending = Some(reason);
            }
            return;
        }

        info!("Starting full poll refresh ({:?})", reason);
        self.in_flight = true;

        let source = Arc::clone(&self.source);
        let events = self.events.clone();
        let limit = self.limit;
        let generation = self.generation;
        tokio::spawn(async move {
            let status = if reason == RefreshReason::Connected {
                pull_status(source.as_ref(), limit).await
            } else {
                None
            };
            let polls = pull_polls(source.as_ref(), limit).await;
            let outcome = PullOutcome { reason, generation, status, polls };
            if events.send(SessionEvent::PullFinished(outcome)).await.is_err() {
                debug!("Session closed before refresh ({:?}) finished", reason);
            }
        });
    }

    // Mark the running pull as done and start any refresh queued behind it
    pub fn finish(&mut self) {
        self.in_flight = false;
        if let Some(reason) = self.pending.take() {
            self.trigger(reason);
        }
    }
}

// Every failure maps to a failed refresh or a timeout
pub async fn pull_polls(source: &dyn PollSource, limit: Duration) -> Result<Value, SyncError> {
    match timeout(limit, source.fetch_polls()).await {
        Ok(Ok(polls)) => Ok(polls),
        Ok(Err(SyncError::RefreshFailed(reason))) => Err(SyncError::RefreshFailed(reason)),
        Ok(Err(e)) => Err(SyncError::RefreshFailed(e.to_string())),
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}

async fn pull_status(source: &dyn PollSource, limit: Duration) -> Option<RemoteStatus> {
    match timeout(limit, source.fetch_status()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!("Remote status check failed: {}", e);
            None
        }
        Err(_) => {
            warn!("Remote status check timed out after {:?}", limit);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SlowSource {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PollSource for SlowSource {
        async fn fetch_status(&self) -> Result<RemoteStatus, SyncError> {
            Ok(RemoteStatus::Ready)
        }

        async fn fetch_polls(&self) -> Result<Value, SyncError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(json!({ "P1": {} }))
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl PollSource for BrokenSource {
        async fn fetch_status(&self) -> Result<RemoteStatus, SyncError> {
            Err(SyncError::Transport("down".into()))
        }

        async fn fetch_polls(&self) -> Result<Value, SyncError> {
            Err(SyncError::Transport("down".into()))
        }
    }

    async fn next_outcome(rx: &mut mpsc::Receiver<SessionEvent>) -> PullOutcome {
        match timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap() {
            SessionEvent::PullFinished(outcome) => outcome,
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn pull_times_out() {
        let source = SlowSource { delay: Duration::from_secs(5), calls: AtomicUsize::new(0) };
        let err = pull_polls(&source, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)));
    }

    #[tokio::test]
    async fn transport_errors_become_failed_refresh() {
        let err = pull_polls(&BrokenSource, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SyncError::RefreshFailed(_)));
    }

    #[tokio::test]
    async fn triggers_coalesce_while_in_flight() {
        let source = Arc::new(SlowSource { delay: Duration::from_millis(50), calls: AtomicUsize::new(0) });
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = RefreshScheduler::new(source.clone(), Duration::from_secs(1), tx);

        scheduler.trigger(RefreshReason::Connected);
        scheduler.trigger(RefreshReason::Requested);
        scheduler.trigger(RefreshReason::Periodic);
        assert!(scheduler.is_in_flight());

        let first = next_outcome(&mut rx).await;
        assert_eq!(first.reason, RefreshReason::Connected);
        assert_eq!(first.status, Some(RemoteStatus::Ready));
        assert!(first.polls.is_ok());

        scheduler.finish();
        let second = next_outcome(&mut rx).await;
        assert_eq!(second.reason, RefreshReason::Periodic);
        assert_eq!(second.status, None);

        scheduler.finish();
        assert!(!scheduler.is_in_flight());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_marks_running_pull_stale() {
        let source = Arc::new(SlowSource { delay: Duration::from_millis(30), calls: AtomicUsize::new(0) });
        let (tx, mut rx) = mpsc::channel(8);
        let mut scheduler = RefreshScheduler::new(source.clone(), Duration::from_secs(1), tx);

        scheduler.trigger(RefreshReason::Requested);
        scheduler.trigger(RefreshReason::Periodic);
        scheduler.invalidate();

        let outcome = next_outcome(&mut rx).await;
        assert_ne!(outcome.generation, scheduler.generation());

        // Queued trigger went with the reset
        scheduler.finish();
        assert!(!scheduler.is_in_flight());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        scheduler.trigger(RefreshReason::Requested);
        let fresh = next_outcome(&mut rx).await;
        assert_eq!(fresh.generation, scheduler.generation());
    }
}
