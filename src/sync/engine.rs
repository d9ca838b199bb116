use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::models::event::InboundEvent;
use crate::models::{ConnectionStatus, RemoteStatus};
use crate::notify::SyncObserver;
use crate::remote::{PollSource, PushTransport};
use crate::store::{PollReader, PollStore};
use crate::sync::Reconciler;
use crate::tasks::refresh::{PullOutcome, RefreshReason, RefreshScheduler};
use crate::tasks::supervisor::ConnectionSupervisor;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use uuid::Uuid;

const QUEUE_CAPACITY: usize = 256;

// Everything the session task consumes. Producers (push channel, supervisor,
// pulls, callers) only ever talk to the store through this queue
#[derive(Debug)]
pub enum SessionEvent {
    Inbound(InboundEvent),
    Connection(ConnectionStatus),
    Refresh(RefreshReason),
    PullFinished(PullOutcome),
    Logout,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub connection: Option<ConnectionStatus>,
    pub remote: Option<RemoteStatus>,
}

impl SessionState {
    pub fn remote_ready(&self) -> bool {
        self.remote.as_ref().map_or(false, RemoteStatus::is_ready)
    }
}

/// A running sync session: the engine task plus the connection supervisor.
pub struct SessionHandle {
    id: Uuid,
    reader: PollReader,
    events: mpsc::Sender<SessionEvent>,
    state: watch::Receiver<SessionState>,
    shutdown: watch::Sender<bool>,
    engine: JoinHandle<()>,
    supervisor: JoinHandle<()>,
}

impl SessionHandle {
    pub fn start(
        config: &SyncConfig,
        store: Arc<PollStore>,
        transport: Arc<dyn PushTransport>,
        source: Arc<dyn PollSource>,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::default());

        info!("Starting poll sync session {}", id);

        let engine = Engine {
            session_id: id,
            reconciler: Reconciler::new(Arc::clone(&store)),
            scheduler: RefreshScheduler::new(source, config.refresh_timeout, events_tx.clone()),
            observer,
            state: state_tx,
            refresh_on_unknown_delta: config.refresh_on_unknown_delta,
        };
        let engine = tokio::spawn(engine.run(events_rx, shutdown_rx.clone(), config.refresh_interval));

        let supervisor = ConnectionSupervisor::new(
            transport,
            events_tx.clone(),
            config.retry,
            config.max_attempts,
            config.connect_timeout,
        )
        .spawn(shutdown_rx);

        Self {
            id,
            reader: PollReader::new(store, config.suffix_len),
            events: events_tx,
            state: state_rx,
            shutdown: shutdown_tx,
            engine,
            supervisor,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn reader(&self) -> PollReader {
        self.reader.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    // Ask for a full-state pull outside the regular triggers
    pub async fn refresh(&self) -> Result<(), SyncError> {
        self.submit(SessionEvent::Refresh(RefreshReason::Requested)).await
    }

    // End the session's view of the remote account: every local poll is dropped
    pub async fn logout(&self) -> Result<(), SyncError> {
        self.submit(SessionEvent::Logout).await
    }

    async fn submit(&self, event: SessionEvent) -> Result<(), SyncError> {
        self.events
            .send(event)
            .await
            .map_err(|_| SyncError::Transport("session has stopped".to_string()))
    }

    pub async fn shutdown(self) {
        info!("Shutting down poll sync session {}", self.id);
        let _ = self.shutdown.send(true);
        if let Err(e) = self.supervisor.await {
            error!("Connection supervisor task failed: {}", e);
        }
        if let Err(e) = self.engine.await {
            error!("Session engine task failed: {}", e);
        }
    }
}

// Single consumer of the session queue; owns every write to the poll store
struct Engine {
    session_id: Uuid,
    reconciler: Reconciler,
    scheduler: RefreshScheduler,
    observer: Arc<dyn SyncObserver>,
    state: watch::Sender<SessionState>,
    refresh_on_unknown_delta: bool,
}

impl Engine {
    async fn run(
        mut self,
        mut events: mpsc::Receiver<SessionEvent>,
        mut shutdown: watch::Receiver<bool>,
        refresh_interval: Option<Duration>,
    ) {
        let mut ticker = refresh_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = next_tick(&mut ticker) => self.scheduler.trigger(RefreshReason::Periodic),
                _ = shutdown.changed() => break,
            }
        }

        info!("Session {} engine stopped", self.session_id);
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Inbound(inbound) => self.handle_inbound(inbound),
            SessionEvent::Connection(status) => {
                self.state.send_modify(|state| state.connection = Some(status));
                self.observer.connection_changed(&status);
            }
            SessionEvent::Refresh(reason) => self.scheduler.trigger(reason),
            SessionEvent::PullFinished(outcome) => self.handle_pull(outcome),
            SessionEvent::Logout => {
                info!("Session {} logged out, clearing polls", self.session_id);
                self.reset_session();
            }
        }
    }

    fn handle_inbound(&mut self, inbound: InboundEvent) {
        match inbound {
            InboundEvent::Delta(delta) => {
                let unknown = !self.reconciler.store().contains(&delta.id);
                let id = delta.id.clone();
                if self.reconciler.apply_delta(delta).changed() {
                    debug!("Poll {} updated from delta", id);
                    self.observer.store_changed();
                }
                if unknown && self.refresh_on_unknown_delta {
                    self.scheduler.trigger(RefreshReason::UnknownPoll);
                }
            }
            InboundEvent::NewPoll(announcement) => {
                let id = announcement.id.clone();
                if self.reconciler.apply_announcement(announcement).changed() {
                    info!("New poll {} announced", id);
                    self.observer.store_changed();
                }
            }
            InboundEvent::Snapshot(payload) => {
                let report = self.reconciler.apply_snapshot(payload);
                info!(
                    "Installed pushed snapshot: {} poll(s), {} skipped",
                    report.installed, report.skipped
                );
                self.observer.store_changed();
            }
            InboundEvent::RemoteStatus(status) => self.set_remote(status),
            InboundEvent::RefreshHint => self.scheduler.trigger(RefreshReason::Announcement),
        }
    }

    fn handle_pull(&mut self, outcome: PullOutcome) {
        self.scheduler.finish();

        if outcome.generation != self.scheduler.generation() {
            debug!(
                "Discarding refresh ({:?}) started before the session was reset",
                outcome.reason
            );
            return;
        }

        if let Some(status) = outcome.status {
            self.set_remote(status);
            // A logged-out status has just reset the session
            if outcome.generation != self.scheduler.generation() {
                return;
            }
        }

        match outcome.polls {
            Ok(payload) => {
                let report = self.reconciler.apply_snapshot(payload);
                info!(
                    "Refresh ({:?}) fetched {} poll(s), {} skipped",
                    outcome.reason, report.installed, report.skipped
                );
                self.observer.store_changed();
            }
            Err(e) => {
                warn!("Refresh ({:?}) failed, poll store left as is: {}", outcome.reason, e);
                self.observer.refresh_failed(&e);
            }
        }
    }

    fn set_remote(&mut self, status: RemoteStatus) {
        let changed = self.state.borrow().remote.as_ref() != Some(&status);
        if changed {
            info!("Remote client status: {}", status);
            self.state.send_modify(|state| state.remote = Some(status.clone()));
            self.observer.remote_status_changed(&status);
        }

        // Every logged-out report ends the session, repeated or not
        if status == RemoteStatus::LoggedOut {
            self.reset_session();
        }
    }

    fn reset_session(&mut self) {
        self.reconciler.reset();
        self.scheduler.invalidate();
        self.observer.store_changed();
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
