use crate::error::SyncError;
use crate::models::{ConnectionState, ConnectionStatus};
use crate::remote::{PushStream, PushTransport};
use crate::sync::engine::SessionEvent;
use crate::tasks::refresh::RefreshReason;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    Fixed(Duration),
    // Doubles per consecutive failure, starting at `base`, never above `max`
    Exponential { base: Duration, max: Duration },
}

impl RetryPolicy {
    // Shortest delay this policy ever produces
    pub fn floor(&self) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { base, .. } => base,
        }
    }

    pub fn clamped(self, min: Duration) -> Self {
        match self {
            RetryPolicy::Fixed(delay) => RetryPolicy::Fixed(delay.max(min)),
            RetryPolicy::Exponential { base, max } => {
                let base = base.max(min);
                RetryPolicy::Exponential { base, max: max.max(base) }
            }
        }
    }

    // Delay before the next attempt, given the consecutive failures so far
    pub fn delay(&self, failed_attempts: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { base, max } => {
                let exponent = failed_attempts.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent).min(max.max(base))
            }
        }
    }
}

// Owns the push channel lifecycle: connect, pump events, back off, reconnect
// Only talks to the session through its event queue
pub struct ConnectionSupervisor {
    transport: Arc<dyn PushTransport>,
    events: mpsc::Sender<SessionEvent>,
    retry: RetryPolicy,
    max_attempts: Option<u32>,
    connect_timeout: Duration,
    state: ConnectionState,
    failed_attempts: u32,
}

impl ConnectionSupervisor {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        events: mpsc::Sender<SessionEvent>,
        retry: RetryPolicy,
        max_attempts: Option<u32>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            events,
            retry,
            max_attempts,
            connect_timeout,
            state: ConnectionState::Disconnected,
            failed_attempts: 0,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Connection supervisor started");

        loop {
            if *shutdown.borrow() || self.events.is_closed() {
                break;
            }

            self.transition(ConnectionState::Connecting).await;
            let attempt = tokio::select! {
                result = timeout(self.connect_timeout, self.transport.connect()) => result,
                _ = shutdown.changed() => break,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    self.failed_attempts = 0;
                    self.transition(ConnectionState::Connected).await;
                    self.send(SessionEvent::Refresh(RefreshReason::Connected)).await;

                    let stopping = self.pump(stream, &mut shutdown).await;
                    self.transition(ConnectionState::Disconnected).await;
                    if stopping {
                        break;
                    }
                }
                Ok(Err(e)) => self.record_failure(e).await,
                Err(_) => self.record_failure(SyncError::Timeout(self.connect_timeout)).await,
            }

            let delay = self.next_delay();
            debug!("Next connection attempt in {:?}", delay);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.transition(ConnectionState::Disconnected).await;
        info!("Connection supervisor stopped");
    }

    // Forward events until the channel drops. Returns true when stopping for shutdown.
    async fn pump(&mut self, mut stream: Box<dyn PushStream>, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            let next = tokio::select! {
                next = stream.next_event() => next,
                _ = shutdown.changed() => return true,
            };

            match next {
                Ok(Some(event)) => {
                    if !self.send(SessionEvent::Inbound(event)).await {
                        return true;
                    }
                }
                Ok(None) => {
                    info!("Push channel closed by remote");
                    return false;
                }
                Err(SyncError::MalformedPayload(reason)) => {
                    warn!("Dropping malformed push event: {}", reason);
                }
                Err(e) => {
                    warn!("Push channel lost: {}", e);
                    return false;
                }
            }
        }
    }

    async fn record_failure(&mut self, err: SyncError) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
        if self.max_attempts == Some(self.failed_attempts) {
            error!(
                "Push channel unreachable after {} attempts ({}); still retrying every {:?}",
                self.failed_attempts,
                err,
                self.retry.floor()
            );
        } else {
            warn!("Connection attempt {} failed: {}", self.failed_attempts, err);
        }
        self.transition(ConnectionState::Disconnected).await;
    }

    fn exhausted(&self) -> bool {
        self.max_attempts
            .map_or(false, |cap| self.failed_attempts >= cap)
    }

    fn next_delay(&self) -> Duration {
        if self.exhausted() {
            self.retry.floor()
        } else {
            self.retry.delay(self.failed_attempts)
        }
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            failed_attempts: self.failed_attempts,
            retries_exhausted: self.exhausted(),
        }
    }

    async fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!("Connection {} -> {}", self.state, next);
        self.state = next;
        self.send(SessionEvent::Connection(self.status())).await;
    }

    async fn send(&self, event: SessionEvent) -> bool {
        if self.events.send(event).await.is_err() {
            debug!("Session queue closed, dropping supervisor event");
            return false;
        }
        true
    }
}
