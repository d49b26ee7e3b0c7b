//! Batch tracker — queues tracked events and flushes them to the analytics
//! API on size, max-wait, or debounce, with a single bounded retry.
//!
//! Timing goes through [`Clock`]: [`BatchTracker::poll`] flushes when a
//! deadline has passed, and [`BatchTracker::spawn_flush_loop`] drives it with
//! tokio timers.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lander_core::config::BatchConfig;
use lander_core::types::{SessionData, TrackBatchRequest, TrackEventParams, TrackedEvent};

use crate::clock::Clock;
use crate::session::SessionManager;
use crate::transport::{Delivery, Transport};

/// Sends per event: the original plus one retry.
const MAX_ATTEMPTS: u8 = 2;

/// Session fields an event is bound to at enqueue time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub user_id: String,
    pub campaign_id: String,
    pub landing_page_id: Option<String>,
    pub ab_test_id: Option<String>,
    pub ab_test_variant_id: Option<String>,
}

impl From<&SessionData> for SessionSnapshot {
    fn from(session: &SessionData) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            campaign_id: session.campaign_id.clone(),
            landing_page_id: session.landing_page_id.clone(),
            ab_test_id: session.ab_test_id.clone(),
            ab_test_variant_id: session.ab_test_variant_id.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: TrackedEvent,
    session: SessionSnapshot,
    attempts: u8,
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub max_batch_size: usize,
    pub max_wait: Duration,
    pub debounce: Duration,
    pub max_queue_size: usize,
}

impl From<&BatchConfig> for BatchSettings {
    fn from(config: &BatchConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            max_wait: Duration::milliseconds(config.max_wait_time_ms as i64),
            debounce: Duration::milliseconds(config.debounce_time_ms as i64),
            max_queue_size: config.max_queue_size.max(1),
        }
    }
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub requeued: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<QueuedEvent>,
    first_queued_at: Option<DateTime<Utc>>,
    last_queued_at: Option<DateTime<Utc>>,
}

pub struct BatchTracker {
    settings: BatchSettings,
    state: Mutex<QueueState>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    sessions: Option<Arc<SessionManager>>,
    workspace_id: Option<String>,
    project_id: Option<String>,
    wake: Notify,
    flush_lock: tokio::sync::Mutex<()>,
}

impl BatchTracker {
    pub fn new(settings: BatchSettings, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
            transport,
            clock,
            sessions: None,
            workspace_id: None,
            project_id: None,
            wake: Notify::new(),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Adopt `new_session_id` from track responses through `sessions`.
    pub fn with_session_manager(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn with_workspace(mut self, workspace_id: Option<String>, project_id: Option<String>) -> Self {
        self.workspace_id = workspace_id;
        self.project_id = project_id;
        self
    }

    pub fn queued_count(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Append an event bound to `session`. Returns true when the queue has
    /// reached the batch size and should be flushed now.
    pub fn enqueue(&self, params: TrackEventParams, session: &SessionData) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        state.events.push_back(QueuedEvent {
            event: TrackedEvent {
                params,
                timestamp: now,
            },
            session: SessionSnapshot::from(session),
            attempts: 0,
        });
        while state.events.len() > self.settings.max_queue_size {
            if let Some(dropped) = state.events.pop_front() {
                metrics::counter!("analytics.dropped").increment(1);
                warn!(event_id = %dropped.event.params.event_id, "analytics queue full, dropping oldest event");
            }
        }
        state.first_queued_at.get_or_insert(now);
        state.last_queued_at = Some(now);
        metrics::counter!("analytics.queued").increment(1);
        let full = state.events.len() >= self.settings.max_batch_size;
        drop(state);

        self.wake.notify_one();
        full
    }

    /// Enqueue and flush immediately if the batch is full.
    pub async fn track(&self, params: TrackEventParams, session: &SessionData) -> FlushReport {
        if self.enqueue(params, session) {
            return self.flush().await;
        }
        FlushReport::default()
    }

    /// Earliest moment a time-based flush is due.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock();
        if state.events.is_empty() {
            return None;
        }
        let by_wait = state.first_queued_at.map(|t| t + self.settings.max_wait);
        let by_debounce = state.last_queued_at.map(|t| t + self.settings.debounce);
        match (by_wait, by_debounce) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_deadline().is_some_and(|deadline| now >= deadline)
    }

    /// Flush if a deadline has passed.
    pub async fn poll(&self) -> FlushReport {
        if self.is_due(self.clock.now()) {
            return self.flush().await;
        }
        FlushReport::default()
    }

    pub async fn flush(&self) -> FlushReport {
        self.flush_with(Delivery::Normal).await
    }

    /// Send whatever is queued while the page is going away. Failures are not
    /// retried and never surface.
    pub async fn flush_on_unload(&self) -> FlushReport {
        self.flush_with(Delivery::Unload).await
    }

    /// Discard everything queued. Returns the number of events discarded.
    pub fn clear(&self) -> usize {
        let discarded = self.take_all().len();
        if discarded > 0 {
            debug!(count = discarded, "analytics queue cleared");
        }
        discarded
    }

    fn take_all(&self) -> Vec<QueuedEvent> {
        let mut state = self.state.lock();
        state.first_queued_at = None;
        state.last_queued_at = None;
        state.events.drain(..).collect()
    }

    /// Put failed events back at the head of the queue, dropping those that
    /// already used their retry. Returns (requeued, dropped).
    fn requeue(&self, failed: Vec<QueuedEvent>) -> (usize, usize) {
        let now = self.clock.now();
        let (mut requeued, mut dropped) = (0, 0);
        let mut state = self.state.lock();
        for mut queued in failed.into_iter().rev() {
            queued.attempts += 1;
            if queued.attempts >= MAX_ATTEMPTS {
                dropped += 1;
                debug!(
                    event_id = %queued.event.params.event_id,
                    session_id = %queued.session.session_id,
                    "dropping analytics event after retry"
                );
                continue;
            }
            requeued += 1;
            state.events.push_front(queued);
        }
        if requeued > 0 {
            // Wait a full cycle before the retry.
            state.first_queued_at = Some(state.first_queued_at.map_or(now, |t| t.min(now)));
        }
        while state.events.len() > self.settings.max_queue_size {
            if let Some(oldest) = state.events.pop_front() {
                dropped += 1;
                warn!(event_id = %oldest.event.params.event_id, "analytics queue full, dropping oldest event");
            }
        }
        drop(state);

        metrics::counter!("analytics.retried").increment(requeued as u64);
        metrics::counter!("analytics.dropped").increment(dropped as u64);
        (requeued, dropped)
    }

    /// Consecutive runs of one session, split at the batch size.
    fn build_requests(&self, events: Vec<QueuedEvent>) -> Vec<(TrackBatchRequest, Vec<QueuedEvent>)> {
        let mut groups: Vec<Vec<QueuedEvent>> = Vec::new();
        for queued in events {
            match groups.last_mut() {
                Some(group)
                    if group[0].session == queued.session
                        && group.len() < self.settings.max_batch_size =>
                {
                    group.push(queued)
                }
                _ => groups.push(vec![queued]),
            }
        }

        let sent_at = self.clock.now();
        groups
            .into_iter()
            .map(|group| {
                let session = group[0].session.clone();
                let request = TrackBatchRequest {
                    session_id: session.session_id,
                    user_id: session.user_id,
                    campaign_id: session.campaign_id,
                    workspace_id: self.workspace_id.clone(),
                    project_id: self.project_id.clone(),
                    landing_page_id: session.landing_page_id,
                    ab_test_id: session.ab_test_id,
                    ab_test_variant_id: session.ab_test_variant_id,
                    events: group.iter().map(|q| q.event.clone()).collect(),
                    sent_at,
                };
                (request, group)
            })
            .collect()
    }

    async fn flush_with(&self, delivery: Delivery) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let events = self.take_all();
        if events.is_empty() {
            return FlushReport::default();
        }

        let count = events.len();
        debug!(count = count, ?delivery, "flushing analytics batch");

        let mut report = FlushReport::default();
        let mut failed = Vec::new();
        for (request, group) in self.build_requests(events) {
            match self.transport.send_batch(&request, delivery).await {
                Ok(response) => {
                    report.sent += group.len();
                    metrics::counter!("analytics.flushed").increment(group.len() as u64);
                    if let (Some(new_id), Some(sessions)) = (&response.new_session_id, &self.sessions) {
                        let is_current = sessions
                            .current()
                            .is_some_and(|current| current.session_id == request.session_id);
                        if !is_current {
                            debug!(
                                batch_session_id = %request.session_id,
                                "ignoring session id issued for a superseded session"
                            );
                        } else if let Err(e) = sessions.adopt_session_id(new_id) {
                            warn!(error = %e, "failed to adopt renewed session");
                        }
                    }
                }
                Err(e) => {
                    metrics::counter!("analytics.flush_errors").increment(1);
                    match delivery {
                        Delivery::Normal => {
                            debug!(error = %e, count = group.len(), "analytics batch failed, will retry");
                            failed.extend(group);
                        }
                        Delivery::Unload => {
                            debug!(error = %e, count = group.len(), "unload flush failed");
                            report.dropped += group.len();
                        }
                    }
                }
            }
        }

        if !failed.is_empty() {
            let (requeued, dropped) = self.requeue(failed);
            report.requeued += requeued;
            report.dropped += dropped;
        }

        if report.sent > 0 {
            info!(sent = report.sent, "analytics batch flushed");
        }
        if report.dropped > 0 {
            debug!(dropped = report.dropped, "analytics events dropped");
        }
        report
    }

    /// Run time-based flushes with real timers until `shutdown` flips or is
    /// dropped, then flush what remains in unload mode.
    pub fn spawn_flush_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let wait = match self.next_deadline() {
                    Some(deadline) => (deadline - self.clock.now())
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO),
                    None => std::time::Duration::from_secs(3600),
                };

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {
                        self.poll().await;
                    }
                    _ = self.wake.notified() => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            self.flush_on_unload().await;
            debug!("analytics flush loop stopped");
        })
    }
}
