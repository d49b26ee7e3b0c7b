//! Network transport for the analytics API: session init/renewal and batch
//! delivery. [`HttpTransport`] talks to the real API over reqwest;
//! [`RecordingTransport`] is an in-memory double for tests and dry runs.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use lander_core::types::{
    SessionInitRequest, SessionInitResponse, SessionRenewalRequest, SessionRenewalResponse,
    TrackBatchRequest, TrackEventResponse,
};
use lander_core::{AnalyticsConfig, AnalyticsError, AnalyticsResult};

/// How a batch is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Regular flush cycle.
    Normal,
    /// Best-effort send while the page is being torn down.
    Unload,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn init_session(&self, request: &SessionInitRequest)
        -> AnalyticsResult<SessionInitResponse>;

    async fn renew_session(
        &self,
        request: &SessionRenewalRequest,
    ) -> AnalyticsResult<SessionRenewalResponse>;

    async fn send_batch(
        &self,
        batch: &TrackBatchRequest,
        delivery: Delivery,
    ) -> AnalyticsResult<TrackEventResponse>;
}

// ─── HTTP ───────────────────────────────────────────────────────────────

pub struct HttpTransport {
    client: reqwest::Client,
    init_url: String,
    renew_url: String,
    track_url: String,
    unload_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &AnalyticsConfig) -> AnalyticsResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| AnalyticsError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            init_url: config.endpoint("session/init"),
            renew_url: config.endpoint("session/renew"),
            track_url: config.endpoint("track"),
            unload_timeout: Duration::from_millis(config.batch.unload_timeout_ms),
        })
    }

    /// POST `body` and return the response body of a 2xx reply.
    async fn post<B>(&self, url: &str, body: &B, timeout: Option<Duration>) -> AnalyticsResult<String>
    where
        B: Serialize + Sync,
    {
        let mut request = self.client.post(url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AnalyticsError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalyticsError::Http {
                status: status.as_u16(),
                endpoint: url.to_string(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| AnalyticsError::Transport(e.to_string()))?;
        debug!(url = %url, status = status.as_u16(), len = text.len(), "analytics API response");
        Ok(text)
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> AnalyticsResult<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let text = self.post(url, body, None).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Any 2xx counts as delivered; the body only matters for session renewal.
fn parse_track_response(body: &str) -> TrackEventResponse {
    if body.trim().is_empty() {
        return TrackEventResponse::default();
    }
    serde_json::from_str(body).unwrap_or_else(|e| {
        debug!(error = %e, "unreadable track response body, treating as delivered");
        TrackEventResponse::default()
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn init_session(
        &self,
        request: &SessionInitRequest,
    ) -> AnalyticsResult<SessionInitResponse> {
        self.post_json(&self.init_url, request).await
    }

    async fn renew_session(
        &self,
        request: &SessionRenewalRequest,
    ) -> AnalyticsResult<SessionRenewalResponse> {
        self.post_json(&self.renew_url, request).await
    }

    async fn send_batch(
        &self,
        batch: &TrackBatchRequest,
        delivery: Delivery,
    ) -> AnalyticsResult<TrackEventResponse> {
        let timeout = match delivery {
            Delivery::Normal => None,
            Delivery::Unload => Some(self.unload_timeout),
        };
        let body = self.post(&self.track_url, batch, timeout).await?;
        Ok(parse_track_response(&body))
    }
}

// ─── Recording double ───────────────────────────────────────────────────

#[derive(Default)]
struct RecordingState {
    init_requests: Vec<SessionInitRequest>,
    renew_requests: Vec<SessionRenewalRequest>,
    batches: Vec<(TrackBatchRequest, Delivery)>,
    track_attempts: usize,
    track_failures: VecDeque<bool>,
    fail_init: bool,
    fail_renew: bool,
    next_new_session_id: Option<String>,
    issued_sessions: u32,
}

/// In-memory transport that records every call and answers from a script.
#[derive(Default)]
pub struct RecordingTransport {
    state: Mutex<RecordingState>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` batch sends fail with a transport error.
    pub fn fail_next_tracks(&self, count: usize) {
        let mut state = self.state.lock();
        state.track_failures.extend(std::iter::repeat(true).take(count));
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.state.lock().fail_init = fail;
    }

    pub fn set_fail_renew(&self, fail: bool) {
        self.state.lock().fail_renew = fail;
    }

    /// The next successful track response carries `new_session_id`.
    pub fn respond_with_new_session(&self, session_id: impl Into<String>) {
        self.state.lock().next_new_session_id = Some(session_id.into());
    }

    /// Successfully delivered batches, in send order.
    pub fn batches(&self) -> Vec<TrackBatchRequest> {
        self.state
            .lock()
            .batches
            .iter()
            .map(|(b, _)| b.clone())
            .collect()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.state.lock().batches.iter().map(|(_, d)| *d).collect()
    }

    /// All send attempts, successful or not.
    pub fn track_attempts(&self) -> usize {
        self.state.lock().track_attempts
    }

    pub fn init_requests(&self) -> Vec<SessionInitRequest> {
        self.state.lock().init_requests.clone()
    }

    pub fn renew_requests(&self) -> Vec<SessionRenewalRequest> {
        self.state.lock().renew_requests.clone()
    }

    /// Event ids across all delivered batches, in order.
    pub fn delivered_event_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .batches
            .iter()
            .flat_map(|(b, _)| b.events.iter().map(|e| e.params.event_id.clone()))
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn init_session(
        &self,
        request: &SessionInitRequest,
    ) -> AnalyticsResult<SessionInitResponse> {
        let mut state = self.state.lock();
        state.init_requests.push(request.clone());
        if state.fail_init {
            return Err(AnalyticsError::Transport("init unavailable".into()));
        }
        state.issued_sessions += 1;
        Ok(SessionInitResponse {
            session_id: format!("session-{}", state.issued_sessions),
            user_id: request
                .user_id
                .clone()
                .unwrap_or_else(|| format!("user-{}", state.issued_sessions)),
            click_id: request.attribution.as_ref().and_then(|a| a.click_id.clone()),
            session_duration_minutes: None,
        })
    }

    async fn renew_session(
        &self,
        request: &SessionRenewalRequest,
    ) -> AnalyticsResult<SessionRenewalResponse> {
        let mut state = self.state.lock();
        state.renew_requests.push(request.clone());
        if state.fail_renew {
            return Err(AnalyticsError::Transport("renew unavailable".into()));
        }
        state.issued_sessions += 1;
        Ok(SessionRenewalResponse {
            session_id: format!("session-{}", state.issued_sessions),
            click_id: None,
            session_duration_minutes: None,
        })
    }

    async fn send_batch(
        &self,
        batch: &TrackBatchRequest,
        delivery: Delivery,
    ) -> AnalyticsResult<TrackEventResponse> {
        let mut state = self.state.lock();
        state.track_attempts += 1;
        if state.track_failures.pop_front().unwrap_or(false) {
            return Err(AnalyticsError::Transport("connection refused".into()));
        }
        state.batches.push((batch.clone(), delivery));
        Ok(TrackEventResponse {
            success: true,
            new_session_id: state.next_new_session_id.take(),
            message: None,
        })
    }
}
