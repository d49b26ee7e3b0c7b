//! Analytics provider — the binding a host page talks to. Wires cookies,
//! session, consent, batching and the default observers together and
//! exposes `track_event` plus a context snapshot that follows session
//! renewals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use lander_analytics::attribution::{capture_first_touch, parse_attribution};
use lander_analytics::{
    BatchSettings, BatchTracker, Clock, ConsentManager, CookieJar, CookieStore, FlushReport,
    HttpTransport, MemoryCookieJar, SessionManager, SystemClock, Transport,
};
use lander_core::types::{CampaignSettings, ConsentState, TrackEventParams};
use lander_core::{AnalyticsConfig, AnalyticsError, AnalyticsResult, EventCatalog, MergeInput};

use crate::observers::{attach_default_observers, Disposer, ObserverRegistry};
use crate::signals::{PageContext, PageSignal};

/// What the host sees of the SDK.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyticsContext {
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub is_initialized: bool,
    pub debug: bool,
}

struct PageState {
    page: PageContext,
    registry: Option<ObserverRegistry>,
    disposers: Vec<Disposer>,
}

struct FlushLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct AnalyticsProviderBuilder {
    config: AnalyticsConfig,
    campaign: CampaignSettings,
    transport: Option<Arc<dyn Transport>>,
    jar: Option<Arc<dyn CookieJar>>,
    clock: Option<Arc<dyn Clock>>,
    consent: Option<ConsentState>,
}

impl AnalyticsProviderBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cookie_jar(mut self, jar: Arc<dyn CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Fixed consent snapshot instead of the consent cookie.
    pub fn consent(mut self, consent: ConsentState) -> Self {
        self.consent = Some(consent);
        self
    }

    pub fn build(self) -> AnalyticsResult<AnalyticsProvider> {
        if self.campaign.campaign_id.is_empty() {
            return Err(AnalyticsError::Config("campaign_id is required".into()));
        }
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&self.config)?),
        };
        let jar = self
            .jar
            .unwrap_or_else(|| Arc::new(MemoryCookieJar::new(clock.clone())));
        let store = CookieStore::new(jar, self.config.cookies.clone());
        let consent = match self.consent {
            Some(fixed) => ConsentManager::new(fixed),
            None => ConsentManager::from_store(store.clone()),
        };

        let catalog = EventCatalog::from_merge(&MergeInput {
            primary_goal: self.campaign.primary_goal.as_ref(),
            custom_events: &self.campaign.custom_events,
            default_events: self.config.default_events,
        });

        let sessions = Arc::new(SessionManager::new(
            store.clone(),
            transport.clone(),
            clock.clone(),
            self.config.session.timeout_minutes,
            self.campaign.clone(),
        ));
        let tracker = Arc::new(
            BatchTracker::new(BatchSettings::from(&self.config.batch), transport, clock.clone())
                .with_session_manager(sessions.clone())
                .with_workspace(
                    self.campaign.workspace_id.clone(),
                    self.campaign.project_id.clone(),
                ),
        );

        let (context, _) = watch::channel(AnalyticsContext {
            debug: self.config.debug,
            ..Default::default()
        });

        Ok(AnalyticsProvider {
            config: self.config,
            clock,
            store,
            sessions,
            tracker,
            consent,
            catalog,
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
            context: Arc::new(context),
            page: Mutex::new(None),
            flush_loop: Mutex::new(None),
        })
    }
}

pub struct AnalyticsProvider {
    config: AnalyticsConfig,
    clock: Arc<dyn Clock>,
    store: CookieStore,
    sessions: Arc<SessionManager>,
    tracker: Arc<BatchTracker>,
    consent: ConsentManager,
    catalog: EventCatalog,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
    context: Arc<watch::Sender<AnalyticsContext>>,
    page: Mutex<Option<PageState>>,
    flush_loop: Mutex<Option<FlushLoop>>,
}

impl AnalyticsProvider {
    pub fn builder(config: AnalyticsConfig, campaign: CampaignSettings) -> AnalyticsProviderBuilder {
        AnalyticsProviderBuilder {
            config,
            campaign,
            transport: None,
            jar: None,
            clock: None,
            consent: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn catalog(&self) -> &EventCatalog {
        &self.catalog
    }

    pub fn tracker(&self) -> &Arc<BatchTracker> {
        &self.tracker
    }

    pub fn context(&self) -> AnalyticsContext {
        let session = self.sessions.current();
        AnalyticsContext {
            session_id: session.as_ref().map(|s| s.session_id.clone()),
            user_id: session
                .map(|s| s.user_id)
                .or_else(|| self.store.read_user_id()),
            is_initialized: self.is_initialized(),
            debug: self.config.debug,
        }
    }

    /// Context snapshots, republished on init and session renewal.
    pub fn subscribe(&self) -> watch::Receiver<AnalyticsContext> {
        self.context.subscribe()
    }

    fn publish_context(&self) {
        let next = self.context();
        self.context.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn report_failure(&self, what: &str, error: &AnalyticsError) {
        if self.config.debug {
            warn!(error = %error, "{}", what);
        } else {
            debug!(error = %error, "{}", what);
        }
    }

    fn tracking_allowed(&self) -> bool {
        self.config.enabled && self.consent.allows_analytics()
    }

    /// Start a session for `page` and attach the default observers.
    ///
    /// Returns false and leaves tracking disabled when analytics is turned
    /// off, consent is missing, or the session cannot be obtained. It may be
    /// called again later, e.g. after consent is granted.
    pub async fn initialize(&self, page: PageContext) -> bool {
        if self.is_initialized() {
            return true;
        }
        let _init = self.init_lock.lock().await;
        if self.is_initialized() {
            return true;
        }
        {
            let mut state = self.page.lock();
            if state.is_none() {
                *state = Some(PageState {
                    page: page.clone(),
                    registry: None,
                    disposers: Vec::new(),
                });
            }
        }
        if !self.tracking_allowed() {
            debug!(enabled = self.config.enabled, "analytics not initialized: tracking disallowed");
            return false;
        }

        let candidate = parse_attribution(&page.url, page.referrer.as_deref(), self.clock.now());
        self.sessions
            .set_attribution(capture_first_touch(&self.store, candidate));

        if let Err(e) = self.sessions.initialize().await {
            self.report_failure("analytics initialization failed", &e);
            return false;
        }
        self.initialized.store(true, Ordering::Release);
        self.publish_context();
        self.spawn_context_forwarder();

        let registry = ObserverRegistry::new(page.clone(), self.clock.clone());
        let attached = attach_default_observers(&registry, &self.config.default_events);
        {
            let mut state = self.page.lock();
            *state = Some(PageState {
                page,
                registry: Some(registry),
                disposers: attached.disposers,
            });
        }
        info!(
            campaign_id = %self.sessions.campaign().campaign_id,
            skipped_observers = attached.skipped.len(),
            "analytics initialized"
        );

        for event in attached.initial_events {
            self.track_event(event).await;
        }
        true
    }

    fn spawn_context_forwarder(&self) {
        let mut sessions = self.sessions.subscribe();
        let context = self.context.clone();
        tokio::spawn(async move {
            while sessions.changed().await.is_ok() {
                let session = sessions.borrow_and_update().clone();
                let Some(session) = session else {
                    continue;
                };
                context.send_if_modified(|current| {
                    let changed = current.session_id.as_deref() != Some(session.session_id.as_str())
                        || current.user_id.as_deref() != Some(session.user_id.as_str());
                    if changed {
                        current.session_id = Some(session.session_id.clone());
                        current.user_id = Some(session.user_id.clone());
                    }
                    changed
                });
            }
        });
    }

    /// Queue one event. Returns false when the event was not accepted.
    pub async fn track_event(&self, mut params: TrackEventParams) -> bool {
        if !self.is_initialized() || !self.tracking_allowed() {
            return false;
        }
        self.catalog.apply(&mut params);
        if params.page_url.is_none() {
            params.page_url = self.page.lock().as_ref().map(|p| p.page.url.clone());
        }

        let session = match self.sessions.ensure_active().await {
            Ok(session) => session,
            Err(e) => {
                self.report_failure("no active analytics session, event discarded", &e);
                return false;
            }
        };
        self.tracker.track(params, &session).await;
        self.publish_context();
        true
    }

    /// Route a page signal through the attached observers.
    /// Returns how many events were tracked.
    pub async fn handle_signal(&self, signal: PageSignal) -> usize {
        if matches!(signal, PageSignal::Unload) {
            return self.unload().await;
        }
        let events = self.dispatch(&signal);
        let mut tracked = 0;
        for event in events {
            if self.track_event(event).await {
                tracked += 1;
            }
        }
        tracked
    }

    fn dispatch(&self, signal: &PageSignal) -> Vec<TrackEventParams> {
        let state = self.page.lock();
        state
            .as_ref()
            .and_then(|p| p.registry.as_ref())
            .map(|r| r.dispatch(signal))
            .unwrap_or_default()
    }

    /// Page teardown: record time on page, detach observers and send what is
    /// left. Returns how many events were tracked from the unload itself.
    pub async fn unload(&self) -> usize {
        let events = self.dispatch(&PageSignal::Unload);
        let mut tracked = 0;
        for event in events {
            if self.track_event(event).await {
                tracked += 1;
            }
        }
        if let Some(state) = self.page.lock().as_mut() {
            state.disposers.clear();
        }
        self.stop_flush_loop();
        let report = self.tracker.flush_on_unload().await;
        debug!(sent = report.sent, dropped = report.dropped, "unload flush complete");
        tracked
    }

    pub async fn flush(&self) -> FlushReport {
        let report = self.tracker.flush().await;
        self.publish_context();
        report
    }

    /// Apply new consent. Granting it initializes a pending page; revoking it
    /// discards queued events.
    pub async fn update_consent(&self, consent: ConsentState) -> bool {
        if let Err(e) = self.consent.update(consent) {
            self.report_failure("failed to persist consent", &e);
        }
        if !consent.allows_analytics() {
            let discarded = self.tracker.clear();
            debug!(discarded = discarded, "analytics consent revoked");
            return false;
        }
        if self.is_initialized() {
            return true;
        }
        let pending = self.page.lock().as_ref().map(|p| p.page.clone());
        match pending {
            Some(page) => self.initialize(page).await,
            None => false,
        }
    }

    /// Run time-based flushes in the background until unload.
    pub fn spawn_flush_loop(&self) {
        let mut slot = self.flush_loop.lock();
        if slot.is_some() {
            return;
        }
        let (shutdown, rx) = watch::channel(false);
        let handle = self.tracker.clone().spawn_flush_loop(rx);
        *slot = Some(FlushLoop { shutdown, handle });
    }

    fn stop_flush_loop(&self) {
        if let Some(flush_loop) = self.flush_loop.lock().take() {
            let _ = flush_loop.shutdown.send(true);
            drop(flush_loop.handle);
        }
    }
}

impl Drop for AnalyticsProvider {
    fn drop(&mut self) {
        if let Some(flush_loop) = self.flush_loop.get_mut().take() {
            flush_loop.handle.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use lander_analytics::{ManualClock, RecordingTransport};
    use lander_core::event_config::{FORM_SUBMISSION, PAGE_VIEW};
    use lander_core::types::{EventConfig, EventType, EventValueType};

    struct Harness {
        provider: AnalyticsProvider,
        transport: Arc<RecordingTransport>,
        clock: Arc<ManualClock>,
    }

    fn campaign() -> CampaignSettings {
        CampaignSettings {
            campaign_id: "camp-1".into(),
            workspace_id: Some("ws-1".into()),
            project_id: Some("proj-1".into()),
            landing_page_id: Some("lp-1".into()),
            primary_goal: Some(EventConfig {
                event_id: FORM_SUBMISSION.into(),
                event_type: EventType::Conversion,
                event_value: Some(49.0),
                event_value_type: EventValueType::Static,
                is_custom: false,
                label: None,
            }),
            ..Default::default()
        }
    }

    fn harness(config: AnalyticsConfig, consent: ConsentState) -> Harness {
        let transport = Arc::new(RecordingTransport::new());
        let clock = Arc::new(ManualClock::default());
        let provider = AnalyticsProvider::builder(config, campaign())
            .transport(transport.clone())
            .clock(clock.clone())
            .consent(consent)
            .build()
            .unwrap();
        Harness {
            provider,
            transport,
            clock,
        }
    }

    fn page() -> PageContext {
        PageContext::new("https://go.example.com/spring?utm_source=newsletter")
    }

    #[tokio::test]
    async fn test_track_before_initialize_is_rejected() {
        let h = harness(AnalyticsConfig::default(), ConsentState::granted());
        let accepted = h
            .provider
            .track_event(TrackEventParams::new("cta-click", EventType::Engagement))
            .await;
        assert!(!accepted);
        assert!(!h.provider.context().is_initialized);
    }

    #[tokio::test]
    async fn test_initialize_tracks_page_view() {
        let h = harness(AnalyticsConfig::default(), ConsentState::granted());
        assert!(h.provider.initialize(page()).await);

        let context = h.provider.context();
        assert!(context.is_initialized);
        assert_eq!(context.session_id.as_deref(), Some("session-1"));
        assert_eq!(context.user_id.as_deref(), Some("user-1"));

        let init = &h.transport.init_requests()[0];
        assert_eq!(
            init.attribution.as_ref().unwrap().utm_source.as_deref(),
            Some("newsletter")
        );

        h.clock.advance_ms(100);
        h.provider.tracker().poll().await;
        let batches = h.transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].events[0].params.event_id, PAGE_VIEW);
        assert_eq!(batches[0].workspace_id.as_deref(), Some("ws-1"));
    }

    #[tokio::test]
    async fn test_concurrent_initialize_runs_once() {
        let h = harness(AnalyticsConfig::default(), ConsentState::granted());
        let (a, b) = tokio::join!(h.provider.initialize(page()), h.provider.initialize(page()));
        assert!(a && b);
        assert_eq!(h.transport.init_requests().len(), 1);
        // One page view, one set of observers
        assert_eq!(h.provider.tracker().queued_count(), 1);
        assert_eq!(
            h.provider
                .handle_signal(PageSignal::FormSubmit {
                    form: crate::signals::FormInfo::default(),
                })
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_consent_denied_makes_no_network_call() {
        let h = harness(AnalyticsConfig::default(), ConsentState::denied());
        assert!(!h.provider.initialize(page()).await);
        assert!(
            !h.provider
                .track_event(TrackEventParams::new("cta-click", EventType::Engagement))
                .await
        );
        h.provider.flush().await;
        assert!(h.transport.init_requests().is_empty());
        assert_eq!(h.transport.track_attempts(), 0);
    }

    #[tokio::test]
    async fn test_disabled_provider_rejects_events() {
        let config = AnalyticsConfig {
            enabled: false,
            ..Default::default()
        };
        let h = harness(config, ConsentState::granted());
        assert!(!h.provider.initialize(page()).await);
        assert!(h.transport.init_requests().is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_disables_tracking() {
        let h = harness(AnalyticsConfig::default(), ConsentState::granted());
        h.transport.set_fail_init(true);
        assert!(!h.provider.initialize(page()).await);
        assert!(
            !h.provider
                .track_event(TrackEventParams::new("cta-click", EventType::Engagement))
                .await
        );
    }

    #[tokio::test]
    async fn test_form_signal_uses_goal_value() {
        let h = harness(AnalyticsConfig::default(), ConsentState::granted());
        h.provider.initialize(page()).await;
        let tracked = h
            .provider
            .handle_signal(PageSignal::FormSubmit {
                form: crate::signals::FormInfo {
                    id: Some("lead".into()),
                    ..Default::default()
                },
            })
            .await;
        assert_eq!(tracked, 1);
        h.provider.flush().await;

        let events: Vec<_> = h
            .transport
            .batches()
            .into_iter()
            .flat_map(|b| b.events)
            .collect();
        let form = events
            .iter()
            .find(|e| e.params.event_id == FORM_SUBMISSION)
            .unwrap();
        assert_eq!(form.params.event_value, Some(49.0));
        assert_eq!(form.params.form_id.as_deref(), Some("lead"));
    }

    #[tokio::test]
    async fn test_granting_consent_initializes_pending_page() {
        let h = harness(AnalyticsConfig::default(), ConsentState::denied());
        assert!(!h.provider.initialize(page()).await);
        assert!(h.provider.update_consent(ConsentState::granted()).await);
        assert!(h.provider.is_initialized());

        // Revoking drops what is queued and blocks new events
        assert!(!h.provider.update_consent(ConsentState::denied()).await);
        assert_eq!(h.provider.tracker().queued_count(), 0);
        assert!(
            !h.provider
                .track_event(TrackEventParams::new("cta-click", EventType::Engagement))
                .await
        );
    }

    #[tokio::test]
    async fn test_renewed_session_reaches_subscribers() {
        let h = harness(AnalyticsConfig::default(), ConsentState::granted());
        h.provider.initialize(page()).await;
        let mut rx = h.provider.subscribe();

        h.transport.respond_with_new_session("session-renewed");
        h.provider.flush().await;

        assert_eq!(
            h.provider.context().session_id.as_deref(),
            Some("session-renewed")
        );
        rx.wait_for(|c| c.session_id.as_deref() == Some("session-renewed"))
            .await
            .unwrap();

        // Events after renewal carry the new id
        h.provider
            .track_event(TrackEventParams::new("cta-click", EventType::Engagement))
            .await;
        h.provider.flush().await;
        let last = h.transport.batches().pop().unwrap();
        assert_eq!(last.session_id, "session-renewed");
    }

    #[tokio::test]
    async fn test_unload_reports_time_on_page() {
        let h = harness(AnalyticsConfig::default(), ConsentState::granted());
        h.provider.initialize(page()).await;
        h.clock.advance_ms(42_000);

        assert_eq!(h.provider.handle_signal(PageSignal::Unload).await, 1);
        let events: Vec<_> = h
            .transport
            .batches()
            .into_iter()
            .flat_map(|b| b.events)
            .collect();
        let time = events.iter().find(|e| e.params.time_on_page_ms.is_some()).unwrap();
        assert_eq!(time.params.time_on_page_ms, Some(42_000));
        assert!(h
            .transport
            .deliveries()
            .iter()
            .all(|d| *d == lander_analytics::Delivery::Unload));
    }
}
