//! Session management — one rolling-expiry session per campaign, persisted in
//! the session cookie and renewed through the analytics API.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use lander_core::types::{
    Attribution, CampaignSettings, SessionData, SessionInitRequest, SessionRenewalRequest,
};
use lander_core::{AnalyticsError, AnalyticsResult};

use crate::clock::Clock;
use crate::cookies::CookieStore;
use crate::transport::Transport;

const COOKIE_GRACE_MINUTES: i64 = 1;

pub struct SessionManager {
    store: CookieStore,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    campaign: CampaignSettings,
    attribution: Mutex<Option<Attribution>>,
    current: watch::Sender<Option<SessionData>>,
    // Serializes network round-trips so concurrent events share one renewal.
    round_trip: tokio::sync::Mutex<()>,
}

impl SessionManager {
    pub fn new(
        store: CookieStore,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        timeout_minutes: u32,
        campaign: CampaignSettings,
    ) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            store,
            transport,
            clock,
            timeout: Duration::minutes(timeout_minutes as i64),
            campaign,
            attribution: Mutex::new(None),
            current,
            round_trip: tokio::sync::Mutex::new(()),
        }
    }

    pub fn campaign(&self) -> &CampaignSettings {
        &self.campaign
    }

    /// Attribution sent along with the next session init.
    pub fn set_attribution(&self, attribution: Option<Attribution>) {
        *self.attribution.lock() = attribution;
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionData>> {
        self.current.subscribe()
    }

    /// Last session published by this manager.
    pub fn current(&self) -> Option<SessionData> {
        self.current.borrow().clone()
    }

    fn timeout_for(&self, session: &SessionData) -> Duration {
        session
            .session_duration_minutes
            .map(|m| Duration::minutes(m as i64))
            .unwrap_or(self.timeout)
    }

    fn is_expired(&self, session: &SessionData, now: DateTime<Utc>) -> bool {
        now - session.last_activity > self.timeout_for(session)
    }

    fn stored_for_campaign(&self, campaign_id: &str) -> Option<SessionData> {
        self.store
            .read_session()
            .filter(|s| s.campaign_id == campaign_id)
    }

    /// Current session id for `campaign_id`, or `None` once expired.
    pub fn get_valid_session_id(&self, campaign_id: &str) -> Option<String> {
        let now = self.clock.now();
        self.stored_for_campaign(campaign_id)
            .filter(|s| !self.is_expired(s, now))
            .map(|s| s.session_id)
    }

    fn persist(&self, session: &SessionData) -> AnalyticsResult<()> {
        // The cookie outlives the timeout so expiry is decided by last activity.
        let ttl = self.timeout_for(session) + Duration::minutes(COOKIE_GRACE_MINUTES);
        self.store.write_session(session, ttl)?;
        self.current.send_replace(Some(session.clone()));
        Ok(())
    }

    fn touch(&self, mut session: SessionData) -> AnalyticsResult<SessionData> {
        session.last_activity = self.clock.now();
        self.persist(&session)?;
        Ok(session)
    }

    fn valid_session(&self) -> Option<SessionData> {
        let now = self.clock.now();
        self.stored_for_campaign(&self.campaign.campaign_id)
            .filter(|s| !self.is_expired(s, now))
    }

    /// Reuse a valid session or obtain a fresh one from the API.
    pub async fn initialize(&self) -> AnalyticsResult<SessionData> {
        let _guard = self.round_trip.lock().await;
        if let Some(session) = self.valid_session() {
            debug!(session_id = %session.session_id, "reusing stored session");
            return self.touch(session);
        }
        self.start_new().await
    }

    async fn start_new(&self) -> AnalyticsResult<SessionData> {
        let request = SessionInitRequest {
            campaign_id: self.campaign.campaign_id.clone(),
            user_id: self.store.read_user_id(),
            landing_page_id: self.campaign.landing_page_id.clone(),
            ab_test_id: self.campaign.ab_test_id.clone(),
            ab_test_variant_id: self.campaign.ab_test_variant_id.clone(),
            attribution: self.attribution.lock().clone(),
        };
        let response = self.transport.init_session(&request).await?;
        if response.session_id.is_empty() {
            return Err(AnalyticsError::Session("empty session id from init".into()));
        }

        self.store.write_user_id(&response.user_id)?;
        let session = SessionData {
            user_id: response.user_id,
            session_id: response.session_id,
            campaign_id: self.campaign.campaign_id.clone(),
            landing_page_id: self.campaign.landing_page_id.clone(),
            ab_test_id: self.campaign.ab_test_id.clone(),
            ab_test_variant_id: self.campaign.ab_test_variant_id.clone(),
            click_id: response.click_id,
            session_duration_minutes: response.session_duration_minutes,
            last_activity: self.clock.now(),
        };
        self.persist(&session)?;
        info!(
            session_id = %session.session_id,
            campaign_id = %session.campaign_id,
            "analytics session started"
        );
        Ok(session)
    }

    /// Roll the active session forward, renewing it if it has expired.
    pub async fn ensure_active(&self) -> AnalyticsResult<SessionData> {
        if let Some(session) = self.valid_session() {
            return self.touch(session);
        }

        let _guard = self.round_trip.lock().await;
        // Another event may have renewed while we waited.
        if let Some(session) = self.valid_session() {
            return self.touch(session);
        }

        let previous = self
            .stored_for_campaign(&self.campaign.campaign_id)
            .or_else(|| self.current());
        let Some(previous) = previous else {
            return self.start_new().await;
        };

        let request = SessionRenewalRequest {
            campaign_id: previous.campaign_id.clone(),
            user_id: previous.user_id.clone(),
            previous_session_id: previous.session_id.clone(),
        };
        match self.transport.renew_session(&request).await {
            Ok(response) => {
                let session = SessionData {
                    session_id: response.session_id,
                    click_id: response.click_id.or(previous.click_id.clone()),
                    session_duration_minutes: response.session_duration_minutes,
                    last_activity: self.clock.now(),
                    ..previous
                };
                self.persist(&session)?;
                info!(session_id = %session.session_id, "analytics session renewed");
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, "session renewal failed, starting a new session");
                self.start_new().await
            }
        }
    }

    /// Switch to a server-issued session id for subsequent events.
    pub fn adopt_session_id(&self, new_session_id: &str) -> AnalyticsResult<()> {
        let base = self
            .stored_for_campaign(&self.campaign.campaign_id)
            .or_else(|| self.current())
            .ok_or_else(|| AnalyticsError::Session("no session to renew".into()))?;
        if base.session_id == new_session_id {
            return Ok(());
        }
        info!(
            old_session_id = %base.session_id,
            new_session_id = %new_session_id,
            "adopting server-issued session"
        );
        let session = SessionData {
            session_id: new_session_id.to_string(),
            last_activity: self.clock.now(),
            ..base
        };
        self.persist(&session)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cookies::MemoryCookieJar;
    use crate::transport::RecordingTransport;
    use lander_core::config::CookieConfig;

    struct Harness {
        clock: Arc<ManualClock>,
        transport: Arc<RecordingTransport>,
        store: CookieStore,
        manager: SessionManager,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::default());
        let transport = Arc::new(RecordingTransport::new());
        let store = CookieStore::new(
            Arc::new(MemoryCookieJar::new(clock.clone())),
            CookieConfig::default(),
        );
        let manager = SessionManager::new(
            store.clone(),
            transport.clone(),
            clock.clone(),
            30,
            CampaignSettings {
                campaign_id: "camp-1".into(),
                landing_page_id: Some("lp-1".into()),
                ..Default::default()
            },
        );
        Harness {
            clock,
            transport,
            store,
            manager,
        }
    }

    #[tokio::test]
    async fn test_initialize_writes_cookies() {
        let h = harness();
        assert!(h.manager.get_valid_session_id("camp-1").is_none());

        let session = h.manager.initialize().await.unwrap();
        assert_eq!(session.session_id, "session-1");
        assert_eq!(h.store.read_user_id().as_deref(), Some("user-1"));
        assert_eq!(
            h.manager.get_valid_session_id("camp-1").as_deref(),
            Some("session-1")
        );
        assert!(h.manager.get_valid_session_id("camp-2").is_none());
        assert_eq!(h.manager.current().unwrap().landing_page_id.as_deref(), Some("lp-1"));

        // A second initialize reuses the stored session
        h.manager.initialize().await.unwrap();
        assert_eq!(h.transport.init_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_rolling_expiry_and_reinitialize() {
        let h = harness();
        h.manager.initialize().await.unwrap();

        // Activity keeps the session alive past the original 30 minutes
        h.clock.advance(Duration::minutes(20));
        h.manager.ensure_active().await.unwrap();
        h.clock.advance(Duration::minutes(20));
        assert_eq!(
            h.manager.get_valid_session_id("camp-1").as_deref(),
            Some("session-1")
        );

        h.clock.advance(Duration::minutes(11));
        assert!(h.manager.get_valid_session_id("camp-1").is_none());

        // A fresh init after expiry keeps the user
        let fresh = h.manager.initialize().await.unwrap();
        assert_eq!(fresh.session_id, "session-2");
        assert_eq!(fresh.user_id, "user-1");
        assert_eq!(h.transport.init_requests()[1].user_id.as_deref(), Some("user-1"));
    }

    #[tokio::test]
    async fn test_session_valid_at_exact_timeout() {
        let h = harness();
        h.manager.initialize().await.unwrap();

        h.clock.advance(Duration::minutes(30));
        assert_eq!(
            h.manager.get_valid_session_id("camp-1").as_deref(),
            Some("session-1")
        );
        let session = h.manager.ensure_active().await.unwrap();
        assert_eq!(session.session_id, "session-1");
        assert!(h.transport.renew_requests().is_empty());

        // One millisecond past the timeout is expired
        h.clock.advance(Duration::minutes(30) + Duration::milliseconds(1));
        assert!(h.manager.get_valid_session_id("camp-1").is_none());
        let renewed = h.manager.ensure_active().await.unwrap();
        assert_eq!(renewed.session_id, "session-2");
        assert_eq!(h.transport.renew_requests().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_active_renews_expired_session() {
        let h = harness();
        let first = h.manager.initialize().await.unwrap();

        // Cookie is still present but the session is stale
        let mut stale = first.clone();
        stale.last_activity = h.clock.now() - Duration::minutes(45);
        h.store.write_session(&stale, Duration::hours(1)).unwrap();

        let renewed = h.manager.ensure_active().await.unwrap();
        assert_eq!(renewed.session_id, "session-2");
        assert_eq!(renewed.user_id, first.user_id);
        let renewals = h.transport.renew_requests();
        assert_eq!(renewals.len(), 1);
        assert_eq!(renewals[0].previous_session_id, "session-1");
    }

    #[tokio::test]
    async fn test_failed_renewal_falls_back_to_init() {
        let h = harness();
        h.manager.initialize().await.unwrap();
        h.transport.set_fail_renew(true);
        h.clock.advance(Duration::minutes(31));

        let session = h.manager.ensure_active().await.unwrap();
        assert_eq!(session.session_id, "session-2");
        assert_eq!(h.transport.init_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_init_failure_surfaces_error() {
        let h = harness();
        h.transport.set_fail_init(true);
        assert!(h.manager.initialize().await.is_err());
        assert!(h.manager.current().is_none());
    }

    #[tokio::test]
    async fn test_adopt_session_id_notifies_subscribers() {
        let h = harness();
        h.manager.initialize().await.unwrap();
        let mut rx = h.manager.subscribe();
        let _ = rx.borrow_and_update();

        h.manager.adopt_session_id("server-7").unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow().as_ref().unwrap().session_id, "server-7");
        assert_eq!(
            h.manager.get_valid_session_id("camp-1").as_deref(),
            Some("server-7")
        );

        // Adopting the active id is a no-op
        let _ = rx.borrow_and_update();
        h.manager.adopt_session_id("server-7").unwrap();
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_server_duration_overrides_timeout() {
        let h = harness();
        let mut session = h.manager.initialize().await.unwrap();
        session.session_duration_minutes = Some(5);
        h.store.write_session(&session, Duration::hours(1)).unwrap();

        h.clock.advance(Duration::minutes(6));
        assert!(h.manager.get_valid_session_id("camp-1").is_none());
    }
}
