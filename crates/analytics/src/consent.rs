//! Consent gating — holds the visitor's consent snapshot and broadcasts
//! changes. Anything unreadable counts as "no consent".

use tokio::sync::watch;
use tracing::{debug, warn};

use lander_core::types::ConsentState;
use lander_core::AnalyticsResult;

use crate::cookies::CookieStore;

/// Parse a consent payload from a host integration; malformed input is denied.
pub fn parse_consent(raw: &str) -> ConsentState {
    match serde_json::from_str::<ConsentState>(raw) {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "malformed consent payload, tracking disallowed");
            ConsentState::denied()
        }
    }
}

pub struct ConsentManager {
    store: Option<CookieStore>,
    state: watch::Sender<ConsentState>,
}

impl ConsentManager {
    /// Start from a fixed snapshot without persistence.
    pub fn new(initial: ConsentState) -> Self {
        let (state, _) = watch::channel(initial);
        Self { store: None, state }
    }

    /// Load the stored consent cookie and persist later updates to it.
    pub fn from_store(store: CookieStore) -> Self {
        let initial = store.read_consent();
        debug!(analytics = initial.allows_analytics(), "consent loaded from cookie");
        let (state, _) = watch::channel(initial);
        Self {
            store: Some(store),
            state,
        }
    }

    pub fn snapshot(&self) -> ConsentState {
        *self.state.borrow()
    }

    pub fn allows_analytics(&self) -> bool {
        self.snapshot().allows_analytics()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConsentState> {
        self.state.subscribe()
    }

    pub fn update(&self, consent: ConsentState) -> AnalyticsResult<()> {
        if let Some(store) = &self.store {
            store.write_consent(&consent)?;
        }
        let previous = self.state.send_replace(consent);
        if previous.allows_analytics() != consent.allows_analytics() {
            debug!(analytics = consent.allows_analytics(), "analytics consent changed");
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cookies::MemoryCookieJar;
    use lander_core::config::CookieConfig;
    use std::sync::Arc;

    #[test]
    fn test_parse_consent_fails_closed() {
        assert_eq!(parse_consent("garbage"), ConsentState::denied());
        assert_eq!(parse_consent("[1,2]"), ConsentState::denied());
        assert!(parse_consent(r#"{"analytics":true,"shouldTrack":true}"#).allows_analytics());
    }

    #[test]
    fn test_update_persists_and_broadcasts() {
        let clock = Arc::new(ManualClock::default());
        let store = CookieStore::new(
            Arc::new(MemoryCookieJar::new(clock)),
            CookieConfig::default(),
        );
        let manager = ConsentManager::from_store(store.clone());
        assert!(!manager.allows_analytics());

        let mut rx = manager.subscribe();
        manager.update(ConsentState::granted()).unwrap();
        assert!(rx.has_changed().unwrap());
        assert!(rx.borrow_and_update().allows_analytics());
        assert!(store.read_consent().allows_analytics());

        // A new manager over the same cookies picks up the stored choice
        assert!(ConsentManager::from_store(store).allows_analytics());
    }
}
