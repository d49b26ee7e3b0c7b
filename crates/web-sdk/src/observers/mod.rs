//! Default page observers — turn [`PageSignal`]s into tracked events.
//!
//! Each observer is attached through an [`ObserverRegistry`] and stays
//! attached for as long as its [`Disposer`] lives.
//! [`attach_default_observers`] attaches every observer enabled in
//! [`DefaultEventsConfig`]; one that cannot attach is skipped.

pub mod form;
pub mod outbound;
pub mod page;
pub mod scroll;

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use lander_analytics::Clock;
use lander_core::config::DefaultEventsConfig;
use lander_core::types::TrackEventParams;

use crate::signals::{PageContext, PageSignal};

pub use form::FormSubmissionObserver;
pub use outbound::OutboundLinkObserver;
pub use page::{PageViewObserver, TimeOnPageObserver};
pub use scroll::ScrollDepthObserver;

#[derive(Error, Debug)]
pub enum ObserverError {
    #[error("page url {0:?} cannot be resolved")]
    InvalidPageUrl(String),
}

/// What an observer sees alongside each signal.
pub struct ObserverContext<'a> {
    pub page: &'a PageContext,
    pub now: DateTime<Utc>,
}

pub trait PageObserver: Send {
    fn name(&self) -> &'static str;

    /// Events emitted at attach time.
    fn on_attach(&mut self, _ctx: &ObserverContext<'_>) -> Vec<TrackEventParams> {
        Vec::new()
    }

    fn observe(&mut self, signal: &PageSignal, ctx: &ObserverContext<'_>) -> Vec<TrackEventParams>;
}

struct Registered {
    id: u64,
    observer: Box<dyn PageObserver>,
}

struct RegistryInner {
    next_id: u64,
    observers: Vec<Registered>,
}

/// Observers attached to one page view.
#[derive(Clone)]
pub struct ObserverRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    page: Arc<PageContext>,
    clock: Arc<dyn Clock>,
}

impl ObserverRegistry {
    pub fn new(page: PageContext, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                next_id: 0,
                observers: Vec::new(),
            })),
            page: Arc::new(page),
            clock,
        }
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    /// Attach `observer`, returning its disposer and any attach-time events.
    pub fn attach(&self, mut observer: Box<dyn PageObserver>) -> (Disposer, Vec<TrackEventParams>) {
        let ctx = ObserverContext {
            page: &self.page,
            now: self.clock.now(),
        };
        let initial = observer.on_attach(&ctx);
        let name = observer.name();

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.observers.push(Registered { id, observer });
        debug!(observer = name, id = id, "page observer attached");

        (
            Disposer {
                id,
                name,
                registry: Arc::downgrade(&self.inner),
            },
            initial,
        )
    }

    pub fn attached_count(&self) -> usize {
        self.inner.lock().observers.len()
    }

    /// Route a signal through every attached observer, in attach order.
    pub fn dispatch(&self, signal: &PageSignal) -> Vec<TrackEventParams> {
        let ctx = ObserverContext {
            page: &self.page,
            now: self.clock.now(),
        };
        let mut inner = self.inner.lock();
        inner
            .observers
            .iter_mut()
            .flat_map(|r| r.observer.observe(signal, &ctx))
            .collect()
    }
}

/// Keeps an observer attached; dropping it detaches the observer.
#[must_use = "dropping a Disposer detaches its observer"]
pub struct Disposer {
    id: u64,
    name: &'static str,
    registry: Weak<Mutex<RegistryInner>>,
}

impl Disposer {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn dispose(self) {}
}

impl Drop for Disposer {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.lock().observers.retain(|r| r.id != self.id);
            debug!(observer = self.name, id = self.id, "page observer detached");
        }
    }
}

/// Result of [`attach_default_observers`].
pub struct AttachedObservers {
    pub disposers: Vec<Disposer>,
    pub initial_events: Vec<TrackEventParams>,
    pub skipped: Vec<&'static str>,
}

/// Attach all observers enabled in `toggles`.
pub fn attach_default_observers(
    registry: &ObserverRegistry,
    toggles: &DefaultEventsConfig,
) -> AttachedObservers {
    let page = registry.page().clone();
    let loaded_at = registry.clock.now();

    let mut candidates: Vec<(&'static str, Result<Box<dyn PageObserver>, ObserverError>)> =
        Vec::new();
    if toggles.page_view {
        candidates.push(("page_view", Ok(Box::new(PageViewObserver::new()))));
    }
    if toggles.scroll_threshold {
        candidates.push(("scroll_threshold", Ok(Box::new(ScrollDepthObserver::new()))));
    }
    if toggles.external_link_click {
        candidates.push((
            "external_link_click",
            OutboundLinkObserver::new(&page).map(|o| Box::new(o) as Box<dyn PageObserver>),
        ));
    }
    if toggles.form_submission {
        candidates.push(("form_submission", Ok(Box::new(FormSubmissionObserver::new()))));
    }
    if toggles.time_on_page {
        candidates.push(("time_on_page", Ok(Box::new(TimeOnPageObserver::new(loaded_at)))));
    }

    let mut attached = AttachedObservers {
        disposers: Vec::new(),
        initial_events: Vec::new(),
        skipped: Vec::new(),
    };
    for (name, candidate) in candidates {
        match candidate {
            Ok(observer) => {
                let (disposer, initial) = registry.attach(observer);
                attached.disposers.push(disposer);
                attached.initial_events.extend(initial);
            }
            Err(e) => {
                warn!(observer = name, error = %e, "skipping page observer");
                attached.skipped.push(name);
            }
        }
    }
    attached
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::signals::{ElementInfo, FormInfo};
    use lander_analytics::ManualClock;
    use lander_core::event_config::{EXTERNAL_LINK_CLICK, FORM_SUBMISSION, PAGE_VIEW};

    fn registry(url: &str) -> ObserverRegistry {
        ObserverRegistry::new(PageContext::new(url), Arc::new(ManualClock::default()))
    }

    fn outbound_click() -> PageSignal {
        PageSignal::Click {
            element: ElementInfo {
                tag: "a".into(),
                href: Some("https://partner.io/pricing".into()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_attach_all_defaults() {
        let registry = registry("https://go.example.com/offer");
        let attached = attach_default_observers(&registry, &DefaultEventsConfig::all());
        assert_eq!(attached.disposers.len(), 5);
        assert!(attached.skipped.is_empty());
        assert_eq!(attached.initial_events.len(), 1);
        assert_eq!(attached.initial_events[0].event_id, PAGE_VIEW);

        let events = registry.dispatch(&outbound_click());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, EXTERNAL_LINK_CLICK);
    }

    #[test]
    fn test_disposer_detaches() {
        let registry = registry("https://go.example.com/offer");
        let mut attached = attach_default_observers(&registry, &DefaultEventsConfig::all());
        assert_eq!(registry.attached_count(), 5);

        let outbound = attached
            .disposers
            .iter()
            .position(|d| d.name() == "external_link_click")
            .unwrap();
        attached.disposers.remove(outbound).dispose();
        assert_eq!(registry.attached_count(), 4);
        assert!(registry.dispatch(&outbound_click()).is_empty());

        drop(attached);
        assert_eq!(registry.attached_count(), 0);
    }

    #[test]
    fn test_failed_observer_is_skipped() {
        let registry = registry("about:blank");
        let attached = attach_default_observers(&registry, &DefaultEventsConfig::all());
        assert_eq!(attached.skipped, vec!["external_link_click"]);
        assert_eq!(attached.disposers.len(), 4);

        let events = registry.dispatch(&PageSignal::FormSubmit {
            form: FormInfo {
                id: Some("signup".into()),
                ..Default::default()
            },
        });
        assert_eq!(events[0].event_id, FORM_SUBMISSION);
    }

    #[test]
    fn test_toggles_limit_observers() {
        let registry = registry("https://go.example.com/");
        let toggles = DefaultEventsConfig {
            form_submission: true,
            ..DefaultEventsConfig::none()
        };
        let attached = attach_default_observers(&registry, &toggles);
        assert_eq!(attached.disposers.len(), 1);
        assert!(attached.initial_events.is_empty());
    }
}
