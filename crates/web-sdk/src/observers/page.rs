use chrono::{DateTime, Utc};

use lander_core::event_config::{PAGE_VIEW, TIME_ON_PAGE};
use lander_core::types::{EventType, TrackEventParams};

use super::{ObserverContext, PageObserver};
use crate::signals::PageSignal;

/// Emits one page view when attached.
#[derive(Debug, Default)]
pub struct PageViewObserver;

impl PageViewObserver {
    pub fn new() -> Self {
        Self
    }
}

impl PageObserver for PageViewObserver {
    fn name(&self) -> &'static str {
        "page_view"
    }

    fn on_attach(&mut self, ctx: &ObserverContext<'_>) -> Vec<TrackEventParams> {
        let mut event =
            TrackEventParams::new(PAGE_VIEW, EventType::Engagement).with_page(ctx.page.url.clone());
        event.referrer = ctx.page.referrer.clone();
        if let Some(title) = &ctx.page.title {
            event = event.with_metadata("title", serde_json::json!(title));
        }
        vec![event]
    }

    fn observe(&mut self, _signal: &PageSignal, _ctx: &ObserverContext<'_>) -> Vec<TrackEventParams> {
        Vec::new()
    }
}

/// Reports elapsed time since page load when the page is hidden or unloaded.
/// A hide followed directly by unload reports once.
#[derive(Debug)]
pub struct TimeOnPageObserver {
    loaded_at: DateTime<Utc>,
    pending: bool,
}

impl TimeOnPageObserver {
    pub fn new(loaded_at: DateTime<Utc>) -> Self {
        Self {
            loaded_at,
            pending: true,
        }
    }

    fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.loaded_at).num_milliseconds().max(0) as u64
    }
}

impl PageObserver for TimeOnPageObserver {
    fn name(&self) -> &'static str {
        "time_on_page"
    }

    fn observe(&mut self, signal: &PageSignal, ctx: &ObserverContext<'_>) -> Vec<TrackEventParams> {
        match signal {
            PageSignal::Hidden | PageSignal::Unload => {
                if !self.pending {
                    return Vec::new();
                }
                self.pending = false;
                let mut event = TrackEventParams::new(TIME_ON_PAGE, EventType::System)
                    .with_page(ctx.page.url.clone());
                event.time_on_page_ms = Some(self.elapsed_ms(ctx.now));
                vec![event]
            }
            _ => {
                // Interaction means the visitor is back on the page.
                self.pending = true;
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{FormInfo, PageContext};
    use chrono::Duration;

    fn ctx(page: &PageContext, now: DateTime<Utc>) -> ObserverContext<'_> {
        ObserverContext { page, now }
    }

    #[test]
    fn test_time_on_page_measured_at_signal() {
        let loaded = Utc::now();
        let page = PageContext::new("https://go.example.com/");
        let mut observer = TimeOnPageObserver::new(loaded);

        let at = |secs: i64| loaded + Duration::seconds(secs);

        let events = observer.observe(&PageSignal::Hidden, &ctx(&page, at(12)));
        assert_eq!(events[0].time_on_page_ms, Some(12_000));
        assert!(observer.observe(&PageSignal::Unload, &ctx(&page, at(13))).is_empty());

        observer.observe(
            &PageSignal::FormSubmit {
                form: FormInfo::default(),
            },
            &ctx(&page, at(40)),
        );
        let events = observer.observe(&PageSignal::Unload, &ctx(&page, at(45)));
        assert_eq!(events[0].time_on_page_ms, Some(45_000));
    }

    #[test]
    fn test_page_view_carries_referrer() {
        let page = PageContext {
            url: "https://go.example.com/".into(),
            title: Some("Spring offer".into()),
            referrer: Some("https://news.ycombinator.com/".into()),
        };
        let ctx = ObserverContext {
            page: &page,
            now: Utc::now(),
        };
        let events = PageViewObserver::new().on_attach(&ctx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].referrer.as_deref(), Some("https://news.ycombinator.com/"));
        assert_eq!(events[0].metadata["title"], "Spring offer");
    }
}
