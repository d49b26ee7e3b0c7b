use url::Url;

use lander_core::event_config::EXTERNAL_LINK_CLICK;
use lander_core::types::{EventType, TrackEventParams};

use super::{ObserverContext, ObserverError, PageObserver};
use crate::signals::{PageContext, PageSignal};

/// Reports clicks on links leaving the page's host. Navigation is never held.
#[derive(Debug)]
pub struct OutboundLinkObserver {
    page_url: Url,
}

impl OutboundLinkObserver {
    pub fn new(page: &PageContext) -> Result<Self, ObserverError> {
        let page_url =
            Url::parse(&page.url).map_err(|_| ObserverError::InvalidPageUrl(page.url.clone()))?;
        if !is_web(&page_url) || page_url.host_str().is_none() {
            return Err(ObserverError::InvalidPageUrl(page.url.clone()));
        }
        Ok(Self { page_url })
    }

    /// Resolved destination when `href` leaves the page's host.
    pub fn outbound_destination(&self, href: &str) -> Option<Url> {
        let destination = self.page_url.join(href.trim()).ok()?;
        if !is_web(&destination) {
            return None;
        }
        let same_host = destination.host_str() == self.page_url.host_str()
            && destination.port_or_known_default() == self.page_url.port_or_known_default();
        (!same_host).then_some(destination)
    }
}

fn is_web(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

impl PageObserver for OutboundLinkObserver {
    fn name(&self) -> &'static str {
        "external_link_click"
    }

    fn observe(&mut self, signal: &PageSignal, ctx: &ObserverContext<'_>) -> Vec<TrackEventParams> {
        let PageSignal::Click { element } = signal else {
            return Vec::new();
        };
        let Some(destination) = element.href.as_deref().and_then(|h| self.outbound_destination(h))
        else {
            return Vec::new();
        };

        let mut event = TrackEventParams::new(EXTERNAL_LINK_CLICK, EventType::Engagement)
            .with_page(ctx.page.url.clone());
        event.clicked_element = Some(element.selector());
        event.destination_url = Some(destination.to_string());
        if let Some(text) = element.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            event = event.with_metadata("link_text", serde_json::json!(text));
        }
        vec![event]
    }
}
