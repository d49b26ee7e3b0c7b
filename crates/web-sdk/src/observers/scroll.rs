use lander_core::event_config::SCROLL_THRESHOLD;
use lander_core::types::{EventType, TrackEventParams};

use super::{ObserverContext, PageObserver};
use crate::signals::PageSignal;

const THRESHOLDS: [u8; 4] = [25, 50, 75, 100];

/// Fires once per scroll-depth threshold per page view.
#[derive(Debug, Default)]
pub struct ScrollDepthObserver {
    fired: [bool; 4],
    max_depth: u8,
}

impl ScrollDepthObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }
}

/// Scrolled share of the scrollable range, 0..=100.
pub fn scroll_depth_percent(scroll_top: f64, viewport_height: f64, document_height: f64) -> Option<u8> {
    if !(scroll_top.is_finite() && viewport_height.is_finite() && document_height.is_finite()) {
        return None;
    }
    if document_height <= 0.0 {
        return None;
    }
    let scrollable = document_height - viewport_height;
    if scrollable <= 0.0 {
        return Some(100);
    }
    let pct = (scroll_top.max(0.0) / scrollable * 100.0).clamp(0.0, 100.0);
    Some(pct.round() as u8)
}

impl PageObserver for ScrollDepthObserver {
    fn name(&self) -> &'static str {
        "scroll_threshold"
    }

    fn observe(&mut self, signal: &PageSignal, ctx: &ObserverContext<'_>) -> Vec<TrackEventParams> {
        let PageSignal::Scroll {
            scroll_top,
            viewport_height,
            document_height,
        } = signal
        else {
            return Vec::new();
        };
        let Some(depth) = scroll_depth_percent(*scroll_top, *viewport_height, *document_height)
        else {
            return Vec::new();
        };
        self.max_depth = self.max_depth.max(depth);

        let mut events = Vec::new();
        for (i, threshold) in THRESHOLDS.iter().enumerate() {
            if depth >= *threshold && !self.fired[i] {
                self.fired[i] = true;
                let mut event = TrackEventParams::new(SCROLL_THRESHOLD, EventType::Engagement)
                    .with_page(ctx.page.url.clone());
                event.scroll_percentage = Some(*threshold);
                events.push(event);
            }
        }
        events
    }
}
