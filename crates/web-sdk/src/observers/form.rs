use lander_core::event_config::FORM_SUBMISSION;
use lander_core::types::{EventType, TrackEventParams};

use super::{ObserverContext, PageObserver};
use crate::signals::{FormInfo, PageSignal};

/// Reports native form submissions.
#[derive(Debug, Default)]
pub struct FormSubmissionObserver;

impl FormSubmissionObserver {
    pub fn new() -> Self {
        Self
    }
}

/// Best-effort identifier: id, then name, then action.
pub fn form_identifier(form: &FormInfo) -> String {
    [&form.id, &form.name, &form.action]
        .into_iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or("unknown-form")
        .to_string()
}

impl PageObserver for FormSubmissionObserver {
    fn name(&self) -> &'static str {
        "form_submission"
    }

    fn observe(&mut self, signal: &PageSignal, ctx: &ObserverContext<'_>) -> Vec<TrackEventParams> {
        let PageSignal::FormSubmit { form } = signal else {
            return Vec::new();
        };
        let mut event = TrackEventParams::new(FORM_SUBMISSION, EventType::Conversion)
            .with_page(ctx.page.url.clone())
            .with_metadata("field_count", serde_json::json!(form.field_count));
        event.form_id = Some(form_identifier(form));
        event.form_name = form.name.clone();
        vec![event]
    }
}
