use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ─── Events ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Conversion,
    Engagement,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventValueType {
    /// Value fixed by the campaign configuration.
    #[default]
    Static,
    /// Value supplied by the page at track time.
    Dynamic,
}

/// One discrete tracked event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackEventParams {
    pub event_id: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_value_type: Option<EventValueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clicked_element: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scroll_percentage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_on_page_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TrackEventParams {
    pub fn new(event_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            event_id: event_id.into(),
            event_type,
            event_value: None,
            currency: None,
            event_value_type: None,
            form_id: None,
            form_name: None,
            clicked_element: None,
            destination_url: None,
            scroll_percentage: None,
            time_on_page_ms: None,
            page_url: None,
            referrer: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_value(mut self, value: f64, currency: impl Into<String>) -> Self {
        self.event_value = Some(value);
        self.currency = Some(currency.into());
        self.event_value_type = Some(EventValueType::Dynamic);
        self
    }

    pub fn with_page(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = Some(page_url.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Declarative description of a trackable goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventConfig {
    pub event_id: String,
    pub event_type: EventType,
    #[serde(default)]
    pub event_value: Option<f64>,
    #[serde(default)]
    pub event_value_type: EventValueType,
    #[serde(default, rename = "isCustom", alias = "is_custom")]
    pub is_custom: bool,
    #[serde(default)]
    pub label: Option<String>,
}

// ─── Session & consent ──────────────────────────────────────────────────

/// Visitor session bound to one campaign. Persisted in the session cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: String,
    pub session_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub landing_page_id: Option<String>,
    #[serde(default)]
    pub ab_test_id: Option<String>,
    #[serde(default)]
    pub ab_test_variant_id: Option<String>,
    #[serde(default)]
    pub click_id: Option<String>,
    /// Server-issued session length; overrides the local timeout when set.
    #[serde(default)]
    pub session_duration_minutes: Option<u32>,
    pub last_activity: DateTime<Utc>,
}

/// Consent snapshot owned by the consent manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsentState {
    #[serde(default, rename = "hasUserInteracted", alias = "has_user_interacted")]
    pub has_user_interacted: bool,
    #[serde(default)]
    pub analytics: bool,
    #[serde(default)]
    pub marketing: bool,
    #[serde(default, rename = "shouldTrack", alias = "should_track")]
    pub should_track: bool,
}

impl ConsentState {
    pub fn denied() -> Self {
        Self::default()
    }

    pub fn granted() -> Self {
        Self {
            has_user_interacted: true,
            analytics: true,
            marketing: true,
            should_track: true,
        }
    }

    pub fn allows_analytics(&self) -> bool {
        self.should_track && self.analytics
    }
}

/// First-touch marketing attribution captured from the landing URL.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_medium: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_campaign: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_term: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utm_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub click_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landing_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_at: Option<DateTime<Utc>>,
}

impl Attribution {
    /// True when none of the campaign signals are present.
    pub fn is_empty(&self) -> bool {
        self.utm_source.is_none()
            && self.utm_medium.is_none()
            && self.utm_campaign.is_none()
            && self.utm_term.is_none()
            && self.utm_content.is_none()
            && self.click_id.is_none()
            && self.referrer.is_none()
    }
}

/// Campaign configuration supplied by the hosted backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignSettings {
    pub campaign_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub landing_page_id: Option<String>,
    #[serde(default)]
    pub ab_test_id: Option<String>,
    #[serde(default)]
    pub ab_test_variant_id: Option<String>,
    #[serde(default)]
    pub primary_goal: Option<EventConfig>,
    #[serde(default)]
    pub custom_events: Vec<EventConfig>,
}

// ─── Wire types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInitRequest {
    pub campaign_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub landing_page_id: Option<String>,
    #[serde(default)]
    pub ab_test_id: Option<String>,
    #[serde(default)]
    pub ab_test_variant_id: Option<String>,
    #[serde(default)]
    pub attribution: Option<Attribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInitResponse {
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub click_id: Option<String>,
    #[serde(default)]
    pub session_duration_minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRenewalRequest {
    pub campaign_id: String,
    pub user_id: String,
    pub previous_session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRenewalResponse {
    pub session_id: String,
    #[serde(default)]
    pub click_id: Option<String>,
    #[serde(default)]
    pub session_duration_minutes: Option<u32>,
}

/// One tracked event as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedEvent {
    #[serde(flatten)]
    pub params: TrackEventParams,
    pub timestamp: DateTime<Utc>,
}

/// Body of `POST {api_url}/track`. All events share one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackBatchRequest {
    pub session_id: String,
    pub user_id: String,
    pub campaign_id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub landing_page_id: Option<String>,
    #[serde(default)]
    pub ab_test_id: Option<String>,
    #[serde(default)]
    pub ab_test_variant_id: Option<String>,
    pub events: Vec<TrackedEvent>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEventResponse {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub new_session_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_success() -> bool {
    true
}

impl Default for TrackEventResponse {
    fn default() -> Self {
        Self {
            success: default_success(),
            new_session_id: None,
            message: None,
        }
    }
}
