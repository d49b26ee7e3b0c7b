//! Event configuration merge — combines the built-in default events, the
//! campaign's primary goal, and custom events into one ordered catalog.

use crate::config::DefaultEventsConfig;
use crate::types::{EventConfig, EventType, EventValueType, TrackEventParams};

pub const FORM_SUBMISSION: &str = "form-submission";
pub const EXTERNAL_LINK_CLICK: &str = "external-link-click";
pub const PAGE_VIEW: &str = "page-view";
pub const SCROLL_THRESHOLD: &str = "scroll-threshold";
pub const TIME_ON_PAGE: &str = "time-on-page";

/// Inputs of [`merge_event_configuration`].
#[derive(Debug, Clone, Default)]
pub struct MergeInput<'a> {
    pub primary_goal: Option<&'a EventConfig>,
    pub custom_events: &'a [EventConfig],
    pub default_events: DefaultEventsConfig,
}

fn builtin(event_id: &str, event_type: EventType, label: &str) -> EventConfig {
    EventConfig {
        event_id: event_id.to_string(),
        event_type,
        event_value: None,
        event_value_type: EventValueType::Static,
        is_custom: false,
        label: Some(label.to_string()),
    }
}

/// The built-in default events enabled by `toggles`, in display order.
pub fn default_event_configs(toggles: &DefaultEventsConfig) -> Vec<EventConfig> {
    let mut defaults = Vec::with_capacity(4);
    if toggles.form_submission {
        defaults.push(builtin(FORM_SUBMISSION, EventType::Conversion, "Form submission"));
    }
    if toggles.external_link_click {
        defaults.push(builtin(
            EXTERNAL_LINK_CLICK,
            EventType::Engagement,
            "External link click",
        ));
    }
    if toggles.page_view {
        defaults.push(builtin(PAGE_VIEW, EventType::Engagement, "Page view"));
    }
    if toggles.scroll_threshold {
        defaults.push(builtin(SCROLL_THRESHOLD, EventType::Engagement, "Scroll depth"));
    }
    defaults
}

/// Build the final list of trackable events.
///
/// Defaults come first. A primary goal sharing a default's id overrides that
/// entry's type and value in place, otherwise it is appended. Custom events
/// follow, skipping any id already present.
pub fn merge_event_configuration(input: &MergeInput<'_>) -> Vec<EventConfig> {
    let mut merged = default_event_configs(&input.default_events);

    if let Some(goal) = input.primary_goal {
        match merged.iter_mut().find(|e| e.event_id == goal.event_id) {
            Some(existing) => {
                existing.event_type = goal.event_type;
                existing.event_value = goal.event_value;
                existing.event_value_type = goal.event_value_type;
            }
            None => merged.push(goal.clone()),
        }
    }

    for custom in input.custom_events {
        if merged.iter().any(|e| e.event_id == custom.event_id) {
            tracing::debug!(event_id = %custom.event_id, "skipping duplicate custom event");
            continue;
        }
        merged.push(custom.clone());
    }

    merged
}

/// Merged event definitions applied to events at track time.
#[derive(Debug, Clone, Default)]
pub struct EventCatalog {
    events: Vec<EventConfig>,
}

impl EventCatalog {
    pub fn new(events: Vec<EventConfig>) -> Self {
        Self { events }
    }

    pub fn from_merge(input: &MergeInput<'_>) -> Self {
        Self::new(merge_event_configuration(input))
    }

    pub fn get(&self, event_id: &str) -> Option<&EventConfig> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    pub fn events(&self) -> &[EventConfig] {
        &self.events
    }

    /// Fill in configured type and static value for a known event.
    pub fn apply(&self, params: &mut TrackEventParams) {
        let Some(config) = self.get(&params.event_id) else {
            return;
        };
        params.event_type = config.event_type;
        match config.event_value_type {
            EventValueType::Static => {
                if params.event_value.is_none() {
                    if let Some(value) = config.event_value {
                        params.event_value = Some(value);
                        params.event_value_type = Some(EventValueType::Static);
                    }
                }
            }
            EventValueType::Dynamic => {
                if params.event_value.is_some() {
                    params.event_value_type = Some(EventValueType::Dynamic);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goal(event_id: &str, value: f64) -> EventConfig {
        EventConfig {
            event_id: event_id.to_string(),
            event_type: EventType::Conversion,
            event_value: Some(value),
            event_value_type: EventValueType::Static,
            is_custom: false,
            label: None,
        }
    }

    fn custom(event_id: &str) -> EventConfig {
        EventConfig {
            event_id: event_id.to_string(),
            event_type: EventType::Engagement,
            event_value: None,
            event_value_type: EventValueType::Dynamic,
            is_custom: true,
            label: None,
        }
    }

    fn ids(events: &[EventConfig]) -> Vec<&str> {
        events.iter().map(|e| e.event_id.as_str()).collect()
    }

    #[test]
    fn test_defaults_only() {
        let merged = merge_event_configuration(&MergeInput {
            default_events: DefaultEventsConfig::all(),
            ..Default::default()
        });
        assert_eq!(
            ids(&merged),
            vec![FORM_SUBMISSION, EXTERNAL_LINK_CLICK, PAGE_VIEW, SCROLL_THRESHOLD]
        );
    }

    #[test]
    fn test_goal_matching_default_overrides_in_place() {
        let primary = EventConfig {
            event_type: EventType::Conversion,
            ..goal(SCROLL_THRESHOLD, 5.0)
        };
        let merged = merge_event_configuration(&MergeInput {
            primary_goal: Some(&primary),
            custom_events: &[],
            default_events: DefaultEventsConfig::all(),
        });

        assert_eq!(merged.len(), 4);
        assert_eq!(merged[3].event_id, SCROLL_THRESHOLD);
        assert_eq!(merged[3].event_type, EventType::Conversion);
        assert_eq!(merged[3].event_value, Some(5.0));
        // Label of the default survives the override
        assert_eq!(merged[3].label.as_deref(), Some("Scroll depth"));
    }

    #[test]
    fn test_novel_goal_appended_after_defaults() {
        let primary = goal("demo-booked", 120.0);
        let merged = merge_event_configuration(&MergeInput {
            primary_goal: Some(&primary),
            custom_events: &[],
            default_events: DefaultEventsConfig::all(),
        });
        assert_eq!(merged.len(), 5);
        assert_eq!(merged[4], primary);
    }

    #[test]
    fn test_custom_events_first_definition_wins() {
        let primary = goal("demo-booked", 120.0);
        let customs = vec![
            custom("video-play"),
            custom(PAGE_VIEW),
            custom("demo-booked"),
            custom("video-play"),
            custom("pricing-toggle"),
        ];
        let merged = merge_event_configuration(&MergeInput {
            primary_goal: Some(&primary),
            custom_events: &customs,
            default_events: DefaultEventsConfig::all(),
        });

        assert_eq!(
            ids(&merged),
            vec![
                FORM_SUBMISSION,
                EXTERNAL_LINK_CLICK,
                PAGE_VIEW,
                SCROLL_THRESHOLD,
                "demo-booked",
                "video-play",
                "pricing-toggle",
            ]
        );
        assert!(!merged[2].is_custom);
        assert_eq!(merged[4].event_value, Some(120.0));
    }

    #[test]
    fn test_disabled_defaults_are_left_out() {
        let toggles = DefaultEventsConfig {
            scroll_threshold: false,
            external_link_click: false,
            ..DefaultEventsConfig::all()
        };
        let primary = goal(SCROLL_THRESHOLD, 1.0);
        let merged = merge_event_configuration(&MergeInput {
            primary_goal: Some(&primary),
            custom_events: &[],
            default_events: toggles,
        });
        assert_eq!(ids(&merged), vec![FORM_SUBMISSION, PAGE_VIEW, SCROLL_THRESHOLD]);
        assert_eq!(merged[2].event_value, Some(1.0));
    }

    #[test]
    fn test_catalog_applies_static_value() {
        let primary = goal(FORM_SUBMISSION, 49.0);
        let catalog = EventCatalog::from_merge(&MergeInput {
            primary_goal: Some(&primary),
            custom_events: &[],
            default_events: DefaultEventsConfig::all(),
        });

        let mut params = TrackEventParams::new(FORM_SUBMISSION, EventType::Engagement);
        catalog.apply(&mut params);
        assert_eq!(params.event_type, EventType::Conversion);
        assert_eq!(params.event_value, Some(49.0));
        assert_eq!(params.event_value_type, Some(EventValueType::Static));

        // An explicit value is never overwritten
        let mut params =
            TrackEventParams::new(FORM_SUBMISSION, EventType::Conversion).with_value(10.0, "USD");
        catalog.apply(&mut params);
        assert_eq!(params.event_value, Some(10.0));
    }

    #[test]
    fn test_catalog_ignores_unknown_events() {
        let catalog = EventCatalog::default();
        let mut params = TrackEventParams::new("anything", EventType::System);
        catalog.apply(&mut params);
        assert_eq!(params.event_type, EventType::System);
        assert!(params.event_value.is_none());
    }
}
