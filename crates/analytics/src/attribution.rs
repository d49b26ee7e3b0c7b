//! First-touch attribution captured from the landing URL query string.

use chrono::{DateTime, Utc};
use tracing::debug;
use url::Url;

use lander_core::types::Attribution;

use crate::cookies::CookieStore;

/// Ad-platform click identifiers, in lookup order.
const CLICK_ID_PARAMS: &[&str] = &["click_id", "gclid", "fbclid", "msclkid", "ttclid", "li_fat_id"];

/// Extract UTM parameters and click id from `landing_url`.
pub fn parse_attribution(
    landing_url: &str,
    referrer: Option<&str>,
    now: DateTime<Utc>,
) -> Attribution {
    let mut attribution = Attribution {
        referrer: referrer.filter(|r| !r.is_empty()).map(str::to_string),
        landing_url: Some(landing_url.to_string()),
        captured_at: Some(now),
        ..Default::default()
    };

    let Ok(url) = Url::parse(landing_url) else {
        return attribution;
    };

    let mut click_ids: Vec<(usize, String)> = Vec::new();
    for (key, value) in url.query_pairs() {
        if value.is_empty() {
            continue;
        }
        let value = value.into_owned();
        match key.as_ref() {
            "utm_source" => attribution.utm_source = Some(value),
            "utm_medium" => attribution.utm_medium = Some(value),
            "utm_campaign" => attribution.utm_campaign = Some(value),
            "utm_term" => attribution.utm_term = Some(value),
            "utm_content" => attribution.utm_content = Some(value),
            other => {
                if let Some(rank) = CLICK_ID_PARAMS.iter().position(|p| *p == other) {
                    click_ids.push((rank, value));
                }
            }
        }
    }
    click_ids.sort_by_key(|(rank, _)| *rank);
    attribution.click_id = click_ids.into_iter().next().map(|(_, v)| v);
    attribution
}

/// Persist attribution unless a first touch is already stored. Returns the
/// attribution in effect for this visitor.
pub fn capture_first_touch(store: &CookieStore, candidate: Attribution) -> Option<Attribution> {
    if let Some(existing) = store.read_attribution() {
        if !existing.is_empty() {
            return Some(existing);
        }
    }
    if candidate.is_empty() {
        return None;
    }
    if let Err(e) = store.write_attribution(&candidate) {
        debug!(error = %e, "failed to persist attribution");
    }
    Some(candidate)
}
