//! Cookie-backed state — a [`CookieJar`] abstraction over the host's cookie
//! storage plus a typed [`CookieStore`] persisting session, user, consent
//! and attribution blobs as JSON.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use lander_core::config::CookieConfig;
use lander_core::types::{Attribution, ConsentState, SessionData};
use lander_core::AnalyticsResult;

use crate::clock::Clock;

/// Attributes applied to a cookie write.
#[derive(Debug, Clone, Default)]
pub struct CookieOptions {
    /// `None` means a browser-session cookie.
    pub max_age: Option<Duration>,
    pub domain: Option<String>,
    pub path: String,
}

/// Read/write capability over a cookie storage.
pub trait CookieJar: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
    fn set(&self, name: &str, value: &str, options: &CookieOptions);
    fn remove(&self, name: &str);
}

// ─── In-memory jar ──────────────────────────────────────────────────────

struct StoredCookie {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process jar honouring expiry against an injected clock.
pub struct MemoryCookieJar {
    cookies: DashMap<String, StoredCookie>,
    clock: Arc<dyn Clock>,
}

impl MemoryCookieJar {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cookies: DashMap::new(),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

impl CookieJar for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let now = self.clock.now();
        {
            let cookie = self.cookies.get(name)?;
            if cookie.expires_at.map_or(true, |at| at > now) {
                return Some(cookie.value.clone());
            }
        }
        self.cookies.remove(name);
        None
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        let expires_at = options.max_age.map(|ttl| self.clock.now() + ttl);
        self.cookies.insert(
            name.to_string(),
            StoredCookie {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    fn remove(&self, name: &str) {
        self.cookies.remove(name);
    }
}

// ─── Header jar ─────────────────────────────────────────────────────────

/// Jar backed by an HTTP `Cookie` request header. Writes are collected as
/// `Set-Cookie` header values for the response.
pub struct HeaderCookieJar {
    incoming: DashMap<String, String>,
    outgoing: Mutex<Vec<String>>,
}

impl HeaderCookieJar {
    pub fn from_header(header: &str) -> Self {
        let incoming = DashMap::new();
        for pair in header.split(';') {
            let Some((name, value)) = pair.trim().split_once('=') else {
                continue;
            };
            if name.is_empty() {
                continue;
            }
            incoming.insert(name.to_string(), decode_value(value));
        }
        Self {
            incoming,
            outgoing: Mutex::new(Vec::new()),
        }
    }

    /// `Set-Cookie` values accumulated since construction, in write order.
    pub fn set_cookie_headers(&self) -> Vec<String> {
        self.outgoing.lock().clone()
    }
}

impl CookieJar for HeaderCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.incoming.get(name).map(|v| v.clone())
    }

    fn set(&self, name: &str, value: &str, options: &CookieOptions) {
        self.incoming.insert(name.to_string(), value.to_string());
        self.outgoing
            .lock()
            .push(format_set_cookie(name, value, options));
    }

    fn remove(&self, name: &str) {
        self.incoming.remove(name);
        let options = CookieOptions {
            max_age: Some(Duration::zero()),
            path: "/".to_string(),
            ..Default::default()
        };
        self.outgoing.lock().push(format_set_cookie(name, "", &options));
    }
}

fn encode_value(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn decode_value(raw: &str) -> String {
    // An encoded value carries no raw '&' or '=', so it parses as a single key.
    url::form_urlencoded::parse(raw.as_bytes())
        .next()
        .map(|(k, _)| k.into_owned())
        .unwrap_or_default()
}

/// Render a `Set-Cookie` header value.
pub fn format_set_cookie(name: &str, value: &str, options: &CookieOptions) -> String {
    let mut header = format!("{}={}", name, encode_value(value));
    if !options.path.is_empty() {
        header.push_str("; Path=");
        header.push_str(&options.path);
    }
    if let Some(domain) = &options.domain {
        header.push_str("; Domain=");
        header.push_str(domain);
    }
    if let Some(max_age) = options.max_age {
        header.push_str(&format!("; Max-Age={}", max_age.num_seconds().max(0)));
    }
    header.push_str("; SameSite=Lax");
    header
}

// ─── Typed store ────────────────────────────────────────────────────────

/// Typed JSON state over a [`CookieJar`], namespaced by the cookie prefix.
#[derive(Clone)]
pub struct CookieStore {
    jar: Arc<dyn CookieJar>,
    config: CookieConfig,
}

impl CookieStore {
    pub fn new(jar: Arc<dyn CookieJar>, config: CookieConfig) -> Self {
        Self { jar, config }
    }

    fn name(&self, key: &str) -> String {
        format!("{}{}", self.config.prefix, key)
    }

    fn options(&self, max_age: Option<Duration>) -> CookieOptions {
        CookieOptions {
            max_age,
            domain: self.config.domain.clone(),
            path: "/".to_string(),
        }
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let name = self.name(key);
        let raw = self.jar.get(&name)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(cookie = %name, error = %e, "discarding malformed cookie");
                self.jar.remove(&name);
                None
            }
        }
    }

    fn write_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        max_age: Option<Duration>,
    ) -> AnalyticsResult<()> {
        let raw = serde_json::to_string(value)?;
        let name = self.name(key);
        self.jar.set(&name, &raw, &self.options(max_age));
        debug!(cookie = %name, "cookie written");
        Ok(())
    }

    pub fn read_session(&self) -> Option<SessionData> {
        self.read_json("session")
    }

    pub fn write_session(&self, session: &SessionData, ttl: Duration) -> AnalyticsResult<()> {
        self.write_json("session", session, Some(ttl))
    }

    pub fn read_user_id(&self) -> Option<String> {
        self.read_json("user")
    }

    pub fn write_user_id(&self, user_id: &str) -> AnalyticsResult<()> {
        let ttl = Duration::days(self.config.user_days as i64);
        self.write_json("user", &user_id, Some(ttl))
    }

    /// Stored consent; a missing or malformed cookie reads as denied.
    pub fn read_consent(&self) -> ConsentState {
        self.read_json("consent").unwrap_or_else(ConsentState::denied)
    }

    pub fn write_consent(&self, consent: &ConsentState) -> AnalyticsResult<()> {
        let ttl = Duration::days(self.config.consent_days as i64);
        self.write_json("consent", consent, Some(ttl))
    }

    pub fn read_attribution(&self) -> Option<Attribution> {
        self.read_json("attribution")
    }

    pub fn write_attribution(&self, attribution: &Attribution) -> AnalyticsResult<()> {
        let ttl = Duration::days(self.config.user_days as i64);
        self.write_json("attribution", attribution, Some(ttl))
    }
}
