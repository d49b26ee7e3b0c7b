use serde::Deserialize;

/// Root SDK configuration. Loaded from environment variables with the
/// prefix `LANDER__` and an optional TOML config file.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub cookies: CookieConfig,
    #[serde(default)]
    pub default_events: DefaultEventsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_timeout_minutes")]
    pub timeout_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_wait_time_ms")]
    pub max_wait_time_ms: u64,
    #[serde(default = "default_debounce_time_ms")]
    pub debounce_time_ms: u64,
    /// Hard cap on queued events; the oldest are dropped beyond it.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_unload_timeout_ms")]
    pub unload_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    #[serde(default = "default_cookie_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_user_cookie_days")]
    pub user_days: u32,
    #[serde(default = "default_consent_cookie_days")]
    pub consent_days: u32,
}

/// Toggles for the built-in page observers and their event definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DefaultEventsConfig {
    #[serde(default = "default_true")]
    pub page_view: bool,
    #[serde(default = "default_true")]
    pub form_submission: bool,
    #[serde(default = "default_true")]
    pub external_link_click: bool,
    #[serde(default = "default_true")]
    pub scroll_threshold: bool,
    #[serde(default = "default_true")]
    pub time_on_page: bool,
}

// Default functions
fn default_api_url() -> String {
    "https://api.lander.dev/analytics".to_string()
}
fn default_enabled() -> bool {
    true
}
fn default_true() -> bool {
    true
}
fn default_session_timeout_minutes() -> u32 {
    30
}
fn default_max_batch_size() -> usize {
    10
}
fn default_max_wait_time_ms() -> u64 {
    2000
}
fn default_debounce_time_ms() -> u64 {
    100
}
fn default_max_queue_size() -> usize {
    500
}
fn default_unload_timeout_ms() -> u64 {
    1000
}
fn default_cookie_prefix() -> String {
    "lp_".to_string()
}
fn default_user_cookie_days() -> u32 {
    365
}
fn default_consent_cookie_days() -> u32 {
    180
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_minutes: default_session_timeout_minutes(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_wait_time_ms: default_max_wait_time_ms(),
            debounce_time_ms: default_debounce_time_ms(),
            max_queue_size: default_max_queue_size(),
            unload_timeout_ms: default_unload_timeout_ms(),
        }
    }
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            prefix: default_cookie_prefix(),
            domain: None,
            user_days: default_user_cookie_days(),
            consent_days: default_consent_cookie_days(),
        }
    }
}

impl Default for DefaultEventsConfig {
    fn default() -> Self {
        Self::all()
    }
}

impl DefaultEventsConfig {
    pub fn all() -> Self {
        Self {
            page_view: true,
            form_submission: true,
            external_link_click: true,
            scroll_threshold: true,
            time_on_page: true,
        }
    }

    pub fn none() -> Self {
        Self {
            page_view: false,
            form_submission: false,
            external_link_click: false,
            scroll_threshold: false,
            time_on_page: false,
        }
    }
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            enabled: default_enabled(),
            debug: false,
            session: SessionConfig::default(),
            batch: BatchConfig::default(),
            cookies: CookieConfig::default(),
            default_events: DefaultEventsConfig::default(),
        }
    }
}

impl AnalyticsConfig {
    /// Load configuration from environment variables and optional config file.
    pub fn load(file: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("LANDER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Endpoint URL under `api_url`, tolerating a trailing slash.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
