//! Visitor analytics pipeline — cookie-backed state, campaign sessions,
//! consent gating, and batched delivery to the analytics API.
//!
//! # Modules
//!
//! - [`cookies`] — Cookie jar abstraction and the typed cookie store
//! - [`session`] — Rolling-expiry session manager
//! - [`consent`] — Consent snapshot and change subscription
//! - [`attribution`] — First-touch UTM / click id capture
//! - [`batch`] — Batch tracker with size, max-wait and debounce flushes
//! - [`transport`] — HTTP transport and the recording test double
//! - [`clock`] — Time source for deterministic timing

pub mod attribution;
pub mod batch;
pub mod clock;
pub mod consent;
pub mod cookies;
pub mod session;
pub mod transport;

pub use batch::{BatchSettings, BatchTracker, FlushReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use consent::ConsentManager;
pub use cookies::{CookieJar, CookieStore, HeaderCookieJar, MemoryCookieJar};
pub use session::SessionManager;
pub use transport::{Delivery, HttpTransport, RecordingTransport, Transport};
