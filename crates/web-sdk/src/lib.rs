//! Landing-page SDK binding — page signals, default observers, and the
//! provider that ties them to the analytics pipeline.
//!
//! # Modules
//!
//! - [`signals`] — Page signals delivered by the host (scroll, click, form, visibility)
//! - [`observers`] — Default observers turning signals into tracked events
//! - [`provider`] — [`AnalyticsProvider`], the host-facing entry point

pub mod observers;
pub mod provider;
pub mod signals;

pub use observers::{attach_default_observers, Disposer, ObserverRegistry, PageObserver};
pub use provider::{AnalyticsContext, AnalyticsProvider, AnalyticsProviderBuilder};
pub use signals::{ElementInfo, FormInfo, PageContext, PageSignal};
