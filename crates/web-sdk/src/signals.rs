//! Page signals — the raw DOM-level facts a host page forwards to the SDK
//! (scrolls, clicks, form submits, visibility and unload).

use serde::{Deserialize, Serialize};

/// Element that received a click.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ElementInfo {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Raw `href` attribute; may be relative.
    #[serde(default)]
    pub href: Option<String>,
}

impl ElementInfo {
    /// Best-effort CSS selector: `tag#id.class1.class2`.
    pub fn selector(&self) -> String {
        let mut selector = if self.tag.is_empty() {
            "*".to_string()
        } else {
            self.tag.to_ascii_lowercase()
        };
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            selector.push('#');
            selector.push_str(id);
        }
        for class in self.classes.iter().filter(|c| !c.is_empty()) {
            selector.push('.');
            selector.push_str(class);
        }
        selector
    }
}

/// Submitted form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub field_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageSignal {
    Scroll {
        scroll_top: f64,
        viewport_height: f64,
        document_height: f64,
    },
    Click {
        element: ElementInfo,
    },
    FormSubmit {
        form: FormInfo,
    },
    /// The page went to the background.
    Hidden,
    Unload,
}

/// Page the observers are attached to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageContext {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}

impl PageContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            referrer: None,
        }
    }
}
