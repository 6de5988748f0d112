//! Browser driver contract.
//!
//! The engine never talks to a real browser directly; it drives this trait.
//! Production embeddings plug a CDP/WebDriver adapter in behind it, while
//! the bundled [`InMemoryDriver`] models an application as declared pages
//! for offline runs and deterministic tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed driver failures: enough detail for the orchestrator to decide
/// whether a self-healing replan is worth attempting.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("element '{0}' not found")]
    NotFound(String),

    #[error("timed out after {timeout_ms}ms on '{target}'")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("network failure: {0}")]
    Network(String),

    #[error("driver crashed: {0}")]
    Crashed(String),
}

/// Where a click lands: a selector or raw viewport coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClickTarget {
    Selector(String),
    Coordinates { x: f64, y: f64 },
}

impl ClickTarget {
    pub fn describe(&self) -> String {
        match self {
            ClickTarget::Selector(sel) => sel.clone(),
            ClickTarget::Coordinates { x, y } => format!("({x}, {y})"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

/// Serialized view of the current page handed to the planner as context.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    pub title: String,
    pub visible_text: String,
}

/// Primitive browser operations. Side effects are confined to the handle;
/// implementations hold no engine state.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;
    async fn click(&self, target: &ClickTarget) -> Result<(), DriverError>;
    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError>;
    async fn scroll(&self, direction: ScrollDirection) -> Result<(), DriverError>;
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;
    async fn extract_text(&self, selector: &str) -> Result<String, DriverError>;
    async fn hover(&self, selector: &str) -> Result<(), DriverError>;
    /// Move the pointer without pressing any button.
    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), DriverError>;
    async fn snapshot(&self) -> Result<PageState, DriverError>;
}

/// Declarative page used by the in-memory driver.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PageSpec {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    /// Selectors that exist on this page.
    #[serde(default)]
    pub selectors: Vec<String>,
    /// Clicking one of these selectors navigates to the mapped URL.
    #[serde(default)]
    pub on_click: HashMap<String, String>,
}

impl PageSpec {
    fn has_selector(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }
}

/// Driver over a declared set of pages. Typing and clicking succeed only
/// against selectors the current page declares, which is what makes stale
/// cached traces fail realistically in tests.
pub struct InMemoryDriver {
    pages: HashMap<String, PageSpec>,
    current: Mutex<String>,
    typed: Mutex<HashMap<String, String>>,
    pointer: Mutex<Option<(f64, f64)>>,
}

impl InMemoryDriver {
    pub fn new(pages: HashMap<String, PageSpec>, start_url: impl Into<String>) -> Self {
        Self {
            pages,
            current: Mutex::new(start_url.into()),
            typed: Mutex::new(HashMap::new()),
            pointer: Mutex::new(None),
        }
    }

    pub fn current_url(&self) -> String {
        self.current.lock().clone()
    }

    /// Text typed into a selector so far, for assertions in tests.
    pub fn typed_value(&self, selector: &str) -> Option<String> {
        self.typed.lock().get(selector).cloned()
    }

    /// Last pointer position, for assertions in tests.
    pub fn pointer_position(&self) -> Option<(f64, f64)> {
        *self.pointer.lock()
    }

    fn current_page(&self) -> Result<PageSpec, DriverError> {
        let url = self.current.lock().clone();
        self.pages
            .get(&url)
            .cloned()
            .ok_or_else(|| DriverError::Network(format!("no page declared at '{url}'")))
    }
}

#[async_trait]
impl Driver for InMemoryDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        if !self.pages.contains_key(url) {
            return Err(DriverError::Network(format!("no page declared at '{url}'")));
        }
        *self.current.lock() = url.to_string();
        Ok(())
    }

    async fn click(&self, target: &ClickTarget) -> Result<(), DriverError> {
        let page = self.current_page()?;
        let selector = match target {
            ClickTarget::Selector(sel) => sel.clone(),
            ClickTarget::Coordinates { .. } => {
                // Coordinate clicks are accepted blindly; a page model has
                // no geometry to check them against.
                return Ok(());
            }
        };
        if !page.has_selector(&selector) {
            return Err(DriverError::NotFound(selector));
        }
        if let Some(destination) = page.on_click.get(&selector) {
            *self.current.lock() = destination.clone();
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let page = self.current_page()?;
        if !page.has_selector(selector) {
            return Err(DriverError::NotFound(selector.to_string()));
        }
        self.typed
            .lock()
            .insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn scroll(&self, _direction: ScrollDirection) -> Result<(), DriverError> {
        self.current_page().map(|_| ())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let page = self.current_page()?;
        if page.has_selector(selector) {
            Ok(())
        } else {
            Err(DriverError::Timeout {
                target: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn extract_text(&self, selector: &str) -> Result<String, DriverError> {
        let page = self.current_page()?;
        if page.has_selector(selector) {
            Ok(page.text.clone())
        } else {
            Err(DriverError::NotFound(selector.to_string()))
        }
    }

    async fn hover(&self, selector: &str) -> Result<(), DriverError> {
        let page = self.current_page()?;
        if page.has_selector(selector) {
            Ok(())
        } else {
            Err(DriverError::NotFound(selector.to_string()))
        }
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), DriverError> {
        self.current_page()?;
        *self.pointer.lock() = Some((x, y));
        Ok(())
    }

    async fn snapshot(&self) -> Result<PageState, DriverError> {
        let url = self.current.lock().clone();
        let page = self.pages.get(&url).cloned().unwrap_or_default();
        Ok(PageState {
            url,
            title: page.title,
            visible_text: page.text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver() -> InMemoryDriver {
        let mut pages = HashMap::new();
        pages.insert(
            "/sign-in".to_string(),
            PageSpec {
                title: "Sign in".into(),
                text: "Welcome back".into(),
                selectors: vec!["#email".into(), "#submit".into()],
                on_click: HashMap::from([("#submit".to_string(), "/dashboard".to_string())]),
            },
        );
        pages.insert(
            "/dashboard".to_string(),
            PageSpec {
                title: "Dashboard".into(),
                ..Default::default()
            },
        );
        InMemoryDriver::new(pages, "/sign-in")
    }

    #[tokio::test]
    async fn click_follows_declared_navigation() {
        let d = driver();
        d.click(&ClickTarget::Selector("#submit".into()))
            .await
            .unwrap();
        assert_eq!(d.current_url(), "/dashboard");
    }

    #[tokio::test]
    async fn missing_selector_is_not_found() {
        let d = driver();
        let err = d
            .click(&ClickTarget::Selector("#missing".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotFound(_)));
    }

    #[tokio::test]
    async fn typing_records_value() {
        let d = driver();
        d.type_text("#email", "x@example.com").await.unwrap();
        assert_eq!(d.typed_value("#email").unwrap(), "x@example.com");
    }

    #[tokio::test]
    async fn pointer_move_presses_nothing() {
        let d = driver();
        d.mouse_move(10.0, 20.0).await.unwrap();
        assert_eq!(d.pointer_position(), Some((10.0, 20.0)));
        // Still on the sign-in page: nothing was clicked.
        assert_eq!(d.current_url(), "/sign-in");
    }
}
