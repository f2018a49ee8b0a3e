//! In-memory browser driver for exercising the engine without Chrome.

use crate::core::{BrowserDriver, DriverResult, SessionOptions};
use crate::errors::DriverError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Handle to the `index`-th match of `selector`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockElement {
    pub selector: String,
    pub index: usize,
    pub deep: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockNode {
    pub text: String,
    pub value: Option<String>,
    pub attributes: HashMap<String, String>,
}

impl MockNode {
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Page mutation applied when an element matching a selector is clicked.
#[derive(Debug, Clone)]
pub enum ClickEffect {
    Append { selector: String, node: MockNode },
    RemoveAll { selector: String },
    SetText { selector: String, text: String },
}

#[derive(Debug, Default)]
struct MockPage {
    nodes: HashMap<String, Vec<MockNode>>,
    deep_nodes: HashMap<String, Vec<MockNode>>,
    effects: HashMap<String, Vec<ClickEffect>>,
    failing: HashSet<String>,
    fail_launch: bool,
    launched: bool,
    url: String,
    calls: Vec<String>,
}

/// Scripted driver whose page is a map from selector to matching nodes.
/// Clones share the same page, so a test can keep one to inspect calls.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    page: Arc<Mutex<MockPage>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn page(&self) -> MutexGuard<'_, MockPage> {
        self.page.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_nodes(self, selector: &str, nodes: Vec<MockNode>) -> Self {
        self.page().nodes.insert(selector.to_string(), nodes);
        self
    }

    pub fn with_deep_nodes(self, selector: &str, nodes: Vec<MockNode>) -> Self {
        self.page().deep_nodes.insert(selector.to_string(), nodes);
        self
    }

    pub fn on_click(self, selector: &str, effect: ClickEffect) -> Self {
        self.page()
            .effects
            .entry(selector.to_string())
            .or_default()
            .push(effect);
        self
    }

    /// Every driver call touching `selector` fails.
    pub fn failing_on(self, selector: &str) -> Self {
        self.page().failing.insert(selector.to_string());
        self
    }

    pub fn failing_launch(self) -> Self {
        self.page().fail_launch = true;
        self
    }

    pub fn nodes(&self, selector: &str) -> Vec<MockNode> {
        self.page().nodes.get(selector).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.page().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.page()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.page().calls.push(call);
    }

    fn check_failing(&self, selector: &str) -> DriverResult<()> {
        if self.page().failing.contains(selector) {
            return Err(DriverError::ChromeError(format!(
                "scripted failure on '{}'",
                selector
            )));
        }
        Ok(())
    }

    fn node(&self, element: &MockElement) -> DriverResult<MockNode> {
        let page = self.page();
        let source = if element.deep {
            &page.deep_nodes
        } else {
            &page.nodes
        };
        source
            .get(&element.selector)
            .and_then(|nodes| nodes.get(element.index))
            .cloned()
            .ok_or_else(|| {
                DriverError::StaleElement(format!("{}[{}]", element.selector, element.index))
            })
    }
}

#[async_trait]
impl BrowserDriver for MockDriver {
    type Element = MockElement;

    async fn launch(&mut self, options: &SessionOptions) -> DriverResult<()> {
        self.record(format!(
            "launch:{}x{}",
            options.viewport.width, options.viewport.height
        ));
        let mut page = self.page();
        if page.fail_launch {
            return Err(DriverError::LaunchFailed("scripted launch failure".to_string()));
        }
        page.launched = true;
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        self.record("close".to_string());
        self.page().launched = false;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        self.record(format!("navigate:{}", url));
        self.check_failing(url)?;
        self.page().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.page().url.clone())
    }

    async fn find_elements(&self, selector: &str) -> DriverResult<Vec<MockElement>> {
        self.check_failing(selector)?;
        let count = self.page().nodes.get(selector).map_or(0, Vec::len);
        Ok((0..count)
            .map(|index| MockElement {
                selector: selector.to_string(),
                index,
                deep: false,
            })
            .collect())
    }

    async fn find_elements_deep(&self, selector: &str) -> DriverResult<Vec<MockElement>> {
        self.record(format!("deep:{}", selector));
        let count = self.page().deep_nodes.get(selector).map_or(0, Vec::len);
        Ok((0..count)
            .map(|index| MockElement {
                selector: selector.to_string(),
                index,
                deep: true,
            })
            .collect())
    }

    async fn get_attribute(
        &self,
        element: &MockElement,
        name: &str,
    ) -> DriverResult<Option<String>> {
        Ok(self.node(element)?.attributes.get(name).cloned())
    }

    async fn get_text(&self, element: &MockElement) -> DriverResult<String> {
        Ok(self.node(element)?.text)
    }

    async fn get_value(&self, element: &MockElement) -> DriverResult<Option<String>> {
        Ok(self.node(element)?.value)
    }

    async fn click(&self, element: &MockElement) -> DriverResult<()> {
        self.check_failing(&element.selector)?;
        self.node(element)?;
        self.record(format!("click:{}[{}]", element.selector, element.index));

        let mut page = self.page();
        let effects = page
            .effects
            .get(&element.selector)
            .cloned()
            .unwrap_or_default();
        for effect in effects {
            match effect {
                ClickEffect::Append { selector, node } => {
                    page.nodes.entry(selector).or_default().push(node);
                }
                ClickEffect::RemoveAll { selector } => {
                    page.nodes.remove(&selector);
                }
                ClickEffect::SetText { selector, text } => {
                    if let Some(nodes) = page.nodes.get_mut(&selector) {
                        for node in nodes.iter_mut() {
                            node.text = text.clone();
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn type_text(&self, element: &MockElement, text: &str) -> DriverResult<()> {
        self.check_failing(&element.selector)?;
        self.record(format!("type:{}:{}", element.selector, text));
        let mut page = self.page();
        let source = if element.deep {
            &mut page.deep_nodes
        } else {
            &mut page.nodes
        };
        let node = source
            .get_mut(&element.selector)
            .and_then(|nodes| nodes.get_mut(element.index))
            .ok_or_else(|| DriverError::StaleElement(element.selector.clone()))?;
        node.value = Some(text.to_string());
        Ok(())
    }

    async fn wait_ms(&self, ms: u64) -> DriverResult<()> {
        self.record(format!("wait:{}", ms));
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.page().launched
    }
}
