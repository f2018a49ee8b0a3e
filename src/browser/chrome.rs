use crate::core::{BrowserDriver, DriverResult, SessionOptions};
use crate::errors::DriverError;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::ffi::OsStr;
use std::sync::Arc;
use tracing::debug;

/// Element handle: the `index`-th match of `selector`, re-resolved on every
/// call. `deep` matches are looked up through open shadow roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromeElement {
    pub selector: String,
    pub index: usize,
    pub deep: bool,
}

/// Shared lookup prelude. Defines `matches(sel, deep)` in the evaluated scope.
const LOOKUP_JS: &str = r#"
    const collect = (root, sel, out) => {
        root.querySelectorAll(sel).forEach(e => out.push(e));
        root.querySelectorAll('*').forEach(n => {
            if (n.shadowRoot) collect(n.shadowRoot, sel, out);
        });
        return out;
    };
    const matches = (sel, deep) =>
        deep ? collect(document, sel, []) : Array.from(document.querySelectorAll(sel));
"#;

/// Chrome driver over `headless_chrome`, one tab per session.
pub struct ChromeDriver {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeDriver {
    pub fn new() -> Self {
        Self {
            browser: None,
            tab: None,
        }
    }

    fn tab(&self) -> DriverResult<&Arc<Tab>> {
        self.tab.as_ref().ok_or(DriverError::BrowserNotLaunched)
    }

    /// Evaluates `body` with the lookup prelude in scope. The body must
    /// `return` a JSON-serializable value.
    fn eval<T: DeserializeOwned>(&self, body: &str) -> DriverResult<T> {
        let js_code = format!(
            "(function() {{ {} return JSON.stringify((function() {{ {} }})()); }})()",
            LOOKUP_JS, body
        );
        let result = self
            .tab()?
            .evaluate(&js_code, false)
            .map_err(|e| DriverError::JavaScriptFailed(e.to_string()))?;

        let raw = match result.value {
            Some(Value::String(s)) => s,
            other => {
                return Err(DriverError::JavaScriptFailed(format!(
                    "unexpected script result: {:?}",
                    other
                )))
            }
        };
        serde_json::from_str(&raw).map_err(|e| DriverError::JavaScriptFailed(e.to_string()))
    }

    /// Runs `body` with `el` bound to the element, or fails when it has gone.
    fn with_element<T: DeserializeOwned>(
        &self,
        element: &ChromeElement,
        body: &str,
    ) -> DriverResult<T> {
        let script = format!(
            "const el = matches({}, {})[{}]; if (!el) return {{ stale: true }}; return {{ stale: false, result: (function() {{ {} }})() }};",
            quote(&element.selector),
            element.deep,
            element.index,
            body
        );

        let value: Value = self.eval(&script)?;
        if value.get("stale").and_then(Value::as_bool).unwrap_or(true) {
            return Err(DriverError::StaleElement(format!(
                "{}[{}]",
                element.selector, element.index
            )));
        }
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| DriverError::JavaScriptFailed(e.to_string()))
    }

    fn count(&self, selector: &str, deep: bool) -> DriverResult<Vec<ChromeElement>> {
        let count: usize = self.eval(&format!(
            "return matches({}, {}).length;",
            quote(selector),
            deep
        ))?;
        debug!(selector, deep, count, "resolved selector");
        Ok((0..count)
            .map(|index| ChromeElement {
                selector: selector.to_string(),
                index,
                deep,
            })
            .collect())
    }
}

impl Default for ChromeDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn quote(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    type Element = ChromeElement;

    async fn launch(&mut self, options: &SessionOptions) -> DriverResult<()> {
        let window_size_arg = format!(
            "--window-size={},{}",
            options.viewport.width, options.viewport.height
        );

        let user_agent_arg = options
            .user_agent
            .as_ref()
            .map(|ua| format!("--user-agent={}", ua));

        let mut args = vec![
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new(&window_size_arg),
        ];

        if let Some(ref ua_arg) = user_agent_arg {
            args.push(OsStr::new(ua_arg));
        }

        let launch_options = LaunchOptions::default_builder()
            .headless(options.headless)
            .args(args)
            .build()
            .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| DriverError::LaunchFailed(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| DriverError::LaunchFailed(e.to_string()))?;

        self.browser = Some(browser);
        self.tab = Some(tab);
        Ok(())
    }

    async fn close(&mut self) -> DriverResult<()> {
        if let Some(tab) = self.tab.take() {
            if let Err(e) = tab.close(false) {
                debug!(error = %e, "tab already closed");
            }
        }
        self.browser = None;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> DriverResult<()> {
        let tab = self.tab()?;
        tab.navigate_to(url)
            .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;

        tab.wait_until_navigated()
            .map_err(|e| DriverError::NavigationFailed(e.to_string()))?;

        Ok(())
    }

    async fn current_url(&self) -> DriverResult<String> {
        Ok(self.tab()?.get_url())
    }

    async fn find_elements(&self, selector: &str) -> DriverResult<Vec<ChromeElement>> {
        self.count(selector, false)
    }

    async fn find_elements_deep(&self, selector: &str) -> DriverResult<Vec<ChromeElement>> {
        self.count(selector, true)
    }

    async fn get_attribute(
        &self,
        element: &ChromeElement,
        name: &str,
    ) -> DriverResult<Option<String>> {
        self.with_element(element, &format!("return el.getAttribute({});", quote(name)))
    }

    async fn get_text(&self, element: &ChromeElement) -> DriverResult<String> {
        self.with_element(element, "return (el.innerText || el.textContent || '').trim();")
    }

    async fn get_value(&self, element: &ChromeElement) -> DriverResult<Option<String>> {
        self.with_element(
            element,
            "return ('value' in el && el.value != null) ? String(el.value) : null;",
        )
    }

    async fn click(&self, element: &ChromeElement) -> DriverResult<()> {
        self.with_element::<bool>(
            element,
            "el.scrollIntoView({ block: 'center' }); el.click(); return true;",
        )?;
        Ok(())
    }

    async fn type_text(&self, element: &ChromeElement, text: &str) -> DriverResult<()> {
        let body = format!(
            r#"
            el.focus();
            if ('value' in el) {{
                el.value = {};
            }} else {{
                el.textContent = {};
            }}
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            return true;
        "#,
            quote(text),
            quote(text)
        );
        self.with_element::<bool>(element, &body)?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.browser.is_some()
    }
}
