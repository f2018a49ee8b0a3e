use crate::errors::DriverError;
use crate::types::Viewport;
use async_trait::async_trait;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Session parameters taken from an automation config.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
        }
    }
}

/// DOM primitives the engine needs from a browser.
///
/// Every call is awaited to completion before the engine advances, so
/// implementations may block internally.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    type Element: Clone + Send + Sync + std::fmt::Debug;

    /// Launch a browser and open the working tab
    async fn launch(&mut self, options: &SessionOptions) -> DriverResult<()>;

    /// Close the browser; must be safe to call when nothing is open
    async fn close(&mut self) -> DriverResult<()>;

    async fn navigate(&self, url: &str) -> DriverResult<()>;

    async fn current_url(&self) -> DriverResult<String>;

    /// All elements matching `selector`, in document order.
    async fn find_elements(&self, selector: &str) -> DriverResult<Vec<Self::Element>>;

    /// Secondary lookup tried when `find_elements` resolves nothing, e.g.
    /// piercing shadow roots. Drivers without one report no matches.
    async fn find_elements_deep(&self, _selector: &str) -> DriverResult<Vec<Self::Element>> {
        Ok(Vec::new())
    }

    async fn find_element(&self, selector: &str) -> DriverResult<Option<Self::Element>> {
        Ok(self.find_elements(selector).await?.into_iter().next())
    }

    async fn get_attribute(
        &self,
        element: &Self::Element,
        name: &str,
    ) -> DriverResult<Option<String>>;

    async fn get_text(&self, element: &Self::Element) -> DriverResult<String>;

    async fn get_value(&self, element: &Self::Element) -> DriverResult<Option<String>>;

    async fn click(&self, element: &Self::Element) -> DriverResult<()>;

    async fn type_text(&self, element: &Self::Element, text: &str) -> DriverResult<()>;

    async fn wait_ms(&self, ms: u64) -> DriverResult<()> {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
        Ok(())
    }

    fn is_running(&self) -> bool;
}
