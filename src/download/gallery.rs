use super::state::{Identity, ScanCursor};
use crate::core::{BrowserDriver, DriverResult};
use crate::errors::DriverError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Selectors describing a generation gallery page.
///
/// `datetime_attribute` and `signature_attribute` name what to read from an
/// entry element: `text`, `value`, or any DOM attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GallerySelectors {
    pub entry: String,
    #[serde(default = "default_datetime_attribute")]
    pub datetime_attribute: String,
    #[serde(default = "default_signature_attribute")]
    pub signature_attribute: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
    pub download_button: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_button: Option<String>,
    pub container_item: String,
}

fn default_datetime_attribute() -> String {
    "data-datetime".to_string()
}

fn default_signature_attribute() -> String {
    "text".to_string()
}

/// Payload of a `downloadGenerations` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSpec {
    pub state_key: String,
    pub gallery: GallerySelectors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_downloads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    /// Index on the page (or in the container) it was read from
    pub position: usize,
    pub identity: Identity,
}

/// View of a paginated gallery as the download manager sees it.
#[async_trait]
pub trait Gallery: Send + Sync {
    /// Entries of the current page, in display order.
    async fn entries(&self) -> DriverResult<Vec<GalleryEntry>>;

    /// Moves to the next page; `false` when there is none or the gallery
    /// did not advance.
    async fn next_page(&self) -> DriverResult<bool>;

    /// Back to the first page.
    async fn rewind(&self) -> DriverResult<()>;

    /// Opens an entry's detail view, leaving the gallery.
    async fn open(&self, entry: &GalleryEntry) -> DriverResult<()>;

    /// Downloads the item in the open detail view.
    async fn download_open(&self) -> DriverResult<()>;

    /// Returns to the gallery with `cursor`'s page visible.
    async fn return_to(&self, cursor: &ScanCursor) -> DriverResult<()>;

    /// Items of the currently visible container.
    async fn container_items(&self) -> DriverResult<Vec<GalleryEntry>>;

    /// Downloads a container item in place, without gallery navigation.
    async fn download_in_container(&self, entry: &GalleryEntry) -> DriverResult<()>;
}

/// [`Gallery`] over any browser driver, driven by [`GallerySelectors`].
pub struct DriverGallery<'a, D: BrowserDriver> {
    driver: &'a D,
    selectors: GallerySelectors,
    home_url: String,
    settle_ms: u64,
}

impl<'a, D: BrowserDriver> DriverGallery<'a, D> {
    pub fn new(driver: &'a D, selectors: GallerySelectors, home_url: String, settle_ms: u64) -> Self {
        Self {
            driver,
            selectors,
            home_url,
            settle_ms,
        }
    }

    async fn settle(&self) -> DriverResult<()> {
        if self.settle_ms > 0 {
            self.driver.wait_ms(self.settle_ms).await?;
        }
        Ok(())
    }

    async fn read(&self, element: &D::Element, what: &str) -> DriverResult<Option<String>> {
        match what {
            "text" => Ok(Some(self.driver.get_text(element).await?)),
            "value" => self.driver.get_value(element).await,
            name => self.driver.get_attribute(element, name).await,
        }
    }

    async fn identities(&self, selector: &str) -> DriverResult<Vec<GalleryEntry>> {
        let elements = self.driver.find_elements(selector).await?;
        let mut entries = Vec::with_capacity(elements.len());

        for (position, element) in elements.iter().enumerate() {
            let datetime = self
                .read(element, &self.selectors.datetime_attribute)
                .await?
                .unwrap_or_default();
            let signature = self
                .read(element, &self.selectors.signature_attribute)
                .await?
                .unwrap_or_default();
            if datetime.trim().is_empty() && signature.trim().is_empty() {
                warn!(selector, position, "gallery entry has neither datetime nor signature");
            }
            entries.push(GalleryEntry {
                position,
                identity: Identity::new(&datetime, &signature),
            });
        }

        Ok(entries)
    }

    async fn is_disabled(&self, button: &D::Element) -> DriverResult<bool> {
        if self.driver.get_attribute(button, "disabled").await?.is_some() {
            return Ok(true);
        }
        let aria = self.driver.get_attribute(button, "aria-disabled").await?;
        Ok(aria.is_some_and(|v| v.trim().eq_ignore_ascii_case("true")))
    }

    async fn click_nth(&self, selector: &str, position: usize) -> DriverResult<()> {
        let elements = self.driver.find_elements(selector).await?;
        let element = elements.get(position).ok_or_else(|| {
            DriverError::ElementNotFound(format!("{} (position {})", selector, position))
        })?;
        self.driver.click(element).await
    }

    async fn click_required(&self, selector: &str) -> DriverResult<()> {
        let element = self
            .driver
            .find_element(selector)
            .await?
            .ok_or_else(|| DriverError::ElementNotFound(selector.to_string()))?;
        self.driver.click(&element).await
    }
}

#[async_trait]
impl<'a, D: BrowserDriver> Gallery for DriverGallery<'a, D> {
    async fn entries(&self) -> DriverResult<Vec<GalleryEntry>> {
        self.identities(&self.selectors.entry).await
    }

    async fn next_page(&self) -> DriverResult<bool> {
        let Some(selector) = &self.selectors.next_page else {
            return Ok(false);
        };
        let Some(button) = self.driver.find_element(selector).await? else {
            return Ok(false);
        };
        if self.is_disabled(&button).await? {
            debug!(selector, "next page control is disabled");
            return Ok(false);
        }

        let before = self.identities(&self.selectors.entry).await?;
        self.driver.click(&button).await?;
        self.settle().await?;
        let after = self.identities(&self.selectors.entry).await?;

        // A control that stays on the last page leaves the entries unchanged.
        if before == after {
            debug!(selector, "gallery did not advance, treating as last page");
            return Ok(false);
        }
        Ok(true)
    }

    async fn rewind(&self) -> DriverResult<()> {
        self.driver.navigate(&self.home_url).await?;
        self.settle().await
    }

    async fn open(&self, entry: &GalleryEntry) -> DriverResult<()> {
        self.click_nth(&self.selectors.entry, entry.position).await?;
        self.settle().await
    }

    async fn download_open(&self) -> DriverResult<()> {
        self.click_required(&self.selectors.download_button).await?;
        self.settle().await
    }

    async fn return_to(&self, cursor: &ScanCursor) -> DriverResult<()> {
        if let Some(close) = &self.selectors.close_button {
            if let Some(button) = self.driver.find_element(close).await? {
                self.driver.click(&button).await?;
                return self.settle().await;
            }
        }

        // No overlay to dismiss: reload the gallery and page forward.
        debug!(page = cursor.page, "restoring gallery page after leaving it");
        self.rewind().await?;
        for _ in 0..cursor.page {
            if !self.next_page().await? {
                return Err(DriverError::NavigationFailed(format!(
                    "gallery page {} no longer exists",
                    cursor.page
                )));
            }
        }
        Ok(())
    }

    async fn container_items(&self) -> DriverResult<Vec<GalleryEntry>> {
        self.identities(&self.selectors.container_item).await
    }

    async fn download_in_container(&self, entry: &GalleryEntry) -> DriverResult<()> {
        self.click_nth(&self.selectors.container_item, entry.position)
            .await?;
        self.click_required(&self.selectors.download_button).await?;
        self.settle().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ClickEffect, MockDriver, MockNode};

    fn selectors() -> GallerySelectors {
        GallerySelectors {
            entry: ".thumb".to_string(),
            datetime_attribute: "data-datetime".to_string(),
            signature_attribute: "text".to_string(),
            next_page: Some(".next".to_string()),
            download_button: ".download".to_string(),
            close_button: Some(".close".to_string()),
            container_item: ".visible-item".to_string(),
        }
    }

    #[tokio::test]
    async fn test_entries_read_identity_from_attributes() {
        let driver = MockDriver::new().with_nodes(
            ".thumb",
            vec![
                MockNode::with_text("a red fox").with_attribute("data-datetime", "2024-05-01 10:00"),
                MockNode::with_text("a blue whale").with_attribute("data-datetime", "2024-05-01 09:00"),
            ],
        );
        let gallery = DriverGallery::new(&driver, selectors(), "https://gen.test".into(), 0);

        let entries = gallery.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].position, 1);
        assert_eq!(entries[0].identity, Identity::new("2024-05-01 10:00", "a red fox"));
    }

    #[tokio::test]
    async fn test_next_page_reports_last_page() {
        let driver = MockDriver::new()
            .with_nodes(".thumb", vec![MockNode::with_text("page one")])
            .with_nodes(".next", vec![MockNode::with_text("Next")])
            .on_click(".next", ClickEffect::SetText { selector: ".thumb".into(), text: "page two".into() })
            .on_click(".next", ClickEffect::RemoveAll { selector: ".next".into() });
        let gallery = DriverGallery::new(&driver, selectors(), "https://gen.test".into(), 0);

        assert!(gallery.next_page().await.unwrap());
        assert!(!gallery.next_page().await.unwrap());
    }

    #[tokio::test]
    async fn test_next_page_that_does_not_advance_is_last_page() {
        let driver = MockDriver::new()
            .with_nodes(".thumb", vec![MockNode::with_text("only page")])
            .with_nodes(".next", vec![MockNode::with_text("Next")]);
        let gallery = DriverGallery::new(&driver, selectors(), "https://gen.test".into(), 0);

        assert!(!gallery.next_page().await.unwrap());
        assert!(!gallery.next_page().await.unwrap());
        assert_eq!(driver.count_calls("click:.next"), 2);
    }

    #[tokio::test]
    async fn test_disabled_next_page_is_not_clicked() {
        let driver = MockDriver::new()
            .with_nodes(".thumb", vec![MockNode::with_text("a")])
            .with_nodes(".next", vec![MockNode::with_text("Next").with_attribute("aria-disabled", "true")]);
        let gallery = DriverGallery::new(&driver, selectors(), "https://gen.test".into(), 0);
        assert!(!gallery.next_page().await.unwrap());

        let driver = MockDriver::new()
            .with_nodes(".thumb", vec![MockNode::with_text("a")])
            .with_nodes(".next", vec![MockNode::with_text("Next").with_attribute("disabled", "")]);
        let gallery = DriverGallery::new(&driver, selectors(), "https://gen.test".into(), 0);
        assert!(!gallery.next_page().await.unwrap());

        assert_eq!(driver.count_calls("click:"), 0);
    }

    #[tokio::test]
    async fn test_persistent_next_control_ends_search_in_container_fallback() {
        use crate::download::manager::GenerationDownloadManager;
        use crate::download::state::{JsonStateStore, ScanMode};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let driver = MockDriver::new()
            .with_nodes(".thumb", vec![MockNode::with_text("a"), MockNode::with_text("b")])
            .with_nodes(".next", vec![MockNode::with_text("Next")])
            .with_nodes(".visible-item", vec![MockNode::with_text("x")])
            .with_nodes(".download", vec![MockNode::with_text("Download")]);
        let gallery = DriverGallery::new(&driver, selectors(), "https://gen.test".into(), 0);
        let spec = DownloadSpec {
            state_key: "g".to_string(),
            gallery: selectors(),
            max_downloads: None,
            max_pages: None,
        };
        let manager =
            GenerationDownloadManager::new(Arc::new(JsonStateStore::new(dir.path())), spec);

        let start = Identity::from("nope");
        let report = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            manager.run(&gallery, Some(&start)),
        )
        .await
        .expect("scan must terminate")
        .unwrap();

        assert_eq!(report.final_mode, ScanMode::ContainerFallback);
        assert_eq!(report.downloaded, vec![Identity::new("", "x")]);
        assert_eq!(driver.count_calls("click:.visible-item"), 1);
    }

    #[tokio::test]
    async fn test_return_without_close_button_pages_forward() {
        let driver = MockDriver::new()
            .with_nodes(".next", vec![MockNode::with_text("Next")])
            .on_click(
                ".next",
                ClickEffect::Append {
                    selector: ".thumb".into(),
                    node: MockNode::with_text("more"),
                },
            );
        let mut sel = selectors();
        sel.close_button = None;
        let gallery = DriverGallery::new(&driver, sel, "https://gen.test/g".into(), 0);

        gallery.return_to(&ScanCursor::new(2, 5)).await.unwrap();
        assert_eq!(driver.count_calls("navigate:https://gen.test/g"), 1);
        assert_eq!(driver.count_calls("click:.next"), 2);
    }

    #[tokio::test]
    async fn test_open_missing_position_fails() {
        let driver = MockDriver::new().with_nodes(".thumb", vec![MockNode::with_text("x")]);
        let gallery = DriverGallery::new(&driver, selectors(), "https://gen.test".into(), 0);
        let entry = GalleryEntry {
            position: 3,
            identity: Identity::from("x"),
        };
        assert!(matches!(
            gallery.open(&entry).await,
            Err(DriverError::ElementNotFound(_))
        ));
    }
}
