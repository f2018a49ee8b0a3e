use super::gallery::{DownloadSpec, Gallery, GalleryEntry};
use super::state::{DownloadState, Identity, ScanCursor, ScanMode, StateStore};
use crate::errors::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one manager invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanReport {
    pub state_key: String,
    /// Identities newly downloaded in this invocation, in order
    pub downloaded: Vec<Identity>,
    /// Entries passed over because they were already downloaded, including
    /// the known prefix of the page SKIP mode resumed on
    pub skipped: usize,
    pub pages_scanned: usize,
    /// Whole pages SKIP mode paged past without reading their entries
    pub pages_skipped: usize,
    pub transitions: Vec<(ScanMode, ScanMode)>,
    pub final_mode: ScanMode,
}

impl ScanReport {
    fn new(state_key: &str) -> Self {
        Self {
            state_key: state_key.to_string(),
            ..Default::default()
        }
    }
}

/// Scans a generation gallery and downloads every item not seen before.
///
/// Progress lives in a [`DownloadState`] loaded at start and persisted after
/// each confirmed download, so an interrupted run resumes where it stopped.
pub struct GenerationDownloadManager {
    store: Arc<dyn StateStore>,
    spec: DownloadSpec,
}

struct Scan {
    state: DownloadState,
    report: ScanReport,
}

impl Scan {
    fn transition(&mut self, to: ScanMode) {
        let from = self.state.mode;
        if from == to {
            return;
        }
        debug!(from = ?from, to = ?to, "scan mode transition");
        self.state.mode = to;
        self.report.transitions.push((from, to));
    }
}

impl GenerationDownloadManager {
    pub fn new(store: Arc<dyn StateStore>, spec: DownloadSpec) -> Self {
        Self { store, spec }
    }

    pub async fn run<G: Gallery + ?Sized>(
        &self,
        gallery: &G,
        start_from: Option<&Identity>,
    ) -> Result<ScanReport> {
        let key = self.spec.state_key.as_str();
        let state = self.store.load(key).await?.unwrap_or_default();
        let mut scan = Scan {
            state,
            report: ScanReport::new(key),
        };

        scan.state.mode = match start_from {
            Some(_) => ScanMode::Searching,
            None if scan.state.has_progress() => ScanMode::Skip,
            None => ScanMode::FullScan,
        };
        info!(
            key,
            mode = ?scan.state.mode,
            known = scan.state.downloaded_identities.len(),
            start_from = start_from.map(Identity::as_str),
            "starting gallery scan"
        );

        let (mut cursor, mut prefetched) = if scan.state.mode == ScanMode::Skip {
            self.skip_to_cursor(gallery, &mut scan).await?
        } else {
            (ScanCursor::default(), None)
        };

        'pages: loop {
            scan.report.pages_scanned += 1;
            let entries = match prefetched.take() {
                Some(entries) => entries,
                None => gallery.entries().await?,
            };

            let mut offset = cursor.offset;
            while offset < entries.len() {
                let entry = &entries[offset];
                cursor.offset = offset;

                if scan.state.mode == ScanMode::Searching {
                    if Some(&entry.identity) == start_from {
                        info!(identity = %entry.identity, page = cursor.page, offset, "resume point found");
                        scan.transition(ScanMode::FullScan);
                    } else {
                        offset += 1;
                    }
                    continue;
                }

                if scan.state.is_downloaded(&entry.identity) {
                    scan.report.skipped += 1;
                    offset += 1;
                    continue;
                }

                if self.budget_spent(&scan) {
                    break 'pages;
                }
                self.download_entry(gallery, entry, cursor, &mut scan)
                    .await?;
                offset += 1;
            }

            if self.budget_spent(&scan) || self.page_limit_reached(&scan) {
                break;
            }
            if !gallery.next_page().await? {
                break;
            }
            cursor = ScanCursor::new(cursor.page + 1, 0);
        }

        if scan.state.mode == ScanMode::Searching {
            warn!(
                key,
                start_from = start_from.map(Identity::as_str),
                "resume point not found, downloading from the visible container"
            );
            scan.transition(ScanMode::ContainerFallback);
            self.download_container(gallery, &mut scan).await?;
        }

        scan.report.final_mode = scan.state.mode;
        self.store.save(key, &scan.state).await?;

        info!(
            key,
            downloaded = scan.report.downloaded.len(),
            skipped = scan.report.skipped,
            pages = scan.report.pages_scanned,
            pages_skipped = scan.report.pages_skipped,
            "gallery scan finished"
        );
        Ok(scan.report)
    }

    /// Pages straight to the persisted cursor. The entry before the cursor
    /// must still be the last processed one, otherwise the gallery has
    /// shifted and the scan starts over from the first page.
    async fn skip_to_cursor<G: Gallery + ?Sized>(
        &self,
        gallery: &G,
        scan: &mut Scan,
    ) -> Result<(ScanCursor, Option<Vec<GalleryEntry>>)> {
        let target = scan.state.scan_cursor;

        let mut reached = true;
        for _ in 0..target.page {
            if !gallery.next_page().await? {
                reached = false;
                break;
            }
            scan.report.pages_skipped += 1;
        }

        if reached {
            let entries = gallery.entries().await?;
            let anchor = target
                .offset
                .checked_sub(1)
                .and_then(|i| entries.get(i))
                .map(|e| &e.identity);
            if anchor.is_some() && anchor == scan.state.last_processed_identity.as_ref() {
                debug!(
                    pages = scan.report.pages_skipped,
                    offset = target.offset,
                    "skipped known prefix"
                );
                scan.report.skipped += target.offset;
                scan.transition(ScanMode::FullScan);
                return Ok((target, Some(entries)));
            }
        }

        warn!(
            page = target.page,
            offset = target.offset,
            "saved cursor no longer matches the gallery, rescanning from the start"
        );
        scan.report.pages_skipped = 0;
        gallery.rewind().await?;
        scan.transition(ScanMode::FullScan);
        Ok((ScanCursor::default(), None))
    }

    /// Leaves the gallery to download one entry, then comes back to the
    /// recorded cursor.
    async fn download_entry<G: Gallery + ?Sized>(
        &self,
        gallery: &G,
        entry: &GalleryEntry,
        cursor: ScanCursor,
        scan: &mut Scan,
    ) -> Result<()> {
        let saved = cursor;
        scan.transition(ScanMode::ExitScanReturn);

        gallery.open(entry).await?;
        let downloaded = gallery.download_open().await;
        gallery.return_to(&saved).await?;
        scan.transition(ScanMode::FullScan);
        downloaded?;

        self.confirm(entry.identity.clone(), saved.next(), scan)
            .await
    }

    async fn download_container<G: Gallery + ?Sized>(
        &self,
        gallery: &G,
        scan: &mut Scan,
    ) -> Result<()> {
        let items = gallery.container_items().await?;
        let cursor = scan.state.scan_cursor;

        for item in &items {
            if scan.state.is_downloaded(&item.identity) {
                scan.report.skipped += 1;
                continue;
            }
            if self.budget_spent(scan) {
                break;
            }
            gallery.download_in_container(item).await?;
            self.confirm(item.identity.clone(), cursor, scan).await?;
        }
        Ok(())
    }

    async fn confirm(&self, identity: Identity, cursor: ScanCursor, scan: &mut Scan) -> Result<()> {
        if !scan.state.record(identity.clone(), cursor) {
            return Ok(());
        }
        self.store.save(&self.spec.state_key, &scan.state).await?;
        info!(identity = %identity, "downloaded");
        scan.report.downloaded.push(identity);
        Ok(())
    }

    fn budget_spent(&self, scan: &Scan) -> bool {
        self.spec
            .max_downloads
            .is_some_and(|max| scan.report.downloaded.len() >= max)
    }

    fn page_limit_reached(&self, scan: &Scan) -> bool {
        self.spec
            .max_pages
            .is_some_and(|max| scan.report.pages_scanned >= max)
    }
}
