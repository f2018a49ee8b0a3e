use crate::errors::StateError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stable key of a gallery item: its datetime and content signature, with
/// whitespace runs collapsed so re-rendered markup yields the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Identity(String);

fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Identity {
    pub fn new(datetime: &str, signature: &str) -> Self {
        Identity(format!("{}#{}", normalize(datetime), normalize(signature)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Identity {
    fn from(raw: String) -> Self {
        Identity(normalize(&raw))
    }
}

impl From<&str> for Identity {
    fn from(raw: &str) -> Self {
        Identity(normalize(raw))
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position within the paginated gallery: next entry to look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScanCursor {
    pub page: usize,
    pub offset: usize,
}

impl ScanCursor {
    pub fn new(page: usize, offset: usize) -> Self {
        Self { page, offset }
    }

    pub fn next(&self) -> Self {
        Self {
            page: self.page,
            offset: self.offset + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanMode {
    #[default]
    FullScan,
    Skip,
    ExitScanReturn,
    Searching,
    ContainerFallback,
}

/// Download progress that survives across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadState {
    pub last_processed_identity: Option<Identity>,
    pub downloaded_identities: BTreeSet<Identity>,
    pub scan_cursor: ScanCursor,
    pub mode: ScanMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl DownloadState {
    pub fn is_downloaded(&self, identity: &Identity) -> bool {
        self.downloaded_identities.contains(identity)
    }

    /// Records a confirmed download. Returns `false` if the identity was
    /// already known, leaving the state untouched.
    pub fn record(&mut self, identity: Identity, cursor: ScanCursor) -> bool {
        if !self.downloaded_identities.insert(identity.clone()) {
            return false;
        }
        self.last_processed_identity = Some(identity);
        self.scan_cursor = cursor;
        self.updated_at = Some(Utc::now());
        true
    }

    pub fn has_progress(&self) -> bool {
        self.last_processed_identity.is_some() && self.scan_cursor != ScanCursor::default()
    }
}

/// Persistence for [`DownloadState`], keyed by gallery/session.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<DownloadState>, StateError>;

    async fn save(&self, key: &str, state: &DownloadState) -> Result<(), StateError>;
}

/// Stores each key as `<dir>/<key>.json`, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct JsonStateStore {
    dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StateError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(StateError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self, key: &str) -> Result<Option<DownloadState>, StateError> {
        let path = self.path_for(key)?;
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let state = serde_json::from_str(&contents).map_err(|source| StateError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        debug!(key, path = %path.display(), "loaded download state");
        Ok(Some(state))
    }

    async fn save(&self, key: &str, state: &DownloadState) -> Result<(), StateError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let json = serde_json::to_vec_pretty(state).map_err(|source| StateError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_normalizes_whitespace() {
        let a = Identity::new("2024-05-01  10:00", "a  cat\non a mat");
        let b = Identity::from("2024-05-01 10:00#a cat on a mat");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "2024-05-01 10:00#a cat on a mat");
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut state = DownloadState::default();
        let id = Identity::new("t1", "sig");
        assert!(state.record(id.clone(), ScanCursor::new(0, 1)));
        assert!(!state.record(id.clone(), ScanCursor::new(4, 4)));
        assert_eq!(state.downloaded_identities.len(), 1);
        assert_eq!(state.scan_cursor, ScanCursor::new(0, 1));
        assert!(state.has_progress());
    }

    #[test]
    fn test_mode_serializes_screaming_snake() {
        let json = serde_json::to_string(&ScanMode::ContainerFallback).unwrap();
        assert_eq!(json, "\"CONTAINER_FALLBACK\"");
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path().join("state"));

        let mut state = DownloadState::default();
        state.record(Identity::new("t1", "first"), ScanCursor::new(0, 1));
        state.record(Identity::new("t2", "second"), ScanCursor::new(2, 3));
        state.mode = ScanMode::Skip;

        store.save("gallery-main", &state).await.unwrap();
        let loaded = store.load("gallery-main").await.unwrap().unwrap();

        assert_eq!(loaded.scan_cursor, state.scan_cursor);
        assert_eq!(loaded.downloaded_identities, state.downloaded_identities);
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_missing_key_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());
        assert!(store.load("nothing-here").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let store = JsonStateStore::new("/tmp");
        assert!(matches!(store.path_for("../escape"), Err(StateError::InvalidKey(_))));
        assert!(matches!(store.path_for(""), Err(StateError::InvalidKey(_))));
        assert!(store.path_for("site_a.v2").is_ok());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStateStore::new(dir.path());
        tokio::fs::write(dir.path().join("broken.json"), "{not json")
            .await
            .unwrap();
        assert!(matches!(
            store.load("broken").await,
            Err(StateError::Corrupt { .. })
        ));
    }
}
