//! Coordinator Cell
//!
//! The locally believed coordinator. Replaced wholesale by a local
//! election or by a received announcement; last write wins.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// On-disk form of a persisted coordinator view
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredView {
    coordinator: Option<String>,
}

/// Atomically replaceable coordinator view
#[derive(Debug, Default)]
pub struct CoordinatorCell {
    /// Current coordinator name
    current: RwLock<Option<String>>,
    /// Where to persist the view, if durable
    path: Option<PathBuf>,
}

impl CoordinatorCell {
    /// Create an empty, in-memory cell
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cell persisted at `path`, loading any previous view
    pub fn persistent(path: PathBuf) -> Self {
        let current = load_view(&path);
        if let Some(name) = &current {
            tracing::info!("Restored coordinator view: {}", name);
        }

        Self {
            current: RwLock::new(current),
            path: Some(path),
        }
    }

    /// Current coordinator, if any
    pub async fn get(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// Whether `name` is the current coordinator
    pub async fn is(&self, name: &str) -> bool {
        self.current.read().await.as_deref() == Some(name)
    }

    /// Replace the coordinator; returns the previous one
    pub async fn set(&self, name: impl Into<String>) -> Option<String> {
        let name = name.into();
        let mut current = self.current.write().await;
        let previous = current.replace(name.clone());

        if previous.as_deref() != Some(name.as_str()) {
            tracing::info!("Coordinator is now {}", name);
        }

        if let Some(path) = &self.path {
            persist_view(path, &current).await;
        }

        previous
    }
}

fn load_view(path: &Path) -> Option<String> {
    let content = std::fs::read(path).ok()?;
    match serde_json::from_slice::<StoredView>(&content) {
        Ok(view) => view.coordinator.filter(|c| !c.is_empty()),
        Err(e) => {
            tracing::warn!("Ignoring malformed coordinator file {}: {}", path.display(), e);
            None
        }
    }
}

async fn persist_view(path: &Path, current: &Option<String>) {
    let view = StoredView {
        coordinator: current.clone(),
    };

    let result = async {
        let body = serde_json::to_vec_pretty(&view)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, body).await?;
        Ok::<_, crate::Error>(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!("Failed to persist coordinator to {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_last_write_wins() {
        let cell = CoordinatorCell::new();
        assert_eq!(cell.get().await, None);

        assert_eq!(cell.set("servidor2").await, None);
        assert_eq!(cell.set("servidor1").await.as_deref(), Some("servidor2"));
        assert!(cell.is("servidor1").await);
        assert!(!cell.is("servidor2").await);
    }

    #[tokio::test]
    async fn test_persistent_view_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coordinator.json");

        let cell = CoordinatorCell::persistent(path.clone());
        assert_eq!(cell.get().await, None);
        cell.set("servidor3").await;

        let reopened = CoordinatorCell::persistent(path);
        assert_eq!(reopened.get().await.as_deref(), Some("servidor3"));
    }

    #[tokio::test]
    async fn test_malformed_file_is_empty_view() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("coordinator.json");
        std::fs::write(&path, b"]]").unwrap();

        let cell = CoordinatorCell::persistent(path);
        assert_eq!(cell.get().await, None);
    }
}
