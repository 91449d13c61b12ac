//! Polling list watcher
//!
//! The list collaborator: a background task that re-lists a resource path on
//! a fixed cadence and publishes the reactive pair (items-or-none,
//! error-or-none) on a watch channel. A fetch error keeps the last good item
//! list in place so one bad poll does not blank the view. Malformed items in
//! a list response are dropped at this boundary so downstream code only ever
//! sees the canonical typed shape.

use crate::client::proxy::ApiProxy;
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// List state
// =============================================================================

/// Current reading of one list source. `items` stays `None` until the first
/// successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ListState<T> {
    pub items: Option<Vec<T>>,
    pub error: Option<String>,
}

impl<T> Default for ListState<T> {
    fn default() -> Self {
        Self {
            items: None,
            error: None,
        }
    }
}

// =============================================================================
// Lenient item ingestion
// =============================================================================

/// Extracts `items` from a list response and deserializes each one, silently
/// skipping entries that do not match the expected shape (null, scalars,
/// foreign objects). A response without an `items` array is a shape error.
pub fn parse_items<T: DeserializeOwned>(value: &Value) -> Result<Vec<T>> {
    let raw = value
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::UnexpectedShape("list response has no items array".into()))?;

    let mut items = Vec::with_capacity(raw.len());
    let mut skipped = 0usize;
    for entry in raw {
        match serde_json::from_value::<T>(entry.clone()) {
            Ok(item) => items.push(item),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(skipped, "dropped malformed list items at ingestion");
    }
    Ok(items)
}

// =============================================================================
// List source
// =============================================================================

/// Handle to a polling list watcher.
pub struct ListSource<T> {
    rx: watch::Receiver<ListState<T>>,
    cancel: CancellationToken,
}

impl<T> ListSource<T>
where
    T: DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    /// Spawn a watcher polling `path` every `interval`.
    pub fn spawn(proxy: Arc<dyn ApiProxy>, path: impl Into<String>, interval: Duration) -> Self {
        let path = path.into();
        let (tx, rx) = watch::channel(ListState::default());
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let next = match fetch_list::<T>(proxy.as_ref(), &path).await {
                    Ok(items) => ListState {
                        items: Some(items),
                        error: None,
                    },
                    Err(err) => {
                        warn!(%path, error = %err, "list poll failed");
                        ListState {
                            items: tx.borrow().items.clone(),
                            error: Some(err.to_string()),
                        }
                    }
                };
                tx.send_if_modified(|current| {
                    if *current != next {
                        *current = next;
                        true
                    } else {
                        false
                    }
                });

                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!(%path, "list watcher stopped");
        });

        Self { rx, cancel }
    }

    /// Wrap an externally fed channel. Used when the list data comes from a
    /// collaborator other than the built-in poller, and by tests.
    pub fn from_receiver(rx: watch::Receiver<ListState<T>>) -> Self {
        Self {
            rx,
            cancel: CancellationToken::new(),
        }
    }

    /// Current reading.
    pub fn current(&self) -> ListState<T> {
        self.rx.borrow().clone()
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> watch::Receiver<ListState<T>> {
        self.rx.clone()
    }

    /// Stop the polling task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn fetch_list<T: DeserializeOwned>(proxy: &dyn ApiProxy, path: &str) -> Result<Vec<T>> {
    let value = proxy.get_json(path).await?;
    parse_items(&value)
}
