//! Data-source collaborator interface.
//!
//! The persistence/query engine lives outside this workspace. It is reached
//! only through [`DataSource`]: live subscriptions that push [`Emission`]s
//! and one-shot historical queries.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::filter::Constraint;
use crate::record::Record;

/// Incremental change notice.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Record),
    Modified(Record),
    Removed { id: String },
}

impl Change {
    /// Id of the affected record.
    pub fn id(&self) -> &str {
        match self {
            Self::Added(r) | Self::Modified(r) => r.id(),
            Self::Removed { id } => id,
        }
    }
}

/// One push from a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    /// Full replacement of the stream's record set.
    Snapshot(Vec<Record>),
    /// Incremental add/modify/remove notices, applied in order.
    Changes(Vec<Change>),
    /// The source gave up on this subscription (unreachable, permission
    /// denied). No further emissions follow.
    Failed(String),
}

/// Releases a source subscription. Runs its release action at most once,
/// either explicitly or on drop.
pub struct ReleaseHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ReleaseHandle {
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Handle with nothing to release.
    pub fn noop() -> Self {
        Self { release: None }
    }

    /// Run the release action. Returns false if it already ran.
    pub fn release(&mut self) -> bool {
        match self.release.take() {
            Some(release) => {
                release();
                true
            }
            None => false,
        }
    }
}

impl Drop for ReleaseHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ReleaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseHandle")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A live subscription returned by [`DataSource::subscribe`].
#[derive(Debug)]
pub struct SourceSubscription {
    pub emissions: mpsc::UnboundedReceiver<Emission>,
    pub handle: ReleaseHandle,
}

impl SourceSubscription {
    pub fn new(emissions: mpsc::UnboundedReceiver<Emission>, handle: ReleaseHandle) -> Self {
        Self { emissions, handle }
    }
}

/// The persistence/query collaborator.
///
/// Implementations may deliver full snapshots or incremental changes; both
/// must be accepted by consumers. Retries and reconnects are the
/// implementation's own business.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Open a live subscription on `collection`.
    ///
    /// Returns [`crate::Error::SourceSubscription`] when the collection is
    /// unreachable or access is denied.
    async fn subscribe(
        &self,
        collection: &str,
        constraints: &[Constraint],
    ) -> Result<SourceSubscription>;

    /// One-shot read of the records currently matching `constraints`.
    async fn query(&self, collection: &str, constraints: &[Constraint]) -> Result<Vec<Record>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_release_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let mut handle = ReleaseHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.release());
        assert!(!handle.release());
        drop(handle);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        drop(ReleaseHandle::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_change_id() {
        let r = Record::from_json(serde_json::json!({"id": "v1"})).unwrap();
        assert_eq!(Change::Added(r.clone()).id(), "v1");
        assert_eq!(Change::Modified(r).id(), "v1");
        assert_eq!(Change::Removed { id: "v2".into() }.id(), "v2");
    }
}
