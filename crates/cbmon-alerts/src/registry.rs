//! The set of configured Alertmanager receivers.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::client::{AlertmanagerClient, ClientFactory};
use crate::error::Result;

/// Receivers the engine delivers to, one client per base URL.
///
/// The lock is only held to snapshot or replace the list, never across a
/// network call, so reconfiguration does not wait for in-flight deliveries.
#[derive(Debug)]
pub struct ReceiverRegistry {
    factory: Arc<dyn ClientFactory>,
    receivers: RwLock<Vec<Arc<dyn AlertmanagerClient>>>,
}

impl ReceiverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            receivers: RwLock::new(Vec::new()),
        }
    }

    /// Replaces the receiver list with `urls`.
    ///
    /// Clients for URLs that were already configured are kept as-is, so their
    /// connection pools survive. Duplicate URLs are collapsed.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if a client for a new URL cannot be built.
    /// The registry is left unchanged in that case.
    pub fn update<S: AsRef<str>>(&self, urls: &[S]) -> Result<()> {
        let mut receivers = self.receivers.write();
        let mut next: Vec<Arc<dyn AlertmanagerClient>> = Vec::with_capacity(urls.len());

        for url in urls.iter().map(AsRef::as_ref) {
            if next.iter().any(|c| c.base_url() == url) {
                continue;
            }
            let client = match receivers.iter().find(|c| c.base_url() == url) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let client = self.factory.create(url)?;
                    info!(url = %url, "added alertmanager receiver");
                    client
                }
            };
            next.push(client);
        }

        for removed in receivers
            .iter()
            .filter(|c| !next.iter().any(|n| n.base_url() == c.base_url()))
        {
            info!(url = %removed.base_url(), "removed alertmanager receiver");
        }

        *receivers = next;
        Ok(())
    }

    /// Returns the current clients.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn AlertmanagerClient>> {
        self.receivers.read().clone()
    }

    /// Returns the configured base URLs.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.receivers
            .read()
            .iter()
            .map(|c| c.base_url().to_string())
            .collect()
    }

    /// Returns the number of receivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.receivers.read().len()
    }

    /// Returns true if no receivers are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receivers.read().is_empty()
    }
}
