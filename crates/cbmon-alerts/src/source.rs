//! Where checker results come from.
//!
//! The engine only reads from a [`CheckResultSource`]. Production code backs it
//! with the monitor's store; [`InMemorySource`] is a thread-safe implementation
//! for embedding and tests.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::error::{AlertError, Result};
use crate::types::{CheckerResult, CheckerSearch, ClusterInfo};

/// Read-only access to checker results and cluster metadata.
pub trait CheckResultSource: Send + Sync + fmt::Debug {
    /// Returns every stored result matching `search`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Source` if the results cannot be read.
    fn checker_results(&self, search: &CheckerSearch) -> Result<Vec<CheckerResult>>;

    /// Returns display information for a cluster.
    ///
    /// `sensitive` asks for credentials to be included; the engine never needs them.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::ClusterLookup` if the cluster cannot be found.
    fn cluster(&self, uuid: &str, sensitive: bool) -> Result<ClusterInfo>;
}

/// An in-memory [`CheckResultSource`].
#[derive(Debug, Default)]
pub struct InMemorySource {
    clusters: RwLock<HashMap<String, ClusterInfo>>,
    results: RwLock<Vec<CheckerResult>>,
}

impl InMemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a cluster.
    pub fn upsert_cluster(&self, cluster: ClusterInfo) {
        self.clusters.write().insert(cluster.uuid.clone(), cluster);
    }

    /// Removes a cluster. Returns `true` if it existed.
    pub fn remove_cluster(&self, uuid: &str) -> bool {
        self.clusters.write().remove(uuid).is_some()
    }

    /// Replaces every stored result.
    pub fn set_results(&self, results: Vec<CheckerResult>) {
        *self.results.write() = results;
    }

    /// Appends a result.
    pub fn push_result(&self, result: CheckerResult) {
        self.results.write().push(result);
    }

    /// Removes every stored result.
    pub fn clear_results(&self) {
        self.results.write().clear();
    }
}

impl CheckResultSource for InMemorySource {
    fn checker_results(&self, search: &CheckerSearch) -> Result<Vec<CheckerResult>> {
        let results = self.results.read();
        Ok(results
            .iter()
            .filter(|r| search.matches(r))
            .cloned()
            .collect())
    }

    fn cluster(&self, uuid: &str, _sensitive: bool) -> Result<ClusterInfo> {
        self.clusters
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| AlertError::ClusterLookup {
                cluster_uuid: uuid.to_string(),
                reason: "cluster not found".to_string(),
            })
    }
}
