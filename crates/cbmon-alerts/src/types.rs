//! Core types consumed by the alerting engine.
//!
//! This module provides the values the engine reads from the outside world:
//! - [`CheckerStatus`]: The ordered status of a health-check evaluation
//! - [`CheckerResult`]: One health-check evaluation and its scope
//! - [`ClusterInfo`]: Display information for a cluster and its nodes
//! - [`CheckerSearch`]: A filter over stored checker results
//! - [`CheckerDefinitions`]: The read-only table describing every checker

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The status of a checker result.
///
/// The variant order is the total order used for comparisons:
/// `Good < Warn < Alert < Info < Missing`. Anything above `Good` is alertable.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CheckerStatus {
    /// The check passed.
    #[default]
    Good,
    /// The check found something worth a look.
    Warn,
    /// The check found a problem.
    Alert,
    /// The check has informational output.
    Info,
    /// The check could not be evaluated.
    Missing,
}

impl CheckerStatus {
    /// Returns the status as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warn => "warn",
            Self::Alert => "alert",
            Self::Info => "info",
            Self::Missing => "missing",
        }
    }

    /// Returns the value of the `severity` label for alerts with this status.
    #[must_use]
    pub const fn severity_label(&self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::Warn => "warning",
            Self::Alert => "critical",
            Self::Info => "info",
            Self::Missing => "missing",
        }
    }

    /// Returns true if a result with this status should become an alert.
    #[must_use]
    pub fn is_alertable(&self) -> bool {
        *self > Self::Good
    }
}

impl std::fmt::Display for CheckerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a checker result is about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultScope {
    /// UUID of the cluster the result belongs to.
    pub cluster_uuid: String,
    /// UUID of the node, for node-scoped results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_uuid: Option<String>,
    /// Bucket name, for bucket-scoped results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    /// Log file the result was derived from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

/// One health-check evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerResult {
    /// Name of the checker that produced this result.
    pub name: String,
    /// Outcome of the check.
    pub status: CheckerStatus,
    /// Suggested remediation.
    #[serde(default)]
    pub remediation: String,
    /// Raw value the checker observed, possibly empty.
    #[serde(default)]
    pub raw_value: String,
    /// When the check ran.
    pub time: DateTime<Utc>,
    /// What the result is about.
    #[serde(flatten)]
    pub scope: ResultScope,
}

impl CheckerResult {
    /// Creates a cluster-scoped result.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        cluster_uuid: impl Into<String>,
        status: CheckerStatus,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            status,
            remediation: String::new(),
            raw_value: String::new(),
            time,
            scope: ResultScope {
                cluster_uuid: cluster_uuid.into(),
                ..ResultScope::default()
            },
        }
    }

    /// Sets the remediation text.
    #[must_use]
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = remediation.into();
        self
    }

    /// Sets the raw value.
    #[must_use]
    pub fn with_raw_value(mut self, raw_value: impl Into<String>) -> Self {
        self.raw_value = raw_value.into();
        self
    }

    /// Scopes the result to a node.
    #[must_use]
    pub fn with_node(mut self, node_uuid: impl Into<String>) -> Self {
        self.scope.node_uuid = Some(node_uuid.into());
        self
    }

    /// Scopes the result to a bucket.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.scope.bucket = Some(bucket.into());
        self
    }

    /// Records the log file the result came from.
    #[must_use]
    pub fn with_log_file(mut self, log_file: impl Into<String>) -> Self {
        self.scope.log_file = Some(log_file.into());
        self
    }
}

/// A node in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// UUID of the node.
    pub node_uuid: String,
    /// Host the node is reachable at, e.g. `http://10.0.0.1:8091`.
    pub host: String,
}

/// Display information for a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// UUID of the cluster.
    pub uuid: String,
    /// Human-readable cluster name.
    pub name: String,
    /// Nodes currently in the cluster.
    #[serde(default)]
    pub nodes: Vec<NodeInfo>,
}

impl ClusterInfo {
    /// Creates cluster info without nodes.
    #[must_use]
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Adds a node.
    #[must_use]
    pub fn with_node(mut self, node_uuid: impl Into<String>, host: impl Into<String>) -> Self {
        self.nodes.push(NodeInfo {
            node_uuid: node_uuid.into(),
            host: host.into(),
        });
        self
    }

    /// Returns the host of the node with the given UUID.
    #[must_use]
    pub fn node_host(&self, node_uuid: &str) -> Option<&str> {
        self.nodes
            .iter()
            .find(|n| n.node_uuid == node_uuid)
            .map(|n| n.host.as_str())
    }
}

/// A filter over checker results. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckerSearch {
    /// Only results for this cluster.
    pub cluster_uuid: Option<String>,
    /// Only results for this node.
    pub node_uuid: Option<String>,
    /// Only results for this bucket.
    pub bucket: Option<String>,
    /// Only results from this checker.
    pub name: Option<String>,
    /// Only results with this status.
    pub status: Option<CheckerStatus>,
}

impl CheckerSearch {
    /// Returns true if the result passes this filter.
    #[must_use]
    pub fn matches(&self, result: &CheckerResult) -> bool {
        fn field_matches(want: Option<&String>, have: Option<&String>) -> bool {
            want.is_none_or(|w| have == Some(w))
        }

        self.cluster_uuid
            .as_ref()
            .is_none_or(|c| *c == result.scope.cluster_uuid)
            && field_matches(self.node_uuid.as_ref(), result.scope.node_uuid.as_ref())
            && field_matches(self.bucket.as_ref(), result.scope.bucket.as_ref())
            && self.name.as_ref().is_none_or(|n| *n == result.name)
            && self.status.is_none_or(|s| s == result.status)
    }
}

/// Static description of a checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckerDefinition {
    /// Stable checker ID, e.g. `CB90002`.
    pub id: String,
    /// Short machine-friendly name, e.g. `singleOrTwoNodeCluster`.
    pub name: String,
    /// One-line summary.
    pub title: String,
    /// Longer description.
    pub description: String,
}

/// The read-only table of checker definitions, keyed by checker name.
#[derive(Debug, Clone, Default)]
pub struct CheckerDefinitions {
    definitions: HashMap<String, CheckerDefinition>,
}

impl CheckerDefinitions {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a definition for the checker with the given name.
    #[must_use]
    pub fn with(
        mut self,
        checker: impl Into<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        self.definitions.insert(
            checker.into(),
            CheckerDefinition {
                id: id.into(),
                name: name.into(),
                title: title.into(),
                description: description.into(),
            },
        );
        self
    }

    /// Returns the definition for a checker.
    #[must_use]
    pub fn get(&self, checker: &str) -> Option<&CheckerDefinition> {
        self.definitions.get(checker)
    }

    /// Returns the number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Returns the built-in checker table, ready to share across threads.
    #[must_use]
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            Self::new()
                .with(
                    "CheckDeadNodes",
                    "CB90001",
                    "deadNodes",
                    "Dead nodes",
                    "Checks whether any node in the cluster is unhealthy or unreachable.",
                )
                .with(
                    "CheckSingleOrTwoNodeCluster",
                    "CB90002",
                    "singleOrTwoNodeCluster",
                    "One or two node cluster",
                    "Checks whether the cluster has fewer than three nodes, which limits \
                     replication and failover.",
                )
                .with(
                    "CheckNodeVersionMismatch",
                    "CB90003",
                    "nodeVersionMismatch",
                    "Mixed node versions",
                    "Checks whether all nodes in the cluster run the same server version.",
                )
                .with(
                    "CheckAutoFailoverEnabled",
                    "CB90004",
                    "autoFailoverEnabled",
                    "Auto-failover disabled",
                    "Checks whether auto-failover is enabled for the cluster.",
                )
                .with(
                    "CheckDiskSpace",
                    "CB90101",
                    "nodeDiskSpace",
                    "Node disk space",
                    "Checks whether any data or index path on the node is running out of space.",
                )
                .with(
                    "CheckNodeMemoryUsage",
                    "CB90102",
                    "nodeMemoryUsage",
                    "Node memory usage",
                    "Checks whether the node's memory usage is close to its quota.",
                )
                .with(
                    "CheckBucketMissingReplicas",
                    "CB90201",
                    "bucketMissingReplicas",
                    "Missing replicas",
                    "Checks whether the bucket has active vBuckets without replicas.",
                )
                .with(
                    "CheckBucketResidentRatio",
                    "CB90202",
                    "bucketResidentRatio",
                    "Low resident ratio",
                    "Checks whether the bucket's memory resident ratio is too low.",
                ),
        )
    }
}
