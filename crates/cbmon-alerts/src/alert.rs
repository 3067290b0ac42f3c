//! Alerts built from checker results.
//!
//! A [`CheckerAlert`] wraps one alertable [`CheckerResult`] and knows how to
//! present it to Alertmanager: its identity ([`CacheKey`]), its labels and
//! annotations, and its timing. [`PostableAlert`] is the wire record sent to
//! `POST /api/v2/alerts`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AlertError, Result};
use crate::source::CheckResultSource;
use crate::types::{CheckerDefinition, CheckerDefinitions, CheckerResult};

/// Value of the `job` label on every alert.
pub const JOB_NAME: &str = "couchbase_cluster_monitor";

/// Identity of an alert. Two results are the same alert iff their keys are equal.
///
/// Severity is part of the key, so a status change produces a different alert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    /// Checker name.
    pub checker: String,
    /// Cluster display name.
    pub cluster: String,
    /// Node host, empty for non-node results.
    pub node: String,
    /// Bucket name, empty for non-bucket results.
    pub bucket: String,
    /// Severity label.
    pub severity: String,
}

/// An alert derived from a checker result.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerAlert {
    result: CheckerResult,
    definition: Option<CheckerDefinition>,
    cluster_name: String,
    node_host: String,
    /// Written into `startsAt`. Taken from the latest result.
    pub active_at: DateTime<Utc>,
    /// Written into `endsAt`. `None` while firing.
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CheckerAlert {
    /// Builds an alert for `result`, resolving display names through `source`.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidState` if the result is `Good`, or the
    /// source's error if the cluster cannot be looked up.
    pub fn new(
        result: &CheckerResult,
        source: &dyn CheckResultSource,
        definitions: &CheckerDefinitions,
    ) -> Result<Self> {
        if !result.status.is_alertable() {
            return Err(AlertError::InvalidState {
                reason: format!(
                    "result of {} has status {} and cannot become an alert",
                    result.name, result.status
                ),
            });
        }

        let cluster = source.cluster(&result.scope.cluster_uuid, false)?;
        let node_host = result
            .scope
            .node_uuid
            .as_deref()
            .and_then(|uuid| cluster.node_host(uuid))
            .unwrap_or_default()
            .to_string();

        Ok(Self {
            result: result.clone(),
            definition: definitions.get(&result.name).cloned(),
            cluster_name: cluster.name,
            node_host,
            active_at: result.time,
            resolved_at: None,
        })
    }

    /// Returns the result this alert was built from.
    #[must_use]
    pub const fn result(&self) -> &CheckerResult {
        &self.result
    }

    /// Returns the cluster display name.
    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    /// Returns the node host, empty if the result is not node-scoped or the node is gone.
    #[must_use]
    pub fn node_host(&self) -> &str {
        &self.node_host
    }

    /// Returns true while the alert has not been resolved.
    #[must_use]
    pub const fn is_firing(&self) -> bool {
        self.resolved_at.is_none()
    }

    /// Marks the alert resolved at `at`.
    pub fn resolve(&mut self, at: DateTime<Utc>) {
        self.resolved_at = Some(at);
    }

    /// Returns this alert's identity.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey {
            checker: self.result.name.clone(),
            cluster: self.cluster_name.clone(),
            node: self.node_host.clone(),
            bucket: self.result.scope.bucket.clone().unwrap_or_default(),
            severity: self.result.status.severity_label().to_string(),
        }
    }

    /// Returns the scope of the alert: `bucket`, `node` or `cluster`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        if self.result.scope.bucket.is_some() {
            "bucket"
        } else if self.result.scope.node_uuid.is_some() {
            "node"
        } else {
            "cluster"
        }
    }

    /// Returns the alert's labels, with `base` merged in without overwriting.
    #[must_use]
    pub fn labels(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let (id, name) = self
            .definition
            .as_ref()
            .map_or((String::new(), String::new()), |d| {
                (d.id.clone(), d.name.clone())
            });

        let mut labels = BTreeMap::from([
            ("job".to_string(), JOB_NAME.to_string()),
            ("kind".to_string(), self.kind().to_string()),
            (
                "severity".to_string(),
                self.result.status.severity_label().to_string(),
            ),
            ("health_check_id".to_string(), id),
            ("health_check_name".to_string(), name),
            ("cluster_name".to_string(), self.cluster_name.clone()),
        ]);

        if self.result.scope.node_uuid.is_some() {
            labels.insert("node".to_string(), strip_scheme(&self.node_host).to_string());
        }
        if let Some(bucket) = &self.result.scope.bucket {
            labels.insert("bucket".to_string(), bucket.clone());
        }

        for (k, v) in base {
            labels.entry(k.clone()).or_insert_with(|| v.clone());
        }
        labels
    }

    /// Returns the alert's annotations.
    #[must_use]
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let (summary, description) = self
            .definition
            .as_ref()
            .map_or((String::new(), String::new()), |d| {
                (d.title.clone(), d.description.clone())
            });

        let mut annotations = BTreeMap::from([
            ("summary".to_string(), summary),
            ("description".to_string(), description),
            ("remediation".to_string(), self.result.remediation.clone()),
        ]);
        if !self.result.raw_value.is_empty() {
            annotations.insert("raw_value".to_string(), self.result.raw_value.clone());
        }
        annotations
    }

    /// Renders the alert as an Alertmanager wire record.
    #[must_use]
    pub fn to_postable(&self, base_labels: &BTreeMap<String, String>) -> PostableAlert {
        PostableAlert {
            labels: self.labels(base_labels),
            annotations: self.annotations(),
            starts_at: self.active_at,
            ends_at: self.resolved_at,
            generator_url: None,
        }
    }
}

fn strip_scheme(host: &str) -> &str {
    host.split_once("://").map_or(host, |(_, rest)| rest)
}

/// An alert as accepted by Alertmanager's `POST /api/v2/alerts`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostableAlert {
    /// Identifying labels.
    pub labels: BTreeMap<String, String>,
    /// Informational annotations.
    pub annotations: BTreeMap<String, String>,
    /// When the alert became active.
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    /// When the alert was resolved. Absent while firing.
    #[serde(rename = "endsAt", default, skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the generator.
    #[serde(
        rename = "generatorURL",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub generator_url: Option<String>,
}
