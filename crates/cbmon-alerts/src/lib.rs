//! Alert lifecycle engine for the Couchbase cluster monitor.
//!
//! `cbmon-alerts` turns stored health-check results into Prometheus
//! Alertmanager alerts and keeps a set of receivers up to date with them.
//!
//! # Features
//!
//! - **Alert identity**: Results are grouped by checker, cluster, node, bucket and severity
//! - **Lifecycle**: Alerts move from active to inactive and are dropped after a retention period
//! - **Resend loop**: The full alert set is resent on a fixed interval, or on demand
//! - **Fan-out**: Each batch is posted to every receiver concurrently, failures are collected
//! - **Reconfiguration**: Receivers can be replaced at runtime without losing their clients
//!
//! # Example
//!
//! ```rust
//! use cbmon_alerts::{
//!     CheckerAlert, CheckerDefinitions, CheckerResult, CheckerStatus, ClusterInfo,
//!     InMemorySource,
//! };
//! use chrono::Utc;
//! use std::collections::BTreeMap;
//!
//! let source = InMemorySource::new();
//! source.upsert_cluster(ClusterInfo::new("c-1", "prod"));
//!
//! let result = CheckerResult::new("CheckSingleOrTwoNodeCluster", "c-1", CheckerStatus::Warn, Utc::now())
//!     .with_remediation("Add a third node");
//!
//! let alert = CheckerAlert::new(&result, &source, &CheckerDefinitions::builtin()).unwrap();
//! let postable = alert.to_postable(&BTreeMap::new());
//!
//! assert_eq!(postable.labels["severity"], "warning");
//! assert_eq!(postable.labels["cluster_name"], "prod");
//! ```
//!
//! # Running the engine
//!
//! ```rust,ignore
//! use cbmon_alerts::{AlertEngine, AlertEngineConfig};
//! use std::sync::Arc;
//!
//! let config = AlertEngineConfig::from_file("alerts.toml")?;
//! let engine = AlertEngine::new(Arc::new(store), config)?;
//!
//! engine.start();
//! engine.manual_update().await?;
//! engine.update_alertmanager_urls(&["http://alertmanager:9093"])?;
//! engine.stop().await;
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/cbmon-alerts/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod alert;
pub mod client;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod source;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use alert::{CacheKey, CheckerAlert, PostableAlert, JOB_NAME};
pub use client::{AlertmanagerClient, ClientFactory, HttpAlertmanagerClient, HttpClientFactory};
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{AlertEngineConfig, MIN_INACTIVE_ALERT_LIFETIME};
pub use engine::{AlertCounts, AlertEngine, AlertEngineBuilder, ReconcileSummary};
pub use error::{AlertError, DeliveryErrors, Result};
pub use registry::ReceiverRegistry;
pub use source::{CheckResultSource, InMemorySource};
pub use types::{
    CheckerDefinition, CheckerDefinitions, CheckerResult, CheckerSearch, CheckerStatus,
    ClusterInfo, NodeInfo, ResultScope,
};
