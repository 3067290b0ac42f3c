//! Error types for the cbmon-alerts crate.

use std::fmt;

use thiserror::Error;

/// Errors that can occur in the alerting engine.
#[derive(Debug, Error)]
pub enum AlertError {
    /// A reconciliation cycle is already in flight.
    ///
    /// This is expected under concurrent triggers; callers should not retry
    /// immediately.
    #[error("alert update already running")]
    AlreadyRunning,

    /// An operation was attempted on a value in the wrong state.
    #[error("invalid state: {reason}")]
    InvalidState {
        /// Why the state is invalid.
        reason: String,
    },

    /// The checker-result source could not be read.
    #[error("checker result source failed: {reason}")]
    Source {
        /// The reason the source failed.
        reason: String,
    },

    /// The cluster a result belongs to could not be looked up.
    #[error("failed to look up cluster {cluster_uuid}: {reason}")]
    ClusterLookup {
        /// UUID of the cluster.
        cluster_uuid: String,
        /// The reason the lookup failed.
        reason: String,
    },

    /// An Alertmanager receiver answered with a non-2xx status.
    #[error("alertmanager {url} returned status {status}: {body}")]
    ReceiverRejected {
        /// Base URL of the receiver.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Response body, as text where possible.
        body: String,
    },

    /// An Alertmanager receiver could not be reached.
    #[error("failed to reach alertmanager {url}: {reason}")]
    Transport {
        /// Base URL of the receiver.
        url: String,
        /// The reason the request failed.
        reason: String,
    },

    /// Delivery failed for one or more receivers.
    #[error(transparent)]
    Delivery(DeliveryErrors),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A delivery was abandoned because the engine is shutting down.
    #[error("delivery to alertmanager {url} cancelled by shutdown")]
    Cancelled {
        /// Base URL of the receiver.
        url: String,
    },
}

/// The per-receiver failures collected during one delivery.
#[derive(Debug, Default)]
pub struct DeliveryErrors {
    errors: Vec<AlertError>,
}

impl DeliveryErrors {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self { errors: Vec::new() }
    }

    /// Records a receiver failure.
    pub fn push(&mut self, err: AlertError) {
        self.errors.push(err);
    }

    /// Returns true if no failures were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of failed receivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns the recorded failures.
    #[must_use]
    pub fn errors(&self) -> &[AlertError] {
        &self.errors
    }

    /// Converts into `Ok(())` when empty, otherwise into an [`AlertError::Delivery`].
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AlertError::Delivery(self))
        }
    }
}

impl fmt::Display for DeliveryErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery failed for {} receiver(s)", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for DeliveryErrors {}

/// Result type for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;
