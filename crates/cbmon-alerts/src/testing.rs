//! Test doubles shared by the unit tests.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

use crate::alert::PostableAlert;
use crate::client::{AlertmanagerClient, BoxFuture, ClientFactory};
use crate::error::{AlertError, Result};

/// A client that records every batch it is given.
#[derive(Debug)]
pub struct RecordingClient {
    url: String,
    batches: Mutex<Vec<Vec<PostableAlert>>>,
    failing: Mutex<bool>,
    gate: Option<Arc<Semaphore>>,
    entered: Notify,
}

impl RecordingClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            batches: Mutex::new(Vec::new()),
            failing: Mutex::new(false),
            gate: None,
            entered: Notify::new(),
        }
    }

    /// Makes every post wait for a permit on `gate`.
    pub fn gated(url: impl Into<String>, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(url)
        }
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn batches(&self) -> Vec<Vec<PostableAlert>> {
        self.batches.lock().clone()
    }

    pub fn last_batch(&self) -> Option<Vec<PostableAlert>> {
        self.batches.lock().last().cloned()
    }

    pub fn post_count(&self) -> usize {
        self.batches.lock().len()
    }

    /// Resolves once a post has started.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }
}

impl AlertmanagerClient for RecordingClient {
    fn base_url(&self) -> &str {
        &self.url
    }

    fn post_alerts<'a>(&'a self, alerts: &'a [PostableAlert]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.entered.notify_one();
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.map_err(|e| AlertError::Transport {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
            }

            self.batches.lock().push(alerts.to_vec());
            if *self.failing.lock() {
                return Err(AlertError::Transport {
                    url: self.url.clone(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(())
        })
    }
}

/// A factory that counts what it creates and can be told to fail for some URLs.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    created: Mutex<usize>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingFactory {
    pub fn created(&self) -> usize {
        *self.created.lock()
    }

    pub fn fail_for(&self, url: &str) {
        self.failing.lock().insert(url.to_string());
    }
}

impl ClientFactory for RecordingFactory {
    fn create(&self, base_url: &str) -> Result<Arc<dyn AlertmanagerClient>> {
        if self.failing.lock().contains(base_url) {
            return Err(AlertError::Config(format!("cannot create client for {base_url}")));
        }
        *self.created.lock() += 1;
        Ok(Arc::new(RecordingClient::new(base_url)))
    }
}

/// A factory that hands out pre-built clients by URL.
#[derive(Debug, Default)]
pub struct FixedFactory {
    clients: Mutex<Vec<Arc<RecordingClient>>>,
}

impl FixedFactory {
    pub fn with(self, client: Arc<RecordingClient>) -> Self {
        self.clients.lock().push(client);
        self
    }
}

impl ClientFactory for FixedFactory {
    fn create(&self, base_url: &str) -> Result<Arc<dyn AlertmanagerClient>> {
        self.clients
            .lock()
            .iter()
            .find(|c| c.base_url() == base_url)
            .map(|c| Arc::clone(c) as Arc<dyn AlertmanagerClient>)
            .ok_or_else(|| AlertError::Config(format!("no client for {base_url}")))
    }
}
