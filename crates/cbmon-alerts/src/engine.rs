//! The alert lifecycle engine.
//!
//! This module provides the [`AlertEngine`], which periodically turns the
//! source's checker results into alerts and sends the full alert set to every
//! configured Alertmanager receiver.
//!
//! Each alert moves from *active* to *inactive* to dropped:
//! - a result with a new [`CacheKey`] creates an active alert
//! - a result with a known key updates the active alert in place
//! - an active key missing from a cycle's results is resolved and moved to inactive
//! - an inactive alert resolved longer ago than the retention is dropped
//!
//! Only one cycle runs at a time. A second caller gets
//! [`AlertError::AlreadyRunning`] instead of waiting.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::alert::{CacheKey, CheckerAlert, PostableAlert};
use crate::client::{ClientFactory, HttpClientFactory};
use crate::clock::{Clock, SystemClock};
use crate::config::AlertEngineConfig;
use crate::error::{AlertError, DeliveryErrors, Result};
use crate::registry::ReceiverRegistry;
use crate::source::CheckResultSource;
use crate::types::{CheckerDefinitions, CheckerResult, CheckerSearch};

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Alerts seen for the first time.
    pub created: usize,
    /// Active alerts refreshed from a newer result.
    pub updated: usize,
    /// Active alerts that resolved this cycle.
    pub inactivated: usize,
    /// Resolved alerts dropped after the retention period.
    pub expired: usize,
    /// Size of the batch sent to receivers.
    pub delivered: usize,
    /// True if there was nothing to report and no batch was sent.
    pub delivery_skipped: bool,
}

/// Number of alerts in each lifecycle set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertCounts {
    /// Firing alerts.
    pub active: usize,
    /// Resolved alerts still being reported.
    pub inactive: usize,
}

#[derive(Debug, Default)]
struct LifecycleState {
    active: HashMap<CacheKey, CheckerAlert>,
    inactive: HashMap<CacheKey, CheckerAlert>,
}

impl LifecycleState {
    fn is_empty(&self) -> bool {
        self.active.is_empty() && self.inactive.is_empty()
    }

    fn counts(&self) -> AlertCounts {
        AlertCounts {
            active: self.active.len(),
            inactive: self.inactive.len(),
        }
    }
}

/// Renders a lifecycle set in key order.
fn postable(
    set: &HashMap<CacheKey, CheckerAlert>,
    base_labels: &BTreeMap<String, String>,
) -> Vec<PostableAlert> {
    let mut alerts: Vec<_> = set.iter().collect();
    alerts.sort_by(|a, b| a.0.cmp(b.0));
    alerts
        .into_iter()
        .map(|(_, alert)| alert.to_postable(base_labels))
        .collect()
}

/// Held while a cycle runs. Clears the update flag on drop.
struct UpdateGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> UpdateGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Debug)]
struct EngineInner {
    source: Arc<dyn CheckResultSource>,
    definitions: Arc<CheckerDefinitions>,
    clock: Arc<dyn Clock>,
    resend_interval: Duration,
    max_inactive_lifetime: chrono::Duration,
    base_labels: BTreeMap<String, String>,
    // Lifecycle sets are only touched while `updating` is held.
    updating: AtomicBool,
    state: Mutex<LifecycleState>,
    receivers: ReceiverRegistry,
    tick_reset: Notify,
}

impl EngineInner {
    /// Runs one cycle. With `shutdown`, receiver calls still in flight are
    /// abandoned once it fires; the lifecycle changes are already committed.
    async fn reconcile(&self, shutdown: Option<&watch::Receiver<bool>>) -> Result<ReconcileSummary> {
        let _guard =
            UpdateGuard::try_acquire(&self.updating).ok_or(AlertError::AlreadyRunning)?;

        let results = self.source.checker_results(&CheckerSearch::default())?;
        let mut summary = ReconcileSummary::default();

        let batch = {
            let mut state = self.state.lock();
            let seen = self.apply_results(&mut state, &results, &mut summary)?;

            let now = self.clock.now();
            Self::inactivate_missing(&mut state, &seen, now, &mut summary);
            self.expire_inactive(&mut state, now, &mut summary);

            if state.is_empty() && summary.inactivated == 0 && summary.expired == 0 {
                None
            } else {
                let mut batch = postable(&state.active, &self.base_labels);
                batch.extend(postable(&state.inactive, &self.base_labels));
                Some(batch)
            }
        };

        match batch {
            Some(batch) => {
                summary.delivered = batch.len();
                self.deliver(&batch, shutdown).await?;
            }
            None => summary.delivery_skipped = true,
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            inactivated = summary.inactivated,
            expired = summary.expired,
            delivered = summary.delivered,
            skipped = summary.delivery_skipped,
            "alert update complete"
        );
        Ok(summary)
    }

    /// Creates or refreshes an active alert for every alertable result and
    /// returns the keys seen.
    ///
    /// Not transactional: alerts applied before a failing result stay applied.
    fn apply_results(
        &self,
        state: &mut LifecycleState,
        results: &[CheckerResult],
        summary: &mut ReconcileSummary,
    ) -> Result<HashSet<CacheKey>> {
        let mut seen = HashSet::new();

        for result in results.iter().filter(|r| r.status.is_alertable()) {
            let alert = CheckerAlert::new(result, self.source.as_ref(), &self.definitions)?;
            let key = alert.cache_key();

            if state.active.insert(key.clone(), alert).is_some() {
                summary.updated += 1;
            } else {
                debug!(
                    checker = %key.checker,
                    cluster = %key.cluster,
                    node = %key.node,
                    bucket = %key.bucket,
                    severity = %key.severity,
                    "alert created"
                );
                summary.created += 1;
            }
            seen.insert(key);
        }

        Ok(seen)
    }

    fn inactivate_missing(
        state: &mut LifecycleState,
        seen: &HashSet<CacheKey>,
        now: DateTime<Utc>,
        summary: &mut ReconcileSummary,
    ) {
        let missing: Vec<CacheKey> = state
            .active
            .keys()
            .filter(|key| !seen.contains(*key))
            .cloned()
            .collect();

        for key in missing {
            if let Some(mut alert) = state.active.remove(&key) {
                alert.resolve(now);
                debug!(
                    checker = %key.checker,
                    cluster = %key.cluster,
                    severity = %key.severity,
                    "alert resolved"
                );
                state.inactive.insert(key, alert);
                summary.inactivated += 1;
            }
        }
    }

    fn expire_inactive(
        &self,
        state: &mut LifecycleState,
        now: DateTime<Utc>,
        summary: &mut ReconcileSummary,
    ) {
        let before = state.inactive.len();
        state.inactive.retain(|key, alert| {
            let keep = alert
                .resolved_at
                .is_none_or(|at| now.signed_duration_since(at) <= self.max_inactive_lifetime);
            if !keep {
                debug!(checker = %key.checker, cluster = %key.cluster, "resolved alert expired");
            }
            keep
        });
        summary.expired += before - state.inactive.len();
    }

    /// Posts `batch` to every receiver concurrently and collects the failures.
    async fn deliver(
        &self,
        batch: &[PostableAlert],
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<()> {
        let receivers = self.receivers.snapshot();
        if receivers.is_empty() {
            debug!(alerts = batch.len(), "no alertmanager receivers configured");
            return Ok(());
        }

        let posts = receivers.iter().map(|receiver| {
            let shutdown = shutdown.cloned();
            async move {
                let Some(shutdown) = shutdown else {
                    return receiver.post_alerts(batch).await;
                };
                tokio::select! {
                    outcome = receiver.post_alerts(batch) => outcome,
                    () = shutdown_requested(shutdown) => Err(AlertError::Cancelled {
                        url: receiver.base_url().to_string(),
                    }),
                }
            }
        });
        let outcomes = join_all(posts).await;

        let mut errors = DeliveryErrors::new();
        for (receiver, outcome) in receivers.iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    debug!(url = %receiver.base_url(), alerts = batch.len(), "alerts delivered");
                }
                Err(e @ AlertError::Cancelled { .. }) => {
                    info!(url = %receiver.base_url(), "alert delivery cancelled");
                    errors.push(e);
                }
                Err(e) => {
                    warn!(url = %receiver.base_url(), error = %e, "failed to deliver alerts");
                    errors.push(e);
                }
            }
        }
        errors.into_result()
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.resend_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "alert loop started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = self.tick_reset.notified() => {
                    ticker.reset();
                }
                _ = ticker.tick() => {
                    match self.reconcile(Some(&shutdown)).await {
                        Ok(_) => {}
                        Err(AlertError::AlreadyRunning) => {
                            debug!("skipping scheduled alert update, another is running");
                        }
                        Err(AlertError::Delivery(_)) if *shutdown.borrow() => {
                            info!("alert update interrupted by shutdown");
                        }
                        Err(e) => warn!(error = %e, "scheduled alert update failed"),
                    }
                }
            }
        }
        info!("alert loop stopped");
    }
}

/// Resolves once shutdown is signalled or the loop handle is dropped.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[derive(Debug)]
struct LoopHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Builder for [`AlertEngine`].
#[derive(Debug)]
pub struct AlertEngineBuilder {
    source: Arc<dyn CheckResultSource>,
    config: AlertEngineConfig,
    definitions: Arc<CheckerDefinitions>,
    clock: Arc<dyn Clock>,
    factory: Option<Arc<dyn ClientFactory>>,
}

impl AlertEngineBuilder {
    fn new(source: Arc<dyn CheckResultSource>, config: AlertEngineConfig) -> Self {
        Self {
            source,
            config,
            definitions: CheckerDefinitions::builtin(),
            clock: Arc::new(SystemClock),
            factory: None,
        }
    }

    /// Sets the checker definition table.
    #[must_use]
    pub fn definitions(mut self, definitions: Arc<CheckerDefinitions>) -> Self {
        self.definitions = definitions;
        self
    }

    /// Sets the clock used to stamp and expire resolved alerts.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets how receiver clients are created.
    ///
    /// Defaults to HTTP clients using the configured receiver timeout.
    #[must_use]
    pub fn client_factory(mut self, factory: Arc<dyn ClientFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Builds the [`AlertEngine`].
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Config` if the configuration is invalid, or the
    /// factory's error if a receiver client cannot be built.
    pub fn build(self) -> Result<AlertEngine> {
        self.config.validate()?;

        let factory: Arc<dyn ClientFactory> = match self.factory {
            Some(factory) => factory,
            None => Arc::new(HttpClientFactory::new(self.config.receiver_timeout())),
        };
        let receivers = ReceiverRegistry::new(factory);
        receivers.update(self.config.alertmanager_urls.as_slice())?;

        let max_inactive_lifetime = chrono::Duration::from_std(self.config.max_inactive_lifetime())
            .map_err(|e| AlertError::Config(format!("max_inactive_lifetime_secs: {e}")))?;

        Ok(AlertEngine {
            inner: Arc::new(EngineInner {
                source: self.source,
                definitions: self.definitions,
                clock: self.clock,
                resend_interval: self.config.resend_interval(),
                max_inactive_lifetime,
                base_labels: self.config.base_labels,
                updating: AtomicBool::new(false),
                state: Mutex::new(LifecycleState::default()),
                receivers,
                tick_reset: Notify::new(),
            }),
            task: Mutex::new(None),
        })
    }
}

/// Turns checker results into Alertmanager alerts and keeps receivers up to date.
///
/// The engine runs a reconciliation cycle every resend interval once
/// [`start`](Self::start)ed, and on demand through
/// [`manual_update`](Self::manual_update).
#[derive(Debug)]
pub struct AlertEngine {
    inner: Arc<EngineInner>,
    task: Mutex<Option<LoopHandle>>,
}

impl AlertEngine {
    /// Creates an engine with the built-in checker table, the system clock
    /// and HTTP receivers.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(source: Arc<dyn CheckResultSource>, config: AlertEngineConfig) -> Result<Self> {
        Self::builder(source, config).build()
    }

    /// Creates a builder.
    pub fn builder(source: Arc<dyn CheckResultSource>, config: AlertEngineConfig) -> AlertEngineBuilder {
        AlertEngineBuilder::new(source, config)
    }

    /// Runs one reconciliation cycle and delivers the result.
    ///
    /// # Errors
    ///
    /// - `AlertError::AlreadyRunning` if another cycle is in flight
    /// - the source's error if results or a cluster cannot be read; alerts
    ///   applied earlier in the cycle are kept
    /// - `AlertError::Delivery` if any receiver failed; the lifecycle changes
    ///   are kept and resent next cycle
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        self.inner.reconcile(None).await
    }

    /// Runs a cycle outside the regular schedule.
    ///
    /// On success the schedule restarts, so the next scheduled cycle is a full
    /// resend interval away.
    ///
    /// # Errors
    ///
    /// Same as [`reconcile`](Self::reconcile). Never waits for an in-flight cycle.
    pub async fn manual_update(&self) -> Result<ReconcileSummary> {
        let summary = self.inner.reconcile(None).await?;
        self.inner.tick_reset.notify_one();
        Ok(summary)
    }

    /// Starts the background loop. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            debug!("alert loop already running");
            return;
        }

        let (shutdown, rx) = watch::channel(false);
        let join = tokio::spawn(Arc::clone(&self.inner).run_loop(rx));
        *task = Some(LoopHandle { shutdown, join });
    }

    /// Stops the background loop and waits for it to exit.
    ///
    /// A cycle already in progress keeps its lifecycle changes, but its
    /// pending receiver calls are cancelled.
    pub async fn stop(&self) {
        let handle = self.task.lock().take();
        let Some(handle) = handle else {
            return;
        };

        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.join.await {
            warn!(error = %e, "alert loop exited abnormally");
        }
    }

    /// Returns true while the background loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|h| !h.join.is_finished())
    }

    /// Replaces the receiver list. Clients for URLs that stay configured are kept.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Config` for malformed URLs, or the factory's error.
    /// The receiver list is unchanged on error.
    pub fn update_alertmanager_urls<S: AsRef<str>>(&self, urls: &[S]) -> Result<()> {
        for url in urls {
            crate::config::validate_url(url.as_ref())?;
        }
        self.inner.receivers.update(urls)
    }

    /// Returns the configured receiver URLs.
    #[must_use]
    pub fn alertmanager_urls(&self) -> Vec<String> {
        self.inner.receivers.urls()
    }

    /// Returns the firing alerts as they would be sent.
    #[must_use]
    pub fn active_alerts(&self) -> Vec<PostableAlert> {
        postable(&self.inner.state.lock().active, &self.inner.base_labels)
    }

    /// Returns the resolved alerts still being reported.
    #[must_use]
    pub fn inactive_alerts(&self) -> Vec<PostableAlert> {
        postable(&self.inner.state.lock().inactive, &self.inner.base_labels)
    }

    /// Returns the size of each lifecycle set.
    #[must_use]
    pub fn alert_counts(&self) -> AlertCounts {
        self.inner.state.lock().counts()
    }
}
