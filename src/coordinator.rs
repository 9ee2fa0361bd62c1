//! Single-flight scan coordination.
//!
//! At most one scan attempt is pending at a time. An admitted attempt races
//! the platform's scan-completion notification against a deadline; whichever
//! arrives first resolves the caller's [`PendingScan`] and tears the attempt
//! down (unsubscribe, cancel the timer, back to idle). A successful result is
//! also published once on the broadcast stream returned by
//! [`ScanCoordinator::subscribe_results`].
//!
//! # Example
//!
//! ```no_run
//! # async fn run(coordinator: wifi_scan::ScanCoordinator) {
//! let mut events = coordinator.subscribe_results();
//! match coordinator.scan().await {
//!     Ok(networks) => println!("{} networks", networks.len()),
//!     Err(e) => eprintln!("{}: {}", e.code(), e),
//! }
//! # let _ = events.recv().await;
//! # }
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::ScanError;
use crate::platform::{
    NotificationChannel, NotificationHandler, PermissionCheck, RadioControl, ScanNotification,
    SubscriptionHandle,
};
use crate::scan::NetworkObservation;

pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the result broadcast; slow listeners lag rather than block.
const EVENT_CAPACITY: usize = 16;

pub type ScanOutcome = Result<Vec<NetworkObservation>, ScanError>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long to wait for the completion notification.
    pub scan_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
        }
    }
}

impl CoordinatorConfig {
    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }
}

/// The one in-flight attempt.
struct ScanRequest {
    attempt: u64,
    completion: Option<oneshot::Sender<ScanOutcome>>,
    subscription: Option<SubscriptionHandle>,
    timer: CancellationToken,
    deadline: Instant,
}

enum ScanState {
    Idle,
    Pending(ScanRequest),
}

struct Shared {
    radio: Arc<dyn RadioControl>,
    channel: Arc<dyn NotificationChannel>,
    permissions: Arc<dyn PermissionCheck>,
    config: CoordinatorConfig,
    events: broadcast::Sender<Vec<NetworkObservation>>,
    state: Mutex<ScanState>,
    next_attempt: AtomicU64,
}

/// Coordinates scan attempts against the platform radio.
///
/// Dropping the coordinator aborts a pending attempt.
pub struct ScanCoordinator {
    shared: Arc<Shared>,
}

impl ScanCoordinator {
    pub fn new(
        radio: Arc<dyn RadioControl>,
        channel: Arc<dyn NotificationChannel>,
        permissions: Arc<dyn PermissionCheck>,
        config: CoordinatorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                radio,
                channel,
                permissions,
                config,
                events,
                state: Mutex::new(ScanState::Idle),
                next_attempt: AtomicU64::new(1),
            }),
        }
    }

    /// Admits a scan attempt and returns its completion handle.
    ///
    /// Preconditions are checked in order: radio enabled, capability granted,
    /// nothing already pending. Outside a Tokio runtime the request is
    /// refused with [`ScanError::RuntimeUnavailable`] before anything is
    /// registered.
    pub fn request_scan(&self) -> Result<PendingScan, ScanError> {
        let shared = &self.shared;

        if !shared.radio.is_enabled() {
            error!("WiFi is not enabled");
            return Err(ScanError::RadioDisabled);
        }

        let missing = shared.permissions.missing_capabilities();
        if !missing.is_empty() {
            error!(?missing, "permission denied");
            return Err(ScanError::PermissionDenied { missing });
        }

        // The race task needs a runtime; check before anything is registered.
        let runtime = Handle::try_current().map_err(|e| {
            error!(error = %e, "scan requested outside a Tokio runtime");
            ScanError::RuntimeUnavailable
        })?;

        let attempt = shared.next_attempt.fetch_add(1, Ordering::Relaxed);
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (completion, receiver) = oneshot::channel();
        let timer = CancellationToken::new();
        let deadline = Instant::now() + shared.config.scan_timeout;

        {
            let mut state = shared.lock_state();
            if matches!(*state, ScanState::Pending(_)) {
                warn!("scan already in progress");
                return Err(ScanError::AlreadyInProgress);
            }

            let handler: NotificationHandler = Box::new(move |notification: ScanNotification| {
                if notify_tx.send(notification).is_err() {
                    debug!(attempt, "notification arrived after the attempt resolved; ignored");
                }
            });
            let subscription = shared.channel.subscribe(handler).map_err(|e| {
                error!(attempt, error = %e, "failed to subscribe to scan notifications");
                ScanError::SubscriptionFailed(e.to_string())
            })?;
            debug!(attempt, subscription = subscription.0, "subscribed to scan notifications");

            *state = ScanState::Pending(ScanRequest {
                attempt,
                completion: Some(completion),
                subscription: Some(subscription),
                timer: timer.clone(),
                deadline,
            });
        }

        info!(attempt, "starting WiFi scan");
        let triggered = panic::catch_unwind(AssertUnwindSafe(|| shared.radio.trigger_scan()));
        let failure = match triggered {
            Ok(true) => None,
            Ok(false) => {
                error!(attempt, "platform rejected the scan request");
                Some(ScanError::TriggerFailed)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(attempt, %reason, "error starting WiFi scan");
                Some(ScanError::ScanFailed(format!("error starting WiFi scan: {}", reason)))
            }
        };
        if let Some(err) = failure {
            if let Some(mut request) = shared.take_attempt(attempt) {
                shared.release(&mut request);
            }
            return Err(err);
        }

        runtime.spawn(race(Arc::clone(shared), attempt, notify_rx, timer, deadline));

        Ok(PendingScan { receiver })
    }

    /// Requests a scan and waits for its outcome.
    pub async fn scan(&self) -> ScanOutcome {
        self.request_scan()?.await
    }

    /// Stream of successful scan results. Failures are never published.
    pub fn subscribe_results(&self) -> broadcast::Receiver<Vec<NetworkObservation>> {
        self.shared.events.subscribe()
    }

    pub fn is_scanning(&self) -> bool {
        matches!(*self.shared.lock_state(), ScanState::Pending(_))
    }

    /// Deadline of the pending attempt, if any.
    pub fn deadline(&self) -> Option<Instant> {
        match &*self.shared.lock_state() {
            ScanState::Pending(request) => Some(request.deadline),
            ScanState::Idle => None,
        }
    }

    /// Resolves a pending attempt with [`ScanError::Aborted`] and tears it down.
    /// Does nothing when idle.
    pub fn shutdown(&self) {
        let mut state = self.shared.lock_state();
        if let ScanState::Pending(request) = std::mem::replace(&mut *state, ScanState::Idle) {
            warn!(attempt = request.attempt, "coordinator shut down while scan was in progress");
            self.shared.resolve_and_release(request, Err(ScanError::Aborted));
        }
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, ScanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the pending request out of the state if it belongs to `attempt`.
    fn take_attempt(&self, attempt: u64) -> Option<ScanRequest> {
        let mut state = self.lock_state();
        Self::take_from(&mut state, attempt)
    }

    fn take_from(state: &mut ScanState, attempt: u64) -> Option<ScanRequest> {
        if !matches!(state, ScanState::Pending(request) if request.attempt == attempt) {
            return None;
        }
        match std::mem::replace(state, ScanState::Idle) {
            ScanState::Pending(request) => Some(request),
            ScanState::Idle => None,
        }
    }

    /// Resolves `attempt` with `outcome` unless another path already did.
    fn finish(&self, attempt: u64, outcome: ScanOutcome) {
        let mut state = self.lock_state();
        match Self::take_from(&mut state, attempt) {
            Some(request) => self.resolve_and_release(request, outcome),
            None => debug!(attempt, "attempt already resolved; outcome dropped"),
        }
    }

    /// Publishes, resolves and tears down. Called with the state lock held so
    /// that a new request cannot be admitted before teardown completes.
    fn resolve_and_release(&self, mut request: ScanRequest, outcome: ScanOutcome) {
        let attempt = request.attempt;
        if let Ok(networks) = &outcome {
            // Separate copies: the stream and the caller each own theirs.
            match self.events.send(networks.clone()) {
                Ok(listeners) => debug!(attempt, listeners, "published scan results"),
                Err(_) => debug!(attempt, "no result listeners"),
            }
        }

        if let Some(completion) = request.completion.take() {
            if completion.send(outcome).is_err() {
                debug!(attempt, "scan caller went away before resolution");
            }
        }
        self.release(&mut request);
    }

    /// Teardown: cancel the timer, release the subscription and drop the
    /// completion slot. Repeated calls are no-ops.
    fn release(&self, request: &mut ScanRequest) {
        request.timer.cancel();
        if let Some(subscription) = request.subscription.take() {
            match self.channel.unsubscribe(subscription) {
                Ok(()) => debug!(attempt = request.attempt, "unsubscribed from scan notifications"),
                Err(e) => error!(
                    attempt = request.attempt,
                    error = %e,
                    "error unregistering scan subscription"
                ),
            }
        }
        request.completion = None;
    }
}

/// Races the completion notification against the deadline for one attempt.
async fn race(
    shared: Arc<Shared>,
    attempt: u64,
    mut notifications: mpsc::UnboundedReceiver<ScanNotification>,
    timer: CancellationToken,
    deadline: Instant,
) {
    let mut channel_open = true;
    let outcome = loop {
        tokio::select! {
            biased;
            _ = timer.cancelled() => return,
            received = notifications.recv(), if channel_open => match received {
                Some(notification) => {
                    if let Some(outcome) = handle_notification(&shared, attempt, notification, deadline).await {
                        break outcome;
                    }
                }
                None => channel_open = false,
            },
            _ = tokio::time::sleep_until(deadline) => {
                warn!(attempt, "scan timeout - no results received");
                break Err(ScanError::Timeout(shared.config.scan_timeout));
            }
        }
    };
    shared.finish(attempt, outcome);
}

/// Turns a delivery into an outcome, or `None` if it should be ignored.
async fn handle_notification(
    shared: &Arc<Shared>,
    attempt: u64,
    notification: ScanNotification,
    deadline: Instant,
) -> Option<ScanOutcome> {
    let results_updated = match notification.validate() {
        Ok(flag) => flag,
        Err(e) => {
            warn!(attempt, error = %e, "ignoring notification");
            return None;
        }
    };
    debug!(attempt, results_updated, "scan notification received");

    if !results_updated {
        return Some(Err(ScanError::ScanFailed("no results updated".to_string())));
    }

    let radio = Arc::clone(&shared.radio);
    // A hung result read must not outlive the deadline.
    let fetch = tokio::task::spawn_blocking(move || radio.current_results());
    let Ok(fetched) = tokio::time::timeout_at(deadline, fetch).await else {
        warn!(attempt, "scan timeout - results not read before the deadline");
        return Some(Err(ScanError::Timeout(shared.config.scan_timeout)));
    };
    let outcome = match fetched {
        Ok(None) => {
            warn!(attempt, "scan results are unavailable");
            Err(ScanError::NoResultsAvailable)
        }
        Ok(Some(results)) if results.is_empty() => {
            warn!(attempt, "scan results are empty - no networks found");
            Err(ScanError::ScanFailed("no networks found".to_string()))
        }
        Ok(Some(results)) => {
            info!(attempt, count = results.len(), "scan completed");
            Ok(results)
        }
        Err(e) => {
            error!(attempt, error = %e, "error handling scan results");
            Err(ScanError::ScanFailed(format!("error processing scan results: {}", e)))
        }
    };
    Some(outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Completion handle for an admitted scan attempt.
///
/// Resolves exactly once. If the coordinator is dropped mid-attempt the
/// handle yields [`ScanError::Aborted`].
#[derive(Debug)]
pub struct PendingScan {
    receiver: oneshot::Receiver<ScanOutcome>,
}

impl Future for PendingScan {
    type Output = ScanOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(ScanError::Aborted)))
    }
}
