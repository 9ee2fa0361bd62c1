use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;

use wifi_scan::{
    ChannelError, CoordinatorConfig, LocalChannel, NetworkObservation, NotificationChannel,
    NotificationHandler, PermissionCheck, RadioControl, ScanCoordinator, ScanError, ScanErrorKind,
    ScanNotification, SubscriptionHandle,
};

struct FakeRadio {
    enabled: AtomicBool,
    accept: AtomicBool,
    results: Mutex<Option<Vec<NetworkObservation>>>,
    panic_on_read: AtomicBool,
    panic_on_trigger: AtomicBool,
    read_delay_ms: AtomicU64,
    triggers: AtomicUsize,
    deliver_on_trigger: Mutex<Option<(Arc<LocalChannel>, ScanNotification)>>,
}

impl FakeRadio {
    fn with_results(results: Option<Vec<NetworkObservation>>) -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            accept: AtomicBool::new(true),
            results: Mutex::new(results),
            panic_on_read: AtomicBool::new(false),
            panic_on_trigger: AtomicBool::new(false),
            read_delay_ms: AtomicU64::new(0),
            triggers: AtomicUsize::new(0),
            deliver_on_trigger: Mutex::new(None),
        })
    }
}

impl RadioControl for FakeRadio {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn trigger_scan(&self) -> bool {
        self.triggers.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_trigger.load(Ordering::SeqCst) {
            panic!("driver rejected ioctl");
        }
        let accepted = self.accept.load(Ordering::SeqCst);
        if accepted {
            if let Some((channel, notification)) = self.deliver_on_trigger.lock().unwrap().take() {
                channel.deliver(notification);
            }
        }
        accepted
    }

    fn current_results(&self) -> Option<Vec<NetworkObservation>> {
        if self.panic_on_read.load(Ordering::SeqCst) {
            panic!("result store corrupted");
        }
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        self.results.lock().unwrap().clone()
    }
}

struct FakePermissions {
    missing: BTreeSet<String>,
    queries: AtomicUsize,
}

impl FakePermissions {
    fn granted() -> Arc<Self> {
        Self::missing(BTreeSet::new())
    }

    fn missing(missing: BTreeSet<String>) -> Arc<Self> {
        Arc::new(Self {
            missing,
            queries: AtomicUsize::new(0),
        })
    }
}

impl PermissionCheck for FakePermissions {
    fn missing_capabilities(&self) -> BTreeSet<String> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.missing.clone()
    }
}

/// Channel whose subscribe or unsubscribe can be made to fail.
#[derive(Default)]
struct FlakyChannel {
    inner: LocalChannel,
    reject_subscribe: bool,
    fail_unsubscribe: bool,
    unsubscribe_calls: AtomicUsize,
}

impl NotificationChannel for FlakyChannel {
    fn subscribe(&self, handler: NotificationHandler) -> Result<SubscriptionHandle, ChannelError> {
        if self.reject_subscribe {
            return Err(ChannelError::SubscribeRejected("receiver limit reached".to_string()));
        }
        self.inner.subscribe(handler)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) -> Result<(), ChannelError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(handle)?;
        if self.fail_unsubscribe {
            return Err(ChannelError::UnsubscribeFailed {
                id: handle.0,
                reason: "receiver not registered".to_string(),
            });
        }
        Ok(())
    }
}

fn two_networks() -> Vec<NetworkObservation> {
    vec![
        NetworkObservation::new("Office", "aa:bb:cc:dd:ee:01", -71, "[WPA2-PSK-CCMP][ESS]", 5180),
        NetworkObservation::new("Home", "aa:bb:cc:dd:ee:02", -42, "[WPA2-PSK-CCMP][ESS]", 2412),
    ]
}

fn coordinator(radio: Arc<FakeRadio>, channel: Arc<LocalChannel>) -> ScanCoordinator {
    ScanCoordinator::new(
        radio,
        channel,
        FakePermissions::granted(),
        CoordinatorConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn disabled_radio_is_rejected_without_subscribing() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    radio.enabled.store(false, Ordering::SeqCst);
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(Arc::clone(&radio), Arc::clone(&channel));

    let err = coordinator.request_scan().unwrap_err();

    assert_eq!(err, ScanError::RadioDisabled);
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 0);
    assert!(!coordinator.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn missing_permission_reports_missing_set() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let missing: BTreeSet<String> = ["ACCESS_FINE_LOCATION".to_string()].into_iter().collect();
    let permissions = FakePermissions::missing(missing.clone());
    let coordinator = ScanCoordinator::new(
        Arc::clone(&radio) as Arc<dyn RadioControl>,
        Arc::clone(&channel) as Arc<dyn NotificationChannel>,
        Arc::clone(&permissions) as Arc<dyn PermissionCheck>,
        CoordinatorConfig::default(),
    );

    let err = coordinator.request_scan().unwrap_err();

    assert_eq!(err, ScanError::PermissionDenied { missing });
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 0);
    assert_eq!(permissions.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn permissions_are_queried_once_per_request() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let permissions = FakePermissions::granted();
    let coordinator = ScanCoordinator::new(
        radio,
        Arc::clone(&channel) as Arc<dyn NotificationChannel>,
        Arc::clone(&permissions) as Arc<dyn PermissionCheck>,
        CoordinatorConfig::default(),
    );

    let pending = coordinator.request_scan().unwrap();
    assert_eq!(permissions.queries.load(Ordering::SeqCst), 1);

    channel.deliver(ScanNotification::scan_completed(true));
    assert!(pending.await.is_ok());
    assert_eq!(permissions.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn successful_scan_resolves_caller_and_event_stream() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));
    let mut events = coordinator.subscribe_results();

    let pending = coordinator.request_scan().unwrap();
    assert!(coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 1);

    assert_eq!(channel.deliver(ScanNotification::scan_completed(true)), 1);
    let networks = pending.await.unwrap();

    assert_eq!(networks, two_networks());
    assert_eq!(networks[0].ssid, "Office");
    assert_eq!(events.recv().await.unwrap(), networks);
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(coordinator.deadline(), None);
}

#[tokio::test(start_paused = true)]
async fn empty_results_are_a_scan_failure() {
    let radio = FakeRadio::with_results(Some(Vec::new()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));
    let mut events = coordinator.subscribe_results();

    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(true));

    let err = pending.await.unwrap_err();
    assert_eq!(err, ScanError::ScanFailed("no networks found".to_string()));
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(channel.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn results_not_updated_is_a_scan_failure() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(false));

    let err = pending.await.unwrap_err();
    assert_eq!(err, ScanError::ScanFailed("no results updated".to_string()));
    assert_eq!(err.kind(), ScanErrorKind::ScanFailed);
}

#[tokio::test(start_paused = true)]
async fn unreadable_results_resolve_no_results_available() {
    let radio = FakeRadio::with_results(None);
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(true));

    assert_eq!(pending.await.unwrap_err(), ScanError::NoResultsAvailable);
    assert!(!coordinator.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn panicking_result_read_is_converted_to_scan_failure() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    radio.panic_on_read.store(true, Ordering::SeqCst);
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(true));

    match pending.await {
        Err(ScanError::ScanFailed(message)) => {
            assert!(message.starts_with("error processing scan results"))
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_resolves_and_late_notification_is_ignored() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = ScanCoordinator::new(
        Arc::clone(&radio) as Arc<dyn RadioControl>,
        Arc::clone(&channel) as Arc<dyn NotificationChannel>,
        FakePermissions::granted(),
        CoordinatorConfig::default().with_scan_timeout(Duration::from_secs(3)),
    );
    let mut events = coordinator.subscribe_results();

    let started = tokio::time::Instant::now();
    let pending = coordinator.request_scan().unwrap();
    assert_eq!(coordinator.deadline(), Some(started + Duration::from_secs(3)));

    let err = pending.await.unwrap_err();
    assert_eq!(err, ScanError::Timeout(Duration::from_secs(3)));
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);

    // Late delivery finds no subscriber and changes nothing.
    assert_eq!(channel.deliver(ScanNotification::scan_completed(true)), 0);
    tokio::task::yield_now().await;
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn second_request_while_pending_is_rejected() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(Arc::clone(&radio), Arc::clone(&channel));

    let first = coordinator.request_scan().unwrap();
    let second = coordinator.request_scan().unwrap_err();

    assert_eq!(second, ScanError::AlreadyInProgress);
    assert_eq!(second.code(), "ALREADY_SCANNING");
    assert_eq!(channel.subscriber_count(), 1);
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 1);

    channel.deliver(ScanNotification::scan_completed(true));
    assert_eq!(first.await.unwrap(), two_networks());
}

#[tokio::test(start_paused = true)]
async fn malformed_notifications_are_ignored() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification {
        action: "wifi.state-changed".to_string(),
        results_updated: Some(true),
    });
    channel.deliver(ScanNotification {
        action: wifi_scan::platform::SCAN_RESULTS_AVAILABLE_ACTION.to_string(),
        results_updated: None,
    });
    tokio::task::yield_now().await;
    assert!(coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 1);

    channel.deliver(ScanNotification::scan_completed(true));
    assert_eq!(pending.await.unwrap(), two_networks());
}

#[tokio::test(start_paused = true)]
async fn malformed_notification_alone_ends_in_timeout() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification {
        action: "wifi.state-changed".to_string(),
        results_updated: Some(true),
    });

    assert_eq!(pending.await.unwrap_err().kind(), ScanErrorKind::Timeout);
}

#[tokio::test(start_paused = true)]
async fn rejected_trigger_releases_subscription_without_timer() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    radio.accept.store(false, Ordering::SeqCst);
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(Arc::clone(&radio), Arc::clone(&channel));

    assert_eq!(coordinator.request_scan().unwrap_err(), ScanError::TriggerFailed);
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);

    // Nothing left to fire later: a fresh attempt is admitted immediately.
    radio.accept.store(true, Ordering::SeqCst);
    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(true));
    assert!(pending.await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn panicking_trigger_releases_attempt() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    radio.panic_on_trigger.store(true, Ordering::SeqCst);
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(Arc::clone(&radio), Arc::clone(&channel));

    match coordinator.request_scan() {
        Err(ScanError::ScanFailed(message)) => {
            assert!(message.starts_with("error starting WiFi scan"));
            assert!(message.contains("driver rejected ioctl"));
        }
        other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
    }
    assert!(!coordinator.is_scanning());
    assert_eq!(coordinator.deadline(), None);
    assert_eq!(channel.subscriber_count(), 0);

    radio.panic_on_trigger.store(false, Ordering::SeqCst);
    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(true));
    assert_eq!(pending.await.unwrap(), two_networks());
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 2);
}

#[test]
fn request_outside_runtime_is_refused_before_subscribing() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(Arc::clone(&radio), Arc::clone(&channel));

    let err = coordinator.request_scan().unwrap_err();

    assert_eq!(err, ScanError::RuntimeUnavailable);
    assert_eq!(err.code(), "NO_RUNTIME");
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_result_read_is_bounded_by_the_deadline() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    radio.read_delay_ms.store(1_000, Ordering::SeqCst);
    let channel = Arc::new(LocalChannel::new());
    let coordinator = ScanCoordinator::new(
        radio,
        Arc::clone(&channel) as Arc<dyn NotificationChannel>,
        FakePermissions::granted(),
        CoordinatorConfig::default().with_scan_timeout(Duration::from_millis(200)),
    );
    let mut events = coordinator.subscribe_results();

    let started = std::time::Instant::now();
    let pending = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(true));

    let err = pending.await.unwrap_err();
    assert_eq!(err, ScanError::Timeout(Duration::from_millis(200)));
    assert!(started.elapsed() < Duration::from_millis(900));
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
}

#[tokio::test(start_paused = true)]
async fn earlier_attempt_deadline_does_not_fire_into_next_attempt() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let first = coordinator.request_scan().unwrap();
    channel.deliver(ScanNotification::scan_completed(true));
    assert!(first.await.is_ok());

    tokio::time::advance(Duration::from_secs(2)).await;
    let second = coordinator.request_scan().unwrap();

    // Past the first attempt's 10 s deadline, short of the second's.
    tokio::time::advance(Duration::from_secs(9)).await;
    tokio::task::yield_now().await;
    assert!(coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 1);

    channel.deliver(ScanNotification::scan_completed(true));
    assert_eq!(second.await.unwrap(), two_networks());
    assert!(!coordinator.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn notification_delivered_during_trigger_is_handled() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    *radio.deliver_on_trigger.lock().unwrap() =
        Some((Arc::clone(&channel), ScanNotification::scan_completed(true)));
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let networks = coordinator.scan().await.unwrap();

    assert_eq!(networks.len(), 2);
    assert_eq!(channel.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_aborts_pending_scan() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let pending = coordinator.request_scan().unwrap();
    coordinator.shutdown();
    coordinator.shutdown();

    assert_eq!(pending.await.unwrap_err(), ScanError::Aborted);
    assert!(!coordinator.is_scanning());
    assert_eq!(channel.subscriber_count(), 0);

    // The cancelled race must not resolve anything later.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(!coordinator.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn dropping_coordinator_aborts_pending_scan() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(radio, Arc::clone(&channel));

    let pending = coordinator.request_scan().unwrap();
    drop(coordinator);

    assert_eq!(pending.await.unwrap_err(), ScanError::Aborted);
    assert_eq!(channel.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn subscribe_failure_leaves_coordinator_idle() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(FlakyChannel {
        reject_subscribe: true,
        ..Default::default()
    });
    let coordinator = ScanCoordinator::new(
        Arc::clone(&radio) as Arc<dyn RadioControl>,
        channel,
        FakePermissions::granted(),
        CoordinatorConfig::default(),
    );

    let err = coordinator.request_scan().unwrap_err();

    assert_eq!(err.kind(), ScanErrorKind::SubscriptionFailed);
    assert!(!coordinator.is_scanning());
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_failure_is_logged_not_propagated() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(FlakyChannel {
        fail_unsubscribe: true,
        ..Default::default()
    });
    let coordinator = ScanCoordinator::new(
        radio,
        Arc::clone(&channel) as Arc<dyn NotificationChannel>,
        FakePermissions::granted(),
        CoordinatorConfig::default(),
    );

    let pending = coordinator.request_scan().unwrap();
    channel.inner.deliver(ScanNotification::scan_completed(true));
    assert_eq!(pending.await.unwrap(), two_networks());

    assert_eq!(channel.unsubscribe_calls.load(Ordering::SeqCst), 1);
    assert!(!coordinator.is_scanning());

    let next = coordinator.request_scan().unwrap();
    assert_eq!(next.await.unwrap_err().kind(), ScanErrorKind::Timeout);
    assert_eq!(channel.unsubscribe_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn each_attempt_resolves_exactly_once() {
    let radio = FakeRadio::with_results(Some(two_networks()));
    let channel = Arc::new(LocalChannel::new());
    let coordinator = coordinator(Arc::clone(&radio), Arc::clone(&channel));
    let mut events = coordinator.subscribe_results();

    for _ in 0..3 {
        let pending = coordinator.request_scan().unwrap();
        // Two deliveries for one cycle: only the first can resolve.
        channel.deliver(ScanNotification::scan_completed(true));
        channel.deliver(ScanNotification::scan_completed(true));
        assert!(pending.await.is_ok());
    }

    for _ in 0..3 {
        assert_eq!(events.recv().await.unwrap(), two_networks());
    }
    assert_eq!(events.try_recv(), Err(TryRecvError::Empty));
    assert_eq!(radio.triggers.load(Ordering::SeqCst), 3);
}
