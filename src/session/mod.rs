//! Notification session lifecycle
//!
//! A session turns one delivery request into registry calls and, when the
//! request needs the user's response, blocks until exactly one of:
//! - an activation for this session's uuid arrives
//! - the deadline passes
//! - the registry rejects the delivery
//! - the process is asked to terminate
//!
//! ```text
//! Created ──(no wait, delivered)──────────────► Dismissed
//!    │
//!    └─(subscribe, deliver)─► AwaitingActivation ─► Activated | TimedOut | Failed
//! ```
//!
//! The uuid attached to the notification's user-info payload is the only
//! correlation key. Activations for any other uuid (leftovers from earlier
//! runs, or other senders sharing the notification center) are cleared and
//! ignored.

pub mod latch;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::registry::{
    ActivationEvent, ActivationKind, ActivationObserver, DeliveryObserver, NotificationRecord,
    NotificationRegistry, OutgoingNotification, KEY_BUNDLE_ID, KEY_COMMAND, KEY_GROUP_ID,
    KEY_OPEN, KEY_UUID,
};
use crate::request::{DeliverRequest, GroupSelector};
use latch::SessionLatch;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    AwaitingActivation,
    Activated,
    TimedOut,
    Dismissed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Created | Self::AwaitingActivation)
    }
}

/// Why a session failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionFailure {
    /// The registry refused the notification
    Rejected(String),
    /// SIGINT/SIGTERM arrived while waiting
    Interrupted,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "notification was not delivered: {reason}"),
            Self::Interrupted => f.write_str("interrupted while waiting for a response"),
        }
    }
}

/// Terminal result of a delivery session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Activated(ActivationKind),
    TimedOut,
    /// Delivered without waiting for the user
    Dismissed,
    Failed(SessionFailure),
}

impl Outcome {
    pub fn state(&self) -> SessionState {
        match self {
            Self::Activated(_) => SessionState::Activated,
            Self::TimedOut => SessionState::TimedOut,
            Self::Dismissed => SessionState::Dismissed,
            Self::Failed(_) => SessionState::Failed,
        }
    }
}

/// Bookkeeping for one delivery request
#[derive(Debug, Clone)]
pub struct Session {
    pub uuid: String,
    pub group_id: Option<String>,
    pub wait_for_response: bool,
    pub timeout: Option<Duration>,
}

impl Session {
    /// Start a session with a fresh correlation key
    pub fn new(request: &DeliverRequest) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            group_id: request.group_id.clone(),
            wait_for_response: request.wait_for_response(),
            timeout: request.timeout,
        }
    }

    /// The notification to deliver, tagged with this session's uuid
    pub fn notification(&self, request: &DeliverRequest) -> OutgoingNotification {
        let mut user_info = BTreeMap::from([(KEY_UUID.to_string(), self.uuid.clone())]);
        if let Some(group_id) = &self.group_id {
            user_info.insert(KEY_GROUP_ID.to_string(), group_id.clone());
        }
        if let Some(bundle_id) = &request.activate_bundle_id {
            user_info.insert(KEY_BUNDLE_ID.to_string(), bundle_id.clone());
        }
        if let Some(command) = &request.command {
            user_info.insert(KEY_COMMAND.to_string(), command.clone());
        }
        if let Some(url) = &request.open_url {
            user_info.insert(KEY_OPEN.to_string(), url.to_string());
        }

        OutgoingNotification {
            uuid: self.uuid.clone(),
            title: request.title.clone(),
            subtitle: request.subtitle.clone(),
            message: request.message.clone(),
            group_id: self.group_id.clone(),
            sound: request.sound.clone(),
            app_icon: request.app_icon.clone(),
            content_image: request.content_image.clone(),
            close_label: request.close_label.clone(),
            interaction: request.interaction.clone(),
            timeout: self.timeout,
            wait_for_response: self.wait_for_response,
            user_info,
        }
    }
}

/// Registry callbacks for one session, resolving its latch
struct SessionListener {
    uuid: String,
    wait_for_response: bool,
    latch: Arc<SessionLatch>,
    registry: Arc<dyn NotificationRegistry>,
}

impl DeliveryObserver for SessionListener {
    fn delivered(&self, record: &NotificationRecord) {
        if record.uuid != self.uuid {
            return;
        }
        if self.wait_for_response {
            tracing::debug!(uuid = %self.uuid, "Delivered, awaiting activation");
        } else {
            self.latch.resolve(Outcome::Dismissed);
        }
    }

    fn delivery_failed(&self, uuid: &str, reason: &str) {
        if uuid == self.uuid {
            self.latch
                .resolve(Outcome::Failed(SessionFailure::Rejected(reason.to_string())));
        }
    }
}

impl ActivationObserver for SessionListener {
    fn activated(&self, event: &ActivationEvent) {
        match event.uuid() {
            Some(uuid) if uuid == self.uuid => {
                if self.latch.resolve(Outcome::Activated(event.kind.clone())) {
                    tracing::info!(uuid = %uuid, kind = ?event.kind, "Notification activated");
                }
            }
            Some(stale) => {
                tracing::debug!(
                    uuid = %stale,
                    session = %self.uuid,
                    "Clearing activation for another session"
                );
                self.registry.remove_notification(stale);
            }
            None => {
                tracing::debug!(kind = ?event.kind, "Ignoring activation without a session uuid");
            }
        }
    }
}

/// Drives deliver/list/remove requests against a registry
pub struct SessionCoordinator {
    registry: Arc<dyn NotificationRegistry>,
}

impl SessionCoordinator {
    pub fn new(registry: Arc<dyn NotificationRegistry>) -> Self {
        Self { registry }
    }

    /// Deliver a notification and resolve its session
    ///
    /// `interrupt` completing while the session waits resolves it as
    /// [`SessionFailure::Interrupted`]. The activation subscription is
    /// released before this returns on every path.
    pub async fn run_deliver<F>(&self, request: &DeliverRequest, interrupt: F) -> Outcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(group_id) = &request.group_id {
            let replaced = self
                .registry
                .remove(&GroupSelector::Group(group_id.clone()));
            if replaced > 0 {
                tracing::info!(group_id = %group_id, replaced, "Replacing notifications in group");
            }
        }

        let session = Session::new(request);
        tracing::debug!(
            uuid = %session.uuid,
            backend = self.registry.name(),
            wait = session.wait_for_response,
            timeout = ?session.timeout,
            "Starting session"
        );

        let (latch, outcome_rx) = SessionLatch::new();
        let listener = Arc::new(SessionListener {
            uuid: session.uuid.clone(),
            wait_for_response: session.wait_for_response,
            latch: Arc::clone(&latch),
            registry: Arc::clone(&self.registry),
        });

        let cancel = CancellationToken::new();
        let subscription = if session.wait_for_response {
            let subscription = self.registry.subscribe(listener.clone());
            latch.begin_waiting();
            match session.timeout.map(|timeout| Instant::now().checked_add(timeout)) {
                Some(Some(deadline)) => spawn_deadline(Arc::clone(&latch), deadline, cancel.clone()),
                Some(None) => {
                    tracing::warn!(timeout = ?session.timeout, "Timeout out of range, waiting without a deadline");
                }
                None => {}
            }
            spawn_interrupt(Arc::clone(&latch), interrupt, cancel.clone());
            Some(subscription)
        } else {
            None
        };

        self.registry
            .deliver(session.notification(request), listener);

        let outcome = outcome_rx.await.unwrap_or_else(|_| {
            Outcome::Failed(SessionFailure::Rejected(
                "session ended without a result".to_string(),
            ))
        });

        cancel.cancel();
        if let Some(subscription) = subscription {
            subscription.release();
        }

        if matches!(
            outcome,
            Outcome::Activated(_) | Outcome::TimedOut | Outcome::Failed(SessionFailure::Interrupted)
        ) {
            self.registry.remove_notification(&session.uuid);
        }

        tracing::info!(uuid = %session.uuid, outcome = ?outcome, "Session finished");
        outcome
    }

    /// Delivered notifications for `selector`
    pub fn run_list(&self, selector: &GroupSelector) -> Vec<NotificationRecord> {
        self.registry.delivered(selector)
    }

    /// Remove delivered notifications for `selector`; zero matches is fine
    pub fn run_remove(&self, selector: &GroupSelector) -> usize {
        let removed = self.registry.remove(selector);
        tracing::info!(selector = %selector, removed, "Removed notifications");
        removed
    }
}

fn spawn_deadline(latch: Arc<SessionLatch>, deadline: Instant, cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = tokio::time::sleep_until(deadline) => {
                if latch.resolve(Outcome::TimedOut) {
                    tracing::info!("Session timed out");
                }
            }
        }
    });
}

fn spawn_interrupt<F>(latch: Arc<SessionLatch>, interrupt: F, cancel: CancellationToken)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => {}
            () = interrupt => {
                if latch.resolve(Outcome::Failed(SessionFailure::Interrupted)) {
                    tracing::warn!("Session interrupted");
                }
            }
        }
    });
}

/// Completes on SIGINT or (on Unix) SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Could not listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::DeliverArgs;
    use crate::config::DeliveryDefaults;
    use crate::registry::memory::MemoryRegistry;
    use chrono::Local;
    use std::future::pending;

    fn deliver_request(args: DeliverArgs) -> DeliverRequest {
        let args = DeliverArgs {
            message: Some("hello".to_string()),
            ..args
        };
        DeliverRequest::from_args(args, &DeliveryDefaults::default(), || Ok(None)).unwrap()
    }

    fn setup() -> (Arc<MemoryRegistry>, SessionCoordinator) {
        let registry = Arc::new(MemoryRegistry::new());
        let coordinator = SessionCoordinator::new(registry.clone());
        (registry, coordinator)
    }

    fn record(uuid: &str, group: Option<&str>) -> NotificationRecord {
        NotificationRecord {
            uuid: uuid.to_string(),
            group_id: group.map(String::from),
            title: "old".to_string(),
            subtitle: None,
            message: "left over".to_string(),
            delivered_at: Local::now(),
            user_info: BTreeMap::from([(KEY_UUID.to_string(), uuid.to_string())]),
        }
    }

    /// Let the spawned session run until it has handed its notification over
    async fn delivered_uuid(registry: &MemoryRegistry) -> String {
        loop {
            if let Some(notification) = registry.deliveries().last() {
                return notification.uuid.clone();
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_and_forget_resolves_immediately() {
        let (registry, coordinator) = setup();
        let start = Instant::now();

        let outcome = coordinator
            .run_deliver(&deliver_request(DeliverArgs::default()), pending())
            .await;

        assert_eq!(outcome, Outcome::Dismissed);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(registry.subscriber_count(), 0);
        // fire-and-forget notifications stay in the notification center
        assert_eq!(registry.delivered(&GroupSelector::All).len(), 1);
        // a later click has nobody listening
        let uuid = registry.deliveries()[0].uuid.clone();
        assert_eq!(registry.activate(&uuid, ActivationKind::Clicked), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_group_replaces_previous() {
        let (registry, coordinator) = setup();
        let request = deliver_request(DeliverArgs {
            group: Some("ci".into()),
            ..DeliverArgs::default()
        });

        coordinator.run_deliver(&request, pending()).await;
        coordinator.run_deliver(&request, pending()).await;

        let records = coordinator.run_list(&GroupSelector::Group("ci".into()));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].uuid, registry.deliveries()[1].uuid);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_remove_by_group() {
        let (_registry, coordinator) = setup();
        for group in ["a", "b", "c"] {
            let request = deliver_request(DeliverArgs {
                group: Some(group.into()),
                ..DeliverArgs::default()
            });
            coordinator.run_deliver(&request, pending()).await;
        }

        assert_eq!(coordinator.run_list(&GroupSelector::All).len(), 3);
        let only_b = coordinator.run_list(&GroupSelector::Group("b".into()));
        assert_eq!(only_b.len(), 1);
        assert_eq!(only_b[0].group_id.as_deref(), Some("b"));

        // listing does not mutate
        assert_eq!(coordinator.run_list(&GroupSelector::All).len(), 3);

        assert_eq!(coordinator.run_remove(&GroupSelector::Group("missing".into())), 0);
        assert_eq!(coordinator.run_remove(&GroupSelector::Group("a".into())), 1);
        assert_eq!(coordinator.run_remove(&GroupSelector::All), 2);
        assert!(coordinator.run_list(&GroupSelector::All).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_no_earlier_than_deadline() {
        let (registry, coordinator) = setup();
        let request = deliver_request(DeliverArgs {
            timeout: Some(3),
            ..DeliverArgs::default()
        });
        let start = Instant::now();

        let outcome = coordinator.run_deliver(&request, pending()).await;

        assert_eq!(outcome, Outcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(registry.subscriber_count(), 0);
        assert!(registry.delivered(&GroupSelector::All).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_activation_resolves_and_removes() {
        let (registry, coordinator) = setup();
        let request = deliver_request(DeliverArgs {
            reply: Some("Reply".into()),
            ..DeliverArgs::default()
        });

        let session = tokio::spawn(async move { coordinator.run_deliver(&request, pending()).await });
        let uuid = delivered_uuid(&registry).await;
        assert_eq!(registry.subscriber_count(), 1);

        registry.activate(&uuid, ActivationKind::Replied("ok".into()));
        let outcome = session.await.unwrap();

        assert_eq!(outcome, Outcome::Activated(ActivationKind::Replied("ok".into())));
        assert_eq!(registry.subscriber_count(), 0);
        assert!(registry.delivered(&GroupSelector::All).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_activation_keeps_waiting() {
        let (registry, coordinator) = setup();
        registry.seed(record("from-last-run", Some("old")));
        let request = deliver_request(DeliverArgs {
            actions: vec!["Yes".into(), "No".into()],
            timeout: Some(5),
            ..DeliverArgs::default()
        });
        let start = Instant::now();

        let session = tokio::spawn(async move { coordinator.run_deliver(&request, pending()).await });
        delivered_uuid(&registry).await;

        for _ in 0..3 {
            registry.activate("from-last-run", ActivationKind::Clicked);
            registry.activate("someone-else", ActivationKind::ActionButton(0));
            tokio::task::yield_now().await;
        }
        assert!(!session.is_finished());
        // the stale notification was cleared from the notification center
        assert!(registry
            .delivered(&GroupSelector::Group("old".into()))
            .is_empty());

        let outcome = session.await.unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[test]
    fn test_listener_ignores_other_uuids() {
        let registry = Arc::new(MemoryRegistry::new());
        let (latch, _receiver) = SessionLatch::new();
        latch.begin_waiting();
        let listener = SessionListener {
            uuid: "mine".to_string(),
            wait_for_response: true,
            latch: Arc::clone(&latch),
            registry: registry.clone(),
        };

        listener.activated(&ActivationEvent {
            kind: ActivationKind::Clicked,
            user_info: BTreeMap::from([(KEY_UUID.to_string(), "theirs".to_string())]),
        });
        listener.activated(&ActivationEvent {
            kind: ActivationKind::Clicked,
            user_info: BTreeMap::new(),
        });
        listener.delivery_failed("theirs", "nope");
        assert_eq!(latch.state(), SessionState::AwaitingActivation);

        listener.activated(&ActivationEvent {
            kind: ActivationKind::ActionButton(1),
            user_info: BTreeMap::from([(KEY_UUID.to_string(), "mine".to_string())]),
        });
        assert_eq!(latch.state(), SessionState::Activated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_delivery_fails_session() {
        let (registry, coordinator) = setup();
        registry.reject_deliveries("notifications disabled");
        let request = deliver_request(DeliverArgs {
            timeout: Some(10),
            ..DeliverArgs::default()
        });
        let start = Instant::now();

        let outcome = coordinator.run_deliver(&request, pending()).await;

        assert_eq!(
            outcome,
            Outcome::Failed(SessionFailure::Rejected("notifications disabled".into()))
        );
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_releases_subscription() {
        let (registry, coordinator) = setup();
        let request = deliver_request(DeliverArgs {
            execute: Some("true".into()),
            ..DeliverArgs::default()
        });

        let outcome = coordinator
            .run_deliver(&request, tokio::time::sleep(Duration::from_secs(2)))
            .await;

        assert_eq!(outcome, Outcome::Failed(SessionFailure::Interrupted));
        assert_eq!(registry.subscriber_count(), 0);
        assert!(registry.delivered(&GroupSelector::All).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_deadline_waits_without_panicking() {
        let (registry, coordinator) = setup();
        let mut request = deliver_request(DeliverArgs {
            timeout: Some(5),
            ..DeliverArgs::default()
        });
        request.timeout = Some(Duration::MAX);

        let outcome = coordinator
            .run_deliver(&request, tokio::time::sleep(Duration::from_secs(1)))
            .await;

        assert_eq!(outcome, Outcome::Failed(SessionFailure::Interrupted));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_notification_payload_carries_correlation_data() {
        let request = deliver_request(DeliverArgs {
            group: Some("ci".into()),
            activate: Some("com.apple.Terminal".into()),
            execute: Some("say done".into()),
            open: Some("https://example.com/build/1".into()),
            ..DeliverArgs::default()
        });
        let session = Session::new(&request);
        let notification = session.notification(&request);

        assert_eq!(notification.uuid, session.uuid);
        assert!(notification.wait_for_response);
        assert_eq!(notification.user_info[KEY_UUID], session.uuid);
        assert_eq!(notification.user_info[KEY_GROUP_ID], "ci");
        assert_eq!(notification.user_info[KEY_BUNDLE_ID], "com.apple.Terminal");
        assert_eq!(notification.user_info[KEY_COMMAND], "say done");
        assert_eq!(notification.user_info[KEY_OPEN], "https://example.com/build/1");
    }

    #[test]
    fn test_each_session_gets_a_fresh_uuid() {
        let request = deliver_request(DeliverArgs::default());
        assert_ne!(Session::new(&request).uuid, Session::new(&request).uuid);
    }
}
