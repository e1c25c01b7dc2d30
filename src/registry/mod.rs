//! Notification registry adapters
//!
//! The OS notification center owns delivered notifications; this module only
//! describes the contract the session coordinator needs from it:
//! - deliver a notification and hear back whether it was accepted
//! - query and remove delivered notifications by group
//! - subscribe to user activations
//!
//! Callbacks arrive on the backend's own thread through two narrow
//! interfaces, [`DeliveryObserver`] and [`ActivationObserver`].

pub mod desktop;
#[cfg(test)]
pub mod memory;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::errors::Result;
use crate::request::{GroupSelector, Interaction, Sound};

/// User-info key holding the session correlation key
pub const KEY_UUID: &str = "uuid";
/// User-info key holding the group ID
pub const KEY_GROUP_ID: &str = "groupID";
/// User-info key holding the bundle to activate on click
pub const KEY_BUNDLE_ID: &str = "bundleID";
/// User-info key holding the shell command to run on click
pub const KEY_COMMAND: &str = "command";
/// User-info key holding the URL to open on click
pub const KEY_OPEN: &str = "open";

/// A delivered notification as seen through the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub uuid: String,
    pub group_id: Option<String>,
    pub title: String,
    pub subtitle: Option<String>,
    pub message: String,
    pub delivered_at: DateTime<Local>,
    pub user_info: BTreeMap<String, String>,
}

impl NotificationRecord {
    /// Record for a notification the registry just accepted
    pub fn delivered(notification: &OutgoingNotification) -> Self {
        Self {
            uuid: notification.uuid.clone(),
            group_id: notification.group_id.clone(),
            title: notification.title.clone(),
            subtitle: notification.subtitle.clone(),
            message: notification.message.clone(),
            delivered_at: Local::now(),
            user_info: notification.user_info.clone(),
        }
    }
}

/// A notification ready to hand to the registry
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingNotification {
    pub uuid: String,
    pub title: String,
    pub subtitle: Option<String>,
    pub message: String,
    pub group_id: Option<String>,
    pub sound: Option<Sound>,
    pub app_icon: Option<String>,
    pub content_image: Option<String>,
    pub close_label: Option<String>,
    pub interaction: Interaction,
    pub timeout: Option<Duration>,
    pub wait_for_response: bool,
    /// Opaque payload echoed back with every activation
    pub user_info: BTreeMap<String, String>,
}

/// How the user interacted with a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationKind {
    /// The notification body was clicked
    Clicked,
    /// An action button (by position in the actions list) was chosen
    ActionButton(usize),
    /// The user typed a reply
    Replied(String),
    /// The notification was closed by the user
    Closed,
}

/// An activation callback from the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationEvent {
    pub kind: ActivationKind,
    /// Copy of the activated notification's user-info payload
    pub user_info: BTreeMap<String, String>,
}

impl ActivationEvent {
    /// Correlation key of the activated notification, if it carries one
    pub fn uuid(&self) -> Option<&str> {
        self.user_info.get(KEY_UUID).map(String::as_str)
    }
}

/// Receives the result of a single delivery
pub trait DeliveryObserver: Send + Sync {
    /// The registry accepted and displayed the notification
    fn delivered(&self, record: &NotificationRecord);

    /// The registry rejected the notification
    fn delivery_failed(&self, uuid: &str, reason: &str);
}

/// Receives user activations for any notification the registry reports
pub trait ActivationObserver: Send + Sync {
    fn activated(&self, event: &ActivationEvent);
}

/// Registration of an [`ActivationObserver`]
///
/// Dropping the subscription releases it.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Unsubscribe now
    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Contract between the session coordinator and the OS notification center
pub trait NotificationRegistry: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Fail with `BackendUnavailable` when the notification service is not running
    fn check_available(&self) -> Result<()>;

    /// Hand a notification to the OS
    ///
    /// The outcome is reported through `observer`, possibly from another
    /// thread and possibly after this call returns.
    fn deliver(&self, notification: OutgoingNotification, observer: Arc<dyn DeliveryObserver>);

    /// Delivered notifications matching `selector`, without side effects
    fn delivered(&self, selector: &GroupSelector) -> Vec<NotificationRecord>;

    /// Remove delivered notifications matching `selector`, returning how many
    fn remove(&self, selector: &GroupSelector) -> usize;

    /// Remove a single delivered notification by correlation key
    fn remove_notification(&self, uuid: &str) -> bool;

    /// Register for activation callbacks until the subscription is dropped
    fn subscribe(&self, observer: Arc<dyn ActivationObserver>) -> Subscription;
}

/// Activation observers shared between a registry and its callback thread
#[derive(Default)]
pub struct Subscribers {
    next_id: u64,
    observers: Vec<(u64, Arc<dyn ActivationObserver>)>,
}

impl Subscribers {
    /// Add an observer and return a subscription that removes it again
    pub fn subscribe(
        list: &Arc<Mutex<Self>>,
        observer: Arc<dyn ActivationObserver>,
    ) -> Subscription {
        let id = {
            let mut subscribers = list.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.next_id += 1;
            let id = subscribers.next_id;
            subscribers.observers.push((id, observer));
            id
        };

        let list = Arc::clone(list);
        Subscription::new(move || {
            let mut subscribers = list.lock().unwrap_or_else(PoisonError::into_inner);
            subscribers.observers.retain(|(existing, _)| *existing != id);
            tracing::trace!(subscription = id, "Activation subscription released");
        })
    }

    /// Deliver an activation to every current observer
    ///
    /// Observers are called outside the lock so they may call back into the
    /// registry.
    pub fn emit(list: &Mutex<Self>, event: &ActivationEvent) -> usize {
        let observers: Vec<Arc<dyn ActivationObserver>> = list
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in &observers {
            observer.activated(event);
        }
        observers.len()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

/// Shared storage for records of delivered notifications
#[derive(Debug, Default)]
pub struct DeliveredRecords {
    records: Vec<NotificationRecord>,
}

impl DeliveredRecords {
    pub fn insert(&mut self, record: NotificationRecord) {
        self.records.push(record);
    }

    pub fn matching(&self, selector: &GroupSelector) -> Vec<NotificationRecord> {
        self.records
            .iter()
            .filter(|record| selector.matches(record.group_id.as_deref()))
            .cloned()
            .collect()
    }

    /// Drop the records matching `selector` and hand them back
    pub fn remove_matching(&mut self, selector: &GroupSelector) -> Vec<NotificationRecord> {
        let (removed, kept) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|record| selector.matches(record.group_id.as_deref()));
        self.records = kept;
        removed
    }

    pub fn remove_uuid(&mut self, uuid: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.uuid != uuid);
        before != self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver {
        seen: AtomicUsize,
    }

    impl ActivationObserver for CountingObserver {
        fn activated(&self, _event: &ActivationEvent) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn event(uuid: &str) -> ActivationEvent {
        ActivationEvent {
            kind: ActivationKind::Clicked,
            user_info: BTreeMap::from([(KEY_UUID.to_string(), uuid.to_string())]),
        }
    }

    fn record(uuid: &str, group: Option<&str>) -> NotificationRecord {
        NotificationRecord {
            uuid: uuid.to_string(),
            group_id: group.map(String::from),
            title: "t".to_string(),
            subtitle: None,
            message: "m".to_string(),
            delivered_at: Local::now(),
            user_info: BTreeMap::new(),
        }
    }

    #[test]
    fn test_subscription_drop_unsubscribes() {
        let list = Arc::new(Mutex::new(Subscribers::default()));
        let observer = Arc::new(CountingObserver::default());

        let subscription = Subscribers::subscribe(&list, observer.clone());
        assert_eq!(Subscribers::emit(&list, &event("a")), 1);
        assert_eq!(observer.seen.load(Ordering::SeqCst), 1);

        drop(subscription);
        assert_eq!(list.lock().unwrap().len(), 0);
        assert_eq!(Subscribers::emit(&list, &event("a")), 0);
        assert_eq!(observer.seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_only_removes_own_observer() {
        let list = Arc::new(Mutex::new(Subscribers::default()));
        let first = Subscribers::subscribe(&list, Arc::new(CountingObserver::default()));
        let _second = Subscribers::subscribe(&list, Arc::new(CountingObserver::default()));

        first.release();
        assert_eq!(list.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_event_uuid_comes_from_payload() {
        assert_eq!(event("abc").uuid(), Some("abc"));
        let anonymous = ActivationEvent {
            kind: ActivationKind::Closed,
            user_info: BTreeMap::new(),
        };
        assert_eq!(anonymous.uuid(), None);
    }

    #[test]
    fn test_unavailable_backend_maps_to_exit_code() {
        use crate::errors::EXIT_BACKEND_UNAVAILABLE;

        let registry = memory::MemoryRegistry::unavailable();
        let err = registry.check_available().unwrap_err();
        assert_eq!(err.exit_code(), EXIT_BACKEND_UNAVAILABLE);
        assert!(memory::MemoryRegistry::new().check_available().is_ok());
    }

    #[test]
    fn test_delivered_records_selection() {
        let mut records = DeliveredRecords::default();
        records.insert(record("1", Some("ci")));
        records.insert(record("2", Some("deploy")));
        records.insert(record("3", None));

        let ci = GroupSelector::Group("ci".into());
        assert_eq!(records.matching(&ci).len(), 1);
        assert_eq!(records.matching(&GroupSelector::All).len(), 3);

        assert_eq!(records.remove_matching(&ci).len(), 1);
        assert!(records.remove_matching(&ci).is_empty());
        assert!(records.remove_uuid("3"));
        assert!(!records.remove_uuid("3"));
        assert_eq!(records.remove_matching(&GroupSelector::All).len(), 1);
    }
}
