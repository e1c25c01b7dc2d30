//! In-process registry used by tests
//!
//! Behaves like a notification center that accepts everything immediately,
//! and lets tests play the user: activate delivered notifications, replay
//! stale activations from an earlier run, or reject deliveries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::{
    ActivationEvent, ActivationKind, ActivationObserver, DeliveredRecords, DeliveryObserver,
    NotificationRecord, NotificationRegistry, OutgoingNotification, Subscribers, Subscription,
    KEY_UUID,
};
use crate::errors::{BeckonError, Result};
use crate::request::GroupSelector;

#[derive(Default)]
pub struct MemoryRegistry {
    records: Mutex<DeliveredRecords>,
    subscribers: Arc<Mutex<Subscribers>>,
    deliveries: Mutex<Vec<OutgoingNotification>>,
    reject_with: Mutex<Option<String>>,
    unavailable: bool,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose notification service is not running
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Reject every following delivery with `reason`
    pub fn reject_deliveries(&self, reason: &str) {
        *self.reject_with.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.to_string());
    }

    /// Every notification handed to `deliver`, in order
    pub fn deliveries(&self) -> Vec<OutgoingNotification> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Simulate the user activating the delivered notification `uuid`
    ///
    /// Returns how many subscribers were notified.
    pub fn activate(&self, uuid: &str, kind: ActivationKind) -> usize {
        let user_info = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .matching(&GroupSelector::All)
            .into_iter()
            .find(|record| record.uuid == uuid)
            .map(|record| record.user_info)
            .unwrap_or_else(|| BTreeMap::from([(KEY_UUID.to_string(), uuid.to_string())]));

        Subscribers::emit(&self.subscribers, &ActivationEvent { kind, user_info })
    }

    /// Insert a record as if an earlier run had delivered it
    pub fn seed(&self, record: NotificationRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record);
    }
}

impl NotificationRegistry for MemoryRegistry {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(BeckonError::BackendUnavailable {
                user: "test".to_string(),
                reason: "memory registry marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn deliver(&self, notification: OutgoingNotification, observer: Arc<dyn DeliveryObserver>) {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());

        let rejection = self
            .reject_with
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(reason) = rejection {
            observer.delivery_failed(&notification.uuid, &reason);
            return;
        }

        let record = NotificationRecord::delivered(&notification);
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.clone());
        observer.delivered(&record);
    }

    fn delivered(&self, selector: &GroupSelector) -> Vec<NotificationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .matching(selector)
    }

    fn remove(&self, selector: &GroupSelector) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_matching(selector)
            .len()
    }

    fn remove_notification(&self, uuid: &str) -> bool {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_uuid(uuid)
    }

    fn subscribe(&self, observer: Arc<dyn ActivationObserver>) -> Subscription {
        Subscribers::subscribe(&self.subscribers, observer)
    }
}
