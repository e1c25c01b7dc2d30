//! Native desktop notifications via notify-rust
//!
//! On Linux and BSD this talks to the freedesktop notification server over
//! D-Bus: action buttons, the close button and body clicks come back as
//! activations. On macOS the sender identity is applied with
//! `set_application`, but activations are not observable, so waiting
//! sessions end by timeout there.
//!
//! Freedesktop servers cannot be queried for delivered notifications, so
//! list only sees notifications delivered by this process. Grouped
//! notifications take a server id derived from the group, which lets a later
//! run replace or remove them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use notify_rust::Notification;

use super::{
    DeliveredRecords, DeliveryObserver, NotificationRecord, NotificationRegistry,
    OutgoingNotification, Subscribers, Subscription,
};
use crate::errors::Result;
use crate::request::{GroupSelector, Interaction, SenderIdentity, Sound};

/// App name shown when no sender identity is configured
const APP_NAME: &str = "beckon";

#[cfg(all(unix, not(target_os = "macos")))]
const DEFAULT_SOUND: &str = "message-new-instant";
#[cfg(not(all(unix, not(target_os = "macos"))))]
const DEFAULT_SOUND: &str = "Default";

/// Registry backed by the desktop's notification service
pub struct DesktopRegistry {
    sender: SenderIdentity,
    records: Arc<Mutex<DeliveredRecords>>,
    /// Server-side ids of notifications still on screen, by uuid
    server_ids: Arc<Mutex<HashMap<String, u32>>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl DesktopRegistry {
    pub fn new(sender: SenderIdentity) -> Self {
        #[cfg(target_os = "macos")]
        if let Some(bundle_id) = &sender.bundle_id {
            if let Err(e) = notify_rust::set_application(bundle_id) {
                tracing::warn!(bundle_id = %bundle_id, error = %e, "Could not set sender application");
            }
        }

        Self {
            sender,
            records: Arc::new(Mutex::new(DeliveredRecords::default())),
            server_ids: Arc::new(Mutex::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    fn app_name(&self) -> &str {
        self.sender.bundle_id.as_deref().unwrap_or(APP_NAME)
    }

    fn build(&self, outgoing: &OutgoingNotification) -> Notification {
        let mut notification = Notification::new();
        notification
            .summary(&outgoing.title)
            .body(&outgoing.message)
            .appname(self.app_name());

        if let Some(subtitle) = &outgoing.subtitle {
            notification.subtitle(subtitle);
        }
        if let Some(icon) = &outgoing.app_icon {
            notification.icon(icon);
        }
        match &outgoing.sound {
            Some(Sound::Default) => {
                notification.sound_name(DEFAULT_SOUND);
            }
            Some(Sound::Named(name)) => {
                notification.sound_name(name);
            }
            None => {}
        }
        describe_unsupported(outgoing);

        #[cfg(all(unix, not(target_os = "macos")))]
        xdg::decorate(&mut notification, outgoing);

        notification
    }

    /// Take a notification off the screen if this process showed it
    fn close_delivered(&self, uuid: &str) {
        let server_id = self
            .server_ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uuid);

        #[cfg(all(unix, not(target_os = "macos")))]
        if let Some(id) = server_id {
            xdg::close(id, self.app_name());
        }
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        let _ = server_id;
    }
}

impl NotificationRegistry for DesktopRegistry {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn check_available(&self) -> Result<()> {
        #[cfg(all(unix, not(target_os = "macos")))]
        {
            xdg::check_server()
        }
        #[cfg(not(all(unix, not(target_os = "macos"))))]
        {
            Ok(())
        }
    }

    fn deliver(&self, outgoing: OutgoingNotification, observer: Arc<dyn DeliveryObserver>) {
        let notification = self.build(&outgoing);
        let records = Arc::clone(&self.records);
        let server_ids = Arc::clone(&self.server_ids);
        let subscribers = Arc::clone(&self.subscribers);

        // show() and wait_for_action() block, so they get their own thread;
        // callbacks are reported from there
        std::thread::spawn(move || match notification.show() {
            Ok(handle) => {
                #[cfg(all(unix, not(target_os = "macos")))]
                server_ids
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(outgoing.uuid.clone(), handle.id());

                let record = NotificationRecord::delivered(&outgoing);
                records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(record.clone());
                tracing::debug!(uuid = %outgoing.uuid, "Notification delivered");
                observer.delivered(&record);

                #[cfg(all(unix, not(target_os = "macos")))]
                if outgoing.wait_for_response {
                    xdg::wait_for_activation(handle, &outgoing, &subscribers, &server_ids);
                }
                #[cfg(not(all(unix, not(target_os = "macos"))))]
                {
                    let _ = (handle, server_ids, subscribers);
                }
            }
            Err(e) => {
                tracing::warn!(uuid = %outgoing.uuid, error = %e, "Notification rejected");
                observer.delivery_failed(&outgoing.uuid, &e.to_string());
            }
        });
    }

    fn delivered(&self, selector: &GroupSelector) -> Vec<NotificationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .matching(selector)
    }

    fn remove(&self, selector: &GroupSelector) -> usize {
        let removed = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_matching(selector);
        for record in &removed {
            self.close_delivered(&record.uuid);
        }

        // a group delivered by an earlier run still holds its derived id
        #[cfg(all(unix, not(target_os = "macos")))]
        if let (GroupSelector::Group(group), true) = (selector, removed.is_empty()) {
            xdg::close(xdg::group_notification_id(group), self.app_name());
        }

        tracing::debug!(selector = %selector, removed = removed.len(), "Removed delivered notifications");
        removed.len()
    }

    fn remove_notification(&self, uuid: &str) -> bool {
        let removed = self
            .records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove_uuid(uuid);
        self.close_delivered(uuid);
        removed
    }

    fn subscribe(&self, observer: Arc<dyn super::ActivationObserver>) -> Subscription {
        Subscribers::subscribe(&self.subscribers, observer)
    }
}

/// Log requested features this backend cannot show
fn describe_unsupported(outgoing: &OutgoingNotification) {
    match &outgoing.interaction {
        Interaction::Reply { placeholder } => tracing::warn!(
            placeholder = %placeholder,
            "Inline replies are not supported by this backend; waiting for click, close or timeout"
        ),
        Interaction::Actions {
            dropdown_label: Some(label),
            ..
        } => tracing::debug!(label = %label, "Dropdown label has no equivalent on this backend"),
        _ => {}
    }
    if outgoing.content_image.is_some() && cfg!(not(all(unix, not(target_os = "macos")))) {
        tracing::debug!("Content images are not supported on this platform");
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod xdg {
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use notify_rust::{Hint, Notification, NotificationHandle, Timeout};

    use crate::errors::{BeckonError, Result};
    use crate::registry::{ActivationEvent, ActivationKind, OutgoingNotification, Subscribers};
    use crate::request::Interaction;

    /// Identifier the server reports for a click on the notification body
    pub(super) const DEFAULT_ACTION: &str = "default";
    /// Identifier of the close-label button
    pub(super) const CLOSE_ACTION: &str = "close";
    /// Reported by notify-rust when the notification is closed
    pub(super) const CLOSED_SIGNAL: &str = "__closed";
    /// Prefix of action button identifiers, followed by the action index
    pub(super) const ACTION_PREFIX: &str = "action-";

    /// Keeps the server-side expiry behind our own deadline so the
    /// session resolves as a timeout rather than a close
    const EXPIRY_GRACE: Duration = Duration::from_secs(1);

    /// Servers number their own notifications upwards from 1; group ids
    /// live in the upper half and are never 0
    const GROUP_ID_BIT: u32 = 1 << 31;

    pub(super) fn check_server() -> Result<()> {
        match notify_rust::get_server_information() {
            Ok(info) => {
                tracing::debug!(
                    server = %info.name,
                    vendor = %info.vendor,
                    version = %info.version,
                    "Notification server available"
                );
                Ok(())
            }
            Err(e) => Err(BeckonError::BackendUnavailable {
                user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
                reason: e.to_string(),
            }),
        }
    }

    /// Server id reserved for a group (FNV-1a of the group ID)
    pub(super) fn group_notification_id(group: &str) -> u32 {
        let hash = group.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
            (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
        });
        hash | GROUP_ID_BIT
    }

    /// Close the notification the server knows as `id`
    ///
    /// notify-rust closes only through a handle, so a transient notification
    /// takes over the id and is closed straight away.
    pub(super) fn close(id: u32, appname: &str) {
        let mut replacement = Notification::new();
        replacement
            .appname(appname)
            .id(id)
            .hint(Hint::Transient(true))
            .timeout(Timeout::Milliseconds(1));
        match replacement.show() {
            Ok(handle) => {
                handle.close();
                tracing::debug!(id, "Notification closed");
            }
            Err(e) => tracing::debug!(id, error = %e, "Could not close notification"),
        }
    }

    pub(super) fn decorate(notification: &mut Notification, outgoing: &OutgoingNotification) {
        if let Some(group) = &outgoing.group_id {
            notification.id(group_notification_id(group));
        }
        if let Some(image) = &outgoing.content_image {
            notification.hint(Hint::ImagePath(image.clone()));
        }

        if outgoing.wait_for_response {
            notification.action(DEFAULT_ACTION, "Open");
        }
        if let Interaction::Actions { labels, .. } = &outgoing.interaction {
            for (index, label) in labels.iter().enumerate() {
                notification.action(&format!("{ACTION_PREFIX}{index}"), label);
            }
        }
        if let Some(label) = &outgoing.close_label {
            notification.action(CLOSE_ACTION, label);
        }

        let timeout = match (outgoing.wait_for_response, outgoing.timeout) {
            (true, Some(timeout)) => Timeout::Milliseconds(
                u32::try_from(timeout.saturating_add(EXPIRY_GRACE).as_millis()).unwrap_or(u32::MAX),
            ),
            (true, None) => Timeout::Never,
            (false, _) => Timeout::Default,
        };
        notification.timeout(timeout);
    }

    /// Map a server action identifier to an activation
    pub(super) fn activation_for_action(action: &str) -> Option<ActivationKind> {
        match action {
            DEFAULT_ACTION => Some(ActivationKind::Clicked),
            CLOSE_ACTION | CLOSED_SIGNAL => Some(ActivationKind::Closed),
            other => other
                .strip_prefix(ACTION_PREFIX)
                .and_then(|index| index.parse().ok())
                .map(ActivationKind::ActionButton),
        }
    }

    /// Block this thread until the server reports an action or a close
    pub(super) fn wait_for_activation(
        handle: NotificationHandle,
        outgoing: &OutgoingNotification,
        subscribers: &Mutex<Subscribers>,
        server_ids: &Mutex<HashMap<String, u32>>,
    ) {
        let user_info = outgoing.user_info.clone();
        handle.wait_for_action(|action| {
            // the server has closed it already
            server_ids
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&outgoing.uuid);

            let Some(kind) = activation_for_action(action) else {
                tracing::debug!(action = %action, "Ignoring unknown notification action");
                return;
            };
            let notified = Subscribers::emit(subscribers, &ActivationEvent { kind, user_info });
            tracing::debug!(action = %action, notified, "Activation reported");
        });
    }
}
