use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::AlarmConfig,
    model::{TriggerIntent, TriggerPayload},
    notification::{Importance, NotificationChannel},
    notifier::{DeliveryReport, Notifier},
    platform::{NotificationService, Platform},
    wake::WakeGuard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerState {
    Woken,
    Validating,
    Delivering,
    Releasing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    Delivered(DeliveryReport),
    NotificationsDisabled,
    Failed(String),
    /// The device restarted. Pending alarms are not restored here; the host
    /// application reschedules them the next time it is opened.
    RestartAcknowledged,
    Ignored,
}

/// Entry point the OS invokes when a registered alarm fires or the device
/// finishes booting. Holds no state between invocations beyond the alert
/// player.
pub struct TriggerHandler {
    platform: Platform,
    config: Arc<AlarmConfig>,
    notifier: Notifier,
}

impl TriggerHandler {
    pub fn new(platform: Platform, config: Arc<AlarmConfig>) -> Self {
        let notifier = Notifier::new(&platform, config.clone());
        Self {
            platform,
            config,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn on_receive(&self, intent: TriggerIntent) -> TriggerOutcome {
        if intent.is_restart() {
            info!("device restarted; alarms will be rescheduled when the app is opened");
            return TriggerOutcome::RestartAcknowledged;
        }
        match intent {
            TriggerIntent::Alarm { action, extras } => self.fire(&action, &extras),
            TriggerIntent::System { action } => {
                debug!(action, "ignoring system intent");
                TriggerOutcome::Ignored
            }
        }
    }

    #[instrument(skip(self, extras))]
    fn fire(&self, action: &str, extras: &Value) -> TriggerOutcome {
        let mut state = TriggerState::Woken;
        info!("alarm fired");

        transition(&mut state, TriggerState::Validating);
        let guard = match WakeGuard::acquire(
            self.platform.power.as_ref(),
            &self.config.wake_lock_tag,
            self.config.wake_timeout,
        ) {
            Ok(guard) => {
                // Independent upper bound in case the delayed release below never runs.
                guard.release_after(self.platform.executor.as_ref(), self.config.wake_timeout);
                Some(guard)
            }
            Err(err) => {
                error!(%err, "failed to acquire wake lock, delivering without it");
                None
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.validate_and_deliver(&mut state, extras)
        }))
        .unwrap_or_else(|_| {
            error!("alert delivery panicked");
            TriggerOutcome::Failed("delivery panicked".to_string())
        });

        transition(&mut state, TriggerState::Releasing);
        if let Some(guard) = &guard {
            guard.release_after(self.platform.executor.as_ref(), self.config.release_delay);
        }
        transition(&mut state, TriggerState::Done);
        outcome
    }

    fn validate_and_deliver(&self, state: &mut TriggerState, extras: &Value) -> TriggerOutcome {
        let payload = match TriggerPayload::from_extras(extras) {
            Ok(payload) => payload,
            Err(err) => {
                error!(%err, "malformed alarm payload");
                return TriggerOutcome::Failed(err.to_string());
            }
        };
        info!(
            id = payload.id,
            title = %payload.title,
            pre_event = payload.is_pre_event,
            "delivering alert"
        );

        if !self.platform.notifications.are_notifications_enabled() {
            warn!(id = payload.id, "notifications are disabled by the user");
            return TriggerOutcome::NotificationsDisabled;
        }

        transition(state, TriggerState::Delivering);
        self.ensure_channel();
        TriggerOutcome::Delivered(self.notifier.deliver(&payload))
    }

    fn ensure_channel(&self) {
        ensure_alert_channel(
            self.platform.notifications.as_ref(),
            &self.config.alert_channel(),
        );
    }
}

/// Creates the alert channel if needed and checks it survived. Returns
/// whether the channel exists and can show alerts.
pub fn ensure_alert_channel(
    notifications: &dyn NotificationService,
    channel: &NotificationChannel,
) -> bool {
    if let Err(err) = notifications.create_channel(channel) {
        error!(%err, channel = %channel.id, "failed to create notification channel");
        return false;
    }
    match notifications.channel(&channel.id) {
        None => {
            error!(channel = %channel.id, "notification channel missing, recreating");
            match notifications.create_channel(channel) {
                Ok(()) => notifications.channel(&channel.id).is_some(),
                Err(err) => {
                    error!(%err, channel = %channel.id, "failed to recreate notification channel");
                    false
                }
            }
        }
        Some(existing) if existing.importance == Importance::None => {
            error!(channel = %channel.id, "notification channel is disabled");
            false
        }
        Some(existing) => {
            debug!(channel = %channel.id, importance = ?existing.importance, "notification channel ready");
            true
        }
    }
}

fn transition(state: &mut TriggerState, next: TriggerState) {
    debug!(from = ?*state, to = ?next, "trigger state");
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPlatform;
    use crate::model::ScheduledEvent;
    use crate::notifier::PublishOutcome;
    use serde_json::json;
    use std::time::Duration;

    const T: i64 = 1_760_000_000_000;

    fn handler(memory: &MemoryPlatform) -> TriggerHandler {
        TriggerHandler::new(memory.platform(), Arc::new(AlarmConfig::default()))
    }

    fn alarm(event: &ScheduledEvent) -> TriggerIntent {
        TriggerIntent::Alarm {
            action: format!("com.shabbos.shabbos_app.ALARM_{}", event.id),
            extras: event.payload().to_extras().unwrap(),
        }
    }

    #[test]
    fn wake_lock_is_released_after_the_delay() {
        let memory = MemoryPlatform::at_millis(T);
        let outcome = handler(&memory).on_receive(alarm(&ScheduledEvent::new(1, T, "a", "b")));
        assert!(matches!(outcome, TriggerOutcome::Delivered(_)));
        assert_eq!(memory.power.held_count(), 1);

        memory.advance(Duration::from_secs(59));
        assert_eq!(memory.power.held_count(), 1);
        memory.advance(Duration::from_secs(1));
        assert_eq!(memory.power.held_count(), 0);

        memory.advance(Duration::from_secs(120));
        assert_eq!(memory.power.locks()[0].release_count(), 1);
        assert_eq!(memory.executor.pending(), 0);
    }

    #[test]
    fn disabled_notifications_abort_but_still_release() {
        let memory = MemoryPlatform::at_millis(T);
        memory.notifications.set_enabled(false);
        let outcome = handler(&memory).on_receive(alarm(&ScheduledEvent::new(1, T, "a", "b")));
        assert_eq!(outcome, TriggerOutcome::NotificationsDisabled);
        assert!(memory.primary.posted().is_empty());
        assert!(memory.audio.players().is_empty());

        memory.advance(Duration::from_secs(60));
        assert_eq!(memory.power.held_count(), 0);
    }

    #[test]
    fn malformed_payload_fails_without_leaking_wake_lock() {
        let memory = MemoryPlatform::at_millis(T);
        let outcome = handler(&memory).on_receive(TriggerIntent::Alarm {
            action: "com.shabbos.shabbos_app.ALARM_1".into(),
            extras: json!({ "notification_id": "not a number" }),
        });
        assert!(matches!(outcome, TriggerOutcome::Failed(_)));
        memory.advance(Duration::from_secs(60));
        assert_eq!(memory.power.held_count(), 0);
    }

    #[test]
    fn channel_is_created_without_sound() {
        let memory = MemoryPlatform::at_millis(T);
        let handler = handler(&memory);
        handler.on_receive(alarm(&ScheduledEvent::new(1, T, "a", "b")));
        handler.on_receive(alarm(&ScheduledEvent::new(2, T, "a", "b")));
        let channel = memory.notifications.stored_channel("shabbos_alerts").unwrap();
        assert!(!channel.sound);
        assert_eq!(channel.importance, Importance::High);
        assert_eq!(memory.primary.posted().len(), 2);
    }

    #[test]
    fn disabled_channel_is_reported_but_kept() {
        let memory = MemoryPlatform::at_millis(T);
        let channel = AlarmConfig::default().alert_channel();
        assert!(ensure_alert_channel(memory.notifications.as_ref(), &channel));
        memory
            .notifications
            .set_channel_importance("shabbos_alerts", Importance::None);
        assert!(!ensure_alert_channel(memory.notifications.as_ref(), &channel));
        let stored = memory.notifications.stored_channel("shabbos_alerts").unwrap();
        assert_eq!(stored.importance, Importance::None);
        assert!(stored.bypass_dnd);
    }

    #[test]
    fn channel_failure_does_not_stop_delivery() {
        let memory = MemoryPlatform::at_millis(T);
        memory
            .notifications
            .fail_channel_creation(Some(crate::error::PlatformError::Unavailable("nm".into())));
        let outcome = handler(&memory).on_receive(alarm(&ScheduledEvent::new(1, T, "a", "b")));
        let TriggerOutcome::Delivered(report) = outcome else {
            panic!("expected delivery");
        };
        assert_eq!(report.publish, PublishOutcome::Primary);
    }

    #[test]
    fn missing_wake_lock_still_delivers() {
        let memory = MemoryPlatform::at_millis(T);
        memory
            .power
            .fail_with(Some(crate::error::PlatformError::PermissionDenied("WAKE_LOCK".into())));
        let outcome = handler(&memory).on_receive(alarm(&ScheduledEvent::new(1, T, "a", "b")));
        assert!(matches!(outcome, TriggerOutcome::Delivered(_)));
        assert_eq!(memory.executor.pending(), 0);
    }

    #[test]
    fn restart_is_acknowledged_without_rescheduling() {
        let memory = MemoryPlatform::at_millis(T);
        let outcome = handler(&memory).on_receive(TriggerIntent::System {
            action: "android.intent.action.BOOT_COMPLETED".into(),
        });
        assert_eq!(outcome, TriggerOutcome::RestartAcknowledged);
        assert!(memory.alarms.pending_ids().is_empty());
        assert!(memory.power.locks().is_empty());
    }
}
