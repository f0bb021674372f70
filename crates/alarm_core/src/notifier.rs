use std::sync::Arc;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::AlarmConfig,
    model::{AlarmId, TriggerPayload},
    notification::{Category, CountdownDisplay, LaunchAction, Notification, Priority, Visibility},
    platform::{Clock, NotificationPoster, NotificationService, Platform, PreferenceStore},
    playback::AlertPlayer,
    sound::{AlertKind, SoundCatalog, SoundSelection},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SoundOutcome {
    Silent,
    Started { asset_id: String, substituted: bool },
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishOutcome {
    Primary,
    Fallback,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub id: AlarmId,
    pub sound: SoundOutcome,
    pub publish: PublishOutcome,
    pub countdown: bool,
}

/// Plays the alert sound and posts the notification for one fire event.
pub struct Notifier {
    config: Arc<AlarmConfig>,
    catalog: SoundCatalog,
    player: AlertPlayer,
    clock: Arc<dyn Clock>,
    preferences: Arc<dyn PreferenceStore>,
    notifications: Arc<dyn NotificationService>,
    primary: Arc<dyn NotificationPoster>,
    compat: Arc<dyn NotificationPoster>,
}

impl Notifier {
    pub fn new(platform: &Platform, config: Arc<AlarmConfig>) -> Self {
        Self {
            config,
            catalog: SoundCatalog::bundled(),
            player: AlertPlayer::new(platform.audio.clone()),
            clock: platform.clock.clone(),
            preferences: platform.preferences.clone(),
            notifications: platform.notifications.clone(),
            primary: platform.primary_poster.clone(),
            compat: platform.compat_poster.clone(),
        }
    }

    pub fn with_catalog(mut self, catalog: SoundCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn player(&self) -> &AlertPlayer {
        &self.player
    }

    #[instrument(skip(self, payload), fields(id = payload.id))]
    pub fn deliver(&self, payload: &TriggerPayload) -> DeliveryReport {
        let sound = self.play_sound(AlertKind::from_pre_event(payload.is_pre_event));
        let notification = self.build_notification(payload);
        let publish = self.publish(payload.id, &notification);
        DeliveryReport {
            id: payload.id,
            sound,
            publish,
            countdown: notification.is_countdown(),
        }
    }

    /// Reads the sound preference for `kind` at call time.
    pub fn resolve_sound(&self, kind: AlertKind) -> SoundSelection {
        let key = kind.preference_key(&self.config.prefs_namespace);
        let sound_id = match self.preferences.get_string(&key) {
            Ok(Some(id)) => id,
            Ok(None) => self.catalog.default_id().to_string(),
            Err(err) => {
                warn!(%err, key, "failed to read sound preference, using default");
                self.catalog.default_id().to_string()
            }
        };
        debug!(key, sound = %sound_id, "resolved sound preference");

        let selection = self.catalog.resolve(&sound_id);
        if let SoundSelection::Asset(asset) = &selection {
            if asset.substituted {
                warn!(sound = %sound_id, fallback = %asset.id, "unknown sound id, using default");
            }
        }
        selection
    }

    pub fn play_sound(&self, kind: AlertKind) -> SoundOutcome {
        match self.resolve_sound(kind) {
            SoundSelection::Silent => {
                debug!("silent mode, not playing any sound");
                SoundOutcome::Silent
            }
            SoundSelection::Asset(asset) => match self.player.play(&asset) {
                Ok(()) => SoundOutcome::Started {
                    asset_id: asset.id,
                    substituted: asset.substituted,
                },
                Err(err) => {
                    error!(%err, asset = %asset.path, "failed to set up alert sound");
                    SoundOutcome::Failed(err.to_string())
                }
            },
        }
    }

    pub fn build_notification(&self, payload: &TriggerPayload) -> Notification {
        let now = self.clock.now();
        let launch = LaunchAction::relaunch(payload.id);
        let mut notification = Notification {
            channel_id: self.config.channel_id.clone(),
            title: payload.title.clone(),
            body: payload.body.clone(),
            big_text: Some(payload.body.clone()),
            priority: Priority::Max,
            category: Category::Alarm,
            visibility: Visibility::Public,
            vibration_pattern: self.config.vibration_pattern.clone(),
            content_action: launch.clone(),
            full_screen_action: Some(launch),
            auto_cancel: true,
            ongoing: false,
            when: now,
            show_when: true,
            countdown: None,
            timeout_after: None,
            silent: true,
        };

        let Some(reference) = payload.reference_at() else {
            return notification;
        };
        if reference <= now {
            debug!(reference = %reference, "reference time already passed, posting simple alert");
            return notification;
        }

        notification.auto_cancel = false;
        notification.ongoing = true;
        notification.full_screen_action = None;
        notification.when = reference;
        notification.timeout_after = (reference - now).to_std().ok();
        notification.countdown = Some(if self.notifications.supports_countdown() {
            CountdownDisplay::Chronometer
        } else {
            let local = reference.with_timezone(&Local);
            CountdownDisplay::Static(format!("Candle lighting at {}", local.format("%H:%M")))
        });
        notification
    }

    /// Posts through the primary API, retrying once through the
    /// compatibility API. Failures are logged, never returned.
    pub fn publish(&self, id: AlarmId, notification: &Notification) -> PublishOutcome {
        match self.primary.post(id, notification) {
            Ok(()) => {
                info!(id, "notification posted");
                return PublishOutcome::Primary;
            }
            Err(err) if err.is_permission() => {
                error!(id, %err, "permission denied posting notification, trying compatibility API");
            }
            Err(err) => {
                error!(id, %err, "failed to post notification, trying compatibility API");
            }
        }
        match self.compat.post(id, notification) {
            Ok(()) => {
                info!(id, "notification posted through compatibility API");
                PublishOutcome::Fallback
            }
            Err(err) => {
                error!(id, %err, "compatibility API failed, notification dropped");
                PublishOutcome::Failed
            }
        }
    }
}
