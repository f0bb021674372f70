//! Seams between the alert pipeline and the operating system.
//!
//! Every OS facility the pipeline touches is reached through one of these
//! traits so that a fire event can be handled from nothing but its payload
//! and a [`Platform`] handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    diagnostics::DeviceInfo,
    error::{PlatformError, PreferenceError},
    model::AlarmId,
    notification::{Notification, NotificationChannel},
    scheduler::PrecisionTier,
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Timer primitives the device offers, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerCapability {
    /// Exact alarms exist but require a user-revocable permission.
    PermissionGatedExact,
    /// Exact delivery during low-power idle without a permission gate.
    ExactWhileIdle,
    /// Exact delivery, but no idle exemption.
    Exact,
    /// Only the basic one-shot timer.
    Basic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlarmRegistration {
    pub id: AlarmId,
    pub action: String,
    pub fire_at: DateTime<Utc>,
    pub tier: PrecisionTier,
    pub extras: Value,
}

pub trait AlarmService: Send + Sync {
    fn capability(&self) -> TimerCapability;
    fn can_schedule_exact_alarms(&self) -> bool;
    /// Registers a wake-up, replacing any registration with the same id.
    fn register(&self, registration: AlarmRegistration) -> Result<(), PlatformError>;
    /// Returns whether a registration existed.
    fn cancel(&self, id: AlarmId, action: &str) -> Result<bool, PlatformError>;
}

pub trait WakeLock: Send + Sync {
    fn is_held(&self) -> bool;
    fn release(&self);
}

pub trait PowerService: Send + Sync {
    /// Acquires a partial wake lock the OS drops on its own after `timeout`.
    fn acquire_wake_lock(
        &self,
        tag: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn WakeLock>, PlatformError>;
    fn is_ignoring_battery_optimizations(&self) -> bool;
}

pub trait NotificationService: Send + Sync {
    fn are_notifications_enabled(&self) -> bool;
    /// Creates or updates a channel. Calling it repeatedly is harmless.
    fn create_channel(&self, channel: &NotificationChannel) -> Result<(), PlatformError>;
    /// Current state of a channel, including changes the user made.
    fn channel(&self, id: &str) -> Option<NotificationChannel>;
    fn supports_countdown(&self) -> bool;
}

pub trait NotificationPoster: Send + Sync {
    fn post(&self, id: AlarmId, notification: &Notification) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Prepared,
    Completed,
    Error { what: i32, extra: i32 },
}

pub type PlaybackListener = Arc<dyn Fn(PlaybackEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioUsage {
    Alarm,
    Notification,
    Media,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Music,
    Sonification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioAttributes {
    pub usage: AudioUsage,
    pub content_type: ContentType,
}

impl AudioAttributes {
    pub const ALARM: AudioAttributes = AudioAttributes {
        usage: AudioUsage::Alarm,
        content_type: ContentType::Music,
    };
}

pub trait MediaPlayer: Send + Sync {
    /// Starts asynchronous preparation; progress arrives through `listener`.
    fn prepare_async(&self, listener: PlaybackListener) -> Result<(), PlatformError>;
    fn start(&self) -> Result<(), PlatformError>;
    /// Frees the player. Releasing twice is a no-op.
    fn release(&self);
}

pub trait AudioBackend: Send + Sync {
    fn open(
        &self,
        asset_path: &str,
        attributes: AudioAttributes,
    ) -> Result<Arc<dyn MediaPlayer>, PlatformError>;
}

pub trait PreferenceStore: Send + Sync {
    fn get_string(&self, key: &str) -> Result<Option<String>, PreferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingsScreen {
    ExactAlarmPermission,
    IgnoreBatteryOptimization,
    BatteryOptimizationList,
    ApplicationDetails,
}

pub trait SystemSettings: Send + Sync {
    fn open(&self, screen: SettingsScreen) -> Result<(), PlatformError>;
}

pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task after a delay on the host's callback context.
pub trait DeferredExecutor: Send + Sync {
    fn post_delayed(&self, delay: Duration, task: DeferredTask);
}

/// Handle bundle reconstructed on every invocation; cheap to clone.
#[derive(Clone)]
pub struct Platform {
    pub clock: Arc<dyn Clock>,
    pub alarms: Arc<dyn AlarmService>,
    pub power: Arc<dyn PowerService>,
    pub notifications: Arc<dyn NotificationService>,
    pub primary_poster: Arc<dyn NotificationPoster>,
    pub compat_poster: Arc<dyn NotificationPoster>,
    pub audio: Arc<dyn AudioBackend>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub settings: Arc<dyn SystemSettings>,
    pub executor: Arc<dyn DeferredExecutor>,
    pub device: DeviceInfo,
}
