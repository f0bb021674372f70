//! In-process implementations of the platform seams.
//!
//! Used by the test suites and by the desktop host, which has no OS alarm
//! service of its own.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    diagnostics::DeviceInfo,
    error::PlatformError,
    model::{AlarmId, TriggerIntent},
    notification::{Importance, Notification, NotificationChannel},
    platform::{
        AlarmRegistration, AlarmService, AudioAttributes, AudioBackend, Clock, DeferredExecutor,
        DeferredTask, MediaPlayer, NotificationPoster, NotificationService, Platform,
        PlaybackEvent, PlaybackListener, PowerService, SettingsScreen, SystemSettings,
        TimerCapability, WakeLock,
    },
    prefs::MemoryPreferences,
};

fn add(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add(*now, by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Alarm registrations keyed by id, fired by polling [`InMemoryAlarms::take_due`].
pub struct InMemoryAlarms {
    registrations: Mutex<BTreeMap<AlarmId, AlarmRegistration>>,
    capability: Mutex<TimerCapability>,
    exact_permission: AtomicBool,
    failure: Mutex<Option<PlatformError>>,
}

impl InMemoryAlarms {
    pub fn new(capability: TimerCapability) -> Self {
        Self {
            registrations: Mutex::new(BTreeMap::new()),
            capability: Mutex::new(capability),
            exact_permission: AtomicBool::new(true),
            failure: Mutex::new(None),
        }
    }

    pub fn set_capability(&self, capability: TimerCapability) {
        *self.capability.lock() = capability;
    }

    pub fn set_exact_permission(&self, granted: bool) {
        self.exact_permission.store(granted, Ordering::SeqCst);
    }

    pub fn fail_with(&self, failure: Option<PlatformError>) {
        *self.failure.lock() = failure;
    }

    pub fn pending(&self, id: AlarmId) -> Option<AlarmRegistration> {
        self.registrations.lock().get(&id).cloned()
    }

    pub fn pending_ids(&self) -> Vec<AlarmId> {
        self.registrations.lock().keys().copied().collect()
    }

    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.registrations
            .lock()
            .values()
            .map(|registration| registration.fire_at)
            .min()
    }

    /// Removes every registration due at `now` and returns the intents to
    /// deliver, earliest first.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<TriggerIntent> {
        let mut registrations = self.registrations.lock();
        let due: Vec<AlarmId> = registrations
            .values()
            .filter(|registration| registration.fire_at <= now)
            .map(|registration| registration.id)
            .collect();
        let mut fired: Vec<AlarmRegistration> = due
            .into_iter()
            .filter_map(|id| registrations.remove(&id))
            .collect();
        fired.sort_by_key(|registration| registration.fire_at);
        fired
            .into_iter()
            .map(|registration| TriggerIntent::Alarm {
                action: registration.action,
                extras: registration.extras,
            })
            .collect()
    }
}

impl AlarmService for InMemoryAlarms {
    fn capability(&self) -> TimerCapability {
        *self.capability.lock()
    }

    fn can_schedule_exact_alarms(&self) -> bool {
        self.exact_permission.load(Ordering::SeqCst)
    }

    fn register(&self, registration: AlarmRegistration) -> Result<(), PlatformError> {
        if let Some(failure) = self.failure.lock().clone() {
            return Err(failure);
        }
        self.registrations
            .lock()
            .insert(registration.id, registration);
        Ok(())
    }

    fn cancel(&self, id: AlarmId, action: &str) -> Result<bool, PlatformError> {
        if let Some(failure) = self.failure.lock().clone() {
            return Err(failure);
        }
        let mut registrations = self.registrations.lock();
        match registrations.get(&id) {
            Some(registration) if registration.action == action => {
                registrations.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Debug)]
pub struct MemoryWakeLock {
    tag: String,
    deadline: DateTime<Utc>,
    held: AtomicBool,
    releases: AtomicUsize,
}

impl MemoryWakeLock {
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl WakeLock for MemoryWakeLock {
    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct InMemoryPower {
    clock: Arc<dyn Clock>,
    locks: Mutex<Vec<Arc<MemoryWakeLock>>>,
    ignoring_battery_optimizations: AtomicBool,
    failure: Mutex<Option<PlatformError>>,
}

impl InMemoryPower {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            locks: Mutex::new(Vec::new()),
            ignoring_battery_optimizations: AtomicBool::new(false),
            failure: Mutex::new(None),
        }
    }

    pub fn set_ignoring_battery_optimizations(&self, ignoring: bool) {
        self.ignoring_battery_optimizations
            .store(ignoring, Ordering::SeqCst);
    }

    pub fn fail_with(&self, failure: Option<PlatformError>) {
        *self.failure.lock() = failure;
    }

    pub fn locks(&self) -> Vec<Arc<MemoryWakeLock>> {
        self.locks.lock().clone()
    }

    pub fn held_count(&self) -> usize {
        self.locks.lock().iter().filter(|lock| lock.is_held()).count()
    }

    /// Drops locks whose timeout has elapsed, as the OS would.
    pub fn expire_due(&self) {
        let now = self.clock.now();
        for lock in self.locks.lock().iter() {
            if lock.deadline <= now {
                lock.release();
            }
        }
    }
}

impl PowerService for InMemoryPower {
    fn acquire_wake_lock(
        &self,
        tag: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn WakeLock>, PlatformError> {
        if let Some(failure) = self.failure.lock().clone() {
            return Err(failure);
        }
        let lock = Arc::new(MemoryWakeLock {
            tag: tag.to_string(),
            deadline: add(self.clock.now(), timeout),
            held: AtomicBool::new(true),
            releases: AtomicUsize::new(0),
        });
        self.locks.lock().push(lock.clone());
        Ok(lock)
    }

    fn is_ignoring_battery_optimizations(&self) -> bool {
        self.ignoring_battery_optimizations.load(Ordering::SeqCst)
    }
}

pub struct InMemoryNotifications {
    enabled: AtomicBool,
    countdown: AtomicBool,
    channels: Mutex<HashMap<String, NotificationChannel>>,
    channel_failure: Mutex<Option<PlatformError>>,
}

impl InMemoryNotifications {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            countdown: AtomicBool::new(true),
            channels: Mutex::new(HashMap::new()),
            channel_failure: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn set_countdown_support(&self, supported: bool) {
        self.countdown.store(supported, Ordering::SeqCst);
    }

    pub fn fail_channel_creation(&self, failure: Option<PlatformError>) {
        *self.channel_failure.lock() = failure;
    }

    /// Simulates the user changing a channel's importance in system settings.
    pub fn set_channel_importance(&self, id: &str, importance: Importance) {
        if let Some(channel) = self.channels.lock().get_mut(id) {
            channel.importance = importance;
        }
    }

    pub fn stored_channel(&self, id: &str) -> Option<NotificationChannel> {
        self.channels.lock().get(id).cloned()
    }
}

impl Default for InMemoryNotifications {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationService for InMemoryNotifications {
    fn are_notifications_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn create_channel(&self, channel: &NotificationChannel) -> Result<(), PlatformError> {
        if let Some(failure) = self.channel_failure.lock().clone() {
            return Err(failure);
        }
        let mut channels = self.channels.lock();
        match channels.get_mut(&channel.id) {
            // Importance stays under user control once the channel exists.
            Some(existing) => {
                let importance = existing.importance;
                *existing = channel.clone();
                existing.importance = importance;
            }
            None => {
                channels.insert(channel.id.clone(), channel.clone());
            }
        }
        Ok(())
    }

    fn channel(&self, id: &str) -> Option<NotificationChannel> {
        self.stored_channel(id)
    }

    fn supports_countdown(&self) -> bool {
        self.countdown.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct RecordingPoster {
    posted: Mutex<Vec<(AlarmId, Notification)>>,
    failure: Mutex<Option<PlatformError>>,
    attempts: AtomicUsize,
}

impl RecordingPoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, failure: Option<PlatformError>) {
        *self.failure.lock() = failure;
    }

    pub fn posted(&self) -> Vec<(AlarmId, Notification)> {
        self.posted.lock().clone()
    }

    pub fn last(&self) -> Option<(AlarmId, Notification)> {
        self.posted.lock().last().cloned()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl NotificationPoster for RecordingPoster {
    fn post(&self, id: AlarmId, notification: &Notification) -> Result<(), PlatformError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(failure) = self.failure.lock().clone() {
            return Err(failure);
        }
        self.posted.lock().push((id, notification.clone()));
        Ok(())
    }
}

pub struct FakePlayer {
    asset_path: String,
    attributes: AudioAttributes,
    auto_prepare: bool,
    listener: Mutex<Option<PlaybackListener>>,
    started: AtomicBool,
    released: AtomicBool,
    releases: AtomicUsize,
}

impl FakePlayer {
    pub fn asset_path(&self) -> &str {
        &self.asset_path
    }

    pub fn attributes(&self) -> AudioAttributes {
        self.attributes
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn release_count(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Delivers a playback event to the registered listener.
    pub fn emit(&self, event: PlaybackEvent) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(event);
        }
    }
}

impl MediaPlayer for FakePlayer {
    fn prepare_async(&self, listener: PlaybackListener) -> Result<(), PlatformError> {
        if self.is_released() {
            return Err(PlatformError::Rejected("player released".into()));
        }
        *self.listener.lock() = Some(listener.clone());
        if self.auto_prepare {
            listener(PlaybackEvent::Prepared);
        }
        Ok(())
    }

    fn start(&self) -> Result<(), PlatformError> {
        if self.is_released() {
            return Err(PlatformError::Rejected("player released".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.releases.fetch_add(1, Ordering::SeqCst);
            self.listener.lock().take();
        }
    }
}

pub struct InMemoryAudio {
    players: Mutex<Vec<Arc<FakePlayer>>>,
    missing: Mutex<HashSet<String>>,
    auto_prepare: AtomicBool,
}

impl InMemoryAudio {
    pub fn new() -> Self {
        Self {
            players: Mutex::new(Vec::new()),
            missing: Mutex::new(HashSet::new()),
            auto_prepare: AtomicBool::new(true),
        }
    }

    /// When disabled, players stay in the preparing state until a test
    /// emits [`PlaybackEvent::Prepared`].
    pub fn set_auto_prepare(&self, enabled: bool) {
        self.auto_prepare.store(enabled, Ordering::SeqCst);
    }

    pub fn mark_missing(&self, asset_path: &str) {
        self.missing.lock().insert(asset_path.to_string());
    }

    pub fn players(&self) -> Vec<Arc<FakePlayer>> {
        self.players.lock().clone()
    }

    pub fn last_player(&self) -> Option<Arc<FakePlayer>> {
        self.players.lock().last().cloned()
    }
}

impl Default for InMemoryAudio {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for InMemoryAudio {
    fn open(
        &self,
        asset_path: &str,
        attributes: AudioAttributes,
    ) -> Result<Arc<dyn MediaPlayer>, PlatformError> {
        if self.missing.lock().contains(asset_path) {
            return Err(PlatformError::Resource(format!(
                "asset not found: {asset_path}"
            )));
        }
        let player = Arc::new(FakePlayer {
            asset_path: asset_path.to_string(),
            attributes,
            auto_prepare: self.auto_prepare.load(Ordering::SeqCst),
            listener: Mutex::new(None),
            started: AtomicBool::new(false),
            released: AtomicBool::new(false),
            releases: AtomicUsize::new(0),
        });
        self.players.lock().push(player.clone());
        Ok(player)
    }
}

#[derive(Default)]
pub struct RecordingSettings {
    opened: Mutex<Vec<SettingsScreen>>,
    failing: Mutex<HashSet<SettingsScreen>>,
}

impl RecordingSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_screen(&self, screen: SettingsScreen) {
        self.failing.lock().insert(screen);
    }

    pub fn opened(&self) -> Vec<SettingsScreen> {
        self.opened.lock().clone()
    }
}

impl SystemSettings for RecordingSettings {
    fn open(&self, screen: SettingsScreen) -> Result<(), PlatformError> {
        if self.failing.lock().contains(&screen) {
            return Err(PlatformError::Unavailable(format!("{screen:?}")));
        }
        self.opened.lock().push(screen);
        Ok(())
    }
}

struct PendingTask {
    due: DateTime<Utc>,
    sequence: u64,
    task: DeferredTask,
}

/// Deferred tasks run only when [`ManualExecutor::run_due`] is called.
pub struct ManualExecutor {
    clock: Arc<dyn Clock>,
    tasks: Mutex<Vec<PendingTask>>,
    sequence: AtomicU64,
}

impl ManualExecutor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tasks: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Runs every task due at the current clock time, earliest first.
    pub fn run_due(&self) -> usize {
        let mut ran = 0;
        loop {
            let now = self.clock.now();
            let next = {
                let mut tasks = self.tasks.lock();
                let position = tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, pending)| pending.due <= now)
                    .min_by_key(|(_, pending)| (pending.due, pending.sequence))
                    .map(|(position, _)| position);
                position.map(|position| tasks.remove(position))
            };
            match next {
                Some(pending) => {
                    (pending.task)();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl DeferredExecutor for ManualExecutor {
    fn post_delayed(&self, delay: Duration, task: DeferredTask) {
        let due = add(self.clock.now(), delay);
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        self.tasks.lock().push(PendingTask {
            due,
            sequence,
            task,
        });
    }
}

/// A complete platform whose time only moves when told to.
pub struct MemoryPlatform {
    pub clock: Arc<ManualClock>,
    pub alarms: Arc<InMemoryAlarms>,
    pub power: Arc<InMemoryPower>,
    pub notifications: Arc<InMemoryNotifications>,
    pub primary: Arc<RecordingPoster>,
    pub compat: Arc<RecordingPoster>,
    pub audio: Arc<InMemoryAudio>,
    pub preferences: Arc<MemoryPreferences>,
    pub settings: Arc<RecordingSettings>,
    pub executor: Arc<ManualExecutor>,
    pub device: DeviceInfo,
}

impl MemoryPlatform {
    pub fn new(start: DateTime<Utc>) -> Self {
        let clock = Arc::new(ManualClock::new(start));
        Self {
            alarms: Arc::new(InMemoryAlarms::new(TimerCapability::PermissionGatedExact)),
            power: Arc::new(InMemoryPower::new(clock.clone())),
            notifications: Arc::new(InMemoryNotifications::new()),
            primary: Arc::new(RecordingPoster::new()),
            compat: Arc::new(RecordingPoster::new()),
            audio: Arc::new(InMemoryAudio::new()),
            preferences: Arc::new(MemoryPreferences::new()),
            settings: Arc::new(RecordingSettings::new()),
            executor: Arc::new(ManualExecutor::new(clock.clone())),
            device: DeviceInfo::default(),
            clock,
        }
    }

    pub fn at_millis(millis: i64) -> Self {
        Self::new(DateTime::from_timestamp_millis(millis).unwrap_or_default())
    }

    pub fn platform(&self) -> Platform {
        Platform {
            clock: self.clock.clone(),
            alarms: self.alarms.clone(),
            power: self.power.clone(),
            notifications: self.notifications.clone(),
            primary_poster: self.primary.clone(),
            compat_poster: self.compat.clone(),
            audio: self.audio.clone(),
            preferences: self.preferences.clone(),
            settings: self.settings.clone(),
            executor: self.executor.clone(),
            device: self.device.clone(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Moves time forward, then runs deferred tasks and OS wake-lock timeouts.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
        self.executor.run_due();
        self.power.expire_due();
    }
}
