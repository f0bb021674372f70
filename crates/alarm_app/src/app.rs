use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use alarm_bridge::AlarmBridge;
use alarm_core::{
    diagnostics::DeviceInfo,
    memory::{InMemoryAlarms, InMemoryNotifications},
    platform::{Clock, NotificationPoster, PreferenceStore, SystemClock, TimerCapability},
    prefs::{JsonPreferenceStore, MemoryPreferences},
    AlarmConfig, Platform, TriggerHandler,
};
use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::desktop::{
    DesktopAudio, DesktopPoster, DesktopPower, LogSettings, NotifySendPoster, ThreadExecutor,
};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const APP_NAME: &str = "Shabbos";

/// Desktop stand-in for the OS: owns the alarm table and fires due entries
/// into the trigger handler.
pub struct DesktopHost {
    clock: Arc<dyn Clock>,
    alarms: Arc<InMemoryAlarms>,
    power: Arc<DesktopPower>,
    handler: Arc<TriggerHandler>,
    platform: Platform,
    config: Arc<AlarmConfig>,
}

impl DesktopHost {
    pub fn new(config: AlarmConfig) -> Self {
        Self::with_posters(
            config,
            Arc::new(DesktopPoster::new(APP_NAME)),
            Arc::new(NotifySendPoster::new(APP_NAME)),
        )
    }

    pub fn with_posters(
        config: AlarmConfig,
        primary_poster: Arc<dyn NotificationPoster>,
        compat_poster: Arc<dyn NotificationPoster>,
    ) -> Self {
        let config = Arc::new(config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let alarms = Arc::new(InMemoryAlarms::new(TimerCapability::PermissionGatedExact));
        let preferences: Arc<dyn PreferenceStore> = match &config.prefs_path {
            Some(path) => Arc::new(JsonPreferenceStore::new(path)),
            None => Arc::new(MemoryPreferences::new()),
        };
        let power = Arc::new(DesktopPower::new());
        let notifications = Arc::new(InMemoryNotifications::new());
        // Desktop daemons have no live countdown; the reference time is shown as text.
        notifications.set_countdown_support(false);
        let platform = Platform {
            clock: clock.clone(),
            alarms: alarms.clone(),
            power: power.clone(),
            notifications,
            primary_poster,
            compat_poster,
            audio: Arc::new(DesktopAudio::new(config.asset_root.clone())),
            preferences,
            settings: Arc::new(LogSettings),
            executor: Arc::new(ThreadExecutor),
            device: DeviceInfo {
                manufacturer: "desktop".to_string(),
                model: std::env::consts::ARCH.to_string(),
                brand: "desktop".to_string(),
                os_version: std::env::consts::OS.to_string(),
            },
        };
        let handler = Arc::new(TriggerHandler::new(platform.clone(), config.clone()));
        Self {
            clock,
            alarms,
            power,
            handler,
            platform,
            config,
        }
    }

    pub fn power(&self) -> &DesktopPower {
        &self.power
    }

    pub fn bridge(&self) -> AlarmBridge {
        AlarmBridge::new(self.platform.clone(), self.config.clone())
    }

    /// Fires every registration that is due now. Returns how many fired.
    pub fn fire_due(&self) -> usize {
        let due = self.alarms.take_due(self.clock.now());
        let count = due.len();
        for intent in due {
            let outcome = self.handler.on_receive(intent);
            debug!(?outcome, "trigger handled");
        }
        count
    }

    pub fn spawn_poller(self: &Arc<Self>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let host = Arc::clone(self);
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                host.fire_due();
                thread::sleep(POLL_INTERVAL);
            }
        })
    }
}

/// Reads JSON method calls from stdin, one per line, until EOF.
pub fn run(config: AlarmConfig) -> Result<()> {
    let host = Arc::new(DesktopHost::new(config));
    alarm_bridge::install(host.bridge());

    let stop = Arc::new(AtomicBool::new(false));
    let poller = host.spawn_poller(stop.clone());
    info!(channel = alarm_bridge::CHANNEL, "desktop host ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read method call")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = alarm_bridge::dispatch_json(&line);
        writeln!(stdout, "{response}").context("failed to write response")?;
        stdout.flush().context("failed to flush response")?;
    }

    stop.store(true, Ordering::SeqCst);
    if poller.join().is_err() {
        warn!("alarm poller terminated abnormally");
    }
    Ok(())
}
