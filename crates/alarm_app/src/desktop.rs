//! Desktop implementations of the services a phone OS would provide.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use alarm_core::{
    error::PlatformError,
    notification::{CountdownDisplay, Notification, Priority},
    platform::{
        AudioAttributes, AudioBackend, DeferredExecutor, DeferredTask, MediaPlayer,
        NotificationPoster, PlaybackEvent, PlaybackListener, PowerService, SettingsScreen,
        SystemSettings, WakeLock,
    },
    AlarmId,
};
use notify_rust::Timeout;
use parking_lot::Mutex;
use rodio::{Decoder, OutputStream, Sink};
use tracing::{debug, info, warn};

const MEDIA_ERROR_UNKNOWN: i32 = 1;
const MEDIA_ERROR_IO: i32 = -1004;
const MEDIA_ERROR_UNSUPPORTED: i32 = -1010;

/// Runs each deferred task on its own thread so one stalled task cannot
/// hold back another.
#[derive(Debug, Default)]
pub struct ThreadExecutor;

impl DeferredExecutor for ThreadExecutor {
    fn post_delayed(&self, delay: Duration, task: DeferredTask) {
        thread::spawn(move || {
            thread::sleep(delay);
            task();
        });
    }
}

/// Wake locks that lapse after their acquire timeout. Handles are not
/// retained, so a lock is gone once its last holder drops it.
#[derive(Debug, Default)]
pub struct DesktopPower {
    live: Arc<AtomicUsize>,
}

impl DesktopPower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks still referenced by someone, held or not.
    pub fn live_locks(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl PowerService for DesktopPower {
    fn acquire_wake_lock(
        &self,
        tag: &str,
        timeout: Duration,
    ) -> Result<Arc<dyn WakeLock>, PlatformError> {
        self.live.fetch_add(1, Ordering::SeqCst);
        let lock = Arc::new(DesktopWakeLock {
            tag: tag.to_string(),
            held: AtomicBool::new(true),
            live: self.live.clone(),
        });
        let expiry: Weak<DesktopWakeLock> = Arc::downgrade(&lock);
        thread::spawn(move || {
            thread::sleep(timeout);
            if let Some(lock) = expiry.upgrade() {
                if lock.held.swap(false, Ordering::SeqCst) {
                    warn!(tag = %lock.tag, "wake lock timed out");
                }
            }
        });
        Ok(lock)
    }

    fn is_ignoring_battery_optimizations(&self) -> bool {
        true
    }
}

struct DesktopWakeLock {
    tag: String,
    held: AtomicBool,
    live: Arc<AtomicUsize>,
}

impl WakeLock for DesktopWakeLock {
    fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn release(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            debug!(tag = %self.tag, "wake lock released");
        }
    }
}

impl Drop for DesktopWakeLock {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plays bundled sounds from `asset_root` on the default output device.
pub struct DesktopAudio {
    asset_root: Option<PathBuf>,
}

impl DesktopAudio {
    pub fn new(asset_root: Option<PathBuf>) -> Self {
        Self { asset_root }
    }
}

impl AudioBackend for DesktopAudio {
    fn open(
        &self,
        asset_path: &str,
        attributes: AudioAttributes,
    ) -> Result<Arc<dyn MediaPlayer>, PlatformError> {
        let root = self.asset_root.as_ref().ok_or_else(|| {
            PlatformError::Resource(format!("no asset root configured for {asset_path}"))
        })?;
        let path = root.join(asset_path);
        if !path.is_file() {
            return Err(PlatformError::Resource(format!(
                "asset not found: {}",
                path.display()
            )));
        }
        debug!(asset = %path.display(), ?attributes, "opened audio asset");
        Ok(Arc::new(DesktopPlayer {
            path,
            listener: Mutex::new(None),
            sink: Arc::new(Mutex::new(None)),
            released: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct DesktopPlayer {
    path: PathBuf,
    listener: Mutex<Option<PlaybackListener>>,
    sink: Arc<Mutex<Option<Arc<Sink>>>>,
    released: Arc<AtomicBool>,
}

impl MediaPlayer for DesktopPlayer {
    fn prepare_async(&self, listener: PlaybackListener) -> Result<(), PlatformError> {
        *self.listener.lock() = Some(listener.clone());
        let path = self.path.clone();
        thread::spawn(move || match decode(&path) {
            Ok(_) => listener(PlaybackEvent::Prepared),
            Err(event) => listener(event),
        });
        Ok(())
    }

    fn start(&self) -> Result<(), PlatformError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PlatformError::Rejected("player released".into()));
        }
        info!(asset = %self.path.display(), "playing alert sound");
        let path = self.path.clone();
        let listener = self.listener.lock().clone();
        let sink = self.sink.clone();
        let released = self.released.clone();
        thread::spawn(move || {
            let event = play_to_end(&path, &sink, &released);
            if released.load(Ordering::SeqCst) {
                return;
            }
            if let Some(listener) = listener {
                listener(event);
            }
        });
        Ok(())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.listener.lock().take();
            if let Some(sink) = self.sink.lock().take() {
                sink.stop();
            }
            debug!(asset = %self.path.display(), "player released");
        }
    }
}

fn decode(path: &Path) -> Result<Decoder<BufReader<File>>, PlaybackEvent> {
    let file = File::open(path).map_err(|err| {
        warn!(%err, asset = %path.display(), "failed to open alert sound");
        media_error(MEDIA_ERROR_IO)
    })?;
    Decoder::new(BufReader::new(file)).map_err(|err| {
        warn!(%err, asset = %path.display(), "failed to decode alert sound");
        media_error(MEDIA_ERROR_UNSUPPORTED)
    })
}

/// Blocks the calling thread until the clip ends or the player is released.
/// The output stream lives on this thread for the whole clip.
fn play_to_end(
    path: &Path,
    slot: &Mutex<Option<Arc<Sink>>>,
    released: &AtomicBool,
) -> PlaybackEvent {
    let source = match decode(path) {
        Ok(source) => source,
        Err(event) => return event,
    };
    let (_stream, handle) = match OutputStream::try_default() {
        Ok(output) => output,
        Err(err) => {
            warn!(%err, "no audio output device");
            return media_error(MEDIA_ERROR_IO);
        }
    };
    let sink = match Sink::try_new(&handle) {
        Ok(sink) => Arc::new(sink),
        Err(err) => {
            warn!(%err, "failed to open audio sink");
            return media_error(MEDIA_ERROR_IO);
        }
    };
    sink.append(source);
    *slot.lock() = Some(sink.clone());
    if released.load(Ordering::SeqCst) {
        sink.stop();
    }
    sink.sleep_until_end();
    slot.lock().take();
    PlaybackEvent::Completed
}

fn media_error(extra: i32) -> PlaybackEvent {
    PlaybackEvent::Error {
        what: MEDIA_ERROR_UNKNOWN,
        extra,
    }
}

/// Shows alerts through the desktop notification service.
pub struct DesktopPoster {
    app_name: String,
}

impl DesktopPoster {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl NotificationPoster for DesktopPoster {
    fn post(&self, id: AlarmId, notification: &Notification) -> Result<(), PlatformError> {
        desktop_notification(&self.app_name, notification)
            .show()
            .map_err(|err| PlatformError::Unavailable(format!("notification service: {err}")))?;
        debug!(id, title = %notification.title, "notification shown");
        Ok(())
    }
}

pub fn desktop_notification(
    app_name: &str,
    notification: &Notification,
) -> notify_rust::Notification {
    let mut desktop = notify_rust::Notification::new();
    desktop
        .appname(app_name)
        .summary(&notification.title)
        .body(&display_body(notification))
        .timeout(display_timeout(notification));
    #[cfg(all(unix, not(target_os = "macos")))]
    desktop.urgency(match notification.priority {
        Priority::Max => notify_rust::Urgency::Critical,
        Priority::Min | Priority::Low => notify_rust::Urgency::Low,
        Priority::Default | Priority::High => notify_rust::Urgency::Normal,
    });
    desktop
}

/// Second route to the notification daemon through the `notify-send` tool.
pub struct NotifySendPoster {
    app_name: String,
}

impl NotifySendPoster {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

impl NotificationPoster for NotifySendPoster {
    fn post(&self, id: AlarmId, notification: &Notification) -> Result<(), PlatformError> {
        let status = Command::new("notify-send")
            .args(notify_send_args(&self.app_name, notification))
            .status()
            .map_err(|err| PlatformError::Unavailable(format!("notify-send: {err}")))?;
        if !status.success() {
            return Err(PlatformError::Rejected(format!("notify-send exited with {status}")));
        }
        debug!(id, title = %notification.title, "notification shown via notify-send");
        Ok(())
    }
}

pub fn notify_send_args(app_name: &str, notification: &Notification) -> Vec<String> {
    let urgency = match notification.priority {
        Priority::Max => "critical",
        Priority::Min | Priority::Low => "low",
        Priority::Default | Priority::High => "normal",
    };
    let mut args = vec![
        format!("--app-name={app_name}"),
        format!("--urgency={urgency}"),
    ];
    match display_timeout(notification) {
        Timeout::Never => args.push("--expire-time=0".to_string()),
        Timeout::Milliseconds(ms) => args.push(format!("--expire-time={ms}")),
        Timeout::Default => {}
    }
    args.push(notification.title.clone());
    args.push(display_body(notification));
    args
}

fn display_body(notification: &Notification) -> String {
    let mut text = notification
        .big_text
        .clone()
        .unwrap_or_else(|| notification.body.clone());
    if let Some(CountdownDisplay::Static(at)) = &notification.countdown {
        text.push('\n');
        text.push_str(at);
    }
    text
}

/// Countdown alerts expire at the reference time; other sticky alerts stay
/// until dismissed.
fn display_timeout(notification: &Notification) -> Timeout {
    match notification.timeout_after {
        Some(after) => {
            Timeout::Milliseconds(u32::try_from(after.as_millis()).unwrap_or(u32::MAX))
        }
        None if notification.ongoing => Timeout::Never,
        None => Timeout::Default,
    }
}

#[derive(Debug, Default)]
pub struct LogSettings;

impl SystemSettings for LogSettings {
    fn open(&self, screen: SettingsScreen) -> Result<(), PlatformError> {
        info!(?screen, "settings screen requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_core::notification::{Category, LaunchAction, Visibility};
    use chrono::Utc;
    use std::sync::mpsc;

    fn alert(priority: Priority, ongoing: bool) -> Notification {
        Notification {
            channel_id: "shabbos_alerts".into(),
            title: "Shabbos".into(),
            body: "Light candles".into(),
            big_text: None,
            priority,
            category: Category::Alarm,
            visibility: Visibility::Public,
            vibration_pattern: vec![0, 500, 250, 500],
            content_action: LaunchAction::relaunch(7),
            full_screen_action: None,
            auto_cancel: !ongoing,
            ongoing,
            when: Utc::now(),
            show_when: true,
            countdown: None,
            timeout_after: None,
            silent: false,
        }
    }

    #[test]
    fn missing_assets_are_rejected_at_open() {
        let unrooted = DesktopAudio::new(None);
        assert!(matches!(
            unrooted.open("no/such/file.mp3", AudioAttributes::ALARM),
            Err(PlatformError::Resource(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let rooted = DesktopAudio::new(Some(dir.path().to_path_buf()));
        assert!(matches!(
            rooted.open("no/such/file.mp3", AudioAttributes::ALARM),
            Err(PlatformError::Resource(_))
        ));
    }

    #[test]
    fn undecodable_asset_reports_error_instead_of_prepared() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.mp3"), b"not audio at all").unwrap();
        let audio = DesktopAudio::new(Some(dir.path().to_path_buf()));
        let player = audio.open("broken.mp3", AudioAttributes::ALARM).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        player
            .prepare_async(Arc::new(move |event: PlaybackEvent| {
                let _ = tx.lock().send(event);
            }))
            .unwrap();
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event, media_error(MEDIA_ERROR_UNSUPPORTED));
        player.release();
        player.release();
    }

    #[test]
    fn wake_lock_lapses_after_timeout_and_is_not_retained() {
        let power = DesktopPower::new();
        let lock = power
            .acquire_wake_lock("test", Duration::from_millis(20))
            .unwrap();
        assert!(lock.is_held());
        assert_eq!(power.live_locks(), 1);
        thread::sleep(Duration::from_millis(200));
        assert!(!lock.is_held());
        drop(lock);
        assert_eq!(power.live_locks(), 0);
    }

    #[test]
    fn critical_alert_never_expires() {
        let desktop = desktop_notification("Shabbos", &alert(Priority::Max, true));
        assert_eq!(desktop.summary, "Shabbos");
        assert_eq!(desktop.body, "Light candles");
        assert_eq!(desktop.timeout, Timeout::Never);

        let args = notify_send_args("Shabbos", &alert(Priority::Max, true));
        assert_eq!(
            args,
            vec![
                "--app-name=Shabbos",
                "--urgency=critical",
                "--expire-time=0",
                "Shabbos",
                "Light candles",
            ]
        );
    }

    #[test]
    fn countdown_alert_shows_reference_time_and_expires_with_it() {
        let mut countdown = alert(Priority::Max, true);
        countdown.countdown = Some(CountdownDisplay::Static("Candle lighting at 18:04".into()));
        countdown.timeout_after = Some(Duration::from_secs(600));
        let desktop = desktop_notification("Shabbos", &countdown);
        assert_eq!(desktop.body, "Light candles\nCandle lighting at 18:04");
        assert_eq!(desktop.timeout, Timeout::Milliseconds(600_000));
        assert!(notify_send_args("Shabbos", &countdown)
            .contains(&"--expire-time=600000".to_string()));
    }

    #[test]
    fn ordinary_alert_uses_daemon_timeout() {
        let args = notify_send_args("Shabbos", &alert(Priority::High, false));
        assert_eq!(args[1], "--urgency=normal");
        assert!(!args.iter().any(|arg| arg.starts_with("--expire-time")));
    }
}
