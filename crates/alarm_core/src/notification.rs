use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::AlarmId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Importance {
    None,
    Min,
    Low,
    Default,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    Secret,
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Min,
    Low,
    Default,
    High,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Alarm,
    Reminder,
    Event,
}

/// Delivery channel the alerts are posted under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
    pub vibration: bool,
    pub lights: bool,
    pub show_badge: bool,
    /// Always false for alert channels: audio is played by the notifier.
    pub sound: bool,
    pub lockscreen_visibility: Visibility,
    /// Alerts still sound and show while Do Not Disturb is on.
    pub bypass_dnd: bool,
}

/// Tap action that brings the host application to the foreground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchAction {
    pub request_code: AlarmId,
    pub action: String,
    pub category: String,
    pub clear_task: bool,
}

impl LaunchAction {
    pub fn relaunch(request_code: AlarmId) -> Self {
        Self {
            request_code,
            action: "android.intent.action.MAIN".to_string(),
            category: "android.intent.category.LAUNCHER".to_string(),
            clear_task: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownDisplay {
    /// Live chronometer counting down to `Notification::when`.
    Chronometer,
    /// Pre-formatted time for platforms without a countdown presentation.
    Static(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub big_text: Option<String>,
    pub priority: Priority,
    pub category: Category,
    pub visibility: Visibility,
    pub vibration_pattern: Vec<u64>,
    pub content_action: LaunchAction,
    pub full_screen_action: Option<LaunchAction>,
    pub auto_cancel: bool,
    pub ongoing: bool,
    pub when: DateTime<Utc>,
    pub show_when: bool,
    pub countdown: Option<CountdownDisplay>,
    pub timeout_after: Option<Duration>,
    pub silent: bool,
}

impl Notification {
    pub fn is_countdown(&self) -> bool {
        self.countdown.is_some()
    }
}
