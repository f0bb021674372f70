use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type AlarmId = i32;

pub const DEFAULT_TITLE: &str = "שבת שלום!";
pub const DEFAULT_BODY: &str = "Time to light candles 🕯️🕯️";

/// A one-shot alert requested by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub id: AlarmId,
    pub fire_at_millis: i64,
    pub title: String,
    pub body: String,
    pub is_pre_event: bool,
    /// Main event time shown by countdown notifications; zero when absent.
    pub reference_millis: i64,
}

impl ScheduledEvent {
    pub fn new(
        id: AlarmId,
        fire_at_millis: i64,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id,
            fire_at_millis,
            title: title.into(),
            body: body.into(),
            is_pre_event: false,
            reference_millis: 0,
        }
    }

    pub fn pre_event(mut self, reference_millis: i64) -> Self {
        self.is_pre_event = true;
        self.reference_millis = reference_millis;
        self
    }

    pub fn fire_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.fire_at_millis)
    }

    pub fn payload(&self) -> TriggerPayload {
        TriggerPayload {
            id: self.id,
            title: self.title.clone(),
            body: self.body.clone(),
            is_pre_event: self.is_pre_event,
            reference_millis: self.reference_millis,
        }
    }
}

/// Extras carried by an OS registration and handed back at fire time.
///
/// Every field has a default so a partially populated registration still
/// produces a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPayload {
    #[serde(rename = "notification_id", default)]
    pub id: AlarmId,
    #[serde(rename = "notification_title", default = "default_title")]
    pub title: String,
    #[serde(rename = "notification_body", default = "default_body")]
    pub body: String,
    #[serde(rename = "is_pre_notification", default)]
    pub is_pre_event: bool,
    #[serde(rename = "candle_lighting_time", default)]
    pub reference_millis: i64,
}

impl Default for TriggerPayload {
    fn default() -> Self {
        Self {
            id: 0,
            title: default_title(),
            body: default_body(),
            is_pre_event: false,
            reference_millis: 0,
        }
    }
}

impl TriggerPayload {
    pub fn from_extras(extras: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(extras.clone())
    }

    pub fn to_extras(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Reference time for a countdown, if this is a pre-event alert that has one.
    pub fn reference_at(&self) -> Option<DateTime<Utc>> {
        if !self.is_pre_event || self.reference_millis <= 0 {
            return None;
        }
        DateTime::from_timestamp_millis(self.reference_millis)
    }
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_body() -> String {
    DEFAULT_BODY.to_string()
}

/// What the OS hands the trigger handler when it wakes the process.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerIntent {
    Alarm { action: String, extras: Value },
    System { action: String },
}

pub const BOOT_ACTIONS: [&str; 3] = [
    "android.intent.action.BOOT_COMPLETED",
    "android.intent.action.QUICKBOOT_POWERON",
    "com.htc.intent.action.QUICKBOOT_POWERON",
];

impl TriggerIntent {
    pub fn is_restart(&self) -> bool {
        match self {
            TriggerIntent::System { action } => BOOT_ACTIONS.contains(&action.as_str()),
            TriggerIntent::Alarm { .. } => false,
        }
    }
}
