pub mod config;
pub mod diagnostics;
pub mod error;
pub mod memory;
pub mod model;
pub mod notification;
pub mod notifier;
pub mod permissions;
pub mod platform;
pub mod playback;
pub mod prefs;
pub mod scheduler;
pub mod sound;
pub mod trigger;
pub mod wake;

pub use crate::config::AlarmConfig;
pub use crate::model::{AlarmId, ScheduledEvent, TriggerIntent, TriggerPayload};
pub use crate::platform::Platform;
pub use crate::scheduler::{AlarmScheduler, PrecisionTier};
pub use crate::trigger::{TriggerHandler, TriggerOutcome};
