use std::sync::Arc;

use alarm_core::{
    diagnostics::{log_device_status, PermissionStatus},
    model::{DEFAULT_BODY, DEFAULT_TITLE},
    permissions::{request_battery_exemption, request_exact_alarm_permission},
    trigger::ensure_alert_channel,
    AlarmConfig, AlarmScheduler, Platform, ScheduledEvent,
};
use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

pub const CHANNEL: &str = "com.shabbos.shabbos_app/alarms";

/// A named call arriving from the host application.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MethodCall {
    pub method: String,
    #[serde(default)]
    pub arguments: Value,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum MethodResult {
    Success(Value),
    Error(String),
    NotImplemented,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleAlarmArgs {
    #[serde(default)]
    id: i32,
    #[serde(default)]
    timestamp_millis: i64,
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_body")]
    body: String,
    #[serde(default)]
    is_pre_notification: bool,
    #[serde(default)]
    candle_lighting_time: i64,
}

#[derive(Debug, Deserialize)]
struct CancelAlarmArgs {
    #[serde(default)]
    id: i32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelAllArgs {
    max_id: Option<i32>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

fn default_body() -> String {
    DEFAULT_BODY.to_string()
}

pub struct AlarmBridge {
    platform: Platform,
    config: Arc<AlarmConfig>,
    scheduler: AlarmScheduler,
}

impl AlarmBridge {
    pub fn new(platform: Platform, config: Arc<AlarmConfig>) -> Self {
        log_device_status(&platform);
        ensure_alert_channel(platform.notifications.as_ref(), &config.alert_channel());
        let scheduler = AlarmScheduler::new(&platform, config.clone());
        Self {
            platform,
            config,
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &AlarmScheduler {
        &self.scheduler
    }

    pub fn permission_status(&self) -> PermissionStatus {
        PermissionStatus::collect(&self.platform)
    }

    pub fn handle(&self, call: &MethodCall) -> Result<MethodResult> {
        debug!(method = %call.method, "method call received");
        let value = match call.method.as_str() {
            "scheduleAlarm" => {
                let args: ScheduleAlarmArgs = parse_args(&call.arguments)?;
                let mut event =
                    ScheduledEvent::new(args.id, args.timestamp_millis, args.title, args.body);
                if args.is_pre_notification {
                    event = event.pre_event(args.candle_lighting_time);
                }
                json!(self.scheduler.schedule(&event))
            }
            "cancelAlarm" => {
                let args: CancelAlarmArgs = parse_args(&call.arguments)?;
                json!(self.scheduler.cancel(args.id))
            }
            "cancelAllAlarms" => {
                let args: CancelAllArgs = parse_args(&call.arguments)?;
                self.scheduler
                    .cancel_all(args.max_id.unwrap_or(self.config.cancel_all_bound));
                json!(true)
            }
            "canScheduleExactAlarms" => json!(self.scheduler.can_schedule_exact()),
            "requestExactAlarmPermission" => {
                request_exact_alarm_permission(&self.platform);
                json!(true)
            }
            "isIgnoringBatteryOptimizations" => {
                json!(self.platform.power.is_ignoring_battery_optimizations())
            }
            "requestDisableBatteryOptimization" => {
                request_battery_exemption(&self.platform);
                json!(true)
            }
            _ => return Ok(MethodResult::NotImplemented),
        };
        Ok(MethodResult::Success(value))
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(arguments: &Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).context("invalid method arguments")
}

static BRIDGE: Lazy<RwLock<Option<AlarmBridge>>> = Lazy::new(|| RwLock::new(None));

/// Installs the process-wide bridge, replacing any previous one.
pub fn install(bridge: AlarmBridge) {
    *BRIDGE.write() = Some(bridge);
}

pub fn dispatch(call: &MethodCall) -> Result<MethodResult> {
    let guard = BRIDGE.read();
    let bridge = guard
        .as_ref()
        .ok_or_else(|| anyhow!("alarm bridge not installed"))?;
    bridge.handle(call)
}

/// Decodes one JSON-encoded call and encodes its result. Errors become
/// `MethodResult::Error` rather than failing the channel.
pub fn dispatch_json(line: &str) -> String {
    let result = serde_json::from_str::<MethodCall>(line)
        .context("malformed method call")
        .and_then(|call| dispatch(&call))
        .unwrap_or_else(|err| MethodResult::Error(format!("{err:#}")));
    serde_json::to_string(&result).unwrap_or_else(|_| r#"{"status":"error"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alarm_core::memory::MemoryPlatform;
    use alarm_core::platform::SettingsScreen;

    const T: i64 = 1_760_000_000_000;

    fn bridge(memory: &MemoryPlatform) -> AlarmBridge {
        AlarmBridge::new(memory.platform(), Arc::new(AlarmConfig::default()))
    }

    #[test]
    fn alert_channel_exists_once_bridge_is_created() {
        let memory = MemoryPlatform::at_millis(T);
        assert!(memory.notifications.stored_channel("shabbos_alerts").is_none());
        let _bridge = bridge(&memory);
        let channel = memory
            .notifications
            .stored_channel("shabbos_alerts")
            .expect("channel created at startup");
        assert!(channel.bypass_dnd);
        assert!(!channel.sound);
    }

    #[test]
    fn schedule_alarm_decodes_host_arguments() {
        let memory = MemoryPlatform::at_millis(T);
        let bridge = bridge(&memory);
        let result = bridge
            .handle(&MethodCall::new(
                "scheduleAlarm",
                json!({
                    "id": 7,
                    "timestampMillis": T + 5_000,
                    "title": "Shabbos",
                    "body": "Light candles",
                    "isPreNotification": true,
                    "candleLightingTime": T + 600_000,
                }),
            ))
            .unwrap();
        assert_eq!(result, MethodResult::Success(json!(true)));

        let pending = memory.alarms.pending(7).expect("registered");
        assert_eq!(pending.fire_at.timestamp_millis(), T + 5_000);
        assert_eq!(pending.extras["is_pre_notification"], true);
        assert_eq!(pending.extras["candle_lighting_time"], T + 600_000);
    }

    #[test]
    fn schedule_alarm_fills_missing_arguments() {
        let memory = MemoryPlatform::at_millis(T);
        let bridge = bridge(&memory);
        bridge
            .handle(&MethodCall::new("scheduleAlarm", json!({ "id": 2 })))
            .unwrap();
        let pending = memory.alarms.pending(2).expect("registered");
        assert_eq!(pending.extras["notification_title"], DEFAULT_TITLE);
        assert_eq!(pending.fire_at.timestamp_millis(), T + 5_000);
    }

    #[test]
    fn cancel_calls_succeed_without_registrations() {
        let memory = MemoryPlatform::at_millis(T);
        let bridge = bridge(&memory);
        assert_eq!(
            bridge
                .handle(&MethodCall::new("cancelAlarm", json!({ "id": 3 })))
                .unwrap(),
            MethodResult::Success(json!(true))
        );
        assert_eq!(
            bridge
                .handle(&MethodCall::new("cancelAllAlarms", Value::Null))
                .unwrap(),
            MethodResult::Success(json!(true))
        );
    }

    #[test]
    fn cancel_all_accepts_custom_bound() {
        let memory = MemoryPlatform::at_millis(T);
        let bridge = bridge(&memory);
        for id in [10, 120] {
            bridge
                .handle(&MethodCall::new(
                    "scheduleAlarm",
                    json!({ "id": id, "timestampMillis": T + 60_000 }),
                ))
                .unwrap();
        }
        bridge
            .handle(&MethodCall::new("cancelAllAlarms", Value::Null))
            .unwrap();
        assert_eq!(memory.alarms.pending_ids(), vec![120]);
        bridge
            .handle(&MethodCall::new("cancelAllAlarms", json!({ "maxId": 200 })))
            .unwrap();
        assert!(memory.alarms.pending_ids().is_empty());
    }

    #[test]
    fn permission_queries_and_requests() {
        let memory = MemoryPlatform::at_millis(T);
        memory.alarms.set_exact_permission(false);
        let bridge = bridge(&memory);
        assert_eq!(
            bridge
                .handle(&MethodCall::new("canScheduleExactAlarms", Value::Null))
                .unwrap(),
            MethodResult::Success(json!(false))
        );
        assert_eq!(
            bridge
                .handle(&MethodCall::new("isIgnoringBatteryOptimizations", Value::Null))
                .unwrap(),
            MethodResult::Success(json!(false))
        );
        bridge
            .handle(&MethodCall::new("requestExactAlarmPermission", Value::Null))
            .unwrap();
        bridge
            .handle(&MethodCall::new("requestDisableBatteryOptimization", Value::Null))
            .unwrap();
        assert_eq!(
            memory.settings.opened(),
            vec![
                SettingsScreen::ExactAlarmPermission,
                SettingsScreen::IgnoreBatteryOptimization
            ]
        );
    }

    #[test]
    fn unknown_method_is_not_implemented() {
        let memory = MemoryPlatform::at_millis(T);
        assert_eq!(
            bridge(&memory)
                .handle(&MethodCall::new("snooze", Value::Null))
                .unwrap(),
            MethodResult::NotImplemented
        );
    }

    #[test]
    fn invalid_arguments_are_errors() {
        let memory = MemoryPlatform::at_millis(T);
        assert!(bridge(&memory)
            .handle(&MethodCall::new("cancelAlarm", json!({ "id": "seven" })))
            .is_err());
    }

    #[test]
    fn json_dispatch_goes_through_installed_bridge() {
        let memory = MemoryPlatform::at_millis(T);
        install(bridge(&memory));
        let response = dispatch_json(
            r#"{"method":"scheduleAlarm","arguments":{"id":4,"timestampMillis":1760000060000}}"#,
        );
        let decoded: MethodResult = serde_json::from_str(&response).unwrap();
        assert_eq!(decoded, MethodResult::Success(json!(true)));
        assert_eq!(memory.alarms.pending_ids(), vec![4]);

        let malformed: MethodResult = serde_json::from_str(&dispatch_json("not json")).unwrap();
        assert!(matches!(malformed, MethodResult::Error(_)));
    }
}
