use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::platform::{Platform, SettingsScreen, SystemSettings, TimerCapability};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettingsOutcome {
    Opened(SettingsScreen),
    NotRequired,
    Unavailable,
}

/// Sends the user to grant exact-alarm permission, falling back to the app's
/// details screen.
pub fn request_exact_alarm_permission(platform: &Platform) -> SettingsOutcome {
    if platform.alarms.capability() != TimerCapability::PermissionGatedExact {
        debug!("exact alarms need no permission on this platform");
        return SettingsOutcome::NotRequired;
    }
    open_first(
        platform.settings.as_ref(),
        &[
            SettingsScreen::ExactAlarmPermission,
            SettingsScreen::ApplicationDetails,
        ],
    )
}

/// Asks to exempt the app from battery optimization unless it already is.
pub fn request_battery_exemption(platform: &Platform) -> SettingsOutcome {
    if platform.power.is_ignoring_battery_optimizations() {
        debug!("already ignoring battery optimizations");
        return SettingsOutcome::NotRequired;
    }
    open_first(
        platform.settings.as_ref(),
        &[
            SettingsScreen::IgnoreBatteryOptimization,
            SettingsScreen::BatteryOptimizationList,
            SettingsScreen::ApplicationDetails,
        ],
    )
}

fn open_first(settings: &dyn SystemSettings, screens: &[SettingsScreen]) -> SettingsOutcome {
    for screen in screens {
        match settings.open(*screen) {
            Ok(()) => {
                info!(?screen, "opened settings screen");
                return SettingsOutcome::Opened(*screen);
            }
            Err(err) => warn!(?screen, %err, "failed to open settings screen"),
        }
    }
    error!("no settings screen could be opened");
    SettingsOutcome::Unavailable
}
