use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{platform::Platform, scheduler::exact_alarms_permitted};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    pub brand: String,
    pub os_version: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            manufacturer: "unknown".to_string(),
            model: "unknown".to_string(),
            brand: "unknown".to_string(),
            os_version: "unknown".to_string(),
        }
    }
}

/// Vendors known to kill background apps aggressively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorFamily {
    Xiaomi,
    Samsung,
    Huawei,
    Oppo,
    Vivo,
}

impl VendorFamily {
    pub fn detect(manufacturer: &str) -> Option<Self> {
        match manufacturer.to_ascii_lowercase().as_str() {
            "xiaomi" | "redmi" | "poco" => Some(VendorFamily::Xiaomi),
            "samsung" => Some(VendorFamily::Samsung),
            "huawei" | "honor" => Some(VendorFamily::Huawei),
            "oppo" | "realme" | "oneplus" => Some(VendorFamily::Oppo),
            "vivo" => Some(VendorFamily::Vivo),
            _ => None,
        }
    }

    pub fn advice(self) -> &'static str {
        match self {
            VendorFamily::Xiaomi => "enable 'Autostart' and disable battery restrictions",
            VendorFamily::Samsung => "disable the 'Sleeping apps' feature for this app",
            VendorFamily::Huawei => "enable 'Protected apps' or disable battery optimization",
            VendorFamily::Oppo => "disable battery optimization and enable autostart",
            VendorFamily::Vivo => "enable 'Allow autostart' and disable battery optimization",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionStatus {
    pub exact_alarms: bool,
    pub ignoring_battery_optimizations: bool,
    pub notifications_enabled: bool,
}

impl PermissionStatus {
    pub fn collect(platform: &Platform) -> Self {
        Self {
            exact_alarms: exact_alarms_permitted(platform.alarms.as_ref()),
            ignoring_battery_optimizations: platform.power.is_ignoring_battery_optimizations(),
            notifications_enabled: platform.notifications.are_notifications_enabled(),
        }
    }

    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if !self.exact_alarms {
            warnings.push("exact alarm permission not granted; alerts may arrive late");
        }
        if !self.ignoring_battery_optimizations {
            warnings.push("battery optimization enabled; the system may stop the app in background");
        }
        if !self.notifications_enabled {
            warnings.push("notifications are disabled");
        }
        warnings
    }
}

/// Logs device and permission state for support diagnostics.
pub fn log_device_status(platform: &Platform) -> PermissionStatus {
    let device = &platform.device;
    info!(
        manufacturer = %device.manufacturer,
        model = %device.model,
        brand = %device.brand,
        os_version = %device.os_version,
        "device status"
    );

    let status = PermissionStatus::collect(platform);
    info!(
        exact_alarms = status.exact_alarms,
        ignoring_battery_optimizations = status.ignoring_battery_optimizations,
        notifications_enabled = status.notifications_enabled,
        "permission status"
    );
    for warning in status.warnings() {
        warn!("{warning}");
    }
    if let Some(vendor) = VendorFamily::detect(&device.manufacturer) {
        warn!(?vendor, "aggressive power management detected: {}", vendor.advice());
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPlatform;

    #[test]
    fn detects_vendor_families_case_insensitively() {
        assert_eq!(VendorFamily::detect("Redmi"), Some(VendorFamily::Xiaomi));
        assert_eq!(VendorFamily::detect("OnePlus"), Some(VendorFamily::Oppo));
        assert_eq!(VendorFamily::detect("HONOR"), Some(VendorFamily::Huawei));
        assert_eq!(VendorFamily::detect("Google"), None);
    }

    #[test]
    fn status_warns_about_each_missing_permission() {
        let memory = MemoryPlatform::at_millis(0);
        memory.alarms.set_exact_permission(false);
        memory.notifications.set_enabled(false);
        let status = log_device_status(&memory.platform());
        assert!(!status.exact_alarms);
        assert!(!status.ignoring_battery_optimizations);
        assert_eq!(status.warnings().len(), 3);

        memory.alarms.set_exact_permission(true);
        memory.power.set_ignoring_battery_optimizations(true);
        memory.notifications.set_enabled(true);
        assert!(PermissionStatus::collect(&memory.platform()).warnings().is_empty());
    }
}
