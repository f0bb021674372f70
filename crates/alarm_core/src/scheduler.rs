use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    config::AlarmConfig,
    error::SchedulerError,
    model::{AlarmId, ScheduledEvent},
    platform::{AlarmRegistration, AlarmService, Clock, Platform, TimerCapability},
};

/// Delivery guarantee of the timer primitive used for a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrecisionTier {
    /// Exact, user-visible pending alarm, exempt from deferral.
    AlarmClock,
    /// Allowed while idle but may be deferred under heavy power pressure.
    IdleTolerant,
    /// Exact and allowed while idle.
    ExactWhileIdle,
    Exact,
    Basic,
}

impl PrecisionTier {
    pub fn select(capability: TimerCapability, exact_permitted: bool) -> Self {
        match capability {
            TimerCapability::PermissionGatedExact if exact_permitted => PrecisionTier::AlarmClock,
            TimerCapability::PermissionGatedExact => PrecisionTier::IdleTolerant,
            TimerCapability::ExactWhileIdle => PrecisionTier::ExactWhileIdle,
            TimerCapability::Exact => PrecisionTier::Exact,
            TimerCapability::Basic => PrecisionTier::Basic,
        }
    }

    pub fn is_exact(self) -> bool {
        matches!(
            self,
            PrecisionTier::AlarmClock | PrecisionTier::ExactWhileIdle | PrecisionTier::Exact
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleReceipt {
    pub id: AlarmId,
    pub fire_at: DateTime<Utc>,
    pub tier: PrecisionTier,
    /// Set when a stale fire time was replaced by the near-future fallback.
    pub adjusted: bool,
}

pub struct AlarmScheduler {
    alarms: Arc<dyn AlarmService>,
    clock: Arc<dyn Clock>,
    config: Arc<AlarmConfig>,
}

impl AlarmScheduler {
    pub fn new(platform: &Platform, config: Arc<AlarmConfig>) -> Self {
        Self {
            alarms: platform.alarms.clone(),
            clock: platform.clock.clone(),
            config,
        }
    }

    /// Registers `event`, reporting failure as `false` instead of an error.
    #[instrument(skip(self, event), fields(id = event.id))]
    pub fn schedule(&self, event: &ScheduledEvent) -> bool {
        match self.try_schedule(event) {
            Ok(receipt) => {
                info!(
                    fire_at = %receipt.fire_at,
                    tier = ?receipt.tier,
                    adjusted = receipt.adjusted,
                    "alarm scheduled"
                );
                true
            }
            Err(err) => {
                error!(%err, "failed to schedule alarm");
                false
            }
        }
    }

    pub fn try_schedule(&self, event: &ScheduledEvent) -> Result<ScheduleReceipt, SchedulerError> {
        let requested = event
            .fire_at()
            .ok_or(SchedulerError::InvalidTimestamp(event.fire_at_millis))?;
        let now = self.clock.now();
        debug!(
            requested = %requested,
            now = %now,
            title = %event.title,
            pre_event = event.is_pre_event,
            "scheduling alarm"
        );

        let (fire_at, adjusted) = if requested <= now {
            let fallback = offset(now, self.config.stale_fallback);
            warn!(
                requested = %requested,
                fallback = %fallback,
                "fire time already passed, using near-future fallback"
            );
            (fallback, true)
        } else {
            (requested, false)
        };

        let tier = self.current_tier();
        self.alarms.register(AlarmRegistration {
            id: event.id,
            action: self.config.alarm_action(event.id),
            fire_at,
            tier,
            extras: event.payload().to_extras()?,
        })?;

        Ok(ScheduleReceipt {
            id: event.id,
            fire_at,
            tier,
            adjusted,
        })
    }

    /// Evaluates the precision table against the current capability and
    /// permission state.
    pub fn current_tier(&self) -> PrecisionTier {
        let tier = PrecisionTier::select(
            self.alarms.capability(),
            exact_alarms_permitted(self.alarms.as_ref()),
        );
        if tier == PrecisionTier::IdleTolerant {
            warn!("exact alarm permission missing, falling back to idle-tolerant delivery");
        }
        tier
    }

    pub fn can_schedule_exact(&self) -> bool {
        exact_alarms_permitted(self.alarms.as_ref())
    }

    /// Deregisters `id`. Cancelling an id with no registration succeeds.
    #[instrument(skip(self))]
    pub fn cancel(&self, id: AlarmId) -> bool {
        match self.alarms.cancel(id, &self.config.alarm_action(id)) {
            Ok(true) => {
                debug!("alarm cancelled");
                true
            }
            Ok(false) => {
                debug!("alarm was not scheduled");
                true
            }
            Err(err) => {
                error!(%err, "failed to cancel alarm");
                false
            }
        }
    }

    /// Cancels every id in `0..upper_bound`. Ids at or above the bound are
    /// left alone.
    pub fn cancel_all(&self, upper_bound: AlarmId) -> usize {
        let cancelled = (0..upper_bound.max(0)).filter(|id| self.cancel(*id)).count();
        info!(upper_bound, cancelled, "cancelled alarms");
        cancelled
    }
}

/// Only permission-gated platforms can refuse exact alarms.
pub fn exact_alarms_permitted(alarms: &dyn AlarmService) -> bool {
    match alarms.capability() {
        TimerCapability::PermissionGatedExact => alarms.can_schedule_exact_alarms(),
        _ => true,
    }
}

fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlatformError;
    use crate::memory::MemoryPlatform;

    const T: i64 = 1_760_000_000_000;

    fn setup() -> (MemoryPlatform, AlarmScheduler) {
        let memory = MemoryPlatform::at_millis(T);
        let scheduler = AlarmScheduler::new(&memory.platform(), Arc::new(AlarmConfig::default()));
        (memory, scheduler)
    }

    #[test]
    fn precision_table_follows_capability_and_permission() {
        use TimerCapability::*;
        assert_eq!(PrecisionTier::select(PermissionGatedExact, true), PrecisionTier::AlarmClock);
        assert_eq!(PrecisionTier::select(PermissionGatedExact, false), PrecisionTier::IdleTolerant);
        assert_eq!(PrecisionTier::select(ExactWhileIdle, false), PrecisionTier::ExactWhileIdle);
        assert_eq!(PrecisionTier::select(Exact, false), PrecisionTier::Exact);
        assert_eq!(PrecisionTier::select(Basic, true), PrecisionTier::Basic);
        assert!(!PrecisionTier::IdleTolerant.is_exact());
    }

    #[test]
    fn tier_is_reevaluated_on_every_call() {
        let (memory, scheduler) = setup();
        let event = ScheduledEvent::new(3, T + 60_000, "Shabbos", "Light candles");

        assert!(scheduler.schedule(&event));
        assert_eq!(memory.alarms.pending(3).unwrap().tier, PrecisionTier::AlarmClock);

        memory.alarms.set_exact_permission(false);
        assert!(!scheduler.can_schedule_exact());
        assert!(scheduler.schedule(&event));
        assert_eq!(memory.alarms.pending(3).unwrap().tier, PrecisionTier::IdleTolerant);
    }

    #[test]
    fn stale_fire_time_is_moved_into_the_near_future() {
        let (memory, scheduler) = setup();
        let receipt = scheduler
            .try_schedule(&ScheduledEvent::new(1, T - 1_000, "Late", "Body"))
            .unwrap();
        assert!(receipt.adjusted);
        assert_eq!(receipt.fire_at.timestamp_millis(), T + 5_000);
        assert_eq!(memory.alarms.pending_ids(), vec![1]);
    }

    #[test]
    fn fire_time_equal_to_now_counts_as_stale() {
        let (_memory, scheduler) = setup();
        let receipt = scheduler
            .try_schedule(&ScheduledEvent::new(1, T, "Now", "Body"))
            .unwrap();
        assert!(receipt.adjusted);
    }

    #[test]
    fn platform_failure_reports_false() {
        let (memory, scheduler) = setup();
        memory
            .alarms
            .fail_with(Some(PlatformError::Unavailable("alarm service".into())));
        assert!(!scheduler.schedule(&ScheduledEvent::new(1, T + 1_000, "a", "b")));
        assert!(memory.alarms.pending_ids().is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let (memory, scheduler) = setup();
        assert!(scheduler.cancel(42));
        assert!(scheduler.schedule(&ScheduledEvent::new(42, T + 1_000, "a", "b")));
        assert!(scheduler.cancel(42));
        assert!(scheduler.cancel(42));
        assert!(memory.alarms.pending(42).is_none());
    }

    #[test]
    fn rescheduling_same_id_replaces_registration() {
        let (memory, scheduler) = setup();
        assert!(scheduler.schedule(&ScheduledEvent::new(9, T + 1_000, "first", "b")));
        assert!(scheduler.schedule(&ScheduledEvent::new(9, T + 2_000, "second", "b")));
        let pending = memory.alarms.pending(9).unwrap();
        assert_eq!(pending.fire_at.timestamp_millis(), T + 2_000);
        assert_eq!(pending.extras["notification_title"], "second");
        assert_eq!(memory.alarms.pending_ids(), vec![9]);
    }

    #[test]
    fn cancel_all_respects_upper_bound() {
        let (memory, scheduler) = setup();
        for id in [0, 10, 49, 50, 75] {
            assert!(scheduler.schedule(&ScheduledEvent::new(id, T + 1_000, "a", "b")));
        }
        scheduler.cancel_all(50);
        assert_eq!(memory.alarms.pending_ids(), vec![50, 75]);
    }
}
