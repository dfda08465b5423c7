//! Frame capacity tracker (C10). Grounded on `original_source`'s
//! `TimelineCapacityTracker.h` (referenced by `TaskProfileRegistry.h`'s
//! `SubscribeToBudgetEvents`): observes measured frame duration against the
//! configured budget and publishes `BudgetOverrun` / `BudgetAvailable` on
//! the shared `EventBus`, which `TaskProfileRegistry` reacts to.

use std::time::Duration;

use crate::events::{messages, EventBus};

/// Tracks recent frame durations against a target budget and raises budget
/// events when utilization crosses the deadband (§4.8, §5 "capacity
/// feedback loop"). `deadband_fraction` matches
/// `TaskProfileRegistry::apply_pressure`'s ±5% default but is configurable
/// independently since the tracker and the registry can disagree on how
/// twitchy to be.
pub struct CapacityTracker {
    frame_budget: Duration,
    deadband_fraction: f32,
    target_utilization: f32,
    history: Vec<Duration>,
    history_capacity: usize,
}

impl CapacityTracker {
    pub fn new(frame_budget: Duration, deadband_fraction: f32) -> Self {
        CapacityTracker {
            frame_budget,
            deadband_fraction,
            target_utilization: 1.0,
            history: Vec::new(),
            history_capacity: 32,
        }
    }

    pub fn set_frame_budget(&mut self, budget: Duration) {
        self.frame_budget = budget;
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }

    /// Records one frame's measured duration and publishes a budget event
    /// if utilization strays outside the deadband around
    /// `target_utilization` (§4.8 "ApplyPressure" deadband logic, applied
    /// here to raw frame time rather than per-task cost).
    pub fn record_frame(&mut self, duration: Duration, bus: &std::sync::Arc<EventBus>) {
        self.history.push(duration);
        if self.history.len() > self.history_capacity {
            self.history.remove(0);
        }

        let utilization = self.utilization_for(duration);
        let delta = utilization - self.target_utilization;

        if delta > self.deadband_fraction {
            let over_by_ms = (duration.as_secs_f64() - self.frame_budget.as_secs_f64()) * 1000.0;
            bus.publish(&messages::BudgetOverrun {
                over_by_ms: over_by_ms.max(0.0) as f32,
            });
        } else if delta < -self.deadband_fraction {
            let headroom_ms = (self.frame_budget.as_secs_f64() - duration.as_secs_f64()) * 1000.0;
            bus.publish(&messages::BudgetAvailable {
                headroom_ms: headroom_ms.max(0.0) as f32,
            });
        }
    }

    fn utilization_for(&self, duration: Duration) -> f32 {
        if self.frame_budget.is_zero() {
            return 1.0;
        }
        (duration.as_secs_f64() / self.frame_budget.as_secs_f64()) as f32
    }

    pub fn average_duration(&self) -> Duration {
        if self.history.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.history.iter().sum();
        total / self.history.len() as u32
    }

    pub fn average_utilization(&self) -> f32 {
        self.utilization_for(self.average_duration())
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }
}
