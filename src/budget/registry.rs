//! Task profile registry (C10). Grounded on `original_source`'s
//! `TaskProfileRegistry.{h,cpp}`: priority-sorted cache for pressure
//! adjustment, deadband-gated `apply_pressure`, and deferred-action flags
//! subscribed to `events::EventBus` to avoid adjusting state from inside a
//! publish call.

use std::collections::HashMap;

use crate::events::{messages, EventBus, ScopedSubscriptions};

use super::profile::{ResolutionTaskProfile, SimpleTaskProfile, TaskProfile};

const PRESSURE_DEADBAND: f32 = 0.05;

/// Builds a fresh, default-valued `TaskProfile` of a named concrete type so
/// `load_state` can reconstruct the right variant before handing it its
/// saved data (§6 "`type_name` used to select a registered factory", §9
/// "factory_registry: Map<type_name, fn() -> TaskProfile>").
pub type ProfileFactory = Box<dyn Fn() -> Box<dyn TaskProfile> + Send + Sync>;

/// `WorkUnitChangeCallback(task_id, old, new)` (§4.8): fired whenever
/// `decrease_lowest_priority`/`increase_highest_priority` actually moves a
/// profile's `work_units`, so a node can adapt its next-frame workload (e.g.
/// lower a shadow map resolution). Grounded on `original_source`'s
/// `TaskProfileRegistry::NotifyChange`.
pub type WorkUnitChangeCallback = Box<dyn Fn(&str, i32, i32) + Send + Sync>;

/// Central owner of every node's `TaskProfile`, plus the priority-ordered
/// pressure-adjustment operations the capacity feedback loop drives (§4.8).
pub struct TaskProfileRegistry {
    profiles: HashMap<String, Box<dyn TaskProfile>>,
    sorted_by_priority: Vec<String>,
    sorted_cache_valid: bool,
    decrease_flag: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
    increase_flag: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
    subscriptions: ScopedSubscriptions,
    factories: HashMap<&'static str, ProfileFactory>,
    change_callbacks: Vec<WorkUnitChangeCallback>,
}

impl Default for TaskProfileRegistry {
    fn default() -> Self {
        let mut registry = TaskProfileRegistry {
            profiles: HashMap::new(),
            sorted_by_priority: Vec::new(),
            sorted_cache_valid: false,
            decrease_flag: None,
            increase_flag: None,
            subscriptions: ScopedSubscriptions::new(),
            factories: HashMap::new(),
            change_callbacks: Vec::new(),
        };
        registry.register_factory("SimpleTaskProfile", || {
            Box::new(SimpleTaskProfile::new("", "", 0, 0))
        });
        registry.register_factory("ResolutionTaskProfile", || {
            Box::new(ResolutionTaskProfile::new("", "", vec![0]))
        });
        registry
    }
}

impl TaskProfileRegistry {
    pub fn new() -> Self {
        TaskProfileRegistry::default()
    }

    pub fn register_task(&mut self, profile: Box<dyn TaskProfile>) -> &str {
        let task_id = profile.task_id().to_string();
        self.profiles.insert(task_id.clone(), profile);
        self.invalidate_sorted_cache();
        // `insert` above always succeeds, so the lookup below cannot miss.
        self.profiles.get(&task_id).unwrap().task_id()
    }

    pub fn profile(&self, task_id: &str) -> Option<&dyn TaskProfile> {
        self.profiles.get(task_id).map(|p| p.as_ref())
    }

    pub fn profile_mut(&mut self, task_id: &str) -> Option<&mut Box<dyn TaskProfile>> {
        self.profiles.get_mut(task_id)
    }

    pub fn has_task(&self, task_id: &str) -> bool {
        self.profiles.contains_key(task_id)
    }

    pub fn unregister_task(&mut self, task_id: &str) {
        self.profiles.remove(task_id);
        self.invalidate_sorted_cache();
    }

    pub fn task_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn record_measurement(&mut self, task_id: &str, actual_ns: u64) -> bool {
        match self.profiles.get_mut(task_id) {
            Some(profile) => {
                profile.record_measurement(actual_ns);
                true
            }
            None => false,
        }
    }

    fn invalidate_sorted_cache(&mut self) {
        self.sorted_cache_valid = false;
    }

    fn ensure_sorted_cache(&mut self) {
        if self.sorted_cache_valid {
            return;
        }
        let mut ids: Vec<String> = self.profiles.keys().cloned().collect();
        ids.sort_by_key(|id| self.profiles[id].priority());
        self.sorted_by_priority = ids;
        self.sorted_cache_valid = true;
    }

    /// Decreases work units on the lowest-priority task that still has
    /// room, returning its task id. Empty string semantics from the
    /// original are represented as `None` here. Notifies every registered
    /// `WorkUnitChangeCallback` with the old and new unit counts (§4.8).
    pub fn decrease_lowest_priority(&mut self) -> Option<String> {
        self.ensure_sorted_cache();
        for task_id in self.sorted_by_priority.clone() {
            if let Some(profile) = self.profiles.get_mut(&task_id) {
                if profile.can_decrease() {
                    let old = profile.work_units();
                    profile.decrease();
                    let new = profile.work_units();
                    self.notify_change(&task_id, old, new);
                    return Some(task_id);
                }
            }
        }
        None
    }

    pub fn increase_highest_priority(&mut self) -> Option<String> {
        self.ensure_sorted_cache();
        for task_id in self.sorted_by_priority.clone().into_iter().rev() {
            if let Some(profile) = self.profiles.get_mut(&task_id) {
                if profile.can_increase() {
                    let old = profile.work_units();
                    profile.increase();
                    let new = profile.work_units();
                    self.notify_change(&task_id, old, new);
                    return Some(task_id);
                }
            }
        }
        None
    }

    /// Registers a `WorkUnitChangeCallback(task_id, old, new)`. The graph
    /// façade uses this to mark the owning node dirty so it recompiles and
    /// adapts its next-frame workload (§4.8 "Nodes learn of their change
    /// through a `WorkUnitChangeCallback`", §4.10 step 5).
    pub fn on_work_unit_change<F>(&mut self, callback: F)
    where
        F: Fn(&str, i32, i32) + Send + Sync + 'static,
    {
        self.change_callbacks.push(Box::new(callback));
    }

    fn notify_change(&self, task_id: &str, old: i32, new: i32) {
        if old == new {
            return;
        }
        for callback in &self.change_callbacks {
            callback(task_id, old, new);
        }
    }

    /// Adjusts one task if `current_utilization` strays more than the ±5%
    /// deadband from `target_utilization` (§4.8 "ApplyPressure").
    pub fn apply_pressure(&mut self, current_utilization: f32, target_utilization: f32) -> u32 {
        let delta = current_utilization - target_utilization;
        if delta > PRESSURE_DEADBAND {
            self.decrease_lowest_priority().is_some() as u32
        } else if delta < -PRESSURE_DEADBAND {
            self.increase_highest_priority().is_some() as u32
        } else {
            0
        }
    }

    pub fn tasks_by_category(&self, category: &str) -> Vec<&str> {
        self.profiles
            .values()
            .filter(|p| p.category() == category)
            .map(|p| p.task_id())
            .collect()
    }

    pub fn set_category_priority(&mut self, category: &str, priority: u8) {
        for profile in self.profiles.values_mut() {
            if profile.category() == category {
                profile.set_priority(priority);
            }
        }
        self.invalidate_sorted_cache();
    }

    pub fn decrease_category_work_units(&mut self, category: &str) -> u32 {
        let mut count = 0;
        for profile in self.profiles.values_mut() {
            if profile.category() == category && profile.can_decrease() {
                profile.decrease();
                count += 1;
            }
        }
        count
    }

    pub fn increase_category_work_units(&mut self, category: &str) -> u32 {
        let mut count = 0;
        for profile in self.profiles.values_mut() {
            if profile.category() == category && profile.can_increase() {
                profile.increase();
                count += 1;
            }
        }
        count
    }

    pub fn total_estimated_cost_ns(&self) -> u64 {
        self.profiles.values().map(|p| p.estimated_cost_ns()).sum()
    }

    pub fn average_pressure(&self) -> f32 {
        if self.profiles.is_empty() {
            return 0.0;
        }
        self.profiles.values().map(|p| p.pressure()).sum::<f32>() / self.profiles.len() as f32
    }

    pub fn calibrated_count(&self) -> usize {
        self.profiles.values().filter(|p| p.is_calibrated()).count()
    }

    pub fn reset_all_calibration(&mut self) {
        for profile in self.profiles.values_mut() {
            profile.reset_calibration();
        }
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
        self.invalidate_sorted_cache();
    }

    /// Subscribes to the graph's `BudgetOverrun`/`BudgetAvailable` events
    /// via the shared bus. Handlers only set a flag — the actual
    /// adjustment happens in `process_deferred_actions`, called once per
    /// frame outside the event dispatch lock, to avoid deadlock (§4.8,
    /// §5 "deferred-action flags").
    pub fn subscribe_to_budget_events(&mut self, bus: &std::sync::Arc<EventBus>) {
        let decrease_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let increase_flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        self.decrease_flag = Some(decrease_flag.clone());
        self.increase_flag = Some(increase_flag.clone());

        self.subscriptions.add(bus.subscribe::<messages::BudgetOverrun, _>(move |_event| {
            decrease_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
        self.subscriptions.add(bus.subscribe::<messages::BudgetAvailable, _>(move |_event| {
            increase_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }));
    }

    /// Runs any pressure adjustment queued by event handlers since the last
    /// call. Decrease is processed before increase (preventing overrun
    /// takes priority over reclaiming headroom).
    pub fn process_deferred_actions(&mut self) -> u32 {
        use std::sync::atomic::Ordering;
        let mut adjustments = 0;

        if let Some(flag) = &self.decrease_flag {
            if flag.swap(false, Ordering::SeqCst) {
                if self.decrease_lowest_priority().is_some() {
                    adjustments += 1;
                }
            }
        }
        if let Some(flag) = &self.increase_flag {
            if flag.swap(false, Ordering::SeqCst) {
                if self.increase_highest_priority().is_some() {
                    adjustments += 1;
                }
            }
        }
        adjustments
    }

    pub fn has_pending_actions(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.decrease_flag.as_ref().map(|f| f.load(Ordering::SeqCst)).unwrap_or(false)
            || self.increase_flag.as_ref().map(|f| f.load(Ordering::SeqCst)).unwrap_or(false)
    }

    pub fn unsubscribe_from_budget_events(&mut self) {
        self.subscriptions.clear();
        self.decrease_flag = None;
        self.increase_flag = None;
    }

    pub fn save_state(&self) -> serde_json::Value {
        let profiles: Vec<serde_json::Value> = self.profiles.values().map(|p| p.save_state()).collect();
        serde_json::json!({ "version": 1, "profiles": profiles })
    }

    /// Registers the factory for a concrete `TaskProfile` type under its
    /// `type_name()`, enabling `load_state` to resolve the right variant
    /// for a calibration-file entry (§6, §9 "factory_registry").
    pub fn register_factory<F>(&mut self, type_name: &'static str, factory: F)
    where
        F: Fn() -> Box<dyn TaskProfile> + Send + Sync + 'static,
    {
        self.factories.insert(type_name, Box::new(factory));
    }

    /// Reconstructs profiles from a value previously produced by
    /// `save_state`. A profile whose `typeName` has no registered factory,
    /// or whose version doesn't match, is skipped rather than failing the
    /// whole load — re-calibration from scratch is the documented fallback
    /// for a version mismatch (§6 "Versioned: a mismatch is handled by
    /// re-calibration rather than a hard failure"). Returns the number of
    /// profiles actually restored.
    pub fn load_state(&mut self, value: &serde_json::Value) -> usize {
        let Some(entries) = value.get("profiles").and_then(|p| p.as_array()) else {
            return 0;
        };
        let mut restored = 0;
        for entry in entries {
            let Some(type_name) = entry.get("typeName").and_then(|t| t.as_str()) else {
                continue;
            };
            let Some(factory) = self.factories.get(type_name) else {
                log::warn!(target: "rendergraph::budget", "no factory registered for task profile type {type_name:?}; skipping");
                continue;
            };
            let mut profile = factory();
            profile.load_state(entry);
            self.profiles.insert(profile.task_id().to_string(), profile);
            restored += 1;
        }
        self.invalidate_sorted_cache();
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::super::profile::SimpleTaskProfile;
    use super::*;

    #[test]
    fn decrease_targets_lowest_priority_first() {
        let mut registry = TaskProfileRegistry::new();
        registry.register_task(Box::new(SimpleTaskProfile::new("a", "post", 0, 4).with_priority(10)));
        registry.register_task(Box::new(SimpleTaskProfile::new("b", "post", 0, 4).with_priority(200)));

        let adjusted = registry.decrease_lowest_priority().unwrap();
        assert_eq!(adjusted, "a");
    }

    #[test]
    fn increase_targets_highest_priority_first() {
        let mut registry = TaskProfileRegistry::new();
        registry.register_task(Box::new(SimpleTaskProfile::new("a", "post", 0, 4).with_priority(10)));
        registry.register_task(Box::new(SimpleTaskProfile::new("b", "post", 0, 4).with_priority(200)));

        let adjusted = registry.increase_highest_priority().unwrap();
        assert_eq!(adjusted, "b");
    }

    #[test]
    fn decrease_notifies_work_unit_change_callback() {
        use std::sync::atomic::{AtomicI32, Ordering};
        use std::sync::Arc;

        let mut registry = TaskProfileRegistry::new();
        registry.register_task(Box::new(SimpleTaskProfile::new("shadow", "shadow", 0, 4).with_priority(10)));

        let seen_old = Arc::new(AtomicI32::new(i32::MIN));
        let seen_new = Arc::new(AtomicI32::new(i32::MIN));
        let (old_handle, new_handle) = (seen_old.clone(), seen_new.clone());
        registry.on_work_unit_change(move |task_id, old, new| {
            assert_eq!(task_id, "shadow");
            old_handle.store(old, Ordering::SeqCst);
            new_handle.store(new, Ordering::SeqCst);
        });

        let baseline = registry.profile("shadow").unwrap().work_units();
        registry.decrease_lowest_priority().unwrap();

        assert_eq!(seen_old.load(Ordering::SeqCst), baseline);
        assert_eq!(seen_new.load(Ordering::SeqCst), baseline - 1);
    }

    #[test]
    fn apply_pressure_respects_deadband() {
        let mut registry = TaskProfileRegistry::new();
        registry.register_task(Box::new(SimpleTaskProfile::new("a", "post", 0, 4)));
        assert_eq!(registry.apply_pressure(0.92, 0.9), 0);
        assert_eq!(registry.apply_pressure(0.97, 0.9), 1);
    }

    #[test]
    fn save_clear_load_round_trips_calibrated_profiles() {
        let mut registry = TaskProfileRegistry::new();
        let mut shadow = SimpleTaskProfile::new("shadow", "shadow", 0, 4).with_priority(10);
        shadow.record_measurement(2_000_000);
        shadow.decrease();
        registry.register_task(Box::new(shadow));

        let saved = registry.save_state();

        let mut reloaded = TaskProfileRegistry::new();
        let restored = reloaded.load_state(&saved);
        assert_eq!(restored, 1);
        assert_eq!(
            reloaded.profile("shadow").unwrap().work_units(),
            registry.profile("shadow").unwrap().work_units()
        );
        assert_eq!(
            reloaded.profile("shadow").unwrap().is_calibrated(),
            registry.profile("shadow").unwrap().is_calibrated()
        );
    }

    #[test]
    fn load_state_skips_unknown_profile_type() {
        let mut registry = TaskProfileRegistry::new();
        let bogus = serde_json::json!({
            "version": 1,
            "profiles": [{ "typeName": "NotARealProfile", "data": {} }]
        });
        assert_eq!(registry.load_state(&bogus), 0);
    }
}
