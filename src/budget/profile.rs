//! Task calibration profiles (C10). Grounded on `original_source`'s
//! `ITaskProfile.h` (the polymorphic interface) and the `SimpleTaskProfile`
//! / `ResolutionTaskProfile` implementations it names.

use serde::{Deserialize, Serialize};

/// A node's adjustable-quality unit of work: a shadow map resolution level,
/// a particle count tier, an SSAO sample count, etc. `work_units` is the
/// adjustable dial; `priority` decides who gets cut first under pressure
/// (lower priority is decreased first, higher priority is increased first)
/// (§4.8, `ITaskProfile.h`).
pub trait TaskProfile: Send + Sync {
    fn task_id(&self) -> &str;
    fn category(&self) -> &str;
    fn type_name(&self) -> &'static str;

    fn priority(&self) -> u8;
    fn set_priority(&mut self, priority: u8);

    fn work_units(&self) -> i32;
    fn can_increase(&self) -> bool;
    fn can_decrease(&self) -> bool;
    fn increase(&mut self);
    fn decrease(&mut self);

    /// Records one measured execution duration, feeding the profile's
    /// moving-average cost estimate.
    fn record_measurement(&mut self, actual_ns: u64);
    fn estimated_cost_ns(&self) -> u64;
    fn is_calibrated(&self) -> bool;
    fn reset_calibration(&mut self);

    /// Signed distance from the profile's baseline work level, normalized
    /// to roughly `[-1, 1]` (§4.8 "`GetPressure`" — negative means reduced
    /// quality, positive means increased quality above baseline).
    fn pressure(&self) -> f32;

    fn save_state(&self) -> serde_json::Value;
    fn load_state(&mut self, value: &serde_json::Value);
}

/// A task whose only dial is a bounded integer work-unit count, with cost
/// assumed linear in `work_units` once calibrated (§4.8 "SimpleTaskProfile").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleTaskProfile {
    task_id: String,
    category: String,
    priority: u8,
    work_units: i32,
    min_units: i32,
    max_units: i32,
    baseline_units: i32,
    #[serde(default)]
    measurements: Vec<u64>,
    #[serde(default)]
    avg_cost_ns: u64,
}

impl SimpleTaskProfile {
    pub fn new(task_id: impl Into<String>, category: impl Into<String>, min_units: i32, max_units: i32) -> Self {
        let baseline = (min_units + max_units) / 2;
        SimpleTaskProfile {
            task_id: task_id.into(),
            category: category.into(),
            priority: 128,
            work_units: baseline,
            min_units,
            max_units,
            baseline_units: baseline,
            measurements: Vec::new(),
            avg_cost_ns: 0,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    const MAX_MEASUREMENTS: usize = 32;
}

impl TaskProfile for SimpleTaskProfile {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn type_name(&self) -> &'static str {
        "SimpleTaskProfile"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    fn work_units(&self) -> i32 {
        self.work_units
    }

    fn can_increase(&self) -> bool {
        self.work_units < self.max_units
    }

    fn can_decrease(&self) -> bool {
        self.work_units > self.min_units
    }

    fn increase(&mut self) {
        if self.can_increase() {
            self.work_units += 1;
        }
    }

    fn decrease(&mut self) {
        if self.can_decrease() {
            self.work_units -= 1;
        }
    }

    fn record_measurement(&mut self, actual_ns: u64) {
        self.measurements.push(actual_ns);
        if self.measurements.len() > Self::MAX_MEASUREMENTS {
            self.measurements.remove(0);
        }
        self.avg_cost_ns = (self.measurements.iter().sum::<u64>() / self.measurements.len() as u64) as u64;
    }

    fn estimated_cost_ns(&self) -> u64 {
        self.avg_cost_ns
    }

    fn is_calibrated(&self) -> bool {
        !self.measurements.is_empty()
    }

    fn reset_calibration(&mut self) {
        self.measurements.clear();
        self.avg_cost_ns = 0;
    }

    fn pressure(&self) -> f32 {
        let span = (self.max_units - self.min_units).max(1) as f32;
        (self.work_units - self.baseline_units) as f32 / (span / 2.0)
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!({ "typeName": self.type_name(), "data": self })
    }

    fn load_state(&mut self, value: &serde_json::Value) {
        if let Some(data) = value.get("data") {
            if let Ok(restored) = serde_json::from_value::<SimpleTaskProfile>(data.clone()) {
                *self = restored;
            }
        }
    }
}

/// A task whose dial selects into a fixed table of resolutions — e.g.
/// shadow map size tiers `[512, 1024, 2048, 4096]` — rather than a linear
/// unit count (§4.8 "ResolutionTaskProfile").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionTaskProfile {
    task_id: String,
    category: String,
    priority: u8,
    resolution_table: Vec<u32>,
    current_index: usize,
    baseline_index: usize,
    #[serde(default)]
    measurements: Vec<u64>,
    #[serde(default)]
    avg_cost_ns: u64,
}

impl ResolutionTaskProfile {
    pub fn new(task_id: impl Into<String>, category: impl Into<String>, resolution_table: Vec<u32>) -> Self {
        assert!(!resolution_table.is_empty(), "resolution table must not be empty");
        let baseline_index = resolution_table.len() / 2;
        ResolutionTaskProfile {
            task_id: task_id.into(),
            category: category.into(),
            priority: 128,
            resolution_table,
            current_index: baseline_index,
            baseline_index,
            measurements: Vec::new(),
            avg_cost_ns: 0,
        }
    }

    pub fn current_resolution(&self) -> u32 {
        self.resolution_table[self.current_index]
    }

    const MAX_MEASUREMENTS: usize = 32;
}

impl TaskProfile for ResolutionTaskProfile {
    fn task_id(&self) -> &str {
        &self.task_id
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn type_name(&self) -> &'static str {
        "ResolutionTaskProfile"
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    fn work_units(&self) -> i32 {
        self.current_index as i32
    }

    fn can_increase(&self) -> bool {
        self.current_index + 1 < self.resolution_table.len()
    }

    fn can_decrease(&self) -> bool {
        self.current_index > 0
    }

    fn increase(&mut self) {
        if self.can_increase() {
            self.current_index += 1;
        }
    }

    fn decrease(&mut self) {
        if self.can_decrease() {
            self.current_index -= 1;
        }
    }

    fn record_measurement(&mut self, actual_ns: u64) {
        self.measurements.push(actual_ns);
        if self.measurements.len() > Self::MAX_MEASUREMENTS {
            self.measurements.remove(0);
        }
        self.avg_cost_ns = self.measurements.iter().sum::<u64>() / self.measurements.len() as u64;
    }

    fn estimated_cost_ns(&self) -> u64 {
        self.avg_cost_ns
    }

    fn is_calibrated(&self) -> bool {
        !self.measurements.is_empty()
    }

    fn reset_calibration(&mut self) {
        self.measurements.clear();
        self.avg_cost_ns = 0;
    }

    fn pressure(&self) -> f32 {
        let span = self.resolution_table.len().max(2) as f32 - 1.0;
        (self.current_index as f32 - self.baseline_index as f32) / (span / 2.0)
    }

    fn save_state(&self) -> serde_json::Value {
        serde_json::json!({ "typeName": self.type_name(), "data": self })
    }

    fn load_state(&mut self, value: &serde_json::Value) {
        if let Some(data) = value.get("data") {
            if let Ok(restored) = serde_json::from_value::<ResolutionTaskProfile>(data.clone()) {
                *self = restored;
            }
        }
    }
}
