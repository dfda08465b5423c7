//! Adaptive quality / frame-budget feedback (C10): task calibration
//! profiles, the priority-ordered registry that adjusts them under
//! pressure, and the frame capacity tracker that drives that pressure from
//! measured frame time.

pub mod capacity;
pub mod profile;
pub mod registry;

pub use capacity::CapacityTracker;
pub use profile::{ResolutionTaskProfile, SimpleTaskProfile, TaskProfile};
pub use registry::TaskProfileRegistry;
