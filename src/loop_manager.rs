//! Loop manager (SUPPLEMENT). §4.10's per-frame step 7 ("advance loop
//! manager; determine per-loop `should_execute_this_frame`") and §9's open
//! question define the semantics this implements: a node executes this
//! frame iff it has no loop connections, or at least one connected loop is
//! active. Fixed-timestep/catch-up accumulation is left to the embedder.

use std::collections::HashMap;

use crate::node::{LoopId, LoopReference};

/// One named, independently toggleable execution gate (e.g. "physics",
/// paused while the embedder is debugging a frame).
#[derive(Debug, Clone)]
struct LoopState {
    name: String,
    active: bool,
}

#[derive(Default)]
pub struct LoopManager {
    loops: HashMap<LoopId, LoopState>,
    next_id: u32,
}

impl LoopManager {
    pub fn new() -> Self {
        LoopManager::default()
    }

    /// Registers a new loop, active by default, returning its id.
    pub fn create_loop(&mut self, name: impl Into<String>) -> LoopId {
        let id = LoopId(self.next_id);
        self.next_id += 1;
        self.loops.insert(
            id,
            LoopState {
                name: name.into(),
                active: true,
            },
        );
        id
    }

    pub fn remove_loop(&mut self, loop_id: LoopId) {
        self.loops.remove(&loop_id);
    }

    pub fn is_registered(&self, loop_id: LoopId) -> bool {
        self.loops.contains_key(&loop_id)
    }

    pub fn loop_name(&self, loop_id: LoopId) -> Option<&str> {
        self.loops.get(&loop_id).map(|l| l.name.as_str())
    }

    pub fn set_active(&mut self, loop_id: LoopId, active: bool) {
        if let Some(state) = self.loops.get_mut(&loop_id) {
            state.active = active;
        }
    }

    pub fn is_active(&self, loop_id: LoopId) -> bool {
        self.loops.get(&loop_id).map(|l| l.active).unwrap_or(false)
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    pub fn active_loop_count(&self) -> usize {
        self.loops.values().filter(|l| l.active).count()
    }

    /// A node executes this frame iff it references no loop, or at least
    /// one of its referenced loops is active (§9 open question).
    pub fn should_execute_this_frame(&self, loop_refs: &[LoopReference]) -> bool {
        loop_refs.is_empty() || loop_refs.iter().any(|r| self.is_active(r.loop_id))
    }

    pub fn clear(&mut self) {
        self.loops.clear();
        self.next_id = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_with_no_loop_refs_always_executes() {
        let manager = LoopManager::new();
        assert!(manager.should_execute_this_frame(&[]));
    }

    #[test]
    fn node_executes_when_any_referenced_loop_is_active() {
        let mut manager = LoopManager::new();
        let paused = manager.create_loop("physics");
        let running = manager.create_loop("render");
        manager.set_active(paused, false);

        let refs = vec![
            LoopReference { loop_id: paused },
            LoopReference { loop_id: running },
        ];
        assert!(manager.should_execute_this_frame(&refs));
    }

    #[test]
    fn node_skips_when_all_referenced_loops_are_inactive() {
        let mut manager = LoopManager::new();
        let paused = manager.create_loop("physics");
        manager.set_active(paused, false);

        let refs = vec![LoopReference { loop_id: paused }];
        assert!(!manager.should_execute_this_frame(&refs));
    }

    #[test]
    fn toggling_activity_is_observable() {
        let mut manager = LoopManager::new();
        let id = manager.create_loop("ui");
        assert!(manager.is_active(id));
        manager.set_active(id, false);
        assert!(!manager.is_active(id));
        assert_eq!(manager.active_loop_count(), 0);
    }
}
