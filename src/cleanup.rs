//! Cleanup stack and deferred destruction (C12). Grounded on
//! `original_source`'s `RenderGraph.h` (`CleanupStack`,
//! `DeferredDestructionQueue` members, `RegisterExternalCleanup`,
//! `GetDeferredDestructionQueue`) — the dependency-ordered teardown path and
//! the zero-stutter hot-reload destruction queue.

use std::collections::HashMap;

use crate::error::{GraphError, GraphResult};
use crate::resource::GpuHandle;

type CleanupCallback = Box<dyn FnOnce() + Send>;

struct CleanupEntry {
    name: String,
    callback: Option<CleanupCallback>,
    /// Names that must run their cleanup *after* this entry (§4.9
    /// "external cleanup runs before its dependency node's cleanup").
    runs_before: Vec<String>,
}

/// Dependency-ordered registry of cleanup callbacks. Nodes register their
/// own teardown during Compile; external systems (capture tooling,
/// benchmarking harnesses) register callbacks that must run before a named
/// node's cleanup, via `register_external` (§4.9).
#[derive(Default)]
pub struct CleanupStack {
    entries: Vec<CleanupEntry>,
    index_of: HashMap<String, usize>,
}

impl CleanupStack {
    pub fn new() -> Self {
        CleanupStack::default()
    }

    /// Registers `name`'s own cleanup callback. If `name` already has one
    /// registered (e.g. re-Compile), it is replaced.
    pub fn register(&mut self, name: impl Into<String>, callback: impl FnOnce() + Send + 'static) {
        let name = name.into();
        if let Some(&idx) = self.index_of.get(&name) {
            self.entries[idx].callback = Some(Box::new(callback));
            return;
        }
        let idx = self.entries.len();
        self.entries.push(CleanupEntry {
            name: name.clone(),
            callback: Some(Box::new(callback)),
            runs_before: Vec::new(),
        });
        self.index_of.insert(name, idx);
    }

    /// Registers an external callback that must execute before
    /// `dependency_node_name`'s own cleanup runs (§4.9
    /// "RegisterExternalCleanup"). `external_system_name` only labels the
    /// entry for diagnostics.
    pub fn register_external(
        &mut self,
        dependency_node_name: impl Into<String>,
        external_system_name: impl Into<String>,
        callback: impl FnOnce() + Send + 'static,
    ) {
        let dependency_node_name = dependency_node_name.into();
        let external_name = format!("external:{}->{}", external_system_name.into(), dependency_node_name);

        let idx = self.entries.len();
        self.entries.push(CleanupEntry {
            name: external_name.clone(),
            callback: Some(Box::new(callback)),
            runs_before: vec![dependency_node_name],
        });
        self.index_of.insert(external_name, idx);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.index_of.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Runs every registered callback exactly once, respecting
    /// `runs_before` edges via a stable topological order (insertion order
    /// breaks ties, mirroring the original's deterministic teardown).
    pub fn execute_all(&mut self) -> GraphResult<()> {
        let order = self.topological_order()?;
        for idx in order {
            if let Some(callback) = self.entries[idx].callback.take() {
                callback();
            }
        }
        self.entries.clear();
        self.index_of.clear();
        Ok(())
    }

    fn topological_order(&self) -> GraphResult<Vec<usize>> {
        let n = self.entries.len();
        let mut in_degree = vec![0u32; n];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (idx, entry) in self.entries.iter().enumerate() {
            for before in &entry.runs_before {
                if let Some(&target) = self.index_of.get(before) {
                    successors[idx].push(target);
                    in_degree[target] += 1;
                }
            }
        }

        let mut queue: std::collections::VecDeque<usize> =
            (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &succ in &successors[idx] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    queue.push_back(succ);
                }
            }
        }

        if order.len() != n {
            return Err(GraphError::ResourceExhaustion(
                "cleanup stack has a dependency cycle".into(),
            ));
        }
        Ok(order)
    }
}

type DestroyFn = Box<dyn FnOnce(GpuHandle) + Send>;

struct DeferredEntry {
    handle: GpuHandle,
    frame_queued: u64,
    destroy: DestroyFn,
}

/// Zero-stutter hot-reload destruction queue: instead of blocking on device
/// idle, a replaced GPU resource is queued here and actually destroyed once
/// `frame_margin` frames have passed, by which point no in-flight command
/// buffer can still reference it (§4.9, §6 "deferred destruction").
#[derive(Default)]
pub struct DeferredDestructionQueue {
    entries: Vec<DeferredEntry>,
}

impl DeferredDestructionQueue {
    pub fn new() -> Self {
        DeferredDestructionQueue::default()
    }

    pub fn add(
        &mut self,
        handle: GpuHandle,
        frame_queued: u64,
        destroy: impl FnOnce(GpuHandle) + Send + 'static,
    ) {
        self.entries.push(DeferredEntry {
            handle,
            frame_queued,
            destroy: Box::new(destroy),
        });
    }

    /// Destroys every entry whose `frame_queued + frame_margin <=
    /// current_frame`, returning the handles actually destroyed.
    pub fn process(&mut self, current_frame: u64, frame_margin: u64) -> Vec<GpuHandle> {
        let mut destroyed = Vec::new();
        let mut remaining = Vec::new();
        for entry in self.entries.drain(..) {
            if entry.frame_queued + frame_margin <= current_frame {
                destroyed.push(entry.handle);
                (entry.destroy)(entry.handle);
            } else {
                remaining.push(entry);
            }
        }
        self.entries = remaining;
        destroyed
    }

    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn cleanup_runs_every_registered_entry() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        let o1 = order.clone();
        stack.register("a", move || o1.lock().unwrap().push("a"));
        let o2 = order.clone();
        stack.register("b", move || o2.lock().unwrap().push("b"));
        stack.execute_all().unwrap();
        let recorded = order.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert!(recorded.contains(&"a"));
        assert!(recorded.contains(&"b"));
    }

    #[test]
    fn external_cleanup_runs_before_its_dependency() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = CleanupStack::new();
        let o1 = order.clone();
        stack.register("device", move || o1.lock().unwrap().push("device"));
        let o2 = order.clone();
        stack.register_external("device", "FrameCapture", move || o2.lock().unwrap().push("capture"));
        stack.execute_all().unwrap();
        let recorded = order.lock().unwrap();
        let capture_pos = recorded.iter().position(|&x| x == "capture").unwrap();
        let device_pos = recorded.iter().position(|&x| x == "device").unwrap();
        assert!(capture_pos < device_pos);
    }

    #[test]
    fn deferred_destruction_waits_for_margin() {
        let mut queue = DeferredDestructionQueue::new();
        let destroyed_count = Arc::new(AtomicUsize::new(0));
        let counter = destroyed_count.clone();
        queue.add(GpuHandle::Buffer(1), 10, move |_h| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let destroyed = queue.process(11, 3);
        assert!(destroyed.is_empty());
        assert_eq!(queue.pending_count(), 1);

        let destroyed = queue.process(13, 3);
        assert_eq!(destroyed.len(), 1);
        assert_eq!(destroyed_count.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_count(), 0);
    }
}
