//! Parallel graph executor (C9). Grounded on `original_source`'s
//! `TBBGraphExecutor.{h,cpp}`, translated from Intel TBB's `flow_graph` to
//! the teacher's parallelism crate, `rayon`: each wave from `WaveScheduler`
//! becomes one `rayon::scope` fan-out, with a barrier between waves taking
//! the place of TBB's native dependency edges (§4.6, §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::node::NodeHandle;
use crate::schedule::wave::ExecutionWave;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Fan out every wave across the rayon pool (default).
    Parallel,
    /// Run every node on the calling thread, in wave order; for debugging.
    Sequential,
    /// Like `Parallel`, but capped to `max_concurrency` via a rayon
    /// thread-pool scoped to this executor.
    Limited,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    pub mode: ExecutionMode,
    /// Only consulted when `mode == Limited`; 0 behaves like `Parallel`.
    pub max_concurrency: usize,
    /// If true, a panicking node's error is collected instead of
    /// unwinding the whole `execute` call.
    pub capture_errors: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            mode: ExecutionMode::Parallel,
            max_concurrency: 0,
            capture_errors: true,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutorStats {
    pub node_count: usize,
    pub wave_count: usize,
    pub executions_completed: u64,
    pub errors: u64,
    pub last_execution_ms: f64,
    pub avg_execution_ms: f64,
    pub execute_count: u64,
}

/// One node's execution failed; carries the handle so the caller can map it
/// back to `instance_name` for diagnostics.
pub struct NodeExecutionError {
    pub node: NodeHandle,
    pub message: String,
}

/// Runs a sequence of execution waves, executing every node in a wave
/// concurrently and waiting on the whole wave (a barrier) before starting
/// the next (§4.6 "barrier between waves").
pub struct GraphExecutor {
    config: ExecutorConfig,
    pool: Option<rayon::ThreadPool>,
    executions_completed: AtomicU64,
    errors: AtomicU64,
    execute_count: AtomicU64,
    total_execution_ms: AtomicU64,
    last_execution_ms: f64,
}

impl GraphExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let pool = if matches!(config.mode, ExecutionMode::Limited) && config.max_concurrency > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(config.max_concurrency)
                .build()
                .ok()
        } else {
            None
        };
        GraphExecutor {
            config,
            pool,
            executions_completed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            execute_count: AtomicU64::new(0),
            total_execution_ms: AtomicU64::new(0),
            last_execution_ms: 0.0,
        }
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.config.mode = mode;
    }

    pub fn mode(&self) -> ExecutionMode {
        self.config.mode
    }

    /// Runs `run_node` for every node across every wave, in wave order,
    /// collecting per-node errors rather than propagating the first one
    /// (`TBBGraphExecutor::ExecuteCollectErrors`). Nodes within a wave have
    /// no declared conflict or dependency (guaranteed by `WaveScheduler`),
    /// so `run_node` may be called concurrently for distinct nodes.
    pub fn execute<F>(&mut self, waves: &[ExecutionWave], run_node: F) -> Vec<NodeExecutionError>
    where
        F: Fn(NodeHandle) -> Result<(), String> + Sync,
    {
        let start = Instant::now();
        let mut errors = Vec::new();

        for wave in waves {
            let wave_errors = self.execute_wave(wave, &run_node);
            errors.extend(wave_errors);
        }

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.last_execution_ms = elapsed_ms;
        self.executions_completed.fetch_add(
            waves.iter().map(ExecutionWave::len).sum::<usize>() as u64,
            Ordering::Relaxed,
        );
        self.errors.fetch_add(errors.len() as u64, Ordering::Relaxed);
        self.execute_count.fetch_add(1, Ordering::Relaxed);
        self.total_execution_ms
            .fetch_add(elapsed_ms.to_bits(), Ordering::Relaxed);

        errors
    }

    fn execute_wave<F>(&self, wave: &ExecutionWave, run_node: &F) -> Vec<NodeExecutionError>
    where
        F: Fn(NodeHandle) -> Result<(), String> + Sync,
    {
        match self.config.mode {
            ExecutionMode::Sequential => wave
                .nodes
                .iter()
                .filter_map(|&node| run_node(node).err().map(|message| NodeExecutionError { node, message }))
                .collect(),
            ExecutionMode::Parallel => self.run_parallel(wave, run_node, None),
            ExecutionMode::Limited => self.run_parallel(wave, run_node, self.pool.as_ref()),
        }
    }

    fn run_parallel<F>(
        &self,
        wave: &ExecutionWave,
        run_node: &F,
        pool: Option<&rayon::ThreadPool>,
    ) -> Vec<NodeExecutionError>
    where
        F: Fn(NodeHandle) -> Result<(), String> + Sync,
    {
        use rayon::prelude::*;
        let collect = || -> Vec<NodeExecutionError> {
            wave.nodes
                .par_iter()
                .filter_map(|&node| run_node(node).err().map(|message| NodeExecutionError { node, message }))
                .collect()
        };
        match pool {
            Some(pool) => pool.install(collect),
            None => collect(),
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let execute_count = self.execute_count.load(Ordering::Relaxed);
        let total_ms = f64::from_bits(self.total_execution_ms.load(Ordering::Relaxed));
        ExecutorStats {
            node_count: 0,
            wave_count: 0,
            executions_completed: self.executions_completed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_execution_ms: self.last_execution_ms,
            avg_execution_ms: if execute_count == 0 {
                0.0
            } else {
                total_ms / execute_count as f64
            },
            execute_count,
        }
    }

    pub fn reset_stats(&mut self) {
        self.executions_completed.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.execute_count.store(0, Ordering::Relaxed);
        self.total_execution_ms.store(0, Ordering::Relaxed);
        self.last_execution_ms = 0.0;
    }
}

impl Default for GraphExecutor {
    fn default() -> Self {
        GraphExecutor::new(ExecutorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;
    use std::sync::atomic::AtomicUsize;

    fn handles(n: usize) -> Vec<NodeHandle> {
        let mut sm: SlotMap<NodeHandle, ()> = SlotMap::with_key();
        (0..n).map(|_| sm.insert(())).collect()
    }

    #[test]
    fn sequential_mode_runs_every_node() {
        let h = handles(4);
        let wave = ExecutionWave {
            wave_index: 0,
            nodes: h.clone(),
        };
        let count = AtomicUsize::new(0);
        let mut executor = GraphExecutor::new(ExecutorConfig {
            mode: ExecutionMode::Sequential,
            ..Default::default()
        });
        let errors = executor.execute(&[wave], |_node| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(errors.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 4);
        assert_eq!(executor.stats().executions_completed, 4);
    }

    #[test]
    fn parallel_mode_collects_errors_without_aborting() {
        let h = handles(3);
        let wave = ExecutionWave {
            wave_index: 0,
            nodes: h.clone(),
        };
        let failing = h[1];
        let mut executor = GraphExecutor::default();
        let errors = executor.execute(&[wave], move |node| {
            if node == failing {
                Err("boom".into())
            } else {
                Ok(())
            }
        });
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].node, failing);
    }

    #[test]
    fn waves_execute_as_barriers_in_order() {
        let h = handles(2);
        let wave0 = ExecutionWave {
            wave_index: 0,
            nodes: vec![h[0]],
        };
        let wave1 = ExecutionWave {
            wave_index: 1,
            nodes: vec![h[1]],
        };
        let order = std::sync::Mutex::new(Vec::new());
        let mut executor = GraphExecutor::new(ExecutorConfig {
            mode: ExecutionMode::Sequential,
            ..Default::default()
        });
        let errors = executor.execute(&[wave0, wave1], |node| {
            order.lock().unwrap().push(node);
            Ok(())
        });
        assert!(errors.is_empty());
        assert_eq!(*order.lock().unwrap(), vec![h[0], h[1]]);
    }
}
