//! Bounded parallel execution under a memory budget.
//!
//! The [`PoolProcessor`] dispatches per-position operations across a
//! fixed number of workers draining one FIFO queue. The
//! [`ProcessingHelper`] sits on top: it estimates the memory one
//! operation needs, shrinks the degree of parallelism until the whole
//! run fits the budget, and only then starts the pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use log::{debug, info, warn};

use crate::chunking::{ChunkPosition, ChunkingScheme};
use crate::flow::ChunkComputation;
use crate::{RasterFlowError, Result};

/// One unit of work: an operation applied at one position.
pub type ChunkOperation = dyn Fn(&ChunkPosition) -> Result<()> + Send + Sync;

/// Reserve subtracted from the memory budget for runtime overhead.
pub const DEFAULT_MEMORY_RESERVE: usize = 256 * 1024 * 1024;

struct Completion {
    active_workers: usize,
    error: Option<RasterFlowError>,
}

struct PoolState {
    queue: Mutex<VecDeque<ChunkPosition>>,
    cancelled: AtomicBool,
    completion: Mutex<Completion>,
    finished: Condvar,
}

/// A parallel executor for chunk operations.
///
/// Positions dispatch FIFO across at most `max_operations` workers; no
/// ordering holds between positions, and within one operation all work
/// is sequential.
pub struct PoolProcessor {
    max_operations: usize,
    #[cfg(feature = "use-rayon")]
    pool: rayon::ThreadPool,
    state: Arc<PoolState>,
    operation: Option<Arc<ChunkOperation>>,
}

impl PoolProcessor {
    /// A pool of at most `max_operations` concurrent operations.
    pub fn new(max_operations: usize) -> Result<Self> {
        let max_operations = max_operations.max(1);
        Ok(Self {
            max_operations,
            #[cfg(feature = "use-rayon")]
            pool: rayon::ThreadPoolBuilder::new()
                .num_threads(max_operations)
                .build()?,
            state: Arc::new(PoolState {
                queue: Mutex::new(VecDeque::new()),
                cancelled: AtomicBool::new(false),
                completion: Mutex::new(Completion {
                    active_workers: 0,
                    error: None,
                }),
                finished: Condvar::new(),
            }),
            operation: None,
        })
    }

    /// Number of CPU cores, the default degree of parallelism.
    pub fn available_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Bind the work list and the operation to run per position.
    pub fn init(&mut self, positions: Vec<ChunkPosition>, operation: Arc<ChunkOperation>) {
        *self.state.queue.lock().unwrap() = positions.into();
        self.state.cancelled.store(false, Ordering::SeqCst);
        self.state.completion.lock().unwrap().error = None;
        self.operation = Some(operation);
    }

    /// Dispatch operations across the workers; returns immediately.
    pub fn start(&self) {
        let Some(operation) = &self.operation else {
            return;
        };
        self.state.completion.lock().unwrap().active_workers = self.max_operations;
        for _ in 0..self.max_operations {
            let state = Arc::clone(&self.state);
            let operation = Arc::clone(operation);
            self.spawn(move || worker(state, operation));
        }
    }

    #[cfg(feature = "use-rayon")]
    fn spawn<F: FnOnce() + Send + 'static>(&self, work: F) {
        self.pool.spawn(work);
    }

    #[cfg(not(feature = "use-rayon"))]
    fn spawn<F: FnOnce() + Send + 'static>(&self, work: F) {
        std::thread::spawn(work);
    }

    /// Stop handing out new positions; in-flight operations finish.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        debug!("pool cancelled; in-flight operations run to completion");
    }

    /// Block until all dispatched operations end, re-raising the first
    /// operation failure. Later failures are dropped.
    pub fn wait_for_completion(&self) -> Result<()> {
        let mut completion = self.state.completion.lock().unwrap();
        while completion.active_workers > 0 {
            completion = self.state.finished.wait(completion).unwrap();
        }
        match completion.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn worker(state: Arc<PoolState>, operation: Arc<ChunkOperation>) {
    loop {
        if state.cancelled.load(Ordering::SeqCst) {
            break;
        }
        let Some(pos) = state.queue.lock().unwrap().pop_front() else {
            break;
        };
        match operation(&pos) {
            Ok(()) => debug!("operation at {:?} finished", pos.start),
            Err(err) => {
                let mut completion = state.completion.lock().unwrap();
                if completion.error.is_none() {
                    completion.error = Some(err);
                }
            }
        }
    }
    let mut completion = state.completion.lock().unwrap();
    completion.active_workers -= 1;
    if completion.active_workers == 0 {
        state.finished.notify_all();
    }
}

/// The largest degree of parallelism the memory budget allows.
fn adjusted_operations(
    mem_per_op: usize,
    max_ops: usize,
    reserve: usize,
    budget: usize,
) -> Result<usize> {
    let mem_per_op = mem_per_op.max(1);
    let needed = mem_per_op * max_ops + reserve;
    if needed <= budget {
        return Ok(max_ops);
    }
    let reduced = budget.saturating_sub(reserve) / mem_per_op;
    if reduced < 1 {
        return Err(RasterFlowError::MemoryBudgetExceeded {
            needed,
            available: budget,
        });
    }
    warn!("reducing parallel operations from {max_ops} to {reduced} to fit the memory budget");
    Ok(reduced)
}

/// Runs a computation serially or in parallel, adjusting the degree of
/// parallelism to an a-priori memory estimate.
pub struct ProcessingHelper {
    max_memory: usize,
    max_operations: usize,
    reserve: usize,
    serial: bool,
}

impl ProcessingHelper {
    /// A helper budgeted to `max_memory` bytes.
    pub fn new(max_memory: usize) -> Self {
        Self {
            max_memory,
            max_operations: PoolProcessor::available_parallelism(),
            reserve: DEFAULT_MEMORY_RESERVE,
            serial: false,
        }
    }

    pub fn with_max_operations(mut self, max_operations: usize) -> Self {
        self.max_operations = max_operations.max(1);
        self
    }

    pub fn with_reserve(mut self, reserve: usize) -> Self {
        self.reserve = reserve;
        self
    }

    /// Run every position in sequence on the calling thread.
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    /// Run `computation` over every position of `scheme`.
    pub fn run(&self, computation: Arc<ChunkComputation>, scheme: &ChunkingScheme) -> Result<()> {
        let positions: Vec<ChunkPosition> = scheme.positions().collect();
        let Some(first) = positions.first() else {
            return Ok(());
        };
        let mem_per_op = computation.memory(first);
        let inner = Arc::clone(&computation);
        self.run_with(
            positions,
            mem_per_op,
            Arc::new(move |pos: &ChunkPosition| inner.perform(pos)),
        )
    }

    /// Run an arbitrary per-position operation under the same budget
    /// logic; `mem_per_op` is the estimated bytes one operation needs.
    pub fn run_with(
        &self,
        positions: Vec<ChunkPosition>,
        mem_per_op: usize,
        operation: Arc<ChunkOperation>,
    ) -> Result<()> {
        info!(
            "estimated memory per operation: {} MiB",
            mem_per_op.div_ceil(1024 * 1024)
        );
        let requested = if self.serial { 1 } else { self.max_operations };
        let max_ops = adjusted_operations(mem_per_op, requested, self.reserve, self.max_memory)?;
        if self.serial {
            for pos in &positions {
                operation(pos)?;
            }
            return Ok(());
        }
        let mut pool = PoolProcessor::new(max_ops)?;
        pool.init(positions, operation);
        pool.start();
        pool.wait_for_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn positions(n: usize) -> Vec<ChunkPosition> {
        (0..n).map(|i| ChunkPosition::new(vec![i], vec![1])).collect()
    }

    #[test]
    fn the_pool_drains_every_position() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let mut pool = PoolProcessor::new(4).unwrap();
        pool.init(
            positions(32),
            Arc::new(move |_pos: &ChunkPosition| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        pool.start();
        pool.wait_for_completion().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn the_first_failure_is_re_raised_and_work_continues() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let mut pool = PoolProcessor::new(2).unwrap();
        pool.init(
            positions(16),
            Arc::new(move |pos: &ChunkPosition| {
                counter.fetch_add(1, Ordering::SeqCst);
                if pos.start[0] == 3 {
                    Err(RasterFlowError::TypeMismatch)
                } else {
                    Ok(())
                }
            }),
        );
        pool.start();
        assert!(matches!(
            pool.wait_for_completion(),
            Err(RasterFlowError::TypeMismatch)
        ));
        assert_eq!(ran.load(Ordering::SeqCst), 16);
    }

    #[test]
    fn cancelled_pools_stop_dispatching() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let mut pool = PoolProcessor::new(2).unwrap();
        pool.init(
            positions(64),
            Arc::new(move |_pos: &ChunkPosition| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );
        pool.cancel();
        pool.start();
        pool.wait_for_completion().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parallelism_shrinks_to_fit_the_budget() {
        assert_eq!(adjusted_operations(100, 8, 200, 1000).unwrap(), 8);
        assert_eq!(adjusted_operations(100, 10, 200, 1000).unwrap(), 8);
        assert!(matches!(
            adjusted_operations(500, 4, 800, 1000),
            Err(RasterFlowError::MemoryBudgetExceeded { .. })
        ));
        // Serial runs still have to fit one operation.
        assert!(adjusted_operations(500, 1, 800, 1000).is_err());
    }

    mod pipeline {
        use super::*;
        use crate::chunk::{DataChunk, PrimitiveValue};
        use crate::flow::grid::{Grid, GridConsumer, GridProducer, MemoryGrid};
        use crate::flow::{ChunkCollector, ChunkComputation, ChunkFunction, ChunkProducer};
        use ndarray::Array2;

        struct PassThrough;

        impl ChunkFunction for PassThrough {
            fn apply(
                &self,
                _pos: &ChunkPosition,
                inputs: &[Option<DataChunk>],
            ) -> Result<Option<DataChunk>> {
                Ok(inputs.first().and_then(|c| c.clone()))
            }

            fn memory(&self, _pos: &ChunkPosition, _input_count: usize) -> usize {
                0
            }
        }

        fn pipeline() -> (Arc<MemoryGrid>, Arc<ChunkComputation>, ChunkingScheme) {
            let mut values = Array2::zeros((6, 6));
            for (i, v) in values.iter_mut().enumerate() {
                *v = i as i32;
            }
            let source = Arc::new(
                MemoryGrid::int(values)
                    .with_tile_size([2, 3])
                    .with_missing(PrimitiveValue::Int(-1)),
            );
            let dest = Arc::new(
                MemoryGrid::int(Array2::zeros((6, 6)))
                    .with_tile_size([2, 3])
                    .with_missing(PrimitiveValue::Int(-1)),
            );
            let producer = Arc::new(GridProducer::new(Arc::clone(&source)).unwrap());
            let scheme = producer.native_scheme().unwrap().clone();
            let computation = Arc::new(ChunkComputation::new(
                ChunkCollector::new(vec![producer]),
                Arc::new(GridConsumer::new(Arc::clone(&dest)).unwrap()),
                Arc::new(PassThrough),
            ));
            (dest, computation, scheme)
        }

        #[test]
        fn a_whole_grid_flows_through_the_pool() {
            let (dest, computation, scheme) = pipeline();
            ProcessingHelper::new(64 * 1024 * 1024)
                .with_reserve(0)
                .with_max_operations(4)
                .run(computation, &scheme)
                .unwrap();
            let out = dest.get_data([0, 0], [6, 6]).unwrap();
            match out {
                crate::chunk::PrimitiveBuffer::Int(values) => {
                    assert_eq!(values, (0..36).collect::<Vec<i32>>());
                }
                _ => unreachable!(),
            }
        }

        #[test]
        fn an_unfittable_budget_fails_up_front() {
            let (_dest, computation, scheme) = pipeline();
            let err = ProcessingHelper::new(8)
                .with_reserve(0)
                .run(computation, &scheme);
            assert!(matches!(
                err,
                Err(RasterFlowError::MemoryBudgetExceeded { .. })
            ));
        }
    }
}
