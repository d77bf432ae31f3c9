//! Bind a collector, a function and a consumer into one computation.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::debug;

use super::{ChunkCollector, ChunkConsumer};
use crate::chunk::DataChunk;
use crate::chunking::ChunkPosition;
use crate::Result;

/// A many-to-one transform applied per position.
///
/// Implementations must be callable from multiple threads. Returning
/// `Ok(None)` means "no output at this position"; the consumer is not
/// called in that case.
pub trait ChunkFunction: Send + Sync {
    fn apply(
        &self,
        pos: &ChunkPosition,
        inputs: &[Option<DataChunk>],
    ) -> Result<Option<DataChunk>>;

    /// Best-effort upper bound in bytes for temporary buffers beyond
    /// the input and output chunk buffers themselves.
    fn memory(&self, pos: &ChunkPosition, input_count: usize) -> usize;
}

/// Wall-clock accumulated per computation step while tracking.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepTimes {
    pub collector: Duration,
    pub function: Duration,
    pub consumer: Duration,
}

/// One collector, one function, one consumer.
///
/// `perform` runs the three steps strictly in order at a position;
/// positions themselves carry no ordering guarantees when run in
/// parallel.
pub struct ChunkComputation {
    collector: ChunkCollector,
    consumer: Arc<dyn ChunkConsumer>,
    function: Arc<dyn ChunkFunction>,
    tracking: Option<Mutex<StepTimes>>,
}

impl ChunkComputation {
    pub fn new(
        collector: ChunkCollector,
        consumer: Arc<dyn ChunkConsumer>,
        function: Arc<dyn ChunkFunction>,
    ) -> Self {
        Self {
            collector,
            consumer,
            function,
            tracking: None,
        }
    }

    /// Accumulate per-step wall-clock times over all `perform` calls.
    pub fn tracked(mut self) -> Self {
        self.tracking = Some(Mutex::new(StepTimes::default()));
        self
    }

    pub fn collector(&self) -> &ChunkCollector {
        &self.collector
    }

    pub fn consumer(&self) -> &Arc<dyn ChunkConsumer> {
        &self.consumer
    }

    /// The accumulated step times, if tracking is on.
    pub fn step_times(&self) -> Option<StepTimes> {
        self.tracking.as_ref().map(|t| *t.lock().unwrap())
    }

    /// Collect the inputs at `pos`, apply the function and push any
    /// result to the consumer.
    pub fn perform(&self, pos: &ChunkPosition) -> Result<()> {
        let started = Instant::now();
        let chunks = self.collector.get_chunks(pos)?;
        let collected = started.elapsed();

        let inputs: Vec<Option<DataChunk>> = chunks.into_iter().map(Some).collect();
        let started = Instant::now();
        let result = self.function.apply(pos, &inputs)?;
        let applied = started.elapsed();

        let started = Instant::now();
        if let Some(chunk) = result {
            self.consumer.put_chunk(pos, chunk)?;
        }
        let consumed = started.elapsed();

        if let Some(tracking) = &self.tracking {
            let mut times = tracking.lock().unwrap();
            times.collector += collected;
            times.function += applied;
            times.consumer += consumed;
            debug!(
                "operation at {:?}: collect {collected:?}, apply {applied:?}, put {consumed:?}",
                pos.start
            );
        }
        Ok(())
    }

    /// A-priori estimate of the bytes one `perform` call needs: input
    /// chunks at the position plus one native chunk per producer, the
    /// output chunk, and the function's own temporaries.
    pub fn memory(&self, pos: &ChunkPosition) -> usize {
        let mut total = 0;
        for producer in self.collector.producers() {
            let bytes = producer.prototype_chunk().value_bytes();
            let native = producer
                .native_scheme()
                .map_or(pos.values(), |s| s.chunk_size().iter().product());
            total += bytes * (pos.values() + native);
        }
        total += self.consumer.prototype_chunk().value_bytes() * pos.values();
        total + self.function.memory(pos, self.collector.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ByteChunk, DataChunk, PrimitiveBuffer};
    use crate::chunking::ChunkingScheme;
    use crate::flow::{check_compatible, ChunkProducer};
    use std::collections::HashMap;

    struct FillProducer {
        prototype: DataChunk,
        value: i8,
    }

    impl ChunkProducer for FillProducer {
        fn external_type(&self) -> crate::chunk::ExternalType {
            self.prototype.external_type()
        }

        fn native_scheme(&self) -> Option<&ChunkingScheme> {
            None
        }

        fn prototype_chunk(&self) -> &DataChunk {
            &self.prototype
        }

        fn get_chunk(&self, pos: &ChunkPosition) -> Result<DataChunk> {
            self.prototype
                .with_data(PrimitiveBuffer::Byte(vec![self.value; pos.values()]))
        }
    }

    struct RecordingConsumer {
        prototype: DataChunk,
        seen: Mutex<HashMap<Vec<usize>, DataChunk>>,
    }

    impl RecordingConsumer {
        fn byte() -> Self {
            Self {
                prototype: DataChunk::Byte(ByteChunk::new(Vec::new(), None, None, false)),
                seen: Mutex::new(HashMap::new()),
            }
        }
    }

    impl ChunkConsumer for RecordingConsumer {
        fn native_scheme(&self) -> Option<&ChunkingScheme> {
            None
        }

        fn prototype_chunk(&self) -> &DataChunk {
            &self.prototype
        }

        fn put_chunk(&self, pos: &ChunkPosition, chunk: DataChunk) -> Result<()> {
            check_compatible(&self.prototype, &chunk)?;
            self.seen.lock().unwrap().insert(pos.start.clone(), chunk);
            Ok(())
        }
    }

    /// Sums byte inputs element-wise; odd row starts produce nothing.
    struct SumOrSkip;

    impl ChunkFunction for SumOrSkip {
        fn apply(
            &self,
            pos: &ChunkPosition,
            inputs: &[Option<DataChunk>],
        ) -> Result<Option<DataChunk>> {
            if pos.start[0] % 2 == 1 {
                return Ok(None);
            }
            let mut out = vec![0_i8; pos.values()];
            for input in inputs.iter().flatten() {
                if let DataChunk::Byte(c) = input {
                    for (o, v) in out.iter_mut().zip(c.data()) {
                        *o += v;
                    }
                }
            }
            Ok(Some(DataChunk::Byte(ByteChunk::new(out, None, None, false))))
        }

        fn memory(&self, pos: &ChunkPosition, _input_count: usize) -> usize {
            pos.values()
        }
    }

    fn computation(consumer: Arc<RecordingConsumer>) -> ChunkComputation {
        let collector = ChunkCollector::new(vec![
            Arc::new(FillProducer {
                prototype: DataChunk::Byte(ByteChunk::new(Vec::new(), None, None, false)),
                value: 2,
            }),
            Arc::new(FillProducer {
                prototype: DataChunk::Byte(ByteChunk::new(Vec::new(), None, None, false)),
                value: 3,
            }),
        ]);
        ChunkComputation::new(collector, consumer, Arc::new(SumOrSkip))
    }

    #[test]
    fn perform_runs_collect_apply_put() {
        let consumer = Arc::new(RecordingConsumer::byte());
        let comp = computation(Arc::clone(&consumer)).tracked();
        let pos = ChunkPosition::new(vec![0, 0], vec![2, 3]);
        comp.perform(&pos).unwrap();

        let seen = consumer.seen.lock().unwrap();
        match seen.get(&vec![0, 0]).unwrap() {
            DataChunk::Byte(c) => assert_eq!(c.data(), &[5; 6]),
            _ => unreachable!(),
        }
        assert!(comp.step_times().is_some());
    }

    #[test]
    fn a_none_result_skips_the_consumer() {
        let consumer = Arc::new(RecordingConsumer::byte());
        let comp = computation(Arc::clone(&consumer));
        comp.perform(&ChunkPosition::new(vec![1, 0], vec![2, 3]))
            .unwrap();
        assert!(consumer.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn memory_counts_inputs_output_and_function() {
        let consumer = Arc::new(RecordingConsumer::byte());
        let comp = computation(consumer);
        let pos = ChunkPosition::new(vec![0, 0], vec![4, 4]);
        // Two byte producers without native schemes: 2 * (16 + 16),
        // one byte output: 16, function temporaries: 16.
        assert_eq!(comp.memory(&pos), 2 * 32 + 16 + 16);
    }
}
