//! Pull, push and fan-in adapters over chunks.

pub mod computation;
pub mod grid;

pub use computation::{ChunkComputation, ChunkFunction, StepTimes};

use std::sync::Arc;

use crate::chunk::{DataChunk, ExternalType};
use crate::chunking::{ChunkPosition, ChunkingScheme};
use crate::{RasterFlowError, Result};

/// Pulls chunks from a source.
///
/// Implementations are safe to call from multiple threads; a chunk
/// returned here is owned by the calling operation.
pub trait ChunkProducer: Send + Sync {
    /// The external type of the chunks this producer returns.
    fn external_type(&self) -> ExternalType;

    /// The tiling this producer reads most efficiently, if any.
    fn native_scheme(&self) -> Option<&ChunkingScheme>;

    /// Zero-length chunk carrying the metadata of produced chunks.
    fn prototype_chunk(&self) -> &DataChunk;

    /// Read the chunk covering `pos`.
    fn get_chunk(&self, pos: &ChunkPosition) -> Result<DataChunk>;
}

/// Pushes chunks into a sink.
///
/// Implementations are safe to call from multiple threads and reject
/// chunks incompatible with their prototype.
pub trait ChunkConsumer: Send + Sync {
    fn native_scheme(&self) -> Option<&ChunkingScheme>;

    fn prototype_chunk(&self) -> &DataChunk;

    fn put_chunk(&self, pos: &ChunkPosition, chunk: DataChunk) -> Result<()>;
}

/// Reject chunks whose metadata does not match `prototype`.
pub fn check_compatible(prototype: &DataChunk, chunk: &DataChunk) -> Result<()> {
    if prototype.is_compatible(chunk) {
        Ok(())
    } else {
        Err(RasterFlowError::IncompatibleChunk(format!(
            "expected external type {:?}, found {:?}",
            prototype.external_type(),
            chunk.external_type()
        )))
    }
}

/// Fans in chunks from an ordered list of producers.
///
/// The order of producers is part of the contract: functions bind
/// their inputs positionally to the collected list.
pub struct ChunkCollector {
    producers: Vec<Arc<dyn ChunkProducer>>,
}

impl ChunkCollector {
    pub fn new(producers: Vec<Arc<dyn ChunkProducer>>) -> Self {
        Self { producers }
    }

    pub fn producers(&self) -> &[Arc<dyn ChunkProducer>] {
        &self.producers
    }

    pub fn len(&self) -> usize {
        self.producers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// One chunk per producer, in producer order.
    pub fn get_chunks(&self, pos: &ChunkPosition) -> Result<Vec<DataChunk>> {
        self.producers.iter().map(|p| p.get_chunk(pos)).collect()
    }

    /// The least-common-multiple tiling of the producers' native
    /// schemes, or `None` when no producer declares one.
    pub fn common_scheme(&self) -> Result<Option<ChunkingScheme>> {
        let mut merged: Option<ChunkingScheme> = None;
        for producer in &self.producers {
            if let Some(scheme) = producer.native_scheme() {
                merged = Some(match merged {
                    None => scheme.clone(),
                    Some(m) => m.common_with(scheme)?,
                });
            }
        }
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ByteChunk, PrimitiveBuffer};

    /// Producer returning a constant-valued chunk, for wiring tests.
    pub(crate) struct ConstProducer {
        pub scheme: Option<ChunkingScheme>,
        pub prototype: DataChunk,
        pub value: i8,
    }

    impl ConstProducer {
        pub fn byte(value: i8, scheme: Option<ChunkingScheme>) -> Self {
            Self {
                scheme,
                prototype: DataChunk::Byte(ByteChunk::new(Vec::new(), None, None, false)),
                value,
            }
        }
    }

    impl ChunkProducer for ConstProducer {
        fn external_type(&self) -> ExternalType {
            self.prototype.external_type()
        }

        fn native_scheme(&self) -> Option<&ChunkingScheme> {
            self.scheme.as_ref()
        }

        fn prototype_chunk(&self) -> &DataChunk {
            &self.prototype
        }

        fn get_chunk(&self, pos: &ChunkPosition) -> Result<DataChunk> {
            self.prototype
                .with_data(PrimitiveBuffer::Byte(vec![self.value; pos.values()]))
        }
    }

    #[test]
    fn collected_chunks_keep_producer_order() {
        let collector = ChunkCollector::new(vec![
            Arc::new(ConstProducer::byte(1, None)),
            Arc::new(ConstProducer::byte(2, None)),
            Arc::new(ConstProducer::byte(3, None)),
        ]);
        let pos = ChunkPosition::new(vec![0, 0], vec![2, 2]);
        let chunks = collector.get_chunks(&pos).unwrap();
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            match chunk {
                DataChunk::Byte(c) => assert_eq!(c.data(), &[i as i8 + 1; 4]),
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn native_schemes_merge_across_producers() {
        let a = ChunkingScheme::new(vec![12, 12], vec![4, 4]).unwrap();
        let b = ChunkingScheme::new(vec![12, 12], vec![6, 4]).unwrap();
        let collector = ChunkCollector::new(vec![
            Arc::new(ConstProducer::byte(0, Some(a))),
            Arc::new(ConstProducer::byte(0, Some(b))),
            Arc::new(ConstProducer::byte(0, None)),
        ]);
        let merged = collector.common_scheme().unwrap().unwrap();
        assert_eq!(merged.chunk_size(), &[12, 4]);
    }

    #[test]
    fn incompatible_chunks_are_rejected() {
        let prototype = DataChunk::Byte(ByteChunk::new(Vec::new(), Some(0), None, false));
        let chunk = DataChunk::Byte(ByteChunk::new(vec![1], None, None, false));
        assert!(check_compatible(&prototype, &chunk).is_err());
        assert!(check_compatible(&prototype, &prototype.blank_copy_with_values(4)).is_ok());
    }
}
