//! Library to process tiled numeric rasters in memory-efficient chunks.
//!
//! The engine moves data as typed [chunks](chunk::DataChunk) pulled from
//! [producers](flow::ChunkProducer), transformed by many-to-one
//! [functions](flow::ChunkFunction) and pushed to
//! [consumers](flow::ChunkConsumer), one
//! [position](chunking::ChunkPosition) of a
//! [chunking scheme](chunking::ChunkingScheme) at a time. The
//! [pool](pool::PoolProcessor) runs positions in parallel under an explicit
//! memory budget.

pub mod chunk;
pub mod chunking;
pub mod composite;
pub mod expr;
pub mod flow;
pub mod pool;
pub mod resample;

#[derive(thiserror::Error, std::fmt::Debug)]
pub enum RasterFlowError {
    #[error("invalid chunk configuration: {0}")]
    InvalidChunkConfig(String),
    #[error("chunk does not match the consumer prototype: {0}")]
    IncompatibleChunk(String),
    #[error("no input buffer matches the chunk's external type")]
    TypeMismatch,
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(&'static str),
    #[error("expected {expected} input chunks, found {found}")]
    ChunkCountMismatch { expected: usize, found: usize },
    #[error("expression evaluation failed")]
    EvaluationFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("estimated memory of {needed} bytes exceeds the {available} bytes available")]
    MemoryBudgetExceeded { needed: usize, available: usize },
    #[error("resampling requires a native chunking scheme on both producer and consumer")]
    SchemeRequired,
    #[error("resampling map produced a coordinate outside the source grid")]
    MapCoordinateOutOfBounds,
    #[error("encountered an object with zero dimension")]
    ZeroDimension,
    #[error(transparent)]
    NdarrayShapeError(#[from] ndarray::ShapeError),
    #[cfg(feature = "use-rayon")]
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
}

/// The `Result` type returned by this crate.
pub type Result<T> = std::result::Result<T, RasterFlowError>;
