use crate::types::{AllReduceAlgo, DataType, Rank};

pub type Result<T> = std::result::Result<T, IntraNodeError>;

/// Broad failure categories, used by callers deciding whether to retry on
/// the fallback collective or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown enum value or unsupported element format.
    InvalidArgument,
    /// Buffer layout, placement or size does not meet the engine's contract.
    Precondition,
    /// The link matrix is not a topology the engine can drive.
    Topology,
    /// The device runtime failed to launch, copy or complete.
    DeviceRuntime,
}

#[derive(Debug, thiserror::Error)]
pub enum IntraNodeError {
    #[error("unknown topology value {value}")]
    UnknownTopology { value: u8 },

    #[error("unknown all-reduce algorithm value {value}")]
    UnknownAlgorithm { value: u8 },

    #[error("no all-reduce algorithm selected; use the fallback collective")]
    NoAlgorithm,

    #[error("unsupported data type: {dtype} for operation {op}")]
    UnsupportedDType { dtype: DataType, op: &'static str },

    #[error("{algo} requires {requirement}")]
    AlgorithmMismatch {
        algo: &'static str,
        requirement: &'static str,
    },

    #[error("input buffer is not contiguous")]
    NonContiguous,

    #[error("input is resident on device {actual}, expected device {expected}")]
    WrongDevice { expected: u32, actual: u32 },

    #[error("aligned size {required} bytes exceeds buffer capacity {capacity} bytes")]
    CapacityExceeded { required: usize, capacity: usize },

    #[error("{numel} elements overflow the addressable size once padded")]
    SizeOverflow { numel: usize },

    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("invalid world size {world_size}: {reason}")]
    InvalidWorldSize {
        world_size: u32,
        reason: &'static str,
    },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("topology error: {reason}")]
    Topology { reason: String },

    #[error("shape mismatch: rank {rank} aligned {local} elements, rank {peer} aligned {remote}")]
    ShapeMismatch {
        rank: Rank,
        peer: Rank,
        local: usize,
        remote: usize,
    },

    #[error("algorithm mismatch: rank {rank} launches {local}, rank {peer} launches {remote}")]
    AlgorithmDisagreement {
        rank: Rank,
        peer: Rank,
        local: AllReduceAlgo,
        remote: AllReduceAlgo,
    },

    #[error("rank {rank} block {block} timed out after {timeout_ms}ms waiting on rank {peer}")]
    AcquireTimeout {
        rank: Rank,
        peer: Rank,
        block: usize,
        timeout_ms: u64,
    },

    #[error("device runtime error: {message}")]
    Device {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl IntraNodeError {
    /// Create a `Device` error with just a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Device` error with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Device {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownTopology { .. }
            | Self::UnknownAlgorithm { .. }
            | Self::NoAlgorithm
            | Self::UnsupportedDType { .. }
            | Self::AlgorithmMismatch { .. }
            | Self::Config { .. } => ErrorKind::InvalidArgument,
            Self::NonContiguous
            | Self::WrongDevice { .. }
            | Self::CapacityExceeded { .. }
            | Self::SizeOverflow { .. }
            | Self::BufferSizeMismatch { .. }
            | Self::InvalidRank { .. }
            | Self::InvalidWorldSize { .. }
            | Self::ShapeMismatch { .. }
            | Self::AlgorithmDisagreement { .. } => ErrorKind::Precondition,
            Self::Topology { .. } => ErrorKind::Topology,
            Self::AcquireTimeout { .. } | Self::Device { .. } => ErrorKind::DeviceRuntime,
        }
    }
}
