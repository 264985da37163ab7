use crate::error::{IntraNodeError, Result};

/// Rank of a device within the intra-node group (0-indexed).
pub type Rank = u32;

/// Upper bound on the number of devices in one group.
///
/// Every per-rank table (sync counters, peer buffers, link matrix) is sized
/// by this ceiling.
pub const MAX_DEVICES: usize = 8;

/// Element formats a caller may hand to the engine.
///
/// Only [`DataType::BF16`] is reduced here; the rest exist so that selection
/// can decline them and the caller can route to its fallback collective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    F32 = 0,
    F64 = 1,
    F16 = 2,
    BF16 = 3,
    I8 = 4,
    I32 = 5,
    I64 = 6,
    U8 = 7,
}

impl DataType {
    /// Size of one element in bytes.
    pub const fn size_in_bytes(self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F64 | DataType::I64 => 8,
            DataType::F16 | DataType::BF16 => 2,
            DataType::I8 | DataType::U8 => 1,
        }
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I8 => "i8",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Shape and placement of a caller's buffer, as seen at the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorDesc {
    pub dtype: DataType,
    pub numel: usize,
    pub contiguous: bool,
    /// Device the buffer is resident on.
    pub device: u32,
}

impl TensorDesc {
    /// A contiguous bf16 buffer of `numel` elements on `device`.
    pub fn bf16(numel: usize, device: u32) -> Self {
        Self {
            dtype: DataType::BF16,
            numel,
            contiguous: true,
            device,
        }
    }

    /// Payload size, or `None` when it does not fit in `usize`.
    pub fn size_in_bytes(&self) -> Option<usize> {
        self.numel.checked_mul(self.dtype.size_in_bytes())
    }
}

/// Reduction algorithm picked by [`crate::select_algorithm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AllReduceAlgo {
    /// The engine declines; the caller must use its fallback collective.
    None = 0,
    /// Every rank reads every peer's whole buffer after one barrier.
    SmallBuffer = 1,
    /// Reduce-scatter into owned shards, then all-gather.
    Sharded = 2,
    /// 4-way partial sums over the mesh, completed through the relay peer.
    MeshRelay = 3,
}

impl AllReduceAlgo {
    pub const fn name(self) -> &'static str {
        match self {
            AllReduceAlgo::None => "none",
            AllReduceAlgo::SmallBuffer => "small_buffer",
            AllReduceAlgo::Sharded => "sharded",
            AllReduceAlgo::MeshRelay => "mesh_relay",
        }
    }
}

impl std::fmt::Display for AllReduceAlgo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for AllReduceAlgo {
    type Error = IntraNodeError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(AllReduceAlgo::None),
            1 => Ok(AllReduceAlgo::SmallBuffer),
            2 => Ok(AllReduceAlgo::Sharded),
            3 => Ok(AllReduceAlgo::MeshRelay),
            _ => Err(IntraNodeError::UnknownAlgorithm { value }),
        }
    }
}
