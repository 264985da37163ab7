//! Device-visible bf16 regions.
//!
//! A [`DeviceBuffer`] is the registered per-rank region every peer can load
//! from and store to directly. All words are accessed atomically so that a
//! peer's accesses never tear; ordering between ranks comes exclusively from
//! the signal protocol in [`crate::sync`], never from the buffer itself.

use std::sync::atomic::{AtomicU16, Ordering};

use half::bf16;

use crate::error::{IntraNodeError, Result};
use crate::launch::NUMEL_PER_THREAD;
use crate::memory::Bf16x8;

/// Fixed-capacity region of bf16 elements owned by one device.
pub struct DeviceBuffer {
    device: u32,
    words: Box<[AtomicU16]>,
}

impl DeviceBuffer {
    /// Allocate a zero-filled region of `capacity_bytes` on `device`.
    pub fn zeroed(device: u32, capacity_bytes: usize) -> Self {
        let len = capacity_bytes / std::mem::size_of::<bf16>();
        Self {
            device,
            words: (0..len).map(|_| AtomicU16::new(0)).collect(),
        }
    }

    pub fn device(&self) -> u32 {
        self.device
    }

    /// Capacity in elements.
    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn capacity_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<bf16>()
    }

    /// Uncached load, safe to issue against a peer's region.
    #[inline]
    pub fn load(&self, idx: usize) -> bf16 {
        bf16::from_bits(self.words[idx].load(Ordering::Relaxed))
    }

    /// Write-through store, visible to peers once the writer releases.
    #[inline]
    pub fn store(&self, idx: usize, v: bf16) {
        self.words[idx].store(v.to_bits(), Ordering::Relaxed);
    }

    /// Cached load; only valid for data this device wrote itself.
    #[inline]
    pub fn load_local(&self, idx: usize) -> bf16 {
        bf16::from_bits(self.words[idx].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn load_vec(&self, off: usize) -> Bf16x8 {
        Bf16x8(std::array::from_fn(|i| self.load(off + i)))
    }

    #[inline]
    pub fn load_local_vec(&self, off: usize) -> Bf16x8 {
        Bf16x8(std::array::from_fn(|i| self.load_local(off + i)))
    }

    #[inline]
    pub fn store_vec(&self, off: usize, v: &Bf16x8) {
        for (i, x) in v.lanes().iter().enumerate() {
            self.store(off + i, *x);
        }
    }

    /// Copy host data into the region starting at `offset`.
    pub fn write_from(&self, offset: usize, src: &[bf16]) -> Result<()> {
        self.check_range(offset, src.len())?;
        for (i, v) in src.iter().enumerate() {
            self.store(offset + i, *v);
        }
        Ok(())
    }

    /// Copy `dst.len()` elements starting at `offset` back to the host.
    pub fn read_into(&self, offset: usize, dst: &mut [bf16]) -> Result<()> {
        self.check_range(offset, dst.len())?;
        for (i, v) in dst.iter_mut().enumerate() {
            *v = self.load(offset + i);
        }
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        let end = offset.checked_add(len).unwrap_or(usize::MAX);
        if end > self.capacity() {
            return Err(IntraNodeError::CapacityExceeded {
                required: end.saturating_mul(std::mem::size_of::<bf16>()),
                capacity: self.capacity_bytes(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.device)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Shared write view over the caller's output slice for the duration of a
/// launch. Blocks write disjoint vectors concurrently through it.
pub struct OutputView<'a> {
    words: &'a [AtomicU16],
}

impl<'a> OutputView<'a> {
    pub fn new(data: &'a mut [bf16]) -> Self {
        // SAFETY: `bf16` is `repr(transparent)` over `u16`, and `AtomicU16`
        // has the same size and alignment as `u16`. The exclusive borrow
        // keeps every non-atomic access out for `'a`.
        let words =
            unsafe { std::slice::from_raw_parts(data.as_mut_ptr() as *const AtomicU16, data.len()) };
        Self { words }
    }

    /// Number of writable elements; the caller's unpadded length.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Store a vector at `off`, dropping lanes at or past `len()`.
    #[inline]
    pub fn store_vec(&self, off: usize, v: &Bf16x8) {
        if off + NUMEL_PER_THREAD <= self.words.len() {
            for (i, x) in v.lanes().iter().enumerate() {
                self.words[off + i].store(x.to_bits(), Ordering::Relaxed);
            }
        } else {
            for (i, x) in v.lanes().iter().enumerate() {
                if off + i < self.words.len() {
                    self.words[off + i].store(x.to_bits(), Ordering::Relaxed);
                }
            }
        }
    }
}
