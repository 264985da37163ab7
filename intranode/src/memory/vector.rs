//! 16-byte vector of bf16 lanes, the unit every kernel loads and stores.

use half::bf16;

use crate::launch::NUMEL_PER_THREAD;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bf16x8(pub [bf16; NUMEL_PER_THREAD]);

impl Bf16x8 {
    pub const ZERO: Self = Self([bf16::ZERO; NUMEL_PER_THREAD]);

    pub fn splat(v: bf16) -> Self {
        Self([v; NUMEL_PER_THREAD])
    }

    /// Lane-wise sum of `packs`, accumulated in f32 and rounded once.
    ///
    /// Packs are added in slice order, so callers that want bit-identical
    /// results across ranks must pass them in a rank-independent order.
    pub fn sum(packs: &[Bf16x8]) -> Self {
        let mut acc = [0f32; NUMEL_PER_THREAD];
        for pack in packs {
            for (a, v) in acc.iter_mut().zip(pack.0.iter()) {
                *a += v.to_f32();
            }
        }
        Self(acc.map(bf16::from_f32))
    }

    pub fn lanes(&self) -> &[bf16; NUMEL_PER_THREAD] {
        &self.0
    }
}
