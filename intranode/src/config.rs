//! Runtime-configurable settings for the intra-node engine.
//!
//! Covers the registered buffer size, the block ceiling per launch, the
//! optional pre-launch agreement on length and algorithm, and the diagnostic
//! acquire deadline. `IntraNodeConfig::from_env` reads each one from its
//! `INTRANODE_*` variable.

use std::time::Duration;

use crate::error::{IntraNodeError, Result};
use crate::launch::MAX_ALL_REDUCE_BLOCKS;

/// Default per-rank registered buffer capacity.
pub const DEFAULT_BUFFER_BYTES: usize = 10 * 1024 * 1024; // 10 MiB

#[derive(Debug, Clone)]
pub struct IntraNodeConfig {
    /// When false, selection declines every request.
    pub enabled: bool,

    /// Capacity of each rank's registered device buffer.
    pub buffer_bytes: usize,

    /// Ceiling on execution blocks per launch. Sync state is sized for
    /// [`MAX_ALL_REDUCE_BLOCKS`], so this may only lower it.
    pub max_blocks: usize,

    /// Exchange aligned lengths across ranks before every launch.
    pub verify_shape: bool,

    /// Diagnostic bound on a single acquire. `None` spins until the peer
    /// signals, which is the production behavior.
    pub acquire_timeout: Option<Duration>,
}

impl Default for IntraNodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_bytes: DEFAULT_BUFFER_BYTES,
            max_blocks: MAX_ALL_REDUCE_BLOCKS,
            verify_shape: false,
            acquire_timeout: None,
        }
    }
}

impl IntraNodeConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `INTRANODE_ENABLE`
    /// - `INTRANODE_BUFFER_BYTES`
    /// - `INTRANODE_MAX_BLOCKS`
    /// - `INTRANODE_VERIFY_SHAPE`
    /// - `INTRANODE_ACQUIRE_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("INTRANODE_ENABLE")
            && let Some(b) = parse_bool(&v)
        {
            cfg.enabled = b;
        }
        if let Ok(v) = std::env::var("INTRANODE_BUFFER_BYTES")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.buffer_bytes = n;
        }
        if let Ok(v) = std::env::var("INTRANODE_MAX_BLOCKS")
            && let Ok(n) = v.parse::<usize>()
        {
            cfg.max_blocks = n;
        }
        if let Ok(v) = std::env::var("INTRANODE_VERIFY_SHAPE")
            && let Some(b) = parse_bool(&v)
        {
            cfg.verify_shape = b;
        }
        if let Ok(v) = std::env::var("INTRANODE_ACQUIRE_TIMEOUT_MS")
            && let Ok(ms) = v.parse::<u64>()
        {
            cfg.acquire_timeout = Some(Duration::from_millis(ms));
        }

        cfg
    }

    /// Reject settings the sync state or buffers cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.max_blocks == 0 || self.max_blocks > MAX_ALL_REDUCE_BLOCKS {
            return Err(IntraNodeError::Config {
                reason: format!(
                    "max_blocks {} outside 1..={MAX_ALL_REDUCE_BLOCKS}",
                    self.max_blocks
                ),
            });
        }
        if self.buffer_bytes == 0 || self.buffer_bytes % 2 != 0 {
            return Err(IntraNodeError::Config {
                reason: format!(
                    "buffer_bytes {} must be a positive whole number of bf16 elements",
                    self.buffer_bytes
                ),
            });
        }
        Ok(())
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
