//! Correlation id generation
//!
//! Every request gets one id. It is the body of asynchronous responses, the
//! `Ghoko-Id` header of synchronous ones, and the `Id` binding scripts see.

use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::SystemTime;

/// Source of unique, opaque correlation ids.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// 12-byte ids rendered as 24 hex digits.
///
/// Layout: 4 bytes of Unix seconds, 3 bytes of per-process entropy, 2 bytes
/// of the process id, 3 bytes of a wrapping counter.
pub struct ObjectIdGenerator {
    process: [u8; 3],
    pid: u16,
    counter: AtomicU32,
}

impl ObjectIdGenerator {
    pub fn new() -> Self {
        let entropy = RandomState::new().build_hasher().finish();
        let bytes = entropy.to_be_bytes();
        Self {
            process: [bytes[5], bytes[6], bytes[7]],
            pid: std::process::id() as u16,
            counter: AtomicU32::new(bytes[0] as u32 | (bytes[1] as u32) << 8 | (bytes[2] as u32) << 16),
        }
    }
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for ObjectIdGenerator {
    fn next_id(&self) -> String {
        let secs = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let count = self.counter.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;

        let mut raw = [0u8; 12];
        raw[0..4].copy_from_slice(&secs.to_be_bytes());
        raw[4..7].copy_from_slice(&self.process);
        raw[7..9].copy_from_slice(&self.pid.to_be_bytes());
        raw[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);

        raw.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
