//! Per-destination pools of the 8-bit RADIUS Identifier space.

use radiam_core::{RadiamError, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Duration, Instant};

/// 256-slot ring with a next-hint cursor over a free mask. Allocation scans
/// from the hint, skipping fully-used 64-bit words.
struct IdentifierPool {
    free_mask: [u64; 4],
    next_hint: u8,
    free_count: u16,
}

impl IdentifierPool {
    fn new() -> Self {
        Self {
            free_mask: [u64::MAX; 4],
            next_hint: 0,
            free_count: 256,
        }
    }

    fn is_free(&self, id: u8) -> bool {
        self.free_mask[(id >> 6) as usize] & (1u64 << (id & 63)) != 0
    }

    fn allocate(&mut self) -> Option<u8> {
        if self.free_count == 0 {
            return None;
        }
        let mut id = self.next_hint;
        loop {
            if self.free_mask[(id >> 6) as usize] == 0 {
                // Whole word in use: jump to the next word boundary
                id = (id & !63).wrapping_add(64);
            } else if self.is_free(id) {
                self.free_mask[(id >> 6) as usize] &= !(1u64 << (id & 63));
                self.free_count -= 1;
                self.next_hint = id.wrapping_add(1);
                return Some(id);
            } else {
                id = id.wrapping_add(1);
            }
        }
    }

    fn release(&mut self, id: u8) {
        let word = (id >> 6) as usize;
        let bit = 1u64 << (id & 63);
        if self.free_mask[word] & bit == 0 {
            self.free_mask[word] |= bit;
            self.free_count += 1;
        }
    }
}

struct PoolEntry {
    pool: IdentifierPool,
    freed: Arc<Notify>,
}

impl Default for PoolEntry {
    fn default() -> Self {
        Self {
            pool: IdentifierPool::new(),
            freed: Arc::new(Notify::new()),
        }
    }
}

/// Identifier allocation per destination endpoint. Exhaustion blocks up to
/// the configured grace, then fails with `NoIdentifiers` so backpressure
/// reaches the caller.
pub struct IdentifierManager {
    pools: Mutex<HashMap<SocketAddr, PoolEntry>>,
    exhaustion_wait: Duration,
}

impl IdentifierManager {
    pub fn new(exhaustion_wait: Duration) -> Self {
        Self {
            pools: Mutex::new(HashMap::new()),
            exhaustion_wait,
        }
    }

    pub async fn allocate(&self, destination: SocketAddr) -> Result<u8> {
        let deadline = Instant::now() + self.exhaustion_wait;
        loop {
            let freed = {
                let mut pools = self.pools.lock().await;
                let entry = pools.entry(destination).or_default();
                if let Some(id) = entry.pool.allocate() {
                    return Ok(id);
                }
                Arc::clone(&entry.freed)
            };

            if tokio::time::timeout_at(deadline, freed.notified())
                .await
                .is_err()
            {
                return Err(RadiamError::NoIdentifiers(destination.to_string()));
            }
        }
    }

    pub async fn release(&self, destination: SocketAddr, id: u8) {
        let mut pools = self.pools.lock().await;
        if let Some(entry) = pools.get_mut(&destination) {
            entry.pool.release(id);
            entry.freed.notify_one();
        }
    }
}
