//! Scoped lazy weight materialization
//!
//! While a `LazyScope` is alive, the loader keeps freshly read weights on
//! the host and leaves device placement to the sharding step, which then
//! moves only each rank's slice. Peak device memory stays bounded to one
//! shard's worth of weights instead of one full replica per shard. The
//! scope is process-global and restored on drop, including unwinds, so code
//! running after the scope sees eager behavior again.

use std::sync::atomic::{AtomicUsize, Ordering};

// 0 = eager; otherwise the shard count the scope was sized to.
static LAZY_SHARDS: AtomicUsize = AtomicUsize::new(0);

/// RAII guard enabling lazy materialization sized to a shard count
pub struct LazyScope {
    prev: usize,
}

impl LazyScope {
    /// Enter a lazy-materialization scope sized to `shard_count`
    pub fn enter(shard_count: usize) -> Self {
        let prev = LAZY_SHARDS.swap(shard_count.max(1), Ordering::SeqCst);
        Self { prev }
    }

    /// The shard count of the active scope, if any
    pub fn active() -> Option<usize> {
        match LAZY_SHARDS.load(Ordering::SeqCst) {
            0 => None,
            n => Some(n),
        }
    }
}

impl Drop for LazyScope {
    fn drop(&mut self) {
        LAZY_SHARDS.store(self.prev, Ordering::SeqCst);
    }
}
