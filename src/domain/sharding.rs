//! Deterministic routing of logical keys to physical partitions.
//!
//! Every instance in the fleet must agree on where a short code lives, across
//! restarts and deployments, so the hash has no random seed and is computed
//! with a wrapping unsigned accumulator.

/// Table prefix for short link partitions.
pub const LINKS_TABLE: &str = "short_links";

/// Table prefix for access record partitions.
pub const ACCESS_TABLE: &str = "access_records";

/// Polynomial string hash (`h = 31 * h + byte`) over the UTF-8 bytes of `key`.
pub fn hash_key(key: &str) -> u32 {
    key.bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)))
}

/// Maps `key` to a partition index in `0..shard_count`.
///
/// Total: an empty key lands on shard 0 and a shard count of zero is treated
/// as a single partition.
pub fn shard_index(key: &str, shard_count: u32) -> u32 {
    hash_key(key) % shard_count.max(1)
}

/// Routes logical keys to partition table names for a fixed shard count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: u32,
}

impl ShardRouter {
    /// Creates a router for `shard_count` partitions (clamped to at least one).
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Partition index for `key`.
    pub fn index(&self, key: &str) -> u32 {
        shard_index(key, self.shard_count)
    }

    /// Physical table name for `key` within the `table` family, e.g. `short_links_7`.
    pub fn partition(&self, table: &str, key: &str) -> String {
        partition_name(table, self.index(key))
    }

    /// All partition names of a table family, in index order.
    pub fn partitions(&self, table: &str) -> Vec<String> {
        (0..self.shard_count)
            .map(|index| partition_name(table, index))
            .collect()
    }
}

/// Renders the physical name of partition `index` in the `table` family.
pub fn partition_name(table: &str, index: u32) -> String {
    format!("{table}_{index}")
}
