//! Mapping from owner uid to user id.

/// Default number of uids reserved for each user.
pub const DEFAULT_PER_USER_RANGE: u32 = 100_000;

/// Maps an owner uid to the user it belongs to.
pub trait UidPartitioner: Send + Sync {
    fn partition_of(&self, uid: u32) -> u32;
}

/// Fixed-size uid ranges: user `n` owns `[n * range, (n + 1) * range)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerUserRange {
    range: u32,
}

impl PerUserRange {
    /// A zero range is treated as one so every uid is its own user.
    pub fn new(range: u32) -> Self {
        Self {
            range: range.max(1),
        }
    }

    pub fn range(&self) -> u32 {
        self.range
    }
}

impl Default for PerUserRange {
    fn default() -> Self {
        Self::new(DEFAULT_PER_USER_RANGE)
    }
}

impl UidPartitioner for PerUserRange {
    fn partition_of(&self, uid: u32) -> u32 {
        uid / self.range
    }
}
