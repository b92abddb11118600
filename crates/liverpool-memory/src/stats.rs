use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of object cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpuMemoryStatsSnapshot {
    pub creates: u64,
    pub reuses: u64,
    pub updates: u64,
    pub write_backs: u64,
    pub deletes: u64,
}

/// Object cache counters. Updated on the command-processing thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct GpuMemoryStats {
    creates: AtomicU64,
    reuses: AtomicU64,
    updates: AtomicU64,
    write_backs: AtomicU64,
    deletes: AtomicU64,
}

impl GpuMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_creates(&self) {
        self.creates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reuses(&self) {
        self.reuses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_updates(&self) {
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_write_backs(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_deletes(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> GpuMemoryStatsSnapshot {
        GpuMemoryStatsSnapshot {
            creates: self.creates.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = GpuMemoryStats::new();
        stats.inc_creates();
        stats.inc_creates();
        stats.inc_write_backs();
        assert_eq!(
            stats.snapshot(),
            GpuMemoryStatsSnapshot {
                creates: 2,
                write_backs: 1,
                ..Default::default()
            }
        );
    }
}
