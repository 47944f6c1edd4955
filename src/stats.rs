//! Build statistics (component O).
//!
//! Grounded in `stats.c`'s package-level counters, widened to atomics since
//! the worker pool (component N) increments them from multiple threads
//! concurrently instead of the original's single-threaded accounting.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct BuildStats {
    new_files: AtomicU64,
    deleted_files: AtomicU64,
    changed_files: AtomicU64,
    delta_hit: AtomicU64,
    delta_miss: AtomicU64,
}

impl BuildStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_new_file(&self) {
        self.new_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_deleted_file(&self) {
        self.deleted_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_changed_file(&self) {
        self.changed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_delta_hit(&self) {
        self.delta_hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn account_delta_miss(&self) {
        self.delta_miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn has_new_files(&self) -> bool {
        self.new_files.load(Ordering::Relaxed) > 0
    }

    pub fn has_changed_files(&self) -> bool {
        self.changed_files.load(Ordering::Relaxed) > 0
    }

    pub fn summary(&self, from_version: u32, to_version: u32) -> String {
        format!(
            "Statistics for going from version {} to version {}\n    changed files : {}\n    new files     : {}\n    deleted files : {}\n",
            from_version,
            to_version,
            self.changed_files.load(Ordering::Relaxed),
            self.new_files.load(Ordering::Relaxed),
            self.deleted_files.load(Ordering::Relaxed),
        )
    }

    pub fn delta_summary(&self) -> String {
        format!(
            "{} successful delta usages, {} failures",
            self.delta_hit.load(Ordering::Relaxed),
            self.delta_miss.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_accumulate() {
        let stats = BuildStats::new();
        stats.account_new_file();
        stats.account_new_file();
        stats.account_changed_file();
        assert!(stats.has_new_files());
        assert!(stats.has_changed_files());
        assert!(stats.summary(10, 20).contains("changed files : 1"));
    }
}
