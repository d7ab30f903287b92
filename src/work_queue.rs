// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared cursor handing out bucket indices to workers; every index below
/// the limit is returned exactly once across all threads.
pub struct WorkQueue {
    head: AtomicUsize,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            head: AtomicUsize::new(0),
        }
    }

    pub fn get_work(&self, limit: usize) -> Option<usize> {
        let old_head = self.head.fetch_add(1, Ordering::SeqCst);
        if old_head < limit {
            Some(old_head)
        } else {
            None
        }
    }
}
