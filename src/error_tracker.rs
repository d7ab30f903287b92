// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

/// Detection and correction counters for one read, owned by one thread.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorTracker {
    pub suspected: usize,
    pub detected_pincer: usize,
    pub detected_tail: usize,
    pub detected_reassemble: usize,
    pub corrected_pincer: usize,
    pub corrected_tail: usize,
    pub corrected_reassemble_inner: usize,
    pub corrected_reassemble_outer: usize,
    pub marked: usize,
    pub rollback: bool,
}

impl ErrorTracker {
    pub fn clear(&mut self) {
        *self = ErrorTracker::default();
    }

    pub fn detected(&self) -> usize {
        self.detected_pincer + self.detected_tail + self.detected_reassemble
    }

    pub fn corrected(&self) -> usize {
        self.corrected_pincer + self.corrected_tail + self.corrected_reassemble()
    }

    pub fn corrected_reassemble(&self) -> usize {
        self.corrected_reassemble_inner + self.corrected_reassemble_outer
    }
}
