//! Frame statistics.

use std::time::Duration;

use crate::batching::{BatchStats, BatcherId};

/// Counters over the life of a frame pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames submitted.
    pub submitted: u64,
    /// Frames dropped before submission.
    pub skipped: u64,
    /// Fence waits that hit the timeout.
    pub stalls: u64,
    /// Successful resizes.
    pub resizes: u64,
    /// Batcher ticks that failed recoverably and redrew old data.
    pub batcher_failures: u64,
    /// CPU time of the last submitted frame.
    pub last_frame_time: Duration,
    /// Worst CPU time of any submitted frame.
    pub worst_frame_time: Duration,
}

impl PipelineStats {
    /// Records a submitted frame's CPU time.
    pub fn record_frame(&mut self, cpu_time: Duration) {
        self.submitted += 1;
        self.last_frame_time = cpu_time;
        self.worst_frame_time = self.worst_frame_time.max(cpu_time);
    }

    /// Fraction of frames that were skipped.
    #[must_use]
    pub fn skip_ratio(&self) -> f64 {
        let total = self.submitted + self.skipped;
        if total == 0 {
            0.0
        } else {
            self.skipped as f64 / total as f64
        }
    }
}

/// Result of one submitted frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// Frame number.
    pub frame: u64,
    /// Ring slot the frame used.
    pub ring_slot: usize,
    /// Instanced draws recorded.
    pub draws: u32,
    /// Instances drawn.
    pub instances: u32,
    /// Per-batcher tick results.
    pub batches: Vec<(BatcherId, BatchStats)>,
    /// Batchers that failed recoverably and redrew their previous data.
    pub degraded: Vec<BatcherId>,
    /// CPU time spent in the frame.
    pub cpu_time: Duration,
}

impl FrameReport {
    /// True if every batcher ticked successfully.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.degraded.is_empty()
    }
}
