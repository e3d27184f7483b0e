//! Bitmap-free multilevel FIFO run queue implementing the spec's MLFQ container.
//!
//! Grounded on the teacher's `task/scheduler/run_queue.rs` bitmap-indexed multilevel
//! queue, simplified to the spec's fixed `L = 4` levels (no need for a 128-level
//! bitmap at this scale — four `VecDeque`s and a linear non-empty scan are plenty).

use crate::config::MLFQ_LEVELS;
use crate::task::thread::ThreadId;
use std::collections::VecDeque;

/// `L` FIFO queues plus the per-level-visit cursor the spec's scheduling policy
/// (§4.1 step 3) advances once a level has consumed its quota of ticks.
pub struct MultilevelQueue {
    levels: [VecDeque<ThreadId>; MLFQ_LEVELS],
    /// Level the circular probe is currently servicing.
    pub cursor: usize,
    /// Ticks consumed by `cursor` since it last advanced.
    pub cursor_ticks: u32,
}

impl MultilevelQueue {
    pub fn new() -> Self {
        MultilevelQueue {
            levels: Default::default(),
            cursor: 0,
            cursor_ticks: 0,
        }
    }

    /// Enqueue `tid` at the back of `level`'s FIFO. Caller clamps `level` to `L-1`.
    pub fn enqueue(&mut self, level: usize, tid: ThreadId) {
        let level = level.min(MLFQ_LEVELS - 1);
        self.levels[level].push_back(tid);
    }

    /// Remove a specific thread from wherever it sits (used when a thread is killed
    /// or reaped while still queued).
    pub fn remove(&mut self, tid: ThreadId) {
        for q in &mut self.levels {
            if let Some(pos) = q.iter().position(|&t| t == tid) {
                q.remove(pos);
                return;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|q| q.is_empty())
    }

    pub fn total_count(&self) -> usize {
        self.levels.iter().map(|q| q.len()).sum()
    }

    /// Dequeue the head of the level the circular probe currently favors, wrapping to
    /// the next non-empty level if that one is empty (spec §4.1 step 4). Does not
    /// itself advance the cursor — that is a policy decision the scheduler tick makes
    /// once `cursor_ticks` reaches the level's visit quota.
    pub fn dequeue_next(&mut self) -> Option<ThreadId> {
        for offset in 0..MLFQ_LEVELS {
            let l = (self.cursor + offset) % MLFQ_LEVELS;
            if let Some(tid) = self.levels[l].pop_front() {
                return Some(tid);
            }
        }
        None
    }

    /// Advance the circular probe to the next level, resetting its tick count.
    pub fn advance_cursor(&mut self) {
        self.cursor = (self.cursor + 1) % MLFQ_LEVELS;
        self.cursor_ticks = 0;
    }
}

impl Default for MultilevelQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_a_level() {
        let mut mq = MultilevelQueue::new();
        mq.enqueue(0, ThreadId(1));
        mq.enqueue(0, ThreadId(2));
        assert_eq!(mq.dequeue_next(), Some(ThreadId(1)));
        assert_eq!(mq.dequeue_next(), Some(ThreadId(2)));
        assert_eq!(mq.dequeue_next(), None);
    }

    #[test]
    fn wraps_to_next_nonempty_level() {
        let mut mq = MultilevelQueue::new();
        mq.enqueue(2, ThreadId(9));
        // cursor starts at level 0, which is empty, so probing wraps to level 2.
        assert_eq!(mq.dequeue_next(), Some(ThreadId(9)));
    }

    #[test]
    fn cursor_advance_wraps_mod_l() {
        let mut mq = MultilevelQueue::new();
        mq.cursor = MLFQ_LEVELS - 1;
        mq.advance_cursor();
        assert_eq!(mq.cursor, 0);
        assert_eq!(mq.cursor_ticks, 0);
    }
}
