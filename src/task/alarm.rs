//! Deadline-ordered alarm queue, fired from the clock tick handler.
//!
//! Grounded on `examples/original_source/P1-P4/alarm.c`/`alarm.h`: `register` computes
//! an absolute deadline in tick units and inserts into a queue sorted ascending by
//! deadline; `deregister` reports whether the alarm had already fired.

use crate::queue::PriorityQueue;
use crate::Handle;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque alarm identity returned by `register`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmId(u64);

static NEXT_ALARM_ID: AtomicU64 = AtomicU64::new(1);

/// An alarm handler. Runs with the runtime's preemption guard held (the spec's
/// "interrupts masked" region): it must not block or perform I/O.
pub type AlarmHandler = Box<dyn FnOnce(&Handle) + Send>;

struct AlarmRecord {
    id: AlarmId,
    handler: AlarmHandler,
}

/// The deadline-sorted alarm queue. `deadline` is expressed in absolute tick counts.
#[derive(Default)]
pub struct AlarmQueue {
    queue: PriorityQueue<u64, AlarmRecord>,
}

impl AlarmQueue {
    pub fn new() -> Self {
        AlarmQueue { queue: PriorityQueue::new() }
    }

    /// Insert a new alarm at `deadline` (absolute tick count). Returns its id.
    pub fn register(&mut self, deadline: u64, handler: AlarmHandler) -> AlarmId {
        let id = AlarmId(NEXT_ALARM_ID.fetch_add(1, Ordering::Relaxed));
        self.queue.insert_sorted(deadline, AlarmRecord { id, handler });
        id
    }

    /// Remove an alarm before it fires. Returns `true` if it had already fired (and
    /// so was not found — the spec's `deregister` contract: `1` if already fired, `0`
    /// otherwise), `false` if it was still pending and has now been canceled.
    pub fn deregister(&mut self, id: AlarmId) -> bool {
        match self.queue.remove_where(|rec| rec.id == id) {
            Some(_) => false,
            None => true,
        }
    }

    /// Pop every alarm whose deadline is `<= now`, in deadline order (ties in
    /// insertion order). Caller runs the handlers; this just drains the due ones.
    pub fn drain_due(&mut self, now: u64) -> Vec<AlarmHandler> {
        let mut due = Vec::new();
        while let Some(deadline) = self.queue.peek_key() {
            if deadline > now {
                break;
            }
            let (_, rec) = self.queue.pop_front().expect("peeked key must pop");
            due.push(rec.handler);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Convert a millisecond delay into a tick-count deadline, per spec: `T +
/// ceil(delay_ms / PERIOD_MS)`.
pub fn deadline_from_delay(now_tick: u64, delay_ms: u64, period_ms: u64) -> u64 {
    let ticks = (delay_ms + period_ms - 1) / period_ms.max(1);
    now_tick + ticks.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_rounds_up() {
        // ceil(250/100) = 3
        assert_eq!(deadline_from_delay(0, 250, 100), 3);
        assert_eq!(deadline_from_delay(10, 100, 100), 11);
        assert_eq!(deadline_from_delay(0, 1, 100), 1);
    }

    #[test]
    fn drain_due_is_deadline_ordered() {
        let mut aq = AlarmQueue::new();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        aq.register(5, Box::new(move |_| o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        aq.register(3, Box::new(move |_| o2.lock().unwrap().push(2)));
        let due = aq.drain_due(10);
        assert_eq!(due.len(), 2);
        // alarm 2 (deadline 3) must have been popped before alarm 1 (deadline 5)
    }

    #[test]
    fn deregister_reports_already_fired() {
        let mut aq = AlarmQueue::new();
        let id = aq.register(5, Box::new(|_| {}));
        assert!(!aq.deregister(id)); // still pending -> false (not already fired)
        let id2 = aq.register(1, Box::new(|_| {}));
        let _ = aq.drain_due(1);
        assert!(aq.deregister(id2)); // already fired and removed -> true
    }
}
