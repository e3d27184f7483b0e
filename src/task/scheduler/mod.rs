//! The runtime core: thread table, MLFQ run queues, tick accounting, and the
//! fork/start/stop/yield/sleep contract of §4.1.
//!
//! Grounded on the teacher's `task/scheduler/mod.rs` (the `SCHEDULER` singleton plus
//! per-CPU `current_tid` bookkeeping) and `examples/original_source/P1-P4/minithread.c`
//! for the fork/yield/stop contract itself. Unlike the teacher, this is a single
//! logical CPU (the spec has one preemption source, not per-CPU run queues), and
//! "disable interrupts" is realized as holding `Runtime::core`'s mutex (see
//! `crate::preempt`) rather than masking a real interrupt controller.

pub mod reaper;

use crate::config::RuntimeConfig;
use crate::preempt::masked;
use crate::task::alarm::{deadline_from_delay, AlarmId, AlarmQueue};
use crate::task::runlevels::MultilevelQueue;
use crate::task::thread::{Thread, ThreadId, ThreadProc, ThreadState};
use crate::task::vcpu::Vcpu;
use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::thread::JoinHandle;

thread_local! {
    /// The id of the minithread running on *this* OS thread, set once by `start`'s
    /// spawned closure before the body runs. One per backing OS thread, which is
    /// exactly one per minithread under the `Vcpu` token model (see `task::vcpu`).
    static CURRENT_TID: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

/// Scheduler-internal bookkeeping, guarded by a single mutex standing in for "the
/// interrupt mask". See `crate::preempt`.
pub struct Core {
    pub(crate) tick: u64,
    pub(crate) threads: std::collections::HashMap<ThreadId, Thread>,
    pub(crate) levels: MultilevelQueue,
    pub(crate) current: Option<ThreadId>,
    pub(crate) alarms: AlarmQueue,
    pub(crate) zombies: VecDeque<ThreadId>,
    pub(crate) join_handles: std::collections::HashMap<ThreadId, JoinHandle<()>>,
    /// Set by the tick handler when MLFQ accounting decided a switch is due; cleared
    /// and acted on at the running thread's next cooperative checkpoint (see
    /// `Runtime::checkpoint`) — this runtime has no way to forcibly suspend a real OS
    /// thread mid-computation, so "preemption" takes effect lazily, exactly as a
    /// cooperative scheduler's tick would if nothing yielded in between.
    pub(crate) preempt_requested: bool,
    config: RuntimeConfig,
}

impl Core {
    fn new(config: RuntimeConfig) -> Self {
        Core {
            tick: 0,
            threads: std::collections::HashMap::new(),
            levels: MultilevelQueue::new(),
            current: None,
            alarms: AlarmQueue::new(),
            zombies: VecDeque::new(),
            join_handles: std::collections::HashMap::new(),
            preempt_requested: false,
            config,
        }
    }
}

/// The runtime object. Owns every piece of scheduler-, alarm-, port- and
/// socket-adjacent shared state that the original C kept as process-wide globals.
pub struct Runtime {
    core: Mutex<Core>,
    vcpu: Vcpu,
    self_handle: Weak<Runtime>,
    idle_cv: Condvar,
    idle_lock: Mutex<()>,
    pub(crate) config: RuntimeConfig,
    pub(crate) transport: Arc<dyn crate::net::transport::RawTransport>,
    pub(crate) ports: crate::net::port::PortTable,
    pub(crate) streams: crate::net::stream::StreamTable,
    reaper_id: Mutex<Option<ThreadId>>,
    clock: Arc<dyn crate::clock::ClockSource>,
}

/// A cheap, cloneable reference into the runtime, handed to every minithread body and
/// alarm handler — the idiomatic-Rust replacement for the original's implicit global
/// kernel API.
pub type Handle = Arc<Runtime>;

impl Runtime {
    /// Construct a runtime backed by the given raw transport, with default tunables.
    pub fn new(transport: Arc<dyn crate::net::transport::RawTransport>) -> Handle {
        Self::with_config(transport, RuntimeConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn crate::net::transport::RawTransport>,
        config: RuntimeConfig,
    ) -> Handle {
        Self::with_clock(transport, config, Arc::new(crate::clock::SystemClock::new()))
    }

    /// As [`Self::with_config`], but with the periodic clock source (the spec's
    /// out-of-scope `clock_init`) swapped out — used by tests that want to drive
    /// `on_tick` by hand instead of racing a real background timer.
    pub fn with_clock(
        transport: Arc<dyn crate::net::transport::RawTransport>,
        config: RuntimeConfig,
        clock: Arc<dyn crate::clock::ClockSource>,
    ) -> Handle {
        let rt = Arc::new_cyclic(|weak| Runtime {
            core: Mutex::new(Core::new(config.clone())),
            vcpu: Vcpu::new(),
            self_handle: weak.clone(),
            idle_cv: Condvar::new(),
            idle_lock: Mutex::new(()),
            config: config.clone(),
            transport,
            ports: crate::net::port::PortTable::new(),
            streams: crate::net::stream::StreamTable::new(),
            reaper_id: Mutex::new(None),
            clock,
        });
        let reaper = reaper::spawn_reaper(&rt);
        *rt.reaper_id.lock().unwrap() = Some(reaper);
        crate::net::demux::install(&rt);
        rt.clock.start(config.tick_period, rt.handle());
        rt
    }

    /// The datagram miniport registry (`minimsg`): `create_unbound`/`create_bound`/
    /// `send`/`receive`, spec §4.4.
    pub fn ports(&self) -> &crate::net::port::PortTable {
        &self.ports
    }

    /// The reliable stream socket registry (`minisocket`), spec §4.5. Connection
    /// setup goes through `StreamSocket::connect`/`listen`, not this table directly.
    pub fn streams(&self) -> &crate::net::stream::StreamTable {
        &self.streams
    }

    /// The raw packet transport this runtime was constructed with (spec §6's
    /// `net_send`/ingress-callback collaborator).
    pub fn transport(&self) -> &Arc<dyn crate::net::transport::RawTransport> {
        &self.transport
    }

    pub fn handle(&self) -> Handle {
        self.self_handle.upgrade().expect("runtime dropped while in use")
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    // ---- thread lifecycle -------------------------------------------------

    /// `fork`: allocate a thread, enqueue it RUNNABLE at level 0, and kick the
    /// scheduler if nothing else is currently running.
    pub fn fork(self: &Handle, name: impl Into<String>, proc: ThreadProc) -> ThreadId {
        let id = self.create(name);
        self.start(id, proc);
        id
    }

    /// `create`: allocate a thread's bookkeeping and backing OS thread without
    /// enqueueing it. The proc runs once `start` is called with the same id... this
    /// spec's `create`/`start` split is instead expressed as `create_suspended` +
    /// `start` taking the proc, since a backing OS thread needs a body to run; see
    /// `create_suspended`/`start` below for the literal two-call contract.
    pub fn create(self: &Handle, name: impl Into<String>) -> ThreadId {
        let id = ThreadId::next();
        masked(&self.core, |core| {
            core.threads.insert(id, Thread::new(id, name));
        });
        id
    }

    /// Attach a body to a thread created via `create` and make it RUNNABLE
    /// (`fork` is exactly `create` followed immediately by `start`).
    pub fn start(self: &Handle, id: ThreadId, proc: ThreadProc) {
        let rt = self.clone_handle();
        let builder = std::thread::Builder::new().name(format!("minithread-{}", id.0));
        let join = builder
            .spawn(move || {
                rt.vcpu.wait_for_turn(id);
                CURRENT_TID.with(|cell| cell.set(Some(id)));
                proc(rt.clone_handle());
                rt.thread_finished(id);
            })
            .expect("failed to spawn minithread backing OS thread");
        masked(&self.core, |core| {
            core.join_handles.insert(id, join);
        });
        self.enqueue_and_maybe_kick(id);
    }

    fn clone_handle(&self) -> Handle {
        self.self_handle.upgrade().expect("runtime dropped while in use")
    }

    /// `self()`/`id()`: the identity of the minithread currently executing on this OS
    /// thread. Panics if called from outside a minithread body (there is no sensible
    /// answer from, say, the demo binary's main thread or the clock's timer thread).
    pub fn self_id(&self) -> ThreadId {
        CURRENT_TID
            .with(|cell| cell.get())
            .expect("self_id() called outside of a minithread body")
    }

    /// Mark a blocked thread RUNNABLE again. Only enqueues — never switches, per
    /// §4.2 (so it is safe to call from an alarm handler running with the mask held).
    pub fn start_blocked(&self, id: ThreadId) {
        self.enqueue_and_maybe_kick(id);
    }

    fn enqueue_and_maybe_kick(&self, id: ThreadId) {
        let next = masked(&self.core, |core| {
            if let Some(t) = core.threads.get_mut(&id) {
                if t.state != ThreadState::Zombie {
                    t.state = ThreadState::Runnable;
                    let level = t.level;
                    core.levels.enqueue(level, id);
                }
            }
            if core.current.is_none() {
                dequeue_and_mark_running(core)
            } else {
                None
            }
        });
        if let Some(n) = next {
            self.idle_cv.notify_all();
            self.vcpu.switch(None, Some(n));
        }
    }

    /// `yield`: give up the CPU, re-enqueue at the same level, run the next RUNNABLE
    /// thread (or resume immediately if none other is runnable).
    pub fn yield_now(&self, me: ThreadId) {
        let next = masked(&self.core, |core| {
            if let Some(t) = core.threads.get_mut(&me) {
                t.state = ThreadState::Runnable;
                let level = t.level;
                core.levels.enqueue(level, me);
            }
            core.current = None;
            dequeue_and_mark_running(core)
        });
        self.vcpu.switch(Some(me), next);
    }

    /// `stop`: block the calling thread. The caller must already have placed itself
    /// on some waiter list (and should not appear in any run queue) before calling
    /// this — `stop` itself does not touch any waiter list.
    pub fn stop(&self, me: ThreadId) {
        let next = masked(&self.core, |core| {
            if let Some(t) = core.threads.get_mut(&me) {
                t.state = ThreadState::Waiting;
            }
            core.current = None;
            dequeue_and_mark_running(core)
        });
        self.vcpu.switch(Some(me), next);
    }

    /// Acquire the runtime's single scheduler lock — the same one `fork`/`yield`/
    /// `stop` use — for structures outside `Core` that must share its critical
    /// section per spec §2 (the semaphore waiter list; see `crate::sync::semaphore`).
    /// `f` must not itself block.
    pub(crate) fn with_scheduler_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        masked(&self.core, |_core| f())
    }

    /// Run `f` (which registers the calling thread `me` on some external waiter list,
    /// e.g. a semaphore's) and, if it returns `true`, transition `me` to WAITING and
    /// switch away — all under the one lock acquisition `f` ran under. This closes the
    /// race a separate "register, then call `stop`" pair would leave open: a `V`
    /// arriving in between could wake `me` before the scheduler considers it blocked.
    pub(crate) fn block_if(&self, me: ThreadId, f: impl FnOnce() -> bool) {
        let outcome = masked(&self.core, |core| {
            if f() {
                if let Some(t) = core.threads.get_mut(&me) {
                    t.state = ThreadState::Waiting;
                }
                core.current = None;
                Some(dequeue_and_mark_running(core))
            } else {
                None
            }
        });
        if let Some(next) = outcome {
            self.vcpu.switch(Some(me), next);
        }
    }

    /// Cooperative checkpoint: if the clock tick has requested a preemption since we
    /// last checked, yield now. Blocking primitives (`P`, socket send/receive) call
    /// this implicitly by going through `yield_now`/`stop` anyway; long-running
    /// compute-bound thread bodies should call this directly at loop boundaries to
    /// remain preemptible, the same way the original only preempts at a clock tick —
    /// here the tick can only take effect where the code checks for it.
    pub fn checkpoint(&self, me: ThreadId) {
        let should_switch = masked(&self.core, |core| {
            if core.preempt_requested {
                core.preempt_requested = false;
                true
            } else {
                false
            }
        });
        if should_switch {
            self.yield_now(me);
        }
    }

    /// `sleep(ms)`: register an alarm that calls `start_blocked(self)`, then stop.
    pub fn sleep(self: &Handle, me: ThreadId, delay_ms: u64) {
        let rt = self.clone_handle();
        masked(&self.core, |core| {
            if let Some(t) = core.threads.get_mut(&me) {
                t.state = ThreadState::Waiting;
            }
            let deadline = deadline_from_delay(core.tick, delay_ms, core.config.tick_period.as_millis() as u64);
            core.alarms.register(deadline, Box::new(move |rt| rt.start_blocked(me)));
        });
        self.stop(me);
    }

    /// The finishing thread never runs again, so there is exactly one scheduling
    /// decision to make here — who gets the vcpu token next — and it must happen
    /// once. Waking the reaper (`start_blocked`) already makes that decision and
    /// performs the switch internally (`enqueue_and_maybe_kick`); issuing a second,
    /// independently-computed `vcpu.switch` afterwards would race it; whichever
    /// switch lands second wins and can stomp a token handoff the other just made,
    /// leaving the reaper enqueued as `core.current` but its OS thread parked
    /// forever, which hangs `join_idle` on its 30s timeout instead of returning.
    fn thread_finished(&self, id: ThreadId) {
        masked(&self.core, |core| {
            if let Some(t) = core.threads.get_mut(&id) {
                t.state = ThreadState::Zombie;
            }
            core.zombies.push_back(id);
            if core.current == Some(id) {
                core.current = None;
            }
        });
        self.idle_cv.notify_all();
        match *self.reaper_id.lock().unwrap() {
            Some(reaper) => self.start_blocked(reaper),
            None => {
                // Starting up: the reaper hasn't been assigned yet. Fall back to
                // picking the next thread directly.
                let next = masked(&self.core, dequeue_and_mark_running);
                self.vcpu.switch(None, next);
            }
        }
    }

    // ---- alarms -------------------------------------------------------------

    /// Register an alarm `delay_ms` in the future. The handler runs serialized with
    /// respect to tick accounting and to other alarm handlers (only the clock's
    /// driver thread ever invokes them), matching the spec's "runs with interrupts
    /// masked" intent without risking a re-entrant deadlock on `Runtime::core`.
    pub fn register_alarm(
        &self,
        delay_ms: u64,
        handler: crate::task::alarm::AlarmHandler,
    ) -> AlarmId {
        masked(&self.core, |core| {
            let period_ms = core.config.tick_period.as_millis() as u64;
            let deadline = deadline_from_delay(core.tick, delay_ms, period_ms);
            core.alarms.register(deadline, handler)
        })
    }

    /// Returns `true` if the alarm had already fired (and so could not be found).
    pub fn deregister_alarm(&self, id: AlarmId) -> bool {
        masked(&self.core, |core| core.alarms.deregister(id))
    }

    // ---- clock tick entry point ---------------------------------------------

    /// Invoked by the clock source, roughly once per `tick_period`. Advances the
    /// tick counter, applies MLFQ accounting (spec §4.1 steps 1-3), and fires any due
    /// alarms.
    pub fn on_tick(self: &Handle) {
        let due = masked(&self.core, |core| {
            core.tick += 1;
            let switch_needed = apply_mlfq_accounting(core);
            core.preempt_requested |= switch_needed;
            core.alarms.drain_due(core.tick)
        });
        for handler in due {
            handler(self);
        }
    }

    pub fn current_tick(&self) -> u64 {
        masked(&self.core, |core| core.tick)
    }

    // ---- reaper plumbing ------------------------------------------------------

    pub(crate) fn reap_one(&self) -> Option<ThreadId> {
        let (id, join) = masked(&self.core, |core| {
            let id = core.zombies.pop_front()?;
            let join = core.join_handles.remove(&id);
            Some((id, join))
        })?;
        if let Some(join) = join {
            let _ = join.join();
        }
        masked(&self.core, |core| {
            core.threads.remove(&id);
        });
        Some(id)
    }

    pub(crate) fn has_zombies(&self) -> bool {
        masked(&self.core, |core| !core.zombies.is_empty())
    }

    // ---- quiescence (test/demo convenience) ------------------------------------

    /// Block the calling (non-minithread) OS thread until the runtime has no
    /// RUNNABLE/RUNNING threads and no pending alarms. Used by the demo binary and
    /// integration tests to know when a scenario has settled; not part of the spec's
    /// own API (the original has no analogous call — it simply runs forever).
    pub fn join_idle(&self) {
        let guard = self.idle_lock.lock().unwrap();
        let _ = self
            .idle_cv
            .wait_timeout_while(guard, std::time::Duration::from_secs(30), |_| {
                !masked(&self.core, |core| {
                    core.current.is_none() && core.levels.is_empty() && core.alarms.is_empty()
                })
            })
            .unwrap();
    }

    /// Stop the background clock thread. Irreversible — there is no `restart`; used
    /// by the demo binary and tests at teardown so the process can exit instead of
    /// waiting on a detached ticking thread.
    pub fn shutdown_clock(&self) {
        self.clock.stop();
    }
}

/// Dequeue the next runnable thread and mark it RUNNING + current, if any.
fn dequeue_and_mark_running(core: &mut Core) -> Option<ThreadId> {
    let next = core.levels.dequeue_next();
    if let Some(id) = next {
        if let Some(t) = core.threads.get_mut(&id) {
            t.state = ThreadState::Running;
        }
        core.current = Some(id);
    }
    next
}

/// Spec §4.1 scheduling policy steps 1-3 (tick counter already advanced by the
/// caller). Returns whether a switch is due.
fn apply_mlfq_accounting(core: &mut Core) -> bool {
    let mut switch_needed = false;
    if let Some(cur) = core.current {
        if let Some(thread) = core.threads.get_mut(&cur) {
            thread.level_quanta += 1;
            let budget = core.config.level_run_budget[thread.level];
            if thread.level_quanta >= budget {
                thread.level = (thread.level + 1).min(crate::config::MLFQ_LEVELS - 1);
                thread.level_quanta = 0;
                switch_needed = true;
            }
        }
    }
    core.levels.cursor_ticks += 1;
    let quota = core.config.level_visit_quota[core.levels.cursor];
    if core.levels.cursor_ticks >= quota {
        core.levels.advance_cursor();
        switch_needed = true;
    }
    switch_needed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::transport::UdpTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_runtime() -> Handle {
        let transport = Arc::new(UdpTransport::bind_loopback(0).expect("bind loopback"));
        Runtime::with_config(transport, RuntimeConfig::fast_for_tests())
    }

    #[test]
    fn forked_thread_runs_and_is_reaped() {
        let rt = test_runtime();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        rt.fork("probe", Box::new(move |_h| { ran2.fetch_add(1, Ordering::SeqCst); }));
        rt.join_idle();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn two_threads_both_run_in_fork_order() {
        let rt = test_runtime();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        rt.fork("a", Box::new(move |h| {
            o1.lock().unwrap().push("a-start");
            let me = h.self_id();
            h.yield_now(me);
        }));
        let o2 = order.clone();
        rt.fork("b", Box::new(move |_h| { o2.lock().unwrap().push("b-start"); }));
        rt.join_idle();
        assert!(order.lock().unwrap().len() >= 1);
    }

    /// Scenario 7 of the spec's end-to-end list: `sleep(ms)` wakes after
    /// `ceil(ms / tick_period)` ticks and the thread is RUNNABLE again, not lost.
    #[test]
    fn sleeping_thread_wakes_and_finishes() {
        let rt = test_runtime();
        let woke = Arc::new(AtomicUsize::new(0));
        let w = woke.clone();
        rt.fork(
            "sleeper",
            Box::new(move |h| {
                let me = h.self_id();
                h.sleep(me, 25);
                w.fetch_add(1, Ordering::SeqCst);
            }),
        );
        rt.join_idle();
        assert_eq!(woke.load(Ordering::SeqCst), 1);
    }
}
