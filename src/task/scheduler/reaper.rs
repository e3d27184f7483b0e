//! The reaper: a minithread like any other, woken whenever a thread finishes, that
//! joins the finished thread's backing OS thread and drops its bookkeeping.
//!
//! The original C reaps by freeing a zombie's stack directly from
//! `minithread_exit`/the scheduler; with `std::thread` providing the stack, "freeing"
//! becomes "join the `JoinHandle`, then forget the `Thread` entry" (see
//! `Runtime::reap_one`). Keeping it on its own minithread rather than inlining the
//! join into `thread_finished` avoids a dying thread's OS thread having to join
//! itself, which `std::thread::JoinHandle` does not allow anyway.

use super::Runtime;
use crate::task::thread::{ThreadId, ThreadProc};
use crate::Handle;

/// Create and start the reaper minithread, returning its id so `thread_finished` can
/// wake it.
pub(crate) fn spawn_reaper(rt: &Handle) -> ThreadId {
    let id = rt.create("reaper");
    let proc: ThreadProc = Box::new(move |h: Handle| {
        reaper_loop(&h, id);
    });
    rt.start(id, proc);
    id
}

fn reaper_loop(rt: &Runtime, me: ThreadId) {
    loop {
        while rt.reap_one().is_some() {}
        rt.stop(me);
    }
}
