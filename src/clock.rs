//! The periodic clock source: the spec's out-of-scope `clock_init(period_ns,
//! tick_handler)` collaborator, made concrete.
//!
//! The spec leaves the actual hardware/OS timer as an assumed collaborator, the same
//! way it leaves `net_send`/the ingress callback unspecified (see
//! `crate::net::transport`). `ClockSource` is the seam; [`SystemClock`] is the one
//! shipped implementation, driving `Runtime::on_tick` from a background
//! `std::thread::sleep` loop at `RuntimeConfig::tick_period` instead of a real PIT/APIC
//! timer interrupt, matching the teacher's `arch::x86::pit` one-shot-then-rearm style
//! (see `examples/brianmayclone-anyos/kernel/src/arch/x86/pit.rs`) but hosted.

use crate::Handle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A one-shot periodic clock, parameterized the way the original's `clock_init` is:
/// a period and a handler invoked once per tick. `start`/`stop` replace the original's
/// fire-and-forget lifetime (this runtime can be torn down in a test process, the
/// original never was).
pub trait ClockSource: Send + Sync {
    fn start(&self, period: Duration, rt: Handle);
    fn stop(&self);
}

/// Drives `Runtime::on_tick` from a dedicated background thread that sleeps for one
/// tick period between calls. Not a real-time guarantee — `std::thread::sleep` only
/// promises "at least" the requested duration — but sufficient for the cooperative
/// scheduler and retransmit timers this clock drives, which tolerate a late tick far
/// better than a missed one.
pub struct SystemClock {
    running: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { running: Arc::new(AtomicBool::new(false)), handle: std::sync::Mutex::new(None) }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    fn start(&self, period: Duration, rt: Handle) {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("SystemClock::start called while already running; ignoring");
            return;
        }
        let running = self.running.clone();
        let join = std::thread::Builder::new()
            .name("clock-tick".into())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    std::thread::sleep(period);
                    rt.on_tick();
                }
            })
            .expect("spawn clock tick thread");
        *self.handle.lock().unwrap() = Some(join);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(join) = self.handle.lock().unwrap().take() {
            let _ = join.join();
        }
    }
}

impl Drop for SystemClock {
    fn drop(&mut self) {
        self.stop();
    }
}
