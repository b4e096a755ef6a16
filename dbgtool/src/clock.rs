//! An injectable clock seam (REDESIGN FLAGS: async/event-polling) so the 50ms
//! event-poll loop and the CMSIS-DAP inter-command delay can be driven by a fake
//! in tests instead of sleeping real wall-clock time.

use std::time::{Duration, Instant};

pub trait Clock: std::fmt::Debug {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
