use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use super::Frame;

const NEVER: u64 = u64::MAX;

/// Lets at most one frame through per interval
///
/// Works off frame timestamps rather than the wall clock, so it behaves the same for live and
/// replayed sources. Safe to share between threads: concurrent callers can't both emit within
/// one interval.
#[derive(Debug)]
pub struct FrameThrottle {
    interval_us: AtomicU64,
    last_emitted_us: AtomicU64,
}
impl FrameThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_us: AtomicU64::new(interval.as_micros() as u64),
            last_emitted_us: AtomicU64::new(NEVER),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_micros(self.interval_us.load(Ordering::Relaxed))
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_us
            .store(interval.as_micros() as u64, Ordering::Relaxed);
    }

    /// Forget the last emission so the next frame passes
    pub fn reset(&self) {
        self.last_emitted_us.store(NEVER, Ordering::Release);
    }

    /// Decide whether a frame captured at `at` should go through, recording it if so
    pub fn should_emit(&self, at: Duration) -> bool {
        let now = at.as_micros() as u64;
        let interval = self.interval_us.load(Ordering::Relaxed);

        let mut last = self.last_emitted_us.load(Ordering::Acquire);
        loop {
            if last != NEVER && now.saturating_sub(last) < interval {
                return false;
            }

            match self.last_emitted_us.compare_exchange_weak(
                last,
                now,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }

    /// Pass the frame through, or release it right away
    pub fn offer(&self, frame: Frame) -> Option<Frame> {
        if self.should_emit(frame.timestamp()) {
            Some(frame)
        } else {
            trace!("throttled frame at {:?}", frame.timestamp());
            None
        }
    }
}
impl Default for FrameThrottle {
    fn default() -> Self {
        Self::new(Duration::from_millis(200))
    }
}
