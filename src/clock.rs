use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(50);

pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Time source that only moves when told to. Tests drive transitions and
/// hold timers through it instead of sleeping.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }

    /// Moves to `at` past the clock's creation. Never moves backwards.
    pub fn set_elapsed(&self, at: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset = (*offset).max(at);
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        let offset = self
            .offset
            .lock()
            .map(|offset| *offset)
            .unwrap_or(Duration::ZERO);
        self.base + offset
    }
}

/// Shared animation scheduler. Owned by the process and handed to every
/// component that needs the time; tweens are evaluated against `now()`,
/// the frame interval only sets how often the control loop ticks them.
#[derive(Clone)]
pub struct Clock {
    source: Arc<dyn TimeSource>,
    frame_interval: Duration,
}

impl Clock {
    pub fn new(source: Arc<dyn TimeSource>, frame_interval: Duration) -> Self {
        Self {
            source,
            frame_interval: frame_interval.max(Duration::from_millis(1)),
        }
    }

    pub fn system(frame_interval: Duration) -> Self {
        Self::new(Arc::new(SystemClock), frame_interval)
    }

    pub fn manual() -> (Self, ManualClock) {
        let manual = ManualClock::new();
        (
            Self::new(Arc::new(manual.clone()), DEFAULT_FRAME_INTERVAL),
            manual,
        )
    }

    pub fn now(&self) -> Instant {
        self.source.now()
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    pub fn frames(&self) -> Receiver<Instant> {
        crossbeam_channel::tick(self.frame_interval)
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("frame_interval", &self.frame_interval)
            .finish_non_exhaustive()
    }
}
