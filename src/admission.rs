use std::time::Duration;

use tokio::time::Instant;

use crate::error::ConfigError;

/// Time source for admission control. Tests can pass instants directly to the
/// state machines; tasks read the clock through this trait.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// `tokio::time::Instant::now()`, which honours paused test time.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdmissionPhase {
    #[default]
    Idle,
    Scheduled,
    Executing,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdmissionControl {
    #[default]
    Immediate,
    Debounce(Duration),
    Throttle(Duration),
}

impl AdmissionControl {
    pub fn from_waits(
        debounce_wait: Option<Duration>,
        throttle_wait: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        match (debounce_wait, throttle_wait) {
            (Some(_), Some(_)) => Err(ConfigError::ConflictingAdmission),
            (Some(wait), None) => Ok(Self::Debounce(wait)),
            (None, Some(wait)) => Ok(Self::Throttle(wait)),
            (None, None) => Ok(Self::Immediate),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceTicket {
    pub epoch: u64,
    pub deadline: Instant,
}

/// Trailing-edge debounce: every submit pushes the deadline out, and only the
/// ticket from the latest submit may fire.
#[derive(Debug)]
pub struct Debouncer {
    wait: Duration,
    phase: AdmissionPhase,
    epoch: u64,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            phase: AdmissionPhase::Idle,
            epoch: 0,
            deadline: None,
        }
    }

    pub fn phase(&self) -> AdmissionPhase {
        self.phase
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn submit(&mut self, now: Instant) -> DebounceTicket {
        self.epoch = self.epoch.wrapping_add(1);
        let deadline = now + self.wait;
        self.deadline = Some(deadline);
        self.phase = AdmissionPhase::Scheduled;
        DebounceTicket {
            epoch: self.epoch,
            deadline,
        }
    }

    /// `true` when `epoch` is still the latest scheduled ticket.
    pub fn fire(&mut self, epoch: u64) -> bool {
        if self.phase != AdmissionPhase::Scheduled || epoch != self.epoch {
            return false;
        }
        self.phase = AdmissionPhase::Executing;
        self.deadline = None;
        true
    }

    pub fn finish(&mut self) {
        if self.phase == AdmissionPhase::Executing {
            self.phase = AdmissionPhase::Idle;
        }
    }

    pub fn cancel(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.deadline = None;
        self.phase = AdmissionPhase::Idle;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottleAdmission {
    /// Run now; a new window has started.
    Leading,
    /// Join the trailing run at `fire_at`. `schedule` is set for the first
    /// caller in the window, which owns the timer.
    Trailing {
        fire_at: Instant,
        epoch: u64,
        schedule: bool,
    },
}

/// Leading + trailing throttle. The trailing run starts a fresh window.
#[derive(Debug)]
pub struct Throttler {
    wait: Duration,
    phase: AdmissionPhase,
    epoch: u64,
    window_end: Option<Instant>,
    trailing: bool,
}

impl Throttler {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            phase: AdmissionPhase::Idle,
            epoch: 0,
            window_end: None,
            trailing: false,
        }
    }

    pub fn phase(&self) -> AdmissionPhase {
        self.phase
    }

    pub fn submit(&mut self, now: Instant) -> ThrottleAdmission {
        match self.window_end {
            // A trailing run still pending at the window edge takes the call,
            // so it cannot fire later with older arguments.
            Some(window_end) if now < window_end || self.trailing => {
                let schedule = !self.trailing;
                self.trailing = true;
                self.phase = AdmissionPhase::Scheduled;
                ThrottleAdmission::Trailing {
                    fire_at: window_end,
                    epoch: self.epoch,
                    schedule,
                }
            }
            _ => {
                self.window_end = Some(now + self.wait);
                if !self.trailing {
                    self.phase = AdmissionPhase::Executing;
                }
                ThrottleAdmission::Leading
            }
        }
    }

    pub fn fire_trailing(&mut self, epoch: u64, now: Instant) -> bool {
        if !self.trailing || epoch != self.epoch {
            return false;
        }
        self.trailing = false;
        self.window_end = Some(now + self.wait);
        self.phase = AdmissionPhase::Executing;
        true
    }

    pub fn finish(&mut self) {
        if self.phase == AdmissionPhase::Executing && !self.trailing {
            self.phase = AdmissionPhase::Idle;
        }
    }

    pub fn cancel(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.trailing = false;
        self.phase = AdmissionPhase::Idle;
    }
}
