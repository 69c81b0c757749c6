//! Injection transient window.
//!
//! A new injection resets the cycle counter to zero, then every cycle,
//! the injection cycle included, advances it by one until it reaches the
//! stop offset. While
//! `start ≤ counter < stop` the proportional gain is ramped from zero back
//! to its configured value, outside it the full gain applies.
//! `start = ⌊f/1000⌋`, `stop = ⌊f·60/1000⌋` for sampling frequency `f`.

/// State of the injection context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionPhase {
    /// No injection seen yet.
    Idle,
    /// Counting cycles since the last injection.
    Counting,
    /// Counter reached the stop offset.
    Expired,
}

/// Injection cycle counter with its window bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionWindow {
    start: u64,
    stop: u64,
    counter: Option<u64>,
}

impl InjectionWindow {
    /// Window bounds for sampling frequency `frequency` [Hz].
    pub fn from_frequency(frequency: f64) -> Self {
        let start = (frequency / 1000.0).floor().max(0.0) as u64;
        let stop = (frequency * 60.0 / 1000.0).floor().max(0.0) as u64;
        Self {
            start,
            stop,
            counter: None,
        }
    }

    /// First cycle inside the window.
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// First cycle after the window.
    #[inline]
    pub fn stop(&self) -> u64 {
        self.stop
    }

    /// Cycles since the last injection, `None` before the first one.
    #[inline]
    pub fn counter(&self) -> Option<u64> {
        self.counter
    }

    /// Current phase.
    pub fn phase(&self) -> InjectionPhase {
        match self.counter {
            None => InjectionPhase::Idle,
            Some(c) if c < self.stop => InjectionPhase::Counting,
            Some(_) => InjectionPhase::Expired,
        }
    }

    /// True while the proportional gain is attenuated.
    #[inline]
    pub fn in_window(&self) -> bool {
        matches!(self.counter, Some(c) if c >= self.start && c < self.stop)
    }

    /// Advance by one cycle; `new_injection` first restarts the count at
    /// zero, so the injection cycle itself reads 1.
    pub fn update(&mut self, new_injection: bool) {
        if new_injection {
            self.counter = Some(0);
        }
        self.counter = self
            .counter
            .map(|c| if c < self.stop { c + 1 } else { c });
    }

    /// Proportional gain for the current cycle.
    pub fn gain(&self, p: f64) -> f64 {
        match self.counter {
            Some(c) if self.in_window() => {
                let span = (self.stop - self.start) as f64;
                p * (c - self.start) as f64 / span
            }
            _ => p,
        }
    }

    /// Back to idle.
    #[inline]
    pub fn reset(&mut self) {
        self.counter = None;
    }
}
