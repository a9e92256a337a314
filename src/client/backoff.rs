//! Reconnect backoff of the stream reader.

use crate::config::ReaderConfig;
use std::time::Duration;

/// Exponential backoff state of one reader session
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    max: Duration,
    attempt: u32,
    delay: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, max: Duration) -> Self {
        Self {
            initial,
            factor,
            max,
            attempt: 0,
            delay: initial.min(max),
        }
    }

    pub fn from_config(config: &ReaderConfig) -> Self {
        Self::new(config.initial_delay(), config.backoff_factor, config.max_delay())
    }

    /// Number of delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Delay to wait before the next retry; the one after grows by the factor
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.attempt += 1;
        self.delay = delay.mul_f64(self.factor).min(self.max);
        delay
    }

    /// Start over at the initial delay
    pub fn reset(&mut self) {
        self.delay = self.initial.min(self.max);
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&ReaderConfig::default())
    }
}
