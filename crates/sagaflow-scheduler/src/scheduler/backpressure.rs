//! Load-aware task acceptance, so a burst of due jobs doesn't overrun
//! `max_concurrent_activities`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackpressureConfig {
    pub high_watermark: f64,
    pub low_watermark: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_watermark: 0.9,
            low_watermark: 0.7,
        }
    }
}

/// Tracks current load and decides, with hysteresis, when the poller should
/// stop pulling new jobs and when it may resume.
pub struct BackpressureState {
    config: BackpressureConfig,
    current_load: AtomicUsize,
    capacity: usize,
    accepting: AtomicBool,
}

impl BackpressureState {
    pub fn new(config: BackpressureConfig, capacity: usize) -> Self {
        Self {
            config,
            current_load: AtomicUsize::new(0),
            capacity,
            accepting: AtomicBool::new(true),
        }
    }

    pub fn should_accept(&self) -> bool {
        let accepting = self.accepting.load(Ordering::Relaxed);
        let ratio = self.load_ratio();

        if accepting {
            if ratio >= self.config.high_watermark {
                self.accepting.store(false, Ordering::Relaxed);
                return false;
            }
            true
        } else if ratio <= self.config.low_watermark {
            self.accepting.store(true, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn load_ratio(&self) -> f64 {
        self.current_load.load(Ordering::Relaxed) as f64 / self.capacity.max(1) as f64
    }

    pub fn available_slots(&self) -> usize {
        self.capacity.saturating_sub(self.current_load.load(Ordering::Relaxed))
    }

    pub fn task_started(&self) {
        self.current_load.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_completed(&self) {
        self.current_load.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn current_load(&self) -> usize {
        self.current_load.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_below_high_watermark() {
        let state = BackpressureState::new(BackpressureConfig::default(), 10);
        assert!(state.should_accept());
    }

    #[test]
    fn hysteresis_prevents_oscillation() {
        let config = BackpressureConfig {
            high_watermark: 0.8,
            low_watermark: 0.5,
        };
        let state = BackpressureState::new(config, 10);
        for _ in 0..8 {
            state.task_started();
        }
        assert!(!state.should_accept());

        state.task_completed();
        assert!(!state.should_accept(), "70% load is between watermarks, still paused");

        for _ in 0..2 {
            state.task_completed();
        }
        assert!(state.should_accept());
    }
}
