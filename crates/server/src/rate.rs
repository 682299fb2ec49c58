//! Multi-window rate budgets
//!
//! A budget is a list of `(max, windowSeconds)` pairs; a message is admitted
//! only when every window still has room. Sliding windows over message
//! timestamps, pruned as they age out, so a budget of `[(10, 1), (100, 60)]`
//! caps both burst and sustained rates.

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tessera_core::error::{Result, TesseraError};

struct Window {
    max: u32,
    length: Duration,
    stamps: VecDeque<Instant>,
}

/// Sliding-window admission control for one direction of one connection
pub struct RateBudget {
    windows: Vec<Window>,
}

impl RateBudget {
    /// Build from `(max, windowSeconds)` pairs; an empty list admits everything
    pub fn new(pairs: &[(u32, u64)]) -> Self {
        RateBudget {
            windows: pairs
                .iter()
                .map(|(max, secs)| Window {
                    max: *max,
                    length: Duration::from_secs(*secs),
                    stamps: VecDeque::new(),
                })
                .collect(),
        }
    }

    /// Admit one message at `now`, or reject with `RateLimited`
    pub fn admit(&mut self, now: Instant) -> Result<()> {
        for window in &mut self.windows {
            while let Some(front) = window.stamps.front() {
                if now.duration_since(*front) >= window.length {
                    window.stamps.pop_front();
                } else {
                    break;
                }
            }
            if window.stamps.len() >= window.max as usize {
                return Err(TesseraError::RateLimited {
                    max: window.max,
                    window_secs: window.length.as_secs(),
                });
            }
        }
        for window in &mut self.windows {
            window.stamps.push_back(now);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_budget_admits_everything() {
        let mut b = RateBudget::new(&[]);
        let now = Instant::now();
        for _ in 0..1000 {
            b.admit(now).unwrap();
        }
    }

    #[test]
    fn test_single_window_caps_burst() {
        let mut b = RateBudget::new(&[(3, 10)]);
        let now = Instant::now();
        for _ in 0..3 {
            b.admit(now).unwrap();
        }
        let err = b.admit(now).unwrap_err();
        assert_eq!(err.code(), "RateLimited");
    }

    #[test]
    fn test_window_slides() {
        let mut b = RateBudget::new(&[(2, 1)]);
        let t0 = Instant::now();
        b.admit(t0).unwrap();
        b.admit(t0).unwrap();
        assert!(b.admit(t0).is_err());
        // A second later the window has slid past both stamps
        let t1 = t0 + Duration::from_secs(1);
        b.admit(t1).unwrap();
    }

    #[test]
    fn test_all_windows_must_admit() {
        // Burst window allows 5/sec, sustained allows 6/minute
        let mut b = RateBudget::new(&[(5, 1), (6, 60)]);
        let t0 = Instant::now();
        for _ in 0..5 {
            b.admit(t0).unwrap();
        }
        // Burst window full
        assert!(b.admit(t0).is_err());
        let t1 = t0 + Duration::from_secs(2);
        b.admit(t1).unwrap();
        // Sustained window now full (6 total inside the minute)
        assert!(b.admit(t1 + Duration::from_millis(1)).is_err());
    }

    #[test]
    fn test_rejected_message_consumes_no_budget() {
        let mut b = RateBudget::new(&[(1, 1), (2, 60)]);
        let t0 = Instant::now();
        b.admit(t0).unwrap();
        assert!(b.admit(t0).is_err()); // rejected by the burst window
        // The rejection did not consume the sustained window
        let t1 = t0 + Duration::from_secs(1);
        b.admit(t1).unwrap();
        assert!(b.admit(t1 + Duration::from_secs(1)).is_err());
    }
}
