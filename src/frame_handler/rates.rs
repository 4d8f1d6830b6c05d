//! Frame-rate checkpoints
//!
//! Input, output and delivery streams each keep an independent checkpoint
//! of (frame number, start time). Once at least a second of reference time
//! has elapsed since the checkpoint, the observed rate is recomputed and
//! the checkpoint advances.

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::Mutex;

use crate::constants::{FRAME_RATE_SCALE_FACTOR, UNITS};
use crate::util::mul_div;

#[derive(Default)]
struct Checkpoint {
    frame_nb: i32,
    start_time: i64,
}

/// One stream's rate tracker. The current rate is scaled by
/// [`FRAME_RATE_SCALE_FACTOR`].
#[derive(Default)]
pub struct FrameRates {
    checkpoint: Mutex<Checkpoint>,
    current: AtomicI32,
}

impl FrameRates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame's number and start time.
    pub fn refresh(&self, frame_nb: i32, start_time: i64) {
        let mut checkpoint = self.checkpoint.lock();

        if frame_nb == 0 {
            checkpoint.frame_nb = 0;
            checkpoint.start_time = start_time;
            return;
        }

        let elapsed = start_time - checkpoint.start_time;
        if elapsed >= UNITS {
            let rate = mul_div(
                (frame_nb - checkpoint.frame_nb) as i64 * FRAME_RATE_SCALE_FACTOR,
                UNITS,
                elapsed,
            );
            self.current.store(rate as i32, Ordering::Relaxed);
            checkpoint.frame_nb = frame_nb;
            checkpoint.start_time = start_time;
        }
    }

    /// The last computed rate, scaled by [`FRAME_RATE_SCALE_FACTOR`];
    /// 0 until a full second has been observed.
    pub fn current(&self) -> i32 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        let mut checkpoint = self.checkpoint.lock();
        checkpoint.frame_nb = 0;
        checkpoint.start_time = 0;
        self.current.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_after_one_second_of_frames() {
        let rates = FrameRates::new();
        // 25 fps: one frame every 400_000 units
        for frame_nb in 0..=25 {
            rates.refresh(frame_nb, frame_nb as i64 * 400_000);
        }
        assert_eq!(rates.current(), 25_000);
    }

    #[test]
    fn test_no_rate_before_one_second() {
        let rates = FrameRates::new();
        for frame_nb in 0..10 {
            rates.refresh(frame_nb, frame_nb as i64 * 400_000);
        }
        assert_eq!(rates.current(), 0);
    }

    #[test]
    fn test_fractional_rate() {
        let rates = FrameRates::new();
        // 23.976 fps
        let duration = UNITS * 1001 / 24_000;
        let mut frame_nb = 0;
        let mut time = 0;
        while time < 2 * UNITS {
            rates.refresh(frame_nb, time);
            frame_nb += 1;
            time += duration;
        }
        let rate = rates.current();
        assert!((23_900..=24_000).contains(&rate), "rate {rate}");
    }

    #[test]
    fn test_reset_clears_rate() {
        let rates = FrameRates::new();
        for frame_nb in 0..=30 {
            rates.refresh(frame_nb, frame_nb as i64 * 400_000);
        }
        assert_ne!(rates.current(), 0);
        rates.reset();
        assert_eq!(rates.current(), 0);
    }
}
