//! Sample-rate synchronization over a jittery BLE source.
//!
//! BLE notifications arrive in bursts, but downstream consumers (the
//! recorder in particular) need exactly one sample per nominal
//! interval. The synchronizer keeps a watermark of the next expected
//! emission time on a steady clock and pads gaps with zero rows; it
//! never drops a real sample to catch up.

use std::time::{Duration, Instant};

/// Gap-filling synchronizer for a fixed sampling rate.
///
/// The caller supplies the clock reading, which keeps the discipline
/// deterministic under test.
#[derive(Debug)]
pub struct SampleSynchronizer {
    interval: Duration,
    watermark: Option<Instant>,
}

impl SampleSynchronizer {
    pub fn new(sampling_rate: usize) -> Self {
        SampleSynchronizer {
            interval: Duration::from_secs_f64(1.0 / sampling_rate as f64),
            watermark: None,
        }
    }

    /// Accept one sample row observed at `now` and return the rows to
    /// emit: zero or more gap-fill rows followed by the sample itself.
    ///
    /// The watermark is seeded on the first call and advanced by one
    /// interval before the comparison, so the very first sample is
    /// reported one interval late. The watermark only ever moves
    /// forward.
    pub fn synchronize(&mut self, row: &[f64], now: Instant) -> Vec<Vec<f64>> {
        let watermark = self.watermark.get_or_insert(now);
        *watermark += self.interval;

        let mut emitted = Vec::with_capacity(1);
        if *watermark >= now {
            emitted.push(row.to_vec());
        } else {
            while *watermark < now {
                *watermark += self.interval;
                emitted.push(vec![0.0; row.len()]);
            }
            emitted.push(row.to_vec());
        }

        emitted
    }

    /// Forget the watermark; the next call reseeds it. Invoked on
    /// disconnect and at every recording start.
    pub fn reset(&mut self) {
        self.watermark = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn on_time_samples_pass_through_one_to_one() {
        let mut sync = SampleSynchronizer::new(125);
        let t0 = Instant::now();

        for i in 0..10u32 {
            let emitted = sync.synchronize(&[1.0, 2.0], t0 + i * 8 * MS);
            assert_eq!(emitted, vec![vec![1.0, 2.0]], "sample {}", i);
        }
    }

    #[test]
    fn gap_is_zero_filled() {
        // At 125 Hz (T = 8 ms): one sample at t=0, silence for 25 ms,
        // then one sample. The gap yields two zero rows, four rows in
        // total.
        let mut sync = SampleSynchronizer::new(125);
        let t0 = Instant::now();

        let first = sync.synchronize(&[5.0], t0);
        assert_eq!(first, vec![vec![5.0]]);

        let second = sync.synchronize(&[7.0], t0 + 25 * MS);
        assert_eq!(second, vec![vec![0.0], vec![0.0], vec![7.0]]);
    }

    #[test]
    fn reset_reseeds_the_watermark() {
        let mut sync = SampleSynchronizer::new(125);
        let t0 = Instant::now();

        sync.synchronize(&[1.0], t0);
        sync.reset();

        // After a long pause the reseeded watermark starts from the
        // new clock reading, so no gap is reported.
        let emitted = sync.synchronize(&[2.0], t0 + 1000 * MS);
        assert_eq!(emitted, vec![vec![2.0]]);
    }

    #[test]
    fn burst_arrivals_are_not_dropped() {
        // Ten samples delivered at the same instant: the watermark
        // runs ahead of the clock and each sample is emitted exactly
        // once.
        let mut sync = SampleSynchronizer::new(125);
        let t0 = Instant::now();

        let mut total = 0;
        for _ in 0..10 {
            total += sync.synchronize(&[3.0], t0).len();
        }
        assert_eq!(total, 10);
    }
}
