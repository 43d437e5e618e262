use std::collections::VecDeque;

use crate::domain::models::ProgressSnapshot;

/// Number of instantaneous rates averaged into the reported speed.
const WINDOW: usize = 4;

/// Turns successive progress snapshots into a bytes per second estimate.
#[derive(Debug, Default)]
pub struct SpeedEstimator {
    last: Option<ProgressSnapshot>,
    rates: VecDeque<f64>,
}

impl SpeedEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every sample and start measuring from ``snapshot``.
    pub fn reset(&mut self, snapshot: ProgressSnapshot) {
        self.last = Some(snapshot);
        self.rates.clear();
    }

    /// Feed a new snapshot and return the smoothed speed in bytes per second.
    ///
    /// A snapshot with fewer bytes than the previous one counts as zero rate,
    /// a snapshot taken at the same instant is ignored.
    pub fn sample(&mut self, snapshot: ProgressSnapshot) -> f64 {
        let Some(last) = self.last else {
            self.last = Some(snapshot);
            return self.speed();
        };
        let elapsed = snapshot.at.saturating_duration_since(last.at).as_secs_f64();
        if elapsed <= 0.0 {
            return self.speed();
        }
        let delta = snapshot.bytes.saturating_sub(last.bytes) as f64;
        if self.rates.len() == WINDOW {
            self.rates.pop_front();
        }
        self.rates.push_back(delta / elapsed);
        self.last = Some(snapshot);
        self.speed()
    }

    pub fn speed(&self) -> f64 {
        if self.rates.is_empty() {
            return 0.0;
        }
        (self.rates.iter().sum::<f64>() / self.rates.len() as f64).max(0.0)
    }

    /// Seconds left for ``total - downloaded`` bytes at the current speed, rounded up.
    /// ``None`` while the speed is zero or the total is unknown.
    pub fn eta(&self, total: Option<u64>, downloaded: u64) -> Option<u64> {
        let total = total?;
        let speed = self.speed();
        if speed <= 0.0 {
            return None;
        }
        let remaining = total.saturating_sub(downloaded) as f64;
        Some((remaining / speed).ceil() as u64)
    }
}
