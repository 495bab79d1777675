//!
//! src/pacing.rs
//!
//! Minimum spacing between outbound calls
//!

use std::time::Duration;

use tokio::time::{sleep, Instant};

#[derive(Debug)]
pub struct RateGate {
    min_interval: Duration,
    last: Option<Instant>
}

impl RateGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: None }
    }

    /// Waits until `min_interval` has passed since the previous call.
    /// The first call never waits.
    pub async fn wait(&mut self) {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_passes_then_spaces_out() {
        let mut gate = RateGate::new(Duration::from_secs(1));
        let start = Instant::now();

        gate.wait().await;
        assert!(start.elapsed() < Duration::from_millis(10));

        gate.wait().await;
        gate.wait().await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_interval_never_sleeps() {
        let mut gate = RateGate::new(Duration::ZERO);
        let start = std::time::Instant::now();
        for _ in 0..5 {
            gate.wait().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
