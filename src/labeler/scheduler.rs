//! Inter-cycle scheduling

use std::time::Duration;

use async_trait::async_trait;

/// Paces the reconciliation loop between cycles
#[async_trait]
pub trait Ticker: Send {
    /// Resolve when the next cycle may start
    async fn tick(&mut self);
}

/// Sleeps a fixed period after each cycle completes.
///
/// The end of one cycle and the start of the next are always a full period
/// apart, however long the cycle took. Runs on the tokio clock.
#[derive(Clone, Debug)]
pub struct SleepTicker {
    period: Duration,
}

impl SleepTicker {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

#[async_trait]
impl Ticker for SleepTicker {
    async fn tick(&mut self) {
        tokio::time::sleep(self.period).await;
    }
}
