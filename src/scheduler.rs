//! Periodic trigger with a single worker slot.
//!
//! The next wait is armed only after the previous tick has run to
//! completion and its report has been published, so ticks can never
//! overlap.  A tick that outlasts the interval is followed immediately by
//! the next one; missed firings are not queued.

use std::future::Future;
use std::time::Duration;

use log::info;
use tokio::time::{sleep_until, Instant};

use crate::engine::Engine;
use crate::notifier::Notifier;
use crate::runtime::ContainerRuntime;

pub struct Scheduler<R, N> {
    engine: Engine<R, N>,
    interval: Duration,
}

impl<R: ContainerRuntime, N: Notifier> Scheduler<R, N> {
    pub fn new(engine: Engine<R, N>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    #[cfg(test)]
    pub fn engine(&self) -> &Engine<R, N> {
        &self.engine
    }

    /// Runs ticks until `shutdown` resolves and returns how many ran.
    ///
    /// The first tick starts immediately.  Shutdown is only observed between
    /// ticks; an in-flight reconciliation is never interrupted.
    pub async fn run<F: Future<Output = ()>>(&self, shutdown: F) -> u64 {
        tokio::pin!(shutdown);
        let mut ticks = 0;

        loop {
            let started = Instant::now();
            // Errors are already reported through the tick report.
            let _ = self.engine.run_once().await;
            ticks += 1;

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested after {} checks", ticks);
                    return ticks;
                }
                _ = sleep_until(started + self.interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::notifier::RecordingNotifier;
    use crate::runtime::mock::MockRuntime;
    use std::sync::Arc;
    use tokio::time::sleep;

    fn scheduler(runtime: MockRuntime) -> Scheduler<MockRuntime, RecordingNotifier> {
        let engine = Engine::new(
            runtime,
            RecordingNotifier::default(),
            Arc::new(Config::default()),
        );
        Scheduler::new(engine, Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_a_fixed_interval_starting_immediately() {
        let scheduler = scheduler(MockRuntime::new());
        let ticks = scheduler.run(sleep(Duration::from_secs(95))).await;

        // t = 0, 30, 60, 90
        assert_eq!(ticks, 4);
        assert_eq!(
            scheduler.engine().runtime().calls_starting_with("list").len(),
            4
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ticks_run_back_to_back_without_overlap() {
        let runtime = MockRuntime::new().with_list_delay(Duration::from_secs(45));
        let scheduler = scheduler(runtime);
        let ticks = scheduler.run(sleep(Duration::from_secs(100))).await;

        // t = 0..45, 45..90, 90..135; the shutdown is seen after the third
        assert_eq!(ticks, 3);
        assert_eq!(
            scheduler.engine().runtime().max_concurrent_lists(),
            1
        );
    }
}
