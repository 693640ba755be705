//! Tick sources and the cancellable repeating task.
//!
//! The frame loop is a task bound to a [`TickSource`], one cycle per tick.
//! [`IntervalTicks`] stands in for the host's display callback at a fixed
//! refresh rate; [`ManualTicks`] is the fake clock tests drive by hand.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use senga_core::error::{EngineError, Result};

/// One scheduling tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    /// Zero-based tick number.
    pub index: u64,
    /// Monotonic time since the tick source started.
    pub elapsed: Duration,
}

impl Tick {
    pub fn seconds(&self) -> f32 {
        self.elapsed.as_secs_f32()
    }
}

#[async_trait]
pub trait TickSource: Send {
    /// Wait for the next tick.  `None` ends the loop.
    async fn next_tick(&mut self) -> Option<Tick>;
}

// ─── Interval ────────────────────────────────────────────────────────────────

/// Fixed-rate ticks.  Late ticks are skipped, not bunched up.
pub struct IntervalTicks {
    interval: Interval,
    start: Instant,
    index: u64,
    limit: Option<u64>,
}

impl IntervalTicks {
    /// # Errors
    ///
    /// [`EngineError::Config`] if `hz` is not a positive finite rate.
    pub fn new(hz: f64) -> Result<Self> {
        if !(hz.is_finite() && hz > 0.0) {
            return Err(EngineError::Config(format!(
                "refresh rate must be positive, got {hz}"
            )));
        }
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / hz));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Ok(Self {
            interval,
            start: Instant::now(),
            index: 0,
            limit: None,
        })
    }

    /// Stop after `n` ticks.
    pub fn with_limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    async fn next_tick(&mut self) -> Option<Tick> {
        if self.limit.is_some_and(|n| self.index >= n) {
            return None;
        }
        let at = self.interval.tick().await;
        let tick = Tick {
            index: self.index,
            elapsed: at.saturating_duration_since(self.start),
        };
        self.index += 1;
        Some(tick)
    }
}

// ─── Manual ──────────────────────────────────────────────────────────────────

/// Drives a [`ManualTicks`].  Dropping every clock ends the tick stream.
#[derive(Clone, Debug)]
pub struct ManualClock {
    tx: mpsc::UnboundedSender<Duration>,
}

impl ManualClock {
    /// Advance time by `dt` and emit one tick.  Returns `false` once the
    /// tick source is gone.
    pub fn advance(&self, dt: Duration) -> bool {
        self.tx.send(dt).is_ok()
    }
}

/// Fake clock tick source.
#[derive(Debug)]
pub struct ManualTicks {
    rx: mpsc::UnboundedReceiver<Duration>,
    index: u64,
    elapsed: Duration,
}

/// Create a linked clock and tick source.
pub fn manual_ticks() -> (ManualClock, ManualTicks) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ManualClock { tx },
        ManualTicks {
            rx,
            index: 0,
            elapsed: Duration::ZERO,
        },
    )
}

impl ManualTicks {
    /// Synthesize the next tick without going through a clock.
    pub fn step(&mut self, dt: Duration) -> Tick {
        self.elapsed += dt;
        let tick = Tick {
            index: self.index,
            elapsed: self.elapsed,
        };
        self.index += 1;
        tick
    }
}

#[async_trait]
impl TickSource for ManualTicks {
    async fn next_tick(&mut self) -> Option<Tick> {
        let dt = self.rx.recv().await?;
        Some(self.step(dt))
    }
}

// ─── Repeating task ──────────────────────────────────────────────────────────

/// Invoke `on_tick` once per tick until `cancel` fires or the source ends.
/// Returns the number of ticks delivered.
///
/// Cancellation is checked first on every iteration, so no tick is
/// delivered after `cancel()` returns.
pub async fn run_repeating<T, F>(ticks: &mut T, cancel: &CancellationToken, mut on_tick: F) -> u64
where
    T: TickSource + ?Sized,
    F: FnMut(Tick) + Send,
{
    let mut delivered = 0u64;
    loop {
        let tick = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(delivered, "Repeating task cancelled");
                break;
            }
            tick = ticks.next_tick() => tick,
        };
        let Some(tick) = tick else {
            debug!(delivered, "Tick source exhausted");
            break;
        };
        on_tick(tick);
        delivered += 1;
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_ticks_accumulate_elapsed_time() {
        let (clock, mut ticks) = manual_ticks();
        assert!(clock.advance(Duration::from_millis(16)));
        assert!(clock.advance(Duration::from_millis(17)));
        drop(clock);

        let a = ticks.next_tick().await.expect("first tick");
        let b = ticks.next_tick().await.expect("second tick");
        assert_eq!((a.index, a.elapsed), (0, Duration::from_millis(16)));
        assert_eq!((b.index, b.elapsed), (1, Duration::from_millis(33)));
        assert!(ticks.next_tick().await.is_none());
    }

    #[tokio::test]
    async fn repeating_task_stops_when_source_ends() {
        let (clock, mut ticks) = manual_ticks();
        for _ in 0..5 {
            clock.advance(Duration::from_millis(10));
        }
        drop(clock);

        let mut seen = Vec::new();
        let n = run_repeating(&mut ticks, &CancellationToken::new(), |t| seen.push(t.index)).await;
        assert_eq!(n, 5);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn cancelled_task_delivers_nothing() {
        let (clock, mut ticks) = manual_ticks();
        clock.advance(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let n = run_repeating(&mut ticks, &cancel, |_| panic!("tick after cancel")).await;
        assert_eq!(n, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_ticks_respect_limit() {
        let mut ticks = IntervalTicks::new(60.0).expect("valid rate").with_limit(3);
        let mut count = 0;
        while ticks.next_tick().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn interval_rejects_non_positive_rate() {
        assert!(IntervalTicks::new(0.0).is_err());
        assert!(IntervalTicks::new(f64::NAN).is_err());
    }
}
