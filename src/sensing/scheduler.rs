use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub type TickFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type TickCallback = Arc<dyn Fn() -> TickFuture + Send + Sync + 'static>;

/// Handle to a repeating schedule. Cancelling is idempotent; dropping the handle does not
/// cancel.
#[derive(Debug, Clone)]
pub struct ScheduledTick {
    token: CancellationToken,
}

impl ScheduledTick {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Source of the capture cadence. The first callback fires one full interval after
/// scheduling; callers that need an immediate run do it themselves.
pub trait Scheduler: Send + Sync {
    fn schedule_repeating(&self, interval: Duration, callback: TickCallback) -> ScheduledTick;
}

/// Wall-clock scheduler backed by a tokio interval.
#[derive(Debug, Default, Clone)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, interval: Duration, callback: TickCallback) -> ScheduledTick {
        let handle = ScheduledTick::new();
        let token = handle.token.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // A tick that races cancellation still gets to finish.
                        callback().await;
                    }
                    _ = token.cancelled() => break,
                }
            }
        });

        handle
    }
}

/// Scheduler driven by hand, for deterministic tests and replay tools.
#[derive(Default, Clone)]
pub struct ManualScheduler {
    entries: Arc<Mutex<Vec<(Duration, TickCallback, ScheduledTick)>>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires every live schedule once, in registration order, awaiting each callback.
    pub async fn tick(&self) -> usize {
        let callbacks: Vec<TickCallback> = {
            let mut entries = self.lock();
            entries.retain(|(_, _, handle)| !handle.is_cancelled());
            entries.iter().map(|(_, cb, _)| Arc::clone(cb)).collect()
        };

        for callback in &callbacks {
            callback().await;
        }
        callbacks.len()
    }

    pub fn active_count(&self) -> usize {
        self.lock()
            .iter()
            .filter(|(_, _, handle)| !handle.is_cancelled())
            .count()
    }

    pub fn intervals(&self) -> Vec<Duration> {
        self.lock()
            .iter()
            .filter(|(_, _, handle)| !handle.is_cancelled())
            .map(|(interval, _, _)| *interval)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Duration, TickCallback, ScheduledTick)>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, interval: Duration, callback: TickCallback) -> ScheduledTick {
        let handle = ScheduledTick::new();
        self.lock().push((interval, callback, handle.clone()));
        handle
    }
}
