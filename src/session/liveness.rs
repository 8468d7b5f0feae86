//! Liveness Supervisor
//!
//! Every inbound message refreshes a last-seen stamp. A periodic check fires
//! every `timeout` seconds, the first one after `2 x timeout`, and reports a
//! breach once the device has been silent for longer than `max`. A breach
//! stops the supervisor; the next registration starts it again.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::config::ActivityTimeout;
use crate::utils::time::format_last_seen;

/// Sleep-mode devices with a shorter window than this tend to flap.
pub const SLEEP_MODE_MIN_TIMEOUT: u8 = 30;

pub type BreachHandler = Box<dyn Fn(String) + Send + Sync>;

#[derive(Debug)]
struct LastSeen {
    at: Instant,
    wall: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    last_seen: LastSeen,
    window: Option<ActivityTimeout>,
    task: Option<JoinHandle<()>>,
}

/// One per session.
#[derive(Debug, Clone)]
pub struct LivenessSupervisor {
    inner: Arc<Mutex<Inner>>,
}

impl Default for LivenessSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessSupervisor {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                last_seen: LastSeen {
                    at: Instant::now(),
                    wall: Utc::now(),
                },
                window: None,
                task: None,
            })),
        }
    }

    /// Record an inbound message.
    pub fn touch(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.last_seen = LastSeen {
                at: Instant::now(),
                wall: Utc::now(),
            };
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.task.as_ref().is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Arm the periodic check. A no-op when already running.
    pub fn start(&self, window: ActivityTimeout, sleep_mode: bool, on_breach: BreachHandler) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!(timeout = window.timeout, "Liveness supervisor already running");
            return;
        }
        if sleep_mode && window.timeout < SLEEP_MODE_MIN_TIMEOUT {
            warn!(
                timeout = window.timeout,
                minimum = SLEEP_MODE_MIN_TIMEOUT,
                "Sleep-mode device has a short activity timeout; expect online/offline flapping"
            );
        }

        let now = Instant::now();
        inner.last_seen = LastSeen {
            at: now,
            wall: Utc::now(),
        };
        inner.window = Some(window);

        let period = window.timeout_duration().max(Duration::from_secs(1));
        let weak = Arc::downgrade(&self.inner);
        inner.task = Some(tokio::spawn(run_checks(weak, now + period * 2, period, on_breach)));
        debug!(
            timeout = window.timeout,
            min = window.min,
            max = window.max,
            "Liveness supervisor started"
        );
    }

    /// Disarm. Safe to call repeatedly.
    pub fn stop(&self) {
        let task = match self.inner.lock() {
            Ok(mut inner) => {
                inner.window = None;
                inner.task.take()
            }
            Err(_) => None,
        };
        if let Some(task) = task {
            task.abort();
            debug!("Liveness supervisor stopped");
        }
    }

    /// Evaluate the window at `now`. Returns the offline reason on breach.
    pub fn check(&self, now: Instant) -> Option<String> {
        let inner = self.inner.lock().ok()?;
        check_inner(&inner, now)
    }
}

fn check_inner(inner: &Inner, now: Instant) -> Option<String> {
    let window = inner.window?;
    let silent = now.saturating_duration_since(inner.last_seen.at);
    if silent > window.max_duration() {
        Some(format!(
            "No message from device for {}s (limit {}s), last seen {}",
            silent.as_secs(),
            window.max,
            format_last_seen(inner.last_seen.wall)
        ))
    } else {
        None
    }
}

async fn run_checks(
    inner: Weak<Mutex<Inner>>,
    first: Instant,
    period: Duration,
    on_breach: BreachHandler,
) {
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        let tick = ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let breach = {
            let Ok(mut guard) = inner.lock() else {
                return;
            };
            let breach = check_inner(&guard, tick);
            if breach.is_some() {
                guard.window = None;
                // Leave the handle in place; the task is about to finish.
            }
            breach
        };
        if let Some(reason) = breach {
            warn!(%reason, "Liveness window exceeded");
            on_breach(reason);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, BreachHandler) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        (hits, Box::new(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn silent_device_breaches_at_first_check() {
        let sup = LivenessSupervisor::new();
        let (hits, handler) = counter();
        sup.start(ActivityTimeout::default(), false, handler);

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!sup.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn message_resets_the_clock() {
        let sup = LivenessSupervisor::new();
        let (hits, handler) = counter();
        sup.start(ActivityTimeout::default(), false, handler);

        tokio::time::sleep(Duration::from_secs(11)).await;
        sup.touch();
        // checks at 20 (9s silent) pass; the one at 30 (19s silent) breaches
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(8)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_is_repeatable() {
        let sup = LivenessSupervisor::new();
        let (hits, first) = counter();
        let (other, second) = counter();
        sup.start(ActivityTimeout::default(), false, first);
        sup.start(ActivityTimeout::default(), false, second);
        sup.stop();
        sup.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(other.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn check_reports_elapsed_seconds() {
        let sup = LivenessSupervisor::new();
        sup.start(ActivityTimeout::default(), true, Box::new(|_| {}));
        let reason = sup
            .check(Instant::now() + Duration::from_secs(13))
            .expect("breach");
        assert!(reason.contains("13s"), "{reason}");
        assert!(sup.check(Instant::now() + Duration::from_secs(12)).is_none());
        sup.stop();
    }
}
