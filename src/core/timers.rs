//! Timer subsystem
//!
//! Each timer kind has at most one armed instance. Arming a kind cancels the
//! previous instance; expirations are posted to the dispatcher as
//! [`Event::Timer`] and carry a generation so late deliveries can be told apart
//! from the live timer.

use std::{collections::HashMap, time::Duration};

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::trace;

use crate::core::dispatcher::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Periodic rescan while idle
    Scan,
    /// Bound on how long a connection attempt may stay pending
    Pending,
    /// Grace period for the station process to recover a dropped link
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    pub generation: u64,
}

#[derive(Debug)]
struct ArmedTimer {
    generation: u64,
    task: JoinHandle<()>,
}

/// Owner of all controller timers
#[derive(Debug)]
pub struct Timers {
    events: mpsc::UnboundedSender<Event>,
    armed: HashMap<TimerKind, ArmedTimer>,
    next_generation: u64,
}

impl Timers {
    pub fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            events,
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm `kind` to fire after `after`, replacing any armed instance
    pub fn start(&mut self, kind: TimerKind, after: Duration) {
        self.stop(kind);
        self.next_generation += 1;
        let generation = self.next_generation;

        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(Event::Timer(TimerFired { kind, generation }));
        });

        trace!(?kind, ?after, generation, "timer armed");
        self.armed.insert(kind, ArmedTimer { generation, task });
    }

    /// Cancel `kind`; returns whether it was armed
    pub fn stop(&mut self, kind: TimerKind) -> bool {
        match self.armed.remove(&kind) {
            Some(timer) => {
                timer.task.abort();
                trace!(?kind, generation = timer.generation, "timer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    /// Claim an expiration; false when the timer was stopped or re-armed since
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        match self.armed.get(&fired.kind) {
            Some(timer) if timer.generation == fired.generation => {
                self.armed.remove(&fired.kind);
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.armed.drain() {
            timer.task.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Cadence of the periodic scan timer
///
/// After a disconnect or resume the first few scans run at the fast interval.
#[derive(Debug, Clone)]
pub struct ScanSchedule {
    attempts: u32,
    remaining: u32,
    fast_interval: Duration,
}

impl ScanSchedule {
    pub fn new(attempts: u32, fast_interval: Duration) -> Self {
        Self {
            attempts,
            remaining: attempts,
            fast_interval,
        }
    }

    pub fn restart(&mut self) {
        self.remaining = self.attempts;
    }

    pub fn consume(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Delay until the next periodic scan; `None` when periodic scanning is off
    pub fn interval(&self, scan_interval_secs: u16) -> Option<Duration> {
        if scan_interval_secs == 0 {
            None
        } else if self.remaining > 0 {
            Some(self.fast_interval)
        } else {
            Some(Duration::from_secs(u64::from(scan_interval_secs)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Instant, timeout};

    fn fired(event: Event) -> TimerFired {
        match event {
            Event::Timer(fired) => fired,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);

        let started = Instant::now();
        timers.start(TimerKind::Pending, Duration::from_secs(15));
        let event = fired(rx.recv().await.unwrap());

        assert_eq!(event.kind, TimerKind::Pending);
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert!(timers.accept(event));
        assert!(!timers.is_armed(TimerKind::Pending));
        assert!(!timers.accept(event));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_supersedes_previous_instance() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);

        timers.start(TimerKind::Scan, Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(5)).await;
        timers.start(TimerKind::Scan, Duration::from_secs(10));

        let started = Instant::now();
        let event = fired(rx.recv().await.unwrap());
        assert_eq!(started.elapsed(), Duration::from_secs(10));
        assert!(timers.accept(event));

        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);

        timers.start(TimerKind::Reconnect, Duration::from_secs(10));
        assert!(timers.stop(TimerKind::Reconnect));
        assert!(!timers.stop(TimerKind::Reconnect));

        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_expiration_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);

        timers.start(TimerKind::Pending, Duration::from_secs(15));
        let stale = TimerFired {
            kind: TimerKind::Pending,
            generation: 0,
        };
        assert!(!timers.accept(stale));
        assert!(timers.is_armed(TimerKind::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_and_drop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx.clone());
        timers.start(TimerKind::Scan, Duration::from_secs(1));
        timers.start(TimerKind::Pending, Duration::from_secs(1));
        timers.cancel_all();
        assert!(!timers.is_armed(TimerKind::Scan));

        timers.start(TimerKind::Reconnect, Duration::from_secs(1));
        drop(timers);

        assert!(timeout(Duration::from_secs(60), rx.recv()).await.is_err());
        drop(tx);
    }

    #[test]
    fn test_scan_schedule_fast_then_slow() {
        let mut schedule = ScanSchedule::new(3, Duration::from_secs(10));
        for _ in 0..3 {
            assert_eq!(schedule.interval(180), Some(Duration::from_secs(10)));
            schedule.consume();
        }
        assert_eq!(schedule.interval(180), Some(Duration::from_secs(180)));

        schedule.consume();
        assert_eq!(schedule.remaining(), 0);

        schedule.restart();
        assert_eq!(schedule.remaining(), 3);
        assert_eq!(schedule.interval(0), None);
    }
}
