//! Virtual clock used to drive sessions on simulated time.

use std::time::Duration;

use tracing::trace;
use water_rush_core::{
    Command, Event, MilestoneStore, RandomSource, Scheduler, Timer, TimerHandle,
};

use crate::{apply, Ports, Session};

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug)]
struct PendingTimer {
    handle: TimerHandle,
    due: Duration,
    sequence: u64,
    period: Option<Duration>,
    timer: Timer,
}

/// Deterministic [`Scheduler`] whose time only moves when told to.
///
/// Due timers are released one at a time in order of due time, ties broken by
/// scheduling order. Repeating timers are re-armed as they are released.
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: Duration,
    next_handle: u64,
    next_sequence: u64,
    pending: Vec<PendingTimer>,
}

impl VirtualClock {
    /// Creates a clock at time zero with nothing scheduled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of timers waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Releases the earliest timer due at or before `deadline`, moving the
    /// clock to its due time.
    pub fn next_due(&mut self, deadline: Duration) -> Option<Timer> {
        let position = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, pending)| pending.due <= deadline)
            .min_by_key(|(_, pending)| (pending.due, pending.sequence))
            .map(|(position, _)| position)?;

        let sequence = self.bump_sequence();
        let entry = self.pending[position];
        self.now = self.now.max(entry.due);

        match entry.period {
            Some(period) => {
                let rearmed = &mut self.pending[position];
                rearmed.due = entry.due.saturating_add(period);
                rearmed.sequence = sequence;
            }
            None => {
                let _ = self.pending.remove(position);
            }
        }

        Some(entry.timer)
    }

    /// Moves the clock forward to `deadline` without releasing anything.
    pub fn settle(&mut self, deadline: Duration) {
        self.now = self.now.max(deadline);
    }

    fn bump_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        sequence
    }

    fn insert(&mut self, delay: Duration, period: Option<Duration>, timer: Timer) -> TimerHandle {
        let handle = TimerHandle::new(self.next_handle);
        self.next_handle = self.next_handle.wrapping_add(1);
        let sequence = self.bump_sequence();
        self.pending.push(PendingTimer {
            handle,
            due: self.now.saturating_add(delay),
            sequence,
            period,
            timer,
        });
        handle
    }
}

impl Scheduler for VirtualClock {
    fn schedule_once(&mut self, delay: Duration, timer: Timer) -> TimerHandle {
        self.insert(delay, None, timer)
    }

    fn schedule_repeating(&mut self, period: Duration, timer: Timer) -> TimerHandle {
        let period = period.max(MIN_PERIOD);
        self.insert(period, Some(period), timer)
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.retain(|pending| pending.handle != handle);
    }

    fn now(&self) -> Duration {
        self.now
    }
}

/// Advances `clock` by `dt`, delivering every timer that comes due to the
/// session in order. Timers scheduled while delivering are released within
/// the same window when they fall inside it.
pub fn advance<R: RandomSource>(
    session: &mut Session<R>,
    clock: &mut VirtualClock,
    milestones: &mut dyn MilestoneStore,
    dt: Duration,
    out_events: &mut Vec<Event>,
) {
    let deadline = clock.now().saturating_add(dt);
    while let Some(timer) = clock.next_due(deadline) {
        let mut ports = Ports::new(&mut *clock, &mut *milestones);
        if let Err(error) = apply(session, Command::FireTimer { timer }, &mut ports, out_events) {
            trace!(%error, "timer rejected");
        }
    }
    clock.settle(deadline);
}
