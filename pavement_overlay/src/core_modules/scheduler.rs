// THEORY:
// The `scheduler` module replaces a free-running "request the next animation
// frame from inside the callback" loop with an explicit scheduled task. Every
// request returns a `TickHandle`, and the holder of the handle is the only one
// who may cancel it.
//
// The engine keeps at most one outstanding handle. Every place that schedules
// a tick cancels the previous handle first, so two redraw loops can never run
// at the same time, and a tick that arrives with a handle the engine no
// longer holds is ignored.
//
// Two schedulers are provided:
// - `ManualScheduler` queues handles until the host pumps them. Tests and the
//   offline tester use it to step playback deterministically.
// - `IntervalScheduler` holds a single pending slot that an async host polls
//   from a periodic timer (see the visualizer actor).

use serde::Serialize;

/// Cancellation handle for one requested tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TickHandle(u64);

impl TickHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub trait FrameScheduler {
    /// Asks for one callback on the next display refresh.
    fn request_tick(&mut self) -> TickHandle;
    /// Withdraws a request. Cancelling an unknown or fired handle is a no-op.
    fn cancel_tick(&mut self, handle: TickHandle);
}

/// A scheduler whose ticks fire only when the host takes them.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: Vec<TickHandle>,
    max_outstanding: usize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns every tick that is due.
    pub fn take_due(&mut self) -> Vec<TickHandle> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Highest number of simultaneously outstanding requests seen so far.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_tick(&mut self) -> TickHandle {
        self.next_id += 1;
        let handle = TickHandle(self.next_id);
        self.pending.push(handle);
        self.max_outstanding = self.max_outstanding.max(self.pending.len());
        handle
    }

    fn cancel_tick(&mut self, handle: TickHandle) {
        self.pending.retain(|pending| *pending != handle);
    }
}

/// A single-slot scheduler polled by a periodic timer.
#[derive(Debug, Default)]
pub struct IntervalScheduler {
    next_id: u64,
    pending: Option<TickHandle>,
}

impl IntervalScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the pending tick, if any, handing its handle to the caller.
    pub fn take_pending(&mut self) -> Option<TickHandle> {
        self.pending.take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl FrameScheduler for IntervalScheduler {
    fn request_tick(&mut self) -> TickHandle {
        self.next_id += 1;
        let handle = TickHandle(self.next_id);
        self.pending = Some(handle);
        handle
    }

    fn cancel_tick(&mut self, handle: TickHandle) {
        if self.pending == Some(handle) {
            self.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_scheduler_cancels_only_the_given_handle() {
        let mut scheduler = ManualScheduler::new();
        let first = scheduler.request_tick();
        let second = scheduler.request_tick();
        assert_ne!(first, second);
        assert_eq!(scheduler.max_outstanding(), 2);

        scheduler.cancel_tick(first);
        assert_eq!(scheduler.take_due(), vec![second]);
        assert_eq!(scheduler.pending_count(), 0);

        // Cancelling a fired handle does nothing.
        scheduler.cancel_tick(second);
        assert!(scheduler.take_due().is_empty());
    }

    #[test]
    fn interval_scheduler_holds_one_slot() {
        let mut scheduler = IntervalScheduler::new();
        let stale = scheduler.request_tick();
        let fresh = scheduler.request_tick();
        scheduler.cancel_tick(stale);
        assert!(scheduler.is_pending());
        assert_eq!(scheduler.take_pending(), Some(fresh));
        assert_eq!(scheduler.take_pending(), None);
    }
}
