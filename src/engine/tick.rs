//! Explicit "next tick" scheduling.
//!
//! A [`Ticker`] holds work deferred to the next tick. Running a tick takes
//! the whole pending batch at once; anything deferred while the batch runs
//! lands in the following tick. This gives the dispatcher its one tick of
//! look-ahead without depending on any host scheduling primitive.

use std::collections::VecDeque;

#[derive(Debug)]
pub struct Ticker<T> {
    next: VecDeque<T>,
    tick: u64,
}

impl<T> Default for Ticker<T> {
    fn default() -> Self {
        Self {
            next: VecDeque::new(),
            tick: 0,
        }
    }
}

impl<T> Ticker<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `task` for the next tick, after anything already scheduled.
    pub fn defer(&mut self, task: T) {
        self.next.push_back(task);
    }

    /// Advance one tick and return the tasks due in it, in scheduling order.
    pub fn advance(&mut self) -> VecDeque<T> {
        self.tick += 1;
        std::mem::take(&mut self.next)
    }

    /// Nothing is waiting for a future tick.
    pub fn is_idle(&self) -> bool {
        self.next.is_empty()
    }

    /// Ticks run so far.
    pub fn current(&self) -> u64 {
        self.tick
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_tasks_run_in_order() {
        let mut ticker = Ticker::new();
        ticker.defer("a");
        ticker.defer("b");
        assert_eq!(ticker.advance(), VecDeque::from(["a", "b"]));
        assert!(ticker.is_idle());
        assert_eq!(ticker.current(), 1);
    }

    #[test]
    fn tasks_deferred_during_a_tick_wait_for_the_next() {
        let mut ticker = Ticker::new();
        ticker.defer(1);
        let due = ticker.advance();
        for task in due {
            ticker.defer(task + 1);
        }
        assert!(!ticker.is_idle());
        assert_eq!(ticker.advance(), VecDeque::from([2]));
    }
}
