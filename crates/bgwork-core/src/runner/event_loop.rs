// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! A minimal timer-driven event loop

use super::{Scheduler, Task};
use crate::Result;
use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Timers {
    /// Sequence number of the next timer (ties are resolved in request order)
    next_seq: u64,
    /// Timer updates: (time, seq, task), in reverse order
    updates: Vec<(Instant, u64, Task)>,
}

/// A single-threaded event loop running timed [`Task`]s
///
/// Clones share the same timer queue, thus a clone may be passed as the
/// [`Scheduler`] of a [`BackgroundWork`](crate::BackgroundWork) while the
/// original drives the loop.
///
/// The loop blocks its thread between timers. Tasks are run in order of
/// their due time, then in order of request.
#[derive(Clone, Default)]
pub struct EventLoop(Rc<RefCell<Timers>>);

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop").field("pending", &self.pending()).finish()
    }
}

impl Scheduler for EventLoop {
    fn after(&self, delay: Duration, task: Task) {
        let mut timers = self.0.borrow_mut();
        let time = Instant::now() + delay;
        let seq = timers.next_seq;
        timers.next_seq += 1;
        log::trace!(
            target: "bgwork_core::runner",
            "after: task {seq} at now+{}ms",
            delay.as_millis()
        );
        timers.updates.push((time, seq, task));
        timers.updates.sort_by(|a, b| (b.0, b.1).cmp(&(a.0, a.1))); // reverse sort
    }
}

impl EventLoop {
    /// Construct with an empty queue
    #[inline]
    pub fn new() -> Self {
        EventLoop::default()
    }

    /// Number of scheduled tasks
    pub fn pending(&self) -> usize {
        self.0.borrow().updates.len()
    }

    /// Due time of the next task, if any
    pub fn next_due(&self) -> Option<Instant> {
        self.0.borrow().updates.last().map(|update| update.0)
    }

    /// Run all tasks which are currently due
    ///
    /// Tasks scheduled while stepping are left for the next step, even if
    /// they are already due. Returns the number of tasks run.
    ///
    /// If a task returns an error, stepping stops and the error is returned;
    /// remaining tasks stay queued.
    pub fn step(&self) -> Result<usize> {
        let now = Instant::now();
        let limit = self.0.borrow().next_seq;
        let mut count = 0;

        loop {
            // assumption: updates are sorted in reverse order
            let task = {
                let mut timers = self.0.borrow_mut();
                let position = timers
                    .updates
                    .iter()
                    .rposition(|update| update.0 <= now && update.1 < limit);
                match position {
                    Some(i) => timers.updates.remove(i).2,
                    None => break,
                }
            };

            count += 1;
            task()?;
        }

        Ok(count)
    }

    /// Run until no tasks remain
    ///
    /// Note that a started, unfinished [`BackgroundWork`] always has a poll
    /// task scheduled, thus this returns only once all such work is done (or
    /// a task fails).
    ///
    /// [`BackgroundWork`]: crate::BackgroundWork
    pub fn run_until_idle(&self) -> Result<()> {
        loop {
            self.step()?;
            match self.next_due() {
                None => return Ok(()),
                Some(time) => sleep_until(time),
            }
        }
    }

    /// Run for (approximately) `duration`, or until no tasks remain
    pub fn run_for(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        self.run_until(|| false, deadline).map(|_| ())
    }

    /// Run until `cond` is satisfied, `deadline` passes or no tasks remain
    ///
    /// `cond` is checked before and after each step. Returns `Ok(true)` if
    /// `cond` was satisfied.
    pub fn run_until(&self, mut cond: impl FnMut() -> bool, deadline: Instant) -> Result<bool> {
        loop {
            if cond() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }

            self.step()?;
            if cond() {
                return Ok(true);
            }

            match self.next_due() {
                None => return Ok(false),
                Some(time) => sleep_until(time.min(deadline)),
            }
        }
    }
}

fn sleep_until(time: Instant) {
    let now = Instant::now();
    if time > now {
        thread::sleep(time - now);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Error, Failure, FailureKind};

    fn recorder() -> (Rc<RefCell<Vec<u32>>>, impl Fn(u32) -> Task) {
        let log = Rc::new(RefCell::new(vec![]));
        let log2 = log.clone();
        let make = move |n: u32| -> Task {
            let log = log2.clone();
            Box::new(move || {
                log.borrow_mut().push(n);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn tasks_run_in_time_then_request_order() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        el.after(Duration::from_millis(20), task(3));
        el.after(Duration::ZERO, task(1));
        el.after(Duration::ZERO, task(2));
        assert_eq!(el.pending(), 3);

        el.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec![1, 2, 3]);
        assert_eq!(el.pending(), 0);
    }

    #[test]
    fn rescheduled_tasks_wait_for_next_step() {
        let el = EventLoop::new();
        let count = Rc::new(RefCell::new(0));

        fn again(el: EventLoop, count: Rc<RefCell<u32>>) -> Task {
            Box::new(move || {
                *count.borrow_mut() += 1;
                if *count.borrow() < 3 {
                    el.after(Duration::ZERO, again(el.clone(), count.clone()));
                }
                Ok(())
            })
        }

        el.after(Duration::ZERO, again(el.clone(), count.clone()));
        assert_eq!(el.step().unwrap(), 1);
        assert_eq!(*count.borrow(), 1);

        el.run_until_idle().unwrap();
        assert_eq!(*count.borrow(), 3);
    }

    #[test]
    fn error_stops_the_loop() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        el.after(Duration::ZERO, task(1));
        el.after(
            Duration::from_millis(1),
            Box::new(|| Err(Error::Task(Failure::new(FailureKind::Application, "no")))),
        );
        el.after(Duration::from_millis(30), task(2));

        assert!(matches!(el.run_until_idle(), Err(Error::Task(_))));
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(el.pending(), 1);

        el.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn run_until_condition() {
        let el = EventLoop::new();
        let (log, task) = recorder();
        el.after(Duration::from_millis(5), task(1));
        el.after(Duration::from_secs(60), task(2));

        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(el.run_until(|| !log.borrow().is_empty(), deadline).unwrap());
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(el.pending(), 1);
    }
}
