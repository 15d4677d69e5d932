// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Host scheduling
//!
//! A [`BackgroundWork`](crate::BackgroundWork) controller never blocks; it
//! asks its [`Scheduler`] to run the next poll step after a delay. Any
//! single-threaded event loop with a timer facility can implement
//! [`Scheduler`]. [`EventLoop`] is a minimal implementation usable by
//! headless applications and tests.

mod event_loop;

pub use event_loop::EventLoop;

use std::time::Duration;

/// A deferred task, run on the scheduler's thread
///
/// Errors returned by tasks should be surfaced to the host application.
pub type Task = Box<dyn FnOnce() -> crate::Result<()>>;

/// A single-threaded timer facility
pub trait Scheduler {
    /// Run `task` once, no sooner than `delay` from now
    ///
    /// Tasks must run on the thread which owns the scheduler and must not be
    /// run from within this method.
    fn after(&self, delay: Duration, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for std::rc::Rc<S> {
    #[inline]
    fn after(&self, delay: Duration, task: Task) {
        (**self).after(delay, task);
    }
}
