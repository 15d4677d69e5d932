// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Registry of live workers

use crate::ControlSignal;
use crossbeam_channel::Sender;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifier of a worker, unique within the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WorkerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A set of live workers which may be stopped together
///
/// Controllers built with [`Builder::registry`](super::Builder::registry)
/// add themselves when their control channel is established and remove
/// themselves on completion or [`close`](super::BackgroundWork::close).
/// Call [`Self::shutdown_all`] at application exit.
///
/// Clones refer to the same set. The registry may be shared across threads.
#[derive(Clone, Debug, Default)]
pub struct Registry(Arc<Mutex<HashMap<WorkerId, Sender<ControlSignal>>>>);

impl Registry {
    /// Construct an empty registry
    #[inline]
    pub fn new() -> Self {
        Registry::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WorkerId, Sender<ControlSignal>>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, id: WorkerId, control: Sender<ControlSignal>) {
        self.lock().insert(id, control);
    }

    pub(crate) fn remove(&self, id: WorkerId) {
        self.lock().remove(&id);
    }

    /// Number of live workers
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if no live workers are registered
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Send [`ControlSignal::Stop`] to every live worker and forget them
    ///
    /// Returns the number of workers signalled. Controllers still observe
    /// their worker's completion through their normal poll step.
    pub fn shutdown_all(&self) -> usize {
        let workers = std::mem::take(&mut *self.lock());
        let mut count = 0;
        for (id, control) in workers {
            if control.send(ControlSignal::Stop).is_ok() {
                log::debug!(target: "bgwork_core::work", "shutdown_all: stopping worker {id}");
                count += 1;
            }
        }
        count
    }
}
