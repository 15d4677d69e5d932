// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Worker execution unit

use super::{Substrate, TaskContext};
use crate::messages::{ControlSignal, Envelope, Message};
use crate::{Failure, TaskError};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// A boxed work closure, with its input data already bound
pub(crate) type Work<T> = Box<dyn FnOnce(&mut TaskContext<T>) -> Result<(), TaskError> + Send>;

/// Handles to a running worker unit
pub(crate) struct Spawned<T> {
    /// Worker-facing output channel, to be read by the bridge
    pub output: Receiver<Envelope<T>>,
    /// The worker thread; it finishes only after its output is fully handed off
    pub handle: JoinHandle<()>,
}

/// Sends [`Message::Done`] when dropped
///
/// This runs after the work returns, fails or panics, so each worker emits
/// exactly one terminal message.
struct DoneGuard<T> {
    out: Sender<Envelope<T>>,
}

impl<T> Drop for DoneGuard<T> {
    fn drop(&mut self) {
        let _ = self.out.send(Message::Done.into());
    }
}

/// Spawn a worker unit running `work`
///
/// `control` is the receiving end of the control channel. It must be `Some`
/// unless `substrate` is [`Substrate::Port`], in which case it is ignored and
/// the worker announces its own control channel via
/// [`Envelope::Endpoint`].
pub(crate) fn spawn<T: Send + 'static>(
    name: &str,
    substrate: Substrate,
    work: Work<T>,
    control: Option<Receiver<ControlSignal>>,
) -> io::Result<Spawned<T>> {
    let builder = thread::Builder::new().name(name.to_string());
    log::debug!(target: "bgwork_core::task", "spawn: {name} ({substrate:?})");

    match substrate {
        Substrate::Thread => {
            let (tx, rx) = unbounded();
            let control = control_or_closed(control);
            let handle = builder.spawn(move || run(TaskContext::new(tx, control), work))?;
            Ok(Spawned { output: rx, handle })
        }
        Substrate::Rendezvous => {
            let (tx, rx) = bounded(0);
            let (queue_tx, queue_rx) = unbounded();
            let forwarder = thread::Builder::new()
                .name(format!("{name}-forward"))
                .spawn(move || forward(queue_rx, tx))?;
            let control = control_or_closed(control);
            let handle = builder.spawn(move || {
                run(TaskContext::new(queue_tx, control), work);
                let _ = forwarder.join();
            })?;
            Ok(Spawned { output: rx, handle })
        }
        Substrate::Port => {
            let (tx, rx) = unbounded();
            let handle = builder.spawn(move || {
                let (control_tx, control_rx) = unbounded();
                if tx.send(Envelope::Endpoint(control_tx)).is_err() {
                    log::debug!(target: "bgwork_core::task", "worker: output closed before start");
                }
                run(TaskContext::new(tx, control_rx), work);
            })?;
            Ok(Spawned { output: rx, handle })
        }
    }
}

fn control_or_closed(control: Option<Receiver<ControlSignal>>) -> Receiver<ControlSignal> {
    control.unwrap_or_else(|| {
        // A receiver whose sender is already gone
        let (_, rx) = unbounded();
        rx
    })
}

/// Run a work closure to completion, reporting the outcome
fn run<T>(mut cx: TaskContext<T>, work: Work<T>) {
    let _done = DoneGuard {
        out: cx.outbound().clone(),
    };

    match panic::catch_unwind(AssertUnwindSafe(|| work(&mut cx))) {
        Ok(Ok(())) => {
            log::trace!(target: "bgwork_core::task", "worker: completed");
        }
        Ok(Err(TaskError::Failed { error, class })) => {
            log::debug!(target: "bgwork_core::task", "worker: failed: {error}");
            let _ = cx.emit(Message::Error(Failure::from_error(&*error).with_class(class)));
        }
        Ok(Err(error)) => {
            log::debug!(target: "bgwork_core::task", "worker: cancelled: {error}");
        }
        Err(payload) => {
            let failure = Failure::from_panic(&*payload);
            log::debug!(target: "bgwork_core::task", "worker: panicked: {}", failure.message);
            let _ = cx.emit(Message::Error(failure));
        }
    }
}

/// Hand messages from the internal queue to the rendezvous channel
///
/// Returns after forwarding [`Message::Done`], or when either side closes.
fn forward<T>(queue: Receiver<Envelope<T>>, out: Sender<Envelope<T>>) {
    for envelope in queue.iter() {
        let done = matches!(envelope, Envelope::Message(Message::Done));
        if out.send(envelope).is_err() {
            log::debug!(target: "bgwork_core::task", "forward: bridge closed");
            return;
        }
        if done {
            return;
        }
    }
}
