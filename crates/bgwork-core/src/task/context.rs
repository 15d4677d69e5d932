// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Worker-side context

use crate::TaskError;
use crate::messages::{ControlSignal, Envelope, Message, SendErased};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::time::Duration;

/// Result of waiting for a control signal
#[derive(Debug)]
pub enum Received {
    /// A signal arrived (already applied to the context state)
    Signal(ControlSignal),
    /// The controller closed the control channel
    Closed,
    /// The timeout elapsed (only from [`TaskContext::wait_message_timeout`])
    Timeout,
}

/// Context passed to a work closure
///
/// This is the worker's only link to its controller. Output is ordered:
/// values passed to [`Self::yield_value`] and [`Self::send_message`] reach the
/// controller in the order they were emitted.
///
/// Control signals are observed only when the work calls back into the
/// context. [`ControlSignal::Pause`] and [`ControlSignal::Resume`] toggle a
/// local pause flag which gates [`Self::yield_value`];
/// [`ControlSignal::Stop`] surfaces as [`TaskError::Stopped`], which the work
/// should propagate with `?`. Once observed, a stop request is sticky.
///
/// Application-defined signals ([`ControlSignal::Custom`]) drained while
/// checking for a pause are kept and returned by the next
/// [`Self::check_message`] or [`Self::wait_message`].
#[derive(Debug)]
pub struct TaskContext<T> {
    out: Sender<Envelope<T>>,
    control: Receiver<ControlSignal>,
    pending: VecDeque<SendErased>,
    paused: bool,
    stopped: bool,
}

impl<T> TaskContext<T> {
    pub(crate) fn new(out: Sender<Envelope<T>>, control: Receiver<ControlSignal>) -> Self {
        TaskContext {
            out,
            control,
            pending: VecDeque::new(),
            paused: false,
            stopped: false,
        }
    }

    /// Emit a result
    ///
    /// Blocks while paused (see [`Self::check_pause`]), then sends `value` to
    /// the controller. Values are never dropped here.
    ///
    /// Returns [`TaskError::Stopped`] if a stop request was observed and
    /// [`TaskError::Closed`] if the controller has gone away.
    pub fn yield_value(&mut self, value: T) -> Result<(), TaskError> {
        self.check_pause()?;
        self.emit(Message::Result(value))
    }

    /// Emit an out-of-band message
    ///
    /// The controller passes `msg` to its message handler. Unlike
    /// [`Self::yield_value`] this is not affected by pausing.
    pub fn send_message<M: Any + Send + Debug>(&mut self, msg: M) -> Result<(), TaskError> {
        self.emit(Message::Message(SendErased::new(msg)))
    }

    /// Poll for a control signal without blocking
    ///
    /// Returns `Ok(None)` when no signal is available, including when the
    /// control channel has been closed.
    pub fn check_message(&mut self) -> Result<Option<ControlSignal>, TaskError> {
        if self.stopped {
            return Err(TaskError::Stopped);
        }
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(ControlSignal::Custom(msg)));
        }

        match self.control.try_recv() {
            Ok(signal) => self.apply(signal).map(Some),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    /// Block until a control signal arrives or the channel is closed
    pub fn wait_message(&mut self) -> Result<Received, TaskError> {
        if self.stopped {
            return Err(TaskError::Stopped);
        }
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Received::Signal(ControlSignal::Custom(msg)));
        }

        match self.control.recv() {
            Ok(signal) => self.apply(signal).map(Received::Signal),
            Err(_) => Ok(Received::Closed),
        }
    }

    /// Like [`Self::wait_message`], giving up after `timeout`
    pub fn wait_message_timeout(&mut self, timeout: Duration) -> Result<Received, TaskError> {
        if self.stopped {
            return Err(TaskError::Stopped);
        }
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Received::Signal(ControlSignal::Custom(msg)));
        }

        match self.control.recv_timeout(timeout) {
            Ok(signal) => self.apply(signal).map(Received::Signal),
            Err(RecvTimeoutError::Timeout) => Ok(Received::Timeout),
            Err(RecvTimeoutError::Disconnected) => Ok(Received::Closed),
        }
    }

    /// Apply pending control signals, blocking while paused
    ///
    /// All immediately available signals are applied first. If the context
    /// is then paused, this blocks until [`ControlSignal::Resume`] arrives or
    /// the control channel is closed (which also ends the pause).
    ///
    /// Long-running work which does not yield often should call this
    /// periodically so that it can be paused and stopped.
    pub fn check_pause(&mut self) -> Result<(), TaskError> {
        if self.stopped {
            return Err(TaskError::Stopped);
        }

        while let Ok(signal) = self.control.try_recv() {
            self.absorb(signal)?;
        }

        while self.paused {
            log::trace!(target: "bgwork_core::task", "check_pause: paused");
            match self.control.recv() {
                Ok(signal) => self.absorb(signal)?,
                Err(_) => {
                    log::debug!(target: "bgwork_core::task", "check_pause: control channel closed while paused");
                    self.paused = false;
                }
            }
        }

        Ok(())
    }

    /// True if a [`ControlSignal::Pause`] has been observed without a
    /// subsequent [`ControlSignal::Resume`]
    #[inline]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn emit(&self, msg: Message<T>) -> Result<(), TaskError> {
        self.out.send(msg.into()).map_err(|_| TaskError::Closed)
    }

    pub(crate) fn outbound(&self) -> &Sender<Envelope<T>> {
        &self.out
    }

    fn apply(&mut self, signal: ControlSignal) -> Result<ControlSignal, TaskError> {
        match signal {
            ControlSignal::Pause => self.paused = true,
            ControlSignal::Resume => self.paused = false,
            ControlSignal::Stop => {
                self.stopped = true;
                return Err(TaskError::Stopped);
            }
            ControlSignal::Custom(_) => (),
        }
        Ok(signal)
    }

    fn absorb(&mut self, signal: ControlSignal) -> Result<(), TaskError> {
        if let ControlSignal::Custom(msg) = self.apply(signal)? {
            self.pending.push_back(msg);
        }
        Ok(())
    }
}
