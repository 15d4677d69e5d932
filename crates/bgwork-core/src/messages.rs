// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Messages exchanged between a worker and its controller
//!
//! Traffic flows over two independent channels:
//!
//! -   worker → controller: [`Message`], in the order it was emitted
//! -   controller → worker: [`ControlSignal`], on a dedicated control channel
//!
//! Application-defined payloads travel in either direction as [`SendErased`]
//! and are handed to the message handler as [`Erased`].

use crate::error::Failure;
use crossbeam_channel::Sender;
use std::any::Any;
use std::fmt::Debug;

trait AnyDebug: Any + Debug {}
impl<T: Any + Debug> AnyDebug for T {}

/// A type-erased value
///
/// This is vaguely a wrapper over `Box<dyn (Any + Debug)>`, except that Rust
/// doesn't (yet) support multi-trait objects.
#[derive(Debug)]
pub struct Erased(Box<dyn AnyDebug>);

impl Erased {
    /// Construct
    pub fn new<V: Any + Debug>(v: V) -> Self {
        Erased(Box::new(v))
    }

    /// Returns `true` if the inner type is the same as `T`.
    pub fn is<T: 'static>(&self) -> bool {
        (&*self.0 as &dyn Any).is::<T>()
    }

    /// Attempt to downcast self to a concrete type.
    pub fn downcast<T: 'static>(self) -> Result<Box<T>, Box<dyn Any>> {
        (self.0 as Box<dyn Any>).downcast::<T>()
    }

    /// Returns some reference to the inner value if it is of type `T`, or `None` if it isn't.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        (&*self.0 as &dyn Any).downcast_ref::<T>()
    }
}

trait AnySendDebug: AnyDebug + Send {}
impl<T: Any + Send + Debug> AnySendDebug for T {}

/// Like [`Erased`], but supporting `Send`
///
/// This is the form in which application-defined messages cross the thread
/// boundary. The receiving side converts with [`Self::into_erased`].
#[derive(Debug)]
pub struct SendErased(Box<dyn AnySendDebug + Send>);

impl SendErased {
    /// Construct
    pub fn new<V: Any + Send + Debug>(v: V) -> Self {
        SendErased(Box::new(v))
    }

    /// Returns `true` if the inner type is the same as `T`.
    pub fn is<T: 'static>(&self) -> bool {
        (&*self.0 as &dyn Any).is::<T>()
    }

    /// Attempt to downcast self to a concrete type.
    pub fn downcast<T: 'static>(self) -> Result<Box<T>, Box<dyn Any + Send>> {
        (self.0 as Box<dyn Any + Send>).downcast::<T>()
    }

    /// Returns some reference to the inner value if it is of type `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        (&*self.0 as &dyn Any).downcast_ref::<T>()
    }

    /// Convert to [`Erased`]
    pub fn into_erased(self) -> Erased {
        Erased(self.0)
    }
}

/// A message from a worker to its controller
///
/// Messages from one worker are delivered in emission order and
/// [`Message::Done`] is always the last.
#[derive(Debug)]
pub enum Message<T> {
    /// A result yielded by the work
    Result(T),
    /// An out-of-band message (see [`TaskContext::send_message`])
    ///
    /// [`TaskContext::send_message`]: crate::TaskContext::send_message
    Message(SendErased),
    /// The work failed
    Error(Failure),
    /// The worker has finished; nothing follows
    Done,
}

impl<T> Message<T> {
    /// True if this is [`Message::Done`]
    #[inline]
    pub fn is_done(&self) -> bool {
        matches!(self, Message::Done)
    }
}

/// Worker-side envelope: a [`Message`] or a freshly created control endpoint
///
/// `Endpoint` is only produced by [`Substrate::Port`](crate::Substrate::Port)
/// workers and is consumed by the bridge.
#[derive(Debug)]
pub(crate) enum Envelope<T> {
    Message(Message<T>),
    Endpoint(Sender<ControlSignal>),
}

impl<T> From<Message<T>> for Envelope<T> {
    #[inline]
    fn from(msg: Message<T>) -> Self {
        Envelope::Message(msg)
    }
}

/// A signal from a controller to its worker
#[derive(Debug)]
pub enum ControlSignal {
    /// Block the next [`TaskContext::yield_value`] until [`Self::Resume`]
    ///
    /// [`TaskContext::yield_value`]: crate::TaskContext::yield_value
    Pause,
    /// Clear a previous [`Self::Pause`]
    Resume,
    /// Request cooperative cancellation
    Stop,
    /// An application-defined message
    Custom(SendErased),
}

impl ControlSignal {
    /// Construct [`ControlSignal::Custom`]
    pub fn custom<V: Any + Send + Debug>(v: V) -> Self {
        ControlSignal::Custom(SendErased::new(v))
    }
}
