// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Worker side: context, execution unit and bridge
//!
//! A worker is an OS thread running one work closure. Its output reaches the
//! controller through a bridge thread which translates whatever the worker's
//! hand-off channel does (block, disconnect, crash) into a plain ordered
//! queue, always terminated by exactly one [`Message::Done`].
//!
//! [`Message::Done`]: crate::Message::Done

pub(crate) mod bridge;
mod context;
pub(crate) mod worker;

pub use context::{Received, TaskContext};

/// How a worker hands its output to the bridge
///
/// All strategies deliver the same ordered message stream; they differ in
/// the blocking behaviour of the worker-facing channel and in who creates
/// the control channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Substrate {
    /// Unbounded channel: emission never blocks
    #[default]
    Thread,
    /// Zero-capacity channel: every send blocks until the bridge receives
    ///
    /// The worker unit runs an internal forwarding thread fed by an unbounded
    /// queue so that the work closure itself never blocks on emission.
    Rendezvous,
    /// The worker creates its own control channel
    ///
    /// The control sender is announced to the bridge as the first message.
    /// Control signals sent by the controller before the announcement
    /// arrives are queued and flushed afterwards; the worker may thus yield
    /// a few results before observing an early [`BackgroundWork::pause`].
    ///
    /// [`BackgroundWork::pause`]: crate::BackgroundWork::pause
    Port,
}
