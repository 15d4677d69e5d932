// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! bgwork core
//!
//! Long-running work executes on its own thread while progress, messages,
//! errors and completion are delivered to callbacks on a single-threaded,
//! cooperatively scheduled event loop. The loop is never blocked: the
//! controller ([`BackgroundWork`]) polls a non-blocking queue from a timer.
//!
//! The pieces, leaves first:
//!
//! -   [`TaskContext`] is handed to the work closure and used to yield
//!     results, send messages and observe control signals
//! -   the worker unit runs the closure with full failure containment and
//!     always finishes with exactly one [`Message::Done`]
//! -   the bridge relays worker output into the controller's queue
//! -   [`BackgroundWork`] owns the callbacks and drives the poll step on a
//!     [`Scheduler`](runner::Scheduler)

#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate bitflags;

pub mod config;
mod error;
pub mod messages;
pub mod runner;
pub mod task;
pub mod util;
pub mod work;

pub use error::{Error, Failure, FailureKind, Result, TaskError};
pub use messages::{ControlSignal, Erased, Message, SendErased};
pub use task::{Received, Substrate, TaskContext};
pub use work::{BackgroundWork, Builder, Registry, WorkerId};
