// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! bgwork: background work for cooperative event loops
//!
//! This, the main bgwork crate, is merely a wrapper over [`bgwork_core`].
//! All items are directly re-exported from this crate.
//!
//! # Example
//!
//! ```no_run
//! use bgwork::{BackgroundWork, TaskContext, TaskError};
//! use bgwork::runner::EventLoop;
//!
//! fn sum(cx: &mut TaskContext<u64>, limit: u64) -> Result<(), TaskError> {
//!     let mut total = 0;
//!     for i in 0..limit {
//!         total += i;
//!         if i % 1000 == 0 {
//!             cx.yield_value(total)?;
//!         }
//!     }
//!     cx.yield_value(total)
//! }
//!
//! let el = EventLoop::new();
//! let work = BackgroundWork::new(1_000_000, sum);
//! work.on_progress(&el, |total| println!("sum so far: {total}"))?
//!     .on_done(&el, || println!("done"))?;
//! el.run_until_idle()?;
//! # Ok::<(), bgwork::Error>(())
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use bgwork_core::*;
