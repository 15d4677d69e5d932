// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Utilities

use crate::Failure;

/// Log a warning regarding an error message
pub fn warn_about_error(msg: &str, mut error: &dyn std::error::Error) {
    log::warn!("{msg}: {error}");
    while let Some(source) = error.source() {
        log::warn!("Source: {source}");
        error = source;
    }
}

/// Log a warning regarding a worker [`Failure`]
pub fn warn_about_failure(name: &str, failure: &Failure) {
    log::warn!(target: "bgwork_core::work", "{name}: {}: {}", failure.kind, failure.message);
    for source in &failure.sources {
        log::warn!(target: "bgwork_core::work", "Source: {source}");
    }
}
