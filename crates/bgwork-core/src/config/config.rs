// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Background work configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a controller reacts to a [`Failure`](crate::Failure) reported by its worker
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorMode {
    /// Log a warning; the work is still considered finished normally
    #[default]
    Warn,
    /// Return [`Error::Task`](crate::Error::Task) from the poll step
    ///
    /// The error surfaces through the host scheduler (for the bundled
    /// [`EventLoop`](crate::runner::EventLoop), from its `run*` methods).
    Fatal,
}

/// A message which may be used to update [`Config`]
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ConfigMsg {
    PollIntervalMs(u32),
    PausedPollIntervalMs(u32),
    DropIntermediate(bool),
    ErrorMode(ErrorMode),
    /// Reset all config values to default (not saved) values
    ResetToDefault,
}

/// Background work configuration
///
/// This is serializable (using `feature = "serde"`) with the following fields:
///
/// > `poll_interval_ms`: `u32` (milliseconds) \
/// > `paused_poll_interval_ms`: `u32` (milliseconds) \
/// > `drop_intermediate`: `bool` \
/// > `error_mode`: [`ErrorMode`]
///
/// Missing fields take their default values. See [`Options::from_env`] for
/// environment overrides.
///
/// [`Options::from_env`]: super::Options::from_env
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Config {
    /// Delay between poll steps (default: 16, about one frame at 60 Hz)
    #[cfg_attr(feature = "serde", serde(default = "defaults::poll_interval_ms"))]
    pub poll_interval_ms: u32,

    /// Delay between poll steps while paused (default: 500)
    #[cfg_attr(feature = "serde", serde(default = "defaults::paused_poll_interval_ms"))]
    pub paused_poll_interval_ms: u32,

    /// Deliver only the latest result of each poll (default: false)
    ///
    /// When a worker yields faster than the controller polls, all but the
    /// latest result seen by a poll step are discarded. The final result
    /// before completion is always delivered.
    #[cfg_attr(feature = "serde", serde(default))]
    pub drop_intermediate: bool,

    /// Reaction to worker failures (default: [`ErrorMode::Warn`])
    #[cfg_attr(feature = "serde", serde(default))]
    pub error_mode: ErrorMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval_ms: defaults::poll_interval_ms(),
            paused_poll_interval_ms: defaults::paused_poll_interval_ms(),
            drop_intermediate: false,
            error_mode: ErrorMode::default(),
        }
    }
}

impl Config {
    /// Apply a [`ConfigMsg`]
    pub fn change_config(&mut self, msg: ConfigMsg) {
        match msg {
            ConfigMsg::PollIntervalMs(v) => self.poll_interval_ms = v,
            ConfigMsg::PausedPollIntervalMs(v) => self.paused_poll_interval_ms = v,
            ConfigMsg::DropIntermediate(v) => self.drop_intermediate = v,
            ConfigMsg::ErrorMode(v) => self.error_mode = v,
            ConfigMsg::ResetToDefault => *self = Config::default(),
        }
    }

    /// Delay between poll steps
    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.into())
    }

    /// Delay between poll steps while paused
    #[inline]
    pub fn paused_poll_interval(&self) -> Duration {
        Duration::from_millis(self.paused_poll_interval_ms.into())
    }
}

mod defaults {
    pub fn poll_interval_ms() -> u32 {
        16 // about 1000 / 60
    }
    pub fn paused_poll_interval_ms() -> u32 {
        500
    }
}
