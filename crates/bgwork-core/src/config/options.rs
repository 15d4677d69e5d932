// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Configuration options

#[cfg(feature = "serde")]
use super::Format;
use super::{Config, ConfigMsg, Error, ErrorMode};
use std::path::PathBuf;

/// Configuration options read from the environment
///
/// Values set here override both defaults and the config file (if any).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Options {
    /// Config file path. Default: empty. See `BGWORK_CONFIG` doc.
    pub config_path: PathBuf,
    /// Override of [`Config::poll_interval_ms`]
    pub poll_interval_ms: Option<u32>,
    /// Override of [`Config::paused_poll_interval_ms`]
    pub paused_poll_interval_ms: Option<u32>,
    /// Override of [`Config::drop_intermediate`]
    pub drop_intermediate: Option<bool>,
    /// Override of [`Config::error_mode`]
    pub error_mode: Option<ErrorMode>,
}

impl Options {
    /// Construct a new instance, reading from environment variables
    ///
    /// The following environment variables are read:
    ///
    /// -   `BGWORK_CONFIG`: path to a config file, read by
    ///     [`Self::read_config`]. The format is guessed from the extension
    ///     (see [`Format`](super::Format)); requires feature `serde` plus the
    ///     feature for that format.
    /// -   `BGWORK_POLL_MS`: poll interval in milliseconds
    /// -   `BGWORK_PAUSED_POLL_MS`: poll interval while paused, in milliseconds
    /// -   `BGWORK_DROP_INTERMEDIATE`: `1`, `true`, `yes` or `on` to enable;
    ///     `0`, `false`, `no` or `off` to disable (case-insensitive)
    /// -   `BGWORK_ERROR_MODE`: `WARN` or `FATAL` (case-insensitive)
    ///
    /// Unparsable values are reported with `log::error!` and ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Construct from a variable lookup function
    ///
    /// This is [`Self::from_env`] with a custom source of variables.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut options = Options::default();

        if let Some(v) = var("BGWORK_CONFIG") {
            options.config_path = v.into();
        }

        options.poll_interval_ms = var("BGWORK_POLL_MS").and_then(|v| parse_ms("BGWORK_POLL_MS", &v));
        options.paused_poll_interval_ms =
            var("BGWORK_PAUSED_POLL_MS").and_then(|v| parse_ms("BGWORK_PAUSED_POLL_MS", &v));

        if let Some(mut v) = var("BGWORK_DROP_INTERMEDIATE") {
            v.make_ascii_lowercase();
            options.drop_intermediate = match v.trim() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                other => {
                    log::error!("from_env: bad var BGWORK_DROP_INTERMEDIATE={other}");
                    None
                }
            };
        }

        if let Some(mut v) = var("BGWORK_ERROR_MODE") {
            v.make_ascii_uppercase();
            options.error_mode = match v.trim() {
                "WARN" => Some(ErrorMode::Warn),
                "FATAL" => Some(ErrorMode::Fatal),
                other => {
                    log::error!("from_env: bad var BGWORK_ERROR_MODE={other}");
                    log::error!("from_env: supported error modes: WARN, FATAL");
                    None
                }
            };
        }

        options
    }

    /// Load config: defaults, then the config file (if any), then overrides
    ///
    /// Requires feature "serde" to load a config file.
    pub fn read_config(&self) -> Result<Config, Error> {
        #[allow(unused_mut)]
        let mut config = Config::default();

        #[cfg(feature = "serde")]
        if !self.config_path.as_os_str().is_empty() {
            config = Format::guess_and_read_path(&self.config_path)?;
        }

        #[cfg(not(feature = "serde"))]
        if !self.config_path.as_os_str().is_empty() {
            log::warn!(
                "read_config: ignoring {}: feature \"serde\" is not enabled",
                self.config_path.display()
            );
        }

        self.apply(&mut config);
        Ok(config)
    }

    /// Apply overrides to `config`
    pub fn apply(&self, config: &mut Config) {
        if let Some(v) = self.poll_interval_ms {
            config.change_config(ConfigMsg::PollIntervalMs(v));
        }
        if let Some(v) = self.paused_poll_interval_ms {
            config.change_config(ConfigMsg::PausedPollIntervalMs(v));
        }
        if let Some(v) = self.drop_intermediate {
            config.change_config(ConfigMsg::DropIntermediate(v));
        }
        if let Some(v) = self.error_mode {
            config.change_config(ConfigMsg::ErrorMode(v));
        }
    }
}

fn parse_ms(name: &str, value: &str) -> Option<u32> {
    match value.trim().parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            log::error!("from_env: bad var {name}={value} (expected milliseconds)");
            None
        }
    }
}
