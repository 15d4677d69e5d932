// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Config file formats

#[cfg(feature = "serde")]
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Config file errors
#[derive(Error, Debug)]
pub enum Error {
    /// The file could not be deserialised
    #[error("failed to parse {format} config: {message}")]
    Parse { format: Format, message: String },

    /// The value could not be serialised
    #[error("failed to serialise config as {format}: {message}")]
    Serialize { format: Format, message: String },

    #[error("error reading / writing config file")]
    Io(#[from] std::io::Error),

    #[error("config format not supported: {0}")]
    Unsupported(Format),
}

#[cfg(feature = "serde")]
impl Error {
    fn parse(format: Format, err: impl fmt::Display) -> Error {
        Error::Parse {
            format,
            message: err.to_string(),
        }
    }

    fn serialize(format: Format, err: impl fmt::Display) -> Error {
        Error::Serialize {
            format,
            message: err.to_string(),
        }
    }
}

/// Config serialisation formats
///
/// Reading or writing a format also requires its crate feature.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// JavaScript Object Notation
    Json,
    /// Tom's Obvious Minimal Language
    Toml,
    /// YAML Ain't Markup Language
    Yaml,
    /// Rusty Object Notation
    Ron,
    /// Not recognised from the file extension
    Unknown,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Format::Json => "JSON",
            Format::Toml => "TOML",
            Format::Yaml => "YAML",
            Format::Ron => "RON",
            Format::Unknown => "(unknown format)",
        })
    }
}

impl Format {
    /// Guess format from the path's extension
    ///
    /// This does not open the file. Returns [`Format::Unknown`] for an
    /// unrecognised or missing extension; whether the format is usable also
    /// depends on enabled features.
    pub fn guess_from_path(path: &Path) -> Format {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Format::Json,
            Some("toml") => Format::Toml,
            Some("yaml") | Some("yml") => Format::Yaml,
            Some("ron") => Format::Ron,
            _ => Format::Unknown,
        }
    }

    /// Read from a path
    #[cfg(feature = "serde")]
    pub fn read_path<T: DeserializeOwned>(self, path: &Path) -> Result<T, Error> {
        log::info!(target: "bgwork_core::config", "read_path: path={}, format={self:?}", path.display());
        let read = || std::fs::read_to_string(path);
        match self {
            #[cfg(feature = "json")]
            Format::Json => serde_json::from_str(&read()?).map_err(|e| Error::parse(self, e)),
            #[cfg(feature = "yaml")]
            Format::Yaml => serde_yaml2::from_str(&read()?).map_err(|e| Error::parse(self, e)),
            #[cfg(feature = "ron")]
            Format::Ron => ron::from_str(&read()?).map_err(|e| Error::parse(self, e)),
            #[cfg(feature = "toml")]
            Format::Toml => toml::from_str(&read()?).map_err(|e| Error::parse(self, e)),
            _ => {
                let _ = read;
                Err(Error::Unsupported(self))
            }
        }
    }

    /// Write to a path
    ///
    /// The document is fully serialised before the file is touched.
    #[cfg(feature = "serde")]
    pub fn write_path<T: Serialize>(self, path: &Path, value: &T) -> Result<(), Error> {
        log::info!(target: "bgwork_core::config", "write_path: path={}, format={self:?}", path.display());
        let text: String = match self {
            #[cfg(feature = "json")]
            Format::Json => serde_json::to_string_pretty(value).map_err(|e| Error::serialize(self, e))?,
            #[cfg(feature = "yaml")]
            Format::Yaml => serde_yaml2::to_string(value).map_err(|e| Error::serialize(self, e))?,
            #[cfg(feature = "ron")]
            Format::Ron => ron::ser::to_string_pretty(value, ron::ser::PrettyConfig::default()).map_err(|e| Error::serialize(self, e))?,
            #[cfg(feature = "toml")]
            Format::Toml => toml::to_string(value).map_err(|e| Error::serialize(self, e))?,
            _ => {
                let _ = value;
                return Err(Error::Unsupported(self));
            }
        };
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Guess format and load from a path
    #[cfg(feature = "serde")]
    #[inline]
    pub fn guess_and_read_path<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
        Self::guess_from_path(path).read_path(path)
    }

    /// Guess format and write to a path
    #[cfg(feature = "serde")]
    #[inline]
    pub fn guess_and_write_path<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
        Self::guess_from_path(path).write_path(path, value)
    }
}
