// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for the `rocknix_dtbo` crate.

use core::fmt;

/// An error that can occur while generating an overlay.
///
/// The taxonomy is deliberately small:
///
/// - [`Error::Format`] — the stock blob (or an embedded byte stream such as
///   the panel init sequence) is malformed. Always fatal.
/// - [`Error::NotFound`] — an expected node, property, symbol, or phandle is
///   missing. Fatal for inputs the core algorithm requires; the policy engine
///   catches and skips it for optional peripherals.
/// - [`Error::ResourceExhausted`] — a bounded resource (the overlay fragment
///   index space) ran out. Fatal.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The input blob is malformed.
    Format(FormatError),
    /// An expected node, property, symbol, or phandle is missing.
    NotFound {
        /// What kind of entity was looked up (e.g. `"node"`, `"property"`).
        what: &'static str,
        /// The name, path, or label that failed to resolve.
        name: String,
    },
    /// A bounded resource ran out.
    ResourceExhausted(&'static str),
}

impl Error {
    pub(crate) fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Error::NotFound {
            what,
            name: name.into(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Format(e) => write!(f, "{e}"),
            Error::NotFound { what, name } => write!(f, "{what} not found: {name}"),
            Error::ResourceExhausted(what) => write!(f, "resource exhausted: {what}"),
        }
    }
}

impl core::error::Error for Error {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FormatError> for Error {
    fn from(e: FormatError) -> Self {
        Error::Format(e)
    }
}

/// A malformed-input error, carrying the byte offset it was detected at.
#[derive(Debug)]
#[non_exhaustive]
pub struct FormatError {
    offset: usize,
    /// The kind of format violation.
    pub kind: FormatErrorKind,
}

impl FormatError {
    pub(crate) fn new(kind: FormatErrorKind, offset: usize) -> Self {
        Self { offset, kind }
    }
}

/// The kind of a [`FormatError`].
#[derive(Debug)]
#[non_exhaustive]
pub enum FormatErrorKind {
    /// The magic number of the device tree is invalid.
    InvalidMagic,
    /// The device tree version is not supported by this library.
    UnsupportedVersion(u32),
    /// A block length or property length is out of range.
    InvalidLength,
    /// An invalid structure token was encountered.
    BadToken(u32),
    /// An invalid string was encountered.
    InvalidString,
    /// Two nodes in the same tree declare the same phandle value.
    DuplicatePhandle(u32),
    /// A panel init sequence record claims more data than remains.
    InvalidInitSequence,
    /// A property holds a value outside its legal range.
    InvalidValue(&'static str),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.kind, self.offset)
    }
}

impl fmt::Display for FormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatErrorKind::InvalidMagic => write!(f, "invalid FDT magic number"),
            FormatErrorKind::UnsupportedVersion(version) => {
                write!(f, "the FDT version {version} is not supported")
            }
            FormatErrorKind::InvalidLength => write!(f, "invalid FDT length"),
            FormatErrorKind::BadToken(token) => write!(f, "bad FDT token: 0x{token:x}"),
            FormatErrorKind::InvalidString => write!(f, "invalid string in FDT"),
            FormatErrorKind::DuplicatePhandle(value) => {
                write!(f, "duplicate phandle value 0x{value:x}")
            }
            FormatErrorKind::InvalidInitSequence => {
                write!(f, "truncated panel init sequence record")
            }
            FormatErrorKind::InvalidValue(what) => write!(f, "invalid value for {what}"),
        }
    }
}

impl core::error::Error for FormatError {}
