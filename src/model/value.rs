// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::error::Error;
use crate::fdt::FdtProperty;

/// A typed device tree property value.
///
/// The flattened format stores property values as raw bytes; this enum is the
/// canonical in-memory interpretation, classified once at decode time:
///
/// - empty value → [`Value::Empty`] (a boolean marker property)
/// - printable NUL-terminated text → [`Value::Str`] / [`Value::StrList`]
/// - exactly four bytes → [`Value::U32`]
/// - a multiple of four bytes → [`Value::U32List`]
/// - anything else → [`Value::Bytes`]
///
/// [`Value::to_bytes`] reconstructs the exact encoded bytes for every
/// variant, so encode∘decode is the identity. The classification is only
/// ambiguous in the other direction: a one-element cell list re-decodes as
/// [`Value::U32`], which is why those forms are called canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A property with no value, used as a boolean marker.
    Empty,
    /// A single 32-bit cell.
    U32(u32),
    /// An ordered list of 32-bit cells.
    U32List(Vec<u32>),
    /// A NUL-terminated UTF-8 string.
    Str(String),
    /// An ordered list of NUL-terminated UTF-8 strings.
    StrList(Vec<String>),
    /// An opaque byte sequence.
    Bytes(Vec<u8>),
}

impl Value {
    /// Creates a [`Value::U32`].
    #[must_use]
    pub fn u32(value: u32) -> Self {
        Value::U32(value)
    }

    /// Creates a [`Value::U32List`] from cells.
    #[must_use]
    pub fn cells(cells: impl Into<Vec<u32>>) -> Self {
        Value::U32List(cells.into())
    }

    /// Creates a [`Value::Str`].
    #[must_use]
    pub fn str(value: impl Into<String>) -> Self {
        Value::Str(value.into())
    }

    /// Creates a [`Value::StrList`] from strings.
    #[must_use]
    pub fn strs<I, S>(strings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::StrList(strings.into_iter().map(Into::into).collect())
    }

    /// Creates a [`Value::Bytes`].
    #[must_use]
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(value.into())
    }

    /// Classifies raw encoded bytes into the canonical typed value.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Value::Empty;
        }
        if let Some(mut strings) = string_list(bytes) {
            if strings.len() == 1 {
                return Value::Str(strings.remove(0));
            }
            return Value::StrList(strings);
        }
        if bytes.len() == 4 {
            let cell = u32::from_be_bytes(bytes.try_into().expect("length checked above"));
            return Value::U32(cell);
        }
        if bytes.len().is_multiple_of(4) {
            let cells = bytes
                .chunks_exact(4)
                .map(|chunk| u32::from_be_bytes(chunk.try_into().expect("chunks of 4")))
                .collect();
            return Value::U32List(cells);
        }
        Value::Bytes(bytes.to_vec())
    }

    /// Serializes this value to its encoded byte form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Value::Empty => Vec::new(),
            Value::U32(cell) => cell.to_be_bytes().to_vec(),
            Value::U32List(cells) => cells.iter().flat_map(|c| c.to_be_bytes()).collect(),
            Value::Str(s) => {
                let mut bytes = s.clone().into_bytes();
                bytes.push(0);
                bytes
            }
            Value::StrList(strings) => {
                let mut bytes = Vec::new();
                for s in strings {
                    bytes.extend_from_slice(s.as_bytes());
                    bytes.push(0);
                }
                bytes
            }
            Value::Bytes(bytes) => bytes.clone(),
        }
    }

    /// Returns the single cell value, if this is a [`Value::U32`].
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(cell) => Some(*cell),
            _ => None,
        }
    }

    /// Returns the value as a list of cells.
    ///
    /// A [`Value::U32`] yields a one-element list; everything else but
    /// [`Value::U32List`] yields `None`.
    #[must_use]
    pub fn as_cells(&self) -> Option<Vec<u32>> {
        match self {
            Value::U32(cell) => Some(vec![*cell]),
            Value::U32List(cells) => Some(cells.clone()),
            _ => None,
        }
    }

    /// Returns the string value, if this is a [`Value::Str`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Splits `bytes` into a non-empty list of printable NUL-terminated strings,
/// or `None` if the value does not look like text.
fn string_list(bytes: &[u8]) -> Option<Vec<String>> {
    if bytes.last() != Some(&0) || bytes[0] == 0 {
        return None;
    }
    if !bytes
        .iter()
        .all(|&b| b == 0 || (0x20..=0x7e).contains(&b))
    {
        return None;
    }
    let mut strings = Vec::new();
    for segment in bytes[..bytes.len() - 1].split(|&b| b == 0) {
        if segment.is_empty() {
            return None;
        }
        strings.push(String::from_utf8(segment.to_vec()).ok()?);
    }
    Some(strings)
}

/// A device tree property: a name and a typed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    name: String,
    value: Value,
}

impl Property {
    /// Creates a new `Property` with the given name and value.
    #[must_use]
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Returns the name of this property.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of this property.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Replaces the value of this property.
    pub fn set_value(&mut self, value: Value) {
        self.value = value;
    }
}

impl TryFrom<FdtProperty<'_>> for Property {
    type Error = Error;

    fn try_from(prop: FdtProperty<'_>) -> Result<Self, Self::Error> {
        Ok(Property {
            name: prop.name().to_string(),
            value: Value::from_bytes(prop.value()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_canonical() {
        assert_eq!(Value::from_bytes(&[]), Value::Empty);
        assert_eq!(Value::from_bytes(&[0, 0, 0, 7]), Value::u32(7));
        assert_eq!(
            Value::from_bytes(&[0, 0, 0, 1, 0, 0, 0, 2]),
            Value::cells([1, 2])
        );
        assert_eq!(Value::from_bytes(b"hello\0"), Value::str("hello"));
        assert_eq!(
            Value::from_bytes(b"a\0bc\0"),
            Value::strs(["a", "bc"])
        );
        assert_eq!(Value::from_bytes(&[1, 2, 3]), Value::bytes([1, 2, 3]));
        // Interior empty string disqualifies the text interpretation.
        assert_eq!(
            Value::from_bytes(b"ab\0\0"),
            Value::u32(u32::from_be_bytes(*b"ab\0\0"))
        );
    }

    #[test]
    fn round_trip_bytes() {
        for value in [
            Value::Empty,
            Value::u32(0xffff_ffff),
            Value::cells([1, 2, 3]),
            Value::str("panel"),
            Value::strs(["one", "two"]),
            Value::bytes([5, 120, 1, 0x29, 9]),
        ] {
            assert_eq!(Value::from_bytes(&value.to_bytes()), value);
        }
    }

    #[test]
    fn to_bytes_reconstructs_raw_encoding() {
        assert_eq!(Value::str("ab").to_bytes(), b"ab\0");
        assert_eq!(Value::strs(["a", "b"]).to_bytes(), b"a\0b\0");
        assert_eq!(Value::u32(1).to_bytes(), [0, 0, 0, 1]);
        assert_eq!(Value::Empty.to_bytes(), Vec::<u8>::new());
    }
}
