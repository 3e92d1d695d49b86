// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A read-only view of a device tree property.

use super::{FDT_TAGSIZE, Fdt, FdtResult, FdtToken, read_u32};
use crate::error::{FormatError, FormatErrorKind};

/// A property of a device tree node.
///
/// The raw value bytes are exposed here; the typed interpretation happens in
/// [`crate::model::Value`] when the owned tree is built.
#[derive(Debug, PartialEq, Eq)]
pub struct FdtProperty<'a> {
    name: &'a str,
    value: &'a [u8],
}

impl<'a> FdtProperty<'a> {
    /// Returns the name of this property.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.name
    }

    /// Returns the raw value bytes of this property.
    #[must_use]
    pub fn value(&self) -> &'a [u8] {
        self.value
    }
}

/// An iterator over the properties of a device tree node.
pub(crate) enum FdtPropIter<'a> {
    Start { fdt: &'a Fdt<'a>, offset: usize },
    Running { fdt: &'a Fdt<'a>, offset: usize },
    Error,
}

impl<'a> Iterator for FdtPropIter<'a> {
    type Item = FdtResult<FdtProperty<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Start { fdt, offset } => {
                let mut offset = *offset;
                offset += FDT_TAGSIZE; // Skip FDT_BEGIN_NODE
                offset = match fdt.find_string_end(offset) {
                    Ok(offset) => offset,
                    Err(e) => {
                        *self = Self::Error;
                        return Some(Err(e));
                    }
                };
                offset = Fdt::align_tag_offset(offset);
                *self = Self::Running { fdt, offset };
                self.next()
            }
            Self::Running { fdt, offset } => match Self::try_next(fdt, offset) {
                Some(Ok(val)) => Some(Ok(val)),
                Some(Err(e)) => {
                    *self = Self::Error;
                    Some(Err(e))
                }
                None => None,
            },
            Self::Error => None,
        }
    }
}

impl<'a> FdtPropIter<'a> {
    fn try_next(fdt: &'a Fdt<'a>, offset: &mut usize) -> Option<FdtResult<FdtProperty<'a>>> {
        loop {
            let token = match fdt.read_token(*offset) {
                Ok(token) => token,
                Err(e) => return Some(Err(e)),
            };
            match token {
                FdtToken::Prop => {
                    let len = match read_u32(fdt.data, *offset + FDT_TAGSIZE) {
                        Ok(val) => val as usize,
                        Err(e) => return Some(Err(e)),
                    };
                    let nameoff = match read_u32(fdt.data, *offset + 2 * FDT_TAGSIZE) {
                        Ok(val) => val as usize,
                        Err(e) => return Some(Err(e)),
                    };
                    let value_offset = *offset + 3 * FDT_TAGSIZE;
                    *offset = Fdt::align_tag_offset(value_offset + len);
                    let name = match fdt.string(nameoff) {
                        Ok(name) => name,
                        Err(e) => return Some(Err(e)),
                    };
                    let value = match fdt.data.get(value_offset..value_offset + len) {
                        Some(value) => value,
                        None => {
                            return Some(Err(FormatError::new(
                                FormatErrorKind::InvalidLength,
                                value_offset,
                            )));
                        }
                    };
                    return Some(Ok(FdtProperty { name, value }));
                }
                FdtToken::Nop => *offset += FDT_TAGSIZE,
                _ => return None,
            }
        }
    }
}
