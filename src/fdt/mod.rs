// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A read-only API for parsing and traversing a [Flattened Device Tree (FDT)].
//!
//! This module provides the [`Fdt`] struct, a zero-copy view of an FDT blob.
//! It validates the fixed header and walks the structure block lazily; the
//! typed, owned representation lives in [`crate::model`] and is built from
//! this view once per decode.
//!
//! [Flattened Device Tree (FDT)]: https://devicetree-specification.readthedocs.io/en/latest/chapter5-flattened-format.html

mod node;
mod property;

use core::ffi::CStr;

use zerocopy::byteorder::big_endian;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub use node::FdtNode;
pub use property::FdtProperty;

use crate::error::{FormatError, FormatErrorKind};
use crate::model::MemoryReservation;

/// Version of the FDT specification supported by this library.
const FDT_VERSION: u32 = 17;
pub(crate) const FDT_TAGSIZE: usize = core::mem::size_of::<u32>();
pub(crate) const FDT_MAGIC: u32 = 0xd00d_feed;
pub(crate) const FDT_BEGIN_NODE: u32 = 0x1;
pub(crate) const FDT_END_NODE: u32 = 0x2;
pub(crate) const FDT_PROP: u32 = 0x3;
pub(crate) const FDT_NOP: u32 = 0x4;
pub(crate) const FDT_END: u32 = 0x9;

pub(crate) type FdtResult<T> = Result<T, FormatError>;

// https://devicetree-specification.readthedocs.io/en/latest/chapter5-flattened-format.html#header
#[repr(C, packed)]
#[derive(Debug, Copy, Clone, FromBytes, IntoBytes, Unaligned, Immutable, KnownLayout)]
pub(crate) struct FdtHeader {
    /// Magic number of the device tree.
    pub(crate) magic: big_endian::U32,
    /// Total size of the device tree.
    pub(crate) totalsize: big_endian::U32,
    /// Offset of the device tree structure.
    pub(crate) off_dt_struct: big_endian::U32,
    /// Offset of the device tree strings.
    pub(crate) off_dt_strings: big_endian::U32,
    /// Offset of the memory reservation map.
    pub(crate) off_mem_rsvmap: big_endian::U32,
    /// Version of the device tree.
    pub(crate) version: big_endian::U32,
    /// Last compatible version of the device tree.
    pub(crate) last_comp_version: big_endian::U32,
    /// Physical ID of the boot CPU.
    pub(crate) boot_cpuid_phys: big_endian::U32,
    /// Size of the device tree strings.
    pub(crate) size_dt_strings: big_endian::U32,
    /// Size of the device tree structure.
    pub(crate) size_dt_struct: big_endian::U32,
}

/// A flattened device tree.
#[derive(Debug)]
pub struct Fdt<'a> {
    pub(crate) data: &'a [u8],
}

/// A token in the device tree structure.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FdtToken {
    BeginNode,
    EndNode,
    Prop,
    Nop,
    End,
}

impl TryFrom<u32> for FdtToken {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            FDT_BEGIN_NODE => Ok(FdtToken::BeginNode),
            FDT_END_NODE => Ok(FdtToken::EndNode),
            FDT_PROP => Ok(FdtToken::Prop),
            FDT_NOP => Ok(FdtToken::Nop),
            FDT_END => Ok(FdtToken::End),
            _ => Err(value),
        }
    }
}

impl<'a> Fdt<'a> {
    /// Creates a new `Fdt` from the given byte slice.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the slice is shorter than the fixed
    /// header, the magic number is wrong, the version is unsupported, or the
    /// recorded total size disagrees with the slice length.
    pub fn new(data: &'a [u8]) -> FdtResult<Self> {
        if data.len() < core::mem::size_of::<FdtHeader>() {
            return Err(FormatError::new(FormatErrorKind::InvalidLength, 0));
        }

        let fdt = Fdt { data };
        let header = fdt.header();

        if header.magic.get() != FDT_MAGIC {
            return Err(FormatError::new(FormatErrorKind::InvalidMagic, 0));
        }
        if !(header.last_comp_version.get()..=header.version.get()).contains(&FDT_VERSION) {
            return Err(FormatError::new(
                FormatErrorKind::UnsupportedVersion(header.version.get()),
                20,
            ));
        }
        if header.totalsize.get() as usize != data.len() {
            return Err(FormatError::new(FormatErrorKind::InvalidLength, 4));
        }

        Ok(fdt)
    }

    pub(crate) fn header(&self) -> &FdtHeader {
        let (header, _remaining_bytes) = FdtHeader::ref_from_prefix(self.data)
            .expect("new() checks if the slice is at least as big as the header");
        header
    }

    /// Returns the root node of the device tree.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the structure block does not start with
    /// a begin-node token.
    pub fn root(&self) -> FdtResult<FdtNode<'_>> {
        let offset = self.header().off_dt_struct.get() as usize;
        let token = self.read_token(offset)?;
        if token != FdtToken::BeginNode {
            return Err(FormatError::new(
                FormatErrorKind::BadToken(FDT_BEGIN_NODE),
                offset,
            ));
        }
        Ok(FdtNode { fdt: self, offset })
    }

    /// Returns an iterator over the memory reservation block.
    ///
    /// The iterator stops at the terminating all-zero entry, or at the end
    /// of the blob for a truncated block.
    pub fn memory_reservations(&self) -> impl Iterator<Item = MemoryReservation> + use<'_> {
        let offset = self.header().off_mem_rsvmap.get() as usize;
        MemReserveIter {
            data: self.data,
            offset,
        }
    }

    pub(crate) fn read_token(&self, offset: usize) -> FdtResult<FdtToken> {
        let val = read_u32(self.data, offset)?;
        FdtToken::try_from(val).map_err(|t| FormatError::new(FormatErrorKind::BadToken(t), offset))
    }

    /// Return a string from the strings block.
    pub(crate) fn string(&self, string_block_offset: usize) -> FdtResult<&'a str> {
        let header = self.header();
        let strings_start = header.off_dt_strings.get() as usize;
        let strings_size = header.size_dt_strings.get() as usize;
        let strings_end = strings_start + strings_size;
        let string_start = strings_start + string_block_offset;

        if string_start >= strings_end {
            return Err(FormatError::new(
                FormatErrorKind::InvalidLength,
                string_start,
            ));
        }

        self.string_at_offset(string_start, Some(strings_end))
    }

    /// Return a NUL-terminated string from a given offset.
    pub(crate) fn string_at_offset(&self, offset: usize, end: Option<usize>) -> FdtResult<&'a str> {
        let slice = match end {
            Some(end) => self.data.get(offset..end),
            None => self.data.get(offset..),
        }
        .ok_or_else(|| FormatError::new(FormatErrorKind::InvalidString, offset))?;

        match CStr::from_bytes_until_nul(slice).map(CStr::to_str) {
            Ok(Ok(val)) => Ok(val),
            _ => Err(FormatError::new(FormatErrorKind::InvalidString, offset)),
        }
    }

    pub(crate) fn find_string_end(&self, start: usize) -> FdtResult<usize> {
        let mut offset = start;
        loop {
            match self.data.get(offset) {
                Some(0) => return Ok(offset + 1),
                Some(_) => {}
                None => return Err(FormatError::new(FormatErrorKind::InvalidString, start)),
            }
            offset += 1;
        }
    }

    /// Skips past a whole node (name, properties, children) and returns the
    /// offset right after its end-node token.
    pub(crate) fn next_sibling_offset(&self, mut offset: usize) -> FdtResult<usize> {
        offset += FDT_TAGSIZE; // Skip FDT_BEGIN_NODE

        // Skip node name
        offset = self.find_string_end(offset)?;
        offset = Self::align_tag_offset(offset);

        // Skip properties
        loop {
            let token = self.read_token(offset)?;
            match token {
                FdtToken::Prop => {
                    offset += FDT_TAGSIZE; // skip FDT_PROP
                    offset = self.next_property_offset(offset)?;
                }
                FdtToken::Nop => offset += FDT_TAGSIZE,
                _ => break,
            }
        }

        // Skip child nodes
        loop {
            let token = self.read_token(offset)?;
            match token {
                FdtToken::BeginNode => {
                    offset = self.next_sibling_offset(offset)?;
                }
                FdtToken::EndNode => {
                    offset += FDT_TAGSIZE;
                    break;
                }
                FdtToken::Nop => offset += FDT_TAGSIZE,
                _ => {
                    return Err(FormatError::new(FormatErrorKind::BadToken(FDT_END), offset));
                }
            }
        }

        Ok(offset)
    }

    pub(crate) fn next_property_offset(&self, mut offset: usize) -> FdtResult<usize> {
        let len = read_u32(self.data, offset)? as usize;
        offset += FDT_TAGSIZE; // skip value length
        offset += FDT_TAGSIZE; // skip name offset
        offset += len; // skip property value

        Ok(Self::align_tag_offset(offset))
    }

    pub(crate) fn align_tag_offset(offset: usize) -> usize {
        offset.next_multiple_of(FDT_TAGSIZE)
    }
}

pub(crate) fn read_u32(data: &[u8], offset: usize) -> FdtResult<u32> {
    big_endian::U32::ref_from_prefix(data.get(offset..).unwrap_or(&[]))
        .map(|(val, _)| val.get())
        .map_err(|_e| FormatError::new(FormatErrorKind::InvalidLength, offset))
}

struct MemReserveIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl Iterator for MemReserveIter<'_> {
    type Item = MemoryReservation;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = self.data.get(self.offset..self.offset + 16)?;
        let (address, _) = big_endian::U64::read_from_prefix(entry).ok()?;
        let (size, _) = big_endian::U64::read_from_prefix(&entry[8..]).ok()?;
        if address.get() == 0 && size.get() == 0 {
            return None;
        }
        self.offset += 16;
        Some(MemoryReservation::new(address.get(), size.get()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FDT_HEADER_OK: &[u8] = &[
        0xd0, 0x0d, 0xfe, 0xed, // magic
        0x00, 0x00, 0x00, 0x3c, // totalsize = 60
        0x00, 0x00, 0x00, 0x38, // off_dt_struct = 56
        0x00, 0x00, 0x00, 0x3c, // off_dt_strings = 60
        0x00, 0x00, 0x00, 0x28, // off_mem_rsvmap = 40
        0x00, 0x00, 0x00, 0x11, // version = 17
        0x00, 0x00, 0x00, 0x10, // last_comp_version = 16
        0x00, 0x00, 0x00, 0x00, // boot_cpuid_phys = 0
        0x00, 0x00, 0x00, 0x00, // size_dt_strings = 0
        0x00, 0x00, 0x00, 0x04, // size_dt_struct = 4
        0x00, 0x00, 0x00, 0x00, // memory reservation
        0x00, 0x00, 0x00, 0x00, // ...
        0x00, 0x00, 0x00, 0x00, // ...
        0x00, 0x00, 0x00, 0x00, // ...
        0x00, 0x00, 0x00, 0x09, // dt struct
    ];

    #[test]
    fn header_is_parsed_correctly() {
        let fdt = Fdt::new(FDT_HEADER_OK).unwrap();
        let header = fdt.header();

        assert_eq!(header.totalsize.get(), 60);
        assert_eq!(header.off_dt_struct.get(), 56);
        assert_eq!(header.off_dt_strings.get(), 60);
        assert_eq!(header.off_mem_rsvmap.get(), 40);
        assert_eq!(header.version.get(), 17);
        assert_eq!(header.last_comp_version.get(), 16);
        assert_eq!(header.boot_cpuid_phys.get(), 0);
        assert_eq!(header.size_dt_strings.get(), 0);
        assert_eq!(header.size_dt_struct.get(), 4);
    }

    #[test]
    fn invalid_magic() {
        let mut header = FDT_HEADER_OK.to_vec();
        header[0] = 0x00;
        let result = Fdt::new(&header);
        assert!(matches!(result, Err(e) if matches!(e.kind, FormatErrorKind::InvalidMagic)));
    }

    #[test]
    fn invalid_length() {
        let header = &FDT_HEADER_OK[..10];
        let result = Fdt::new(header);
        assert!(matches!(result, Err(e) if matches!(e.kind, FormatErrorKind::InvalidLength)));
    }

    #[test]
    fn totalsize_mismatch() {
        let mut blob = FDT_HEADER_OK.to_vec();
        blob.push(0);
        let result = Fdt::new(&blob);
        assert!(matches!(result, Err(e) if matches!(e.kind, FormatErrorKind::InvalidLength)));
    }

    #[test]
    fn unsupported_version() {
        let mut header = FDT_HEADER_OK.to_vec();
        header[23] = 0x10;
        let result = Fdt::new(&header);
        assert!(matches!(result, Err(e) if matches!(e.kind, FormatErrorKind::UnsupportedVersion(16))));
    }

    #[test]
    fn empty_memory_reservation_block() {
        let fdt = Fdt::new(FDT_HEADER_OK).unwrap();
        assert_eq!(fdt.memory_reservations().count(), 0);
    }
}
