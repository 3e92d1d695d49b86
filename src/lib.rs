// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A library for generating board-specific device tree overlays (DTBO)
//! for handheld panels.
//!
//! Handheld devices in the same family ship a generic stock device tree,
//! but individual boards differ in display timings, stick polarity, and
//! a handful of peripheral quirks. This crate turns a stock flattened
//! device tree blob into a small overlay blob that a boot loader merges
//! on top of the stock tree, adapting it to the concrete board.
//!
//! The crate provides:
//!
//! - A read-only, zero-copy FDT parser ([`fdt::Fdt`]).
//! - A mutable, typed in-memory tree ([`model::DeviceTree`]) that can be
//!   serialized back to a DTB.
//! - Symbol and phandle resolution over a parsed tree ([`symbols::Symbols`]).
//! - A display-timing synthesizer that derives a multi-refresh-rate mode
//!   table from the vendor timing set ([`timing`]).
//! - An overlay builder that records fixup relocation entries for
//!   cross-tree references ([`overlay::OverlayBuilder`]).
//! - The quirk policy engine tying it all together ([`generate`]).
//!
//! The whole pipeline is a pure function from `(stock bytes, options)` to
//! `(overlay bytes | error)`: it performs no I/O and holds no state across
//! invocations, so it can be called concurrently without locking.
//!
//! # Examples
//!
//! ```
//! use rocknix_dtbo::model::{DeviceTree, Node, Property, Value};
//!
//! // Build a tree, serialize it, parse it back.
//! let mut tree = DeviceTree::new(Node::new(""));
//! let child = Node::builder("child")
//!     .property(Property::new("my-property", Value::str("hello")))
//!     .build();
//! tree.root_mut().add_child(child);
//!
//! let dtb = tree.to_dtb();
//! let parsed = DeviceTree::from_bytes(&dtb).unwrap();
//! assert_eq!(tree, parsed);
//! assert_eq!(
//!     parsed.find_node("/child").unwrap().property("my-property").unwrap().value(),
//!     &Value::str("hello"),
//! );
//! ```

pub mod error;
pub mod fdt;
pub mod model;
pub mod overlay;
pub mod policy;
pub mod symbols;
pub mod timing;
mod writer;

pub use error::Error;
pub use model::MemoryReservation;
pub use policy::{Flag, Options, generate};

/// A specialized [`Result`](core::result::Result) type for this crate.
pub type Result<T> = core::result::Result<T, Error>;
