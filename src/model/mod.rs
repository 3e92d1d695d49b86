// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A read-write, in-memory representation of a device tree.
//!
//! This module provides the [`DeviceTree`], [`Node`], [`Property`], and
//! [`Value`] types. Unlike the zero-copy [`crate::fdt`] view, property
//! values here are typed: a [`Value`] is a tagged variant (empty marker,
//! cells, strings, or raw bytes), classified once at decode time. The tree
//! can be modified freely and serialized back to a DTB.

mod node;
mod value;

pub use node::{Node, NodeBuilder};
pub use value::{Property, Value};

use crate::error::Error;
use crate::fdt::Fdt;
use crate::writer;

/// A 64-bit memory reservation, carried through decode and encode verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryReservation {
    address: u64,
    size: u64,
}

impl MemoryReservation {
    /// Creates a new [`MemoryReservation`].
    #[must_use]
    pub fn new(address: u64, size: u64) -> Self {
        Self { address, size }
    }

    /// Returns the physical address of the reserved memory region.
    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Returns the size of the reserved memory region.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// A mutable, in-memory representation of a device tree.
///
/// # Examples
///
/// ```
/// # use rocknix_dtbo::model::{DeviceTree, Node};
/// let mut tree = DeviceTree::new(Node::new(""));
/// tree.root_mut().add_child(Node::new("child"));
/// assert!(tree.find_node("/child").is_some());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTree {
    root: Node,
    /// The memory reservations for this device tree.
    pub memory_reservations: Vec<MemoryReservation>,
}

impl DeviceTree {
    /// Creates a new `DeviceTree` with the given root node.
    #[must_use]
    pub fn new(root: Node) -> Self {
        Self {
            root,
            memory_reservations: Vec::new(),
        }
    }

    /// Decodes a DTB blob into an owned, typed tree.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if the blob is malformed: bad magic,
    /// unsupported version, truncated blocks, unterminated nodes, or a
    /// property name offset past the end of the strings block.
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let fdt = Fdt::new(data)?;
        let root = Node::from_fdt_node(&fdt.root()?)?;
        Ok(DeviceTree {
            root,
            memory_reservations: fdt.memory_reservations().collect(),
        })
    }

    /// Serializes the `DeviceTree` to a flattened device tree blob.
    ///
    /// Encoding never fails for a structurally valid tree; lengths exceeding
    /// `u32::MAX` panic, which cannot happen for trees decoded from a valid
    /// blob.
    #[must_use]
    pub fn to_dtb(&self) -> Vec<u8> {
        writer::to_bytes(self)
    }

    /// Returns a reference to the root node of the device tree.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Returns a mutable reference to the root node of the device tree.
    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    /// Finds a node by its absolute path.
    #[must_use]
    pub fn find_node(&self, path: &str) -> Option<&Node> {
        if !path.starts_with('/') {
            return None;
        }
        let mut current_node = &self.root;
        for component in path.split('/').filter(|s| !s.is_empty()) {
            current_node = current_node.child(component)?;
        }
        Some(current_node)
    }

    /// Finds a node by its absolute path and returns a mutable reference.
    pub fn find_node_mut(&mut self, path: &str) -> Option<&mut Node> {
        if !path.starts_with('/') {
            return None;
        }
        let mut current_node = &mut self.root;
        for component in path.split('/').filter(|s| !s.is_empty()) {
            current_node = current_node.child_mut(component)?;
        }
        Some(current_node)
    }

    /// Returns the node at `path`, creating it and any missing intermediate
    /// nodes.
    ///
    /// `path` must be absolute; the leading `/` refers to the root.
    pub fn ensure_node(&mut self, path: &str) -> &mut Node {
        let mut current_node = &mut self.root;
        for component in path.split('/').filter(|s| !s.is_empty()) {
            if current_node.child(component).is_none() {
                current_node.add_child(Node::new(component));
            }
            current_node = current_node
                .child_mut(component)
                .expect("child inserted above");
        }
        current_node
    }

    /// Sets a property on the node at `path`, creating missing intermediate
    /// nodes and overwriting any prior value of the same name.
    pub fn set_property(&mut self, path: &str, name: impl Into<String>, value: Value) {
        self.ensure_node(path).add_property(Property::new(name, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_node_creates_intermediates() {
        let mut tree = DeviceTree::new(Node::new(""));
        tree.ensure_node("/a/b/c").add_property(Property::new("p", Value::u32(1)));
        assert!(tree.find_node("/a").is_some());
        assert!(tree.find_node("/a/b").is_some());
        assert_eq!(
            tree.find_node("/a/b/c").unwrap().u32("p"),
            Some(1)
        );
        // Re-ensuring does not clobber existing content.
        tree.ensure_node("/a/b");
        assert_eq!(tree.find_node("/a/b/c").unwrap().u32("p"), Some(1));
    }

    #[test]
    fn set_property_overwrites() {
        let mut tree = DeviceTree::new(Node::new(""));
        tree.set_property("/n", "p", Value::u32(1));
        tree.set_property("/n", "p", Value::u32(2));
        let node = tree.find_node("/n").unwrap();
        assert_eq!(node.properties().count(), 1);
        assert_eq!(node.u32("p"), Some(2));
    }
}
