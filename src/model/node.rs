// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use indexmap::IndexMap;
use twox_hash::xxhash64;

use super::value::{Property, Value};
use crate::error::Error;
use crate::fdt::FdtNode;

type Map<V> = IndexMap<String, V, xxhash64::State>;

fn new_map<V>() -> Map<V> {
    IndexMap::with_hasher(xxhash64::State::with_seed(0xdead_cafe))
}

/// A mutable, in-memory representation of a device tree node.
///
/// Children and properties are stored in [`IndexMap`]s, which provide O(1)
/// lookups by name while preserving insertion order. Property order is part
/// of the encoded form, so it is never silently reordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    name: String,
    properties: Map<Property>,
    children: Map<Node>,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            name: String::new(),
            properties: new_map(),
            children: new_map(),
        }
    }
}

impl Node {
    /// Creates a new [`Node`] with the given name.
    ///
    /// The root node of a tree has the empty name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a new [`NodeBuilder`] with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(name)
    }

    /// Returns the name of this node.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns an iterator over the properties of this node, in insertion
    /// order.
    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Finds a property by its name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.get(name)
    }

    /// Finds a property by its name and returns a mutable reference to it.
    #[must_use]
    pub fn property_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.properties.get_mut(name)
    }

    /// Adds a property to this node, replacing any property of the same name
    /// in place.
    pub fn add_property(&mut self, property: Property) {
        self.properties.insert(property.name().to_owned(), property);
    }

    /// Removes a property from this node by its name.
    pub fn remove_property(&mut self, name: &str) -> Option<Property> {
        self.properties.shift_remove(name)
    }

    /// Returns an iterator over the children of this node, in insertion
    /// order.
    pub fn children(&self) -> impl Iterator<Item = &Node> {
        self.children.values()
    }

    /// Finds a child by its name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.get(name)
    }

    /// Finds a child by its name and returns a mutable reference to it.
    #[must_use]
    pub fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.get_mut(name)
    }

    /// Adds a child to this node.
    pub fn add_child(&mut self, child: Node) {
        self.children.insert(child.name().to_owned(), child);
    }

    /// Removes a child from this node by its name, returning it.
    pub fn remove_child(&mut self, name: &str) -> Option<Node> {
        self.children.shift_remove(name)
    }

    /// Returns the single-cell value of the named property.
    #[must_use]
    pub fn u32(&self, name: &str) -> Option<u32> {
        self.property(name)?.value().as_u32()
    }

    /// Returns the cell-list value of the named property (a single cell
    /// yields a one-element list).
    #[must_use]
    pub fn cells(&self, name: &str) -> Option<Vec<u32>> {
        self.property(name)?.value().as_cells()
    }

    /// Returns the string value of the named property.
    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.property(name)?.value().as_str()
    }

    /// Returns the single-cell value of the named property, or `default`
    /// when the property is absent or not a cell.
    #[must_use]
    pub fn u32_or(&self, name: &str, default: u32) -> u32 {
        self.u32(name).unwrap_or(default)
    }

    /// Builds an owned node from a read-only [`FdtNode`], classifying every
    /// property value into its typed form.
    pub(crate) fn from_fdt_node(node: &FdtNode<'_>) -> Result<Self, Error> {
        let name = node.name().map_err(Error::from)?.to_string();

        let mut properties = new_map();
        for property in node.properties() {
            let property: Property = property.map_err(Error::from)?.try_into()?;
            properties.insert(property.name().to_owned(), property);
        }

        let mut children = new_map();
        for child in node.children() {
            let child = Node::from_fdt_node(&child.map_err(Error::from)?)?;
            children.insert(child.name().to_owned(), child);
        }

        Ok(Node {
            name,
            properties,
            children,
        })
    }
}

/// A builder for creating [`Node`]s.
#[derive(Debug, Default)]
pub struct NodeBuilder {
    node: Node,
}

impl NodeBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            node: Node::new(name),
        }
    }

    /// Adds a property to the node.
    #[must_use]
    pub fn property(mut self, property: Property) -> Self {
        self.node.add_property(property);
        self
    }

    /// Adds a property with the given name and value to the node.
    #[must_use]
    pub fn prop(self, name: impl Into<String>, value: Value) -> Self {
        self.property(Property::new(name, value))
    }

    /// Adds a child to the node.
    #[must_use]
    pub fn child(mut self, child: Node) -> Self {
        self.node.add_child(child);
        self
    }

    /// Builds the `Node`.
    #[must_use]
    pub fn build(self) -> Node {
        self.node
    }
}
