// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Incremental construction of a device tree overlay.
//!
//! An overlay is itself a device tree: `fragment@<n>` nodes under the root
//! each name a merge target and carry the patch content in an `__overlay__`
//! child. References into the base tree cannot be resolved at generation
//! time, so every such reference is written as the placeholder value
//! [`PHANDLE_PLACEHOLDER`] together with a relocation record under
//! `__fixups__` (resolved against the base tree's symbol table at merge
//! time) or `__local_fixups__` (resolved within the overlay itself).

use crate::error::Error;
use crate::model::{DeviceTree, Node, Property, Value};

/// Sentinel written where a base-tree phandle will be patched in by the
/// loader. Every occurrence must have exactly one matching fixup entry.
pub const PHANDLE_PLACEHOLDER: u32 = 0xffff_ffff;

/// Fragment indices are scanned in 0..100; running out is fatal.
const MAX_FRAGMENTS: u32 = 100;

const FIXUPS_NODE: &str = "__fixups__";
const LOCAL_FIXUPS_NODE: &str = "__local_fixups__";

/// Builds an overlay tree fragment by fragment.
///
/// The builder tracks the next free fragment index and the next local
/// phandle; [`OverlayBuilder::finish`] re-orders the bookkeeping nodes and
/// hands back the finished tree for encoding.
#[derive(Debug)]
pub struct OverlayBuilder {
    tree: DeviceTree,
    next_phandle: u32,
}

impl Default for OverlayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayBuilder {
    /// Creates an empty overlay.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: DeviceTree::new(Node::new("")),
            next_phandle: 1,
        }
    }

    /// Adds a new `fragment@<n>` with an empty `__overlay__` child and
    /// returns the `__overlay__` node's path.
    ///
    /// `target` is either an absolute path in the base tree (stored as a
    /// literal `target-path`) or a `&label` symbol reference (stored as a
    /// placeholder `target` phandle plus a fixup under the label).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResourceExhausted`] when all 100 fragment indices
    /// are taken.
    pub fn add_fragment(&mut self, target: &str) -> crate::Result<String> {
        let index = (0..MAX_FRAGMENTS)
            .find(|n| self.tree.root().child(&format!("fragment@{n}")).is_none())
            .ok_or(Error::ResourceExhausted("overlay fragment indices"))?;
        let name = format!("fragment@{index}");

        let mut fragment = Node::new(name.clone());
        if let Some(label) = target.strip_prefix('&') {
            fragment.add_property(Property::new("target", Value::u32(PHANDLE_PLACEHOLDER)));
            self.add_fixup(label, &format!("/{name}:target:0"));
        } else {
            fragment.add_property(Property::new("target-path", Value::str(target)));
        }
        fragment.add_child(Node::new("__overlay__"));
        self.tree.root_mut().add_child(fragment);

        Ok(format!("/{name}/__overlay__"))
    }

    /// Sets a property at `path`, creating missing intermediate nodes and
    /// overwriting any prior value of the same name.
    pub fn set_property(&mut self, path: &str, name: impl Into<String>, value: Value) {
        self.tree.set_property(path, name, value);
    }

    /// Appends a relocation location to the ordered list kept for `label`
    /// under `__fixups__`.
    ///
    /// `location` has the form `<path>:<property>:<byte-offset>` and names
    /// one placeholder occurrence the loader must rewrite with the phandle
    /// that `label` resolves to in the base tree.
    pub fn add_fixup(&mut self, label: &str, location: &str) {
        let fixups = self.tree.ensure_node(&format!("/{FIXUPS_NODE}"));
        let value = match fixups.property(label).map(Property::value) {
            Some(Value::Str(prev)) => Value::strs([prev.clone(), location.to_owned()]),
            Some(Value::StrList(prev)) => {
                let mut locations = prev.clone();
                locations.push(location.to_owned());
                Value::StrList(locations)
            }
            _ => Value::str(location),
        };
        fixups.add_property(Property::new(label, value));
    }

    /// Records that the property `name` at `path` holds a phandle pointing
    /// at a node inside this overlay, by mirroring `path` under
    /// `__local_fixups__` with a zero-offset entry.
    pub fn add_local_fixup(&mut self, path: &str, name: impl Into<String>) {
        self.tree
            .set_property(&format!("/{LOCAL_FIXUPS_NODE}{path}"), name, Value::u32(0));
    }

    /// Allocates the next overlay-local phandle value and exports `label`
    /// for `path` under the overlay's own symbol table.
    ///
    /// The caller is responsible for writing the returned value into the
    /// node's `phandle` property.
    pub fn add_label(&mut self, label: &str, path: &str) -> u32 {
        let phandle = self.next_phandle;
        self.next_phandle += 1;
        self.tree
            .set_property("/__symbols__", label, Value::str(path));
        phandle
    }

    /// Finalizes the overlay: `__fixups__` and `__local_fixups__` are
    /// detached and re-appended as the last two children of the root, in
    /// that order, so loaders can scan the structure block once.
    #[must_use]
    pub fn finish(mut self) -> DeviceTree {
        for name in [FIXUPS_NODE, LOCAL_FIXUPS_NODE] {
            if let Some(node) = self.tree.root_mut().remove_child(name) {
                self.tree.root_mut().add_child(node);
            }
        }
        self.tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_indices_are_sequential() {
        let mut builder = OverlayBuilder::new();
        assert_eq!(builder.add_fragment("/").unwrap(), "/fragment@0/__overlay__");
        assert_eq!(
            builder.add_fragment("&joypad").unwrap(),
            "/fragment@1/__overlay__"
        );
        assert_eq!(builder.add_fragment("/").unwrap(), "/fragment@2/__overlay__");
    }

    #[test]
    fn fragment_space_is_bounded() {
        let mut builder = OverlayBuilder::new();
        for _ in 0..100 {
            builder.add_fragment("/").unwrap();
        }
        assert!(matches!(
            builder.add_fragment("/"),
            Err(Error::ResourceExhausted(_))
        ));
    }

    #[test]
    fn symbol_target_records_placeholder_and_fixup() {
        let mut builder = OverlayBuilder::new();
        builder.add_fragment("&joypad").unwrap();
        let tree = builder.finish();

        let fragment = tree.find_node("/fragment@0").unwrap();
        assert_eq!(fragment.u32("target"), Some(PHANDLE_PLACEHOLDER));
        assert!(fragment.child("__overlay__").is_some());

        let fixups = tree.find_node("/__fixups__").unwrap();
        assert_eq!(
            fixups.str("joypad"),
            Some("/fragment@0:target:0")
        );
    }

    #[test]
    fn path_target_is_literal() {
        let mut builder = OverlayBuilder::new();
        builder.add_fragment("/").unwrap();
        let tree = builder.finish();
        let fragment = tree.find_node("/fragment@0").unwrap();
        assert_eq!(fragment.str("target-path"), Some("/"));
        assert!(tree.find_node("/__fixups__").is_none());
    }

    #[test]
    fn fixups_accumulate_in_order() {
        let mut builder = OverlayBuilder::new();
        builder.add_fixup("pcfg_pull_up", "/a:rockchip,pins:12");
        builder.add_fixup("pcfg_pull_up", "/a:rockchip,pins:28");
        let tree = builder.finish();
        let fixups = tree.find_node("/__fixups__").unwrap();
        assert_eq!(
            fixups.property("pcfg_pull_up").unwrap().value(),
            &Value::strs(["/a:rockchip,pins:12", "/a:rockchip,pins:28"])
        );
    }

    #[test]
    fn bookkeeping_nodes_come_last() {
        let mut builder = OverlayBuilder::new();
        builder.add_fixup("label", "/x:p:0");
        builder.add_local_fixup("/fragment@0/__overlay__/keys", "pinctrl-0");
        builder.add_fragment("/").unwrap();
        let tree = builder.finish();

        let names: Vec<&str> = tree.root().children().map(Node::name).collect();
        assert_eq!(
            names,
            ["fragment@0", "__fixups__", "__local_fixups__"]
        );
    }

    #[test]
    fn local_fixup_mirrors_path() {
        let mut builder = OverlayBuilder::new();
        builder.add_local_fixup("/fragment@0/__overlay__/keys", "pinctrl-0");
        let tree = builder.finish();
        assert_eq!(
            tree.find_node("/__local_fixups__/fragment@0/__overlay__/keys")
                .unwrap()
                .u32("pinctrl-0"),
            Some(0)
        );
    }

    #[test]
    fn labels_allocate_increasing_phandles() {
        let mut builder = OverlayBuilder::new();
        assert_eq!(builder.add_label("a", "/x"), 1);
        assert_eq!(builder.add_label("b", "/y"), 2);
        let tree = builder.finish();
        assert_eq!(tree.find_node("/__symbols__").unwrap().str("a"), Some("/x"));
    }
}
