// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Symbol and phandle resolution over a decoded device tree.
//!
//! A stock blob exports labels through its `__symbols__` node (label → path)
//! and cross-references nodes through `phandle` properties. This module
//! builds both indexes in a single traversal so the policy engine can map
//! freely between labels, paths, and phandle values without re-walking the
//! tree.

use indexmap::IndexMap;
use twox_hash::xxhash64;

use crate::error::{Error, FormatError, FormatErrorKind};
use crate::model::DeviceTree;

/// The node exporting label → path mappings.
pub(crate) const SYMBOLS_NODE: &str = "__symbols__";

/// Label and phandle indexes over one source tree, rebuilt once per decode.
///
/// The indexes borrow nothing from the tree; they hold owned path strings so
/// the tree can be dropped or mutated independently.
#[derive(Debug)]
pub struct Symbols {
    labels: IndexMap<String, String, xxhash64::State>,
    paths: IndexMap<String, String, xxhash64::State>,
    phandles: IndexMap<u32, String, xxhash64::State>,
}

impl Symbols {
    /// Builds the indexes for `tree`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Format`] if two nodes declare the same phandle
    /// value; phandles are unique by the format's contract, and a duplicate
    /// makes every reference to it ambiguous.
    pub fn new(tree: &DeviceTree) -> crate::Result<Self> {
        let hasher = || xxhash64::State::with_seed(0xdead_cafe);
        let mut symbols = Symbols {
            labels: IndexMap::with_hasher(hasher()),
            paths: IndexMap::with_hasher(hasher()),
            phandles: IndexMap::with_hasher(hasher()),
        };

        symbols.index_phandles(tree.root(), "")?;

        if let Some(table) = tree.root().child(SYMBOLS_NODE) {
            for prop in table.properties() {
                if let Some(path) = prop.value().as_str() {
                    symbols
                        .labels
                        .insert(prop.name().to_owned(), path.to_owned());
                    // First label for a path wins, matching lookup order.
                    symbols
                        .paths
                        .entry(path.to_owned())
                        .or_insert_with(|| prop.name().to_owned());
                }
            }
        }

        Ok(symbols)
    }

    fn index_phandles(&mut self, node: &crate::model::Node, path: &str) -> crate::Result<()> {
        if let Some(value) = node.u32("phandle") {
            if self.phandles.insert(value, path.to_owned()).is_some() {
                return Err(Error::Format(FormatError::new(
                    FormatErrorKind::DuplicatePhandle(value),
                    0,
                )));
            }
        }
        for child in node.children() {
            let child_path = format!("{path}/{}", child.name());
            self.index_phandles(child, &child_path)?;
        }
        Ok(())
    }

    /// Returns the path of the node that declares the given phandle value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no node declares it.
    pub fn phandle_path(&self, value: u32) -> crate::Result<&str> {
        self.phandles
            .get(&value)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found("phandle", format!("0x{value:x}")))
    }

    /// Returns the path a label resolves to.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the source tree exports no such label.
    pub fn label_path(&self, label: &str) -> crate::Result<&str> {
        self.labels
            .get(label)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found("symbol", label))
    }

    /// Returns the exported label whose value equals `path`.
    ///
    /// A fixup against an unexported node is impossible, so callers treat
    /// this as fatal unless the surrounding quirk is optional.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no label points at `path`.
    pub fn label_for_path(&self, path: &str) -> crate::Result<&str> {
        self.paths
            .get(path)
            .map(String::as_str)
            .ok_or_else(|| Error::not_found("symbol for path", path))
    }

    /// Resolves a phandle value straight to the exported label of its node.
    pub(crate) fn label_for_phandle(&self, value: u32) -> crate::Result<&str> {
        let path = self.phandle_path(value)?;
        self.label_for_path(path)
    }
}
