// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Keyed registry of output-table builders.
//!
//! Responsibilities:
//! - Maintains at most one live builder per group key, created lazily on
//!   first write and removed on retraction or finish.
//! - Iterates live builders in creation order so flush-at-finish output is
//!   stable.
//!
//! Key exported interfaces:
//! - Types: `TableBuilderCache`.

use std::collections::HashMap;

use crate::common::error::ExecResult;
use crate::exec::builder::TableBuilder;
use crate::exec::group_key::GroupKey;

pub struct TableBuilderCache {
    builders: HashMap<GroupKey, TableBuilder>,
    // Creation order, kept in sync with `builders`; gives for_each a stable,
    // engine-defined iteration order.
    order: Vec<GroupKey>,
    builder_capacity: usize,
}

impl TableBuilderCache {
    pub fn new(builder_capacity: usize) -> Self {
        Self {
            builders: HashMap::new(),
            order: Vec::new(),
            builder_capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Returns the builder for `key`, creating it if absent. `is_new` tells
    /// the caller to install the output schema exactly once.
    pub fn table_builder(&mut self, key: &GroupKey) -> (&mut TableBuilder, bool) {
        let is_new = !self.builders.contains_key(key);
        if is_new {
            self.order.push(key.clone());
            self.builders.insert(
                key.clone(),
                TableBuilder::new(key.clone(), self.builder_capacity),
            );
        }
        let builder = self.builders.get_mut(key).expect("builder just ensured");
        (builder, is_new)
    }

    pub fn get_mut(&mut self, key: &GroupKey) -> Option<&mut TableBuilder> {
        self.builders.get_mut(key)
    }

    /// Applies `f` to every live (key, builder) pair in creation order.
    pub fn for_each<F>(&mut self, mut f: F)
    where
        F: FnMut(&GroupKey, &mut TableBuilder),
    {
        for key in &self.order {
            if let Some(builder) = self.builders.get_mut(key) {
                f(key, builder);
            }
        }
    }

    /// Like `for_each` but short-circuits on the first error.
    pub fn try_for_each<F>(&mut self, mut f: F) -> ExecResult<()>
    where
        F: FnMut(&GroupKey, &mut TableBuilder) -> ExecResult<()>,
    {
        for key in &self.order {
            if let Some(builder) = self.builders.get_mut(key) {
                f(key, builder)?;
            }
        }
        Ok(())
    }

    /// Drops buffered rows for `key` but keeps the builder and its schema.
    /// No-op for unknown keys.
    pub fn discard_table(&mut self, key: &GroupKey) {
        if let Some(builder) = self.builders.get_mut(key) {
            builder.clear_data();
        }
    }

    /// Removes the builder for `key` entirely; a later write re-creates it.
    /// No-op for unknown keys.
    pub fn expire_table(&mut self, key: &GroupKey) {
        if self.builders.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    /// Removes every builder. Used when a stage fails and buffered output
    /// must not be emitted.
    pub fn clear(&mut self) {
        self.builders.clear();
        self.order.clear();
    }
}
