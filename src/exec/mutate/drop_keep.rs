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
use std::collections::HashSet;

use serde::Deserialize;

use super::{BuilderContext, SchemaMutator};
use crate::common::error::{ExecError, ExecResult};
use crate::exec::column::ColMeta;
use crate::exec::group_key::GroupKey;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DropSpec {
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct KeepSpec {
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Drops columns by explicit set or label predicate. Keep is a derived view
/// over Drop: a keep set is inverted against the incoming columns on every
/// mutate, and a keep predicate is the drop predicate flipped — there is no
/// separate keep evaluation path.
pub struct DropKeepMutator {
    drop_cols: Option<HashSet<String>>,
    keep_cols: Option<HashSet<String>>,
    predicate: Option<Box<dyn Fn(&str) -> bool + Send>>,
    flip_predicate: bool,
}

impl DropKeepMutator {
    pub fn from_drop_spec(spec: &DropSpec) -> ExecResult<Self> {
        if spec.columns.is_empty() {
            return Err(ExecError::validation(
                "drop error: no columns or predicate specified",
            ));
        }
        Ok(Self {
            drop_cols: Some(spec.columns.iter().cloned().collect()),
            keep_cols: None,
            predicate: None,
            flip_predicate: false,
        })
    }

    pub fn from_keep_spec(spec: &KeepSpec) -> ExecResult<Self> {
        if spec.columns.is_empty() {
            return Err(ExecError::validation(
                "keep error: no columns or predicate specified",
            ));
        }
        Ok(Self {
            drop_cols: None,
            keep_cols: Some(spec.columns.iter().cloned().collect()),
            predicate: None,
            flip_predicate: false,
        })
    }

    /// Drop every column the predicate selects.
    pub fn drop_where(predicate: impl Fn(&str) -> bool + Send + 'static) -> Self {
        Self {
            drop_cols: None,
            keep_cols: None,
            predicate: Some(Box::new(predicate)),
            flip_predicate: false,
        }
    }

    /// Keep every column the predicate selects, i.e. drop everything the
    /// predicate does not select.
    pub fn keep_where(predicate: impl Fn(&str) -> bool + Send + 'static) -> Self {
        Self {
            drop_cols: None,
            keep_cols: None,
            predicate: Some(Box::new(predicate)),
            flip_predicate: true,
        }
    }

    // A keep set may select columns that are absent from this table, so the
    // inversion is recomputed against the incoming columns on each call.
    fn keep_to_drop_cols(&mut self, cols: &[ColMeta]) {
        if let Some(keep) = &self.keep_cols {
            let drop: HashSet<String> = cols
                .iter()
                .filter(|c| !keep.contains(&c.label))
                .map(|c| c.label.clone())
                .collect();
            self.drop_cols = Some(drop);
        }
    }

    fn should_drop(&self, label: &str) -> bool {
        if let Some(drop) = &self.drop_cols {
            return drop.contains(label);
        }
        if let Some(predicate) = &self.predicate {
            let mut drop = predicate(label);
            if self.flip_predicate {
                drop = !drop;
            }
            return drop;
        }
        false
    }
}

impl SchemaMutator for DropKeepMutator {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> ExecResult<()> {
        self.keep_to_drop_cols(&ctx.cols);

        let mut new_cols = Vec::with_capacity(ctx.cols.len());
        let mut new_col_map = Vec::with_capacity(ctx.cols.len());
        let mut key_cols = Vec::with_capacity(ctx.key.len());
        let mut key_values = Vec::with_capacity(ctx.key.len());

        // Single pass: surviving columns, surviving key entries and the
        // source-column map are all recomputed together.
        for (i, c) in ctx.cols.iter().enumerate() {
            if self.should_drop(&c.label) {
                continue;
            }
            if let Some(key_idx) = ctx.key.col_idx(&c.label) {
                key_cols.push(c.clone());
                key_values.push(ctx.key.value(key_idx)?.clone());
            }
            new_cols.push(c.clone());
            new_col_map.push(ctx.col_map[i]);
        }

        ctx.cols = new_cols;
        ctx.col_map = new_col_map;
        ctx.key = GroupKey::new(key_cols, key_values)?;
        Ok(())
    }
}
