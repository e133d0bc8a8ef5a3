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
use serde::Deserialize;

use super::{BuilderContext, SchemaMutator};
use crate::common::error::{ExecError, ExecResult};
use crate::exec::column::{ColMeta, col_idx};
use crate::exec::group_key::GroupKey;

#[derive(Clone, Debug, Deserialize)]
pub struct DuplicateSpec {
    pub column: String,
    #[serde(rename = "as")]
    pub as_label: String,
}

/// Copies one column's type under a new label. If the new label already
/// exists, that column's type is overwritten in place instead of appending.
pub struct DuplicateMutator {
    column: String,
    as_label: String,
}

impl DuplicateMutator {
    pub fn from_spec(spec: &DuplicateSpec) -> Self {
        Self {
            column: spec.column.clone(),
            as_label: spec.as_label.clone(),
        }
    }
}

impl SchemaMutator for DuplicateMutator {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> ExecResult<()> {
        let Some(from_idx) = col_idx(&self.column, &ctx.cols) else {
            return Err(ExecError::validation(format!(
                "duplicate error: column \"{}\" doesn't exist",
                self.column
            )));
        };

        let new_col = ColMeta::new(self.as_label.clone(), ctx.cols[from_idx].column_type);
        match col_idx(&self.as_label, &ctx.cols) {
            None => {
                ctx.cols.push(new_col.clone());
                ctx.col_map.push(ctx.col_map[from_idx]);
            }
            Some(as_idx) => {
                // Overwrite in place: position preserved, column count
                // unchanged.
                ctx.cols[as_idx] = new_col.clone();
                ctx.col_map[as_idx] = ctx.col_map[from_idx];
            }
        }

        if let Some(as_key_idx) = ctx.key.col_idx(&self.as_label) {
            let mut key_cols = ctx.key.cols().to_vec();
            let mut key_values = ctx.key.values().to_vec();
            match ctx.key.col_idx(&self.column) {
                Some(from_key_idx) => {
                    // Clone the source's key value under the new label.
                    key_cols[as_key_idx] = new_col;
                    key_values[as_key_idx] = key_values[from_key_idx].clone();
                }
                None => {
                    // Source column left the key set; the new label leaves
                    // the key with it.
                    key_cols.remove(as_key_idx);
                    key_values.remove(as_key_idx);
                }
            }
            ctx.key = GroupKey::new(key_cols, key_values)?;
        }

        Ok(())
    }
}
