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
use std::collections::HashMap;

use serde::Deserialize;

use super::{BuilderContext, SchemaMutator, check_col};
use crate::common::error::{ExecError, ExecResult};
use crate::exec::column::ColMeta;
use crate::exec::group_key::GroupKey;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RenameSpec {
    /// Static old-label to new-label mapping.
    #[serde(default)]
    pub columns: HashMap<String, String>,
}

/// Renames columns by static mapping or per-label function; unmatched
/// columns pass through. Renaming a key column rebuilds the key with the new
/// label, value unchanged.
pub struct RenameMutator {
    columns: Option<HashMap<String, String>>,
    func: Option<Box<dyn Fn(&str) -> String + Send>>,
}

impl std::fmt::Debug for RenameMutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenameMutator")
            .field("columns", &self.columns)
            .field("func", &self.func.as_ref().map(|_| ".."))
            .finish()
    }
}

impl RenameMutator {
    pub fn from_spec(spec: &RenameSpec) -> ExecResult<Self> {
        if spec.columns.is_empty() {
            return Err(ExecError::validation(
                "rename error: no columns or function specified",
            ));
        }
        Ok(Self {
            columns: Some(spec.columns.clone()),
            func: None,
        })
    }

    /// Function-based rename, applied to every label.
    pub fn with_func(func: impl Fn(&str) -> String + Send + 'static) -> Self {
        Self {
            columns: None,
            func: Some(Box::new(func)),
        }
    }

    fn new_label(&self, label: &str) -> String {
        if let Some(columns) = &self.columns {
            return columns.get(label).cloned().unwrap_or_else(|| label.to_string());
        }
        if let Some(func) = &self.func {
            return func(label);
        }
        label.to_string()
    }

    fn check_columns(&self, cols: &[ColMeta]) -> ExecResult<()> {
        if let Some(columns) = &self.columns {
            for label in columns.keys() {
                check_col(label, cols)
                    .map_err(|e| ExecError::validation(format!("rename error: {}", e.message)))?;
            }
        }
        Ok(())
    }
}

impl SchemaMutator for RenameMutator {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> ExecResult<()> {
        // Validate before touching anything so a failed rename leaves the
        // context unmodified.
        self.check_columns(&ctx.cols)?;

        let mut key_cols = Vec::with_capacity(ctx.key.len());
        let mut key_values = Vec::with_capacity(ctx.key.len());

        for i in 0..ctx.cols.len() {
            let old_label = ctx.cols[i].label.clone();
            let key_idx = ctx.key.col_idx(&old_label);

            ctx.cols[i].label = self.new_label(&old_label);

            if let Some(key_idx) = key_idx {
                key_cols.push(ctx.cols[i].clone());
                key_values.push(ctx.key.value(key_idx)?.clone());
            }
        }

        ctx.key = GroupKey::new(key_cols, key_values)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::column::{ColumnType, Value};
    use crate::exec::group_key::GroupKey;

    fn ctx() -> BuilderContext {
        let cols = vec![
            ColMeta::new("tag", ColumnType::String),
            ColMeta::new("value", ColumnType::Float),
        ];
        let key = GroupKey::new(
            vec![ColMeta::new("tag", ColumnType::String)],
            vec![Value::str("a")],
        )
        .unwrap();
        BuilderContext {
            cols,
            key,
            col_map: vec![0, 1],
        }
    }

    #[test]
    fn renames_key_column_consistently() {
        let mut ctx = ctx();
        let mut m = RenameMutator::from_spec(&RenameSpec {
            columns: HashMap::from([("tag".to_string(), "host".to_string())]),
        })
        .unwrap();
        m.mutate(&mut ctx).unwrap();

        assert_eq!(ctx.cols[0].label, "host");
        assert_eq!(ctx.cols[1].label, "value");
        assert_eq!(ctx.key.cols()[0].label, "host");
        // Only the label changed; the key value is untouched.
        assert_eq!(ctx.key.value(0).unwrap(), &Value::str("a"));
        assert_eq!(ctx.col_map, vec![0, 1]);
    }

    #[test]
    fn unknown_column_fails_and_leaves_ctx_unmodified() {
        let mut ctx = ctx();
        let mut m = RenameMutator::from_spec(&RenameSpec {
            columns: HashMap::from([("missing".to_string(), "x".to_string())]),
        })
        .unwrap();
        let err = m.mutate(&mut ctx).unwrap_err();
        assert!(err.message.contains(r#"column "missing" doesn't exist"#));
        assert_eq!(ctx.cols[0].label, "tag");
        assert_eq!(ctx.key.cols()[0].label, "tag");
    }

    #[test]
    fn function_rename_applies_to_every_label() {
        let mut ctx = ctx();
        let mut m = RenameMutator::with_func(|label| format!("{label}_2"));
        m.mutate(&mut ctx).unwrap();
        assert_eq!(ctx.cols[0].label, "tag_2");
        assert_eq!(ctx.cols[1].label, "value_2");
        assert_eq!(ctx.key.cols()[0].label, "tag_2");
    }

    #[test]
    fn empty_spec_rejected() {
        let err = RenameMutator::from_spec(&RenameSpec::default()).unwrap_err();
        assert!(err.message.contains("no columns"));
    }
}
