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
//! Schema-mutation pipeline: rewrites column metadata and group keys.
//!
//! Responsibilities:
//! - Threads a mutable `BuilderContext` through an ordered chain of
//!   mutators; each rewrites columns, key and source-column map, never row
//!   data. The surrounding engine applies the result to a fresh builder and
//!   copies qualifying rows.
//!
//! Key exported interfaces:
//! - Types: `BuilderContext`, `SchemaMutator`, `MutationSpec`.

mod apply;
mod drop_keep;
mod duplicate;
mod rename;

pub use apply::SchemaMutationTransformation;
pub use drop_keep::{DropKeepMutator, DropSpec, KeepSpec};
pub use duplicate::{DuplicateMutator, DuplicateSpec};
pub use rename::{RenameMutator, RenameSpec};

use serde::Deserialize;

use crate::common::error::{ExecError, ExecResult};
use crate::exec::column::ColMeta;
use crate::exec::group_key::GroupKey;
use crate::exec::table::BatchTable;

/// Mutable staging area for column/key metadata while a mutator chain runs.
/// Created fresh per incoming table, discarded once applied to a builder.
pub struct BuilderContext {
    pub cols: Vec<ColMeta>,
    pub key: GroupKey,
    /// Maps each current column index to the column index in the original
    /// source table the row data is copied from.
    pub col_map: Vec<usize>,
}

impl BuilderContext {
    pub fn new(table: &BatchTable) -> Self {
        Self {
            cols: table.cols().to_vec(),
            key: table.key().clone(),
            col_map: (0..table.cols().len()).collect(),
        }
    }
}

/// One step of the mutation chain. Mutators only declare how metadata must
/// change; invalid input (unknown column, conflicting rename) is an error
/// and must leave the context unmodified.
pub trait SchemaMutator: Send {
    fn mutate(&mut self, ctx: &mut BuilderContext) -> ExecResult<()>;
}

/// Declarative mutation, as carried inside stage parameters.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MutationSpec {
    Rename(RenameSpec),
    Drop(DropSpec),
    Keep(KeepSpec),
    Duplicate(DuplicateSpec),
}

impl MutationSpec {
    pub fn mutator(&self) -> ExecResult<Box<dyn SchemaMutator>> {
        match self {
            MutationSpec::Rename(s) => Ok(Box::new(RenameMutator::from_spec(s)?)),
            MutationSpec::Drop(s) => Ok(Box::new(DropKeepMutator::from_drop_spec(s)?)),
            MutationSpec::Keep(s) => Ok(Box::new(DropKeepMutator::from_keep_spec(s)?)),
            MutationSpec::Duplicate(s) => Ok(Box::new(DuplicateMutator::from_spec(s))),
        }
    }
}

pub(crate) fn check_col(label: &str, cols: &[ColMeta]) -> ExecResult<()> {
    if crate::exec::column::col_idx(label, cols).is_none() {
        return Err(ExecError::validation(format!(
            "column \"{label}\" doesn't exist"
        )));
    }
    Ok(())
}
