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
//! Group keys partitioning an unbounded row stream into sub-streams.
//!
//! Responsibilities:
//! - Identifies which partition a table belongs to via ordered
//!   (column, value) pairs, canonicalized by label for deterministic
//!   equality, hashing and iteration order.
//!
//! Key exported interfaces:
//! - Types: `GroupKey`.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::common::error::{ExecError, ExecResult};
use crate::exec::column::{ColMeta, Value};

#[derive(Debug, Eq, PartialEq, Hash)]
struct GroupKeyInner {
    cols: Vec<ColMeta>,
    values: Vec<Value>,
}

/// Ordered (column, value) pairs identifying one partition. Tables sharing an
/// equal key are successive batches of the same logical sub-stream.
///
/// Cheap to clone: the pair list is shared behind an `Arc`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct GroupKey {
    inner: Arc<GroupKeyInner>,
}

impl GroupKey {
    /// Builds a key from parallel column/value lists. Pairs are sorted by
    /// label so two keys built from differently ordered inputs compare equal.
    pub fn new(cols: Vec<ColMeta>, values: Vec<Value>) -> ExecResult<Self> {
        if cols.len() != values.len() {
            return Err(ExecError::validation(format!(
                "group key has {} columns but {} values",
                cols.len(),
                values.len()
            )));
        }
        for (c, v) in cols.iter().zip(values.iter()) {
            if v.column_type() != c.column_type {
                return Err(ExecError::validation(format!(
                    "group key column \"{}\" has type {} but value of type {}",
                    c.label,
                    c.column_type,
                    v.column_type()
                )));
            }
        }
        let mut pairs: Vec<(ColMeta, Value)> = cols.into_iter().zip(values).collect();
        pairs.sort_by(|a, b| a.0.label.cmp(&b.0.label));
        let (cols, values) = pairs.into_iter().unzip();
        Ok(Self {
            inner: Arc::new(GroupKeyInner { cols, values }),
        })
    }

    /// The empty key: all rows belong to one partition.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(GroupKeyInner {
                cols: Vec::new(),
                values: Vec::new(),
            }),
        }
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.inner.cols
    }

    pub fn values(&self) -> &[Value] {
        &self.inner.values
    }

    pub fn len(&self) -> usize {
        self.inner.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.cols.is_empty()
    }

    pub fn value(&self, i: usize) -> ExecResult<&Value> {
        self.inner.values.get(i).ok_or_else(|| {
            ExecError::validation(format!(
                "group key has no column at index {} (len={})",
                i,
                self.len()
            ))
        })
    }

    pub fn has_col(&self, label: &str) -> bool {
        self.inner.cols.iter().any(|c| c.label == label)
    }

    pub fn col_idx(&self, label: &str) -> Option<usize> {
        self.inner.cols.iter().position(|c| c.label == label)
    }

    pub fn label_value(&self, label: &str) -> Option<&Value> {
        self.col_idx(label).map(|i| &self.inner.values[i])
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GroupKey {
    /// Lexicographic over (label, value) pairs; used for deterministic
    /// iteration and merge order.
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.cols().iter().zip(self.values());
        let rhs = other.cols().iter().zip(other.values());
        for ((lc, lv), (rc, rv)) in lhs.zip(rhs) {
            match lc.label.cmp(&rc.label).then_with(|| lv.cmp(rv)) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        self.len().cmp(&other.len())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (c, v)) in self.cols().iter().zip(self.values()).enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}={}", c.label, v)?;
        }
        f.write_str("}")
    }
}
